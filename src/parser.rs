//! Object data parser.
//!
//! This module decodes the object blocks of an application fragment into
//! structured [`ObjectBlock`] values. Decoding is driven entirely by the
//! qualifier and the group/variation size table: each header states how
//! many points follow and how they are indexed, so nothing is guessed.
//!
//! Every error carries the byte offset (relative to the start of the
//! fragment) where decoding stopped. A fragment either decodes completely
//! or not at all.

use crate::error::ApplicationDecodeError;
use crate::types::{
    control_code, FlagPosition, Fragment, NumericKind, ObjectBlock, ObjectHeader, ObjectPoint,
    PointEncoding, Qualifier, Range, Value, Variation,
};

/// Byte order of floating-point values on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FloatByteOrder {
    /// Standard order
    #[default]
    LittleEndian,
    /// Legacy devices that send IEEE-754 values big-endian
    BigEndian,
}

/// Options for decoding object data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecodeOptions {
    /// Float byte order
    pub float_byte_order: FloatByteOrder,
}

impl DecodeOptions {
    /// Options with a specific float byte order.
    pub const fn with_float_byte_order(float_byte_order: FloatByteOrder) -> Self {
        Self { float_byte_order }
    }
}

/// Decode the object blocks of a response fragment.
///
/// # Example
///
/// ```rust,ignore
/// let fragment = Fragment::parse(&bytes)?;
/// for block in parse_response(&fragment, &DecodeOptions::default())? {
///     for point in &block.points {
///         println!("{} [{}] = {}", block.header.variation, point.index, point.value);
///     }
/// }
/// ```
pub fn parse_response(
    fragment: &Fragment,
    opts: &DecodeOptions,
) -> Result<Vec<ObjectBlock>, ApplicationDecodeError> {
    parse_objects(&fragment.objects, fragment.header_len(), opts)
}

/// Decode object blocks carrying point data.
///
/// `base_offset` is the position of `data` within the fragment and is only
/// used for error reporting.
pub fn parse_objects(
    data: &[u8],
    base_offset: usize,
    opts: &DecodeOptions,
) -> Result<Vec<ObjectBlock>, ApplicationDecodeError> {
    let mut cursor = Cursor::new(data, base_offset);
    let mut blocks = Vec::new();

    while !cursor.is_empty() {
        let (header, encoding) = parse_header(&mut cursor)?;
        let points = parse_points(&mut cursor, &header, encoding, opts)?;
        blocks.push(ObjectBlock { header, points });
    }

    Ok(blocks)
}

/// Decode request object headers that carry no point data (READ form).
///
/// Index-prefix qualifiers list the requested indices directly.
pub fn parse_headers(
    data: &[u8],
    base_offset: usize,
) -> Result<Vec<ObjectHeader>, ApplicationDecodeError> {
    let mut cursor = Cursor::new(data, base_offset);
    let mut headers = Vec::new();

    while !cursor.is_empty() {
        let (mut header, _) = parse_header(&mut cursor)?;
        if let Range::Count(count) = header.range {
            if header.qualifier.prefix_size() > 0 {
                let size = header.qualifier.prefix_size();
                cursor.check(count as usize * size)?;
                let mut indices = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    indices.push(cursor.sized(size)?);
                }
                header.range = Range::Indexed(indices);
            }
        }
        headers.push(header);
    }

    Ok(headers)
}

/// Find a point of `group` by protocol index.
pub fn find_point(blocks: &[ObjectBlock], group: u8, index: u16) -> Option<&ObjectPoint> {
    blocks
        .iter()
        .filter(|block| block.header.variation.group == group)
        .find_map(|block| block.find(index))
}

/// Binary state commanded by a CROB code.
pub fn crob_state(code: u8) -> bool {
    match code & 0xC0 {
        control_code::CLOSE => true,
        control_code::TRIP => false,
        _ => matches!(
            code & 0x0F,
            control_code::PULSE_ON | control_code::LATCH_ON
        ),
    }
}

/// Parse group, variation, qualifier and range.
///
/// For index-prefix qualifiers the range is returned as `Range::Count`;
/// the indices are interleaved with the data and read by the caller.
fn parse_header(
    cursor: &mut Cursor<'_>,
) -> Result<(ObjectHeader, PointEncoding), ApplicationDecodeError> {
    let offset = cursor.offset();
    let group = cursor.u8()?;
    let variation = cursor.u8()?;
    let qualifier_offset = cursor.offset();
    let code = cursor.u8()?;

    let variation = Variation::new(group, variation);
    let encoding = variation
        .encoding()
        .ok_or(ApplicationDecodeError::UnknownObject {
            group,
            variation: variation.variation,
            offset,
        })?;
    let qualifier = Qualifier::from_u8(code).ok_or(ApplicationDecodeError::BadQualifier {
        qualifier: code,
        group,
        variation: variation.variation,
        offset: qualifier_offset,
    })?;

    let range_offset = cursor.offset();
    let range = match qualifier {
        Qualifier::Range8 | Qualifier::Range16 => {
            let size = qualifier.range_size() / 2;
            let start = cursor.sized(size)?;
            let stop = cursor.sized(size)?;
            if stop < start {
                return Err(ApplicationDecodeError::BadRange {
                    start: start as u32,
                    stop: stop as u32,
                    offset: range_offset,
                });
            }
            Range::StartStop { start, stop }
        }
        Qualifier::AllObjects => Range::All,
        Qualifier::Count8
        | Qualifier::Count16
        | Qualifier::CountAndPrefix8
        | Qualifier::CountAndPrefix16 => Range::Count(cursor.sized(qualifier.range_size())?),
    };

    Ok((
        ObjectHeader {
            variation,
            qualifier,
            range,
        },
        encoding,
    ))
}

/// Parse the point data that follows a header.
fn parse_points(
    cursor: &mut Cursor<'_>,
    header: &ObjectHeader,
    encoding: PointEncoding,
    opts: &DecodeOptions,
) -> Result<Vec<ObjectPoint>, ApplicationDecodeError> {
    let offset = cursor.offset();
    let bad_qualifier = || ApplicationDecodeError::BadQualifier {
        qualifier: header.qualifier.as_u8(),
        group: header.variation.group,
        variation: header.variation.variation,
        offset,
    };

    if encoding == PointEncoding::NoData {
        return Ok(Vec::new());
    }

    let (start, count) = match header.range {
        Range::StartStop { start, stop } => (start, (stop - start) as usize + 1),
        Range::Count(count) => (0, count as usize),
        // No count means no way to size the data
        Range::All | Range::Indexed(_) => return Err(bad_qualifier()),
    };
    let prefix = header.qualifier.prefix_size();

    let Some(size) = encoding.byte_size() else {
        if prefix > 0 {
            return Err(bad_qualifier());
        }
        return parse_packed(cursor, start, count);
    };

    cursor.check(count * (prefix + size))?;

    let mut points = Vec::with_capacity(count);
    for i in 0..count {
        let index = if prefix > 0 {
            cursor.sized(prefix)?
        } else {
            start + i as u16
        };
        points.push(parse_point(cursor, index, encoding, opts)?);
    }
    Ok(points)
}

/// Parse bit-packed binary points, LSB first.
fn parse_packed(
    cursor: &mut Cursor<'_>,
    start: u16,
    count: usize,
) -> Result<Vec<ObjectPoint>, ApplicationDecodeError> {
    let bytes = cursor.take(count.div_ceil(8))?;
    let points = (0..count)
        .map(|i| {
            let state = bytes[i / 8] & (1 << (i % 8)) != 0;
            ObjectPoint::new(start + i as u16, Value::Bool(state))
        })
        .collect();
    Ok(points)
}

/// Parse one fixed-size point.
fn parse_point(
    cursor: &mut Cursor<'_>,
    index: u16,
    encoding: PointEncoding,
    opts: &DecodeOptions,
) -> Result<ObjectPoint, ApplicationDecodeError> {
    let point = match encoding {
        PointEncoding::BinaryWithFlags => {
            let flags = cursor.u8()?;
            ObjectPoint::with_flags(index, Value::Bool(flags & 0x80 != 0), flags)
        }
        PointEncoding::Crob => {
            let bytes = cursor.take(11)?;
            ObjectPoint {
                index,
                value: Value::Bool(crob_state(bytes[0])),
                flags: None,
                status: Some(bytes[10]),
            }
        }
        PointEncoding::Numeric { kind, flag } => {
            let flags = if flag == FlagPosition::Leading {
                Some(cursor.u8()?)
            } else {
                None
            };
            let value = parse_numeric(cursor, kind, opts.float_byte_order)?;
            let status = if flag == FlagPosition::Trailing {
                Some(cursor.u8()?)
            } else {
                None
            };
            ObjectPoint {
                index,
                value,
                flags,
                status,
            }
        }
        PointEncoding::PackedBit | PointEncoding::NoData => {
            unreachable!("handled before per-point decoding")
        }
    };
    Ok(point)
}

fn parse_numeric(
    cursor: &mut Cursor<'_>,
    kind: NumericKind,
    order: FloatByteOrder,
) -> Result<Value, ApplicationDecodeError> {
    let bytes = cursor.take(kind.size())?;
    let value = match kind {
        NumericKind::I16 => Value::Int(i16::from_le_bytes([bytes[0], bytes[1]]) as i64),
        NumericKind::U16 => Value::Int(u16::from_le_bytes([bytes[0], bytes[1]]) as i64),
        NumericKind::I32 => {
            Value::Int(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64)
        }
        NumericKind::U32 => {
            Value::Int(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64)
        }
        NumericKind::F32 => {
            let raw = [bytes[0], bytes[1], bytes[2], bytes[3]];
            let value = match order {
                FloatByteOrder::LittleEndian => f32::from_le_bytes(raw),
                FloatByteOrder::BigEndian => f32::from_be_bytes(raw),
            };
            Value::Float(value as f64)
        }
        NumericKind::F64 => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(bytes);
            let value = match order {
                FloatByteOrder::LittleEndian => f64::from_le_bytes(raw),
                FloatByteOrder::BigEndian => f64::from_be_bytes(raw),
            };
            Value::Float(value)
        }
    };
    Ok(value)
}

/// Read position over object data with fragment-relative offsets.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
    base: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8], base: usize) -> Self {
        Self { data, pos: 0, base }
    }

    fn offset(&self) -> usize {
        self.base + self.pos
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Fail unless `needed` more bytes are available.
    fn check(&self, needed: usize) -> Result<(), ApplicationDecodeError> {
        if needed > self.remaining() {
            return Err(ApplicationDecodeError::Truncated {
                offset: self.offset(),
                needed,
                available: self.remaining(),
            });
        }
        Ok(())
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ApplicationDecodeError> {
        self.check(n)?;
        let bytes = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8, ApplicationDecodeError> {
        Ok(self.take(1)?[0])
    }

    /// Read a 1- or 2-byte little-endian field.
    fn sized(&mut self, size: usize) -> Result<u16, ApplicationDecodeError> {
        let bytes = self.take(size)?;
        Ok(match bytes {
            [b] => *b as u16,
            [lo, hi] => u16::from_le_bytes([*lo, *hi]),
            _ => 0,
        })
    }
}
