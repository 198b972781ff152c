//! Object data writer.
//!
//! Builds the object portion of request and response fragments: bare
//! headers for READ, headers with point data for WRITE, control functions
//! and responses.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::MappingError;
use crate::parser::FloatByteOrder;
use crate::types::{
    control_code, put_sized, FlagPosition, NumericKind, ObjectHeader, ObjectPoint, PointEncoding,
    Qualifier, Value, Variation, FLAG_ONLINE, FLAG_STATE,
};

/// Builder for fragment object data.
///
/// # Example
///
/// ```rust,ignore
/// let mut writer = ObjectWriter::new();
/// writer.read_single(Variation::new(30, 2), 8);
/// let objects = writer.finish();
/// ```
#[derive(Debug, Default)]
pub struct ObjectWriter {
    buf: BytesMut,
    float_byte_order: FloatByteOrder,
}

impl ObjectWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a writer using a specific float byte order.
    pub fn with_float_byte_order(float_byte_order: FloatByteOrder) -> Self {
        Self {
            buf: BytesMut::new(),
            float_byte_order,
        }
    }

    /// Append a header without point data.
    pub fn header(&mut self, header: &ObjectHeader) -> &mut Self {
        header.encode_to(&mut self.buf);
        self
    }

    /// Request one index (0x17, or 0x28 above 255).
    pub fn read_single(&mut self, variation: Variation, index: u16) -> &mut Self {
        self.header(&ObjectHeader::single(variation, index))
    }

    /// Request a contiguous range (0x00, or 0x01 above 255).
    pub fn read_range(&mut self, variation: Variation, start: u16, stop: u16) -> &mut Self {
        self.header(&ObjectHeader::range(variation, start, stop))
    }

    /// Request every point of a variation or class (0x06).
    pub fn read_all(&mut self, variation: Variation) -> &mut Self {
        self.header(&ObjectHeader::all(variation))
    }

    /// Append points addressed by index prefix (0x17/0x28).
    pub fn indexed(
        &mut self,
        variation: Variation,
        points: &[ObjectPoint],
    ) -> Result<&mut Self, MappingError> {
        let encoding = sized_encoding(variation)?;
        let count = u16::try_from(points.len()).map_err(|_| too_many(points.len(), 0))?;
        let max_index = points.iter().map(|p| p.index).max().unwrap_or(0);
        let qualifier = Qualifier::prefix_for(max_index, points.len());

        // Encode aside so a rejected value leaves no partial block behind
        let mut block = BytesMut::new();
        block.put_u8(variation.group);
        block.put_u8(variation.variation);
        block.put_u8(qualifier.as_u8());
        put_sized(&mut block, qualifier.range_size(), count);
        for point in points {
            put_sized(&mut block, qualifier.prefix_size(), point.index);
            encode_point(&mut block, variation, encoding, point, self.float_byte_order)?;
        }
        self.buf.unsplit(block);
        Ok(self)
    }

    /// Append points with contiguous indices starting at `start` (0x00/0x01).
    ///
    /// Packed-bit variations are only expressible this way.
    pub fn range(
        &mut self,
        variation: Variation,
        start: u16,
        points: &[ObjectPoint],
    ) -> Result<&mut Self, MappingError> {
        let Some(encoding) = variation.encoding() else {
            return Err(unsupported(variation));
        };
        if points.is_empty() || encoding == PointEncoding::NoData {
            return Ok(self);
        }

        let stop = u16::try_from(points.len() - 1)
            .ok()
            .and_then(|last| start.checked_add(last))
            .ok_or_else(|| too_many(points.len(), start))?;
        let mut block = BytesMut::new();
        ObjectHeader::range(variation, start, stop).encode_to(&mut block);

        if encoding == PointEncoding::PackedBit {
            let mut packed = vec![0u8; points.len().div_ceil(8)];
            for (i, point) in points.iter().enumerate() {
                if point.value.as_f64() != 0.0 {
                    packed[i / 8] |= 1 << (i % 8);
                }
            }
            block.extend_from_slice(&packed);
        } else {
            for point in points {
                encode_point(&mut block, variation, encoding, point, self.float_byte_order)?;
            }
        }
        self.buf.unsplit(block);
        Ok(self)
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Check if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Take the encoded object data, leaving the writer empty.
    pub fn finish(&mut self) -> Bytes {
        self.buf.split().freeze()
    }
}

fn unsupported(variation: Variation) -> MappingError {
    MappingError::UnsupportedVariation {
        group: variation.group,
        variation: variation.variation,
    }
}

/// Encoding of a variation that has a fixed per-point size.
fn sized_encoding(variation: Variation) -> Result<PointEncoding, MappingError> {
    match variation.encoding() {
        Some(PointEncoding::PackedBit) | Some(PointEncoding::NoData) | None => {
            Err(unsupported(variation))
        }
        Some(encoding) => Ok(encoding),
    }
}

/// Points past index 65535 cannot be addressed.
fn too_many(count: usize, start: u16) -> MappingError {
    MappingError::IndexOutOfRange {
        index: start as i64 + count as i64 - 1,
        index_offset: 0,
    }
}

/// Encode one point's data (no index prefix).
pub fn encode_point(
    buf: &mut BytesMut,
    variation: Variation,
    encoding: PointEncoding,
    point: &ObjectPoint,
    order: FloatByteOrder,
) -> Result<(), MappingError> {
    match encoding {
        PointEncoding::BinaryWithFlags => {
            let flags = point.flags.unwrap_or(FLAG_ONLINE) & !FLAG_STATE;
            let state = if point.value.as_f64() != 0.0 {
                FLAG_STATE
            } else {
                0
            };
            buf.put_u8(flags | state);
        }
        PointEncoding::Crob => {
            let code = if point.value.as_f64() != 0.0 {
                control_code::LATCH_ON
            } else {
                control_code::LATCH_OFF
            };
            buf.put_u8(code);
            buf.put_u8(1); // count
            buf.put_u32_le(0); // on-time
            buf.put_u32_le(0); // off-time
            buf.put_u8(point.status.unwrap_or(0));
        }
        PointEncoding::Numeric { kind, flag } => {
            if flag == FlagPosition::Leading {
                buf.put_u8(point.flags.unwrap_or(FLAG_ONLINE));
            }
            encode_numeric(buf, variation, kind, point.value, order)?;
            if flag == FlagPosition::Trailing {
                buf.put_u8(point.status.unwrap_or(0));
            }
        }
        PointEncoding::PackedBit | PointEncoding::NoData => return Err(unsupported(variation)),
    }
    Ok(())
}

fn encode_numeric(
    buf: &mut BytesMut,
    variation: Variation,
    kind: NumericKind,
    value: Value,
    order: FloatByteOrder,
) -> Result<(), MappingError> {
    match (kind, order) {
        (NumericKind::F32, FloatByteOrder::LittleEndian) => buf.put_f32_le(value.as_f64() as f32),
        (NumericKind::F32, FloatByteOrder::BigEndian) => buf.put_f32(value.as_f64() as f32),
        (NumericKind::F64, FloatByteOrder::LittleEndian) => buf.put_f64_le(value.as_f64()),
        (NumericKind::F64, FloatByteOrder::BigEndian) => buf.put_f64(value.as_f64()),
        _ => {
            let out_of_range = MappingError::ValueOutOfRange {
                value: value.as_f64(),
                group: variation.group,
                variation: variation.variation,
            };
            let raw = match value {
                Value::Int(v) => v,
                Value::Bool(b) => b as i64,
                Value::Float(f) if f.is_finite() => f.round() as i64,
                Value::Float(_) => return Err(out_of_range),
            };
            let (min, max) = kind.int_bounds().ok_or_else(|| out_of_range.clone())?;
            if raw < min || raw > max {
                return Err(out_of_range);
            }
            match kind {
                NumericKind::I16 => buf.put_i16_le(raw as i16),
                NumericKind::U16 => buf.put_u16_le(raw as u16),
                NumericKind::I32 => buf.put_i32_le(raw as i32),
                NumericKind::U32 => buf.put_u32_le(raw as u32),
                NumericKind::F32 | NumericKind::F64 => {}
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_objects, DecodeOptions};
    use crate::types::{status, IIN_RESTART_INDEX};

    #[test]
    fn test_read_requests() {
        let mut writer = ObjectWriter::new();
        writer
            .read_single(Variation::new(30, 2), 8)
            .read_range(Variation::new(1, 2), 0, 9)
            .read_all(Variation::CLASS_0);
        assert_eq!(
            &writer.finish()[..],
            &[
                0x1E, 0x02, 0x17, 0x01, 0x08, //
                0x01, 0x02, 0x00, 0x00, 0x09, //
                0x3C, 0x01, 0x06,
            ]
        );
        assert!(writer.is_empty());
    }

    #[test]
    fn test_analog_output_command() {
        let mut writer = ObjectWriter::new();
        writer
            .indexed(
                Variation::new(41, 1),
                &[ObjectPoint::new(3, Value::Int(-1000))],
            )
            .unwrap();
        assert_eq!(
            &writer.finish()[..],
            &[0x29, 0x01, 0x17, 0x01, 0x03, 0x18, 0xFC, 0xFF, 0xFF, 0x00]
        );
    }

    #[test]
    fn test_crob_command() {
        let mut writer = ObjectWriter::new();
        writer
            .indexed(Variation::new(12, 1), &[ObjectPoint::new(4, Value::Bool(true))])
            .unwrap();
        assert_eq!(
            &writer.finish()[..],
            &[
                0x0C, 0x01, 0x17, 0x01, 0x04, //
                control_code::LATCH_ON, 0x01, 0, 0, 0, 0, 0, 0, 0, 0, status::SUCCESS,
            ]
        );
    }

    #[test]
    fn test_clear_restart_write() {
        let mut writer = ObjectWriter::new();
        writer
            .range(
                Variation::new(80, 1),
                IIN_RESTART_INDEX,
                &[ObjectPoint::new(IIN_RESTART_INDEX, Value::Bool(false))],
            )
            .unwrap();
        assert_eq!(&writer.finish()[..], &[0x50, 0x01, 0x00, 0x07, 0x07, 0x00]);
    }

    #[test]
    fn test_response_blocks_decode() {
        let opts = DecodeOptions::default();
        let mut writer = ObjectWriter::new();
        writer
            .range(
                Variation::new(1, 1),
                0,
                &[
                    ObjectPoint::new(0, Value::Bool(true)),
                    ObjectPoint::new(1, Value::Bool(false)),
                    ObjectPoint::new(2, Value::Bool(true)),
                ],
            )
            .unwrap()
            .range(
                Variation::new(30, 5),
                10,
                &[ObjectPoint::with_flags(10, Value::Float(-1.5), FLAG_ONLINE)],
            )
            .unwrap()
            .indexed(
                Variation::new(20, 1),
                &[ObjectPoint::with_flags(300, Value::Int(70000), FLAG_ONLINE)],
            )
            .unwrap();

        let blocks = parse_objects(&writer.finish(), 4, &opts).unwrap();
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].points[2].value, Value::Bool(true));
        assert_eq!(blocks[1].points[0].value, Value::Float(-1.5));
        assert_eq!(blocks[2].points[0].index, 300);
        assert_eq!(blocks[2].points[0].value, Value::Int(70000));
    }

    #[test]
    fn test_big_endian_float() {
        let mut writer = ObjectWriter::with_float_byte_order(FloatByteOrder::BigEndian);
        writer
            .indexed(Variation::new(41, 3), &[ObjectPoint::new(0, Value::Float(1.0))])
            .unwrap();
        assert_eq!(
            &writer.finish()[..],
            &[0x29, 0x03, 0x17, 0x01, 0x00, 0x3F, 0x80, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn test_point_count_limits() {
        let points: Vec<ObjectPoint> = (0..=u16::MAX)
            .map(|i| ObjectPoint::new(i, Value::Bool(i % 2 == 0)))
            .collect();
        assert_eq!(points.len(), 65536);

        // The whole index space fits a 2-byte start/stop range
        let mut writer = ObjectWriter::new();
        writer.range(Variation::new(1, 1), 0, &points).unwrap();
        assert_eq!(writer.len(), 3 + 4 + 8192);

        let err = writer
            .range(Variation::new(1, 1), 1, &points)
            .unwrap_err();
        assert_eq!(
            err,
            MappingError::IndexOutOfRange {
                index: 65536,
                index_offset: 0
            }
        );

        // A 2-byte count cannot carry 65536 prefixed points
        let analogs: Vec<ObjectPoint> = points
            .iter()
            .map(|p| ObjectPoint::new(p.index, Value::Int(1)))
            .collect();
        let before = writer.len();
        let err = writer
            .indexed(Variation::new(30, 1), &analogs)
            .unwrap_err();
        assert!(matches!(err, MappingError::IndexOutOfRange { .. }));
        assert_eq!(writer.len(), before);

        writer
            .indexed(Variation::new(30, 1), &analogs[..65535])
            .unwrap();
    }

    #[test]
    fn test_value_out_of_range() {
        let mut writer = ObjectWriter::new();
        let err = writer
            .indexed(Variation::new(41, 2), &[ObjectPoint::new(0, Value::Int(40000))])
            .unwrap_err();
        assert_eq!(
            err,
            MappingError::ValueOutOfRange {
                value: 40000.0,
                group: 41,
                variation: 2
            }
        );

        let err = writer
            .indexed(
                Variation::new(41, 1),
                &[ObjectPoint::new(0, Value::Float(f64::NAN))],
            )
            .unwrap_err();
        assert!(matches!(err, MappingError::ValueOutOfRange { .. }));

        // Floats are rounded into integer variations
        writer
            .indexed(Variation::new(41, 2), &[ObjectPoint::new(0, Value::Float(2.6))])
            .unwrap();
        assert_eq!(&writer.finish()[5..7], &[0x03, 0x00]);
    }

    #[test]
    fn test_unsupported_variations() {
        let mut writer = ObjectWriter::new();
        assert_eq!(
            writer
                .indexed(Variation::new(1, 1), &[ObjectPoint::new(0, Value::Bool(true))])
                .unwrap_err(),
            MappingError::UnsupportedVariation {
                group: 1,
                variation: 1
            }
        );
        assert!(writer
            .range(Variation::new(30, 9), 0, &[ObjectPoint::new(0, Value::Int(0))])
            .is_err());
    }
}
