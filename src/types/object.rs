//! DNP3 object addressing: group, variation, qualifier and range.
//!
//! The group/variation pair fixes how each point is encoded; the qualifier
//! fixes how the points of a block are addressed.

use bytes::{BufMut, BytesMut};

pub const GROUP_BINARY_INPUT: u8 = 1;
pub const GROUP_BINARY_OUTPUT: u8 = 10;
pub const GROUP_CROB: u8 = 12;
pub const GROUP_COUNTER: u8 = 20;
pub const GROUP_ANALOG_INPUT: u8 = 30;
pub const GROUP_ANALOG_OUTPUT_STATUS: u8 = 40;
pub const GROUP_ANALOG_OUTPUT: u8 = 41;
pub const GROUP_CLASS_DATA: u8 = 60;
pub const GROUP_IIN: u8 = 80;

/// Index of the DEVICE_RESTART bit in g80v1.
pub const IIN_RESTART_INDEX: u16 = 7;

/// Control status codes echoed in g12/g41 objects.
pub mod status {
    pub const SUCCESS: u8 = 0;
    pub const TIMEOUT: u8 = 1;
    pub const NO_SELECT: u8 = 2;
    pub const FORMAT_ERROR: u8 = 3;
    pub const NOT_SUPPORTED: u8 = 4;
    pub const ALREADY_ACTIVE: u8 = 5;
    pub const HARDWARE_ERROR: u8 = 6;
}

/// CROB operation codes.
pub mod control_code {
    pub const NUL: u8 = 0x00;
    pub const PULSE_ON: u8 = 0x01;
    pub const PULSE_OFF: u8 = 0x02;
    pub const LATCH_ON: u8 = 0x03;
    pub const LATCH_OFF: u8 = 0x04;
    pub const CLOSE: u8 = 0x40;
    pub const TRIP: u8 = 0x80;
}

/// Numeric wire representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericKind {
    I16,
    I32,
    U16,
    U32,
    F32,
    F64,
}

impl NumericKind {
    /// Size in bytes.
    #[inline]
    pub const fn size(&self) -> usize {
        match self {
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::F64 => 8,
        }
    }

    /// Check if this is a floating-point representation.
    #[inline]
    pub const fn is_float(&self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }

    /// Inclusive range of representable integers (floats are unbounded).
    pub const fn int_bounds(&self) -> Option<(i64, i64)> {
        match self {
            Self::I16 => Some((i16::MIN as i64, i16::MAX as i64)),
            Self::I32 => Some((i32::MIN as i64, i32::MAX as i64)),
            Self::U16 => Some((0, u16::MAX as i64)),
            Self::U32 => Some((0, u32::MAX as i64)),
            Self::F32 | Self::F64 => None,
        }
    }
}

/// Where the one-byte flag/status sits relative to the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagPosition {
    /// No flag byte
    None,
    /// Quality flags before the value
    Leading,
    /// Control status after the value
    Trailing,
}

/// How the points of a variation are laid out on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointEncoding {
    /// One bit per point, packed LSB first
    PackedBit,
    /// One flags byte, state in bit 7
    BinaryWithFlags,
    /// Control relay output block (11 bytes)
    Crob,
    /// Numeric value with optional flag byte
    Numeric {
        kind: NumericKind,
        flag: FlagPosition,
    },
    /// Header only (class data)
    NoData,
}

impl PointEncoding {
    /// Bytes per point, `None` for packed bits.
    pub const fn byte_size(&self) -> Option<usize> {
        match self {
            Self::PackedBit => None,
            Self::BinaryWithFlags => Some(1),
            Self::Crob => Some(11),
            Self::Numeric { kind, flag } => Some(
                kind.size()
                    + match flag {
                        FlagPosition::None => 0,
                        _ => 1,
                    },
            ),
            Self::NoData => Some(0),
        }
    }
}

const fn numeric(kind: NumericKind, flag: FlagPosition) -> PointEncoding {
    PointEncoding::Numeric { kind, flag }
}

/// Object group and variation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Variation {
    /// Object group
    pub group: u8,
    /// Variation within the group (0 = any, requests only)
    pub variation: u8,
}

impl Variation {
    /// Create a group/variation pair.
    #[inline]
    pub const fn new(group: u8, variation: u8) -> Self {
        Self { group, variation }
    }

    /// Class 0 (static data) request object.
    pub const CLASS_0: Self = Self::new(GROUP_CLASS_DATA, 1);

    /// Point encoding, `None` when this codec does not know the pair.
    pub const fn encoding(&self) -> Option<PointEncoding> {
        use FlagPosition::{Leading, Trailing};
        use NumericKind::*;

        let encoding = match (self.group, self.variation) {
            (GROUP_BINARY_INPUT, 1) | (GROUP_BINARY_OUTPUT, 1) | (GROUP_IIN, 1) => {
                PointEncoding::PackedBit
            }
            (GROUP_BINARY_INPUT, 2) | (GROUP_BINARY_OUTPUT, 2) => PointEncoding::BinaryWithFlags,
            (GROUP_CROB, 1) => PointEncoding::Crob,

            (GROUP_COUNTER, 1) => numeric(U32, Leading),
            (GROUP_COUNTER, 2) => numeric(U16, Leading),
            (GROUP_COUNTER, 5) => numeric(U32, FlagPosition::None),
            (GROUP_COUNTER, 6) => numeric(U16, FlagPosition::None),

            (GROUP_ANALOG_INPUT, 1) => numeric(I32, Leading),
            (GROUP_ANALOG_INPUT, 2) => numeric(I16, Leading),
            (GROUP_ANALOG_INPUT, 3) => numeric(I32, FlagPosition::None),
            (GROUP_ANALOG_INPUT, 4) => numeric(I16, FlagPosition::None),
            (GROUP_ANALOG_INPUT, 5) => numeric(F32, Leading),
            (GROUP_ANALOG_INPUT, 6) => numeric(F64, Leading),

            (GROUP_ANALOG_OUTPUT_STATUS, 1) => numeric(I32, Leading),
            (GROUP_ANALOG_OUTPUT_STATUS, 2) => numeric(I16, Leading),
            (GROUP_ANALOG_OUTPUT_STATUS, 3) => numeric(F32, Leading),
            (GROUP_ANALOG_OUTPUT_STATUS, 4) => numeric(F64, Leading),

            (GROUP_ANALOG_OUTPUT, 1) => numeric(I32, Trailing),
            (GROUP_ANALOG_OUTPUT, 2) => numeric(I16, Trailing),
            (GROUP_ANALOG_OUTPUT, 3) => numeric(F32, Trailing),
            (GROUP_ANALOG_OUTPUT, 4) => numeric(F64, Trailing),

            (GROUP_CLASS_DATA, 1..=4) => PointEncoding::NoData,
            _ => return None,
        };
        Some(encoding)
    }

    /// Check if the pair is known to this codec.
    #[inline]
    pub const fn is_supported(&self) -> bool {
        self.encoding().is_some()
    }
}

impl std::fmt::Display for Variation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "g{}v{}", self.group, self.variation)
    }
}

/// Object qualifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Qualifier {
    /// 1-byte start/stop
    Range8 = 0x00,
    /// 2-byte start/stop
    Range16 = 0x01,
    /// All objects, no range field
    AllObjects = 0x06,
    /// 1-byte count
    Count8 = 0x07,
    /// 2-byte count
    Count16 = 0x08,
    /// 1-byte count, 1-byte index before each object
    CountAndPrefix8 = 0x17,
    /// 2-byte count, 2-byte index before each object
    CountAndPrefix16 = 0x28,
}

impl Qualifier {
    /// Parse from byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        let qualifier = match value {
            0x00 => Self::Range8,
            0x01 => Self::Range16,
            0x06 => Self::AllObjects,
            0x07 => Self::Count8,
            0x08 => Self::Count16,
            0x17 => Self::CountAndPrefix8,
            0x28 => Self::CountAndPrefix16,
            _ => return None,
        };
        Some(qualifier)
    }

    /// Get the raw value.
    #[inline]
    pub const fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Size of the range field in bytes.
    #[inline]
    pub const fn range_size(&self) -> usize {
        match self {
            Self::AllObjects => 0,
            Self::Count8 | Self::CountAndPrefix8 => 1,
            Self::Range8 | Self::Count16 | Self::CountAndPrefix16 => 2,
            Self::Range16 => 4,
        }
    }

    /// Size of the per-object index prefix in bytes.
    #[inline]
    pub const fn prefix_size(&self) -> usize {
        match self {
            Self::CountAndPrefix8 => 1,
            Self::CountAndPrefix16 => 2,
            _ => 0,
        }
    }

    /// Smallest start/stop qualifier able to express `stop`.
    #[inline]
    pub const fn range_for(stop: u16) -> Self {
        if stop <= u8::MAX as u16 {
            Self::Range8
        } else {
            Self::Range16
        }
    }

    /// Smallest index-prefix qualifier able to express `max_index` and `count`.
    #[inline]
    pub const fn prefix_for(max_index: u16, count: usize) -> Self {
        if max_index <= u8::MAX as u16 && count <= u8::MAX as usize {
            Self::CountAndPrefix8
        } else {
            Self::CountAndPrefix16
        }
    }
}

/// Addressing of the points in one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Range {
    /// Contiguous indices `start..=stop`
    StartStop { start: u16, stop: u16 },
    /// Every point of the type
    All,
    /// `n` points starting at index 0
    Count(u16),
    /// Explicit indices (index-prefix qualifiers)
    Indexed(Vec<u16>),
}

impl Range {
    /// Number of points the range addresses, `None` for `All`.
    pub fn count(&self) -> Option<usize> {
        match self {
            Self::StartStop { start, stop } => {
                Some((*stop as usize).saturating_sub(*start as usize) + 1)
            }
            Self::All => None,
            Self::Count(n) => Some(*n as usize),
            Self::Indexed(indices) => Some(indices.len()),
        }
    }
}

/// Object header: group, variation, qualifier and range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHeader {
    /// Group and variation
    pub variation: Variation,
    /// Qualifier code
    pub qualifier: Qualifier,
    /// Addressed points
    pub range: Range,
}

impl ObjectHeader {
    /// Header for a single index, without data (READ form).
    pub fn single(variation: Variation, index: u16) -> Self {
        Self::indexed(variation, vec![index])
    }

    /// Header listing explicit indices, without data (READ form).
    pub fn indexed(variation: Variation, indices: Vec<u16>) -> Self {
        let max = indices.iter().copied().max().unwrap_or(0);
        Self {
            variation,
            qualifier: Qualifier::prefix_for(max, indices.len()),
            range: Range::Indexed(indices),
        }
    }

    /// Header for a contiguous range.
    pub fn range(variation: Variation, start: u16, stop: u16) -> Self {
        Self {
            variation,
            qualifier: Qualifier::range_for(stop.max(start)),
            range: Range::StartStop { start, stop },
        }
    }

    /// Header addressing all points (qualifier 0x06).
    pub fn all(variation: Variation) -> Self {
        Self {
            variation,
            qualifier: Qualifier::AllObjects,
            range: Range::All,
        }
    }

    /// Encode the header.
    ///
    /// For index-prefix qualifiers the index list is written in full, which
    /// is the request form without object data.
    pub fn encode_to(&self, buf: &mut BytesMut) {
        buf.put_u8(self.variation.group);
        buf.put_u8(self.variation.variation);
        buf.put_u8(self.qualifier.as_u8());

        match &self.range {
            Range::StartStop { start, stop } => {
                put_sized(buf, self.qualifier.range_size() / 2, *start);
                put_sized(buf, self.qualifier.range_size() / 2, *stop);
            }
            Range::All => {}
            Range::Count(n) => put_sized(buf, self.qualifier.range_size(), *n),
            Range::Indexed(indices) => {
                put_sized(buf, self.qualifier.range_size(), indices.len() as u16);
                for index in indices {
                    put_sized(buf, self.qualifier.prefix_size(), *index);
                }
            }
        }
    }
}

impl std::fmt::Display for ObjectHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} q={:#04X}", self.variation, self.qualifier.as_u8())?;
        match &self.range {
            Range::StartStop { start, stop } => write!(f, " [{}..={}]", start, stop),
            Range::All => f.write_str(" [all]"),
            Range::Count(n) => write!(f, " [count {}]", n),
            Range::Indexed(indices) => write!(f, " {:?}", indices),
        }
    }
}

/// Write `value` using 1 or 2 little-endian bytes.
pub(crate) fn put_sized(buf: &mut BytesMut, size: usize, value: u16) {
    match size {
        1 => buf.put_u8(value as u8),
        2 => buf.put_u16_le(value),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding_sizes() {
        let cases = [
            ((1, 2), Some(1)),
            ((12, 1), Some(11)),
            ((20, 1), Some(5)),
            ((20, 6), Some(2)),
            ((30, 1), Some(5)),
            ((30, 2), Some(3)),
            ((30, 3), Some(4)),
            ((30, 4), Some(2)),
            ((30, 5), Some(5)),
            ((30, 6), Some(9)),
            ((40, 3), Some(5)),
            ((41, 2), Some(3)),
            ((41, 4), Some(9)),
            ((60, 1), Some(0)),
        ];
        for ((group, variation), size) in cases {
            let encoding = Variation::new(group, variation).encoding().unwrap();
            assert_eq!(encoding.byte_size(), size, "g{}v{}", group, variation);
        }
        assert_eq!(
            Variation::new(1, 1).encoding(),
            Some(PointEncoding::PackedBit)
        );
        assert_eq!(Variation::new(1, 1).encoding().unwrap().byte_size(), None);
    }

    #[test]
    fn test_unknown_variations() {
        assert!(!Variation::new(30, 7).is_supported());
        assert!(!Variation::new(30, 0).is_supported());
        assert!(!Variation::new(99, 1).is_supported());
        assert!(Variation::CLASS_0.is_supported());
    }

    #[test]
    fn test_qualifier_sizes() {
        for (code, range, prefix) in [
            (0x00, 2, 0),
            (0x01, 4, 0),
            (0x06, 0, 0),
            (0x07, 1, 0),
            (0x08, 2, 0),
            (0x17, 1, 1),
            (0x28, 2, 2),
        ] {
            let q = Qualifier::from_u8(code).unwrap();
            assert_eq!(q.as_u8(), code);
            assert_eq!(q.range_size(), range);
            assert_eq!(q.prefix_size(), prefix);
        }
        assert_eq!(Qualifier::from_u8(0x5B), None);
    }

    #[test]
    fn test_single_index_header() {
        let mut buf = BytesMut::new();
        ObjectHeader::single(Variation::new(30, 2), 8).encode_to(&mut buf);
        assert_eq!(&buf[..], &[0x1E, 0x02, 0x17, 0x01, 0x08]);

        let mut buf = BytesMut::new();
        ObjectHeader::single(Variation::new(30, 1), 300).encode_to(&mut buf);
        assert_eq!(&buf[..], &[0x1E, 0x01, 0x28, 0x01, 0x00, 0x2C, 0x01]);
    }

    #[test]
    fn test_range_header() {
        let mut buf = BytesMut::new();
        ObjectHeader::range(Variation::new(1, 2), 0, 9).encode_to(&mut buf);
        assert_eq!(&buf[..], &[0x01, 0x02, 0x00, 0x00, 0x09]);

        let mut buf = BytesMut::new();
        ObjectHeader::range(Variation::new(20, 1), 10, 1000).encode_to(&mut buf);
        assert_eq!(&buf[..], &[0x14, 0x01, 0x01, 0x0A, 0x00, 0xE8, 0x03]);
    }

    #[test]
    fn test_class0_header() {
        let mut buf = BytesMut::new();
        ObjectHeader::all(Variation::CLASS_0).encode_to(&mut buf);
        assert_eq!(&buf[..], &[0x3C, 0x01, 0x06]);
    }

    #[test]
    fn test_range_count() {
        assert_eq!(Range::StartStop { start: 3, stop: 7 }.count(), Some(5));
        assert_eq!(Range::Count(4).count(), Some(4));
        assert_eq!(Range::Indexed(vec![1, 5]).count(), Some(2));
        assert_eq!(Range::All.count(), None);
    }

    #[test]
    fn test_header_display() {
        let header = ObjectHeader::range(Variation::new(30, 1), 0, 4);
        assert_eq!(header.to_string(), "g30v1 q=0x00 [0..=4]");
    }
}
