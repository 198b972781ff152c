//! Point value types for DNP3.
//!
//! This module defines the decoded representation of object data, both at
//! the wire level ([`ObjectPoint`], [`ObjectBlock`]) and at the mapped level
//! handed to callers ([`PointValue`]).

use crate::mapping::PointType;
use crate::types::ObjectHeader;

/// Point is online.
pub const FLAG_ONLINE: u8 = 0x01;
/// Point has not been updated since restart.
pub const FLAG_RESTART: u8 = 0x02;
/// Communication with the source was lost.
pub const FLAG_COMM_LOST: u8 = 0x04;
/// Value forced by a remote device.
pub const FLAG_REMOTE_FORCED: u8 = 0x08;
/// Value forced locally.
pub const FLAG_LOCAL_FORCED: u8 = 0x10;
/// Analog value exceeds its representable range.
pub const FLAG_OVER_RANGE: u8 = 0x20;
/// Binary state bit in flag-carrying binary variations.
pub const FLAG_STATE: u8 = 0x80;

/// Decoded point value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// Binary state
    Bool(bool),
    /// Integer analog or counter
    Int(i64),
    /// Floating-point analog
    Float(f64),
}

impl Value {
    /// Convert to f64.
    #[inline]
    pub fn as_f64(&self) -> f64 {
        match self {
            Self::Bool(v) => {
                if *v {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Int(v) => *v as f64,
            Self::Float(v) => *v,
        }
    }

    /// Convert to bool if binary.
    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Convert to i64 if integer.
    #[inline]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Check if this is a binary value.
    #[inline]
    pub const fn is_boolean(&self) -> bool {
        matches!(self, Self::Bool(_))
    }

    /// Check if this is a numeric value.
    #[inline]
    pub const fn is_numeric(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Float(_))
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{}", v),
            Self::Int(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
        }
    }
}

/// One point as carried in an object block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectPoint {
    /// Protocol index
    pub index: u16,
    /// Decoded value
    pub value: Value,
    /// Quality flags, for variations that carry them
    pub flags: Option<u8>,
    /// Control status, for command objects (g12, g41)
    pub status: Option<u8>,
}

impl ObjectPoint {
    /// Create a point without flags.
    #[inline]
    pub const fn new(index: u16, value: Value) -> Self {
        Self {
            index,
            value,
            flags: None,
            status: None,
        }
    }

    /// Create a point with quality flags.
    #[inline]
    pub const fn with_flags(index: u16, value: Value, flags: u8) -> Self {
        Self {
            index,
            value,
            flags: Some(flags),
            status: None,
        }
    }

    /// Online unless the flags say otherwise; flagless variations report
    /// only valid data.
    #[inline]
    pub fn online(&self) -> bool {
        self.flags.map_or(true, |flags| flags & FLAG_ONLINE != 0)
    }
}

/// A decoded object block.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectBlock {
    /// Header as received
    pub header: ObjectHeader,
    /// Points in wire order
    pub points: Vec<ObjectPoint>,
}

impl ObjectBlock {
    /// Find a point by protocol index.
    pub fn find(&self, index: u16) -> Option<&ObjectPoint> {
        self.points.iter().find(|p| p.index == index)
    }
}

/// A point value in caller terms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointValue {
    /// Point type
    pub point_type: PointType,
    /// Logical index
    pub index: u16,
    /// Value (engineering units when read through a tag)
    pub value: Value,
    /// Online flag
    pub online: bool,
    /// Raw quality flags, if the variation carries them
    pub flags: Option<u8>,
}

impl PointValue {
    /// Build from a wire point.
    pub fn from_object(point_type: PointType, index: u16, point: &ObjectPoint) -> Self {
        Self {
            point_type,
            index,
            value: point.value,
            online: point.online(),
            flags: point.flags,
        }
    }
}

impl std::fmt::Display for PointValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}] = {}", self.point_type, self.index, self.value)?;
        if !self.online {
            f.write_str(" (offline)")?;
        }
        Ok(())
    }
}
