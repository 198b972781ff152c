//! Tag-to-object mapping.
//!
//! Translates the gateway's logical point addressing (point type plus
//! logical index) into DNP3 object addressing (group, variation, protocol
//! index) and back. Both directions use the same explicit index offset, so
//! a value read back and a value written land on the same protocol index.

use std::fmt;
use std::str::FromStr;

use crate::error::MappingError;
use crate::types::{
    Value, Variation, GROUP_ANALOG_INPUT, GROUP_ANALOG_OUTPUT, GROUP_ANALOG_OUTPUT_STATUS,
    GROUP_BINARY_INPUT, GROUP_BINARY_OUTPUT, GROUP_COUNTER, GROUP_CROB,
};

/// Logical point type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointType {
    /// Analog input (g30)
    AnalogInput,
    /// Analog output (g40 status, g41 command)
    AnalogOutput,
    /// Binary input (g1)
    BinaryInput,
    /// Binary output (g10 status, g12 command)
    BinaryOutput,
    /// Counter (g20)
    Counter,
}

impl PointType {
    /// Short name used in tag configuration.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AnalogInput => "AI",
            Self::AnalogOutput => "AO",
            Self::BinaryInput => "BI",
            Self::BinaryOutput => "BO",
            Self::Counter => "CNT",
        }
    }

    /// Check if the point type accepts writes.
    #[inline]
    pub const fn is_writable(&self) -> bool {
        matches!(self, Self::AnalogOutput | Self::BinaryOutput)
    }

    /// Check if values of this type are binary.
    #[inline]
    pub const fn is_binary(&self) -> bool {
        matches!(self, Self::BinaryInput | Self::BinaryOutput)
    }
}

impl fmt::Display for PointType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PointType {
    type Err = MappingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "AI" | "ANALOG_INPUT" => Ok(Self::AnalogInput),
            "AO" | "ANALOG_OUTPUT" => Ok(Self::AnalogOutput),
            "BI" | "BINARY_INPUT" => Ok(Self::BinaryInput),
            "BO" | "BINARY_OUTPUT" => Ok(Self::BinaryOutput),
            "CNT" | "COUNTER" => Ok(Self::Counter),
            _ => Err(MappingError::UnsupportedPointType(s.to_string())),
        }
    }
}

/// Object addressing of one point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectAddress {
    /// Object group
    pub group: u8,
    /// Object variation
    pub variation: u8,
    /// Protocol index
    pub index: u16,
}

impl ObjectAddress {
    /// Group and variation as one value.
    #[inline]
    pub const fn object(&self) -> Variation {
        Variation::new(self.group, self.variation)
    }
}

impl fmt::Display for ObjectAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}v{} [{}]", self.group, self.variation, self.index)
    }
}

/// Point type to object mapping.
///
/// # Example
///
/// ```rust,ignore
/// let mapper = ObjectMapper::new()
///     .with_index_offset(-1)
///     .with_read_variation(PointType::AnalogInput, 5)?;
/// let address = mapper.read_address(PointType::AnalogInput, 1)?;
/// assert_eq!(address, ObjectAddress { group: 30, variation: 5, index: 0 });
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMapper {
    index_offset: i32,
    analog_input: u8,
    analog_output_status: u8,
    analog_output: u8,
    binary_input: u8,
    binary_output_status: u8,
    counter: u8,
}

impl Default for ObjectMapper {
    fn default() -> Self {
        Self {
            index_offset: 0,
            analog_input: 1,
            analog_output_status: 1,
            analog_output: 1,
            binary_input: 2,
            binary_output_status: 2,
            counter: 1,
        }
    }
}

impl ObjectMapper {
    /// Mapper with default variations and no index offset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the offset added to logical indices (may be negative).
    pub fn with_index_offset(mut self, index_offset: i32) -> Self {
        self.index_offset = index_offset;
        self
    }

    /// Set the variation requested when reading a point type.
    pub fn with_read_variation(
        mut self,
        point_type: PointType,
        variation: u8,
    ) -> Result<Self, MappingError> {
        let group = read_group(point_type);
        check_variation(group, variation)?;
        match point_type {
            PointType::AnalogInput => self.analog_input = variation,
            PointType::AnalogOutput => self.analog_output_status = variation,
            PointType::BinaryInput => self.binary_input = variation,
            PointType::BinaryOutput => self.binary_output_status = variation,
            PointType::Counter => self.counter = variation,
        }
        Ok(self)
    }

    /// Set the analog output block variation used for writes.
    pub fn with_analog_output_variation(mut self, variation: u8) -> Result<Self, MappingError> {
        check_variation(GROUP_ANALOG_OUTPUT, variation)?;
        self.analog_output = variation;
        Ok(self)
    }

    /// Configured index offset.
    pub fn index_offset(&self) -> i32 {
        self.index_offset
    }

    /// Object address for reading a point.
    pub fn read_address(
        &self,
        point_type: PointType,
        logical_index: u16,
    ) -> Result<ObjectAddress, MappingError> {
        let variation = match point_type {
            PointType::AnalogInput => self.analog_input,
            PointType::AnalogOutput => self.analog_output_status,
            PointType::BinaryInput => self.binary_input,
            PointType::BinaryOutput => self.binary_output_status,
            PointType::Counter => self.counter,
        };
        Ok(ObjectAddress {
            group: read_group(point_type),
            variation,
            index: self.protocol_index(logical_index)?,
        })
    }

    /// Object address for writing or operating a point.
    pub fn write_address(
        &self,
        point_type: PointType,
        logical_index: u16,
    ) -> Result<ObjectAddress, MappingError> {
        let (group, variation) = match point_type {
            PointType::AnalogOutput => (GROUP_ANALOG_OUTPUT, self.analog_output),
            PointType::BinaryOutput => (GROUP_CROB, 1),
            _ => return Err(MappingError::NotWritable(point_type)),
        };
        Ok(ObjectAddress {
            group,
            variation,
            index: self.protocol_index(logical_index)?,
        })
    }

    /// Logical index of a protocol index (inverse of the offset).
    pub fn logical_index(&self, protocol_index: u16) -> Result<u16, MappingError> {
        let logical = protocol_index as i64 - self.index_offset as i64;
        u16::try_from(logical).map_err(|_| MappingError::IndexOutOfRange {
            index: logical,
            index_offset: self.index_offset,
        })
    }

    /// Point type reported by an object group.
    pub fn point_type_for_group(group: u8) -> Option<PointType> {
        match group {
            GROUP_ANALOG_INPUT => Some(PointType::AnalogInput),
            GROUP_ANALOG_OUTPUT_STATUS | GROUP_ANALOG_OUTPUT => Some(PointType::AnalogOutput),
            GROUP_BINARY_INPUT => Some(PointType::BinaryInput),
            GROUP_BINARY_OUTPUT | GROUP_CROB => Some(PointType::BinaryOutput),
            GROUP_COUNTER => Some(PointType::Counter),
            _ => None,
        }
    }

    /// Check a command value against the point type.
    ///
    /// Binary outputs take booleans (or 0/1); analog outputs take numbers.
    pub fn command_value(
        &self,
        point_type: PointType,
        value: Value,
    ) -> Result<Value, MappingError> {
        if !point_type.is_writable() {
            return Err(MappingError::NotWritable(point_type));
        }
        let mismatch = || MappingError::TypeMismatch {
            point_type,
            value: value.to_string(),
        };
        match (point_type, value) {
            (PointType::BinaryOutput, Value::Bool(_)) => Ok(value),
            (PointType::BinaryOutput, Value::Int(v @ (0 | 1))) => Ok(Value::Bool(v == 1)),
            (PointType::BinaryOutput, _) => Err(mismatch()),
            (_, Value::Bool(_)) => Err(mismatch()),
            (_, Value::Float(v)) if !v.is_finite() => Err(mismatch()),
            _ => Ok(value),
        }
    }

    fn protocol_index(&self, logical_index: u16) -> Result<u16, MappingError> {
        let index = logical_index as i64 + self.index_offset as i64;
        u16::try_from(index).map_err(|_| MappingError::IndexOutOfRange {
            index: logical_index as i64,
            index_offset: self.index_offset,
        })
    }
}

const fn read_group(point_type: PointType) -> u8 {
    match point_type {
        PointType::AnalogInput => GROUP_ANALOG_INPUT,
        PointType::AnalogOutput => GROUP_ANALOG_OUTPUT_STATUS,
        PointType::BinaryInput => GROUP_BINARY_INPUT,
        PointType::BinaryOutput => GROUP_BINARY_OUTPUT,
        PointType::Counter => GROUP_COUNTER,
    }
}

fn check_variation(group: u8, variation: u8) -> Result<(), MappingError> {
    if Variation::new(group, variation).is_supported() {
        Ok(())
    } else {
        Err(MappingError::UnsupportedVariation { group, variation })
    }
}

/// A configured tag: logical address plus unit conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct TagMapping {
    /// Tag address as configured (e.g. "feeder1.voltage")
    pub address: String,
    /// Point type
    pub point_type: PointType,
    /// Logical index
    pub index: u16,
    /// Engineering = raw * scale + offset
    pub scale: f64,
    /// Engineering offset
    pub offset: f64,
}

impl TagMapping {
    /// Create a tag with unit scale and no offset.
    pub fn new(address: impl Into<String>, point_type: PointType, index: u16) -> Self {
        Self {
            address: address.into(),
            point_type,
            index,
            scale: 1.0,
            offset: 0.0,
        }
    }

    /// Set scale and offset.
    pub fn with_scaling(mut self, scale: f64, offset: f64) -> Self {
        self.scale = scale;
        self.offset = offset;
        self
    }

    /// Convert a raw value to engineering units.
    ///
    /// Binary values pass through unchanged.
    pub fn to_engineering(&self, raw: Value) -> Value {
        match raw {
            Value::Bool(_) => raw,
            _ if self.scale == 1.0 && self.offset == 0.0 => raw,
            _ => Value::Float(raw.as_f64() * self.scale + self.offset),
        }
    }

    /// Convert an engineering value back to raw units.
    pub fn to_raw(&self, engineering: Value) -> Result<Value, MappingError> {
        if self.scale == 0.0 || !self.scale.is_finite() {
            return Err(MappingError::InvalidScale(self.scale));
        }
        Ok(match engineering {
            Value::Bool(_) => engineering,
            _ if self.scale == 1.0 && self.offset == 0.0 => engineering,
            _ => Value::Float((engineering.as_f64() - self.offset) / self.scale),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_type_parse() {
        assert_eq!("AI".parse::<PointType>(), Ok(PointType::AnalogInput));
        assert_eq!("bo".parse::<PointType>(), Ok(PointType::BinaryOutput));
        assert_eq!("counter".parse::<PointType>(), Ok(PointType::Counter));
        assert_eq!(
            "XYZ".parse::<PointType>(),
            Err(MappingError::UnsupportedPointType("XYZ".to_string()))
        );
        assert_eq!(PointType::AnalogOutput.to_string(), "AO");
    }

    #[test]
    fn test_default_addresses() {
        let mapper = ObjectMapper::new();
        let cases = [
            (PointType::AnalogInput, (30, 1)),
            (PointType::AnalogOutput, (40, 1)),
            (PointType::BinaryInput, (1, 2)),
            (PointType::BinaryOutput, (10, 2)),
            (PointType::Counter, (20, 1)),
        ];
        for (point_type, (group, variation)) in cases {
            let address = mapper.read_address(point_type, 8).unwrap();
            assert_eq!(
                address,
                ObjectAddress {
                    group,
                    variation,
                    index: 8
                }
            );
        }

        assert_eq!(
            mapper.write_address(PointType::AnalogOutput, 2).unwrap().object(),
            Variation::new(41, 1)
        );
        assert_eq!(
            mapper.write_address(PointType::BinaryOutput, 2).unwrap().object(),
            Variation::new(12, 1)
        );
    }

    #[test]
    fn test_not_writable() {
        let mapper = ObjectMapper::new();
        for point_type in [PointType::Counter, PointType::AnalogInput, PointType::BinaryInput] {
            assert_eq!(
                mapper.write_address(point_type, 0),
                Err(MappingError::NotWritable(point_type))
            );
        }
    }

    #[test]
    fn test_index_offset_bijective() {
        let mapper = ObjectMapper::new().with_index_offset(-1);
        let read = mapper.read_address(PointType::AnalogOutput, 5).unwrap();
        let write = mapper.write_address(PointType::AnalogOutput, 5).unwrap();
        assert_eq!(read.index, 4);
        assert_eq!(write.index, read.index);
        assert_eq!(mapper.logical_index(read.index), Ok(5));

        assert_eq!(
            mapper.read_address(PointType::AnalogInput, 0),
            Err(MappingError::IndexOutOfRange {
                index: 0,
                index_offset: -1
            })
        );

        let mapper = ObjectMapper::new().with_index_offset(10);
        assert_eq!(
            mapper.read_address(PointType::Counter, 65530),
            Err(MappingError::IndexOutOfRange {
                index: 65530,
                index_offset: 10
            })
        );
        assert!(mapper.logical_index(3).is_err());
    }

    #[test]
    fn test_configured_variations() {
        let mapper = ObjectMapper::new()
            .with_read_variation(PointType::AnalogInput, 5)
            .unwrap()
            .with_analog_output_variation(3)
            .unwrap();
        assert_eq!(
            mapper.read_address(PointType::AnalogInput, 0).unwrap().variation,
            5
        );
        assert_eq!(
            mapper.write_address(PointType::AnalogOutput, 0).unwrap().variation,
            3
        );

        assert_eq!(
            ObjectMapper::new().with_read_variation(PointType::Counter, 3),
            Err(MappingError::UnsupportedVariation {
                group: 20,
                variation: 3
            })
        );
    }

    #[test]
    fn test_point_type_for_group() {
        assert_eq!(
            ObjectMapper::point_type_for_group(30),
            Some(PointType::AnalogInput)
        );
        assert_eq!(
            ObjectMapper::point_type_for_group(12),
            Some(PointType::BinaryOutput)
        );
        assert_eq!(ObjectMapper::point_type_for_group(60), None);
    }

    #[test]
    fn test_command_value() {
        let mapper = ObjectMapper::new();
        assert_eq!(
            mapper.command_value(PointType::BinaryOutput, Value::Int(1)),
            Ok(Value::Bool(true))
        );
        assert!(matches!(
            mapper.command_value(PointType::BinaryOutput, Value::Float(0.5)),
            Err(MappingError::TypeMismatch { .. })
        ));
        assert!(matches!(
            mapper.command_value(PointType::AnalogOutput, Value::Bool(true)),
            Err(MappingError::TypeMismatch { .. })
        ));
        assert_eq!(
            mapper.command_value(PointType::AnalogOutput, Value::Float(1.5)),
            Ok(Value::Float(1.5))
        );
        assert_eq!(
            mapper.command_value(PointType::Counter, Value::Int(1)),
            Err(MappingError::NotWritable(PointType::Counter))
        );
    }

    #[test]
    fn test_tag_scaling() {
        let tag =
            TagMapping::new("feeder1.voltage", PointType::AnalogInput, 0).with_scaling(0.5, -5.0);
        assert_eq!(tag.to_engineering(Value::Int(1000)), Value::Float(495.0));
        assert_eq!(tag.to_raw(Value::Float(495.0)), Ok(Value::Float(1000.0)));
        assert_eq!(tag.to_engineering(Value::Bool(true)), Value::Bool(true));

        let plain = TagMapping::new("pump.run", PointType::AnalogInput, 1);
        assert_eq!(plain.to_engineering(Value::Int(7)), Value::Int(7));

        let broken = plain.with_scaling(0.0, 1.0);
        assert_eq!(
            broken.to_raw(Value::Int(1)),
            Err(MappingError::InvalidScale(0.0))
        );
    }
}
