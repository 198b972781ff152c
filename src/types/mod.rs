//! DNP3 type definitions.
//!
//! This module contains the core types for each protocol layer:
//!
//! - `LinkFrame` / `LinkControl` - Link-layer frame and control byte
//! - `Fragment` / `AppControl` / `FunctionCode` / `Iin` - Application header
//! - `Variation` / `Qualifier` / `ObjectHeader` - Object addressing
//! - `Value` / `ObjectPoint` / `PointValue` - Decoded point data

mod apdu;
mod data;
mod link;
mod object;

pub use apdu::*;
pub use data::*;
pub use link::*;
pub use object::*;
