//! # voltage_dnp3
//!
//! DNP3 (IEEE 1815) master protocol engine for Rust.
//!
//! This crate implements the master side of DNP3 over TCP: link framing
//! with CRC-protected blocks, transport segmentation, application fragments
//! and the object codec for the static point types used by SCADA gateways.
//!
//! ## Features
//!
//! - **Layered codec**: link frames, transport segments and application
//!   fragments are separate, individually testable stages
//! - **Session engine**: sequence tracking, retries, stale-response
//!   filtering and application confirms
//! - **Point mapping**: AI/AO/BI/BO/CNT points mapped to object
//!   group/variation/index, with index offsets and engineering scaling
//! - **Outstation**: a minimal responder on the same codec for tests
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use voltage_dnp3::{DeviceSession, PointType, SessionConfig, Value};
//!
//! #[tokio::main]
//! async fn main() -> voltage_dnp3::Result<()> {
//!     let config = SessionConfig::new("192.168.1.100:20000")
//!         .local_addr(1)
//!         .remote_addr(10);
//!     let mut session = DeviceSession::connect(config).await?;
//!
//!     let point = session.read_point(PointType::AnalogInput, 8).await?;
//!     println!("{point}");
//!
//!     session.write_point(PointType::BinaryOutput, 2, Value::Bool(true)).await?;
//!     session.close().await
//! }
//! ```
//!
//! ## Protocol Overview
//!
//! ```text
//! Link frame:
//! +------+------+--------+---------+---------+---------+--------+
//! | 0x05 | 0x64 | Length | Control | Dest LE | Src LE  | CRC LE |
//! +------+------+--------+---------+---------+---------+--------+
//! followed by user data in blocks of up to 16 bytes, each with a CRC.
//!
//! User data = transport header (FIR/FIN/seq) + application segment
//! Application fragment = AC + FC [+ IIN] + object headers and data
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod codec;
pub mod crc;
pub mod error;
pub mod mapping;
pub mod outstation;
pub mod parser;
pub mod session;
pub mod transport;
pub mod types;
pub mod writer;

// Re-export main types
pub use codec::LinkCodec;
pub use error::{
    ApplicationDecodeError, FrameError, MappingError, ProtocolError, Result, SessionError,
    TransportError,
};
pub use mapping::{ObjectAddress, ObjectMapper, PointType, TagMapping};
pub use outstation::{Database, Outstation, OutstationConfig, OutstationStats};
pub use parser::{parse_objects, parse_response, DecodeOptions, FloatByteOrder};
pub use session::{
    close_session, open_session, read_point, write_point, DeviceSession, ExchangeState,
    OperateMode, Response, SessionConfig, SharedSession,
};
pub use transport::{segment, Reassembler};
pub use types::*;
pub use writer::ObjectWriter;
