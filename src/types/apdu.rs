//! DNP3 application fragment (APDU) header.
//!
//! ```text
//! Request:  | AC | FC | objects...
//! Response: | AC | FC | IIN1 | IIN2 | objects...
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ApplicationDecodeError;

/// Application control byte.
///
/// ```text
/// bit 7   6   5   4   3..0
///     FIR FIN CON UNS sequence (mod 16)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppControl {
    /// First fragment of a message
    pub fir: bool,
    /// Final fragment of a message
    pub fin: bool,
    /// Receiver must confirm
    pub con: bool,
    /// Unsolicited response
    pub uns: bool,
    /// Sequence number (0-15)
    pub seq: u8,
}

impl AppControl {
    /// Single-fragment control (FIR=FIN=1).
    #[inline]
    pub const fn single(seq: u8, con: bool, uns: bool) -> Self {
        Self {
            fir: true,
            fin: true,
            con,
            uns,
            seq: seq & 0x0F,
        }
    }

    /// Parse from byte.
    #[inline]
    pub const fn from_u8(value: u8) -> Self {
        Self {
            fir: value & 0x80 != 0,
            fin: value & 0x40 != 0,
            con: value & 0x20 != 0,
            uns: value & 0x10 != 0,
            seq: value & 0x0F,
        }
    }

    /// Encode to byte.
    #[inline]
    pub const fn as_u8(&self) -> u8 {
        let mut value = self.seq & 0x0F;
        if self.fir {
            value |= 0x80;
        }
        if self.fin {
            value |= 0x40;
        }
        if self.con {
            value |= 0x20;
        }
        if self.uns {
            value |= 0x10;
        }
        value
    }
}

/// Next application sequence number.
#[inline]
pub const fn next_app_seq(seq: u8) -> u8 {
    seq.wrapping_add(1) & 0x0F
}

/// Application function code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FunctionCode {
    /// Confirm a response fragment
    Confirm = 0x00,
    /// Read objects
    Read = 0x01,
    /// Write objects
    Write = 0x02,
    /// Select controls for a later operate
    Select = 0x03,
    /// Operate previously selected controls
    Operate = 0x04,
    /// Select and operate in one step
    DirectOperate = 0x05,
    /// Direct operate without a response
    DirectOperateNoResponse = 0x06,
    /// Solicited response
    Response = 0x81,
    /// Unsolicited response
    UnsolicitedResponse = 0x82,
}

impl FunctionCode {
    /// Parse from byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        let code = match value {
            0x00 => Self::Confirm,
            0x01 => Self::Read,
            0x02 => Self::Write,
            0x03 => Self::Select,
            0x04 => Self::Operate,
            0x05 => Self::DirectOperate,
            0x06 => Self::DirectOperateNoResponse,
            0x81 => Self::Response,
            0x82 => Self::UnsolicitedResponse,
            _ => return None,
        };
        Some(code)
    }

    /// Get the raw value.
    #[inline]
    pub const fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Check if fragments with this function carry IIN.
    #[inline]
    pub const fn is_response(&self) -> bool {
        matches!(self, Self::Response | Self::UnsolicitedResponse)
    }

    /// Check if this is a read request.
    #[inline]
    pub const fn is_read(&self) -> bool {
        matches!(self, Self::Read)
    }
}

impl std::fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Confirm => "CONFIRM",
            Self::Read => "READ",
            Self::Write => "WRITE",
            Self::Select => "SELECT",
            Self::Operate => "OPERATE",
            Self::DirectOperate => "DIRECT_OPERATE",
            Self::DirectOperateNoResponse => "DIRECT_OPERATE_NR",
            Self::Response => "RESPONSE",
            Self::UnsolicitedResponse => "UNSOLICITED_RESPONSE",
        };
        f.write_str(name)
    }
}

/// Internal indications returned with every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Iin {
    /// First IIN octet
    pub iin1: u8,
    /// Second IIN octet
    pub iin2: u8,
}

impl Iin {
    pub const BROADCAST: u8 = 0x01;
    pub const CLASS_1_EVENTS: u8 = 0x02;
    pub const CLASS_2_EVENTS: u8 = 0x04;
    pub const CLASS_3_EVENTS: u8 = 0x08;
    pub const NEED_TIME: u8 = 0x10;
    pub const LOCAL_CONTROL: u8 = 0x20;
    pub const DEVICE_TROUBLE: u8 = 0x40;
    pub const DEVICE_RESTART: u8 = 0x80;

    pub const NO_FUNC_CODE_SUPPORT: u8 = 0x01;
    pub const OBJECT_UNKNOWN: u8 = 0x02;
    pub const PARAMETER_ERROR: u8 = 0x04;
    pub const EVENT_BUFFER_OVERFLOW: u8 = 0x08;
    pub const ALREADY_EXECUTING: u8 = 0x10;
    pub const CONFIG_CORRUPT: u8 = 0x20;

    /// Create from both octets.
    #[inline]
    pub const fn new(iin1: u8, iin2: u8) -> Self {
        Self { iin1, iin2 }
    }

    #[inline]
    pub const fn device_restart(&self) -> bool {
        self.iin1 & Self::DEVICE_RESTART != 0
    }

    #[inline]
    pub const fn device_trouble(&self) -> bool {
        self.iin1 & Self::DEVICE_TROUBLE != 0
    }

    #[inline]
    pub const fn need_time(&self) -> bool {
        self.iin1 & Self::NEED_TIME != 0
    }

    #[inline]
    pub const fn has_events(&self) -> bool {
        self.iin1 & (Self::CLASS_1_EVENTS | Self::CLASS_2_EVENTS | Self::CLASS_3_EVENTS) != 0
    }

    #[inline]
    pub const fn no_func_code_support(&self) -> bool {
        self.iin2 & Self::NO_FUNC_CODE_SUPPORT != 0
    }

    #[inline]
    pub const fn object_unknown(&self) -> bool {
        self.iin2 & Self::OBJECT_UNKNOWN != 0
    }

    #[inline]
    pub const fn parameter_error(&self) -> bool {
        self.iin2 & Self::PARAMETER_ERROR != 0
    }

    /// Check if the outstation refused (part of) the request.
    #[inline]
    pub const fn is_request_error(&self) -> bool {
        self.iin2 & (Self::NO_FUNC_CODE_SUPPORT | Self::OBJECT_UNKNOWN | Self::PARAMETER_ERROR)
            != 0
    }

    /// Accumulate indications from a later fragment.
    #[inline]
    pub fn merge(&mut self, other: Iin) {
        self.iin1 |= other.iin1;
        self.iin2 |= other.iin2;
    }
}

impl std::fmt::Display for Iin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        const IIN1: [(u8, &str); 8] = [
            (Iin::BROADCAST, "BROADCAST"),
            (Iin::CLASS_1_EVENTS, "CLASS_1_EVENTS"),
            (Iin::CLASS_2_EVENTS, "CLASS_2_EVENTS"),
            (Iin::CLASS_3_EVENTS, "CLASS_3_EVENTS"),
            (Iin::NEED_TIME, "NEED_TIME"),
            (Iin::LOCAL_CONTROL, "LOCAL_CONTROL"),
            (Iin::DEVICE_TROUBLE, "DEVICE_TROUBLE"),
            (Iin::DEVICE_RESTART, "DEVICE_RESTART"),
        ];
        const IIN2: [(u8, &str); 6] = [
            (Iin::NO_FUNC_CODE_SUPPORT, "NO_FUNC_CODE_SUPPORT"),
            (Iin::OBJECT_UNKNOWN, "OBJECT_UNKNOWN"),
            (Iin::PARAMETER_ERROR, "PARAMETER_ERROR"),
            (Iin::EVENT_BUFFER_OVERFLOW, "EVENT_BUFFER_OVERFLOW"),
            (Iin::ALREADY_EXECUTING, "ALREADY_EXECUTING"),
            (Iin::CONFIG_CORRUPT, "CONFIG_CORRUPT"),
        ];

        let names: Vec<&str> = IIN1
            .iter()
            .filter(|(bit, _)| self.iin1 & bit != 0)
            .chain(IIN2.iter().filter(|(bit, _)| self.iin2 & bit != 0))
            .map(|(_, name)| *name)
            .collect();

        if names.is_empty() {
            f.write_str("OK")
        } else {
            f.write_str(&names.join("|"))
        }
    }
}

/// An application fragment with undecoded object data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Application control
    pub control: AppControl,
    /// Function code
    pub function: FunctionCode,
    /// Internal indications (responses only)
    pub iin: Option<Iin>,
    /// Object headers and point data
    pub objects: Bytes,
}

impl Fragment {
    /// Build a single-fragment request.
    pub fn request(function: FunctionCode, seq: u8, con: bool, objects: Bytes) -> Self {
        Self {
            control: AppControl::single(seq, con, false),
            function,
            iin: None,
            objects,
        }
    }

    /// Build a solicited response fragment.
    pub fn response(control: AppControl, iin: Iin, objects: Bytes) -> Self {
        Self {
            control,
            function: FunctionCode::Response,
            iin: Some(iin),
            objects,
        }
    }

    /// Build a CONFIRM for a received response.
    pub fn confirm(seq: u8, unsolicited: bool) -> Self {
        Self {
            control: AppControl::single(seq, false, unsolicited),
            function: FunctionCode::Confirm,
            iin: None,
            objects: Bytes::new(),
        }
    }

    /// Header size, which is also the offset of the object data.
    #[inline]
    pub fn header_len(&self) -> usize {
        if self.iin.is_some() {
            4
        } else {
            2
        }
    }

    /// Encoded size.
    #[inline]
    pub fn encoded_len(&self) -> usize {
        self.header_len() + self.objects.len()
    }

    /// Encode the fragment.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u8(self.control.as_u8());
        buf.put_u8(self.function.as_u8());
        if let Some(iin) = self.iin {
            buf.put_u8(iin.iin1);
            buf.put_u8(iin.iin2);
        }
        buf.extend_from_slice(&self.objects);
        buf.freeze()
    }

    /// Parse the fragment header; object data is kept undecoded.
    pub fn parse(data: &[u8]) -> Result<Self, ApplicationDecodeError> {
        if data.len() < 2 {
            return Err(ApplicationDecodeError::Truncated {
                offset: 0,
                needed: 2,
                available: data.len(),
            });
        }

        let control = AppControl::from_u8(data[0]);
        let function = FunctionCode::from_u8(data[1]).ok_or(
            ApplicationDecodeError::UnknownFunction {
                code: data[1],
                offset: 1,
            },
        )?;

        let (iin, header_len) = if function.is_response() {
            if data.len() < 4 {
                return Err(ApplicationDecodeError::Truncated {
                    offset: 2,
                    needed: 2,
                    available: data.len() - 2,
                });
            }
            (Some(Iin::new(data[2], data[3])), 4)
        } else {
            (None, 2)
        };

        Ok(Self {
            control,
            function,
            iin,
            objects: Bytes::copy_from_slice(&data[header_len..]),
        })
    }
}

impl std::fmt::Display for Fragment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} seq={}", self.function, self.control.seq)?;
        if self.control.con {
            f.write_str(" CON")?;
        }
        if self.control.uns {
            f.write_str(" UNS")?;
        }
        if let Some(iin) = self.iin {
            write!(f, " IIN={}", iin)?;
        }
        write!(f, " ({} object bytes)", self.objects.len())
    }
}
