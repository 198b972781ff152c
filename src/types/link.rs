//! DNP3 link-layer frame.
//!
//! ```text
//! +------+------+--------+---------+-----------+-----------+-----------+
//! | 0x05 | 0x64 | Length | Control | Dest (LE) | Src (LE)  | CRC (LE)  |
//! +------+------+--------+---------+-----------+-----------+-----------+
//! | data block (<= 16 bytes) | CRC | data block | CRC | ...            |
//! +-----------------------------------------------------------------------+
//! ```
//!
//! Length counts control, destination, source and user data (5 + n); CRC
//! bytes are excluded.

use bytes::{BufMut, Bytes, BytesMut};

use crate::crc::crc16;
use crate::error::FrameError;

/// Start marker of every link frame.
pub const START_BYTES: [u8; 2] = [0x05, 0x64];

/// Header size including its CRC.
pub const HEADER_SIZE: usize = 10;

/// Minimum value of the length field (no user data).
pub const MIN_LENGTH: u8 = 5;

/// Maximum user data carried by one frame.
pub const MAX_USER_DATA: usize = 250;

/// Data block size covered by one CRC.
pub const BLOCK_SIZE: usize = 16;

/// Largest possible encoded frame.
pub const MAX_FRAME_SIZE: usize = HEADER_SIZE + MAX_USER_DATA + 2 * 16;

/// Link-layer function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkFunction {
    /// Primary: reset link states
    ResetLinkStates,
    /// Primary: test link states
    TestLinkStates,
    /// Primary: user data requiring a link ACK
    ConfirmedUserData,
    /// Primary: user data without link ACK
    UnconfirmedUserData,
    /// Primary: request link status
    RequestLinkStatus,
    /// Secondary: positive acknowledgment
    Ack,
    /// Secondary: negative acknowledgment
    Nack,
    /// Secondary: link status
    LinkStatus,
    /// Secondary: function not supported
    NotSupported,
}

impl LinkFunction {
    /// Function code in the low nibble of the control byte.
    #[inline]
    pub const fn code(&self) -> u8 {
        match self {
            Self::ResetLinkStates => 0,
            Self::TestLinkStates => 2,
            Self::ConfirmedUserData => 3,
            Self::UnconfirmedUserData => 4,
            Self::RequestLinkStatus => 9,
            Self::Ack => 0,
            Self::Nack => 1,
            Self::LinkStatus => 11,
            Self::NotSupported => 15,
        }
    }

    /// Whether the function is sent by the primary station (PRM=1).
    #[inline]
    pub const fn is_primary(&self) -> bool {
        matches!(
            self,
            Self::ResetLinkStates
                | Self::TestLinkStates
                | Self::ConfirmedUserData
                | Self::UnconfirmedUserData
                | Self::RequestLinkStatus
        )
    }
}

impl std::fmt::Display for LinkFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ResetLinkStates => "RESET_LINK_STATES",
            Self::TestLinkStates => "TEST_LINK_STATES",
            Self::ConfirmedUserData => "CONFIRMED_USER_DATA",
            Self::UnconfirmedUserData => "UNCONFIRMED_USER_DATA",
            Self::RequestLinkStatus => "REQUEST_LINK_STATUS",
            Self::Ack => "ACK",
            Self::Nack => "NACK",
            Self::LinkStatus => "LINK_STATUS",
            Self::NotSupported => "NOT_SUPPORTED",
        };
        f.write_str(name)
    }
}

/// Link control byte.
///
/// ```text
/// bit 7   6   5       4        3..0
///     DIR PRM FCB     FCV/DFC  function
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkControl(u8);

impl LinkControl {
    /// Direction: set on frames sent by the master
    pub const DIR: u8 = 0x80;
    /// Primary message
    pub const PRM: u8 = 0x40;
    /// Frame count bit
    pub const FCB: u8 = 0x20;
    /// Frame count valid (primary) / data flow control (secondary)
    pub const FCV: u8 = 0x10;

    /// Wrap a raw control byte.
    #[inline]
    pub const fn from_u8(value: u8) -> Self {
        Self(value)
    }

    /// Raw control byte.
    #[inline]
    pub const fn as_u8(&self) -> u8 {
        self.0
    }

    /// Build a control byte for `function`, with PRM derived from it.
    #[inline]
    pub const fn new(from_master: bool, function: LinkFunction) -> Self {
        let mut value = function.code();
        if from_master {
            value |= Self::DIR;
        }
        if function.is_primary() {
            value |= Self::PRM;
        }
        Self(value)
    }

    #[inline]
    pub const fn dir(&self) -> bool {
        self.0 & Self::DIR != 0
    }

    #[inline]
    pub const fn prm(&self) -> bool {
        self.0 & Self::PRM != 0
    }

    #[inline]
    pub const fn fcb(&self) -> bool {
        self.0 & Self::FCB != 0
    }

    #[inline]
    pub const fn fcv(&self) -> bool {
        self.0 & Self::FCV != 0
    }

    /// Raw 4-bit function code.
    #[inline]
    pub const fn function_code(&self) -> u8 {
        self.0 & 0x0F
    }

    /// Decode the function, interpreting the code according to PRM.
    pub fn function(&self) -> Option<LinkFunction> {
        let function = if self.prm() {
            match self.function_code() {
                0 => LinkFunction::ResetLinkStates,
                2 => LinkFunction::TestLinkStates,
                3 => LinkFunction::ConfirmedUserData,
                4 => LinkFunction::UnconfirmedUserData,
                9 => LinkFunction::RequestLinkStatus,
                _ => return None,
            }
        } else {
            match self.function_code() {
                0 => LinkFunction::Ack,
                1 => LinkFunction::Nack,
                11 => LinkFunction::LinkStatus,
                15 => LinkFunction::NotSupported,
                _ => return None,
            }
        };
        Some(function)
    }
}

/// Encoded size of a frame whose length field is `length`.
#[inline]
pub const fn frame_len(length: u8) -> usize {
    let user = length.saturating_sub(MIN_LENGTH) as usize;
    HEADER_SIZE + user + 2 * user.div_ceil(BLOCK_SIZE)
}

/// A decoded link-layer frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkFrame {
    /// Control byte
    pub control: LinkControl,
    /// Destination address
    pub destination: u16,
    /// Source address
    pub source: u16,
    /// User data with block CRCs removed
    pub payload: Bytes,
}

impl LinkFrame {
    /// Create a frame.
    pub fn new(control: LinkControl, destination: u16, source: u16, payload: Bytes) -> Self {
        Self {
            control,
            destination,
            source,
            payload,
        }
    }

    /// UNCONFIRMED_USER_DATA frame carrying one transport segment.
    pub fn unconfirmed_user_data(
        from_master: bool,
        destination: u16,
        source: u16,
        payload: Bytes,
    ) -> Self {
        Self::new(
            LinkControl::new(from_master, LinkFunction::UnconfirmedUserData),
            destination,
            source,
            payload,
        )
    }

    /// RESET_LINK_STATES request.
    pub fn reset_link_states(from_master: bool, destination: u16, source: u16) -> Self {
        Self::new(
            LinkControl::new(from_master, LinkFunction::ResetLinkStates),
            destination,
            source,
            Bytes::new(),
        )
    }

    /// Secondary ACK.
    pub fn ack(from_master: bool, destination: u16, source: u16) -> Self {
        Self::new(
            LinkControl::new(from_master, LinkFunction::Ack),
            destination,
            source,
            Bytes::new(),
        )
    }

    /// Check if the frame carries user data (a transport segment).
    #[inline]
    pub fn has_user_data(&self) -> bool {
        !self.payload.is_empty()
    }

    /// Size of the frame once encoded.
    pub fn encoded_len(&self) -> usize {
        let user = self.payload.len();
        HEADER_SIZE + user + 2 * user.div_ceil(BLOCK_SIZE)
    }

    /// Encode the frame into `dst`.
    pub fn encode_to(&self, dst: &mut BytesMut) -> Result<(), FrameError> {
        if self.payload.len() > MAX_USER_DATA {
            return Err(FrameError::PayloadTooLarge(self.payload.len()));
        }

        dst.reserve(self.encoded_len());

        let mut header = [0u8; 8];
        header[..2].copy_from_slice(&START_BYTES);
        header[2] = MIN_LENGTH + self.payload.len() as u8;
        header[3] = self.control.as_u8();
        header[4..6].copy_from_slice(&self.destination.to_le_bytes());
        header[6..8].copy_from_slice(&self.source.to_le_bytes());
        dst.extend_from_slice(&header);
        dst.put_u16_le(crc16(&header));

        for block in self.payload.chunks(BLOCK_SIZE) {
            dst.extend_from_slice(block);
            dst.put_u16_le(crc16(block));
        }

        Ok(())
    }

    /// Encode the frame into a new buffer.
    pub fn encode(&self) -> Result<Bytes, FrameError> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_to(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Parse one frame from the start of `buf`.
    ///
    /// Returns the frame and the number of bytes it occupied. The length
    /// field is never trusted beyond the bytes actually present.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), FrameError> {
        if buf.len() < 2 {
            return Err(FrameError::Truncated {
                needed: HEADER_SIZE,
                available: buf.len(),
            });
        }
        if buf[..2] != START_BYTES {
            return Err(FrameError::BadStart(buf[0], buf[1]));
        }
        if buf.len() < HEADER_SIZE {
            return Err(FrameError::Truncated {
                needed: HEADER_SIZE,
                available: buf.len(),
            });
        }

        let expected = crc16(&buf[..8]);
        let actual = u16::from_le_bytes([buf[8], buf[9]]);
        if expected != actual {
            return Err(FrameError::BadHeaderCrc { expected, actual });
        }

        let length = buf[2];
        if length < MIN_LENGTH {
            return Err(FrameError::BadLength(length));
        }

        let total = frame_len(length);
        if buf.len() < total {
            return Err(FrameError::Truncated {
                needed: total,
                available: buf.len(),
            });
        }

        let user_len = (length - MIN_LENGTH) as usize;
        let mut payload = BytesMut::with_capacity(user_len);
        let mut offset = HEADER_SIZE;
        let mut remaining = user_len;
        let mut block = 0;

        while remaining > 0 {
            let n = remaining.min(BLOCK_SIZE);
            let data = &buf[offset..offset + n];
            let expected = crc16(data);
            let actual = u16::from_le_bytes([buf[offset + n], buf[offset + n + 1]]);
            if expected != actual {
                return Err(FrameError::BadBlockCrc {
                    block,
                    expected,
                    actual,
                });
            }
            payload.extend_from_slice(data);
            offset += n + 2;
            remaining -= n;
            block += 1;
        }

        let frame = Self {
            control: LinkControl::from_u8(buf[3]),
            destination: u16::from_le_bytes([buf[4], buf[5]]),
            source: u16::from_le_bytes([buf[6], buf[7]]),
            payload: payload.freeze(),
        };
        Ok((frame, total))
    }
}

impl std::fmt::Display for LinkFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.control.function() {
            Some(function) => write!(f, "{}", function)?,
            None => write!(f, "LINK({:#04X})", self.control.as_u8())?,
        }
        write!(
            f,
            " {}->{} ({} bytes)",
            self.source,
            self.destination,
            self.payload.len()
        )
    }
}
