//! DNP3 transport function.
//!
//! Splits application fragments into link-sized segments and reassembles
//! them. Each segment starts with a one-byte header:
//!
//! ```text
//! bit 7   6   5..0
//!     FIN FIR sequence (mod 64)
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use tracing::warn;

use crate::error::TransportError;
use crate::types::MAX_USER_DATA;

/// Largest segment payload that fits one link frame.
pub const MAX_SEGMENT_PAYLOAD: usize = MAX_USER_DATA - 1;

/// Default limit for a reassembled application fragment.
pub const DEFAULT_MAX_FRAGMENT_SIZE: usize = 2048;

/// Transport header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportHeader {
    /// Final segment of the message
    pub fin: bool,
    /// First segment of the message
    pub fir: bool,
    /// Sequence number (0-63)
    pub seq: u8,
}

impl TransportHeader {
    /// Create a header.
    #[inline]
    pub const fn new(fir: bool, fin: bool, seq: u8) -> Self {
        Self {
            fin,
            fir,
            seq: seq & 0x3F,
        }
    }

    /// Parse from byte.
    #[inline]
    pub const fn from_u8(value: u8) -> Self {
        Self {
            fin: value & 0x80 != 0,
            fir: value & 0x40 != 0,
            seq: value & 0x3F,
        }
    }

    /// Encode to byte.
    #[inline]
    pub const fn as_u8(&self) -> u8 {
        (self.seq & 0x3F) | if self.fin { 0x80 } else { 0 } | if self.fir { 0x40 } else { 0 }
    }
}

/// Next transport sequence number.
#[inline]
pub const fn next_seq(seq: u8) -> u8 {
    seq.wrapping_add(1) & 0x3F
}

/// Split `payload` into transport segments of at most `max_payload` bytes
/// (plus header).
///
/// `seq` is the sender's transport counter; it is advanced once per
/// segment. An empty payload produces a single FIR|FIN segment.
pub fn segment(payload: &[u8], max_payload: usize, seq: &mut u8) -> Vec<Bytes> {
    let max_payload = max_payload.clamp(1, MAX_SEGMENT_PAYLOAD);
    let count = payload.len().div_ceil(max_payload).max(1);
    let mut segments = Vec::with_capacity(count);

    for i in 0..count {
        let start = i * max_payload;
        let end = (start + max_payload).min(payload.len());
        let header = TransportHeader::new(i == 0, i + 1 == count, *seq);

        let mut buf = BytesMut::with_capacity(1 + end - start);
        buf.put_u8(header.as_u8());
        buf.extend_from_slice(&payload[start..end]);
        segments.push(buf.freeze());

        *seq = next_seq(*seq);
    }

    segments
}

/// Reassembles segments from one peer into application fragments.
#[derive(Debug)]
pub struct Reassembler {
    buffer: BytesMut,
    expected_seq: Option<u8>,
    max_size: usize,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAGMENT_SIZE)
    }
}

impl Reassembler {
    /// Create a reassembler accepting fragments up to `max_size` bytes.
    pub fn new(max_size: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            expected_seq: None,
            max_size,
        }
    }

    /// Check if a partial message is buffered.
    pub fn in_progress(&self) -> bool {
        self.expected_seq.is_some()
    }

    /// Discard any partial message.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.expected_seq = None;
    }

    /// Feed one segment (header byte plus payload).
    ///
    /// Returns the complete fragment when a FIN segment closes it.
    pub fn push(&mut self, segment: &[u8]) -> Result<Option<Bytes>, TransportError> {
        let (&first, data) = segment.split_first().ok_or(TransportError::EmptySegment)?;
        let header = TransportHeader::from_u8(first);

        if header.fir {
            if self.in_progress() {
                warn!(
                    discarded = self.buffer.len(),
                    seq = header.seq,
                    "new first segment during reassembly, restarting"
                );
            }
            self.buffer.clear();
        } else {
            match self.expected_seq {
                None => return Err(TransportError::NoFirstSegment { seq: header.seq }),
                Some(expected) if expected != header.seq => {
                    self.reset();
                    return Err(TransportError::SequenceMismatch {
                        expected,
                        actual: header.seq,
                    });
                }
                Some(_) => {}
            }
        }

        if self.buffer.len() + data.len() > self.max_size {
            self.reset();
            return Err(TransportError::Overflow {
                limit: self.max_size,
            });
        }

        self.buffer.extend_from_slice(data);

        if header.fin {
            self.expected_seq = None;
            Ok(Some(self.buffer.split().freeze()))
        } else {
            self.expected_seq = Some(next_seq(header.seq));
            Ok(None)
        }
    }
}
