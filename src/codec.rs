//! DNP3 link-layer codec for tokio.
//!
//! This module provides a codec implementation for encoding and decoding
//! DNP3 link frames using the tokio-util codec framework.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::error::{FrameError, ProtocolError};
use crate::types::{frame_len, LinkFrame, START_BYTES};

/// DNP3 link-layer codec.
///
/// Frames that fail a CRC or length check are dropped rather than ending
/// the stream: a corrupted frame on a noisy line is a transient condition
/// handled by the session's retry budget. The most recent rejection is kept
/// for diagnostics.
///
/// # Example
///
/// ```rust,ignore
/// use tokio_util::codec::Framed;
/// use voltage_dnp3::codec::LinkCodec;
///
/// let stream = TcpStream::connect("192.168.1.100:20000").await?;
/// let mut framed = Framed::new(stream, LinkCodec::new());
///
/// framed.send(LinkFrame::reset_link_states(true, 10, 1)).await?;
/// while let Some(frame) = framed.next().await {
///     println!("Received: {}", frame?);
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct LinkCodec {
    rejected: u64,
    last_error: Option<FrameError>,
}

impl LinkCodec {
    /// Create a new link codec.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of frames dropped for CRC or length errors.
    pub fn rejected_frames(&self) -> u64 {
        self.rejected
    }

    /// Take the most recent frame rejection, if any.
    pub fn take_last_error(&mut self) -> Option<FrameError> {
        self.last_error.take()
    }

    fn reject(&mut self, err: FrameError) {
        warn!(error = %err, "dropping link frame");
        self.rejected += 1;
        self.last_error = Some(err);
    }
}

/// Discard bytes until `src` starts with the start marker (or a lone 0x05
/// that may be its first half).
fn skip_to_start(src: &mut BytesMut) {
    let mut skip = 0;
    while skip < src.len() {
        if src[skip] == START_BYTES[0]
            && (skip + 1 == src.len() || src[skip + 1] == START_BYTES[1])
        {
            break;
        }
        skip += 1;
    }
    src.advance(skip);
}

impl Decoder for LinkCodec {
    type Item = LinkFrame;
    type Error = ProtocolError;

    fn decode(
        &mut self,
        src: &mut BytesMut,
    ) -> std::result::Result<Option<Self::Item>, Self::Error> {
        loop {
            skip_to_start(src);

            match LinkFrame::parse(&src[..]) {
                Ok((frame, consumed)) => {
                    src.advance(consumed);
                    return Ok(Some(frame));
                }
                Err(FrameError::Truncated { needed, .. }) => {
                    src.reserve(needed.saturating_sub(src.len()));
                    return Ok(None);
                }
                Err(err @ FrameError::BadBlockCrc { .. }) => {
                    // Header verified, so its length is trustworthy
                    let total = frame_len(src[2]);
                    src.advance(total);
                    self.reject(err);
                }
                Err(err) => {
                    // Header cannot be trusted; resync past this start byte
                    src.advance(1);
                    self.reject(err);
                }
            }
        }
    }
}

impl Encoder<LinkFrame> for LinkCodec {
    type Error = ProtocolError;

    fn encode(
        &mut self,
        item: LinkFrame,
        dst: &mut BytesMut,
    ) -> std::result::Result<(), Self::Error> {
        item.encode_to(dst)?;
        Ok(())
    }
}
