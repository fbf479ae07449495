//! Data frames: `[u32 big-endian envelope length][envelope bytes][payload bytes]`.
//!
//! One frame per physical transport message; no buffering across frames.

use crate::envelope::{Encoding, Envelope, Payload};
use crate::error::{FrameError, LriResult};

const LENGTH_PREFIX_BYTES: usize = 4;
pub const DEFAULT_MAX_ENVELOPE_BYTES: usize = 1024 * 1024;

/// A decoded frame. The payload is whatever followed the envelope, verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub envelope: Envelope,
    pub payload: Payload,
}

#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    pub encoding: Encoding,
    pub max_envelope_bytes: usize,
}

impl FrameCodec {
    pub fn new(encoding: Encoding) -> Self {
        Self {
            encoding,
            max_envelope_bytes: DEFAULT_MAX_ENVELOPE_BYTES,
        }
    }

    pub fn encode(&self, envelope: &Envelope, payload: Option<&Payload>) -> LriResult<Vec<u8>> {
        let envelope_bytes = envelope.to_bytes(self.encoding)?;
        if envelope_bytes.len() > self.max_envelope_bytes || envelope_bytes.len() > u32::MAX as usize
        {
            return Err(FrameError::Oversized(envelope_bytes.len(), self.max_envelope_bytes).into());
        }
        let payload_bytes = payload.map(Payload::to_bytes).unwrap_or_default();

        let mut frame =
            Vec::with_capacity(LENGTH_PREFIX_BYTES + envelope_bytes.len() + payload_bytes.len());
        frame.extend_from_slice(&(envelope_bytes.len() as u32).to_be_bytes());
        frame.extend_from_slice(&envelope_bytes);
        frame.extend_from_slice(&payload_bytes);
        Ok(frame)
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Frame, FrameError> {
        if bytes.len() < LENGTH_PREFIX_BYTES {
            return Err(FrameError::TooSmall(bytes.len()));
        }
        let mut prefix = [0u8; LENGTH_PREFIX_BYTES];
        prefix.copy_from_slice(&bytes[..LENGTH_PREFIX_BYTES]);
        let declared = u32::from_be_bytes(prefix) as usize;

        if declared > self.max_envelope_bytes {
            return Err(FrameError::Oversized(declared, self.max_envelope_bytes));
        }
        let available = bytes.len() - LENGTH_PREFIX_BYTES;
        if declared > available {
            return Err(FrameError::Truncated {
                declared,
                available,
            });
        }

        let body = &bytes[LENGTH_PREFIX_BYTES..];
        let envelope = Envelope::from_bytes(&body[..declared], self.encoding)
            .map_err(|e| FrameError::Envelope(e.to_string()))?;
        let payload = Payload::Bytes(body[declared..].to_vec());

        Ok(Frame { envelope, payload })
    }
}

pub fn encode_frame(
    envelope: &Envelope,
    payload: Option<&Payload>,
    encoding: Encoding,
) -> LriResult<Vec<u8>> {
    FrameCodec::new(encoding).encode(envelope, payload)
}

pub fn decode_frame(bytes: &[u8], encoding: Encoding) -> Result<Frame, FrameError> {
    FrameCodec::new(encoding).decode(bytes)
}
