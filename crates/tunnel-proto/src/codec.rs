//! Delimiter based frame codec for the control channel

use crate::{DEFAULT_MAX_FRAME_LENGTH, FRAME_DELIMITER};
use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

/// Codec errors
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Frame too large: {len} bytes exceeds limit of {max} bytes")]
    FrameTooLarge { len: usize, max: usize },

    #[error("Frame is not valid UTF-8")]
    InvalidUtf8,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Splits a byte stream into UTF-8 frames terminated by [`FRAME_DELIMITER`]
///
/// Oversized frames fail fast: as soon as the buffered bytes can no longer
/// contain a frame within `max_frame_length`, decoding returns
/// [`CodecError::FrameTooLarge`] instead of buffering further input.
#[derive(Debug, Clone)]
pub struct DelimiterCodec {
    max_frame_length: usize,
    /// Offset already scanned for a delimiter in the current buffer
    next_index: usize,
}

impl DelimiterCodec {
    pub fn new() -> Self {
        Self::with_max_frame_length(DEFAULT_MAX_FRAME_LENGTH)
    }

    pub fn with_max_frame_length(max_frame_length: usize) -> Self {
        Self {
            max_frame_length,
            next_index: 0,
        }
    }

    pub fn max_frame_length(&self) -> usize {
        self.max_frame_length
    }

    fn find_delimiter(&self, buf: &[u8]) -> Option<usize> {
        buf[self.next_index..]
            .windows(FRAME_DELIMITER.len())
            .position(|window| window == FRAME_DELIMITER)
            .map(|pos| self.next_index + pos)
    }
}

impl Default for DelimiterCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for DelimiterCodec {
    type Item = String;
    type Error = CodecError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, CodecError> {
        match self.find_delimiter(buf) {
            Some(end) => {
                self.next_index = 0;

                if end > self.max_frame_length {
                    return Err(CodecError::FrameTooLarge {
                        len: end,
                        max: self.max_frame_length,
                    });
                }

                let frame = buf.split_to(end);
                let _ = buf.split_to(FRAME_DELIMITER.len());
                trace!("Decoded frame of {} bytes", frame.len());

                String::from_utf8(frame.to_vec())
                    .map(Some)
                    .map_err(|_| CodecError::InvalidUtf8)
            }
            None => {
                // A valid frame would have its delimiter inside this window
                if buf.len() >= self.max_frame_length + FRAME_DELIMITER.len() {
                    return Err(CodecError::FrameTooLarge {
                        len: buf.len(),
                        max: self.max_frame_length,
                    });
                }

                // The tail may hold the start of a delimiter split across reads
                self.next_index = buf.len().saturating_sub(FRAME_DELIMITER.len() - 1);
                Ok(None)
            }
        }
    }
}

impl Encoder<Bytes> for DelimiterCodec {
    type Error = CodecError;

    fn encode(&mut self, payload: Bytes, dst: &mut BytesMut) -> Result<(), CodecError> {
        if payload.len() > self.max_frame_length {
            return Err(CodecError::FrameTooLarge {
                len: payload.len(),
                max: self.max_frame_length,
            });
        }

        dst.reserve(payload.len() + FRAME_DELIMITER.len());
        dst.put(payload);
        dst.put_slice(FRAME_DELIMITER);
        Ok(())
    }
}
