//! Lobby wire framing
//!
//! ```text
//! +---------------------+------------------------------+
//! | length (4 bytes)    | gzip-compressed document     |
//! | u32 big-endian      | (length bytes)               |
//! +---------------------+------------------------------+
//! ```
//!
//! A connection starts with a one-shot handshake: the client writes four
//! zero bytes and the server answers with a 4-byte big-endian token.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use thiserror::Error;

/// Bytes the client sends to open a session
pub const HANDSHAKE: [u8; 4] = [0, 0, 0, 0];

/// Size of the big-endian length prefix
pub const LENGTH_PREFIX: usize = 4;

/// Upper bound for a single compressed frame
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame of {size} bytes exceeds maximum {max}")]
    TooLarge { size: usize, max: usize },

    #[error("compression failed: {0}")]
    Compress(#[source] std::io::Error),

    #[error("decompression failed: {0}")]
    Decompress(#[source] std::io::Error),
}

pub fn compress(payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(payload).map_err(FrameError::Compress)?;
    encoder.finish().map_err(FrameError::Compress)
}

/// Inflates a frame body. An empty body inflates to an empty document.
pub fn decompress(body: &[u8]) -> Result<Vec<u8>, FrameError> {
    if body.is_empty() {
        return Ok(Vec::new());
    }
    let mut decoded = Vec::new();
    GzDecoder::new(body)
        .read_to_end(&mut decoded)
        .map_err(FrameError::Decompress)?;
    Ok(decoded)
}

/// Compresses `payload` and prepends the length prefix
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    let body = compress(payload)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge {
            size: body.len(),
            max: MAX_FRAME_LEN,
        });
    }

    let mut frame = Vec::with_capacity(LENGTH_PREFIX + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Reads the body length from a 4-byte prefix, enforcing [`MAX_FRAME_LEN`]
pub fn body_len(prefix: [u8; LENGTH_PREFIX]) -> Result<usize, FrameError> {
    let size = u32::from_be_bytes(prefix) as usize;
    if size > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge {
            size,
            max: MAX_FRAME_LEN,
        });
    }
    Ok(size)
}

/// Splits one complete frame off the front of `buf`.
///
/// Returns the compressed body and the number of bytes consumed, or `None`
/// while the frame is still incomplete.
pub fn split_frame(buf: &[u8]) -> Result<Option<(&[u8], usize)>, FrameError> {
    if buf.len() < LENGTH_PREFIX {
        return Ok(None);
    }
    let mut prefix = [0u8; LENGTH_PREFIX];
    prefix.copy_from_slice(&buf[..LENGTH_PREFIX]);
    let size = body_len(prefix)?;

    let end = LENGTH_PREFIX + size;
    if buf.len() < end {
        return Ok(None);
    }
    Ok(Some((&buf[LENGTH_PREFIX..end], end)))
}

/// How many more bytes are needed before `buf` holds a complete frame
pub fn bytes_wanted(buf: &[u8]) -> Result<usize, FrameError> {
    if buf.len() < LENGTH_PREFIX {
        return Ok(LENGTH_PREFIX - buf.len());
    }
    let mut prefix = [0u8; LENGTH_PREFIX];
    prefix.copy_from_slice(&buf[..LENGTH_PREFIX]);
    let size = body_len(prefix)?;
    Ok((LENGTH_PREFIX + size).saturating_sub(buf.len()))
}
