//! Typed, length-delimited framing.
//!
//! `[u32 big-endian length][u8 message type][length-1 bytes payload]`, where
//! `length` counts the type byte plus payload and must lie in `(0, 1 MiB]`.

use std::io::{ErrorKind, Read, Write};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid frame length: {len} (must be in 1..={max})")]
    BadLength { len: u32, max: u32 },
    #[error("payload too large: {len} > {max}")]
    TooLarge { len: usize, max: u32 },
    #[error("connection closed by peer")]
    UnexpectedEof,
}

impl FrameError {
    /// True when the error came from a socket read/write timeout.
    pub fn is_timeout(&self) -> bool {
        match self {
            FrameError::Io(e) => matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut),
            _ => false,
        }
    }
}

pub const MAX_FRAME_LEN: u32 = 1024 * 1024; // 1 MiB guardrail

/// One decoded frame: raw type byte plus payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub msg_type: u8,
    pub payload: Vec<u8>,
}

/// Serialize a frame into one contiguous buffer.
pub fn encode_frame(msg_type: u8, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    let len = payload.len() + 1;
    if len > MAX_FRAME_LEN as usize {
        return Err(FrameError::TooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }
    let mut out = Vec::with_capacity(4 + len);
    out.extend_from_slice(&(len as u32).to_be_bytes());
    out.push(msg_type);
    out.extend_from_slice(payload);
    Ok(out)
}

/// Write a whole frame with a single `write_all`, so it never goes out as
/// several small segments.
pub fn write_frame<W: Write>(w: &mut W, msg_type: u8, payload: &[u8]) -> Result<(), FrameError> {
    let buf = encode_frame(msg_type, payload)?;
    w.write_all(&buf)?;
    w.flush()?;
    Ok(())
}

pub fn read_frame<R: Read>(r: &mut R) -> Result<RawFrame, FrameError> {
    let mut len_bytes = [0u8; 4];
    read_exact_or_eof(r, &mut len_bytes)?;
    let len = u32::from_be_bytes(len_bytes);
    if len == 0 || len > MAX_FRAME_LEN {
        return Err(FrameError::BadLength {
            len,
            max: MAX_FRAME_LEN,
        });
    }

    let mut ty = [0u8; 1];
    read_exact_or_eof(r, &mut ty)?;

    let mut payload = vec![0u8; (len - 1) as usize];
    read_exact_or_eof(r, &mut payload)?;
    Ok(RawFrame {
        msg_type: ty[0],
        payload,
    })
}

fn read_exact_or_eof<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<(), FrameError> {
    let mut off = 0usize;
    while off < buf.len() {
        match r.read(&mut buf[off..]) {
            Ok(0) => return Err(FrameError::UnexpectedEof),
            Ok(n) => off += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(FrameError::Io(e)),
        }
    }
    Ok(())
}
