//! Wire envelope encoding and decoding.
//!
//! One envelope travels inside each encrypted wire frame. All multi-byte
//! fields are big-endian (network byte order). The layout after the kind
//! byte depends on the kind:
//!
//! ```text
//! Send:    [0x01] [target_len u16] [target] [frame_count u16] ([len u32] [bytes])*
//! Request: [0x02] [tag u64] [target_len u16] [target] [frame_count u16] ([len u32] [bytes])*
//! Reply:   [0x03] [tag u64] [ok u8] [frame_count u16] ([len u32] [bytes])*
//! ```
//!
//! Targets are `category.command`; neither part may contain the separator.

use thiserror::Error;

/// Separator between category and command in a target string.
pub const TARGET_SEPARATOR: char = '.';

/// Maximum number of data frames in one envelope.
pub const MAX_FRAMES: usize = u16::MAX as usize;

/// Envelope kind byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EnvelopeKind {
    /// Fire-and-forget message
    Send = 0x01,
    /// Correlated request expecting a tagged reply
    Request = 0x02,
    /// Reply to a previously issued request
    Reply = 0x03,
}

impl TryFrom<u8> for EnvelopeKind {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, WireError> {
        match value {
            0x01 => Ok(Self::Send),
            0x02 => Ok(Self::Request),
            0x03 => Ok(Self::Reply),
            _ => Err(WireError::InvalidKind(value)),
        }
    }
}

/// Envelope-level errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Input ended before a complete field
    #[error("envelope too short: expected at least {expected} more bytes, got {actual}")]
    Truncated {
        /// Bytes the next field needs
        expected: usize,
        /// Bytes remaining in the input
        actual: usize,
    },

    /// Unknown kind byte
    #[error("invalid envelope kind: 0x{0:02X}")]
    InvalidKind(u8),

    /// Bytes left over after a complete envelope
    #[error("{0} trailing bytes after envelope")]
    TrailingBytes(usize),

    /// Target string is not valid UTF-8
    #[error("target is not valid UTF-8")]
    InvalidUtf8,

    /// Target string exceeds the u16 length field
    #[error("target of {0} bytes exceeds limit")]
    TargetTooLong(usize),

    /// More data frames than the u16 count field allows
    #[error("{0} frames exceeds limit")]
    TooManyFrames(usize),
}

/// A decoded wire envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    /// Fire-and-forget message
    Send {
        /// `category.command` target
        target: String,
        /// Opaque data frames
        frames: Vec<Vec<u8>>,
    },
    /// Correlated request
    Request {
        /// Correlation tag, unique per requester
        tag: u64,
        /// `category.command` target
        target: String,
        /// Opaque data frames
        frames: Vec<Vec<u8>>,
    },
    /// Reply to a request
    Reply {
        /// Correlation tag copied from the request
        tag: u64,
        /// Whether the request was handled successfully
        ok: bool,
        /// Opaque data frames
        frames: Vec<Vec<u8>>,
    },
}

impl Envelope {
    /// The kind byte for this envelope.
    #[must_use]
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Envelope::Send { .. } => EnvelopeKind::Send,
            Envelope::Request { .. } => EnvelopeKind::Request,
            Envelope::Reply { .. } => EnvelopeKind::Reply,
        }
    }

    /// Encode into a byte buffer.
    ///
    /// # Errors
    ///
    /// Fails if the target or frame set exceeds its length field.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.push(self.kind() as u8);
        match self {
            Envelope::Send { target, frames } => {
                encode_target(&mut buf, target)?;
                encode_frames(&mut buf, frames)?;
            }
            Envelope::Request { tag, target, frames } => {
                buf.extend_from_slice(&tag.to_be_bytes());
                encode_target(&mut buf, target)?;
                encode_frames(&mut buf, frames)?;
            }
            Envelope::Reply { tag, ok, frames } => {
                buf.extend_from_slice(&tag.to_be_bytes());
                buf.push(u8::from(*ok));
                encode_frames(&mut buf, frames)?;
            }
        }
        Ok(buf)
    }

    /// Decode from a byte buffer, rejecting trailing garbage.
    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        let mut cursor = data;
        let kind = EnvelopeKind::try_from(take_u8(&mut cursor)?)?;
        let envelope = match kind {
            EnvelopeKind::Send => {
                let target = take_target(&mut cursor)?;
                let frames = take_frames(&mut cursor)?;
                Envelope::Send { target, frames }
            }
            EnvelopeKind::Request => {
                let tag = take_u64(&mut cursor)?;
                let target = take_target(&mut cursor)?;
                let frames = take_frames(&mut cursor)?;
                Envelope::Request { tag, target, frames }
            }
            EnvelopeKind::Reply => {
                let tag = take_u64(&mut cursor)?;
                let ok = take_u8(&mut cursor)? != 0;
                let frames = take_frames(&mut cursor)?;
                Envelope::Reply { tag, ok, frames }
            }
        };
        if !cursor.is_empty() {
            return Err(WireError::TrailingBytes(cursor.len()));
        }
        Ok(envelope)
    }

    fn encoded_len(&self) -> usize {
        let (target_len, frames, fixed) = match self {
            Envelope::Send { target, frames } => (target.len(), frames, 1 + 2),
            Envelope::Request { target, frames, .. } => (target.len(), frames, 1 + 8 + 2),
            Envelope::Reply { frames, .. } => (0, frames, 1 + 8 + 1),
        };
        fixed + target_len + 2 + frames.iter().map(|f| 4 + f.len()).sum::<usize>()
    }
}

/// Split a target on the first separator into `(category, command)`.
///
/// A target without a separator yields an empty command, which fails
/// lookup as `UnknownCommand` rather than being a distinct error.
#[must_use]
pub fn split_target(target: &str) -> (&str, &str) {
    match target.split_once(TARGET_SEPARATOR) {
        Some((category, command)) => (category, command),
        None => (target, ""),
    }
}

fn encode_target(buf: &mut Vec<u8>, target: &str) -> Result<(), WireError> {
    if target.len() > u16::MAX as usize {
        return Err(WireError::TargetTooLong(target.len()));
    }
    buf.extend_from_slice(&(target.len() as u16).to_be_bytes());
    buf.extend_from_slice(target.as_bytes());
    Ok(())
}

fn encode_frames(buf: &mut Vec<u8>, frames: &[Vec<u8>]) -> Result<(), WireError> {
    if frames.len() > MAX_FRAMES {
        return Err(WireError::TooManyFrames(frames.len()));
    }
    buf.extend_from_slice(&(frames.len() as u16).to_be_bytes());
    for frame in frames {
        buf.extend_from_slice(&(frame.len() as u32).to_be_bytes());
        buf.extend_from_slice(frame);
    }
    Ok(())
}

fn take<'a>(cursor: &mut &'a [u8], n: usize) -> Result<&'a [u8], WireError> {
    if cursor.len() < n {
        return Err(WireError::Truncated {
            expected: n,
            actual: cursor.len(),
        });
    }
    let (head, tail) = cursor.split_at(n);
    *cursor = tail;
    Ok(head)
}

fn take_u8(cursor: &mut &[u8]) -> Result<u8, WireError> {
    Ok(take(cursor, 1)?[0])
}

fn take_u16(cursor: &mut &[u8]) -> Result<u16, WireError> {
    let bytes = take(cursor, 2)?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn take_u32(cursor: &mut &[u8]) -> Result<u32, WireError> {
    let bytes = take(cursor, 4)?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn take_u64(cursor: &mut &[u8]) -> Result<u64, WireError> {
    let bytes = take(cursor, 8)?;
    let mut out = [0u8; 8];
    out.copy_from_slice(bytes);
    Ok(u64::from_be_bytes(out))
}

fn take_target(cursor: &mut &[u8]) -> Result<String, WireError> {
    let len = take_u16(cursor)? as usize;
    let bytes = take(cursor, len)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| WireError::InvalidUtf8)
}

fn take_frames(cursor: &mut &[u8]) -> Result<Vec<Vec<u8>>, WireError> {
    let count = take_u16(cursor)? as usize;
    let mut frames = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        let len = take_u32(cursor)? as usize;
        frames.push(take(cursor, len)?.to_vec());
    }
    Ok(frames)
}
