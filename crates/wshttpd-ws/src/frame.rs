//! WebSocket frame codec.
//!
//! Pure encode/decode over byte buffers, no I/O. Decoding never blocks:
//! an incomplete frame yields `Ok(None)` and the caller retries once more
//! bytes have been buffered.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Masking-key, if MASK set  |          Payload Data         |
//! +-------------------------------+-------------------------------+
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::errors::ProtocolError;

/// Largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: u64 = 125;

/// Frame type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Continuation of a fragmented message.
    Continuation = 0x0,
    /// UTF-8 text data.
    Text = 0x1,
    /// Binary data.
    Binary = 0x2,
    /// Connection close.
    Close = 0x8,
    /// Ping.
    Ping = 0x9,
    /// Pong.
    Pong = 0xA,
}

impl Opcode {
    /// Parse the low nibble of the first header byte.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            other => Err(ProtocolError::UnsupportedOpcode(other)),
        }
    }

    /// Close, ping or pong.
    pub const fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }
}

/// Whether incoming frames must, must not, or may carry a mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskRequirement {
    /// Every frame must be masked (server side).
    Required,
    /// No frame may be masked.
    Forbidden,
    /// Either is accepted.
    Optional,
}

impl MaskRequirement {
    /// Whether a frame with the given mask flag is acceptable.
    pub const fn allows(self, masked: bool) -> bool {
        match self {
            Self::Required => masked,
            Self::Forbidden => !masked,
            Self::Optional => true,
        }
    }
}

/// Masking rules for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaskPolicy {
    /// Rule applied to incoming frames.
    pub incoming: MaskRequirement,
    /// Whether outgoing frames are masked.
    pub outgoing: bool,
}

impl MaskPolicy {
    /// Server-accepted connection: clients must mask, the server does not.
    pub const SERVER: Self = Self {
        incoming: MaskRequirement::Required,
        outgoing: false,
    };

    /// Client-initiated connection: we mask, and accept what the server sends.
    pub const CLIENT: Self = Self {
        incoming: MaskRequirement::Optional,
        outgoing: true,
    };

    /// Mask key for an outgoing frame.
    ///
    /// An all-zero key satisfies the masking rule while making the XOR a no-op.
    pub const fn outgoing_key(self) -> Option<[u8; 4]> {
        if self.outgoing {
            Some([0; 4])
        } else {
            None
        }
    }
}

/// A single decoded frame. The payload is already unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag.
    pub fin: bool,
    /// Frame type.
    pub opcode: Opcode,
    /// Masking key as it appeared on the wire.
    pub mask: Option<[u8; 4]>,
    /// Unmasked payload.
    pub payload: Bytes,
}

impl Frame {
    /// Whether the frame carried a mask on the wire.
    pub fn is_masked(&self) -> bool {
        self.mask.is_some()
    }
}

/// A complete application message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Text message, decoded with U+FFFD substitution for invalid UTF-8.
    Text(String),
    /// Binary message.
    Binary(Bytes),
}

impl Message {
    fn from_payload(kind: Opcode, payload: Bytes) -> Self {
        match kind {
            Opcode::Text => Self::Text(String::from_utf8_lossy(&payload).into_owned()),
            _ => Self::Binary(payload),
        }
    }

    /// Text content; binary messages qualify only if they are valid UTF-8.
    pub fn into_text(self) -> Option<String> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(data) => String::from_utf8(data.to_vec()).ok(),
        }
    }
}

/// XOR `data` with `mask` cyclically. Applying it twice restores the input.
pub fn apply_mask(data: &mut [u8], mask: [u8; 4]) {
    if mask == [0; 4] {
        return;
    }
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= mask[i & 3];
    }
}

/// Decode one frame from the front of `buf`.
///
/// Returns the frame and the number of bytes it occupied, or `Ok(None)` if
/// `buf` does not yet hold a complete frame. Header checks run as soon as
/// the relevant bytes are present, so a bad frame is rejected before its
/// payload arrives.
pub fn decode(
    buf: &[u8],
    incoming: MaskRequirement,
    max_size: usize,
) -> Result<Option<(Frame, usize)>, ProtocolError> {
    let Some(&b0) = buf.first() else {
        return Ok(None);
    };
    if b0 & 0x70 != 0 {
        return Err(ProtocolError::ReservedBits);
    }
    let fin = b0 & 0x80 != 0;
    let opcode = Opcode::from_u8(b0 & 0x0f)?;
    if opcode.is_control() && !fin {
        return Err(ProtocolError::FragmentedControl);
    }

    let Some(&b1) = buf.get(1) else {
        return Ok(None);
    };
    let masked = b1 & 0x80 != 0;
    if !incoming.allows(masked) {
        return Err(ProtocolError::MaskMismatch { masked });
    }

    let (len, mut pos) = match b1 & 0x7f {
        126 => {
            let Some(ext) = buf.get(2..4) else {
                return Ok(None);
            };
            (u64::from(u16::from_be_bytes([ext[0], ext[1]])), 4)
        }
        127 => {
            let Some(ext) = buf.get(2..10) else {
                return Ok(None);
            };
            let mut raw = [0u8; 8];
            raw.copy_from_slice(ext);
            (u64::from_be_bytes(raw), 10)
        }
        n => (u64::from(n), 2),
    };
    if opcode.is_control() && len > MAX_CONTROL_PAYLOAD {
        return Err(ProtocolError::ControlTooLong(len));
    }
    let too_big = ProtocolError::MessageTooBig {
        size: len,
        limit: max_size,
    };
    let len = match usize::try_from(len) {
        Ok(n) if n <= max_size => n,
        _ => return Err(too_big),
    };

    let mask = if masked {
        let Some(key) = buf.get(pos..pos + 4) else {
            return Ok(None);
        };
        pos += 4;
        Some([key[0], key[1], key[2], key[3]])
    } else {
        None
    };

    let end = pos.checked_add(len).ok_or(too_big)?;
    let Some(data) = buf.get(pos..end) else {
        return Ok(None);
    };
    let mut payload = BytesMut::from(data);
    if let Some(key) = mask {
        apply_mask(&mut payload, key);
    }

    Ok(Some((
        Frame {
            fin,
            opcode,
            mask,
            payload: payload.freeze(),
        },
        end,
    )))
}

/// Encode a final (`fin=1`) frame.
#[allow(clippy::cast_possible_truncation)]
pub fn encode(opcode: Opcode, payload: &[u8], mask: Option<[u8; 4]>) -> Bytes {
    let mut out = BytesMut::with_capacity(payload.len() + 14);
    out.put_u8(0x80 | opcode as u8);

    let mask_bit = if mask.is_some() { 0x80 } else { 0 };
    match payload.len() {
        n if n < 126 => out.put_u8(mask_bit | n as u8),
        n if n < 1 << 16 => {
            out.put_u8(mask_bit | 126);
            out.put_u16(n as u16);
        }
        n => {
            out.put_u8(mask_bit | 127);
            out.put_u64(n as u64);
        }
    }

    if let Some(key) = mask {
        out.put_slice(&key);
        let start = out.len();
        out.put_slice(payload);
        apply_mask(&mut out[start..], key);
    } else {
        out.put_slice(payload);
    }
    out.freeze()
}

/// Accumulates fragments of a text/binary message.
#[derive(Debug)]
pub struct Reassembler {
    kind: Option<Opcode>,
    buffer: BytesMut,
    max_size: usize,
}

impl Reassembler {
    /// Create a reassembler that rejects messages above `max_size` bytes.
    pub fn new(max_size: usize) -> Self {
        Self {
            kind: None,
            buffer: BytesMut::new(),
            max_size,
        }
    }

    /// Whether a fragmented message is waiting for its final frame.
    pub fn in_progress(&self) -> bool {
        self.kind.is_some()
    }

    /// Feed a data frame. Returns the message once its final frame arrives.
    pub fn push(&mut self, frame: Frame) -> Result<Option<Message>, ProtocolError> {
        let kind = match (frame.opcode, self.kind) {
            (opcode, _) if opcode.is_control() => {
                return Err(ProtocolError::UnsupportedOpcode(opcode as u8));
            }
            (Opcode::Continuation, None) => return Err(ProtocolError::UnexpectedContinuation),
            (Opcode::Continuation, Some(kind)) => kind,
            (opcode, None) => opcode,
            (_, Some(_)) => return Err(ProtocolError::InterleavedMessage),
        };

        let total = self.buffer.len() + frame.payload.len();
        if total > self.max_size {
            self.kind = None;
            self.buffer.clear();
            return Err(ProtocolError::MessageTooBig {
                size: total as u64,
                limit: self.max_size,
            });
        }

        if !frame.fin {
            self.kind = Some(kind);
            self.buffer.extend_from_slice(&frame.payload);
            return Ok(None);
        }

        self.kind = None;
        let payload = if self.buffer.is_empty() {
            frame.payload
        } else {
            self.buffer.extend_from_slice(&frame.payload);
            self.buffer.split().freeze()
        };
        Ok(Some(Message::from_payload(kind, payload)))
    }
}
