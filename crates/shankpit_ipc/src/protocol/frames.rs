//! # Frame Definitions
//!
//! Every message on the control socket is one frame: an 8-byte header
//! followed by an opcode-specific payload. All integers and floats are
//! little-endian.
//!
//! ## Payload Layouts
//!
//! ```text
//! Hello (24)      pid u32 │ build_hash u32 │ nonce u64 │ timestamp u64
//! Heartbeat (70)  seq u64 │ samples u8 │ ft_avg f32 │ ft_var f32 │ fps_min u8
//!                 entropy f32 │ input_hash u64 │ timestamp u64 │ tag [32]
//! Event (114)     match_id u64 │ kill_ts u64 │ victim u8 │ weapon u8
//!                 server_signature [64] │ tag [32]
//! Ack (16)        zeroed
//! ```
//!
//! Signed payloads carry their HMAC tag as the final 32 bytes; the signed
//! region is everything before it.

use shankpit_security::TAG_SIZE;

use super::codec::FrameDeserializer;
use crate::error::FrameError;

/// Protocol magic: "SKAT".
pub const MAGIC: u32 = 0x534B_4154;

/// Size of the frame header in bytes.
pub const HEADER_SIZE: usize = 8;

/// Offset of the opcode byte inside the header.
pub const OPCODE_OFFSET: usize = 4;

/// Hello payload size.
pub const HELLO_PAYLOAD_LEN: usize = 24;

/// Minimum size of a complete Hello frame.
pub const HELLO_FRAME_LEN: usize = HEADER_SIZE + HELLO_PAYLOAD_LEN;

/// Heartbeat payload size, tag included.
pub const HEARTBEAT_PAYLOAD_LEN: usize = 70;

/// Offset of the minimum-FPS byte inside the heartbeat payload.
pub const HEARTBEAT_FPS_OFFSET: usize = 17;

/// Event payload size, tag included.
pub const EVENT_PAYLOAD_LEN: usize = 114;

/// Size of the game server's signature carried by events.
pub const SERVER_SIGNATURE_SIZE: usize = 64;

/// Acknowledgment payload size.
pub const ACK_PAYLOAD_LEN: usize = 16;

/// Total size of an Acknowledgment frame.
pub const ACK_FRAME_LEN: usize = HEADER_SIZE + ACK_PAYLOAD_LEN;

/// Frame opcodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Client -> Node: session request.
    Hello = 0x01,
    /// Node -> Client: attestation challenge (reserved).
    Challenge = 0x02,
    /// Client -> Node: attestation response (reserved).
    Attest = 0x03,
    /// Client -> Node: batched telemetry.
    Heartbeat = 0x04,
    /// Node -> Client: control echo.
    Acknowledgment = 0x05,
    /// Client -> Node: proof-of-action bonus trigger.
    Event = 0x06,
    /// Either direction: error report (reserved).
    Error = 0xFF,
}

impl Opcode {
    /// Decodes an opcode byte. Unlisted values return `None`.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Hello),
            0x02 => Some(Self::Challenge),
            0x03 => Some(Self::Attest),
            0x04 => Some(Self::Heartbeat),
            0x05 => Some(Self::Acknowledgment),
            0x06 => Some(Self::Event),
            0xFF => Some(Self::Error),
            _ => None,
        }
    }
}

/// Frame header - present in every frame.
///
/// Total size: 8 bytes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    /// Protocol magic.
    pub magic: u32,
    /// Raw opcode byte.
    pub opcode: u8,
    /// Reserved, zero.
    pub flags: u8,
    /// Length of the payload following the header.
    pub payload_len: u16,
}

impl FrameHeader {
    /// Creates a header for an outgoing frame.
    #[must_use]
    pub const fn new(opcode: Opcode, payload_len: u16) -> Self {
        Self {
            magic: MAGIC,
            opcode: opcode as u8,
            flags: 0,
            payload_len,
        }
    }

    /// Reads a header from the start of `bytes`.
    ///
    /// Only the length is checked; the magic is left to [`Frame::parse`].
    pub fn parse(bytes: &[u8]) -> Result<Self, FrameError> {
        let mut reader = FrameDeserializer::new(bytes);
        Self::read(&mut reader).ok_or(FrameError::TooShort {
            expected: HEADER_SIZE,
            actual: bytes.len(),
        })
    }

    fn read(reader: &mut FrameDeserializer<'_>) -> Option<Self> {
        Some(Self {
            magic: reader.read_u32()?,
            opcode: reader.read_u8()?,
            flags: reader.read_u8()?,
            payload_len: reader.read_u16()?,
        })
    }

    /// Decoded opcode, if listed.
    #[must_use]
    pub const fn opcode(&self) -> Option<Opcode> {
        Opcode::from_u8(self.opcode)
    }
}

/// A received frame, borrowed from the read buffer.
#[derive(Clone, Copy, Debug)]
pub struct Frame<'a> {
    /// Decoded header.
    pub header: FrameHeader,
    /// Bytes after the header.
    pub payload: &'a [u8],
}

impl<'a> Frame<'a> {
    /// Splits `bytes` into header and payload and checks the magic.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, FrameError> {
        let header = FrameHeader::parse(bytes)?;
        if header.magic != MAGIC {
            return Err(FrameError::BadMagic(header.magic));
        }
        Ok(Self {
            header,
            payload: &bytes[HEADER_SIZE..],
        })
    }
}

/// Splits a signed payload into (signed region, trailing tag).
pub fn split_tag(payload: &[u8], min_len: usize) -> Result<(&[u8], &[u8]), FrameError> {
    if payload.len() < min_len.max(TAG_SIZE) {
        return Err(FrameError::TooShort {
            expected: min_len,
            actual: payload.len(),
        });
    }
    Ok(payload.split_at(payload.len() - TAG_SIZE))
}

/// Session request from the game client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Hello {
    /// Client process id.
    pub pid: u32,
    /// Hash of the client build.
    pub build_hash: u32,
    /// Client-chosen session nonce.
    pub nonce: u64,
    /// Client clock at send time (ms since epoch).
    pub timestamp: u64,
}

impl Hello {
    /// Decodes a Hello payload.
    pub fn decode(payload: &[u8]) -> Result<Self, FrameError> {
        let mut reader = FrameDeserializer::new(payload);
        Self::read(&mut reader).ok_or(FrameError::TooShort {
            expected: HELLO_PAYLOAD_LEN,
            actual: payload.len(),
        })
    }

    fn read(reader: &mut FrameDeserializer<'_>) -> Option<Self> {
        Some(Self {
            pid: reader.read_u32()?,
            build_hash: reader.read_u32()?,
            nonce: reader.read_u64()?,
            timestamp: reader.read_u64()?,
        })
    }
}

/// Batched telemetry carried by a Heartbeat.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Telemetry {
    /// Monotonic sequence number.
    pub sequence: u64,
    /// Frames aggregated into this report.
    pub sample_count: u8,
    /// Mean frame time (ms).
    pub frame_time_avg: f32,
    /// Frame-time variance.
    pub frame_time_var: f32,
    /// Lowest FPS over the batch.
    pub fps_min: u8,
    /// Client-computed input entropy score.
    pub input_entropy: f32,
    /// Hash of the raw input stream.
    pub input_hash: u64,
    /// Client clock at send time (ms since epoch).
    pub timestamp: u64,
}

impl Telemetry {
    /// Size of the encoded fields, tag excluded.
    pub const SIGNED_LEN: usize = HEARTBEAT_PAYLOAD_LEN - TAG_SIZE;

    /// Decodes the telemetry fields from the signed region of a heartbeat.
    pub fn decode(signed: &[u8]) -> Result<Self, FrameError> {
        let mut reader = FrameDeserializer::new(signed);
        Self::read(&mut reader).ok_or(FrameError::TooShort {
            expected: Self::SIGNED_LEN,
            actual: signed.len(),
        })
    }

    fn read(reader: &mut FrameDeserializer<'_>) -> Option<Self> {
        Some(Self {
            sequence: reader.read_u64()?,
            sample_count: reader.read_u8()?,
            frame_time_avg: reader.read_f32()?,
            frame_time_var: reader.read_f32()?,
            fps_min: reader.read_u8()?,
            input_entropy: reader.read_f32()?,
            input_hash: reader.read_u64()?,
            timestamp: reader.read_u64()?,
        })
    }
}

/// Proof-of-action event from the game client.
///
/// `server_signature` is the game server's attestation of the event. It is
/// carried through but not verified by the node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GameEvent {
    /// Match the event happened in.
    pub match_id: u64,
    /// Server time of the event.
    pub kill_timestamp: u64,
    /// Victim slot.
    pub victim_id: u8,
    /// Weapon slot.
    pub weapon_id: u8,
    /// Game server signature over the event.
    pub server_signature: [u8; SERVER_SIGNATURE_SIZE],
}

impl GameEvent {
    /// Size of the encoded fields, tag excluded.
    pub const SIGNED_LEN: usize = EVENT_PAYLOAD_LEN - TAG_SIZE;

    /// Decodes the event fields from the signed region of an Event frame.
    pub fn decode(signed: &[u8]) -> Result<Self, FrameError> {
        let mut reader = FrameDeserializer::new(signed);
        Self::read(&mut reader).ok_or(FrameError::TooShort {
            expected: Self::SIGNED_LEN,
            actual: signed.len(),
        })
    }

    fn read(reader: &mut FrameDeserializer<'_>) -> Option<Self> {
        Some(Self {
            match_id: reader.read_u64()?,
            kill_timestamp: reader.read_u64()?,
            victim_id: reader.read_u8()?,
            weapon_id: reader.read_u8()?,
            server_signature: reader.read_array()?,
        })
    }
}
