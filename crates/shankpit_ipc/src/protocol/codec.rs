//! # Frame Serialization
//!
//! Fixed-buffer encoding and cursor-based decoding of control frames.
//!
//! ## Design
//!
//! - The serializer owns a pre-allocated buffer and is reused between frames
//! - Writers return `false` instead of growing past the buffer
//! - Readers return `None` on truncation; callers map that to a typed error

use shankpit_security::{MessageAuthenticator, SessionKey};

use super::frames::{
    FrameHeader, GameEvent, Hello, Opcode, Telemetry, ACK_PAYLOAD_LEN, HEADER_SIZE,
};

/// Maximum encoded frame size produced by the serializer.
pub const MAX_BUFFER_SIZE: usize = 256;

/// Frame serializer - writes frames to a pre-allocated buffer.
#[derive(Debug)]
pub struct FrameSerializer {
    buffer: [u8; MAX_BUFFER_SIZE],
    position: usize,
}

impl FrameSerializer {
    /// Creates a new serializer with a fresh buffer.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buffer: [0u8; MAX_BUFFER_SIZE],
            position: 0,
        }
    }

    /// Resets the serializer for reuse.
    #[inline]
    pub fn reset(&mut self) {
        self.position = 0;
    }

    /// Returns the number of bytes written.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.position
    }

    /// Returns true if no bytes have been written.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.position == 0
    }

    /// Returns a slice of the written data.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer[..self.position]
    }

    /// Writes raw bytes.
    #[inline]
    pub fn write_bytes(&mut self, bytes: &[u8]) -> bool {
        if self.position + bytes.len() > MAX_BUFFER_SIZE {
            return false;
        }
        self.buffer[self.position..self.position + bytes.len()].copy_from_slice(bytes);
        self.position += bytes.len();
        true
    }

    /// Writes a single byte.
    #[inline]
    pub fn write_u8(&mut self, value: u8) -> bool {
        self.write_bytes(&[value])
    }

    /// Writes a u16 in little-endian format.
    #[inline]
    pub fn write_u16(&mut self, value: u16) -> bool {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Writes a u32 in little-endian format.
    #[inline]
    pub fn write_u32(&mut self, value: u32) -> bool {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Writes a u64 in little-endian format.
    #[inline]
    pub fn write_u64(&mut self, value: u64) -> bool {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Writes a f32 in little-endian format.
    #[inline]
    pub fn write_f32(&mut self, value: f32) -> bool {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Writes a frame header.
    #[inline]
    pub fn write_header(&mut self, header: &FrameHeader) -> bool {
        self.write_u32(header.magic)
            && self.write_u8(header.opcode)
            && self.write_u8(header.flags)
            && self.write_u16(header.payload_len)
    }

    /// Serializes a frame with an arbitrary opcode and payload.
    pub fn serialize_raw(&mut self, opcode: u8, payload: &[u8]) -> bool {
        self.reset();
        let Ok(payload_len) = u16::try_from(payload.len()) else {
            return false;
        };
        let header = FrameHeader {
            opcode,
            ..FrameHeader::new(Opcode::Error, payload_len)
        };
        self.write_header(&header) && self.write_bytes(payload)
    }

    /// Serializes a Hello frame.
    pub fn serialize_hello(&mut self, hello: &Hello) -> bool {
        self.begin(Opcode::Hello)
            && self.write_u32(hello.pid)
            && self.write_u32(hello.build_hash)
            && self.write_u64(hello.nonce)
            && self.write_u64(hello.timestamp)
            && self.finish()
    }

    /// Serializes a Heartbeat frame signed under `key`.
    pub fn serialize_heartbeat(&mut self, telemetry: &Telemetry, key: &SessionKey) -> bool {
        self.begin(Opcode::Heartbeat)
            && self.write_u64(telemetry.sequence)
            && self.write_u8(telemetry.sample_count)
            && self.write_f32(telemetry.frame_time_avg)
            && self.write_f32(telemetry.frame_time_var)
            && self.write_u8(telemetry.fps_min)
            && self.write_f32(telemetry.input_entropy)
            && self.write_u64(telemetry.input_hash)
            && self.write_u64(telemetry.timestamp)
            && self.sign(key)
            && self.finish()
    }

    /// Serializes an Event frame signed under `key`.
    pub fn serialize_event(&mut self, event: &GameEvent, key: &SessionKey) -> bool {
        self.begin(Opcode::Event)
            && self.write_u64(event.match_id)
            && self.write_u64(event.kill_timestamp)
            && self.write_u8(event.victim_id)
            && self.write_u8(event.weapon_id)
            && self.write_bytes(&event.server_signature)
            && self.sign(key)
            && self.finish()
    }

    /// Serializes an Acknowledgment frame. The body is zeroed.
    pub fn serialize_ack(&mut self) -> bool {
        self.begin(Opcode::Acknowledgment)
            && self.write_bytes(&[0u8; ACK_PAYLOAD_LEN])
            && self.finish()
    }

    /// Starts a frame with a placeholder payload length.
    fn begin(&mut self, opcode: Opcode) -> bool {
        self.reset();
        self.write_header(&FrameHeader::new(opcode, 0))
    }

    /// Appends the tag over everything written after the header.
    fn sign(&mut self, key: &SessionKey) -> bool {
        let tag = MessageAuthenticator::new().sign(&self.buffer[HEADER_SIZE..self.position], key);
        self.write_bytes(&tag)
    }

    /// Patches the payload length into the header.
    fn finish(&mut self) -> bool {
        let Ok(payload_len) = u16::try_from(self.position - HEADER_SIZE) else {
            return false;
        };
        self.buffer[6..8].copy_from_slice(&payload_len.to_le_bytes());
        true
    }
}

impl Default for FrameSerializer {
    fn default() -> Self {
        Self::new()
    }
}

/// Frame deserializer - reads little-endian fields from a buffer.
pub struct FrameDeserializer<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> FrameDeserializer<'a> {
    /// Creates a new deserializer from a buffer.
    #[must_use]
    pub const fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, position: 0 }
    }

    /// Returns the number of bytes remaining.
    #[inline]
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.position)
    }

    /// Reads a fixed number of bytes.
    #[inline]
    pub fn read_array<const N: usize>(&mut self) -> Option<[u8; N]> {
        let bytes = self.buffer.get(self.position..self.position + N)?;
        self.position += N;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Some(out)
    }

    /// Reads a single byte.
    #[inline]
    pub fn read_u8(&mut self) -> Option<u8> {
        self.read_array::<1>().map(|[b]| b)
    }

    /// Reads a u16 in little-endian format.
    #[inline]
    pub fn read_u16(&mut self) -> Option<u16> {
        self.read_array().map(u16::from_le_bytes)
    }

    /// Reads a u32 in little-endian format.
    #[inline]
    pub fn read_u32(&mut self) -> Option<u32> {
        self.read_array().map(u32::from_le_bytes)
    }

    /// Reads a u64 in little-endian format.
    #[inline]
    pub fn read_u64(&mut self) -> Option<u64> {
        self.read_array().map(u64::from_le_bytes)
    }

    /// Reads a f32 in little-endian format.
    #[inline]
    pub fn read_f32(&mut self) -> Option<f32> {
        self.read_u32().map(f32::from_bits)
    }
}
