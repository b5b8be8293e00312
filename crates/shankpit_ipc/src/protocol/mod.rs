//! # Control Protocol
//!
//! Binary frame definitions for the game-client control socket.
//!
//! ## Frame Structure
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Header (8 bytes)                                             │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Magic "SKAT" (4) │ Opcode (1) │ Flags (1) │ Payload Len (2)  │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Payload (opcode specific, HMAC tag last when signed)         │
//! └──────────────────────────────────────────────────────────────┘
//! ```

mod codec;
mod frames;

pub use codec::{FrameDeserializer, FrameSerializer, MAX_BUFFER_SIZE};
pub use frames::{
    split_tag, Frame, FrameHeader, GameEvent, Hello, Opcode, Telemetry, ACK_FRAME_LEN,
    ACK_PAYLOAD_LEN, EVENT_PAYLOAD_LEN, HEADER_SIZE, HEARTBEAT_FPS_OFFSET,
    HEARTBEAT_PAYLOAD_LEN, HELLO_FRAME_LEN, HELLO_PAYLOAD_LEN, MAGIC, OPCODE_OFFSET,
    SERVER_SIGNATURE_SIZE,
};
