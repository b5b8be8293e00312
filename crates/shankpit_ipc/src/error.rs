//! # Error Types
//!
//! Frame and handshake errors are handled inside the connection that raised
//! them and only ever logged. Connection errors end one connection. Only
//! [`NodeError`] reaches the caller of the server.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::protocol::Opcode;

/// A single frame could not be acted on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Frame or payload shorter than its layout requires.
    #[error("frame too short: need {expected} bytes, got {actual}")]
    TooShort {
        /// Required length.
        expected: usize,
        /// Received length.
        actual: usize,
    },

    /// Header does not carry the protocol magic.
    #[error("bad frame magic {0:#010x}")]
    BadMagic(u32),

    /// HMAC tag did not match the signed region.
    #[error("authentication failed on {opcode:?} frame")]
    AuthenticationFailed {
        /// Opcode of the forged frame.
        opcode: Opcode,
    },

    /// Sequence number at or below the session cursor.
    #[error("replayed sequence {sequence} (last accepted {last_accepted})")]
    ReplayRejected {
        /// Rejected sequence number.
        sequence: u64,
        /// Session cursor at the time of the check.
        last_accepted: u64,
    },
}

/// The first frame of a connection did not establish a session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// Hello frame truncated or without protocol magic.
    #[error("malformed handshake: {0}")]
    Malformed(#[from] FrameError),

    /// First frame was not a Hello.
    #[error("expected hello opcode, got {0:#04x}")]
    UnexpectedOpcode(u8),

    /// Another connection already holds the session.
    #[error("session already active for pid {pid}")]
    SessionActive {
        /// Process id bound to the active session.
        pid: u32,
    },
}

/// A connection was torn down.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// No complete frame arrived within the idle deadline.
    #[error("idle timeout after {0:?}")]
    Timeout(Duration),

    /// The peer stopped draining acknowledgments.
    #[error("acknowledgment write stalled for {0:?}")]
    WriteStalled(Duration),

    /// Peer closed the socket.
    #[error("peer closed the connection")]
    Closed,

    /// Declared frame length exceeds the configured limit.
    #[error("frame of {len} bytes exceeds limit of {max}")]
    Oversized {
        /// Declared frame length.
        len: usize,
        /// Configured limit.
        max: usize,
    },

    /// Handshake rejected.
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// Too many consecutive forged frames.
    #[error("{0} consecutive authentication failures")]
    AuthFailureLimit(u32),

    /// Socket read or write failed.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Errors that abort the node.
#[derive(Error, Debug)]
pub enum NodeError {
    /// The control socket could not be created.
    #[error("failed to bind {}: {source}", .path.display())]
    Bind {
        /// Socket path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The config file could not be read.
    #[error("failed to read config {}: {source}", .path.display())]
    ConfigRead {
        /// Config path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The config file is not valid TOML for [`crate::NodeConfig`].
    #[error("invalid config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Runtime I/O failure outside any connection.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for node operations.
pub type NodeResult<T> = Result<T, NodeError>;
