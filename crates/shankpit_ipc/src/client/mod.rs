//! # Node Client
//!
//! The game-client side of the control socket. Used by the probe binary
//! and the integration tests.
//!
//! ```rust,ignore
//! let mut client = NodeClient::connect("/tmp/shankpit_miner.sock").await?;
//! client.hello(std::process::id(), 0xBEEF, nonce).await?;
//! client.heartbeat(&telemetry).await?;
//! ```

use std::path::Path;

use shankpit_security::SessionKey;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

use crate::protocol::{FrameHeader, FrameSerializer, GameEvent, Hello, Opcode, Telemetry, ACK_FRAME_LEN};
use crate::session::{KeyDerivation, NonceKeyDerivation};

/// Client connection to a node.
#[derive(Debug)]
pub struct NodeClient {
    stream: UnixStream,
    serializer: FrameSerializer,
    key: Option<SessionKey>,
}

impl NodeClient {
    /// Connects to the node's control socket.
    pub async fn connect(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let stream = UnixStream::connect(path).await?;
        Ok(Self {
            stream,
            serializer: FrameSerializer::new(),
            key: None,
        })
    }

    /// Sends a Hello and derives the session key with the placeholder
    /// derivation.
    pub async fn hello(&mut self, pid: u32, build_hash: u32, nonce: u64) -> std::io::Result<()> {
        self.hello_with(pid, build_hash, nonce, &NonceKeyDerivation).await
    }

    /// Sends a Hello and derives the session key with `derivation`.
    pub async fn hello_with(
        &mut self,
        pid: u32,
        build_hash: u32,
        nonce: u64,
        derivation: &dyn KeyDerivation,
    ) -> std::io::Result<()> {
        let hello = Hello {
            pid,
            build_hash,
            nonce,
            timestamp: unix_millis(),
        };
        if !self.serializer.serialize_hello(&hello) {
            return Err(encode_error());
        }
        self.stream.write_all(self.serializer.as_slice()).await?;
        self.key = Some(derivation.derive(&hello));
        Ok(())
    }

    /// Session key, once the Hello has been sent.
    #[must_use]
    pub const fn key(&self) -> Option<&SessionKey> {
        self.key.as_ref()
    }

    /// Sends a signed Heartbeat and waits for the acknowledgment.
    pub async fn heartbeat(&mut self, telemetry: &Telemetry) -> std::io::Result<()> {
        let key = self.session_key()?;
        if !self.serializer.serialize_heartbeat(telemetry, &key) {
            return Err(encode_error());
        }
        self.stream.write_all(self.serializer.as_slice()).await?;
        self.read_ack().await
    }

    /// Sends a signed Event and waits for the acknowledgment.
    pub async fn event(&mut self, event: &GameEvent) -> std::io::Result<()> {
        let key = self.session_key()?;
        if !self.serializer.serialize_event(event, &key) {
            return Err(encode_error());
        }
        self.stream.write_all(self.serializer.as_slice()).await?;
        self.read_ack().await
    }

    /// Writes raw bytes without waiting for a reply.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.stream.write_all(bytes).await
    }

    /// Reads one Acknowledgment frame.
    pub async fn read_ack(&mut self) -> std::io::Result<()> {
        let mut frame = [0u8; ACK_FRAME_LEN];
        self.stream.read_exact(&mut frame).await?;

        let header = FrameHeader::parse(&frame)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
        if header.opcode() == Some(Opcode::Acknowledgment) {
            Ok(())
        } else {
            Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("expected acknowledgment, got opcode {:#04x}", header.opcode),
            ))
        }
    }

    /// Waits until the node closes the connection.
    ///
    /// Returns the number of bytes received before the close.
    pub async fn wait_closed(&mut self) -> std::io::Result<usize> {
        let mut sink = [0u8; 64];
        let mut total = 0;
        loop {
            match self.stream.read(&mut sink).await? {
                0 => return Ok(total),
                n => total += n,
            }
        }
    }

    fn session_key(&self) -> std::io::Result<SessionKey> {
        self.key.clone().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotConnected, "hello not sent")
        })
    }
}

fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

fn encode_error() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidInput, "frame does not fit the buffer")
}
