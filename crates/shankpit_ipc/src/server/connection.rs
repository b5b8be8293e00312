//! One accepted connection, from Hello to teardown.
//!
//! The kill switch fires on every exit, including a rejected second Hello.
//! Any local process that can open the socket can therefore drop intensity
//! to minimum at will; the bound client's next heartbeat restores it.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;

use crate::config::NodeConfig;
use crate::controller::{ResourceController, MIN_INTENSITY};
use crate::dispatch::{Dispatcher, Outcome};
use crate::error::ConnectionError;
use crate::protocol::{FrameSerializer, HEADER_SIZE};
use crate::session::SessionManager;
use crate::stats::NodeStats;

/// State shared by every connection task.
#[derive(Clone)]
pub(crate) struct ConnectionContext {
    pub(crate) config: Arc<NodeConfig>,
    pub(crate) sessions: SessionManager,
    pub(crate) controller: Arc<dyn ResourceController>,
    pub(crate) stats: Arc<NodeStats>,
}

/// Commands minimum intensity when dropped.
struct KillSwitch {
    controller: Arc<dyn ResourceController>,
    stats: Arc<NodeStats>,
}

impl KillSwitch {
    fn arm(ctx: &ConnectionContext) -> Self {
        Self {
            controller: Arc::clone(&ctx.controller),
            stats: Arc::clone(&ctx.stats),
        }
    }
}

impl Drop for KillSwitch {
    fn drop(&mut self) {
        NodeStats::bump(&self.stats.kill_switches);
        self.controller.set_intensity(MIN_INTENSITY);
        tracing::info!("kill switch fired, intensity to minimum");
    }
}

/// An accepted connection and everything it holds.
///
/// Fields drop in declaration order: the kill switch fires before the
/// session slot is released and before the socket closes.
pub(crate) struct Connection {
    _kill_switch: KillSwitch,
    dispatcher: Option<Dispatcher>,
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
}

impl Connection {
    /// Arms the kill switch for a freshly accepted stream.
    pub(crate) fn accept(stream: UnixStream, ctx: &ConnectionContext) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            _kill_switch: KillSwitch::arm(ctx),
            dispatcher: None,
            reader,
            writer,
        }
    }

    async fn drive(&mut self, ctx: &ConnectionContext) -> Result<(), ConnectionError> {
        let idle = ctx.config.idle_timeout();
        let max_frame_len = ctx.config.max_frame_len;
        let mut buffer = Vec::with_capacity(max_frame_len);

        if !read_frame_within(&mut self.reader, &mut buffer, max_frame_len, idle).await? {
            return Err(ConnectionError::Closed);
        }
        let lease = match ctx.sessions.handshake(&buffer) {
            Ok(lease) => lease,
            Err(err) => {
                NodeStats::bump(&ctx.stats.handshakes_rejected);
                return Err(err.into());
            }
        };
        NodeStats::bump(&ctx.stats.handshakes_accepted);

        let dispatcher = self.dispatcher.insert(Dispatcher::new(
            lease,
            &ctx.config,
            Arc::clone(&ctx.controller),
            Arc::clone(&ctx.stats),
        ));

        let mut serializer = FrameSerializer::new();
        let written = serializer.serialize_ack();
        debug_assert!(written);
        let ack = serializer.as_slice();

        while read_frame_within(&mut self.reader, &mut buffer, max_frame_len, idle).await? {
            match dispatcher.dispatch(&buffer) {
                Outcome::Acknowledge => write_within(&mut self.writer, ack, idle).await?,
                Outcome::Drop => {}
                Outcome::Disconnect => {
                    return Err(ConnectionError::AuthFailureLimit(ctx.config.max_auth_failures));
                }
            }
        }
        Ok(())
    }
}

/// Serves one connection until it closes.
pub(crate) async fn serve(mut connection: Connection, ctx: ConnectionContext) {
    match connection.drive(&ctx).await {
        Ok(()) => tracing::info!("client disconnected"),
        Err(ConnectionError::Closed) => tracing::info!("client closed mid-frame"),
        Err(err) => tracing::warn!(%err, "connection terminated"),
    }
}

/// Writes a reply under the same deadline as reads.
async fn write_within<W>(writer: &mut W, bytes: &[u8], idle: Duration) -> Result<(), ConnectionError>
where
    W: AsyncWrite + Unpin,
{
    tokio::time::timeout(idle, writer.write_all(bytes))
        .await
        .map_err(|_| ConnectionError::WriteStalled(idle))?
        .map_err(ConnectionError::from)
}

/// Reads one frame under the idle deadline.
async fn read_frame_within<R>(
    reader: &mut R,
    buffer: &mut Vec<u8>,
    max_frame_len: usize,
    idle: Duration,
) -> Result<bool, ConnectionError>
where
    R: AsyncRead + Unpin,
{
    tokio::time::timeout(idle, read_frame(reader, buffer, max_frame_len))
        .await
        .map_err(|_| ConnectionError::Timeout(idle))?
}

/// Reads a header and then exactly the payload it declares.
///
/// Returns `false` on a clean end of stream before the first header byte.
async fn read_frame<R>(
    reader: &mut R,
    buffer: &mut Vec<u8>,
    max_frame_len: usize,
) -> Result<bool, ConnectionError>
where
    R: AsyncRead + Unpin,
{
    buffer.clear();
    buffer.resize(HEADER_SIZE, 0);

    if reader.read(&mut buffer[..1]).await? == 0 {
        return Ok(false);
    }
    read_exact(reader, &mut buffer[1..]).await?;

    let payload_len = usize::from(u16::from_le_bytes([buffer[6], buffer[7]]));
    let len = HEADER_SIZE + payload_len;
    if len > max_frame_len {
        return Err(ConnectionError::Oversized {
            len,
            max: max_frame_len,
        });
    }

    buffer.resize(len, 0);
    read_exact(reader, &mut buffer[HEADER_SIZE..]).await?;
    Ok(true)
}

async fn read_exact<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), ConnectionError>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => Err(ConnectionError::Closed),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Hello, Opcode, MAGIC};
    use parking_lot::Mutex;

    /// Records each intensity command with the pid bound at that moment.
    struct RecordingController {
        sessions: SessionManager,
        seen: Mutex<Vec<(f32, Option<u32>)>>,
    }

    impl ResourceController for RecordingController {
        fn set_intensity(&self, level: f32) {
            self.seen.lock().push((level, self.sessions.active_pid()));
        }

        fn apply_bonus(&self, _multiplier: f32) {}
    }

    fn context() -> (ConnectionContext, Arc<RecordingController>) {
        let sessions = SessionManager::new();
        let recorder = Arc::new(RecordingController {
            sessions: sessions.clone(),
            seen: Mutex::new(Vec::new()),
        });
        let ctx = ConnectionContext {
            config: Arc::new(NodeConfig::default()),
            sessions,
            controller: Arc::clone(&recorder) as Arc<dyn ResourceController>,
            stats: Arc::new(NodeStats::default()),
        };
        (ctx, recorder)
    }

    fn hello(pid: u32) -> Vec<u8> {
        let mut serializer = FrameSerializer::new();
        assert!(serializer.serialize_hello(&Hello {
            pid,
            build_hash: 1,
            nonce: 0xFEED,
            timestamp: 0,
        }));
        serializer.as_slice().to_vec()
    }

    #[tokio::test]
    async fn test_kill_switch_fires_before_session_release() {
        let (ctx, recorder) = context();
        let (server_side, _client_side) = UnixStream::pair().unwrap();
        let mut connection = Connection::accept(server_side, &ctx);

        let lease = ctx.sessions.handshake(&hello(77)).unwrap();
        connection.dispatcher = Some(Dispatcher::new(
            lease,
            &ctx.config,
            Arc::clone(&ctx.controller),
            Arc::clone(&ctx.stats),
        ));
        drop(connection);

        assert_eq!(*recorder.seen.lock(), vec![(MIN_INTENSITY, Some(77))]);
        assert_eq!(ctx.sessions.active_pid(), None);
    }

    #[tokio::test]
    async fn test_never_polled_connection_fires_kill_switch() {
        let (ctx, recorder) = context();
        let (server_side, _client_side) = UnixStream::pair().unwrap();

        let task = serve(Connection::accept(server_side, &ctx), ctx.clone());
        drop(task);

        assert_eq!(*recorder.seen.lock(), vec![(MIN_INTENSITY, None)]);
        assert_eq!(ctx.stats.snapshot().kill_switches, 1);
    }

    #[tokio::test]
    async fn test_undrained_writer_times_out() {
        let (mut writer, _reader) = tokio::io::duplex(8);

        let err = write_within(&mut writer, &[0; 64], Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectionError::WriteStalled(_)));
    }

    fn raw_frame(opcode: u8, payload: &[u8]) -> Vec<u8> {
        let mut serializer = FrameSerializer::new();
        assert!(serializer.serialize_raw(opcode, payload));
        serializer.as_slice().to_vec()
    }

    #[tokio::test]
    async fn test_reads_back_to_back_frames() {
        let mut bytes = raw_frame(Opcode::Heartbeat as u8, &[1; 5]);
        bytes.extend(raw_frame(Opcode::Event as u8, &[2; 3]));
        let mut reader = bytes.as_slice();
        let mut buffer = Vec::new();

        assert!(read_frame(&mut reader, &mut buffer, 2048).await.unwrap());
        assert_eq!(buffer.len(), HEADER_SIZE + 5);
        assert_eq!(buffer[4], Opcode::Heartbeat as u8);

        assert!(read_frame(&mut reader, &mut buffer, 2048).await.unwrap());
        assert_eq!(&buffer[HEADER_SIZE..], &[2, 2, 2]);

        assert!(!read_frame(&mut reader, &mut buffer, 2048).await.unwrap());
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let bytes = raw_frame(Opcode::Heartbeat as u8, &[0; 100]);
        let mut reader = bytes.as_slice();
        let mut buffer = Vec::new();

        let err = read_frame(&mut reader, &mut buffer, 64).await.unwrap_err();
        assert!(matches!(err, ConnectionError::Oversized { len: 108, max: 64 }));
    }

    #[tokio::test]
    async fn test_truncated_payload_is_closed() {
        let bytes = raw_frame(Opcode::Heartbeat as u8, &[0; 10]);
        let mut reader = &bytes[..12];
        let mut buffer = Vec::new();

        let err = read_frame(&mut reader, &mut buffer, 2048).await.unwrap_err();
        assert!(matches!(err, ConnectionError::Closed));
    }

    #[tokio::test]
    async fn test_header_magic_not_checked_by_framing() {
        let mut bytes = raw_frame(0x42, &[9; 4]);
        bytes[..4].copy_from_slice(&0u32.to_le_bytes());
        let mut reader = bytes.as_slice();
        let mut buffer = Vec::new();

        assert!(read_frame(&mut reader, &mut buffer, 2048).await.unwrap());
        assert_ne!(u32::from_le_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]), MAGIC);
    }
}
