//! # Node Server
//!
//! Accepts game-client connections on the control socket.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       NODE SERVER                        │
//! ├──────────────────────────────────────────────────────────┤
//! │  accept loop ──spawn──► connection task (one per client) │
//! │       │                   │ KillSwitch (armed at accept) │
//! │       │                   │ Hello ─► SessionLease        │
//! │  shutdown (watch)         │ frames ─► Dispatcher ─► ack  │
//! │       │                   ▼                              │
//! │  abort tasks        set_intensity(0.0) on every exit     │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Connection tasks are not capped. The socket is local and only one
//! session can be bound at a time, so extra connections end at the
//! handshake.

mod connection;

use std::fs::Permissions;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::net::UnixListener;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::config::NodeConfig;
use crate::controller::ResourceController;
use crate::error::{NodeError, NodeResult};
use crate::session::SessionManager;
use crate::stats::NodeStats;

use connection::{Connection, ConnectionContext};

/// The control socket server.
pub struct NodeServer {
    listener: UnixListener,
    socket_path: PathBuf,
    ctx: ConnectionContext,
}

impl NodeServer {
    /// Binds the control socket, replacing a stale socket file.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn bind(config: NodeConfig, controller: impl ResourceController + 'static) -> NodeResult<Self> {
        Self::bind_with(config, Arc::new(controller), SessionManager::new())
    }

    /// Binds with an explicit controller handle and session manager.
    pub fn bind_with(
        config: NodeConfig,
        controller: Arc<dyn ResourceController>,
        sessions: SessionManager,
    ) -> NodeResult<Self> {
        let socket_path = config.socket_path.clone();
        remove_stale_socket(&socket_path);

        let listener = UnixListener::bind(&socket_path).map_err(|source| NodeError::Bind {
            path: socket_path.clone(),
            source,
        })?;
        if let Err(err) = std::fs::set_permissions(&socket_path, Permissions::from_mode(0o600)) {
            tracing::warn!(socket = %socket_path.display(), %err, "could not restrict socket permissions");
        }
        tracing::info!(
            socket = %socket_path.display(),
            idle_timeout_ms = config.idle_timeout_ms,
            max_frame_len = config.max_frame_len,
            "control socket bound"
        );

        Ok(Self {
            listener,
            socket_path,
            ctx: ConnectionContext {
                config: Arc::new(config),
                sessions,
                controller,
                stats: Arc::new(NodeStats::default()),
            },
        })
    }

    /// Path of the bound socket.
    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Shared counters.
    #[must_use]
    pub fn stats(&self) -> Arc<NodeStats> {
        Arc::clone(&self.ctx.stats)
    }

    /// Session manager guarding the single session slot.
    #[must_use]
    pub fn sessions(&self) -> &SessionManager {
        &self.ctx.sessions
    }

    /// Serves connections until `shutdown` turns true.
    ///
    /// Open connections are aborted on shutdown, which fires their kill
    /// switches. The socket file is removed before returning.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> NodeResult<()> {
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, _addr)) => {
                            NodeStats::bump(&self.ctx.stats.connections);
                            tracing::debug!("connection accepted");
                            let conn = Connection::accept(stream, &self.ctx);
                            tasks.spawn(connection::serve(conn, self.ctx.clone()));
                        }
                        Err(err) => tracing::warn!(%err, "accept failed"),
                    }
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(err) = joined {
                        tracing::error!(%err, "connection task failed");
                    }
                }
            }
        }

        tasks.shutdown().await;
        drop(self.listener);
        if let Err(err) = std::fs::remove_file(&self.socket_path) {
            tracing::debug!(%err, "socket file already gone");
        }
        tracing::info!(
            socket = %self.socket_path.display(),
            stats = ?self.ctx.stats.snapshot(),
            "control socket closed"
        );
        Ok(())
    }
}

impl std::fmt::Debug for NodeServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeServer")
            .field("socket_path", &self.socket_path)
            .field("sessions", &self.ctx.sessions)
            .finish_non_exhaustive()
    }
}

fn remove_stale_socket(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!(socket = %path.display(), "removed stale socket"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => tracing::warn!(socket = %path.display(), %err, "could not remove stale socket"),
    }
}
