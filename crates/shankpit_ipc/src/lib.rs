//! # SHANKPIT IPC - The Control Socket
//!
//! Local Unix-socket protocol between the game client and the node that
//! drives the resource controller.
//!
//! ## Architecture
//!
//! - **Protocol**: Fixed-layout little-endian frames with a trailing HMAC tag
//! - **Session**: One authenticated client per node, bound by a Hello frame
//! - **Dispatch**: Verify, de-duplicate, score, then command the controller
//! - **Server**: Tokio accept loop with a per-connection idle deadline
//! - **Kill Switch**: Every connection exit drops intensity to zero
//!
//! ## Flow
//!
//! ```text
//! GAME CLIENT                         NODE                     CONTROLLER
//!     │                                │                           │
//!     │─── Hello ─────────────────────►│ SessionManager            │
//!     │─── Heartbeat (seq, tag) ──────►│ Dispatcher                │
//!     │                                │──── set_intensity(x) ────►│
//!     │◄── Acknowledgment ─────────────│                           │
//!     │─── Event (tag) ───────────────►│──── apply_bonus(1.2) ────►│
//!     │                                │                           │
//!     ╳ close / timeout                │──── set_intensity(0) ────►│
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use shankpit_ipc::{ChannelController, NodeConfig, NodeServer};
//!
//! let config = NodeConfig::load("config/node.toml")?;
//! let (controller, commands) = ChannelController::new(config.command_buffer);
//! let server = NodeServer::bind(config, controller)?;
//! server.run(shutdown).await?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod client;
pub mod config;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod policy;
pub mod protocol;
pub mod server;
pub mod session;
pub mod stats;

use std::time::Duration;

pub use client::NodeClient;
pub use config::NodeConfig;
pub use controller::{ChannelController, ControlCommand, ResourceController, MIN_INTENSITY};
pub use dispatch::{Dispatcher, Outcome};
pub use error::{ConnectionError, FrameError, HandshakeError, NodeError, NodeResult};
pub use policy::{IntensityPolicy, PolicyConfig};
pub use server::NodeServer;
pub use session::{KeyDerivation, NonceKeyDerivation, Session, SessionLease, SessionManager};
pub use stats::{NodeStats, StatsSnapshot};

/// Default control socket path.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/shankpit_miner.sock";

/// Default idle deadline for socket reads.
///
/// A client that goes silent for this long is treated as gone.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(3);

/// Default upper bound on a single frame, header included.
pub const MAX_FRAME_SIZE: usize = 2048;
