//! # SHANKPIT Security - The Gatekeeper
//!
//! Verification primitives applied to every frame the game client sends
//! over the local control socket.
//!
//! ## Features
//!
//! - **Message Authentication**: HMAC-SHA256 tags checked in constant time
//! - **Replay Protection**: Strictly monotonic per-session sequence cursor
//! - **Anomaly Detection**: Static input, uniform frame timing and looped
//!   entropy reports are scored as zero
//!
//! ## Pipeline
//!
//! ```text
//! GAME CLIENT                      NODE
//!     │                              │
//!     │─── Heartbeat + HMAC ────────►│ MessageAuthenticator
//!     │                              │        │
//!     │                              │        ▼
//!     │                              │ ReplayGuard (seq > last?)
//!     │                              │        │
//!     │                              │        ▼
//!     │                              │ AnomalyDetector (score)
//!     │                              │        │
//!     │                              │        ▼
//!     │                              │ IntensityPolicy (shankpit_ipc)
//! ```
//!
//! Nothing in this crate performs I/O. State is owned by whoever owns the
//! connection, so every primitive here is connection-scoped.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod auth;
pub mod entropy;
pub mod replay;

pub use auth::{MessageAuthenticator, SessionKey, TAG_SIZE};
pub use entropy::{AnomalyDetector, DetectorConfig, TelemetryHistory, Verdict};
pub use replay::{Admission, ReplayGuard, SequenceCursor};
