//! # Session Management
//!
//! Binds one game-client process to the node.
//!
//! ## Lifecycle
//!
//! ```text
//! Hello frame ──► SessionManager::handshake ──► SessionLease (owned by the
//!                        │                       connection task)
//!                        │                              │
//!                 slot occupied? ──► SessionActive      │ drop
//!                                                       ▼
//!                                             active flag cleared,
//!                                             slot released
//! ```
//!
//! At most one session is active per node. A second handshake while one is
//! active is rejected rather than displacing the bound client.
//!
//! ## Key Derivation
//!
//! [`NonceKeyDerivation`] derives the key from the client nonce alone. An
//! observer of the handshake learns the key, so it authenticates nothing
//! against a local attacker that can read the socket. It exists so the
//! integrity pipeline has a key to run against; a real attested exchange
//! replaces it through [`KeyDerivation`].

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use shankpit_security::{auth::KEY_SIZE, SequenceCursor, SessionKey};

use crate::error::{FrameError, HandshakeError};
use crate::protocol::{Frame, Hello, Opcode, HELLO_FRAME_LEN};

/// Derives the session key from a client Hello.
pub trait KeyDerivation: Send + Sync {
    /// Returns the key both sides will sign frames with.
    fn derive(&self, hello: &Hello) -> SessionKey;
}

/// Placeholder derivation: nonce (little-endian) in the first 8 bytes,
/// zeroes after.
#[derive(Clone, Copy, Debug, Default)]
pub struct NonceKeyDerivation;

impl KeyDerivation for NonceKeyDerivation {
    fn derive(&self, hello: &Hello) -> SessionKey {
        let mut key = [0u8; KEY_SIZE];
        key[..8].copy_from_slice(&hello.nonce.to_le_bytes());
        SessionKey::from_bytes(key)
    }
}

/// One authenticated client binding.
#[derive(Debug)]
pub struct Session {
    pid: u32,
    build_hash: u32,
    nonce: u64,
    client_timestamp: u64,
    key: SessionKey,
    cursor: SequenceCursor,
    created_at: Instant,
    active: AtomicBool,
}

impl Session {
    fn new(hello: &Hello, key: SessionKey) -> Self {
        Self {
            pid: hello.pid,
            build_hash: hello.build_hash,
            nonce: hello.nonce,
            client_timestamp: hello.timestamp,
            key,
            cursor: SequenceCursor::new(),
            created_at: Instant::now(),
            active: AtomicBool::new(true),
        }
    }

    /// Client process id.
    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    /// Client build hash from the Hello.
    #[must_use]
    pub const fn build_hash(&self) -> u32 {
        self.build_hash
    }

    /// Client nonce from the Hello.
    #[must_use]
    pub const fn nonce(&self) -> u64 {
        self.nonce
    }

    /// Client clock from the Hello.
    #[must_use]
    pub const fn client_timestamp(&self) -> u64 {
        self.client_timestamp
    }

    /// Session key.
    #[must_use]
    pub const fn key(&self) -> &SessionKey {
        &self.key
    }

    /// Replay cursor.
    #[must_use]
    pub const fn cursor(&self) -> &SequenceCursor {
        &self.cursor
    }

    /// Time since the handshake.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// False once the owning connection has closed.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }
}

/// Performs handshakes and guards the single session slot.
///
/// Cheap to clone; clones share the slot.
#[derive(Clone)]
pub struct SessionManager {
    slot: Arc<Mutex<Option<u32>>>,
    derivation: Arc<dyn KeyDerivation>,
}

impl SessionManager {
    /// Creates a manager with the placeholder key derivation.
    #[must_use]
    pub fn new() -> Self {
        Self::with_key_derivation(NonceKeyDerivation)
    }

    /// Creates a manager with a custom key derivation.
    #[must_use]
    pub fn with_key_derivation(derivation: impl KeyDerivation + 'static) -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
            derivation: Arc::new(derivation),
        }
    }

    /// Establishes a session from the first frame of a connection.
    pub fn handshake(&self, raw: &[u8]) -> Result<SessionLease, HandshakeError> {
        if raw.len() < HELLO_FRAME_LEN {
            return Err(FrameError::TooShort {
                expected: HELLO_FRAME_LEN,
                actual: raw.len(),
            }
            .into());
        }

        let frame = Frame::parse(raw)?;
        if frame.header.opcode() != Some(Opcode::Hello) {
            return Err(HandshakeError::UnexpectedOpcode(frame.header.opcode));
        }
        let hello = Hello::decode(frame.payload)?;

        let mut slot = self.slot.lock();
        if let Some(pid) = *slot {
            return Err(HandshakeError::SessionActive { pid });
        }
        *slot = Some(hello.pid);
        drop(slot);

        let session = Session::new(&hello, self.derivation.derive(&hello));
        tracing::info!(
            pid = hello.pid,
            build_hash = hello.build_hash,
            "secure session established"
        );

        Ok(SessionLease {
            session,
            slot: Arc::clone(&self.slot),
        })
    }

    /// Process id of the active session, if any.
    #[must_use]
    pub fn active_pid(&self) -> Option<u32> {
        *self.slot.lock()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("active_pid", &self.active_pid())
            .finish_non_exhaustive()
    }
}

/// Ownership of the active session.
///
/// Dropping the lease deactivates the session and frees the slot.
#[derive(Debug)]
pub struct SessionLease {
    session: Session,
    slot: Arc<Mutex<Option<u32>>>,
}

impl Deref for SessionLease {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.session
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.session.deactivate();
        let mut slot = self.slot.lock();
        if *slot == Some(self.session.pid) {
            *slot = None;
        }
        drop(slot);
        tracing::info!(
            pid = self.session.pid,
            age_ms = u64::try_from(self.session.age().as_millis()).unwrap_or(u64::MAX),
            "session released"
        );
    }
}
