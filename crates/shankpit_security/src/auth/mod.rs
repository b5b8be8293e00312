//! # Message Authentication
//!
//! HMAC-SHA256 integrity tags over frame bodies.
//!
//! ## Philosophy
//!
//! A tag mismatch is not noise. The local socket does not corrupt bytes, so
//! a bad tag means someone is writing frames without the session key. The
//! caller treats it as active tampering.

use std::fmt;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Size of an authentication tag in bytes.
pub const TAG_SIZE: usize = 32;

/// Size of a session key in bytes.
pub const KEY_SIZE: usize = 32;

/// Secret bound to one session at handshake time.
///
/// There is no way to mutate a key after construction.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey([u8; KEY_SIZE]);

impl SessionKey {
    /// Wraps raw key material.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw key material.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(<redacted>)")
    }
}

/// Symmetric integrity check over message bodies.
#[derive(Clone, Copy, Debug, Default)]
pub struct MessageAuthenticator;

impl MessageAuthenticator {
    /// Creates an authenticator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes the tag for `body` under `key`.
    #[must_use]
    pub fn sign(&self, body: &[u8], key: &SessionKey) -> [u8; TAG_SIZE] {
        let mut mac = keyed_mac(key);
        mac.update(body);
        let mut tag = [0u8; TAG_SIZE];
        tag.copy_from_slice(&mac.finalize().into_bytes());
        tag
    }

    /// Returns true iff `tag` is the tag of `body` under `key`.
    ///
    /// The comparison is constant time. Tags of the wrong length never
    /// verify.
    #[must_use]
    pub fn verify(&self, body: &[u8], tag: &[u8], key: &SessionKey) -> bool {
        if tag.len() != TAG_SIZE {
            return false;
        }
        let expected = self.sign(body, key);
        expected.ct_eq(tag).into()
    }
}

fn keyed_mac(key: &SessionKey) -> HmacSha256 {
    // HMAC accepts keys of any length; a 32-byte key cannot be rejected.
    match HmacSha256::new_from_slice(key.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC-SHA256 accepts keys of any length"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SessionKey {
        let mut bytes = [0u8; KEY_SIZE];
        bytes[..8].copy_from_slice(&0xDEAD_BEEF_u64.to_le_bytes());
        SessionKey::from_bytes(bytes)
    }

    #[test]
    fn test_sign_then_verify() {
        let auth = MessageAuthenticator::new();
        let body = b"seq=1 fps=60 entropy=0.7";
        let tag = auth.sign(body, &key());

        assert!(auth.verify(body, &tag, &key()));
    }

    #[test]
    fn test_any_bit_flip_fails() {
        let auth = MessageAuthenticator::new();
        let body: Vec<u8> = (0u8..38).collect();
        let tag = auth.sign(&body, &key());

        for byte in 0..body.len() {
            for bit in 0..8 {
                let mut tampered = body.clone();
                tampered[byte] ^= 1 << bit;
                assert!(!auth.verify(&tampered, &tag, &key()));
            }
        }

        for byte in 0..TAG_SIZE {
            for bit in 0..8 {
                let mut tampered = tag;
                tampered[byte] ^= 1 << bit;
                assert!(!auth.verify(&body, &tampered, &key()));
            }
        }
    }

    #[test]
    fn test_wrong_key_fails() {
        let auth = MessageAuthenticator::new();
        let tag = auth.sign(b"body", &key());

        assert!(!auth.verify(b"body", &tag, &SessionKey::from_bytes([7; KEY_SIZE])));
    }

    #[test]
    fn test_truncated_tag_fails() {
        let auth = MessageAuthenticator::new();
        let tag = auth.sign(b"body", &key());

        assert!(!auth.verify(b"body", &tag[..16], &key()));
    }

    #[test]
    fn test_debug_redacts_key() {
        assert_eq!(format!("{:?}", key()), "SessionKey(<redacted>)");
    }
}
