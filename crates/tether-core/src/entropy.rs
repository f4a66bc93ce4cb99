//! Entropy injection.
//!
//! Protocol logic never reaches for a global RNG: key material comes through
//! this trait so tests can pin it to a seed and production can pull from the
//! OS pool. The session takes the entropy source at construction and draws
//! from it once per connect.

use rand::rngs::OsRng;
use rand::RngCore;

/// A source of random bytes.
///
/// Production implementations must be cryptographically secure: the bytes
/// become the session's key-exchange private key. Deterministic
/// implementations belong in test harnesses only.
pub trait Entropy {
    /// Fill `buf` with random bytes.
    fn fill_bytes(&mut self, buf: &mut [u8]);
}

/// Entropy from the operating system pool.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsEntropy;

impl Entropy for OsEntropy {
    fn fill_bytes(&mut self, buf: &mut [u8]) {
        OsRng.fill_bytes(buf);
    }
}
