//! # Tether harness
//!
//! Deterministic test environment for the tether client stack. The core
//! crates take their side effects through two seams — a transport and an
//! entropy source — and this crate supplies both in a form tests fully
//! control:
//!
//! - [`SimEntropy`]: ChaCha20 stream from a fixed seed, so key exchanges
//!   are reproducible byte for byte
//! - [`link::sim_link`]: an in-memory chunk pipe with a scriptable break
//! - [`relay::RelayDouble`]: the server's half of the protocol, with
//!   scriptable resume replies
//! - [`fixture`]: compiled-bundle bytes for a small RPC surface
//!
//! Every end-to-end scenario in `tests/` runs the real session, client,
//! and codec; only the world around them is simulated.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod fixture;
pub mod link;
pub mod relay;

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use tether_core::Entropy;

pub use link::{sim_link, SimPeer, SimSocket};
pub use relay::{RelayDouble, ResumeRecord};

/// Route `tracing` output through the test writer so `--nocapture` shows
/// protocol transitions. Safe to call from every test; only the first call
/// installs anything.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Seeded entropy: the same seed yields the same key material.
pub struct SimEntropy {
    rng: ChaCha20Rng,
}

impl SimEntropy {
    /// Entropy derived from `seed`.
    #[must_use]
    pub fn from_seed(seed: u64) -> Self {
        Self { rng: ChaCha20Rng::seed_from_u64(seed) }
    }
}

impl Entropy for SimEntropy {
    fn fill_bytes(&mut self, buf: &mut [u8]) {
        rand::RngCore::fill_bytes(&mut self.rng, buf);
    }
}
