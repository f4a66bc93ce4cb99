//! Cryptographic primitives for session resumption.
//!
//! The handshake runs a Diffie-Hellman exchange over the RFC 3526 group 14
//! (2048-bit MODP) parameters; the resulting 32-byte shared secret never
//! crosses the wire and later authenticates reconnect attempts through an
//! HMAC-MD5 over the MD5 of the reconnect preamble. The double hash is a
//! protocol quirk the server expects; it is reproduced here exactly.
//!
//! MD5 survives for wire compatibility only: it authenticates resumption
//! inside an already-established shared secret and is not relied on as a
//! collision-resistant hash of attacker-controlled input.

use std::sync::LazyLock;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use num_bigint::BigUint;
use num_traits::One;
use thiserror::Error;

use crate::entropy::Entropy;

/// Width of a serialized public key: the group modulus is 2048 bits.
pub const DH_PUBLIC_LEN: usize = 256;

/// Width of the private exponent drawn from entropy.
pub const DH_PRIVATE_LEN: usize = 32;

/// Width of the derived shared secret.
pub const SHARED_SECRET_LEN: usize = 32;

/// RFC 3526 group 14 generator.
const GENERATOR: u32 = 2;

/// RFC 3526 group 14 prime (2048-bit MODP).
static MODP_2048: LazyLock<BigUint> = LazyLock::new(|| {
    let hex = b"\
FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74\
020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F1437\
4FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3DC2007CB8A163BF05\
98DA48361C55D39A69163FA8FD24CF5F83655D23DCA3AD961C62F356208552BB\
9ED529077096966D670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B\
E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF695581718\
3995497CEA956AE515D2261898FA051015728E5A8AACAA68FFFFFFFFFFFFFFFF";
    BigUint::parse_bytes(hex, 16).unwrap_or_else(|| unreachable!("constant parses"))
});

/// Key-exchange failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyExchangeError {
    /// The peer sent a degenerate public key (0 or 1), which would fix the
    /// shared secret to a known value
    #[error("degenerate peer public key")]
    DegeneratePeerKey,
}

/// A Diffie-Hellman private exponent.
///
/// Generated once per connect from the injected [`Entropy`] source; the
/// corresponding public value travels in the handshake and the shared secret
/// derived against the server's public value authenticates later resumes.
pub struct DhKey {
    private: BigUint,
}

impl DhKey {
    /// Draw a fresh private exponent.
    pub fn generate(entropy: &mut dyn Entropy) -> Self {
        let mut bytes = [0u8; DH_PRIVATE_LEN];
        entropy.fill_bytes(&mut bytes);
        Self { private: BigUint::from_bytes_be(&bytes) }
    }

    /// `g^x mod p` as a fixed-width big-endian array.
    #[must_use]
    pub fn public_bytes(&self) -> [u8; DH_PUBLIC_LEN] {
        let public = BigUint::from(GENERATOR).modpow(&self.private, &MODP_2048);
        left_pad(&public.to_bytes_be())
    }

    /// Derive the shared secret against the peer's public value.
    ///
    /// The secret is the leading [`SHARED_SECRET_LEN`] bytes of the
    /// fixed-width `peer^x mod p`.
    ///
    /// # Errors
    ///
    /// Returns [`KeyExchangeError::DegeneratePeerKey`] for public values 0
    /// and 1.
    pub fn shared_secret(
        &self,
        peer_public: &[u8],
    ) -> Result<[u8; SHARED_SECRET_LEN], KeyExchangeError> {
        let peer = BigUint::from_bytes_be(peer_public);
        if peer <= BigUint::one() {
            return Err(KeyExchangeError::DegeneratePeerKey);
        }
        let shared = peer.modpow(&self.private, &MODP_2048);
        let full = left_pad(&shared.to_bytes_be());
        let mut secret = [0u8; SHARED_SECRET_LEN];
        secret.copy_from_slice(&full[..SHARED_SECRET_LEN]);
        Ok(secret)
    }
}

impl std::fmt::Debug for DhKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the exponent.
        f.debug_struct("DhKey").finish_non_exhaustive()
    }
}

fn left_pad(bytes: &[u8]) -> [u8; DH_PUBLIC_LEN] {
    debug_assert!(bytes.len() <= DH_PUBLIC_LEN);
    let mut out = [0u8; DH_PUBLIC_LEN];
    out[DH_PUBLIC_LEN - bytes.len()..].copy_from_slice(bytes);
    out
}

/// MD5 digest.
#[must_use]
pub fn md5(data: &[u8]) -> [u8; 16] {
    Md5::digest(data).into()
}

/// HMAC-MD5 with the standard 64-byte block size.
#[must_use]
pub fn hmac_md5(key: &[u8], data: &[u8]) -> [u8; 16] {
    let mut mac = Hmac::<Md5>::new_from_slice(key)
        .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// The reconnect authenticator: `HMAC-MD5(secret, MD5(content))`.
///
/// The HMAC input is the 16-byte digest of the content, not the content
/// itself. The server computes the same composition; both sides must agree
/// byte for byte.
#[must_use]
pub fn resume_mac(secret: &[u8], content: &[u8]) -> [u8; 16] {
    hmac_md5(secret, &md5(content))
}

/// Standard-alphabet base64 with padding, as the handshake carries it.
#[must_use]
pub fn b64_encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decode standard-alphabet base64. `None` on malformed input.
#[must_use]
pub fn b64_decode(text: &str) -> Option<Vec<u8>> {
    STANDARD.decode(text).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedEntropy(Vec<u8>);

    impl Entropy for FixedEntropy {
        fn fill_bytes(&mut self, buf: &mut [u8]) {
            buf.copy_from_slice(&self.0[..buf.len()]);
        }
    }

    #[test]
    fn md5_known_vector() {
        let digest = md5(b"abc");
        assert_eq!(
            digest,
            [
                0x90, 0x01, 0x50, 0x98, 0x3c, 0xd2, 0x4f, 0xb0, 0xd6, 0x96, 0x3f, 0x7d, 0x28,
                0xe1, 0x7f, 0x72
            ]
        );
    }

    #[test]
    fn hmac_md5_rfc2202_vector() {
        let mac = hmac_md5(&[0x0b; 16], b"Hi There");
        assert_eq!(
            mac,
            [
                0x92, 0x94, 0x72, 0x7a, 0x36, 0x38, 0xbb, 0x1c, 0x13, 0xf4, 0x8e, 0xf8, 0x15,
                0x8b, 0xfc, 0x9d
            ]
        );
    }

    #[test]
    fn resume_mac_hashes_content_first() {
        let secret = [0x42u8; 32];
        let content = b"7\n3\n1000\n";
        assert_eq!(resume_mac(&secret, content), hmac_md5(&secret, &md5(content)));
        assert_ne!(resume_mac(&secret, content), hmac_md5(&secret, content));
    }

    #[test]
    fn base64_standard_alphabet() {
        assert_eq!(b64_encode(&[0, 1, 2]), "AAEC");
        assert_eq!(b64_decode("AAEC"), Some(vec![0, 1, 2]));
        assert_eq!(b64_encode(b"ab"), "YWI=");
        assert_eq!(b64_decode("not base64!"), None);
    }

    #[test]
    fn public_key_is_fixed_width() {
        let key = DhKey::generate(&mut FixedEntropy(vec![0x01; 32]));
        let public = key.public_bytes();
        assert_eq!(public.len(), DH_PUBLIC_LEN);
        // The group element is far larger than 1, so high bytes are set
        // somewhere; the trivial exponent check below pins the layout.
        let one = DhKey { private: BigUint::one() };
        let mut expected = [0u8; DH_PUBLIC_LEN];
        expected[DH_PUBLIC_LEN - 1] = 2;
        assert_eq!(one.public_bytes(), expected);
    }

    #[test]
    fn shared_secret_agrees() {
        let a = DhKey::generate(&mut FixedEntropy((1u8..=32).collect()));
        let b = DhKey::generate(&mut FixedEntropy((100u8..132).collect()));

        let secret_a = a.shared_secret(&b.public_bytes()).unwrap();
        let secret_b = b.shared_secret(&a.public_bytes()).unwrap();
        assert_eq!(secret_a, secret_b);
        assert_eq!(secret_a.len(), SHARED_SECRET_LEN);
    }

    #[test]
    fn degenerate_peer_keys_rejected() {
        let key = DhKey::generate(&mut FixedEntropy(vec![0x07; 32]));
        assert_eq!(key.shared_secret(&[0u8; 256]), Err(KeyExchangeError::DegeneratePeerKey));
        let mut one = [0u8; 256];
        one[255] = 1;
        assert_eq!(key.shared_secret(&one), Err(KeyExchangeError::DegeneratePeerKey));
    }
}
