use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::Rng;
use sha2::{Digest, Sha256};

/// Number of random bytes behind every session token.
pub const TOKEN_BYTES: usize = 32;

/// Produces unguessable session tokens.
pub trait TokenGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// 32 bytes from the thread-local CSPRNG, URL-safe base64 without padding
/// (always 43 characters).
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomTokenGenerator;

impl TokenGenerator for RandomTokenGenerator {
    fn generate(&self) -> String {
        let mut rng = rand::thread_rng();
        let bytes: [u8; TOKEN_BYTES] = rng.gen();
        URL_SAFE_NO_PAD.encode(bytes)
    }
}

/// Short, non-reversible identifier for a token, safe to put in logs.
pub fn token_fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(&digest[..8])
}
