use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const SHA256_BLOCK_BYTES: usize = 64;
const NONCE_BYTES: usize = 16;

/// An export payload wrapped with a nonce and an HMAC-SHA256 signature over
/// `nonce || payload`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedPayload {
    pub payload: String,
    pub nonce: String,
    pub signature: String,
}

/// Signs and verifies export payloads with a shared secret.
pub struct PayloadSigner {
    secret: Vec<u8>,
}

impl PayloadSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    pub fn sign(&self, payload: &str) -> SignedPayload {
        let mut nonce_bytes = [0u8; NONCE_BYTES];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = URL_SAFE_NO_PAD.encode(nonce_bytes);
        let signature = self.signature_for(&nonce, payload);
        SignedPayload {
            payload: payload.to_string(),
            nonce,
            signature,
        }
    }

    pub fn verify(&self, signed: &SignedPayload) -> bool {
        let expected = self.signature_for(&signed.nonce, &signed.payload);
        constant_time_eq(expected.as_bytes(), signed.signature.as_bytes())
    }

    fn signature_for(&self, nonce: &str, payload: &str) -> String {
        let mut message = Vec::with_capacity(nonce.len() + payload.len());
        message.extend_from_slice(nonce.as_bytes());
        message.extend_from_slice(payload.as_bytes());
        STANDARD.encode(hmac_sha256(&self.secret, &message))
    }
}

/// HMAC-SHA256 from the hash primitive. Keys longer than the block size are
/// hashed down first, per RFC 2104.
fn hmac_sha256(key: &[u8], message: &[u8]) -> [u8; 32] {
    let mut key_block = [0u8; SHA256_BLOCK_BYTES];
    if key.len() > SHA256_BLOCK_BYTES {
        key_block[..32].copy_from_slice(&Sha256::digest(key));
    } else {
        key_block[..key.len()].copy_from_slice(key);
    }

    let mut inner = Sha256::new();
    let ipad: Vec<u8> = key_block.iter().map(|b| b ^ 0x36).collect();
    inner.update(&ipad);
    inner.update(message);
    let inner_hash = inner.finalize();

    let mut outer = Sha256::new();
    let opad: Vec<u8> = key_block.iter().map(|b| b ^ 0x5c).collect();
    outer.update(&opad);
    outer.update(inner_hash);
    outer.finalize().into()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
