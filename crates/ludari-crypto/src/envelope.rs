//! The at-rest envelope: base64(IV ‖ salt ‖ ciphertext).
//!
//! Key derivation is PBKDF2-HMAC-SHA256 with a per-encryption 32-byte salt;
//! the cipher is AES-256-CTR with a per-encryption 16-byte IV. Decryption
//! failures collapse into one opaque error so callers cannot distinguish a
//! wrong secret from a corrupt envelope.

use aes::cipher::{KeyIvInit, StreamCipher};
use aes::Aes256;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;

use crate::{CryptoError, Result};

type Aes256Ctr = ctr::Ctr128BE<Aes256>;

const IV_LEN: usize = 16;
const SALT_LEN: usize = 32;
const KEY_LEN: usize = 32;
const PBKDF2_ROUNDS: u32 = 100_000;

fn derive_key(secret: &str, salt: &[u8]) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(secret.as_bytes(), salt, PBKDF2_ROUNDS, &mut key);
    key
}

/// Encrypt `plaintext` under `secret`, emitting the base64 envelope.
///
/// Two calls with identical inputs produce distinct envelopes: the IV and
/// salt are drawn fresh from the OS random source every time.
pub fn encrypt(plaintext: &str, secret: &str) -> String {
    let mut iv = [0u8; IV_LEN];
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut iv);
    OsRng.fill_bytes(&mut salt);

    let key = derive_key(secret, &salt);
    let mut body = plaintext.as_bytes().to_vec();
    let mut cipher = Aes256Ctr::new(&key.into(), &iv.into());
    cipher.apply_keystream(&mut body);

    let mut envelope = Vec::with_capacity(IV_LEN + SALT_LEN + body.len());
    envelope.extend_from_slice(&iv);
    envelope.extend_from_slice(&salt);
    envelope.extend_from_slice(&body);
    BASE64.encode(envelope)
}

/// Open a base64 envelope produced by [`encrypt`].
pub fn decrypt(envelope: &str, secret: &str) -> Result<String> {
    let raw = BASE64
        .decode(envelope.trim())
        .map_err(|_| CryptoError::DecryptFailed)?;
    if raw.len() < IV_LEN + SALT_LEN {
        return Err(CryptoError::DecryptFailed);
    }

    let (iv, rest) = raw.split_at(IV_LEN);
    let (salt, body) = rest.split_at(SALT_LEN);

    let key = derive_key(secret, salt);
    let iv: [u8; IV_LEN] = iv.try_into().map_err(|_| CryptoError::DecryptFailed)?;
    let mut plain = body.to_vec();
    let mut cipher = Aes256Ctr::new(&key.into(), &iv.into());
    cipher.apply_keystream(&mut plain);

    String::from_utf8(plain).map_err(|_| CryptoError::DecryptFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "Aa1!Aa1!Aa1!Aa1!Aa1!Aa1!Aa1!Aa1!";

    #[test]
    fn round_trip_restores_plaintext() {
        let envelope = encrypt("SELECT 1", SECRET);
        assert_eq!(decrypt(&envelope, SECRET).unwrap(), "SELECT 1");
    }

    #[test]
    fn envelope_hides_the_plaintext() {
        let envelope = encrypt("SELECT 1", SECRET);
        let raw = BASE64.decode(&envelope).unwrap();
        // 16-byte IV + 32-byte salt + at least one ciphertext byte
        assert!(raw.len() >= 49);
        let haystack = String::from_utf8_lossy(&raw);
        assert!(!haystack.contains("SELECT 1"));
    }

    #[test]
    fn successive_encryptions_differ() {
        let a = encrypt("SELECT 1", SECRET);
        let b = encrypt("SELECT 1", SECRET);
        assert_ne!(a, b);
        assert_eq!(decrypt(&a, SECRET).unwrap(), decrypt(&b, SECRET).unwrap());
    }

    #[test]
    fn wrong_secret_fails_opaquely() {
        let envelope = encrypt("SELECT 1", SECRET);
        let err = decrypt(&envelope, "Bb2@Bb2@Bb2@Bb2@Bb2@Bb2@Bb2@Bb2@");
        // CTR decrypts to garbage under the wrong key; it either fails UTF-8
        // validation or yields bytes that are not the plaintext.
        match err {
            Err(CryptoError::DecryptFailed) => {}
            Ok(s) => assert_ne!(s, "SELECT 1"),
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn truncated_envelope_fails_opaquely() {
        assert!(matches!(
            decrypt("AAAA", SECRET),
            Err(CryptoError::DecryptFailed)
        ));
        assert!(matches!(
            decrypt("not base64 at all!!", SECRET),
            Err(CryptoError::DecryptFailed)
        ));
    }

    #[test]
    fn empty_plaintext_round_trips() {
        let envelope = encrypt("", SECRET);
        assert_eq!(decrypt(&envelope, SECRET).unwrap(), "");
    }
}
