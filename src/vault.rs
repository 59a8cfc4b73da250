//! Key derivation and authenticated encryption for persisted user data.
//!
//! Each user's blobs are encrypted with a key derived from their username
//! and their *stored password hash*, so a password change rotates the key
//! and triggers re-encryption of everything the user owns (see
//! [crate::UserDataStore]). Keys are ephemeral: derived on demand, never
//! persisted.

use std::fmt;

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit},
};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;

use crate::Error;

/// The PBKDF2 iteration count for key derivation.
pub const KEY_DERIVATION_ROUNDS: u32 = 100_000;

/// The fixed salt width the username is padded or truncated to.
const KEY_SALT_LEN: usize = 16;

/// AES-GCM nonce width.
const NONCE_LEN: usize = 12;

/// AES-GCM authentication tag width.
const TAG_LEN: usize = 16;


/// A symmetric key for one user's data at rest.
///
/// Scoped to a single request: derived from the credentials, used, and
/// dropped.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey([u8; 32]);

impl fmt::Debug for EncryptionKey {
    // Key material must never end up in logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptionKey(********)")
    }
}

/// Derive the encryption key for a user's data.
///
/// The salt is the username's UTF-8 bytes, truncated or right-padded with
/// `b'0'` to a fixed 16 bytes; the password-hash string is the key-derivation
/// input. The same `(username, password_hash)` pair always produces the same
/// key, and changing either produces an unrelated key.
pub fn derive_key(username: &str, password_hash: &str) -> EncryptionKey {
    let mut salt = [b'0'; KEY_SALT_LEN];
    let name = username.as_bytes();
    let prefix_len = name.len().min(KEY_SALT_LEN);
    salt[..prefix_len].copy_from_slice(&name[..prefix_len]);

    let mut key = [0u8; 32];
    pbkdf2_hmac::<Sha256>(
        password_hash.as_bytes(),
        &salt,
        KEY_DERIVATION_ROUNDS,
        &mut key,
    );

    EncryptionKey(key)
}

/// Encrypt a plaintext payload into a base64 text blob.
///
/// The blob layout is base64(nonce ‖ ciphertext ‖ tag) with a fresh random
/// nonce per call, so encrypting the same plaintext twice yields different
/// blobs.
///
/// # Errors
///
/// Returns [Error::EncryptionFailed] if the cipher rejects the input.
pub fn encrypt(plaintext: &str, key: &EncryptionKey) -> Result<String, Error> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key.0));

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|_| Error::EncryptionFailed)?;

    let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(&nonce_bytes);
    blob.extend_from_slice(&ciphertext);

    Ok(BASE64.encode(blob))
}

/// Decrypt a blob produced by [encrypt].
///
/// Fails closed: a wrong key, truncated input, or corrupted blob returns
/// [Error::DecryptionFailed], never garbage plaintext.
pub fn decrypt(blob: &str, key: &EncryptionKey) -> Result<String, Error> {
    let bytes = BASE64.decode(blob).map_err(|_| Error::DecryptionFailed)?;

    if bytes.len() < NONCE_LEN + TAG_LEN {
        return Err(Error::DecryptionFailed);
    }

    let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_LEN);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key.0));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| Error::DecryptionFailed)?;

    String::from_utf8(plaintext).map_err(|_| Error::DecryptionFailed)
}

/// Whether stored content looks like an [encrypt] blob rather than legacy
/// plaintext.
///
/// Used to pass pre-encryption data (e.g. a bare `"{}"` default) through
/// unchanged; real payloads contain characters outside the base64 alphabet,
/// so misclassification does not occur in practice. This is a migration
/// heuristic, not a security boundary.
pub fn is_likely_encrypted(content: &str) -> bool {
    if content.len() % 4 != 0 {
        return false;
    }

    // Anything shorter than a nonce plus a tag cannot be a blob; real
    // plaintext payloads (CSV, JSON) fail the base64 decode instead.
    match BASE64.decode(content) {
        Ok(decoded) => decoded.len() >= NONCE_LEN + TAG_LEN,
        Err(_) => false,
    }
}
