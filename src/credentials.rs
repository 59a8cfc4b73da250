//! Credential storage: salted password hashes, verification, and rotation.
//!
//! Credentials live in a single shared `users.json` blob mapping username to
//! record. A user's stored password hash doubles as the input to their data
//! encryption key, so [CredentialStore::change_password] must re-encrypt all
//! of the user's blobs before the new hash is committed; committing first
//! would leave the blobs unreadable forever.

use std::{collections::BTreeMap, fmt::Display, sync::Arc};

use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use time::OffsetDateTime;
use zxcvbn::{Score, feedback::Feedback, zxcvbn};

use crate::{
    Error, config::AppConfig, store::BlobStore, user_data::UserDataStore, vault,
    vault::EncryptionKey,
};

/// The storage path of the shared credential blob.
pub(crate) const USERS_PATH: &str = "data/users.json";

/// The PBKDF2 iteration count for password hashing.
pub const PASSWORD_HASH_ROUNDS: u32 = 100_000;

/// Random salt bytes generated per hash.
const SALT_LEN: usize = 16;

/// The fixed width of the hex salt prefix in a stored hash.
const SALT_HEX_LEN: usize = 2 * SALT_LEN;

/// Usernames that can never be registered.
const RESERVED_USERNAMES: &[&str] = &["guest"];

/// A password that has been checked for strength, but not yet hashed.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedPassword(String);

impl ValidatedPassword {
    /// Create and validate a new password from a string.
    ///
    /// # Errors
    ///
    /// Returns [Error::TooWeak] if the password is considered too easy to
    /// guess; the message explains why and suggests how to strengthen it.
    pub fn new(raw_password: &str) -> Result<Self, Error> {
        let analysis = zxcvbn(raw_password, &[]);

        match analysis.score() {
            Score::Three | Score::Four => Ok(Self(raw_password.to_owned())),
            _ => Err(Error::TooWeak(
                analysis
                    .feedback()
                    .unwrap_or(&Feedback::default())
                    .to_string(),
            )),
        }
    }

    fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ValidatedPassword {
    // Passwords must never end up in logs.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", str::repeat("*", 8))
    }
}

/// Hash a password with a fresh random salt.
///
/// The result is one string: 32 hex characters of salt followed by 64 hex
/// characters of PBKDF2-HMAC-SHA256 output.
pub fn hash_password(password: &str) -> String {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    let salt_hex = hex::encode(salt);

    let mut derived = [0u8; 32];
    pbkdf2_hmac::<Sha256>(
        password.as_bytes(),
        salt_hex.as_bytes(),
        PASSWORD_HASH_ROUNDS,
        &mut derived,
    );

    format!("{salt_hex}{}", hex::encode(derived))
}

/// Verify a candidate password against a stored salted hash.
pub fn verify_password(stored: &str, candidate: &str) -> bool {
    if stored.len() <= SALT_HEX_LEN || !stored.is_ascii() {
        return false;
    }

    let (salt_hex, stored_hash) = stored.split_at(SALT_HEX_LEN);

    let mut derived = [0u8; 32];
    pbkdf2_hmac::<Sha256>(
        candidate.as_bytes(),
        salt_hex.as_bytes(),
        PASSWORD_HASH_ROUNDS,
        &mut derived,
    );
    let computed = hex::encode(derived);

    // Compared without early exit so the comparison itself leaks nothing
    // about the position of the first mismatch.
    computed.len() == stored_hash.len()
        && computed
            .bytes()
            .zip(stored_hash.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

/// One user's entry in the credential blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// The salted password hash, salt prefix first.
    #[serde(rename = "password")]
    pub password_hash: String,

    /// When the account was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    /// When the password was last changed, if ever.
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub password_changed_at: Option<OffsetDateTime>,

    /// Whether this account's blobs are encrypted at rest.
    ///
    /// Set at account creation. `false` only for the administrative account,
    /// whose data is shared demo content.
    #[serde(default = "default_encrypt_at_rest")]
    pub encrypt_at_rest: bool,
}

fn default_encrypt_at_rest() -> bool {
    true
}

impl CredentialRecord {
    /// Derive the encryption key for this account's data.
    pub fn encryption_key(&self, username: &str) -> EncryptionKey {
        vault::derive_key(username, &self.password_hash)
    }
}

/// The credential blob: username to record, in a stable order.
pub(crate) type CredentialFile = BTreeMap<String, CredentialRecord>;

/// The phases of a password change.
///
/// `ReKeying` failures roll the operation back to `Unchanged`: the stored
/// hash is only replaced once every blob is readable under the new key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PasswordChangePhase {
    Verifying,
    ReKeying,
    Committing,
}

/// Stores, verifies, and rotates user credentials.
#[derive(Clone)]
pub struct CredentialStore {
    store: Arc<dyn BlobStore>,
    config: Arc<AppConfig>,
}

impl CredentialStore {
    /// Create a credential store over a storage backend.
    pub fn new(store: Arc<dyn BlobStore>, config: Arc<AppConfig>) -> Self {
        Self { store, config }
    }

    /// Load the credential file, or an empty one if none has been written.
    pub(crate) fn load(&self) -> Result<CredentialFile, Error> {
        match self.store.get(USERS_PATH)? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|error| Error::Serialization(error.to_string())),
            None => Ok(CredentialFile::new()),
        }
    }

    fn save(&self, file: &CredentialFile) -> Result<(), Error> {
        let json = serde_json::to_string_pretty(file)
            .map_err(|error| Error::Serialization(error.to_string()))?;

        self.store.put(USERS_PATH, json.as_bytes(), None)?;

        Ok(())
    }

    /// Look up one user's credential record.
    pub fn record(&self, username: &str) -> Result<Option<CredentialRecord>, Error> {
        Ok(self.load()?.get(username).cloned())
    }

    /// Register a new account.
    ///
    /// The username must be non-empty, use only `[A-Za-z0-9_-]`, and not be
    /// reserved or taken; the password must pass the strength check.
    /// Freshly registered accounts are always encrypted at rest.
    pub fn register(&self, username: &str, password: &str) -> Result<CredentialRecord, Error> {
        self.validate_username(username)?;

        let mut file = self.load()?;

        if file.contains_key(username) {
            return Err(Error::UsernameTaken(username.to_owned()));
        }

        let password = ValidatedPassword::new(password)?;

        let record = CredentialRecord {
            password_hash: hash_password(password.as_str()),
            created_at: OffsetDateTime::now_utc(),
            password_changed_at: None,
            encrypt_at_rest: true,
        };

        file.insert(username.to_owned(), record.clone());
        self.save(&file)?;

        tracing::info!("registered new user \"{username}\"");

        Ok(record)
    }

    /// Create the administrative account if it does not exist yet.
    ///
    /// The account is created with encryption at rest disabled: its data is
    /// the shared demo dashboard, not private user content.
    pub fn ensure_admin_account(&self, password: &str) -> Result<(), Error> {
        let username = self.config.admin_username.clone();
        let mut file = self.load()?;

        if file.contains_key(&username) {
            return Ok(());
        }

        let password = ValidatedPassword::new(password)?;

        file.insert(
            username.clone(),
            CredentialRecord {
                password_hash: hash_password(password.as_str()),
                created_at: OffsetDateTime::now_utc(),
                password_changed_at: None,
                encrypt_at_rest: false,
            },
        );
        self.save(&file)?;

        tracing::info!("created administrative account \"{username}\"");

        Ok(())
    }

    /// Check a username/password combination.
    ///
    /// Unknown usernames verify as `false` rather than erroring, so callers
    /// cannot distinguish them from a wrong password.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<bool, Error> {
        Ok(self
            .load()?
            .get(username)
            .is_some_and(|record| verify_password(&record.password_hash, password)))
    }

    /// Change a user's password, re-encrypting all their data.
    ///
    /// The phases are verify → re-key → commit. A failure during re-keying
    /// (or while committing, in which case the re-key is undone) leaves the
    /// stored hash untouched so the user's blobs stay readable under the old
    /// credentials.
    pub fn change_password(
        &self,
        username: &str,
        old_password: &str,
        new_password: &str,
        user_data: &UserDataStore,
    ) -> Result<(), Error> {
        tracing::debug!(
            "password change for \"{username}\": {:?}",
            PasswordChangePhase::Verifying
        );

        let mut file = self.load()?;

        let record = file.get(username).ok_or(Error::InvalidCredentials)?;

        if !verify_password(&record.password_hash, old_password) {
            return Err(Error::InvalidCredentials);
        }

        let new_password = ValidatedPassword::new(new_password)?;
        let new_hash = hash_password(new_password.as_str());

        if record.encrypt_at_rest {
            tracing::debug!(
                "password change for \"{username}\": {:?}",
                PasswordChangePhase::ReKeying
            );

            let old_key = record.encryption_key(username);
            let new_key = vault::derive_key(username, &new_hash);

            user_data.rekey_user_blobs(username, &old_key, &new_key)?;
        }

        tracing::debug!(
            "password change for \"{username}\": {:?}",
            PasswordChangePhase::Committing
        );

        let encrypt_at_rest = record.encrypt_at_rest;
        let old_hash = record.password_hash.clone();

        if let Some(record) = file.get_mut(username) {
            record.password_hash = new_hash.clone();
            record.password_changed_at = Some(OffsetDateTime::now_utc());
        }

        if let Err(error) = self.save(&file) {
            // The blobs are already under the new key but the hash commit
            // failed; undo the re-key so the old credentials keep working.
            tracing::error!(
                "could not commit new password hash for \"{username}\", \
                 undoing re-key: {error}"
            );

            if encrypt_at_rest {
                let old_key = vault::derive_key(username, &old_hash);
                let new_key = vault::derive_key(username, &new_hash);

                if let Err(undo_error) =
                    user_data.rekey_user_blobs(username, &new_key, &old_key)
                {
                    tracing::error!(
                        "could not undo re-key for \"{username}\": {undo_error}"
                    );
                }
            }

            return Err(error);
        }

        tracing::info!("password changed for \"{username}\"");

        Ok(())
    }

    /// Delete a user's credential record.
    ///
    /// # Errors
    ///
    /// Returns [Error::ProtectedAccount] for the administrative account and
    /// [Error::NotFound] for unknown usernames.
    pub fn delete(&self, username: &str) -> Result<(), Error> {
        if username == self.config.admin_username {
            return Err(Error::ProtectedAccount(username.to_owned()));
        }

        let mut file = self.load()?;

        if file.remove(username).is_none() {
            return Err(Error::NotFound);
        }

        self.save(&file)
    }

    fn validate_username(&self, username: &str) -> Result<(), Error> {
        let valid = !username.is_empty()
            && username
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');

        if !valid {
            return Err(Error::InvalidUsername(username.to_owned()));
        }

        if RESERVED_USERNAMES.contains(&username) || username == self.config.admin_username {
            return Err(Error::ReservedUsername(username.to_owned()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod password_hash_tests {
    use super::{SALT_HEX_LEN, hash_password, verify_password};

    #[test]
    fn verify_succeeds_for_the_right_password() {
        let stored = hash_password("asomewhatlongpassword1");

        assert!(verify_password(&stored, "asomewhatlongpassword1"));
    }

    #[test]
    fn verify_fails_for_the_wrong_password() {
        let stored = hash_password("asomewhatlongpassword1");

        assert!(!verify_password(&stored, "thewrongpassword"));
        assert!(!verify_password(&stored, ""));
    }

    #[test]
    fn stored_hashes_are_salted() {
        let first = hash_password("asomewhatlongpassword1");
        let second = hash_password("asomewhatlongpassword1");

        assert_ne!(first, second);
        assert_ne!(first[..SALT_HEX_LEN], second[..SALT_HEX_LEN]);
    }

    #[test]
    fn stored_hashes_have_a_fixed_width_salt_prefix() {
        let stored = hash_password("asomewhatlongpassword1");

        assert_eq!(stored.len(), SALT_HEX_LEN + 64);
        assert!(stored.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn garbage_stored_values_never_verify() {
        assert!(!verify_password("", "password"));
        assert!(!verify_password("tooshort", "password"));
    }
}
