//! Encrypted access to each user's persisted ledger and category blobs.
//!
//! Every read and write goes through an ownership check against the request
//! session and, for accounts with encryption at rest, through the vault.
//! Access to someone else's data reports "absent" rather than "forbidden" so
//! responses never confirm whether the data exists.

use std::sync::Arc;

use crate::{
    Error,
    auth::Session,
    category::CategoryStore,
    config::AppConfig,
    credentials::CredentialStore,
    store::BlobStore,
    transaction::Ledger,
    vault::{EncryptionKey, decrypt, encrypt, is_likely_encrypted},
};

/// The administrative account's well-known ledger path.
const ADMIN_LEDGER_PATH: &str = "data/dataframes/main_dataframe.csv";

/// The administrative account's well-known category path.
const ADMIN_CATEGORIES_PATH: &str = "data/categories/categories.json";

/// Reads and writes the per-user ledger and category blobs.
#[derive(Clone)]
pub struct UserDataStore {
    store: Arc<dyn BlobStore>,
    config: Arc<AppConfig>,
}

impl UserDataStore {
    /// Create a user-data store over a storage backend.
    pub fn new(store: Arc<dyn BlobStore>, config: Arc<AppConfig>) -> Self {
        Self { store, config }
    }

    /// The storage path of a user's ledger blob.
    pub fn ledger_path(&self, username: &str) -> String {
        if username == self.config.admin_username {
            ADMIN_LEDGER_PATH.to_owned()
        } else {
            format!("data/dataframes/{username}_dataframe.csv")
        }
    }

    /// The storage path of a user's category blob.
    pub fn categories_path(&self, username: &str) -> String {
        if username == self.config.admin_username {
            ADMIN_CATEGORIES_PATH.to_owned()
        } else {
            format!("data/categories/{username}_categories.json")
        }
    }

    /// Load a user's ledger, or `None` if nothing has been saved yet or the
    /// session may not see it.
    ///
    /// The persisted table carries no currency, so the reloaded ledger is
    /// denominated in the configured fallback currency.
    pub fn load_ledger(&self, session: &Session, username: &str) -> Result<Option<Ledger>, Error> {
        let path = self.ledger_path(username);

        match self.read_blob(session, username, &path)? {
            Some(text) => Ok(Some(Ledger::from_csv(
                &text,
                &self.config.fallback_currency,
            )?)),
            None => Ok(None),
        }
    }

    /// Encrypt (per the owner's policy) and save a user's ledger.
    ///
    /// Returns whether the write happened; a session writing someone else's
    /// ledger is refused as a no-op.
    pub fn save_ledger(
        &self,
        session: &Session,
        username: &str,
        ledger: &Ledger,
    ) -> Result<bool, Error> {
        let path = self.ledger_path(username);

        self.write_blob(session, username, &path, &ledger.to_csv()?)
    }

    /// Load a user's category store, or `None` if nothing has been saved yet
    /// or the session may not see it.
    pub fn load_categories(
        &self,
        session: &Session,
        username: &str,
    ) -> Result<Option<CategoryStore>, Error> {
        let path = self.categories_path(username);

        match self.read_blob(session, username, &path)? {
            Some(text) => serde_json::from_str(&text)
                .map(Some)
                .map_err(|error| Error::Serialization(error.to_string())),
            None => Ok(None),
        }
    }

    /// Encrypt (per the owner's policy) and save a user's category store.
    pub fn save_categories(
        &self,
        session: &Session,
        username: &str,
        categories: &CategoryStore,
    ) -> Result<bool, Error> {
        let path = self.categories_path(username);
        let text = serde_json::to_string_pretty(categories)
            .map_err(|error| Error::Serialization(error.to_string()))?;

        self.write_blob(session, username, &path, &text)
    }

    /// Seed the default category blob for a freshly registered user, so
    /// their first session starts from `{"Uncategorized": []}`.
    pub fn ensure_default_categories(
        &self,
        session: &Session,
        username: &str,
    ) -> Result<(), Error> {
        let path = self.categories_path(username);

        if self.store.get(&path)?.is_none() {
            self.save_categories(session, username, &CategoryStore::new())?;
        }

        Ok(())
    }

    /// Delete a user's ledger and category blobs.
    ///
    /// Failures are collected per file and reported together, so one failed
    /// delete does not leave the other blob around silently.
    pub fn delete_user_data(&self, session: &Session, username: &str) -> Result<(), Error> {
        if !session.can_write(username) {
            tracing::debug!("refusing to delete data of \"{username}\" for {session:?}");
            return Err(Error::NotFound);
        }

        let mut failures = Vec::new();

        for path in [self.ledger_path(username), self.categories_path(username)] {
            if let Err(error) = self.store.delete(&path) {
                failures.push(format!("{path}: {error}"));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::StorageError(failures.join("; ")))
        }
    }

    /// Re-encrypt every blob the user owns from `old_key` to `new_key`.
    ///
    /// Runs in two phases so the operation is all-or-nothing from the user's
    /// point of view. First every blob's plaintext is recovered: encrypted
    /// content is decrypted with the old key, content that fails decryption
    /// but is valid text is taken as legacy plaintext, and anything else
    /// aborts before a single write happens. Then each blob is rewritten
    /// under the new key; if a write fails, blobs already rewritten are
    /// restored to their previous content and the error is returned so the
    /// caller leaves the credential record untouched.
    pub(crate) fn rekey_user_blobs(
        &self,
        username: &str,
        old_key: &EncryptionKey,
        new_key: &EncryptionKey,
    ) -> Result<(), Error> {
        let paths = [self.ledger_path(username), self.categories_path(username)];

        // Phase one: recover plaintext and pre-compute the new blobs without
        // touching storage.
        let mut staged = Vec::new();

        for path in paths {
            let Some(bytes) = self.store.get(&path)? else {
                continue;
            };

            let original = String::from_utf8(bytes).map_err(|_| Error::DecryptionFailed)?;

            let plaintext = if is_likely_encrypted(&original) {
                match decrypt(&original, old_key) {
                    Ok(plaintext) => plaintext,
                    Err(_) => {
                        // Pre-encryption data can look like a blob; keep it
                        // as-is rather than locking the user out of it.
                        tracing::warn!(
                            "blob \"{path}\" did not decrypt with the old key, \
                             treating it as legacy plaintext"
                        );
                        original.clone()
                    }
                }
            } else {
                original.clone()
            };

            let reencrypted = encrypt(&plaintext, new_key)?;
            staged.push((path, original, reencrypted));
        }

        // Phase two: write the new blobs, undoing on failure.
        let mut written: Vec<(&str, &str)> = Vec::new();

        for (path, original, reencrypted) in &staged {
            if let Err(error) = self.store.put(path, reencrypted.as_bytes(), None) {
                tracing::error!("re-key write of \"{path}\" failed, rolling back: {error}");

                for (written_path, original) in &written {
                    if let Err(rollback_error) =
                        self.store.put(written_path, original.as_bytes(), None)
                    {
                        tracing::error!(
                            "rollback of \"{written_path}\" failed: {rollback_error}"
                        );
                    }
                }

                return Err(error);
            }

            written.push((path, original));
        }

        Ok(())
    }

    /// The encryption key for a user's data, or `None` when the account's
    /// policy keeps its blobs plaintext at rest.
    fn encryption_key_for(&self, username: &str) -> Result<Option<EncryptionKey>, Error> {
        let credentials = CredentialStore::new(self.store.clone(), self.config.clone());

        let record = credentials.record(username)?.ok_or(Error::NotFound)?;

        if record.encrypt_at_rest {
            Ok(Some(record.encryption_key(username)))
        } else {
            Ok(None)
        }
    }

    /// Read a blob as plaintext, applying the ownership check and the
    /// owner's encryption policy.
    fn read_blob(
        &self,
        session: &Session,
        owner: &str,
        path: &str,
    ) -> Result<Option<String>, Error> {
        if !session.can_read(owner, &self.config) {
            tracing::debug!("refusing to read \"{path}\" for {session:?}");
            return Ok(None);
        }

        let Some(bytes) = self.store.get(path)? else {
            return Ok(None);
        };

        let text = String::from_utf8(bytes)
            .map_err(|_| Error::StorageError(format!("blob \"{path}\" is not valid UTF-8")))?;

        let Some(key) = self.encryption_key_for(owner)? else {
            return Ok(Some(text));
        };

        // Data written before encryption was introduced is passed through
        // unchanged; it gets encrypted on the next save.
        if !is_likely_encrypted(&text) {
            return Ok(Some(text));
        }

        decrypt(&text, &key).map(Some)
    }

    /// Encrypt per the owner's policy and write a blob. Refuses (as a no-op)
    /// sessions that do not own the blob.
    fn write_blob(
        &self,
        session: &Session,
        owner: &str,
        path: &str,
        plaintext: &str,
    ) -> Result<bool, Error> {
        if !session.can_write(owner) {
            tracing::debug!("refusing to write \"{path}\" for {session:?}");
            return Ok(false);
        }

        let content = match self.encryption_key_for(owner)? {
            Some(key) => encrypt(plaintext, &key)?,
            None => plaintext.to_owned(),
        };

        self.store.put(path, content.as_bytes(), None)?;

        Ok(true)
    }
}
