//! The state shared by all request handlers.

use std::sync::Arc;

use crate::{
    config::AppConfig, credentials::CredentialStore, store::BlobStore, user_data::UserDataStore,
};

/// The state of the API server: the storage backend plus the app config.
#[derive(Clone)]
pub struct AppState {
    /// The blob store holding all persisted data.
    pub store: Arc<dyn BlobStore>,

    /// The application configuration.
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// Create the server state over a storage backend.
    pub fn new(store: Arc<dyn BlobStore>, config: AppConfig) -> Self {
        Self {
            store,
            config: Arc::new(config),
        }
    }

    /// The credential store view over the storage backend.
    pub fn credentials(&self) -> CredentialStore {
        CredentialStore::new(self.store.clone(), self.config.clone())
    }

    /// The per-user data store view over the storage backend.
    pub fn user_data(&self) -> UserDataStore {
        UserDataStore::new(self.store.clone(), self.config.clone())
    }
}
