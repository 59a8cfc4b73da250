//! Forint is a web app for analyzing personal bank-statement exports.
//!
//! It ingests statement CSV files, normalizes and categorizes the
//! transactions, merges them into a per-user ledger, and serves the data as a
//! JSON API for the dashboard front end. Every user's ledger and category
//! data is encrypted at rest with a key derived from their credentials.

#![warn(missing_docs)]

use std::{net::SocketAddr, time::Duration};

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use axum_server::Handle;
use serde_json::json;
use tokio::signal;

mod account;
mod app_state;
mod auth;
mod category;
mod config;
mod credentials;
mod currency;
mod customize;
mod dashboard;
mod endpoints;
mod import;
mod logging;
mod routing;
mod statement;
mod store;
mod transaction;
mod user_data;
mod vault;

pub use app_state::AppState;
pub use auth::Session;
pub use category::{CategoryStore, UNCATEGORIZED, categorize};
pub use config::AppConfig;
pub use credentials::CredentialStore;
pub use currency::{detect_currency, format_currency};
pub use routing::build_router;
pub use statement::{HideRule, MatchKind, ParsedStatement, default_hide_rules, parse_statement};
pub use store::{BlobStore, DirectoryBlobStore, MemoryBlobStore, VersionToken};
pub use transaction::{Ledger, Transaction, merge};
pub use user_data::UserDataStore;
pub use vault::{EncryptionKey, decrypt, derive_key, encrypt, is_likely_encrypted};

/// An async task that waits for either the ctrl+c or terminate signal,
/// whichever comes first, and then signals the server to shut down gracefully.
///
/// `handle` is a handle to an Axum `Server`.
pub async fn graceful_shutdown(handle: Handle<SocketAddr>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::debug!("Received ctrl+c signal.");
            handle.graceful_shutdown(Some(Duration::from_secs(1)));
        },
        _ = terminate => {
            tracing::debug!("Received terminate signal.");
            handle.graceful_shutdown(Some(Duration::from_secs(1)));
        },
    }
}

/// The errors that may occur in the application.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum Error {
    /// A required statement column is missing from the uploaded CSV.
    #[error("the statement is missing the required column \"{0}\"")]
    MissingColumn(String),

    /// A transaction date could not be parsed.
    ///
    /// Callers should pass in the original error as a string and the date
    /// string that caused the error.
    #[error("could not parse transaction date \"{1}\": {0}")]
    InvalidDate(String, String),

    /// A transaction amount could not be parsed as a number.
    #[error("could not parse transaction amount \"{0}\"")]
    InvalidAmount(String),

    /// The CSV had issues that prevented it from being parsed.
    #[error("could not parse the CSV file: {0}")]
    InvalidCsv(String),

    /// The uploaded file is not a CSV file.
    #[error("file is not a CSV")]
    NotCsv,

    /// An empty string was used to create a category name.
    #[error("category name cannot be empty")]
    EmptyCategoryName,

    /// The named category does not exist in the user's category store.
    #[error("the category \"{0}\" does not exist")]
    UnknownCategory(String),

    /// The user provided an invalid combination of username and password.
    #[error("invalid username or password")]
    InvalidCredentials,

    /// The user provided a password that is too easy to guess.
    #[error("password is too weak: {0}")]
    TooWeak(String),

    /// The username contains characters outside `[A-Za-z0-9_-]` or is empty.
    #[error("\"{0}\" is not a valid username")]
    InvalidUsername(String),

    /// The username is reserved and cannot be registered.
    #[error("the username \"{0}\" is reserved")]
    ReservedUsername(String),

    /// The username is already registered.
    #[error("the username \"{0}\" is already taken")]
    UsernameTaken(String),

    /// The administrative account cannot be deleted.
    #[error("the account \"{0}\" cannot be deleted")]
    ProtectedAccount(String),

    /// The underlying cipher rejected the plaintext.
    ///
    /// The error detail is deliberately not carried: it should only be logged
    /// on the server, never shown to the client.
    #[error("could not encrypt data")]
    EncryptionFailed,

    /// A persisted blob could not be decrypted with the derived key.
    ///
    /// The blob is either corrupt, truncated, or was written under a
    /// different credential.
    #[error("could not decrypt data")]
    DecryptionFailed,

    /// The requested resource could not be found.
    ///
    /// Also returned when a caller asks for another user's data, so that the
    /// response does not confirm whether the data exists.
    #[error("the requested resource could not be found")]
    NotFound,

    /// A conditional write was rejected because the blob changed underneath.
    #[error("the stored data changed since it was read: {0}")]
    StorageConflict(String),

    /// The storage backend failed.
    #[error("storage backend error: {0}")]
    StorageError(String),

    /// A payload could not be serialized or deserialized.
    #[error("could not serialize data: {0}")]
    Serialization(String),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status_code = match &self {
            Error::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Error::NotFound => StatusCode::NOT_FOUND,
            Error::ProtectedAccount(_) => StatusCode::FORBIDDEN,
            Error::UsernameTaken(_) | Error::StorageConflict(_) => StatusCode::CONFLICT,
            Error::NotCsv => StatusCode::BAD_REQUEST,
            Error::MissingColumn(_)
            | Error::InvalidDate(_, _)
            | Error::InvalidAmount(_)
            | Error::InvalidCsv(_)
            | Error::EmptyCategoryName
            | Error::UnknownCategory(_)
            | Error::TooWeak(_)
            | Error::InvalidUsername(_)
            | Error::ReservedUsername(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::EncryptionFailed
            | Error::DecryptionFailed
            | Error::StorageError(_)
            | Error::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // Internal errors are logged in full and reported to the client as a
        // generic failure.
        let message = if status_code == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("an internal error occurred: {self}");
            "an internal error occurred".to_owned()
        } else {
            self.to_string()
        };

        (status_code, Json(json!({ "error": message }))).into_response()
    }
}
