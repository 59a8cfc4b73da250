//! The per-request session context and the extractor that builds it.
//!
//! Every handler receives a [Session]: either a named user whose HTTP Basic
//! credentials verified against the credential store, or a guest (no
//! credentials at all). The session is passed explicitly into every core
//! call that touches user data, so ownership checks happen at the data
//! layer rather than in ambient state.

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
    response::{IntoResponse, Response},
};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};

use crate::{AppState, Error, config::AppConfig};

/// The identity a request acts as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Session {
    /// No credentials were supplied. Guests can parse and analyze uploads
    /// but nothing they do is persisted.
    Guest,

    /// A registered user with verified credentials.
    User(String),
}

impl Session {
    /// The session's username, if it is a registered user.
    pub fn username(&self) -> Option<&str> {
        match self {
            Session::Guest => None,
            Session::User(username) => Some(username),
        }
    }

    /// The session's username, or [Error::InvalidCredentials] for guests.
    ///
    /// Handlers for endpoints that persist data call this first.
    pub fn require_user(&self) -> Result<&str, Error> {
        self.username().ok_or(Error::InvalidCredentials)
    }

    /// Whether this session is the administrative account.
    pub fn is_admin(&self, config: &AppConfig) -> bool {
        self.username() == Some(config.admin_username.as_str())
    }

    /// Whether this session may read blobs owned by `owner`.
    ///
    /// Only the owner and the administrative account qualify.
    pub(crate) fn can_read(&self, owner: &str, config: &AppConfig) -> bool {
        match self.username() {
            Some(username) => username == owner || username == config.admin_username,
            None => false,
        }
    }

    /// Whether this session may write blobs owned by `owner`.
    ///
    /// Writes are owner-only; the administrative account cannot modify
    /// other users' data.
    pub(crate) fn can_write(&self, owner: &str) -> bool {
        self.username() == Some(owner)
    }
}

impl<S> FromRequestParts<S> for Session
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Some(header) = parts.headers.get(AUTHORIZATION) else {
            return Ok(Session::Guest);
        };

        let credentials = parse_basic_credentials(header.as_bytes())
            .ok_or_else(|| Error::InvalidCredentials.into_response())?;
        let (username, password) = credentials;

        let state = AppState::from_ref(state);

        match state.credentials().authenticate(&username, &password) {
            Ok(true) => Ok(Session::User(username)),
            Ok(false) => Err(Error::InvalidCredentials.into_response()),
            Err(error) => Err(error.into_response()),
        }
    }
}

/// Decode an `Authorization: Basic` header into `(username, password)`.
fn parse_basic_credentials(header: &[u8]) -> Option<(String, String)> {
    let header = str::from_utf8(header).ok()?;
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = BASE64.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;

    let (username, password) = decoded.split_once(':')?;

    Some((username.to_owned(), password.to_owned()))
}

#[cfg(test)]
mod session_tests {
    use super::Session;
    use crate::{Error, config::AppConfig};

    #[test]
    fn guests_have_no_username() {
        assert_eq!(Session::Guest.username(), None);
        assert_eq!(Session::Guest.require_user(), Err(Error::InvalidCredentials));
    }

    #[test]
    fn users_can_only_write_their_own_data() {
        let session = Session::User("alice".to_owned());

        assert!(session.can_write("alice"));
        assert!(!session.can_write("bob"));
    }

    #[test]
    fn the_administrative_account_can_read_but_not_write_others_data() {
        let config = AppConfig::default();
        let session = Session::User("admin".to_owned());

        assert!(session.can_read("alice", &config));
        assert!(!session.can_write("alice"));
    }

    #[test]
    fn guests_can_access_nothing() {
        let config = AppConfig::default();

        assert!(!Session::Guest.can_read("alice", &config));
        assert!(!Session::Guest.can_write("alice"));
    }
}

#[cfg(test)]
mod parse_basic_credentials_tests {
    use base64::{Engine, engine::general_purpose::STANDARD as BASE64};

    use super::parse_basic_credentials;

    #[test]
    fn decodes_username_and_password() {
        let header = format!("Basic {}", BASE64.encode("alice:hunter2"));

        assert_eq!(
            parse_basic_credentials(header.as_bytes()),
            Some(("alice".to_owned(), "hunter2".to_owned()))
        );
    }

    #[test]
    fn passwords_may_contain_colons() {
        let header = format!("Basic {}", BASE64.encode("alice:pass:word"));

        assert_eq!(
            parse_basic_credentials(header.as_bytes()),
            Some(("alice".to_owned(), "pass:word".to_owned()))
        );
    }

    #[test]
    fn malformed_headers_are_rejected() {
        assert_eq!(parse_basic_credentials(b"Bearer token"), None);
        assert_eq!(parse_basic_credentials(b"Basic not-base64!"), None);

        let no_colon = format!("Basic {}", BASE64.encode("alicehunter2"));
        assert_eq!(parse_basic_credentials(no_colon.as_bytes()), None);
    }
}
