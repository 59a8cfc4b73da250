//! Account endpoints: registration, log in, password change, deletion.

use axum::{Json, extract::State, http::StatusCode};
use serde::Deserialize;
use serde_json::json;

use crate::{AppState, Error, auth::Session};

/// Form data for registration and log in.
#[derive(Debug, Deserialize)]
pub struct CredentialsForm {
    /// The account username.
    pub username: String,

    /// The account password.
    pub password: String,
}

/// Handler for registering a new account.
///
/// Registration also seeds the account's default category blob so the first
/// session starts from a working store.
pub async fn register_user(
    State(state): State<AppState>,
    Json(form): Json<CredentialsForm>,
) -> Result<(StatusCode, Json<serde_json::Value>), Error> {
    state.credentials().register(&form.username, &form.password)?;

    let session = Session::User(form.username.clone());
    state
        .user_data()
        .ensure_default_categories(&session, &form.username)?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "username": form.username })),
    ))
}

/// Handler for verifying a username/password combination.
pub async fn log_in(
    State(state): State<AppState>,
    Json(form): Json<CredentialsForm>,
) -> Result<Json<serde_json::Value>, Error> {
    if state
        .credentials()
        .authenticate(&form.username, &form.password)?
    {
        Ok(Json(json!({ "username": form.username })))
    } else {
        Err(Error::InvalidCredentials)
    }
}

/// Form data for changing the current user's password.
#[derive(Debug, Deserialize)]
pub struct ChangePasswordForm {
    /// The current password, verified before anything happens.
    pub old_password: String,

    /// The new password.
    pub new_password: String,
}

/// Handler for changing the current user's password.
///
/// All of the user's blobs are re-encrypted under the new credential before
/// the new hash is committed; see [crate::CredentialStore::change_password].
pub async fn change_password(
    State(state): State<AppState>,
    session: Session,
    Json(form): Json<ChangePasswordForm>,
) -> Result<Json<serde_json::Value>, Error> {
    let username = session.require_user()?;

    state.credentials().change_password(
        username,
        &form.old_password,
        &form.new_password,
        &state.user_data(),
    )?;

    Ok(Json(json!({ "username": username })))
}

/// Handler for deleting the current user's account, ledger, and categories.
pub async fn delete_user(
    State(state): State<AppState>,
    session: Session,
) -> Result<Json<serde_json::Value>, Error> {
    let username = session.require_user()?.to_owned();

    if session.is_admin(&state.config) {
        return Err(Error::ProtectedAccount(username));
    }

    state.user_data().delete_user_data(&session, &username)?;
    state.credentials().delete(&username)?;

    tracing::info!("deleted account \"{username}\" and its data");

    Ok(Json(json!({ "deleted": username })))
}
