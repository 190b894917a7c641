//! Admin login against the dashboard backend.
//!
//! A successful `POST /api/login` yields `{token, id, username}`, which is
//! persisted through the [`SessionStore`]. Bad credentials come back as a
//! 200 with `{error}`, so the body decides success, not the status code.

use serde_json::Value;
use tracing::{info, warn};

use crate::api::{ApiClient, ApiError};
use crate::storage::{AdminIdentity, Session, SessionStore, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Username and password are required")]
    MissingCredentials,
    #[error("{0}")]
    Rejected(String),
    #[error("Login response did not include an admin identity")]
    MalformedResponse,
    #[error("Not logged in. Run `restaurant-dashboard login <username> <password>` first")]
    NotLoggedIn,
    #[error(transparent)]
    Api(ApiError),
    #[error("Failed to persist session: {0}")]
    Storage(#[from] StorageError),
}

impl From<ApiError> for AuthError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Status { message, .. } => Self::Rejected(message),
            other => Self::Api(other),
        }
    }
}

fn non_empty_str<'a>(v: &'a Value, key: &str) -> Option<&'a str> {
    v.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Turn a login response into a session. `fallback_username` is used when
/// the backend omits the username.
fn session_from_response(resp: &Value, fallback_username: &str) -> Result<Session, AuthError> {
    let Some(token) = non_empty_str(resp, "token") else {
        let message = non_empty_str(resp, "error")
            .or_else(|| non_empty_str(resp, "message"))
            .unwrap_or("Login failed");
        return Err(AuthError::Rejected(message.to_string()));
    };
    let mut admin = AdminIdentity::from_value(resp).ok_or(AuthError::MalformedResponse)?;
    if admin.username.trim().is_empty() {
        admin.username = fallback_username.to_string();
    }
    Ok(Session::new(admin, Some(token)))
}

pub async fn login(
    api: &ApiClient,
    store: &SessionStore,
    username: &str,
    password: &str,
) -> Result<Session, AuthError> {
    let username = username.trim();
    if username.is_empty() || password.is_empty() {
        return Err(AuthError::MissingCredentials);
    }

    let resp = api.login(username, password).await?;
    let session = match session_from_response(&resp, username) {
        Ok(session) => session,
        Err(e) => {
            warn!(username, error = %e, "login rejected");
            return Err(e);
        }
    };
    store.set_session(&session)?;
    info!(admin_id = %session.admin.id, username = %session.admin.username, "admin logged in");
    Ok(session)
}

pub fn logout(store: &SessionStore) -> Result<(), AuthError> {
    store.clear_session()?;
    info!("admin logged out");
    Ok(())
}

/// The persisted session, or [`AuthError::NotLoggedIn`].
pub fn require_session(store: &SessionStore) -> Result<Session, AuthError> {
    store.get_session().ok_or(AuthError::NotLoggedIn)
}

/// Client carrying the session's admin id and token.
pub fn authenticated_client(api: ApiClient, session: &Session) -> ApiClient {
    api.with_credentials(&session.admin.id, session.token())
}
