use serde_json::{json, Value};

use crate::api::ApiClient;
use crate::auth;
use crate::diagnostics::redact_sensitive_fields;
use crate::storage::SessionStore;

pub async fn session_login(
    api: &ApiClient,
    store: &SessionStore,
    username: &str,
    password: &str,
) -> Result<Value, String> {
    let session = auth::login(api, store, username, password)
        .await
        .map_err(|e| e.to_string())?;
    Ok(json!({
        "success": true,
        "adminId": session.admin.id,
        "username": session.admin.username,
    }))
}

pub fn session_logout(store: &SessionStore) -> Result<Value, String> {
    auth::logout(store).map_err(|e| e.to_string())?;
    Ok(json!({ "success": true }))
}

/// Current identity with the token masked.
pub fn session_whoami(store: &SessionStore) -> Result<Value, String> {
    let session = auth::require_session(store).map_err(|e| e.to_string())?;
    Ok(redact_sensitive_fields(json!({
        "adminData": session.admin.to_value(),
        "token": session.token(),
    })))
}
