use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::ClientError;
use crate::store::keys;
use crate::transport::{RequestDescriptor, Requester};

pub const LOGIN_PATH: &str = "/api/auth/wechat";
pub const ME_PATH: &str = "/api/me";
pub const PING_PATH: &str = "/api/ping";

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct UserProfile {
    pub user_id: i64,
    #[serde(default)]
    pub openid: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    /// Fields this client does not model.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserProfile,
}

/// Exchange a platform login code for a bearer token and persist it, so every
/// later request carries it.
pub async fn login(requester: &Requester, code: &str) -> Result<LoginResponse, ClientError> {
    let body = requester
        .send(RequestDescriptor::post(LOGIN_PATH, json!({ "code": code })))
        .await?;
    let login: LoginResponse = serde_json::from_value(body)
        .map_err(|e| ClientError::SchemaParse(format!("login response: {e}")))?;
    if login.token.is_empty() {
        return Err(ClientError::SchemaParse("login response has empty token".into()));
    }

    requester.store().set(keys::TOKEN, &login.token)?;
    tracing::info!(user_id = login.user.user_id, "logged in");
    Ok(login)
}

/// Forget the stored token.
pub fn logout(requester: &Requester) -> Result<(), ClientError> {
    requester.store().remove(keys::TOKEN)
}

pub async fn me(requester: &Requester) -> Result<UserProfile, ClientError> {
    let body = requester.send(RequestDescriptor::get(ME_PATH)).await?;
    serde_json::from_value(body).map_err(|e| ClientError::SchemaParse(format!("profile: {e}")))
}

/// Liveness check; returns whatever the service answers.
pub async fn ping(requester: &Requester) -> Result<Value, ClientError> {
    requester.send(RequestDescriptor::get(PING_PATH)).await
}
