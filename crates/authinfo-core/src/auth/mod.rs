use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AuthInfoError;

/// One external identity of a user: a row of `user_auth`.
///
/// A new row is written on every login through a provider, so several rows may exist for the
/// same `(user_id, auth_module)`; readers pick the most recent by `created`.
/// The `oauth_*` secrets are plaintext in memory and base64 ciphertext at rest.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserAuth {
    pub id: i64,
    pub user_id: i64,
    pub auth_module: String,
    pub auth_id: String,
    pub created: Option<DateTime<Utc>>,
    pub oauth_access_token: String,
    pub oauth_refresh_token: String,
    pub oauth_token_type: String,
    pub oauth_id_token: String,
    pub oauth_expiry: Option<DateTime<Utc>>,
}

/// Token set returned by an OAuth provider after a successful login or refresh.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OAuthToken {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expiry: Option<DateTime<Utc>>,
    /// Provider specific fields of the token response (e.g. `id_token`).
    #[serde(default)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl OAuthToken {
    /// Raw value of an extra token response field.
    pub fn extra(&self, key: &str) -> Option<&serde_json::Value> {
        self.extra.get(key)
    }

    /// The OpenID Connect id token, if the provider returned a non-empty one.
    pub fn id_token(&self) -> Option<&str> {
        self.extra("id_token")
            .and_then(serde_json::Value::as_str)
            .filter(|token| !token.is_empty())
    }

    pub fn with_id_token(mut self, id_token: impl Into<String>) -> Self {
        self.extra
            .insert("id_token".to_string(), serde_json::Value::String(id_token.into()));
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetAuthInfoQuery {
    pub user_id: i64,
    pub auth_module: String,
    pub auth_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetExternalUserInfoByLoginQuery {
    pub login_or_email: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SetAuthInfoCommand {
    pub user_id: i64,
    pub auth_module: String,
    pub auth_id: String,
    pub oauth_token: Option<OAuthToken>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateAuthInfoCommand {
    pub user_id: i64,
    pub auth_module: String,
    pub auth_id: String,
    pub oauth_token: Option<OAuthToken>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteAuthInfoCommand {
    /// Record to delete, normally one previously returned by `get_auth_info`.
    pub user_auth: UserAuth,
}

/// A user profile merged with the external identity it last logged in with.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExternalUserInfo {
    pub user_id: i64,
    pub login: String,
    pub email: String,
    pub name: String,
    pub is_disabled: bool,
    pub auth_module: String,
    pub auth_id: String,
}

/// Operations the authentication layer performs against external identity records.
///
/// Callers are handed an implementation (usually `Arc<dyn AuthInfoService>`) at
/// construction time instead of resolving handlers through a global registry.
#[async_trait]
pub trait AuthInfoService: Send + Sync {
    async fn get_external_user_info_by_login(
        &self,
        query: &GetExternalUserInfoByLoginQuery,
    ) -> Result<ExternalUserInfo, AuthInfoError>;

    /// Most recent record matching the non-empty fields of `query`.
    async fn get_auth_info(&self, query: &GetAuthInfoQuery) -> Result<UserAuth, AuthInfoError>;

    /// Insert a new record; never updates existing rows.
    async fn set_auth_info(&self, cmd: &SetAuthInfoCommand) -> Result<(), AuthInfoError>;

    /// Rewrite every record of `(user_id, auth_module)`.
    async fn update_auth_info(&self, cmd: &UpdateAuthInfoCommand) -> Result<(), AuthInfoError>;

    /// Delete the rows equal to `cmd.user_auth` on all of its populated fields.
    async fn delete_auth_info(&self, cmd: &DeleteAuthInfoCommand) -> Result<(), AuthInfoError>;
}
