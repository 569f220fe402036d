use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AuthInfoError;

/// A local user account. External identities in `user_auth` point at it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub login: String,
    pub email: String,
    pub name: String,
    pub is_disabled: bool,
    pub created: Option<DateTime<Utc>>,
}

/// Fields needed to register a new user.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewUser {
    pub login: String,
    pub email: String,
    pub name: String,
}

/// Resolves users by login or email.
#[async_trait]
pub trait UserLookup: Send + Sync {
    /// Find the user whose login or email equals `login_or_email`.
    /// Fails with [`AuthInfoError::UserNotFound`] when there is none.
    async fn get_user_by_login(&self, login_or_email: &str) -> Result<User, AuthInfoError>;
}
