use thiserror::Error;

use crate::secrets::SecretsError;

/// Errors surfaced by the auth info store and its collaborators.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthInfoError {
    /// No identity was supplied, or no matching user / user_auth row exists.
    #[error("user not found")]
    UserNotFound,
    /// Encryption, decryption or encoding of a secret field failed.
    #[error("crypto failure: {reason}")]
    Crypto { reason: String },
    /// Underlying session or transaction failure.
    #[error("storage failure: {reason}")]
    Storage { reason: String },
    /// A delete was requested with a record that has no populated field.
    #[error("refusing to delete user_auth rows without a condition")]
    EmptyCondition,
}

impl AuthInfoError {
    pub fn crypto(reason: impl Into<String>) -> Self {
        Self::Crypto {
            reason: reason.into(),
        }
    }

    pub fn storage(reason: impl Into<String>) -> Self {
        Self::Storage {
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::UserNotFound)
    }
}

impl From<SecretsError> for AuthInfoError {
    fn from(err: SecretsError) -> Self {
        Self::crypto(err.to_string())
    }
}
