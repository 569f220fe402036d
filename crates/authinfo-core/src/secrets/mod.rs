//! Secret service contract used to keep token material encrypted at rest.

mod secrets_service;

pub use secrets_service::{EncryptionScope, InMemorySecretsService, SecretsError, SecretsService};
