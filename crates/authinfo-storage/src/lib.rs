//! Concrete storage for authinfo: SQLite sessions, AES-GCM secret service with keys
//! from the OS keyring (or test doubles), and the encrypted `user_auth` store.

pub mod aes_secrets_service;
pub mod auth_info_store;
pub mod key_provider;
pub mod sql_store;

pub use aes_secrets_service::AesGcmSecretsService;
pub use auth_info_store::AuthInfoStore;
pub use sql_store::{DatabaseConfig, SqlStore};
