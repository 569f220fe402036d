//! Core abstractions for authinfo: the user-auth data model, the error taxonomy and the
//! collaborator contracts (secret service, user lookup) the store is built against.
//! This crate is intentionally small to keep dependency surface minimal.

pub mod auth;
pub mod error;
pub mod secrets;
pub mod user;

pub use error::AuthInfoError;
