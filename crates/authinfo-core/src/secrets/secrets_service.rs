use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use thiserror::Error;

/// Errors produced by secret service implementations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SecretsError {
    /// Decrypt was called with nothing to decrypt.
    #[error("cannot decrypt an empty payload")]
    EmptyPayload,
    /// The payload is not something this service produced, or was tampered with.
    #[error("malformed payload: {reason}")]
    Malformed { reason: String },
    /// Key lookup or cipher failure.
    #[error("secret service failure: {reason}")]
    Service { reason: String },
}

/// Key context an encryption call runs under.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum EncryptionScope {
    /// Default, process-wide key.
    #[default]
    Unscoped,
    /// Key dedicated to the given namespace.
    ScopedTo(String),
}

impl EncryptionScope {
    /// Identifier of the key this scope encrypts with. Embedded in every ciphertext so
    /// decryption does not need to be told the scope again.
    pub fn key_id(&self) -> String {
        match self {
            EncryptionScope::Unscoped => "default".to_string(),
            EncryptionScope::ScopedTo(namespace) => format!("scope:{namespace}"),
        }
    }
}

/// Symmetric encryption of sensitive byte payloads.
#[async_trait]
pub trait SecretsService: Send + Sync {
    /// Encrypt `payload` with the key selected by `scope`.
    async fn encrypt(
        &self,
        payload: &[u8],
        scope: EncryptionScope,
    ) -> Result<Vec<u8>, SecretsError>;

    /// Decrypt a payload previously returned by `encrypt`. Callers never pass empty input.
    async fn decrypt(&self, payload: &[u8]) -> Result<Vec<u8>, SecretsError>;
}

#[async_trait]
impl<S: SecretsService + ?Sized> SecretsService for Arc<S> {
    async fn encrypt(
        &self,
        payload: &[u8],
        scope: EncryptionScope,
    ) -> Result<Vec<u8>, SecretsError> {
        (**self).encrypt(payload, scope).await
    }

    async fn decrypt(&self, payload: &[u8]) -> Result<Vec<u8>, SecretsError> {
        (**self).decrypt(payload).await
    }
}

/// In-memory secret service that simulates encryption for tests and smoke runs.
/// This is not cryptographically secure; production code uses the AES-GCM service
/// from `authinfo-storage`.
#[derive(Debug, Default, Clone)]
pub struct InMemorySecretsService {
    encrypt_calls: Arc<AtomicUsize>,
    decrypt_calls: Arc<AtomicUsize>,
}

impl InMemorySecretsService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `encrypt` calls served so far.
    pub fn encrypt_calls(&self) -> usize {
        self.encrypt_calls.load(Ordering::SeqCst)
    }

    /// Number of `decrypt` calls served so far.
    pub fn decrypt_calls(&self) -> usize {
        self.decrypt_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecretsService for InMemorySecretsService {
    async fn encrypt(
        &self,
        payload: &[u8],
        scope: EncryptionScope,
    ) -> Result<Vec<u8>, SecretsError> {
        self.encrypt_calls.fetch_add(1, Ordering::SeqCst);

        let key_id = scope.key_id();
        let key_len = u8::try_from(key_id.len()).map_err(|_| SecretsError::Service {
            reason: format!("key id too long: {} bytes", key_id.len()),
        })?;
        let mut out = Vec::with_capacity(MAGIC.len() + 1 + key_id.len() + payload.len());
        out.extend_from_slice(MAGIC);
        out.push(key_len);
        out.extend_from_slice(key_id.as_bytes());
        // XOR is a placeholder to avoid storing plaintext in tests.
        out.extend(mask(payload));
        Ok(out)
    }

    async fn decrypt(&self, payload: &[u8]) -> Result<Vec<u8>, SecretsError> {
        self.decrypt_calls.fetch_add(1, Ordering::SeqCst);

        if payload.is_empty() {
            return Err(SecretsError::EmptyPayload);
        }
        let rest = payload
            .strip_prefix(MAGIC)
            .ok_or_else(|| SecretsError::Malformed {
                reason: "missing header".to_string(),
            })?;
        let (&key_len, rest) = rest.split_first().ok_or_else(|| SecretsError::Malformed {
            reason: "missing key id".to_string(),
        })?;
        let body = rest
            .get(key_len as usize..)
            .ok_or_else(|| SecretsError::Malformed {
                reason: "truncated key id".to_string(),
            })?;
        Ok(unmask(body))
    }
}

const MAGIC: &[u8] = b"mem1";
const MASK_BYTE: u8 = 0xA5;

fn mask(input: &[u8]) -> Vec<u8> {
    input.iter().map(|b| b ^ MASK_BYTE).collect()
}

fn unmask(input: &[u8]) -> Vec<u8> {
    mask(input) // XOR twice restores original.
}
