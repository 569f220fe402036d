use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;

/// Key material used to encrypt token secrets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    /// Identifier embedded in ciphertexts (never log key bytes).
    pub id: String,
    /// 256-bit symmetric key.
    pub bytes: [u8; 32],
}

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("keyring error: {0}")]
    Keyring(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("generation error: {0}")]
    Generation(String),
}

/// Provides access to encryption keys by id (OS keychain in production; memory in tests).
#[async_trait]
pub trait KeyProvider: Send + Sync {
    /// Return the key stored under `key_id`, generating and persisting one on first use.
    async fn get_or_create(&self, key_id: &str) -> Result<KeyMaterial, KeyError>;

    /// Return the key stored under `key_id`, or `None` when no such key exists. Never creates.
    async fn get(&self, key_id: &str) -> Result<Option<KeyMaterial>, KeyError>;
}

/// OS keyring-backed provider. Every key id is its own keyring entry under `service`.
pub struct KeyringProvider {
    service: String,
}

impl KeyringProvider {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn account_for(key_id: &str) -> String {
        format!("data-key/{key_id}")
    }
}

#[async_trait]
impl KeyProvider for KeyringProvider {
    async fn get_or_create(&self, key_id: &str) -> Result<KeyMaterial, KeyError> {
        // Keyring operations are synchronous; wrap in async for trait compatibility.
        match keyring::Entry::new(&self.service, &Self::account_for(key_id)) {
            Ok(entry) => {
                if let Ok(secret) = entry.get_password() {
                    return decode_key(key_id, &secret);
                }

                let material = generate_key(key_id);
                entry
                    .set_password(&encode_key(&material))
                    .map_err(|e| KeyError::Keyring(e.to_string()))?;
                Ok(material)
            }
            Err(err) => Err(KeyError::Keyring(err.to_string())),
        }
    }

    async fn get(&self, key_id: &str) -> Result<Option<KeyMaterial>, KeyError> {
        let entry = keyring::Entry::new(&self.service, &Self::account_for(key_id))
            .map_err(|e| KeyError::Keyring(e.to_string()))?;
        match entry.get_password() {
            Ok(secret) => decode_key(key_id, &secret).map(Some),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(KeyError::Keyring(err.to_string())),
        }
    }
}

/// In-memory key provider for tests and ephemeral sessions.
#[derive(Debug, Default, Clone)]
pub struct InMemoryKeyProvider {
    inner: Arc<Mutex<HashMap<String, KeyMaterial>>>,
}

#[async_trait]
impl KeyProvider for InMemoryKeyProvider {
    async fn get_or_create(&self, key_id: &str) -> Result<KeyMaterial, KeyError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|err| KeyError::Generation(format!("lock poisoned: {err}")))?;

        let material = guard
            .entry(key_id.to_string())
            .or_insert_with(|| generate_key(key_id));
        Ok(material.clone())
    }

    async fn get(&self, key_id: &str) -> Result<Option<KeyMaterial>, KeyError> {
        let guard = self
            .inner
            .lock()
            .map_err(|err| KeyError::Generation(format!("lock poisoned: {err}")))?;
        Ok(guard.get(key_id).cloned())
    }
}

impl InMemoryKeyProvider {
    /// Number of keys created so far.
    pub fn len(&self) -> usize {
        self.inner.lock().map(|guard| guard.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn generate_key(key_id: &str) -> KeyMaterial {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    KeyMaterial {
        id: key_id.to_string(),
        bytes,
    }
}

fn encode_key(material: &KeyMaterial) -> String {
    general_purpose::STANDARD.encode(material.bytes)
}

fn decode_key(key_id: &str, secret: &str) -> Result<KeyMaterial, KeyError> {
    let bytes = general_purpose::STANDARD
        .decode(secret)
        .map_err(|e| KeyError::Decode(e.to_string()))?;

    if bytes.len() != 32 {
        return Err(KeyError::Decode(format!(
            "expected 32 bytes, got {}",
            bytes.len()
        )));
    }

    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(KeyMaterial {
        id: key_id.to_string(),
        bytes: out,
    })
}
