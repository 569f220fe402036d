use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use async_trait::async_trait;
use authinfo_core::secrets::{EncryptionScope, SecretsError, SecretsService};
use tracing::instrument;

use crate::key_provider::{KeyError, KeyMaterial, KeyProvider};

const NONCE_LEN: usize = 12;

/// AES-256-GCM implementation of the shared `SecretsService` contract.
///
/// Output layout: `[key id length: u8][key id][nonce: 12 bytes][ciphertext + tag]`.
/// The key id is bound to the ciphertext as associated data, so a payload cannot be
/// replayed under another scope's key.
pub struct AesGcmSecretsService<P: KeyProvider> {
    key_provider: P,
}

impl<P: KeyProvider> AesGcmSecretsService<P> {
    pub fn new(key_provider: P) -> Self {
        Self { key_provider }
    }

    async fn key(&self, key_id: &str) -> Result<KeyMaterial, SecretsError> {
        self.key_provider
            .get_or_create(key_id)
            .await
            .map_err(key_provider_err)
    }

    /// Decrypt-side lookup: a key id read from a payload must already exist.
    async fn existing_key(&self, key_id: &str) -> Result<KeyMaterial, SecretsError> {
        self.key_provider
            .get(key_id)
            .await
            .map_err(key_provider_err)?
            .ok_or_else(|| SecretsError::Malformed {
                reason: format!("unknown key id: {key_id}"),
            })
    }
}

#[async_trait]
impl<P: KeyProvider> SecretsService for AesGcmSecretsService<P> {
    #[instrument(skip_all, fields(scope = ?scope))]
    async fn encrypt(
        &self,
        payload: &[u8],
        scope: EncryptionScope,
    ) -> Result<Vec<u8>, SecretsError> {
        let key_id = scope.key_id();
        let key_len = u8::try_from(key_id.len()).map_err(|_| SecretsError::Service {
            reason: format!("key id too long: {} bytes", key_id.len()),
        })?;

        let key_material = self.key(&key_id).await?;
        let cipher = build_cipher(&key_material)?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: payload,
                    aad: key_id.as_bytes(),
                },
            )
            .map_err(|e| SecretsError::Service {
                reason: format!("encrypt failed: {e}"),
            })?;

        let mut out = Vec::with_capacity(1 + key_id.len() + NONCE_LEN + ciphertext.len());
        out.push(key_len);
        out.extend_from_slice(key_id.as_bytes());
        out.extend_from_slice(nonce.as_slice());
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    #[instrument(skip_all)]
    async fn decrypt(&self, payload: &[u8]) -> Result<Vec<u8>, SecretsError> {
        let envelope = Envelope::parse(payload)?;

        let key_material = self.existing_key(envelope.key_id).await?;
        let cipher = build_cipher(&key_material)?;
        cipher
            .decrypt(
                Nonce::from_slice(envelope.nonce),
                Payload {
                    msg: envelope.ciphertext,
                    aad: envelope.key_id.as_bytes(),
                },
            )
            .map_err(|e| SecretsError::Malformed {
                reason: format!("decrypt failed: {e}"),
            })
    }
}

struct Envelope<'a> {
    key_id: &'a str,
    nonce: &'a [u8],
    ciphertext: &'a [u8],
}

impl<'a> Envelope<'a> {
    fn parse(payload: &'a [u8]) -> Result<Self, SecretsError> {
        let (&key_len, rest) = payload.split_first().ok_or(SecretsError::EmptyPayload)?;
        let key_len = key_len as usize;
        if rest.len() < key_len + NONCE_LEN {
            return Err(malformed("payload too short"));
        }

        let (key_id, rest) = rest.split_at(key_len);
        let key_id = std::str::from_utf8(key_id).map_err(|_| malformed("key id is not utf-8"))?;
        let (nonce, ciphertext) = rest.split_at(NONCE_LEN);
        Ok(Self {
            key_id,
            nonce,
            ciphertext,
        })
    }
}

fn build_cipher(material: &KeyMaterial) -> Result<Aes256Gcm, SecretsError> {
    Aes256Gcm::new_from_slice(&material.bytes).map_err(|e| SecretsError::Service {
        reason: format!("cipher init failed: {e}"),
    })
}

fn key_provider_err(err: KeyError) -> SecretsError {
    SecretsError::Service {
        reason: format!("key provider: {err}"),
    }
}

fn malformed(reason: &str) -> SecretsError {
    SecretsError::Malformed {
        reason: reason.to_string(),
    }
}
