use std::path::PathBuf;

use crate::config::Config;
use authinfo_storage::{
    key_provider::{KeyProvider, KeyringProvider},
    AesGcmSecretsService, AuthInfoStore, DatabaseConfig, SqlStore,
};
use color_eyre::Result;
use dirs::data_dir;
use tracing::debug;

const DEFAULT_KEYRING_SERVICE: &str = "authinfo";
const DATABASE_FILE: &str = "authinfo.db";

pub type Store<P> = AuthInfoStore<AesGcmSecretsService<P>>;

/// Resolve the default data directory for authinfo.
pub fn default_data_dir() -> Result<PathBuf> {
    let base = data_dir().ok_or_else(|| color_eyre::eyre::eyre!("no data dir available"))?;
    Ok(base.join("authinfo"))
}

/// Database settings from config overrides, falling back to `<data_dir>/authinfo.db`.
pub fn database_config(config: &Config) -> Result<DatabaseConfig> {
    let section = config.database.clone().unwrap_or_default();
    let path = match section.path {
        Some(path) => path,
        None => {
            let root = match &config.data_dir {
                Some(root) => root.clone(),
                None => default_data_dir()?,
            };
            root.join(DATABASE_FILE)
        }
    };

    let mut db = DatabaseConfig::with_path(path.to_string_lossy());
    if let Some(ms) = section.busy_timeout_ms {
        db.busy_timeout_ms = ms;
    }
    if let Some(ms) = section.acquire_timeout_ms {
        db.acquire_timeout_ms = ms;
    }
    Ok(db)
}

/// Build a production store: SQLite on disk, keys in the OS keychain.
pub async fn store_from_config(config: &Config) -> Result<(SqlStore, Store<KeyringProvider>)> {
    let service = config
        .keyring
        .as_ref()
        .and_then(|k| k.service.clone())
        .unwrap_or_else(|| DEFAULT_KEYRING_SERVICE.to_string());
    open_store(config, KeyringProvider::new(service)).await
}

pub async fn open_store<P: KeyProvider>(
    config: &Config,
    key_provider: P,
) -> Result<(SqlStore, Store<P>)> {
    let db = database_config(config)?;
    debug!(path = %db.path, "initializing auth info store");
    let sql_store = SqlStore::open(&db).await?;
    let store = AuthInfoStore::new(sql_store.clone(), AesGcmSecretsService::new(key_provider));
    Ok((sql_store, store))
}

/// Helper for tests to construct a store rooted at a temp dir with in-memory keys.
#[cfg(test)]
pub async fn test_store(
    root: impl Into<PathBuf>,
) -> (
    SqlStore,
    Store<authinfo_storage::key_provider::InMemoryKeyProvider>,
) {
    let config = Config {
        data_dir: Some(root.into()),
        ..Default::default()
    };
    open_store(
        &config,
        authinfo_storage::key_provider::InMemoryKeyProvider::default(),
    )
    .await
    .expect("open test store")
}
