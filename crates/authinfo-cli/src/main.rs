mod auth;
mod cli;
mod config;
mod storage;
mod users;

use crate::cli::ConfigCommand;
use authinfo_core::secrets::{EncryptionScope, SecretsService};
use authinfo_storage::{AuthInfoStore, SqlStore};
use clap::Parser;
use color_eyre::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    let config = config::load()?;
    match cli.command {
        cli::Command::Version => print_version(),
        cli::Command::Health => run_health_check(&config).await?,
        cli::Command::Config(ConfigCommand::Init) => init_config(&config)?,
        cli::Command::User(cmd) => {
            let (sql_store, store) = storage::store_from_config(&config).await?;
            users::handle(cmd, &sql_store, &store).await?
        }
        cli::Command::Auth(cmd) => {
            let (_, store) = storage::store_from_config(&config).await?;
            auth::handle(cmd, &store).await?
        }
    }

    Ok(())
}

fn init_tracing() {
    // Respect user-provided filters, default to info to avoid noisy stdout.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn print_version() {
    println!("authinfo {}", env!("CARGO_PKG_VERSION"));
}

/// Checks the database and a secret service round trip.
async fn run_health_check(config: &config::Config) -> Result<()> {
    let (sql_store, store) = storage::store_from_config(config).await?;
    run_store_health(&sql_store, &store).await?;
    println!("Storage: ok");
    Ok(())
}

async fn run_store_health<S: SecretsService>(
    sql_store: &SqlStore,
    store: &AuthInfoStore<S>,
) -> Result<()> {
    sql_store.ping().await?;

    let payload = b"ok";
    let encrypted = store
        .secrets()
        .encrypt(payload, EncryptionScope::Unscoped)
        .await?;
    let round_trip = store.secrets().decrypt(&encrypted).await?;
    if round_trip != payload {
        color_eyre::eyre::bail!("secret service round-trip failed");
    }
    Ok(())
}

fn init_config(config: &config::Config) -> Result<()> {
    let path = config::write_default_if_missing(config)?;
    println!("Config initialized at {}", path.display());
    Ok(())
}
