use clap::{Args, Parser, Subcommand};

/// Operator tool for the encrypted external-identity store.
#[derive(Parser, Debug)]
#[command(
    name = "authinfo",
    about = "Inspect and maintain per-user external identity records",
    version,
    propagate_version = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print version and exit.
    Version,
    /// Check the database and the secret service round trip.
    Health,
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Manage local users.
    #[command(subcommand)]
    User(UserCommand),
    /// Manage external identity records.
    #[command(subcommand)]
    Auth(AuthCommand),
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    /// Register a user.
    Add {
        #[arg(long)]
        login: String,
        #[arg(long)]
        email: String,
        #[arg(long, default_value = "")]
        name: String,
    },
    /// Show a user by id.
    Show { id: i64 },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum AuthCommand {
    /// Show the most recent record matching the given keys.
    Get {
        #[arg(long, default_value_t = 0)]
        user_id: i64,
        #[arg(long, default_value = "")]
        module: String,
        #[arg(long, default_value = "")]
        auth_id: String,
    },
    /// Record a new login (always inserts).
    Set(TokenArgs),
    /// Rewrite every record of the user's module.
    Update(TokenArgs),
    /// Delete the most recent record of a user's module.
    Delete {
        #[arg(long)]
        user_id: i64,
        #[arg(long)]
        module: String,
    },
    /// Show the profile and last external identity of a login or email.
    Whois { login_or_email: String },
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct TokenArgs {
    #[arg(long)]
    pub user_id: i64,
    #[arg(long)]
    pub module: String,
    #[arg(long, default_value = "")]
    pub auth_id: String,
    /// Without an access token the record carries no OAuth token at all.
    #[arg(long)]
    pub access_token: Option<String>,
    #[arg(long, default_value = "")]
    pub refresh_token: String,
    #[arg(long, default_value = "")]
    pub token_type: String,
    #[arg(long)]
    pub id_token: Option<String>,
    /// Token lifetime in seconds from now.
    #[arg(long)]
    pub expires_in: Option<i64>,
}
