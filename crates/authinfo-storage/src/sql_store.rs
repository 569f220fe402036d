use std::{path::Path, str::FromStr, time::Duration};

use async_trait::async_trait;
use authinfo_core::{
    user::{NewUser, User, UserLookup},
    AuthInfoError,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{
    pool::PoolConnection,
    query::Query,
    sqlite::{
        SqliteArguments, SqliteConnectOptions, SqliteConnection, SqliteJournalMode,
        SqlitePoolOptions, SqliteRow,
    },
    Row, Sqlite, SqlitePool, Transaction,
};
use tracing::{debug, instrument};

pub const MEMORY_DSN: &str = ":memory:";

/// Database settings, usually read from the `[database]` table of the config file.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file path, or `:memory:`.
    pub path: String,
    /// How long a statement waits on a locked database.
    pub busy_timeout_ms: u64,
    /// How long a caller waits for a pooled connection.
    pub acquire_timeout_ms: u64,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: MEMORY_DSN.to_string(),
            busy_timeout_ms: 5_000,
            acquire_timeout_ms: 30_000,
            max_connections: 8,
        }
    }
}

impl DatabaseConfig {
    pub fn with_path(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    fn is_memory(&self) -> bool {
        self.path == MEMORY_DSN
    }
}

/// Pooled SQLite handle shared by the store and the user lookup.
///
/// Read work runs on a [`SqlStore::session`]; writes run on a [`SqlStore::begin`]
/// transaction which rolls back when dropped without `commit`.
#[derive(Debug, Clone)]
pub struct SqlStore {
    pool: SqlitePool,
}

impl SqlStore {
    /// Open (creating if missing) the database and apply the embedded migrations.
    #[instrument(skip_all, fields(path = %config.path))]
    pub async fn open(config: &DatabaseConfig) -> Result<Self, AuthInfoError> {
        let mut options = if config.is_memory() {
            SqliteConnectOptions::from_str("sqlite::memory:").map_err(storage_err)?
        } else {
            if let Some(parent) = Path::new(&config.path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(storage_err)?;
                }
            }
            SqliteConnectOptions::new()
                .filename(&config.path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
        };
        options = options
            .busy_timeout(Duration::from_millis(config.busy_timeout_ms))
            .foreign_keys(true);

        // Every connection to `:memory:` is a distinct database, so keep exactly one alive.
        let pool_options = if config.is_memory() {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(config.max_connections.max(1))
        };

        let pool = pool_options
            .acquire_timeout(Duration::from_millis(config.acquire_timeout_ms))
            .connect_with(options)
            .await
            .map_err(storage_err)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| AuthInfoError::storage(format!("failed to run migrations: {e}")))?;

        debug!("sql store ready");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Acquire a plain read session. The connection returns to the pool on drop.
    pub async fn session(&self) -> Result<PoolConnection<Sqlite>, AuthInfoError> {
        self.pool.acquire().await.map_err(storage_err)
    }

    /// Open a transactional session. Nothing is persisted unless it is committed.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, AuthInfoError> {
        self.pool.begin().await.map_err(storage_err)
    }

    /// Cheap liveness probe used by health checks.
    pub async fn ping(&self) -> Result<(), AuthInfoError> {
        let mut conn = self.session().await?;
        sqlx::query("SELECT 1")
            .execute(&mut *conn)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    #[instrument(skip_all, fields(login = %new_user.login))]
    pub async fn create_user(&self, new_user: &NewUser) -> Result<User, AuthInfoError> {
        let created = now_micros();
        let mut tx = self.begin().await?;
        let result = sqlx::query(
            "INSERT INTO user (login, email, name, is_disabled, created) VALUES (?, ?, ?, 0, ?)",
        )
        .bind(&new_user.login)
        .bind(&new_user.email)
        .bind(&new_user.name)
        .bind(to_micros(&created))
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?;
        tx.commit().await.map_err(storage_err)?;

        Ok(User {
            id: result.last_insert_rowid(),
            login: new_user.login.clone(),
            email: new_user.email.clone(),
            name: new_user.name.clone(),
            is_disabled: false,
            created: Some(created),
        })
    }
}

#[async_trait]
impl UserLookup for SqlStore {
    #[instrument(skip_all)]
    async fn get_user_by_login(&self, login_or_email: &str) -> Result<User, AuthInfoError> {
        if login_or_email.is_empty() {
            return Err(AuthInfoError::UserNotFound);
        }

        let mut conn = self.session().await?;
        // Login takes precedence over email when both could match.
        for column in ["login", "email"] {
            let filter = vec![(column, SqlValue::Text(login_or_email.to_string()))];
            if let Some(user) = find_user(&mut conn, &filter).await? {
                return Ok(user);
            }
        }
        Err(AuthInfoError::UserNotFound)
    }
}

/// A value bound to a `?` placeholder in dynamically built statements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SqlValue {
    Int(i64),
    Text(String),
}

/// `col = ? AND col = ?` for the given column/value pairs.
pub(crate) fn where_clause(filter: &[(&str, SqlValue)]) -> String {
    filter
        .iter()
        .map(|(column, _)| format!("{column} = ?"))
        .collect::<Vec<_>>()
        .join(" AND ")
}

pub(crate) fn bind_values<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    values: impl IntoIterator<Item = &'q SqlValue>,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for value in values {
        query = match value {
            SqlValue::Int(v) => query.bind(*v),
            SqlValue::Text(v) => query.bind(v.as_str()),
        };
    }
    query
}

/// Fields of a partial user that take part in a lookup (non-zero, non-empty).
pub(crate) fn user_filter(user: &User) -> Vec<(&'static str, SqlValue)> {
    let mut filter = Vec::new();
    if user.id != 0 {
        filter.push(("id", SqlValue::Int(user.id)));
    }
    for (column, value) in [
        ("login", &user.login),
        ("email", &user.email),
        ("name", &user.name),
    ] {
        if !value.is_empty() {
            filter.push((column, SqlValue::Text(value.clone())));
        }
    }
    if user.is_disabled {
        filter.push(("is_disabled", SqlValue::Int(1)));
    }
    filter
}

pub(crate) async fn find_user(
    conn: &mut SqliteConnection,
    filter: &[(&str, SqlValue)],
) -> Result<Option<User>, AuthInfoError> {
    let mut sql = "SELECT id, login, email, name, is_disabled, created FROM user".to_string();
    if !filter.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&where_clause(filter));
    }
    sql.push_str(" ORDER BY id LIMIT 1");

    let row = bind_values(sqlx::query(&sql), filter.iter().map(|(_, v)| v))
        .fetch_optional(&mut *conn)
        .await
        .map_err(storage_err)?;

    row.as_ref().map(parse_user).transpose()
}

fn parse_user(row: &SqliteRow) -> Result<User, AuthInfoError> {
    Ok(User {
        id: row.try_get("id").map_err(storage_err)?,
        login: row.try_get("login").map_err(storage_err)?,
        email: row.try_get("email").map_err(storage_err)?,
        name: row.try_get("name").map_err(storage_err)?,
        is_disabled: row.try_get::<i64, _>("is_disabled").map_err(storage_err)? != 0,
        created: Some(from_micros(row.try_get("created").map_err(storage_err)?)?),
    })
}

/// Current time at the precision the database keeps.
pub fn now_micros() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_micros(now.timestamp_micros()).unwrap_or(now)
}

pub(crate) fn to_micros(at: &DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

pub(crate) fn from_micros(micros: i64) -> Result<DateTime<Utc>, AuthInfoError> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| AuthInfoError::storage(format!("timestamp out of range: {micros}")))
}

pub(crate) fn storage_err<E: ToString>(err: E) -> AuthInfoError {
    AuthInfoError::Storage {
        reason: err.to_string(),
    }
}
