use std::sync::Arc;

use async_trait::async_trait;
use authinfo_core::{
    auth::{
        AuthInfoService, DeleteAuthInfoCommand, ExternalUserInfo, GetAuthInfoQuery,
        GetExternalUserInfoByLoginQuery, OAuthToken, SetAuthInfoCommand, UpdateAuthInfoCommand,
        UserAuth,
    },
    secrets::{EncryptionScope, SecretsService},
    user::{User, UserLookup},
    AuthInfoError,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};
use tracing::{debug, instrument};

use crate::sql_store::{
    bind_values, find_user, from_micros, now_micros, storage_err, to_micros, user_filter,
    where_clause, SqlStore, SqlValue,
};

const USER_AUTH_COLUMNS: &str = "id, user_id, auth_module, auth_id, created, \
     o_auth_access_token, o_auth_refresh_token, o_auth_token_type, o_auth_id_token, o_auth_expiry";

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Persists external identities in `user_auth`, keeping OAuth secrets encrypted at rest.
///
/// Secrets are encrypted (unscoped) and base64 encoded on the way in and decoded on the way
/// out; callers only ever see plaintext. Writes run in a single transaction each.
pub struct AuthInfoStore<S: SecretsService> {
    sql_store: SqlStore,
    secrets: S,
    user_lookup: Arc<dyn UserLookup>,
    clock: Clock,
}

impl<S: SecretsService> AuthInfoStore<S> {
    /// Build a store whose users are looked up in the same database.
    pub fn new(sql_store: SqlStore, secrets: S) -> Self {
        Self {
            user_lookup: Arc::new(sql_store.clone()),
            sql_store,
            secrets,
            clock: Arc::new(now_micros),
        }
    }

    /// Resolve logins through `user_lookup` instead of the `user` table of this database,
    /// for deployments where accounts live in another service.
    pub fn with_user_lookup(mut self, user_lookup: Arc<dyn UserLookup>) -> Self {
        self.user_lookup = user_lookup;
        self
    }

    /// Override the source of `created` timestamps.
    pub fn with_clock(
        mut self,
        clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static,
    ) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn secrets(&self) -> &S {
        &self.secrets
    }

    #[instrument(skip(self))]
    pub async fn get_user_by_id(&self, id: i64) -> Result<Option<User>, AuthInfoError> {
        let mut conn = self.sql_store.session().await?;
        find_user(&mut conn, &[("id", SqlValue::Int(id))]).await
    }

    /// Look a user up by the populated fields of `user`, overwriting it with the stored row
    /// when one matches. An empty `user` matches the first stored user.
    #[instrument(skip_all)]
    pub async fn get_user(&self, user: &mut User) -> Result<bool, AuthInfoError> {
        let filter = user_filter(user);
        let mut conn = self.sql_store.session().await?;
        match find_user(&mut conn, &filter).await? {
            Some(found) => {
                *user = found;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn build_user_auth(
        &self,
        user_id: i64,
        auth_module: &str,
        auth_id: &str,
        token: Option<&OAuthToken>,
    ) -> Result<UserAuth, AuthInfoError> {
        let mut user_auth = UserAuth {
            user_id,
            auth_module: auth_module.to_string(),
            auth_id: auth_id.to_string(),
            created: Some((self.clock)()),
            ..Default::default()
        };

        if let Some(token) = token {
            user_auth.oauth_access_token = self.encrypt_and_encode(&token.access_token).await?;
            user_auth.oauth_refresh_token = self.encrypt_and_encode(&token.refresh_token).await?;
            user_auth.oauth_token_type = self.encrypt_and_encode(&token.token_type).await?;
            if let Some(id_token) = token.id_token() {
                user_auth.oauth_id_token = self.encrypt_and_encode(id_token).await?;
            }
            user_auth.oauth_expiry = token.expiry;
        }

        Ok(user_auth)
    }

    async fn decrypt_secrets(&self, user_auth: &mut UserAuth) -> Result<(), AuthInfoError> {
        user_auth.oauth_access_token =
            self.decode_and_decrypt(&user_auth.oauth_access_token).await?;
        user_auth.oauth_refresh_token =
            self.decode_and_decrypt(&user_auth.oauth_refresh_token).await?;
        user_auth.oauth_token_type = self.decode_and_decrypt(&user_auth.oauth_token_type).await?;
        user_auth.oauth_id_token = self.decode_and_decrypt(&user_auth.oauth_id_token).await?;
        Ok(())
    }

    /// Encrypt with the default key and base64 encode. Empty input is encrypted too.
    pub(crate) async fn encrypt_and_encode(
        &self,
        plaintext: &str,
    ) -> Result<String, AuthInfoError> {
        let encrypted = self
            .secrets
            .encrypt(plaintext.as_bytes(), EncryptionScope::Unscoped)
            .await?;
        Ok(BASE64.encode(encrypted))
    }

    /// Base64 decode then decrypt. Empty input short-circuits to an empty string without
    /// calling the secret service.
    pub(crate) async fn decode_and_decrypt(
        &self,
        encoded: &str,
    ) -> Result<String, AuthInfoError> {
        if encoded.is_empty() {
            return Ok(String::new());
        }
        let decoded = BASE64
            .decode(encoded)
            .map_err(|e| AuthInfoError::crypto(format!("base64 decode failed: {e}")))?;
        let decrypted = self.secrets.decrypt(&decoded).await?;
        String::from_utf8(decrypted)
            .map_err(|e| AuthInfoError::crypto(format!("decrypted secret is not utf-8: {e}")))
    }
}

#[async_trait]
impl<S: SecretsService> AuthInfoService for AuthInfoStore<S> {
    #[instrument(skip_all)]
    async fn get_external_user_info_by_login(
        &self,
        query: &GetExternalUserInfoByLoginQuery,
    ) -> Result<ExternalUserInfo, AuthInfoError> {
        let user = self
            .user_lookup
            .get_user_by_login(&query.login_or_email)
            .await?;

        let auth_info = self
            .get_auth_info(&GetAuthInfoQuery {
                user_id: user.id,
                ..Default::default()
            })
            .await?;

        Ok(ExternalUserInfo {
            user_id: user.id,
            login: user.login,
            email: user.email,
            name: user.name,
            is_disabled: user.is_disabled,
            auth_module: auth_info.auth_module,
            auth_id: auth_info.auth_id,
        })
    }

    #[instrument(skip_all, fields(user_id = query.user_id, auth_module = %query.auth_module))]
    async fn get_auth_info(&self, query: &GetAuthInfoQuery) -> Result<UserAuth, AuthInfoError> {
        if query.user_id == 0 && query.auth_id.is_empty() {
            return Err(AuthInfoError::UserNotFound);
        }

        let filter = identity_filter(query.user_id, &query.auth_module, &query.auth_id);
        let sql = format!(
            "SELECT {USER_AUTH_COLUMNS} FROM user_auth WHERE {} ORDER BY created DESC, id DESC LIMIT 1",
            where_clause(&filter)
        );

        let row = {
            let mut conn = self.sql_store.session().await?;
            bind_values(sqlx::query(&sql), filter.iter().map(|(_, v)| v))
                .fetch_optional(&mut *conn)
                .await
                .map_err(storage_err)?
        };

        let mut user_auth = match row {
            Some(row) => parse_user_auth(&row)?,
            None => return Err(AuthInfoError::UserNotFound),
        };
        self.decrypt_secrets(&mut user_auth).await?;
        Ok(user_auth)
    }

    #[instrument(skip_all, fields(user_id = cmd.user_id, auth_module = %cmd.auth_module))]
    async fn set_auth_info(&self, cmd: &SetAuthInfoCommand) -> Result<(), AuthInfoError> {
        let user_auth = self
            .build_user_auth(
                cmd.user_id,
                &cmd.auth_module,
                &cmd.auth_id,
                cmd.oauth_token.as_ref(),
            )
            .await?;

        let mut tx = self.sql_store.begin().await?;
        sqlx::query(
            "INSERT INTO user_auth (user_id, auth_module, auth_id, created, \
             o_auth_access_token, o_auth_refresh_token, o_auth_token_type, o_auth_id_token, o_auth_expiry) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(user_auth.user_id)
        .bind(&user_auth.auth_module)
        .bind(&user_auth.auth_id)
        .bind(user_auth.created.as_ref().map(to_micros))
        .bind(&user_auth.oauth_access_token)
        .bind(&user_auth.oauth_refresh_token)
        .bind(&user_auth.oauth_token_type)
        .bind(&user_auth.oauth_id_token)
        .bind(user_auth.oauth_expiry.as_ref().map(to_micros))
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?;
        tx.commit().await.map_err(storage_err)
    }

    // Rows are matched on (user_id, auth_module) only, so every auth_id of the module is
    // rewritten. Existing callers depend on this.
    #[instrument(skip_all, fields(user_id = cmd.user_id, auth_module = %cmd.auth_module))]
    async fn update_auth_info(&self, cmd: &UpdateAuthInfoCommand) -> Result<(), AuthInfoError> {
        let user_auth = self
            .build_user_auth(
                cmd.user_id,
                &cmd.auth_module,
                &cmd.auth_id,
                cmd.oauth_token.as_ref(),
            )
            .await?;

        let cond = identity_filter(cmd.user_id, &cmd.auth_module, "");
        if cond.is_empty() {
            return Err(AuthInfoError::EmptyCondition);
        }
        let set = populated_columns(&user_auth);
        let sql = format!(
            "UPDATE user_auth SET {} WHERE {}",
            set.iter()
                .map(|(column, _)| format!("{column} = ?"))
                .collect::<Vec<_>>()
                .join(", "),
            where_clause(&cond)
        );

        let mut tx = self.sql_store.begin().await?;
        let result = bind_values(
            sqlx::query(&sql),
            set.iter().chain(cond.iter()).map(|(_, v)| v),
        )
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?;
        debug!(
            user_id = cmd.user_id,
            auth_module = %cmd.auth_module,
            rows = result.rows_affected(),
            "Updated user_auth"
        );
        tx.commit().await.map_err(storage_err)
    }

    /// Deletes every row matching all populated fields of `cmd.user_auth`.
    ///
    /// When secret fields are populated, every row matching the non-secret fields is
    /// decrypted before comparison. A row that fails to decrypt aborts the whole delete,
    /// even if it would not have matched, and nothing is removed.
    #[instrument(skip_all, fields(id = cmd.user_auth.id, user_id = cmd.user_auth.user_id))]
    async fn delete_auth_info(&self, cmd: &DeleteAuthInfoCommand) -> Result<(), AuthInfoError> {
        let record = &cmd.user_auth;
        let filter = plain_filter(record);
        let has_secrets = secret_fields(record).iter().any(|s| !s.is_empty());
        if filter.is_empty() && !has_secrets {
            return Err(AuthInfoError::EmptyCondition);
        }

        let mut tx = self.sql_store.begin().await?;
        let deleted = if has_secrets {
            // Ciphertext is randomized, so secret fields are compared after decryption.
            let mut sql = format!("SELECT {USER_AUTH_COLUMNS} FROM user_auth");
            if !filter.is_empty() {
                sql.push_str(" WHERE ");
                sql.push_str(&where_clause(&filter));
            }
            let rows = bind_values(sqlx::query(&sql), filter.iter().map(|(_, v)| v))
                .fetch_all(&mut *tx)
                .await
                .map_err(storage_err)?;

            let mut deleted = 0;
            for row in rows {
                let mut candidate = parse_user_auth(&row)?;
                self.decrypt_secrets(&mut candidate).await?;
                if !secrets_match(record, &candidate) {
                    continue;
                }
                deleted += sqlx::query("DELETE FROM user_auth WHERE id = ?")
                    .bind(candidate.id)
                    .execute(&mut *tx)
                    .await
                    .map_err(storage_err)?
                    .rows_affected();
            }
            deleted
        } else {
            let sql = format!("DELETE FROM user_auth WHERE {}", where_clause(&filter));
            bind_values(sqlx::query(&sql), filter.iter().map(|(_, v)| v))
                .execute(&mut *tx)
                .await
                .map_err(storage_err)?
                .rows_affected()
        };
        debug!(rows = deleted, "Deleted user_auth");
        tx.commit().await.map_err(storage_err)
    }
}

/// Lookup keys that are set; zero ids and empty strings do not constrain the match.
fn identity_filter(
    user_id: i64,
    auth_module: &str,
    auth_id: &str,
) -> Vec<(&'static str, SqlValue)> {
    let mut filter = Vec::new();
    if user_id != 0 {
        filter.push(("user_id", SqlValue::Int(user_id)));
    }
    if !auth_module.is_empty() {
        filter.push(("auth_module", SqlValue::Text(auth_module.to_string())));
    }
    if !auth_id.is_empty() {
        filter.push(("auth_id", SqlValue::Text(auth_id.to_string())));
    }
    filter
}

/// Populated columns that can be compared directly in SQL (everything but the secrets).
fn plain_filter(user_auth: &UserAuth) -> Vec<(&'static str, SqlValue)> {
    let mut filter = Vec::new();
    if user_auth.id != 0 {
        filter.push(("id", SqlValue::Int(user_auth.id)));
    }
    filter.extend(identity_filter(
        user_auth.user_id,
        &user_auth.auth_module,
        &user_auth.auth_id,
    ));
    if let Some(created) = &user_auth.created {
        filter.push(("created", SqlValue::Int(to_micros(created))));
    }
    if let Some(expiry) = &user_auth.oauth_expiry {
        filter.push(("o_auth_expiry", SqlValue::Int(to_micros(expiry))));
    }
    filter
}

/// Every populated column of an encoded record, secrets included. Used as an update's SET list.
fn populated_columns(user_auth: &UserAuth) -> Vec<(&'static str, SqlValue)> {
    let mut columns = plain_filter(user_auth);
    for (column, value) in [
        ("o_auth_access_token", &user_auth.oauth_access_token),
        ("o_auth_refresh_token", &user_auth.oauth_refresh_token),
        ("o_auth_token_type", &user_auth.oauth_token_type),
        ("o_auth_id_token", &user_auth.oauth_id_token),
    ] {
        if !value.is_empty() {
            columns.push((column, SqlValue::Text(value.clone())));
        }
    }
    columns
}

fn secret_fields(user_auth: &UserAuth) -> [&str; 4] {
    [
        user_auth.oauth_access_token.as_str(),
        user_auth.oauth_refresh_token.as_str(),
        user_auth.oauth_token_type.as_str(),
        user_auth.oauth_id_token.as_str(),
    ]
}

fn secrets_match(wanted: &UserAuth, candidate: &UserAuth) -> bool {
    secret_fields(wanted)
        .iter()
        .zip(secret_fields(candidate))
        .all(|(want, have)| want.is_empty() || *want == have)
}

fn parse_user_auth(row: &SqliteRow) -> Result<UserAuth, AuthInfoError> {
    let expiry: Option<i64> = row.try_get("o_auth_expiry").map_err(storage_err)?;
    Ok(UserAuth {
        id: row.try_get("id").map_err(storage_err)?,
        user_id: row.try_get("user_id").map_err(storage_err)?,
        auth_module: row.try_get("auth_module").map_err(storage_err)?,
        auth_id: row.try_get("auth_id").map_err(storage_err)?,
        created: Some(from_micros(row.try_get("created").map_err(storage_err)?)?),
        oauth_access_token: row.try_get("o_auth_access_token").map_err(storage_err)?,
        oauth_refresh_token: row.try_get("o_auth_refresh_token").map_err(storage_err)?,
        oauth_token_type: row.try_get("o_auth_token_type").map_err(storage_err)?,
        oauth_id_token: row.try_get("o_auth_id_token").map_err(storage_err)?,
        oauth_expiry: expiry.map(from_micros).transpose()?,
    })
}
