use authinfo_core::auth::{
    AuthInfoService, DeleteAuthInfoCommand, GetAuthInfoQuery, GetExternalUserInfoByLoginQuery,
    OAuthToken, SetAuthInfoCommand, UpdateAuthInfoCommand, UserAuth,
};
use chrono::{DateTime, Duration, Utc};
use color_eyre::{eyre::eyre, Result};

use crate::cli::{AuthCommand, TokenArgs};

/// Execute an auth subcommand against any `AuthInfoService`.
pub async fn handle(cmd: AuthCommand, service: &dyn AuthInfoService) -> Result<()> {
    match cmd {
        AuthCommand::Get {
            user_id,
            module,
            auth_id,
        } => {
            let info = service
                .get_auth_info(&GetAuthInfoQuery {
                    user_id,
                    auth_module: module,
                    auth_id,
                })
                .await?;
            println!("{}", describe(&info));
        }
        AuthCommand::Set(args) => {
            let (user_id, auth_module, auth_id, oauth_token) = split_token_args(args)?;
            service
                .set_auth_info(&SetAuthInfoCommand {
                    user_id,
                    auth_module,
                    auth_id,
                    oauth_token,
                })
                .await?;
            println!("Recorded login for user {user_id}");
        }
        AuthCommand::Update(args) => {
            let (user_id, auth_module, auth_id, oauth_token) = split_token_args(args)?;
            service
                .update_auth_info(&UpdateAuthInfoCommand {
                    user_id,
                    auth_module: auth_module.clone(),
                    auth_id,
                    oauth_token,
                })
                .await?;
            println!("Updated {auth_module} records for user {user_id}");
        }
        AuthCommand::Delete { user_id, module } => {
            let info = service
                .get_auth_info(&GetAuthInfoQuery {
                    user_id,
                    auth_module: module,
                    auth_id: String::new(),
                })
                .await?;
            let id = info.id;
            service
                .delete_auth_info(&DeleteAuthInfoCommand { user_auth: info })
                .await?;
            println!("Deleted record {id}");
        }
        AuthCommand::Whois { login_or_email } => {
            let info = service
                .get_external_user_info_by_login(&GetExternalUserInfoByLoginQuery {
                    login_or_email,
                })
                .await?;
            println!(
                "{} <{}> (user {}){} via {} as {}",
                info.login,
                info.email,
                info.user_id,
                if info.is_disabled { " [disabled]" } else { "" },
                info.auth_module,
                info.auth_id
            );
        }
    }

    Ok(())
}

fn split_token_args(args: TokenArgs) -> Result<(i64, String, String, Option<OAuthToken>)> {
    let token = match args.access_token {
        Some(access_token) => {
            let expiry = args.expires_in.map(expiry_after).transpose()?;
            let token = OAuthToken {
                access_token,
                refresh_token: args.refresh_token,
                token_type: args.token_type,
                expiry,
                ..Default::default()
            };
            Some(match args.id_token {
                Some(id_token) => token.with_id_token(id_token),
                None => token,
            })
        }
        None => None,
    };
    Ok((args.user_id, args.module, args.auth_id, token))
}

fn expiry_after(secs: i64) -> Result<DateTime<Utc>> {
    Duration::try_seconds(secs)
        .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
        .ok_or_else(|| eyre!("--expires-in {secs} is out of range"))
}

/// One-line summary of a record. Secrets are reported by presence only.
fn describe(info: &UserAuth) -> String {
    let flag = |value: &str| if value.is_empty() { "-" } else { "yes" };
    format!(
        "#{} user={} module={} auth_id={} created={} access={} refresh={} id_token={} expiry={}",
        info.id,
        info.user_id,
        info.auth_module,
        info.auth_id,
        info.created
            .map(|c| c.to_rfc3339())
            .unwrap_or_else(|| "-".to_string()),
        flag(&info.oauth_access_token),
        flag(&info.oauth_refresh_token),
        flag(&info.oauth_id_token),
        info.oauth_expiry
            .map(|e| e.to_rfc3339())
            .unwrap_or_else(|| "-".to_string()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage;

    fn token_args(access_token: Option<&str>) -> TokenArgs {
        TokenArgs {
            user_id: 1,
            module: "oauth_x".into(),
            auth_id: "abc".into(),
            access_token: access_token.map(str::to_string),
            refresh_token: String::new(),
            token_type: "Bearer".into(),
            id_token: Some("jwt".into()),
            expires_in: Some(60),
        }
    }

    #[test]
    fn token_is_absent_without_access_token() {
        let (_, _, _, token) = split_token_args(token_args(None)).expect("split");
        assert!(token.is_none());

        let (_, _, _, token) = split_token_args(token_args(Some("tok"))).expect("split");
        let token = token.expect("token");
        assert_eq!(token.id_token(), Some("jwt"));
        assert!(token.expiry.expect("expiry") > Utc::now());
    }

    #[test]
    fn out_of_range_expiry_is_an_error() {
        let mut args = token_args(Some("tok"));
        args.expires_in = Some(i64::MAX);
        assert!(split_token_args(args).is_err());

        let mut args = token_args(Some("tok"));
        args.expires_in = Some(10_000_000_000_000);
        assert!(split_token_args(args).is_err());
    }

    #[test]
    fn describe_hides_secrets() {
        let line = describe(&UserAuth {
            id: 4,
            user_id: 1,
            auth_module: "oauth_x".into(),
            oauth_access_token: "super-secret".into(),
            ..Default::default()
        });
        assert!(!line.contains("super-secret"));
        assert!(line.contains("access=yes"));
        assert!(line.contains("refresh=-"));
    }

    #[tokio::test]
    async fn set_get_delete_through_the_service() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (_, store) = storage::test_store(dir.path()).await;

        handle(AuthCommand::Set(token_args(Some("tok"))), &store)
            .await
            .expect("set");
        handle(
            AuthCommand::Get {
                user_id: 1,
                module: String::new(),
                auth_id: String::new(),
            },
            &store,
        )
        .await
        .expect("get");
        handle(
            AuthCommand::Delete {
                user_id: 1,
                module: "oauth_x".into(),
            },
            &store,
        )
        .await
        .expect("delete");

        let err = store
            .get_auth_info(&GetAuthInfoQuery {
                user_id: 1,
                ..Default::default()
            })
            .await
            .expect_err("deleted");
        assert!(err.is_not_found());
    }
}
