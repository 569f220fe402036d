use authinfo_core::{secrets::SecretsService, user::NewUser};
use authinfo_storage::{AuthInfoStore, SqlStore};
use color_eyre::Result;

use crate::cli::UserCommand;

/// Execute a user subcommand.
pub async fn handle<S: SecretsService>(
    cmd: UserCommand,
    sql_store: &SqlStore,
    store: &AuthInfoStore<S>,
) -> Result<()> {
    match cmd {
        UserCommand::Add { login, email, name } => {
            let user = sql_store
                .create_user(&NewUser { login, email, name })
                .await?;
            println!("Created user {}: {}", user.id, user.login);
        }
        UserCommand::Show { id } => match store.get_user_by_id(id).await? {
            Some(user) => {
                println!("{} {} <{}>", user.id, user.login, user.email);
                if !user.name.is_empty() {
                    println!("    name: {}", user.name);
                }
                if user.is_disabled {
                    println!("    disabled");
                }
            }
            None => println!("No user with id {id}."),
        },
    }

    Ok(())
}
