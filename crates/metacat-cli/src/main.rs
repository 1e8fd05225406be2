//! metacat CLI - operator tasks against the configured session store
//!
//! Usage:
//!   metacat check-config
//!   metacat create-admin --username root --email root@example.com
//!   metacat list-users --role admin
//!   metacat revoke-sessions <username>
//!   metacat prune-tokens

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use metacat_api::auth::{AuthService, CreateUserRequest, LogoutRequest, StorePolicy};
use metacat_core::{open_store, AppConfig, UserFilter, UserRole, UserStatus};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "metacat")]
#[command(about = "metacat credential service administration")]
#[command(version)]
struct Cli {
    /// TOML configuration file; environment variables still override it
    #[arg(long, global = true, env = "CONFIG_FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration and print a summary
    CheckConfig,
    /// Create an administrator account
    CreateAdmin {
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        /// Initial password
        #[arg(long, env = "METACAT_ADMIN_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long)]
        display_name: Option<String>,
    },
    /// List user accounts
    ListUsers {
        #[arg(long)]
        role: Option<UserRole>,
        #[arg(long)]
        status: Option<UserStatus>,
        #[arg(long)]
        search: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Revoke every refresh token held by a user
    RevokeSessions {
        username: String,
    },
    /// Delete expired refresh-token records
    PruneTokens,
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::from_file(&path)
            .and_then(AppConfig::with_env_override)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => AppConfig::from_env().context("failed to load configuration")?,
    };
    config.validate().context("invalid configuration")?;
    Ok(config)
}

async fn auth_service(config: &AppConfig) -> anyhow::Result<AuthService> {
    let store = open_store(&config.store)
        .await
        .with_context(|| format!("failed to open {} session store", config.store.backend))?;
    let policy = StorePolicy::from_config(&config.store);
    Ok(AuthService::new(store, &config.auth, policy)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "metacat_core=warn,audit=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config)?;

    match cli.command {
        Commands::CheckConfig => {
            let summary = serde_json::json!({
                "server": format!("{}:{}", config.server.host, config.server.port),
                "store": config.store.backend.as_str(),
                "issuer": config.auth.issuer,
                "access_token_ttl_secs": config.auth.access_token_ttl_secs,
                "refresh_token_ttl_days": config.auth.refresh_token_ttl_days,
                "revoke_family_on_reuse": config.auth.revoke_family_on_reuse,
                "development_secret": config.auth.uses_development_secret(),
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::CreateAdmin {
            username,
            email,
            password,
            display_name,
        } => {
            let auth = auth_service(&config).await?;
            let request = CreateUserRequest {
                username,
                email,
                password,
                display_name,
                role: UserRole::Admin,
            };
            // The nil actor marks accounts created from the command line
            let user = auth.create_user(Uuid::nil(), request).await?;
            println!("Created administrator {} ({})", user.username, user.id);
        }
        Commands::ListUsers {
            role,
            status,
            search,
            limit,
        } => {
            let auth = auth_service(&config).await?;
            let users = auth
                .list_users(UserFilter {
                    role,
                    status,
                    search,
                    limit,
                    offset: 0,
                })
                .await?;
            for user in users {
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    user.id, user.username, user.email, user.role, user.status
                );
            }
        }
        Commands::RevokeSessions { username } => {
            let auth = auth_service(&config).await?;
            let Some(user) = auth
                .list_users(UserFilter {
                    search: Some(username.clone()),
                    limit: 200,
                    ..Default::default()
                })
                .await?
                .into_iter()
                .find(|u| u.username.eq_ignore_ascii_case(&username))
            else {
                bail!("no user named {username}");
            };

            auth.logout(
                user.id,
                &LogoutRequest {
                    refresh_token: None,
                    logout_all_devices: true,
                },
            )
            .await;
            println!("Revoked all sessions of {}", user.username);
        }
        Commands::PruneTokens => {
            let auth = auth_service(&config).await?;
            let pruned = auth.prune_expired().await?;
            println!("Pruned {pruned} expired refresh tokens");
        }
    }

    Ok(())
}
