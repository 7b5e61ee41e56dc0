//! pdfshare Admin CLI
//!
//! Offline administration of the server's `state.json`. Stop the server
//! first: a running server overwrites the file on its next write.
//!
//! # Usage
//!
//! ```bash
//! pdfshare-admin user add alice --role publisher --password s3cret
//! pdfshare-admin user list
//! pdfshare-admin token issue 1
//! ```

use clap::{Args, Parser, Subcommand};
use pdfshare::config::Config;
use pdfshare::models::{Role, UserId};
use pdfshare::server::{PersistedState, ServerStorage, TokenService, UserStore};
use std::path::PathBuf;

// ============================================================================
// CLI Structure
// ============================================================================

#[derive(Parser)]
#[command(name = "pdfshare-admin")]
#[command(version)]
#[command(about = "pdfshare server administration tool")]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage users
    User(UserCommand),
    /// Manage session tokens
    Token(TokenCommand),
}

#[derive(Args)]
struct UserCommand {
    #[command(subcommand)]
    command: UserSubcommand,
}

#[derive(Subcommand)]
enum UserSubcommand {
    /// Add a new user
    Add {
        username: String,
        /// publisher or subscriber
        #[arg(long, short)]
        role: Role,
        #[arg(long, short)]
        password: String,
    },
    /// List all users
    List,
}

#[derive(Args)]
struct TokenCommand {
    #[command(subcommand)]
    command: TokenSubcommand,
}

#[derive(Subcommand)]
enum TokenSubcommand {
    /// Issue a session token for an existing user
    Issue {
        user_id: UserId,
    },
}

// ============================================================================
// Commands
// ============================================================================

fn add_user(
    storage: &ServerStorage,
    username: String,
    role: Role,
    password: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let state = storage.load_state()?.unwrap_or_default();
    let users = UserStore::restore(state.users);

    let user = users.register(&username, &password, role)?;

    storage.save_state(&PersistedState {
        users: users.snapshot(),
        documents: state.documents,
    })?;

    println!("Added user: {}", user.username);
    println!("  Id: {}", user.id);
    println!("  Role: {}", user.role);

    Ok(())
}

fn list_users(storage: &ServerStorage) -> Result<(), Box<dyn std::error::Error>> {
    let state = storage.load_state()?.unwrap_or_default();
    let users = UserStore::restore(state.users).list();

    if users.is_empty() {
        println!("No users registered.");
        return Ok(());
    }

    println!("{:<8} {:<32} {:<12} {:<25}", "ID", "USERNAME", "ROLE", "CREATED");
    println!("{}", "-".repeat(80));

    for user in &users {
        println!(
            "{:<8} {:<32} {:<12} {:<25}",
            user.id,
            user.username,
            user.role,
            user.created_at.to_rfc3339()
        );
    }

    println!();
    println!("Total: {} user(s)", users.len());

    Ok(())
}

fn issue_token(
    storage: &ServerStorage,
    config: &Config,
    user_id: UserId,
) -> Result<(), Box<dyn std::error::Error>> {
    let secret = config
        .token_secret
        .as_deref()
        .ok_or("token_secret must be configured to issue tokens offline")?;

    let state = storage.load_state()?.unwrap_or_default();
    let user = UserStore::restore(state.users)
        .get(user_id)
        .ok_or_else(|| format!("User {} not found", user_id))?;

    let tokens = TokenService::new(secret.as_bytes(), config.token_ttl());
    println!("{}", tokens.issue(user.id, user.role)?);

    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();

    let result = Config::load(cli.config)
        .map_err(Into::into)
        .and_then(|config| {
            let storage = ServerStorage::new(&config.data_dir);
            match cli.command {
                Commands::User(user_cmd) => match user_cmd.command {
                    UserSubcommand::Add {
                        username,
                        role,
                        password,
                    } => add_user(&storage, username, role, password),
                    UserSubcommand::List => list_users(&storage),
                },
                Commands::Token(token_cmd) => match token_cmd.command {
                    TokenSubcommand::Issue { user_id } => issue_token(&storage, &config, user_id),
                },
            }
        });

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
