//! GSuite MCP Broker
//!
//! Administers the per-account Google credentials that agent tools run
//! with, and routes single tool calls from the command line.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use gsuite_mcp::auth::{
    AccountRegistry, BrowserPrompt, ClientSecret, CredentialStatus, CredentialStore, OAuthClient,
    TokenLifecycleManager,
};
use gsuite_mcp::config::Config;
use gsuite_mcp::error::Result;
use gsuite_mcp::router::ToolRouter;

/// GSuite MCP Broker
#[derive(Parser)]
#[command(name = "gsuite-mcp")]
#[command(author, version, about = "Multi-account Google credentials for agent tools")]
struct Cli {
    /// Path to the OAuth client secret file
    #[arg(long, global = true)]
    gauth_file: Option<PathBuf>,

    /// Path to the accounts file
    #[arg(long, global = true)]
    accounts_file: Option<PathBuf>,

    /// Directory of stored credentials
    #[arg(long, global = true)]
    credentials_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured accounts
    Accounts,

    /// Sign in to an account through the browser
    Auth {
        /// Account email
        email: String,

        /// Print the URL instead of opening a browser
        #[arg(long)]
        no_browser: bool,
    },

    /// Show the credential state of every account
    Status,

    /// Print a valid access token for an account
    Token {
        /// Account email
        email: String,

        /// Scope the token must carry (repeatable)
        #[arg(long = "scope")]
        scopes: Vec<String>,
    },

    /// Route one tool call
    Call {
        /// Tool name
        tool: String,

        /// Tool arguments as JSON, including __user_id__
        #[arg(long, default_value = "{}")]
        args: String,
    },

    /// Delete the stored credential of an account
    Logout {
        /// Account email
        email: String,
    },
}

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(Cli::parse()).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::new()?;
    if let Some(path) = cli.gauth_file {
        config.gauth_path = path;
    }
    if let Some(path) = cli.accounts_file {
        config.accounts_path = path;
    }
    if let Some(path) = cli.credentials_dir {
        config.credentials_dir = path;
    }

    let registry = Arc::new(AccountRegistry::load(&config.accounts_path)?);

    if let Commands::Accounts = cli.command {
        for account in registry.accounts() {
            println!("{}", account.to_description());
        }
        return Ok(());
    }

    let secret = ClientSecret::load(&config.gauth_path, config.redirect_uri.as_deref())?;
    let no_browser = matches!(cli.command, Commands::Auth { no_browser: true, .. });
    let prompt = if no_browser {
        BrowserPrompt::without_browser()
    } else {
        BrowserPrompt::new()
    };

    let manager = Arc::new(
        TokenLifecycleManager::new(
            registry.clone(),
            CredentialStore::new(&config.credentials_dir),
            OAuthClient::new(Arc::new(secret)),
        )
        .with_config(&config)
        .with_prompt(Arc::new(prompt)),
    );

    match cli.command {
        Commands::Accounts => {}
        Commands::Auth { email, .. } => {
            let credential = manager.authorize(&email).await?;
            eprintln!(
                "Authentication completed for {} (token valid until {})",
                credential.account_email, credential.expires_at
            );
        }
        Commands::Status => {
            for account in registry.accounts() {
                let status = manager.status(&account.email).await?;
                println!("{}: {}", account.email, describe(&status));
            }
        }
        Commands::Token { email, scopes } => {
            let scopes = scopes.iter().map(String::as_str).collect::<Vec<_>>();
            let credential = manager.get_valid_credential(&email, &scopes).await?;
            println!("{}", credential.access_token);
        }
        Commands::Call { tool, args } => {
            let args = serde_json::from_str(&args)?;
            let router = ToolRouter::new(manager.clone());
            let result = router.call_tool(&tool, args).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Logout { email } => {
            if manager.logout(&email).await? {
                eprintln!("Removed stored credential for {}", email);
            } else {
                eprintln!("No stored credential for {}", email);
            }
        }
    }

    Ok(())
}

fn describe(status: &CredentialStatus) -> String {
    match status {
        CredentialStatus::InProgress => "refresh or sign-in in progress".to_string(),
        CredentialStatus::Missing => "not signed in".to_string(),
        CredentialStatus::Corrupt => "credential file is corrupt, sign in again".to_string(),
        CredentialStatus::Revoked => "refresh rejected, sign in again".to_string(),
        CredentialStatus::Expired { expires_at } => {
            format!("expired at {expires_at}, will refresh on next use")
        }
        CredentialStatus::Valid { expires_at, scopes } => format!(
            "valid until {expires_at} ({} scopes)",
            scopes.len()
        ),
    }
}
