//! Error types for the GSuite MCP broker
//!
//! Every failure below the token lifecycle manager is converted into one of
//! the kinds defined here before it reaches the tool router.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for the GSuite MCP broker
#[derive(Error, Debug)]
pub enum GsuiteError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Credential storage errors
    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    /// Authentication errors
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Tool routing errors
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration errors, fatal at startup
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config directory not found: {path}")]
    DirNotFound { path: String },

    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed {what}: {source}")]
    Malformed {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid OAuth client file: expected 'installed' or 'web' credentials")]
    InvalidClientSecretFormat,

    #[error("Missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("Invalid redirect URI '{uri}': {message}")]
    InvalidRedirectUri { uri: String, message: String },

    #[error("Invalid account email: '{email}'")]
    InvalidEmail { email: String },

    #[error("Duplicate account email: {email}")]
    DuplicateAccount { email: String },

    #[error("Invalid value for {var}: {value}")]
    InvalidEnvVar { var: &'static str, value: String },
}

/// Credential store errors
#[derive(Error, Debug)]
pub enum CredentialError {
    /// No credential file for the account
    #[error("No stored credential for {email}")]
    NotFound { email: String },

    /// A credential file exists but cannot be parsed
    #[error("Corrupt credential file {}: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Credential store I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize credential: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// Errors surfaced by the token lifecycle manager
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Unknown account: {email}. Add it to the accounts file first")]
    UnknownAccount { email: String },

    /// The user must (re)run the interactive flow for this account
    #[error("Authorization required for {email}: {reason}. Run `gsuite-mcp auth {email}` to sign in again")]
    AuthRequired {
        email: String,
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The stored grant lacks permissions; re-consent is needed
    #[error("Account {email} has not granted the required scopes: {}. Run `gsuite-mcp auth {email}` and approve all requested permissions", missing.join(", "))]
    InsufficientScope { email: String, missing: Vec<String> },

    #[error("Failed to persist credential for {email}: {source}")]
    Storage {
        email: String,
        #[source]
        source: CredentialError,
    },
}

impl AuthError {
    /// Authorization required without an underlying cause
    pub fn required(email: &str, reason: impl Into<String>) -> Self {
        AuthError::AuthRequired {
            email: email.to_string(),
            reason: reason.into(),
            source: None,
        }
    }

    /// Authorization required, keeping the underlying cause attached
    pub fn required_by(
        email: &str,
        reason: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AuthError::AuthRequired {
            email: email.to_string(),
            reason: reason.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Tool routing errors
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("Missing required argument __user_id__ (the account email)")]
    MissingAccount,

    #[error("Invalid tool arguments: {message}")]
    InvalidArguments { message: String },

    #[error("Google API request failed: {message}")]
    Api { message: String },
}

/// Result type alias for broker operations
pub type Result<T> = std::result::Result<T, GsuiteError>;
