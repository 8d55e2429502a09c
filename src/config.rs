//! Configuration management for the GSuite MCP broker
//!
//! Handles paths, environment variables, and configuration loading.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ConfigError, Result};

/// Default seconds before expiry at which a token is treated as expired
pub const DEFAULT_EXPIRY_MARGIN_SECS: u64 = 5;

/// Default time to wait for the browser redirect
pub const DEFAULT_AUTH_TIMEOUT_SECS: u64 = 300;

/// Configuration for the GSuite MCP broker
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the configuration files
    pub config_dir: PathBuf,

    /// Path to the OAuth client secret file
    pub gauth_path: PathBuf,

    /// Path to the accounts file
    pub accounts_path: PathBuf,

    /// Directory of per-account credential files
    pub credentials_dir: PathBuf,

    /// Redirect URI override; otherwise the client file's first entry
    pub redirect_uri: Option<String>,

    /// How long the interactive flow waits for the redirect
    pub auth_timeout: Duration,

    /// Safety margin applied to token expiry
    pub expiry_margin: Duration,

    /// Scopes requested when an account signs in
    pub scopes: Vec<String>,
}

impl Config {
    /// Create a new configuration from the environment, with defaults
    pub fn new() -> Result<Self> {
        let config_dir = Self::get_config_dir()?;
        Self::from_dir(config_dir)
    }

    /// Create a configuration rooted at `config_dir`
    pub fn from_dir(config_dir: PathBuf) -> Result<Self> {
        Self::from_lookup(config_dir, |var| std::env::var(var).ok())
    }

    /// Create a configuration rooted at `config_dir`, reading overrides
    /// through `lookup` instead of the process environment
    pub fn from_lookup<F>(config_dir: PathBuf, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let gauth_path = lookup("GSUITE_GAUTH_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| config_dir.join("gauth.json"));

        let accounts_path = lookup("GSUITE_ACCOUNTS_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| config_dir.join("accounts.json"));

        let credentials_dir = lookup("GSUITE_CREDENTIALS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| config_dir.join("credentials"));

        let redirect_uri = lookup("GSUITE_REDIRECT_URI");

        let auth_timeout = Duration::from_secs(parse_secs(
            "GSUITE_AUTH_TIMEOUT_SECS",
            lookup("GSUITE_AUTH_TIMEOUT_SECS"),
            DEFAULT_AUTH_TIMEOUT_SECS,
        )?);
        let expiry_margin = Duration::from_secs(parse_secs(
            "GSUITE_EXPIRY_MARGIN_SECS",
            lookup("GSUITE_EXPIRY_MARGIN_SECS"),
            DEFAULT_EXPIRY_MARGIN_SECS,
        )?);

        Ok(Self {
            config_dir,
            gauth_path,
            accounts_path,
            credentials_dir,
            redirect_uri,
            auth_timeout,
            expiry_margin,
            scopes: scopes::DEFAULT.iter().map(|s| s.to_string()).collect(),
        })
    }

    /// Get the configuration directory (`~/.gsuite-mcp`)
    fn get_config_dir() -> Result<PathBuf> {
        let config_dir = dirs::home_dir()
            .ok_or_else(|| ConfigError::DirNotFound {
                path: "~".to_string(),
            })?
            .join(".gsuite-mcp");

        Ok(config_dir)
    }
}

fn parse_secs(var: &'static str, value: Option<String>, default: u64) -> Result<u64> {
    match value {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidEnvVar { var, value }.into()),
        None => Ok(default),
    }
}

/// Google OAuth constants
pub mod google {
    /// Userinfo endpoint used to confirm which identity signed in
    pub const USERINFO_URI: &str = "https://www.googleapis.com/oauth2/v2/userinfo";
}

/// OAuth scopes
pub mod scopes {
    pub const OPENID: &str = "openid";
    pub const USERINFO_EMAIL: &str = "https://www.googleapis.com/auth/userinfo.email";
    pub const MAIL: &str = "https://mail.google.com/";
    pub const CALENDAR: &str = "https://www.googleapis.com/auth/calendar";

    /// Requested on every sign-in
    pub const DEFAULT: &[&str] = &[OPENID, USERINFO_EMAIL, MAIL, CALENDAR];
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    use crate::error::GsuiteError;

    fn lookup_in(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var: &str| vars.get(var).cloned()
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::from_lookup(PathBuf::from("/tmp/gsuite"), lookup_in(&[])).unwrap();
        assert_eq!(config.gauth_path, PathBuf::from("/tmp/gsuite/gauth.json"));
        assert_eq!(config.accounts_path, PathBuf::from("/tmp/gsuite/accounts.json"));
        assert_eq!(config.credentials_dir, PathBuf::from("/tmp/gsuite/credentials"));
        assert_eq!(config.redirect_uri, None);
        assert_eq!(config.auth_timeout, Duration::from_secs(300));
        assert_eq!(config.expiry_margin, Duration::from_secs(5));
        assert_eq!(config.scopes.len(), 4);
    }

    #[test]
    fn test_config_overrides() {
        let config = Config::from_lookup(
            PathBuf::from("/tmp/gsuite"),
            lookup_in(&[
                ("GSUITE_GAUTH_FILE", "/etc/gauth.json"),
                ("GSUITE_REDIRECT_URI", "http://localhost:9000/code"),
                ("GSUITE_EXPIRY_MARGIN_SECS", " 30 "),
            ]),
        )
        .unwrap();
        assert_eq!(config.gauth_path, PathBuf::from("/etc/gauth.json"));
        assert_eq!(config.redirect_uri.as_deref(), Some("http://localhost:9000/code"));
        assert_eq!(config.expiry_margin, Duration::from_secs(30));
    }

    #[test]
    fn test_invalid_duration_is_rejected() {
        let result = Config::from_lookup(
            PathBuf::from("/tmp/gsuite"),
            lookup_in(&[("GSUITE_AUTH_TIMEOUT_SECS", "soon")]),
        );
        assert!(matches!(
            result,
            Err(GsuiteError::Config(ConfigError::InvalidEnvVar { .. }))
        ));
    }

    #[test]
    fn test_default_scopes() {
        assert!(scopes::DEFAULT.contains(&scopes::MAIL));
        assert!(scopes::DEFAULT.contains(&scopes::CALENDAR));
    }
}
