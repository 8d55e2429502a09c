//! OAuth client credentials
//!
//! Loaded from the Google Cloud console JSON download.

use std::path::Path;

use reqwest::Url;
use serde::Deserialize;

use crate::config::google::USERINFO_URI;
use crate::error::{ConfigError, Result};

/// OAuth application credentials, immutable once loaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSecret {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub auth_uri: String,
    pub token_uri: String,
    pub userinfo_uri: String,
}

/// Raw client entry as found in the file
#[derive(Debug, Deserialize)]
struct ClientEntry {
    #[serde(default)]
    client_id: String,
    #[serde(default)]
    client_secret: String,
    #[serde(default)]
    auth_uri: String,
    #[serde(default)]
    token_uri: String,
    #[serde(default)]
    redirect_uris: Vec<String>,
}

/// Client file envelope (can be "installed" or "web")
#[derive(Debug, Deserialize)]
struct ClientSecretFile {
    #[serde(alias = "web")]
    installed: Option<ClientEntry>,
}

impl ClientSecret {
    /// Load the client secret file; `redirect_override` replaces the file's redirect URI
    pub fn load(path: &Path, redirect_override: Option<&str>) -> Result<Self> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.display().to_string(),
            }
            .into());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&content, redirect_override)
    }

    /// Parse and validate the client secret document
    pub fn from_json(content: &str, redirect_override: Option<&str>) -> Result<Self> {
        let file: ClientSecretFile =
            serde_json::from_str(content).map_err(|source| ConfigError::Malformed {
                what: "OAuth client file",
                source,
            })?;
        let entry = file
            .installed
            .ok_or(ConfigError::InvalidClientSecretFormat)?;

        let redirect_uri = redirect_override
            .map(str::to_string)
            .or_else(|| entry.redirect_uris.into_iter().next())
            .unwrap_or_default();

        let secret = Self {
            client_id: required(entry.client_id, "client_id")?,
            client_secret: required(entry.client_secret, "client_secret")?,
            redirect_uri: required(redirect_uri, "redirect_uris")?,
            auth_uri: required(entry.auth_uri, "auth_uri")?,
            token_uri: required(entry.token_uri, "token_uri")?,
            userinfo_uri: USERINFO_URI.to_string(),
        };
        secret.redirect_url()?;

        Ok(secret)
    }

    /// Point userinfo lookups somewhere other than Google
    pub fn with_userinfo_uri(mut self, uri: impl Into<String>) -> Self {
        self.userinfo_uri = uri.into();
        self
    }

    /// The redirect URI, parsed; only plain http loopback listeners are supported
    pub fn redirect_url(&self) -> Result<Url> {
        let url = Url::parse(&self.redirect_uri).map_err(|e| ConfigError::InvalidRedirectUri {
            uri: self.redirect_uri.clone(),
            message: e.to_string(),
        })?;

        if url.scheme() != "http" || url.host_str().is_none() {
            return Err(ConfigError::InvalidRedirectUri {
                uri: self.redirect_uri.clone(),
                message: "expected an http://host[:port]/path URL".to_string(),
            }
            .into());
        }

        Ok(url)
    }
}

fn required(value: String, field: &'static str) -> Result<String> {
    let value = value.trim().to_string();
    if value.is_empty() {
        return Err(ConfigError::MissingField { field }.into());
    }
    Ok(value)
}
