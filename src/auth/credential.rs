//! OAuth token material for one account

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stored credentials (tokens) for one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Account this credential belongs to
    pub account_email: String,

    /// Access token
    pub access_token: String,

    /// Refresh token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Token type (usually "Bearer")
    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// Access token expiry
    pub expires_at: DateTime<Utc>,

    /// Granted scopes
    #[serde(default)]
    pub scopes: BTreeSet<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl Credential {
    /// Whether the access token expires within `margin` of `now`
    pub fn is_expired(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        match self.expires_at.checked_sub_signed(margin) {
            Some(deadline) => deadline <= now,
            // Out of the representable range: before it for a positive margin
            None => margin > Duration::zero(),
        }
    }

    /// Required scopes this credential was not granted
    pub fn missing_scopes<'a, I>(&self, required: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        required
            .into_iter()
            .filter(|scope| !self.scopes.contains(*scope))
            .map(str::to_string)
            .collect()
    }
}

/// Token response from the OAuth token endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// Lifetime assumed when the endpoint omits `expires_in`
const DEFAULT_LIFETIME_SECS: i64 = 3600;

/// `expires_in` cannot be turned into an expiry timestamp
#[derive(Error, Debug)]
#[error("token endpoint returned an unusable expires_in of {expires_in} seconds")]
pub struct InvalidLifetime {
    pub expires_in: i64,
}

impl TokenResponse {
    /// Granted scopes, if the response lists them
    pub fn scopes(&self) -> Option<BTreeSet<String>> {
        self.scope
            .as_deref()
            .map(parse_scopes)
            .filter(|scopes| !scopes.is_empty())
    }

    /// Absolute expiry of the issued access token
    pub fn expires_at(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, InvalidLifetime> {
        let expires_in = self.expires_in.unwrap_or(DEFAULT_LIFETIME_SECS);
        Duration::try_seconds(expires_in)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .ok_or(InvalidLifetime { expires_in })
    }

    /// Build a fresh credential from a code exchange
    pub fn into_credential(
        self,
        email: &str,
        now: DateTime<Utc>,
        requested: &BTreeSet<String>,
    ) -> Result<Credential, InvalidLifetime> {
        let expires_at = self.expires_at(now)?;
        let scopes = self.scopes().unwrap_or_else(|| requested.clone());
        Ok(Credential {
            account_email: email.to_string(),
            expires_at,
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            token_type: self.token_type,
            scopes,
        })
    }

    /// Apply a refresh response to the previous credential
    pub fn refresh(
        self,
        previous: &Credential,
        now: DateTime<Utc>,
    ) -> Result<Credential, InvalidLifetime> {
        let expires_at = self.expires_at(now)?;
        let scopes = self.scopes().unwrap_or_else(|| previous.scopes.clone());
        Ok(Credential {
            account_email: previous.account_email.clone(),
            expires_at,
            access_token: self.access_token,
            refresh_token: self.refresh_token.or_else(|| previous.refresh_token.clone()),
            token_type: self.token_type,
            scopes,
        })
    }
}

/// Split a space-delimited scope string
pub fn parse_scopes(scope: &str) -> BTreeSet<String> {
    scope.split_whitespace().map(str::to_string).collect()
}
