//! OAuth 2.0 endpoint calls
//!
//! Authorization URL construction, authorization-code exchange, refresh
//! grant and the userinfo lookup. Nothing here retries.

use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;

use crate::auth::client_secret::ClientSecret;
use crate::auth::credential::TokenResponse;

/// Failure talking to an OAuth endpoint
#[derive(Error, Debug)]
pub enum EndpointError {
    /// The provider refused the grant or the client (`invalid_grant`, `invalid_client`)
    #[error("{endpoint} rejected the request ({status}): {body}")]
    Rejected {
        endpoint: &'static str,
        status: u16,
        body: String,
    },

    /// Any other non-success status (5xx, 429); worth retrying later
    #[error("{endpoint} is unavailable ({status}): {body}")]
    Unavailable {
        endpoint: &'static str,
        status: u16,
        body: String,
    },

    /// The request never produced a usable response
    #[error("{endpoint} request failed: {source}")]
    Transport {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },
}

impl EndpointError {
    async fn from_status(endpoint: &'static str, response: reqwest::Response) -> Self {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        match status {
            400 | 401 => EndpointError::Rejected {
                endpoint,
                status,
                body,
            },
            _ => EndpointError::Unavailable {
                endpoint,
                status,
                body,
            },
        }
    }
}

/// Parameters of one authorization request
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    /// Account the user is asked to sign in as
    pub account_email: String,

    /// Full URL to open in the browser
    pub url: String,

    /// Anti-forgery state echoed back on the redirect
    pub state: String,

    /// Where the browser is sent afterwards
    pub redirect_uri: String,
}

/// Subset of the userinfo response
#[derive(Debug, Clone, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub email: Option<String>,
}

/// OAuth endpoint client
#[derive(Debug, Clone)]
pub struct OAuthClient {
    /// HTTP client
    http_client: reqwest::Client,

    /// OAuth client credentials
    secret: Arc<ClientSecret>,
}

impl OAuthClient {
    pub fn new(secret: Arc<ClientSecret>) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            secret,
        }
    }

    pub fn with_http_client(secret: Arc<ClientSecret>, http_client: reqwest::Client) -> Self {
        Self {
            http_client,
            secret,
        }
    }

    pub fn secret(&self) -> &ClientSecret {
        &self.secret
    }

    /// Generate the authorization URL for an account
    pub fn authorization_request<'a, I>(
        &self,
        account_email: &str,
        scopes: I,
        state: &str,
    ) -> AuthorizationRequest
    where
        I: IntoIterator<Item = &'a str>,
    {
        let scopes = scopes.into_iter().collect::<Vec<_>>().join(" ");
        let url = format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent&login_hint={}&state={}",
            self.secret.auth_uri,
            urlencoding::encode(&self.secret.client_id),
            urlencoding::encode(&self.secret.redirect_uri),
            urlencoding::encode(&scopes),
            urlencoding::encode(account_email),
            urlencoding::encode(state)
        );

        AuthorizationRequest {
            account_email: account_email.to_string(),
            url,
            state: state.to_string(),
            redirect_uri: self.secret.redirect_uri.clone(),
        }
    }

    /// Exchange an authorization code for tokens
    pub async fn exchange_code(&self, code: &str) -> Result<TokenResponse, EndpointError> {
        let params = [
            ("client_id", self.secret.client_id.as_str()),
            ("client_secret", self.secret.client_secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", self.secret.redirect_uri.as_str()),
        ];
        self.token_request("token endpoint", &params).await
    }

    /// Use a refresh token to obtain a new access token
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, EndpointError> {
        let params = [
            ("client_id", self.secret.client_id.as_str()),
            ("client_secret", self.secret.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];
        self.token_request("token endpoint", &params).await
    }

    async fn token_request(
        &self,
        endpoint: &'static str,
        params: &[(&str, &str)],
    ) -> Result<TokenResponse, EndpointError> {
        let transport = |source: reqwest::Error| EndpointError::Transport { endpoint, source };

        let response = self
            .http_client
            .post(&self.secret.token_uri)
            .form(params)
            .send()
            .await
            .map_err(transport)?;

        if !response.status().is_success() {
            return Err(EndpointError::from_status(endpoint, response).await);
        }

        response.json().await.map_err(transport)
    }

    /// Raw userinfo document for the token's owner
    pub async fn user_info(&self, access_token: &str) -> Result<serde_json::Value, EndpointError> {
        let endpoint = "userinfo endpoint";
        let transport = |source: reqwest::Error| EndpointError::Transport { endpoint, source };

        let response = self
            .http_client
            .get(&self.secret.userinfo_uri)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(transport)?;

        if !response.status().is_success() {
            return Err(EndpointError::from_status(endpoint, response).await);
        }

        response.json().await.map_err(transport)
    }

    /// Email address of the identity that owns `access_token`
    pub async fn user_email(&self, access_token: &str) -> Result<Option<String>, EndpointError> {
        let value = self.user_info(access_token).await?;
        Ok(serde_json::from_value::<UserInfo>(value)
            .ok()
            .and_then(|info| info.email))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> OAuthClient {
        let secret = ClientSecret::from_json(
            r#"{"installed": {
                "client_id": "client id",
                "client_secret": "secret",
                "auth_uri": "https://accounts.google.com/o/oauth2/auth",
                "token_uri": "https://oauth2.googleapis.com/token",
                "redirect_uris": ["http://localhost:4100/code"]
            }}"#,
            None,
        )
        .unwrap();
        OAuthClient::new(Arc::new(secret))
    }

    #[test]
    fn test_authorization_url() {
        let request = client().authorization_request(
            "alice@example.com",
            ["openid", "https://mail.google.com/"],
            "xyz",
        );

        assert!(request
            .url
            .starts_with("https://accounts.google.com/o/oauth2/auth?client_id=client%20id"));
        assert!(request.url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A4100%2Fcode"));
        assert!(request.url.contains("scope=openid%20https%3A%2F%2Fmail.google.com%2F"));
        assert!(request.url.contains("access_type=offline"));
        assert!(request.url.contains("prompt=consent"));
        assert!(request.url.contains("login_hint=alice%40example.com"));
        assert!(request.url.ends_with("state=xyz"));
        assert_eq!(request.redirect_uri, "http://localhost:4100/code");
    }
}
