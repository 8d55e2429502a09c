//! Interactive authorization step
//!
//! The user signs in through the browser and Google redirects back to a
//! one-shot loopback listener carrying the authorization code.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{extract::Query, response::Html, routing::get, Router};
use reqwest::Url;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::auth::oauth::AuthorizationRequest;

const SUCCESS_HTML: &str =
    "<html><body><h1>Authentication successful!</h1><p>You can close this window.</p></body></html>";
const FAILURE_HTML: &str =
    "<html><body><h1>Authentication failed</h1><p>You can close this window and retry.</p></body></html>";

/// Why no authorization code was obtained
#[derive(Error, Debug)]
pub enum PromptError {
    /// The user declined consent or the provider reported an error
    #[error("sign-in was not completed: {reason}")]
    Denied { reason: String },

    #[error("invalid redirect URI: {message}")]
    InvalidRedirect { message: String },

    /// Another sign-in already holds the redirect port
    #[error("another sign-in is already waiting for its redirect on {addr}; finish or cancel it and retry")]
    PortInUse { addr: String },

    #[error("could not listen for the OAuth redirect on {addr}: {source}")]
    Listener {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("redirect listener stopped before a code arrived")]
    Closed,
}

/// Obtains an authorization code from the user
///
/// Implementations may wait as long as they like; the caller bounds the
/// wait and drops the future on timeout.
#[async_trait]
pub trait AuthorizationPrompt: Send + Sync {
    async fn authorize(&self, request: &AuthorizationRequest) -> Result<String, PromptError>;
}

/// Opens the system browser and listens on the redirect URI
#[derive(Debug, Clone)]
pub struct BrowserPrompt {
    open_browser: bool,
}

impl BrowserPrompt {
    pub fn new() -> Self {
        Self { open_browser: true }
    }

    /// Only print the URL
    pub fn without_browser() -> Self {
        Self {
            open_browser: false,
        }
    }
}

impl Default for BrowserPrompt {
    fn default() -> Self {
        Self::new()
    }
}

type CallbackSender = Arc<Mutex<Option<oneshot::Sender<Result<String, PromptError>>>>>;

#[async_trait]
impl AuthorizationPrompt for BrowserPrompt {
    async fn authorize(&self, request: &AuthorizationRequest) -> Result<String, PromptError> {
        let redirect = Url::parse(&request.redirect_uri).map_err(|e| PromptError::InvalidRedirect {
            message: e.to_string(),
        })?;
        let host = redirect
            .host_str()
            .ok_or_else(|| PromptError::InvalidRedirect {
                message: "missing host".to_string(),
            })?
            .to_string();
        let port = redirect.port_or_known_default().unwrap_or(80);
        let callback_path = match redirect.path() {
            "" => "/".to_string(),
            path => path.to_string(),
        };

        let listener = tokio::net::TcpListener::bind((host.as_str(), port))
            .await
            .map_err(|source| {
                let addr = format!("{host}:{port}");
                if source.kind() == std::io::ErrorKind::AddrInUse {
                    PromptError::PortInUse { addr }
                } else {
                    PromptError::Listener { addr, source }
                }
            })?;

        eprintln!("\nSign in as {} by visiting this URL:", request.account_email);
        eprintln!("{}\n", request.url);

        if self.open_browser {
            if let Err(e) = open::that(&request.url) {
                eprintln!("Could not open browser automatically: {}", e);
                eprintln!("Please open the URL manually.");
            }
        }

        let (tx, rx) = oneshot::channel();
        let tx: CallbackSender = Arc::new(Mutex::new(Some(tx)));

        let expected_state = request.state.clone();
        let callback_handler = move |Query(params): Query<HashMap<String, String>>| async move {
            if params.get("state") != Some(&expected_state) {
                tracing::warn!("ignoring OAuth redirect with unexpected state");
                return Html(FAILURE_HTML);
            }

            let outcome = match (params.get("code"), params.get("error")) {
                (Some(code), _) => Ok(code.clone()),
                (None, Some(error)) => Err(PromptError::Denied {
                    reason: error.clone(),
                }),
                (None, None) => Err(PromptError::Denied {
                    reason: "no authorization code in redirect".to_string(),
                }),
            };
            let page = if outcome.is_ok() { SUCCESS_HTML } else { FAILURE_HTML };

            if let Some(tx) = tx.lock().ok().and_then(|mut slot| slot.take()) {
                let _ = tx.send(outcome);
            }
            Html(page)
        };

        let app = Router::new().route(&callback_path, get(callback_handler));

        tracing::info!(
            account = %request.account_email,
            port,
            "waiting for OAuth redirect"
        );

        tokio::select! {
            result = axum::serve(listener, app) => {
                match result {
                    Ok(()) => Err(PromptError::Closed),
                    Err(source) => Err(PromptError::Listener {
                        addr: format!("{host}:{port}"),
                        source,
                    }),
                }
            }
            outcome = rx => outcome.unwrap_or(Err(PromptError::Closed)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn free_port() -> u16 {
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        listener.local_addr().unwrap().port()
    }

    fn request(port: u16) -> AuthorizationRequest {
        AuthorizationRequest {
            account_email: "alice@example.com".to_string(),
            url: "https://accounts.example.com/auth".to_string(),
            state: "state-123".to_string(),
            redirect_uri: format!("http://127.0.0.1:{port}/code"),
        }
    }

    async fn redirect_when_ready(url: String) {
        for _ in 0..50 {
            if reqwest::get(&url).await.is_ok() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn test_receives_code() {
        let port = free_port().await;
        let request = request(port);
        let prompt = BrowserPrompt::without_browser();

        let redirect = redirect_when_ready(format!(
            "http://127.0.0.1:{port}/code?code=4%2Fabc&state=state-123"
        ));
        let (code, _) = tokio::join!(prompt.authorize(&request), redirect);
        assert_eq!(code.unwrap(), "4/abc");
    }

    #[tokio::test]
    async fn test_user_denied() {
        let port = free_port().await;
        let request = request(port);
        let prompt = BrowserPrompt::without_browser();

        let redirect = redirect_when_ready(format!(
            "http://127.0.0.1:{port}/code?error=access_denied&state=state-123"
        ));
        let (outcome, _) = tokio::join!(prompt.authorize(&request), redirect);
        assert!(matches!(outcome, Err(PromptError::Denied { reason }) if reason == "access_denied"));
    }

    #[tokio::test]
    async fn test_busy_port_reports_sign_in_in_progress() {
        let port = free_port().await;
        let _other = tokio::net::TcpListener::bind(("127.0.0.1", port)).await.unwrap();

        let outcome = BrowserPrompt::without_browser()
            .authorize(&request(port))
            .await;
        assert!(matches!(outcome, Err(PromptError::PortInUse { .. })));
        assert!(outcome
            .unwrap_err()
            .to_string()
            .contains("another sign-in is already waiting"));
    }

    #[tokio::test]
    async fn test_port_released_after_drop() {
        let port = free_port().await;
        let request = request(port);
        let prompt = BrowserPrompt::without_browser();

        let waited = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            prompt.authorize(&request),
        )
        .await;
        assert!(waited.is_err());

        assert!(tokio::net::TcpListener::bind(("127.0.0.1", port)).await.is_ok());
    }
}
