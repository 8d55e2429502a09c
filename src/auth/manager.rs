//! Token lifecycle manager
//!
//! Hands out valid access tokens per account. Each account has its own slot;
//! refresh, sign-in and the following write all happen while holding it, so
//! concurrent callers for one account wait and then reuse the fresh token
//! instead of issuing a second refresh. Different accounts never contend.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::sync::Mutex as SlotMutex;

use crate::auth::accounts::{normalize_email, Account, AccountRegistry};
use crate::auth::credential::Credential;
use crate::auth::flow::AuthorizationPrompt;
use crate::auth::oauth::{EndpointError, OAuthClient};
use crate::auth::store::CredentialStore;
use crate::config::{Config, DEFAULT_AUTH_TIMEOUT_SECS, DEFAULT_EXPIRY_MARGIN_SECS};
use crate::error::{AuthError, CredentialError};

type AuthResult<T> = std::result::Result<T, AuthError>;

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// What is on file for an account, without touching the network
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialStatus {
    /// A refresh or sign-in for the account is running right now
    InProgress,
    Missing,
    Corrupt,
    /// Refresh was rejected; sign-in required
    Revoked,
    Expired {
        expires_at: DateTime<Utc>,
    },
    Valid {
        expires_at: DateTime<Utc>,
        scopes: BTreeSet<String>,
    },
}

/// Per-account coordination slot
#[derive(Debug, Default)]
struct AccountSlot {
    /// Set when the provider rejected the refresh token
    reauth_required: bool,
}

/// Token lifecycle manager
pub struct TokenLifecycleManager {
    registry: Arc<AccountRegistry>,
    store: CredentialStore,
    oauth: OAuthClient,
    prompt: Option<Arc<dyn AuthorizationPrompt>>,
    clock: Arc<dyn Clock>,

    /// Scopes requested on every sign-in
    default_scopes: Vec<String>,
    expiry_margin: chrono::Duration,
    auth_timeout: Duration,
    check_identity: bool,

    slots: Mutex<HashMap<String, Arc<SlotMutex<AccountSlot>>>>,
}

impl TokenLifecycleManager {
    pub fn new(registry: Arc<AccountRegistry>, store: CredentialStore, oauth: OAuthClient) -> Self {
        Self {
            registry,
            store,
            oauth,
            prompt: None,
            clock: Arc::new(SystemClock),
            default_scopes: crate::config::scopes::DEFAULT
                .iter()
                .map(|s| s.to_string())
                .collect(),
            expiry_margin: chrono::Duration::seconds(DEFAULT_EXPIRY_MARGIN_SECS as i64),
            auth_timeout: Duration::from_secs(DEFAULT_AUTH_TIMEOUT_SECS),
            check_identity: true,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Apply scopes, margin and timeout from the configuration
    pub fn with_config(mut self, config: &Config) -> Self {
        self.default_scopes = config.scopes.clone();
        self.expiry_margin = chrono::Duration::from_std(config.expiry_margin)
            .unwrap_or_else(|_| chrono::Duration::seconds(DEFAULT_EXPIRY_MARGIN_SECS as i64));
        self.auth_timeout = config.auth_timeout;
        self
    }

    /// Enable the interactive flow; without a prompt, sign-in fails fast
    pub fn with_prompt(mut self, prompt: Arc<dyn AuthorizationPrompt>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_expiry_margin(mut self, margin: chrono::Duration) -> Self {
        self.expiry_margin = margin;
        self
    }

    pub fn with_auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    /// Skip the userinfo check after sign-in
    pub fn without_identity_check(mut self) -> Self {
        self.check_identity = false;
        self
    }

    pub fn registry(&self) -> &AccountRegistry {
        &self.registry
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub fn oauth(&self) -> &OAuthClient {
        &self.oauth
    }

    /// Return a non-expired credential for `email` holding `required_scopes`
    pub async fn get_valid_credential(
        &self,
        email: &str,
        required_scopes: &[&str],
    ) -> AuthResult<Credential> {
        let account = self.account(email)?;
        let slot = self.slot(&account.email);
        let mut slot = slot.lock().await;

        if slot.reauth_required {
            tracing::info!(account = %account.email, "previous refresh was rejected, signing in again");
            return self.sign_in(&account, &mut slot, required_scopes).await;
        }

        let stored = match self.store.read(&account.email) {
            Ok(credential) => credential,
            Err(CredentialError::NotFound { .. }) => {
                tracing::info!(account = %account.email, "no stored credential");
                return self.sign_in(&account, &mut slot, required_scopes).await;
            }
            Err(CredentialError::Corrupt { path, source }) => {
                tracing::error!(
                    account = %account.email,
                    path = %path.display(),
                    error = %source,
                    "stored credential is corrupt, treating it as missing"
                );
                return self.sign_in(&account, &mut slot, required_scopes).await;
            }
            Err(source) => {
                return Err(AuthError::required_by(
                    &account.email,
                    "stored credential could not be read",
                    source,
                ))
            }
        };

        let missing = stored.missing_scopes(required_scopes.iter().copied());
        if !missing.is_empty() {
            return Err(AuthError::InsufficientScope {
                email: account.email,
                missing,
            });
        }

        if !stored.is_expired(self.clock.now(), self.expiry_margin) {
            return Ok(stored);
        }

        self.refresh(&account, &mut slot, stored, required_scopes)
            .await
    }

    /// Run the interactive flow for `email` regardless of what is on file
    pub async fn authorize(&self, email: &str) -> AuthResult<Credential> {
        let account = self.account(email)?;
        let slot = self.slot(&account.email);
        let mut slot = slot.lock().await;
        self.sign_in(&account, &mut slot, &[]).await
    }

    /// Classify what is stored for `email` without any network I/O
    ///
    /// Never waits on the account slot; a running refresh or sign-in is
    /// reported as [`CredentialStatus::InProgress`].
    pub async fn status(&self, email: &str) -> AuthResult<CredentialStatus> {
        let account = self.account(email)?;
        let slot = self.slot(&account.email);
        let Ok(guard) = slot.try_lock() else {
            return Ok(CredentialStatus::InProgress);
        };
        if guard.reauth_required {
            return Ok(CredentialStatus::Revoked);
        }

        Ok(match self.store.read(&account.email) {
            Ok(credential) if credential.is_expired(self.clock.now(), self.expiry_margin) => {
                CredentialStatus::Expired {
                    expires_at: credential.expires_at,
                }
            }
            Ok(credential) => CredentialStatus::Valid {
                expires_at: credential.expires_at,
                scopes: credential.scopes,
            },
            Err(CredentialError::Corrupt { .. }) => CredentialStatus::Corrupt,
            Err(_) => CredentialStatus::Missing,
        })
    }

    /// Delete the stored credential for `email`
    ///
    /// Waits for any running refresh or sign-in so it cannot write the file
    /// back afterwards. Returns whether a file was removed.
    pub async fn logout(&self, email: &str) -> AuthResult<bool> {
        let account = self.account(email)?;
        let slot = self.slot(&account.email);
        let mut slot = slot.lock().await;

        let removed = self
            .store
            .remove(&account.email)
            .map_err(|source| AuthError::Storage {
                email: account.email.clone(),
                source,
            })?;
        slot.reauth_required = false;
        tracing::info!(account = %account.email, removed, "stored credential removed");
        Ok(removed)
    }

    fn account(&self, email: &str) -> AuthResult<Account> {
        self.registry
            .lookup(email)
            .cloned()
            .ok_or_else(|| AuthError::UnknownAccount {
                email: email.to_string(),
            })
    }

    fn slot(&self, email: &str) -> Arc<SlotMutex<AccountSlot>> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots
            .entry(normalize_email(email))
            .or_default()
            .clone()
    }

    async fn refresh(
        &self,
        account: &Account,
        slot: &mut AccountSlot,
        stored: Credential,
        required_scopes: &[&str],
    ) -> AuthResult<Credential> {
        let email = account.email.as_str();
        let Some(refresh_token) = stored.refresh_token.clone() else {
            slot.reauth_required = true;
            return Err(AuthError::required(
                email,
                "access token expired and no refresh token is stored",
            ));
        };

        tracing::info!(account = %email, expires_at = %stored.expires_at, "refreshing access token");
        let response = match self.oauth.refresh(&refresh_token).await {
            Ok(response) => response,
            Err(err @ EndpointError::Rejected { .. }) => {
                tracing::warn!(account = %email, error = %err, "refresh token rejected");
                slot.reauth_required = true;
                return Err(AuthError::required_by(email, "refresh token was rejected", err));
            }
            Err(err @ EndpointError::Unavailable { .. }) => {
                tracing::warn!(account = %email, error = %err, "token endpoint unavailable");
                return Err(AuthError::required_by(
                    email,
                    "the token endpoint is temporarily unavailable, try again later",
                    err,
                ));
            }
            Err(err) => {
                return Err(AuthError::required_by(
                    email,
                    "could not reach the token endpoint",
                    err,
                ))
            }
        };

        let refreshed = response
            .refresh(&stored, self.clock.now())
            .map_err(|err| AuthError::required_by(email, "refresh response was unusable", err))?;
        self.persist(email, &refreshed)?;
        tracing::info!(account = %email, expires_at = %refreshed.expires_at, "access token refreshed");

        let missing = refreshed.missing_scopes(required_scopes.iter().copied());
        if !missing.is_empty() {
            tracing::warn!(account = %email, ?missing, "refreshed token lost required scopes");
            return Err(AuthError::InsufficientScope {
                email: email.to_string(),
                missing,
            });
        }

        Ok(refreshed)
    }

    async fn sign_in(
        &self,
        account: &Account,
        slot: &mut AccountSlot,
        required_scopes: &[&str],
    ) -> AuthResult<Credential> {
        let email = account.email.as_str();
        let Some(prompt) = self.prompt.as_ref() else {
            return Err(AuthError::required(email, "no valid credential is stored"));
        };

        let requested: BTreeSet<String> = self
            .default_scopes
            .iter()
            .map(String::as_str)
            .chain(required_scopes.iter().copied())
            .map(str::to_string)
            .collect();
        let state = random_state();
        let request =
            self.oauth
                .authorization_request(email, requested.iter().map(String::as_str), &state);

        tracing::info!(account = %email, "starting interactive sign-in");
        let code = match tokio::time::timeout(self.auth_timeout, prompt.authorize(&request)).await {
            Ok(Ok(code)) => code,
            Ok(Err(err)) => return Err(AuthError::required_by(email, "sign-in failed", err)),
            Err(_) => {
                return Err(AuthError::required(
                    email,
                    format!(
                        "sign-in was not completed within {} seconds",
                        self.auth_timeout.as_secs()
                    ),
                ))
            }
        };

        let response = self
            .oauth
            .exchange_code(&code)
            .await
            .map_err(|err| AuthError::required_by(email, "authorization code exchange failed", err))?;
        let mut credential = response
            .into_credential(email, self.clock.now(), &requested)
            .map_err(|err| AuthError::required_by(email, "token response was unusable", err))?;

        if self.check_identity {
            self.verify_identity(email, &credential.access_token).await?;
        }

        if credential.refresh_token.is_none() {
            credential.refresh_token = self
                .store
                .read(email)
                .ok()
                .and_then(|previous| previous.refresh_token);
        }

        self.persist(email, &credential)?;
        slot.reauth_required = false;
        tracing::info!(account = %email, "signed in and stored credential");

        let missing = credential.missing_scopes(required_scopes.iter().copied());
        if !missing.is_empty() {
            return Err(AuthError::InsufficientScope {
                email: email.to_string(),
                missing,
            });
        }

        Ok(credential)
    }

    async fn verify_identity(&self, email: &str, access_token: &str) -> AuthResult<()> {
        let signed_in = self
            .oauth
            .user_email(access_token)
            .await
            .map_err(|err| AuthError::required_by(email, "could not confirm the signed-in account", err))?;

        match signed_in {
            Some(actual) if normalize_email(&actual) == normalize_email(email) => Ok(()),
            Some(actual) => Err(AuthError::required(
                email,
                format!("signed in as {actual} instead of {email}"),
            )),
            None => Err(AuthError::required(
                email,
                "the provider did not report which account signed in",
            )),
        }
    }

    fn persist(&self, email: &str, credential: &Credential) -> AuthResult<()> {
        self.store
            .write(email, credential)
            .map_err(|source| AuthError::Storage {
                email: email.to_string(),
                source,
            })
    }
}

fn random_state() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_state() {
        let a = random_state();
        assert_eq!(a.len(), 32);
        assert_ne!(a, random_state());
    }
}
