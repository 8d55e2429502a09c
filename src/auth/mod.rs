//! Multi-account OAuth credential management
//!
//! Account registry, client secret loading, per-account token storage and
//! the lifecycle manager that keeps every account's token valid.

pub mod accounts;
pub mod client_secret;
pub mod credential;
pub mod flow;
pub mod manager;
pub mod oauth;
pub mod store;

pub use accounts::{Account, AccountRegistry, AccountType};
pub use client_secret::ClientSecret;
pub use credential::Credential;
pub use flow::{AuthorizationPrompt, BrowserPrompt, PromptError};
pub use manager::{Clock, CredentialStatus, SystemClock, TokenLifecycleManager};
pub use oauth::{AuthorizationRequest, EndpointError, OAuthClient};
pub use store::CredentialStore;
