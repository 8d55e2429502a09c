//! GSuite MCP Broker Library
//!
//! Multi-account Google OAuth credential management for agent tools.
//! Keeps one token per configured account valid and routes each tool call
//! to the account it names.

pub mod auth;
pub mod config;
pub mod error;
pub mod router;

pub use config::Config;
pub use error::{GsuiteError, Result};
