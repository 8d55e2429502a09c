//! Configured Google accounts
//!
//! The accounts file is read once at startup and never mutated afterwards.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::Deserialize;

use crate::error::{ConfigError, Result};

/// Kind of Google account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    Personal,
    Work,
    #[serde(other)]
    Other,
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountType::Personal => f.write_str("personal"),
            AccountType::Work => f.write_str("work"),
            AccountType::Other => f.write_str("other"),
        }
    }
}

/// One configured Google identity
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Account {
    /// Account email, the unique key
    pub email: String,

    /// Account type
    pub account_type: AccountType,

    /// Free-text notes shown to the agent
    #[serde(default)]
    pub extra_info: String,
}

impl Account {
    /// One-line description included in every tool schema
    pub fn to_description(&self) -> String {
        format!(
            "Account for email: {} of type: {}. Extra info for: {}",
            self.email, self.account_type, self.extra_info
        )
    }
}

#[derive(Debug, Deserialize)]
struct AccountsFile {
    #[serde(default)]
    accounts: Vec<Account>,
}

/// Lookup table of configured accounts
#[derive(Debug, Clone, Default)]
pub struct AccountRegistry {
    /// Accounts in file order
    accounts: Vec<Account>,

    /// Normalized email -> index into `accounts`
    index: HashMap<String, usize>,
}

impl AccountRegistry {
    /// Load the registry from an accounts file
    pub fn load(path: &Path) -> Result<Self> {
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
        Self::from_json(&content)
    }

    /// Parse and validate the `{"accounts": [...]}` document
    pub fn from_json(content: &str) -> Result<Self> {
        let file: AccountsFile =
            serde_json::from_str(content).map_err(|source| ConfigError::Malformed {
                what: "accounts file",
                source,
            })?;
        Self::from_accounts(file.accounts)
    }

    /// Build a registry, rejecting invalid and duplicate emails
    pub fn from_accounts(accounts: Vec<Account>) -> Result<Self> {
        let mut index = HashMap::with_capacity(accounts.len());
        let mut kept = Vec::with_capacity(accounts.len());

        for mut account in accounts {
            account.email = account.email.trim().to_string();
            if !validate_email(&account.email) {
                return Err(ConfigError::InvalidEmail {
                    email: account.email,
                }
                .into());
            }

            let key = normalize_email(&account.email);
            if index.contains_key(&key) {
                return Err(ConfigError::DuplicateAccount {
                    email: account.email,
                }
                .into());
            }
            index.insert(key, kept.len());
            kept.push(account);
        }

        Ok(Self {
            accounts: kept,
            index,
        })
    }

    /// Find an account by email (case-insensitive)
    pub fn lookup(&self, email: &str) -> Option<&Account> {
        self.index
            .get(&normalize_email(email))
            .map(|&i| &self.accounts[i])
    }

    /// All accounts, in file order
    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

/// Canonical key for an account email
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Validate an email address
pub fn validate_email(email: &str) -> bool {
    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 {
        return false;
    }
    let (local, domain) = (parts[0], parts[1]);

    !local.is_empty()
        && !domain.is_empty()
        && !email.chars().any(|c| c.is_whitespace() || c == '/' || c == '\\')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GsuiteError;

    const TWO_ACCOUNTS: &str = r#"{
        "accounts": [
            {"email": "alice@example.com", "account_type": "personal", "extra_info": "Main inbox"},
            {"email": "bob@work.example.com", "account_type": "work"}
        ]
    }"#;

    #[test]
    fn test_load_and_lookup() {
        let registry = AccountRegistry::from_json(TWO_ACCOUNTS).unwrap();
        assert_eq!(registry.len(), 2);

        let bob = registry.lookup("Bob@Work.Example.com").unwrap();
        assert_eq!(bob.account_type, AccountType::Work);
        assert_eq!(bob.extra_info, "");
        assert!(registry.lookup("carol@example.com").is_none());
    }

    #[test]
    fn test_duplicate_email_rejected_at_load() {
        let json = r#"{"accounts": [
            {"email": "alice@example.com", "account_type": "personal"},
            {"email": "ALICE@example.com ", "account_type": "work"}
        ]}"#;
        let err = AccountRegistry::from_json(json).unwrap_err();
        assert!(matches!(
            err,
            GsuiteError::Config(ConfigError::DuplicateAccount { .. })
        ));
    }

    #[test]
    fn test_malformed_file_rejected() {
        let err = AccountRegistry::from_json(r#"{"accounts": [{"email": 3}]}"#).unwrap_err();
        assert!(matches!(err, GsuiteError::Config(ConfigError::Malformed { .. })));
    }

    #[test]
    fn test_invalid_email_rejected() {
        let json = r#"{"accounts": [{"email": "../etc/passwd", "account_type": "personal"}]}"#;
        let err = AccountRegistry::from_json(json).unwrap_err();
        assert!(matches!(err, GsuiteError::Config(ConfigError::InvalidEmail { .. })));
    }

    #[test]
    fn test_unknown_account_type_is_other() {
        let json = r#"{"accounts": [{"email": "x@school.edu", "account_type": "school"}]}"#;
        let registry = AccountRegistry::from_json(json).unwrap();
        assert_eq!(registry.accounts()[0].account_type, AccountType::Other);
    }

    #[test]
    fn test_description() {
        let registry = AccountRegistry::from_json(TWO_ACCOUNTS).unwrap();
        assert_eq!(
            registry.accounts()[0].to_description(),
            "Account for email: alice@example.com of type: personal. Extra info for: Main inbox"
        );
    }

    #[test]
    fn test_validate_email() {
        assert!(validate_email("test@example.com"));
        assert!(validate_email("user.name+tag@domain.co.uk"));
        assert!(!validate_email("invalid"));
        assert!(!validate_email("@example.com"));
        assert!(!validate_email("test@"));
        assert!(!validate_email("a b@example.com"));
    }
}
