//! Per-account credential files
//!
//! One JSON file per account email in a single directory. Writes go through
//! a temp file in the same directory followed by a rename, so a reader sees
//! either the previous record or the new one, never a partial file.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::auth::accounts::normalize_email;
use crate::auth::credential::Credential;
use crate::error::CredentialError;

type StoreResult<T> = std::result::Result<T, CredentialError>;

/// File-based credential storage
#[derive(Debug, Clone)]
pub struct CredentialStore {
    dir: PathBuf,
}

impl CredentialStore {
    /// Create a store rooted at `dir`; the directory is created on first write
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Deterministic file for an account
    pub fn path_for(&self, email: &str) -> PathBuf {
        let key = urlencoding::encode(&normalize_email(email)).into_owned();
        self.dir.join(format!(".oauth2.{key}.json"))
    }

    /// Read the credential for `email`
    pub fn read(&self, email: &str) -> StoreResult<Credential> {
        let path = self.path_for(email);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CredentialError::NotFound {
                    email: email.to_string(),
                });
            }
            Err(source) => return Err(CredentialError::Io { path, source }),
        };

        serde_json::from_str(&content).map_err(|source| CredentialError::Corrupt { path, source })
    }

    /// Atomically replace the credential for `email`
    pub fn write(&self, email: &str, credential: &Credential) -> StoreResult<()> {
        let path = self.path_for(email);
        let data = serde_json::to_vec_pretty(credential).map_err(CredentialError::Serialize)?;
        let io_err = |source: std::io::Error| CredentialError::Io {
            path: path.clone(),
            source,
        };

        std::fs::create_dir_all(&self.dir).map_err(io_err)?;

        let mut tmp = tempfile::Builder::new()
            .prefix(".oauth2.")
            .suffix(".tmp")
            .tempfile_in(&self.dir)
            .map_err(io_err)?;
        tmp.write_all(&data).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(0o600))
                .map_err(io_err)?;
        }

        tmp.persist(&path).map_err(|e| io_err(e.error))?;
        tracing::debug!(account = %email, path = %path.display(), "credential persisted");
        Ok(())
    }

    /// Delete the credential for `email`; absent files are not an error
    pub fn remove(&self, email: &str) -> StoreResult<bool> {
        let path = self.path_for(email);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(CredentialError::Io { path, source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::{TimeZone, Utc};

    use super::*;

    fn credential(token: &str) -> Credential {
        Credential {
            account_email: "alice@example.com".to_string(),
            access_token: token.to_string(),
            refresh_token: Some("refresh".to_string()),
            token_type: "Bearer".to_string(),
            expires_at: Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(),
            scopes: BTreeSet::from(["openid".to_string()]),
        }
    }

    #[test]
    fn test_read_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path());
        assert!(matches!(
            store.read("alice@example.com"),
            Err(CredentialError::NotFound { .. })
        ));
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("nested"));

        store.write("alice@example.com", &credential("one")).unwrap();
        store.write("alice@example.com", &credential("two")).unwrap();

        let read = store.read("Alice@Example.com").unwrap();
        assert_eq!(read, credential("two"));
    }

    #[test]
    fn test_unparsable_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path());
        std::fs::write(store.path_for("alice@example.com"), "{\"access_tok").unwrap();

        assert!(matches!(
            store.read("alice@example.com"),
            Err(CredentialError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_file_name_is_deterministic_and_flat() {
        let store = CredentialStore::new("/creds");
        let path = store.path_for("Alice@Example.com");
        assert_eq!(path, store.path_for("alice@example.com"));
        assert_eq!(path.parent(), Some(Path::new("/creds")));
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            ".oauth2.alice%40example.com.json"
        );
    }

    #[test]
    fn test_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path());
        store.write("alice@example.com", &credential("one")).unwrap();

        assert!(store.remove("alice@example.com").unwrap());
        assert!(!store.remove("alice@example.com").unwrap());
        assert!(matches!(
            store.read("alice@example.com"),
            Err(CredentialError::NotFound { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_file_mode_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path());
        store.write("alice@example.com", &credential("one")).unwrap();

        let mode = std::fs::metadata(store.path_for("alice@example.com"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
