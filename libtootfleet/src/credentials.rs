//! Per-account credential storage
//!
//! Every bot account owns exactly one [`CredentialRecord`], keyed by username.
//! The presence of a record is the local signal that an account has been
//! provisioned (or at least that provisioning was started for it).
//!
//! # File layout
//!
//! - Location: `<secrets_dir>/<username>` (JSON)
//! - Permissions: 600 on Unix
//! - Writes go to a temporary sibling first and are renamed into place, so a
//!   reader never observes a half-written record.
//!
//! # Example
//!
//! ```no_run
//! use libtootfleet::credentials::{CredentialRecord, CredentialStore, FileCredentialStore};
//!
//! # fn example() -> libtootfleet::Result<()> {
//! let store = FileCredentialStore::new("/var/lib/tootfleet/secrets")?;
//!
//! let record = CredentialRecord::new("alice", "client-id", "client-secret");
//! if store.create(&record)? {
//!     println!("registered a new application for alice");
//! }
//!
//! let stored = store.load("alice")?.expect("record exists");
//! assert_eq!(stored.client_id, "client-id");
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Result, StoreError};

/// Application and user credentials for one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub username: String,
    pub client_id: String,
    pub client_secret: String,
    /// User-level bearer token; absent until a login or signup succeeded
    #[serde(default)]
    pub access_token: Option<String>,
}

impl CredentialRecord {
    pub fn new(username: &str, client_id: &str, client_secret: &str) -> Self {
        Self {
            username: username.to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            access_token: None,
        }
    }

    pub fn with_token(mut self, access_token: impl Into<String>) -> Self {
        self.access_token = Some(access_token.into());
        self
    }
}

/// Storage backend for credential records
///
/// Implementations must tolerate concurrent readers and writers: `create` is
/// create-if-absent (exactly one concurrent caller wins), `save` is
/// last-writer-wins.
pub trait CredentialStore: Send + Sync {
    /// Load the record for `username`, if one exists
    fn load(&self, username: &str) -> Result<Option<CredentialRecord>>;

    /// Create the record only if none exists yet.
    ///
    /// Returns `true` if this call created it.
    fn create(&self, record: &CredentialRecord) -> Result<bool>;

    /// Write (or overwrite) the record
    fn save(&self, record: &CredentialRecord) -> Result<()>;
}

/// Validate a name that is about to become a file name.
///
/// Rules:
/// - 1 to 128 characters
/// - ASCII alphanumerics plus `_`, `-`, `.` and `@`
/// - must not start with `.`
pub fn validate_file_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(StoreError::InvalidName(name.to_string(), "cannot be empty".to_string()).into());
    }

    if name.len() > 128 {
        return Err(StoreError::InvalidName(
            name.to_string(),
            format!("too long: {} characters (max 128)", name.len()),
        )
        .into());
    }

    if name.starts_with('.') {
        return Err(
            StoreError::InvalidName(name.to_string(), "cannot start with '.'".to_string()).into(),
        );
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '@'))
    {
        return Err(StoreError::InvalidName(
            name.to_string(),
            "only alphanumerics, '_', '-', '.' and '@' are allowed".to_string(),
        )
        .into());
    }

    Ok(())
}

/// Refuse to operate on symbolic links
pub fn validate_not_symlink(path: &Path) -> Result<()> {
    match std::fs::symlink_metadata(path) {
        Ok(metadata) if metadata.file_type().is_symlink() => {
            Err(StoreError::Symlink(path.display().to_string()).into())
        }
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoreError::Io(e).into()),
    }
}

/// JSON-file-per-account credential store
pub struct FileCredentialStore {
    base_path: PathBuf,
}

impl FileCredentialStore {
    /// Open (and create if needed) the credential directory
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        std::fs::create_dir_all(&base_path).map_err(StoreError::Io)?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn record_path(&self, username: &str) -> Result<PathBuf> {
        validate_file_name(username)?;
        Ok(self.base_path.join(username))
    }

    /// Write `record` to a fresh hidden file next to its final location
    fn write_temp(&self, record: &CredentialRecord) -> Result<PathBuf> {
        let bytes = serde_json::to_vec_pretty(record).map_err(StoreError::Serialization)?;
        let tmp_path = self
            .base_path
            .join(format!(".{}.{}.tmp", record.username, uuid::Uuid::new_v4()));

        let written = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)
            .and_then(|mut file| {
                Self::restrict_permissions(&tmp_path)?;
                file.write_all(&bytes)?;
                file.sync_all()
            });

        if let Err(e) = written {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(StoreError::Io(e).into());
        }
        Ok(tmp_path)
    }

    fn restrict_permissions(path: &Path) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }
        #[cfg(not(unix))]
        let _ = path;
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self, username: &str) -> Result<Option<CredentialRecord>> {
        let path = self.record_path(username)?;
        validate_not_symlink(&path)?;

        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::Io(e).into()),
        };

        let record = serde_json::from_slice(&bytes).map_err(StoreError::Serialization)?;
        Ok(Some(record))
    }

    fn create(&self, record: &CredentialRecord) -> Result<bool> {
        let path = self.record_path(&record.username)?;
        validate_not_symlink(&path)?;

        // Fully written temp file, then an exclusive hard link: the record
        // appears atomically and only one concurrent creator wins.
        let tmp_path = self.write_temp(record)?;
        let linked = std::fs::hard_link(&tmp_path, &path);
        let _ = std::fs::remove_file(&tmp_path);

        match linked {
            Ok(()) => {
                tracing::debug!(username = %record.username, path = %path.display(), "Created credential record");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                tracing::debug!(username = %record.username, "Credential record already present");
                Ok(false)
            }
            Err(e) => Err(StoreError::Io(e).into()),
        }
    }

    fn save(&self, record: &CredentialRecord) -> Result<()> {
        let path = self.record_path(&record.username)?;
        validate_not_symlink(&path)?;

        let tmp_path = self.write_temp(record)?;
        if let Err(e) = std::fs::rename(&tmp_path, &path) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(StoreError::Io(e).into());
        }

        tracing::debug!(username = %record.username, "Saved credential record");
        Ok(())
    }
}
