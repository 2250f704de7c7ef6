//! Content fingerprints and delivery markers
//!
//! A [`Fingerprint`] identifies one logical piece of content posted by one
//! account. Once a fingerprint has been published, a zero-byte marker file
//! named after it is created in the marker directory; a fingerprint with a
//! marker is never published again.
//!
//! Reservation is atomic inside the process: [`MarkerStore::reserve`] checks
//! the marker and claims the fingerprint under one lock, so two concurrent
//! publishers of the same content cannot both reach the remote service.

use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::credentials::validate_file_name;
use crate::error::{FleetError, Result, StoreError};

/// Suffix appended to fingerprints of direct posts, replies and mirrored posts
pub const DIRECT_SUFFIX: &str = "00";

/// Which family of content a fingerprint belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FingerprintKind {
    /// Single-shot posts, replies and mirrored content
    Direct,
    /// Initial toots declared in the roster
    Roster,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Derive the fingerprint of `text` posted by `account_id`
    pub fn compute(account_id: &str, text: &str, kind: FingerprintKind) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(account_id.as_bytes());
        hasher.update(text.as_bytes());
        let digest = hasher.finalize();

        let mut hex = String::with_capacity(digest.len() * 2 + DIRECT_SUFFIX.len());
        for byte in digest.iter() {
            hex.push_str(&format!("{:02x}", byte));
        }
        if kind == FingerprintKind::Direct {
            hex.push_str(DIRECT_SUFFIX);
        }
        Self(hex)
    }

    /// Accept a caller-supplied idempotency key
    pub fn from_key(key: &str) -> Result<Self> {
        if key.is_empty()
            || key.len() > 128
            || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(FleetError::InvalidInput(format!(
                "Idempotency key '{}' must be 1-128 characters of [A-Za-z0-9_-]",
                key
            )));
        }
        Ok(Self(key.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of trying to claim a fingerprint
pub enum Reserve<'a> {
    /// Caller owns the fingerprint until the reservation is committed or dropped
    Acquired(Reservation<'a>),
    /// A marker already exists
    Delivered,
    /// Another caller in this process is publishing it right now
    InFlight,
}

/// Persistent set of delivered fingerprints
pub struct MarkerStore {
    dir: PathBuf,
    in_flight: Mutex<HashSet<String>>,
}

impl MarkerStore {
    /// Open (and create if needed) the marker directory
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(StoreError::Io)?;
        Ok(Self {
            dir,
            in_flight: Mutex::new(HashSet::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn marker_path(&self, fingerprint: &Fingerprint) -> Result<PathBuf> {
        validate_file_name(fingerprint.as_str())?;
        Ok(self.dir.join(fingerprint.as_str()))
    }

    pub fn is_delivered(&self, fingerprint: &Fingerprint) -> Result<bool> {
        Ok(self.marker_path(fingerprint)?.exists())
    }

    /// Atomically check for a marker and claim the fingerprint
    pub fn reserve(&self, fingerprint: &Fingerprint) -> Result<Reserve<'_>> {
        let path = self.marker_path(fingerprint)?;
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if path.exists() {
            return Ok(Reserve::Delivered);
        }
        if !in_flight.insert(fingerprint.as_str().to_string()) {
            return Ok(Reserve::InFlight);
        }

        Ok(Reserve::Acquired(Reservation {
            store: self,
            fingerprint: fingerprint.clone(),
            path,
        }))
    }

    fn release(&self, fingerprint: &Fingerprint) {
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        in_flight.remove(fingerprint.as_str());
    }
}

/// Exclusive claim on a fingerprint; released on drop
pub struct Reservation<'a> {
    store: &'a MarkerStore,
    fingerprint: Fingerprint,
    path: PathBuf,
}

impl Reservation<'_> {
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Record the fingerprint as delivered.
    ///
    /// The marker is created if absent; an existing marker is left untouched.
    pub fn commit(self) -> Result<()> {
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(StoreError::Io(e).into()),
        }
        tracing::debug!(fingerprint = %self.fingerprint, "Delivery marker written");
        Ok(())
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.store.release(&self.fingerprint);
    }
}
