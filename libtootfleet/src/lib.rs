//! Tootfleet - bot fleet management for Mastodon and Pleroma instances
//!
//! This library provisions bot accounts, publishes content exactly once per
//! account and text, and mirrors hashtag content from a remote instance.
//! The `toot-*` binaries are thin front ends over [`service::Fleet`].

pub mod avatar;
pub mod config;
pub mod credentials;
pub mod error;
pub mod identity;
pub mod idempotency;
pub mod locate;
pub mod logging;
pub mod mirror;
pub mod provision;
pub mod publish;
pub mod remote;
pub mod roster;
pub mod scheduler;
pub mod service;

// Re-export commonly used types
pub use config::Config;
pub use credentials::{CredentialRecord, CredentialStore, FileCredentialStore};
pub use error::{FleetError, Result};
pub use idempotency::{Fingerprint, FingerprintKind, MarkerStore};
pub use publish::{PublishOutcome, PublishRequest, SkipReason};
pub use service::posting::{PostRequest, PostResponse, ReplyRequest};
pub use service::Fleet;
