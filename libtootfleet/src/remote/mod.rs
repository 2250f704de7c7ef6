//! Remote instance abstraction
//!
//! The social-network service is split along its authentication boundary:
//!
//! - [`Instance`]: operations that need no user token (registering an
//!   application, signing up, logging in) plus a factory for sessions.
//! - [`Session`]: everything done on behalf of one logged-in account.
//!
//! [`mastodon`] talks to real Mastodon/Pleroma servers; [`mock`] is an
//! in-memory server used by the test suites.
//!
//! # Example
//!
//! ```no_run
//! use libtootfleet::config::Sns;
//! use libtootfleet::remote::{mastodon::MastodonInstance, Instance, DEFAULT_SCOPES};
//! use std::time::Duration;
//!
//! # async fn example() -> libtootfleet::Result<()> {
//! let instance = MastodonInstance::new("pleroma.example", Sns::Pleroma, Duration::from_secs(30))?;
//!
//! let app = instance.register_app("alice_bot", DEFAULT_SCOPES).await?;
//! let token = instance.log_in(&app, "alice", "secret", DEFAULT_SCOPES).await?;
//!
//! let session = instance.connect(&token)?;
//! let me = session.verify_credentials().await?;
//! println!("logged in as {} ({})", me.username, me.id);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::Result;

pub mod mastodon;

// Available outside of tests so integration tests and downstream crates can use it
pub mod mock;

/// Scopes requested for bot accounts
pub const DEFAULT_SCOPES: &[&str] = &["read", "write", "follow", "push"];

/// Scopes requested for the administrative account
pub const ADMIN_SCOPES: &[&str] = &[
    "read",
    "write",
    "follow",
    "push",
    "admin:read",
    "admin:write",
    "admin:write:accounts",
];

/// OAuth client registered for one account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// Data needed to create an account
#[derive(Debug, Clone)]
pub struct Signup {
    pub username: String,
    pub email: String,
    pub password: String,
    pub agreement: bool,
    pub locale: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAccount {
    pub id: String,
    pub username: String,
    pub acct: String,
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStatus {
    pub id: String,
    /// Rendered body, markup included
    pub content: String,
    pub account: RemoteAccount,
}

/// A status about to be submitted
#[derive(Debug, Clone, Default)]
pub struct NewStatus {
    pub text: String,
    pub content_type: Option<String>,
    pub media_ids: Vec<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub idempotency_key: Option<String>,
    pub in_reply_to_id: Option<String>,
}

/// What the server answered to a submitted status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedStatus {
    /// Status id, or scheduled-status id for deferred posts
    pub id: String,
    pub url: Option<String>,
}

/// One profile attribute; each value is sent as its own update call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileUpdate {
    DisplayName(String),
    Note(String),
    Avatar(PathBuf),
    Header(PathBuf),
}

/// Unauthenticated side of a remote instance
#[async_trait]
pub trait Instance: Send + Sync {
    fn base_url(&self) -> &str;

    /// Register an OAuth application named `client_name`
    async fn register_app(&self, client_name: &str, scopes: &[&str]) -> Result<AppCredentials>;

    /// Create an account and return its user access token
    async fn create_account(&self, app: &AppCredentials, signup: &Signup) -> Result<String>;

    /// Password login; returns a user access token
    async fn log_in(
        &self,
        app: &AppCredentials,
        username: &str,
        password: &str,
        scopes: &[&str],
    ) -> Result<String>;

    /// Open a session for an access token
    fn connect(&self, access_token: &str) -> Result<Arc<dyn Session>>;
}

/// Operations performed as one logged-in account
#[async_trait]
pub trait Session: Send + Sync {
    async fn verify_credentials(&self) -> Result<RemoteAccount>;

    /// Nicknames of every local account (requires admin scopes)
    async fn admin_nicknames(&self) -> Result<Vec<String>>;

    async fn public_timeline(&self, limit: Option<u32>) -> Result<Vec<RemoteStatus>>;

    /// Most recent statuses carrying `hashtag` (without the leading `#`)
    async fn tag_timeline(&self, hashtag: &str, limit: u32) -> Result<Vec<RemoteStatus>>;

    /// Upload a media file and return its attachment id
    async fn upload_media(&self, path: &Path) -> Result<String>;

    async fn post_status(&self, status: &NewStatus) -> Result<PostedStatus>;

    async fn update_profile(&self, update: &ProfileUpdate) -> Result<()>;

    /// Look up an account by `acct`; `None` if it does not exist
    async fn lookup_account(&self, acct: &str) -> Result<Option<RemoteAccount>>;

    async fn follow(&self, account_id: &str) -> Result<()>;

    /// Most recent statuses of the session's own account
    async fn own_statuses(&self, limit: u32) -> Result<Vec<RemoteStatus>>;

    async fn delete_status(&self, status_id: &str) -> Result<()>;
}
