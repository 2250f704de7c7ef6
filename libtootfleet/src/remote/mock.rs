//! In-memory fediverse instance for testing
//!
//! [`MockFediverse`] implements [`Instance`] and hands out [`MockSession`]s
//! that share its state, so a test can drive the fleet against it and then
//! inspect which accounts, tokens and statuses ended up on the "server".
//! Failures and latency can be injected to exercise retry and concurrency
//! paths without network access.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::sleep;

use crate::error::{FleetError, RemoteError, Result};
use crate::remote::{
    AppCredentials, Instance, NewStatus, PostedStatus, ProfileUpdate, RemoteAccount, RemoteStatus,
    Session, Signup,
};

const MOCK_BASE_URL: &str = "https://mock.instance";

/// An account living on the mock server
#[derive(Debug, Clone, Default)]
pub struct MockAccount {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password: String,
    pub admin: bool,
    pub display_name: Option<String>,
    pub note: Option<String>,
    pub avatar: Option<String>,
    pub header: Option<String>,
    pub following: Vec<String>,
}

/// A status accepted by the mock server
#[derive(Debug, Clone)]
pub struct MockStatus {
    pub id: String,
    pub account_id: String,
    pub username: String,
    pub text: String,
    pub content_type: Option<String>,
    pub media_ids: Vec<String>,
    pub in_reply_to_id: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub idempotency_key: Option<String>,
}

/// Number of calls received per operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub register_app: usize,
    pub create_account: usize,
    pub log_in: usize,
    pub post_status: usize,
    pub upload_media: usize,
    pub update_profile: usize,
    pub follow: usize,
    pub admin_list: usize,
}

#[derive(Default)]
struct MockState {
    next_id: u64,
    apps: HashMap<String, String>,
    accounts: Vec<MockAccount>,
    tokens: HashMap<String, String>,
    statuses: Vec<MockStatus>,
    tag_timelines: HashMap<String, Vec<RemoteStatus>>,
    failing_tags: HashSet<String>,
    fail_posts: usize,
    admin_unavailable: bool,
    account_creation_error: Option<String>,
    counts: CallCounts,
}

impl MockState {
    fn next_id(&mut self) -> String {
        self.next_id += 1;
        self.next_id.to_string()
    }

    fn account_by_token(&self, token: &str) -> Result<&MockAccount> {
        let id = self.tokens.get(token).ok_or_else(|| {
            FleetError::from(RemoteError::Authentication("invalid access token".to_string()))
        })?;
        self.accounts
            .iter()
            .find(|a| &a.id == id)
            .ok_or_else(|| RemoteError::Authentication("account gone".to_string()).into())
    }

    fn account_mut_by_token(&mut self, token: &str) -> Result<&mut MockAccount> {
        let id = self
            .tokens
            .get(token)
            .cloned()
            .ok_or_else(|| RemoteError::Authentication("invalid access token".to_string()))?;
        self.accounts
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| RemoteError::Authentication("account gone".to_string()).into())
    }

    fn issue_token(&mut self, account_id: &str) -> String {
        let token = format!("token-{}", uuid::Uuid::new_v4().simple());
        self.tokens.insert(token.clone(), account_id.to_string());
        token
    }

    fn check_app(&self, app: &AppCredentials) -> Result<()> {
        match self.apps.get(&app.client_id) {
            Some(secret) if secret == &app.client_secret => Ok(()),
            _ => Err(RemoteError::Authentication("unknown OAuth client".to_string()).into()),
        }
    }

    fn remote_status(&self, status: &MockStatus) -> RemoteStatus {
        let account = self
            .accounts
            .iter()
            .find(|a| a.id == status.account_id)
            .map(remote_account)
            .unwrap_or_else(|| RemoteAccount {
                id: status.account_id.clone(),
                username: status.username.clone(),
                acct: status.username.clone(),
                avatar: None,
            });

        RemoteStatus {
            id: status.id.clone(),
            content: format!("<p>{}</p>", status.text),
            account,
        }
    }
}

fn remote_account(account: &MockAccount) -> RemoteAccount {
    RemoteAccount {
        id: account.id.clone(),
        username: account.username.clone(),
        acct: account.username.clone(),
        avatar: account.avatar.clone(),
    }
}

/// Shared in-memory server
#[derive(Clone, Default)]
pub struct MockFediverse {
    state: Arc<Mutex<MockState>>,
    delay: Duration,
}

impl MockFediverse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add latency to every status submission
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Create an administrator account
    pub fn with_admin(self, username: &str, password: &str) -> Self {
        self.insert_account(username, password, true);
        self
    }

    /// Create a regular account, as if it had been registered out of band
    pub fn with_account(self, username: &str, password: &str) -> Self {
        self.insert_account(username, password, false);
        self
    }

    fn insert_account(&self, username: &str, password: &str, admin: bool) -> String {
        let mut state = self.lock();
        let id = state.next_id();
        state.accounts.push(MockAccount {
            id: id.clone(),
            username: username.to_string(),
            email: format!("{}@mock.instance", username),
            password: password.to_string(),
            admin,
            ..Default::default()
        });
        id
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Publish a status as an existing local account
    pub fn seed_status(&self, username: &str, text: &str) -> Option<String> {
        let mut state = self.lock();
        let account = state.accounts.iter().find(|a| a.username == username)?.clone();
        let id = state.next_id();
        state.statuses.push(MockStatus {
            id: id.clone(),
            account_id: account.id,
            username: account.username,
            text: text.to_string(),
            content_type: None,
            media_ids: Vec::new(),
            in_reply_to_id: None,
            scheduled_at: None,
            idempotency_key: None,
        });
        Some(id)
    }

    /// Append a status to a hashtag timeline (oldest first)
    pub fn add_tag_status(&self, hashtag: &str, username: &str, content: &str, avatar: Option<&str>) {
        let mut state = self.lock();
        let id = state.next_id();
        let status = RemoteStatus {
            id: id.clone(),
            content: content.to_string(),
            account: RemoteAccount {
                id: format!("remote-{}", username),
                username: username.to_string(),
                acct: format!("{}@remote.example", username),
                avatar: avatar.map(str::to_string),
            },
        };
        state
            .tag_timelines
            .entry(hashtag.to_string())
            .or_default()
            .push(status);
    }

    /// Make every fetch of `hashtag` fail
    pub fn fail_tag(&self, hashtag: &str) {
        self.lock().failing_tags.insert(hashtag.to_string());
    }

    /// Reject the next `n` status submissions with a transient error
    pub fn fail_next_posts(&self, n: usize) {
        self.lock().fail_posts = n;
    }

    pub fn set_admin_unavailable(&self, unavailable: bool) {
        self.lock().admin_unavailable = unavailable;
    }

    /// Reject every account creation with `message`
    pub fn fail_account_creation(&self, message: &str) {
        self.lock().account_creation_error = Some(message.to_string());
    }

    /// Drop every injected failure
    pub fn clear_failures(&self) {
        let mut state = self.lock();
        state.failing_tags.clear();
        state.fail_posts = 0;
        state.admin_unavailable = false;
        state.account_creation_error = None;
    }

    /// Every accepted status, oldest first
    pub fn statuses(&self) -> Vec<MockStatus> {
        self.lock().statuses.clone()
    }

    pub fn statuses_by(&self, username: &str) -> Vec<MockStatus> {
        self.lock()
            .statuses
            .iter()
            .filter(|s| s.username == username)
            .cloned()
            .collect()
    }

    pub fn account(&self, username: &str) -> Option<MockAccount> {
        self.lock()
            .accounts
            .iter()
            .find(|a| a.username == username)
            .cloned()
    }

    pub fn accounts(&self) -> Vec<MockAccount> {
        self.lock().accounts.clone()
    }

    pub fn counts(&self) -> CallCounts {
        self.lock().counts.clone()
    }
}

#[async_trait]
impl Instance for MockFediverse {
    fn base_url(&self) -> &str {
        MOCK_BASE_URL
    }

    async fn register_app(&self, client_name: &str, _scopes: &[&str]) -> Result<AppCredentials> {
        let mut state = self.lock();
        state.counts.register_app += 1;

        let id = state.next_id();
        let app = AppCredentials {
            client_id: format!("client-{}-{}", client_name, id),
            client_secret: format!("secret-{}", uuid::Uuid::new_v4().simple()),
        };
        state
            .apps
            .insert(app.client_id.clone(), app.client_secret.clone());
        Ok(app)
    }

    async fn create_account(&self, app: &AppCredentials, signup: &Signup) -> Result<String> {
        let mut state = self.lock();
        state.counts.create_account += 1;
        state.check_app(app)?;

        if let Some(message) = &state.account_creation_error {
            return Err(RemoteError::Rejected(message.clone()).into());
        }
        if !signup.agreement {
            return Err(RemoteError::Rejected("agreement must be accepted".to_string()).into());
        }
        if state.accounts.iter().any(|a| a.username == signup.username) {
            return Err(RemoteError::Rejected(format!(
                "username '{}' is already taken",
                signup.username
            ))
            .into());
        }

        let id = state.next_id();
        state.accounts.push(MockAccount {
            id: id.clone(),
            username: signup.username.clone(),
            email: signup.email.clone(),
            password: signup.password.clone(),
            ..Default::default()
        });
        Ok(state.issue_token(&id))
    }

    async fn log_in(
        &self,
        app: &AppCredentials,
        username: &str,
        password: &str,
        _scopes: &[&str],
    ) -> Result<String> {
        let mut state = self.lock();
        state.counts.log_in += 1;
        state.check_app(app)?;

        let id = state
            .accounts
            .iter()
            .find(|a| a.username == username && a.password == password)
            .map(|a| a.id.clone())
            .ok_or_else(|| {
                RemoteError::Authentication(format!("invalid credentials for '{}'", username))
            })?;
        Ok(state.issue_token(&id))
    }

    fn connect(&self, access_token: &str) -> Result<Arc<dyn Session>> {
        Ok(Arc::new(MockSession {
            server: self.clone(),
            token: access_token.to_string(),
        }))
    }
}

/// Session bound to one token on a [`MockFediverse`]
pub struct MockSession {
    server: MockFediverse,
    token: String,
}

#[async_trait]
impl Session for MockSession {
    async fn verify_credentials(&self) -> Result<RemoteAccount> {
        let state = self.server.lock();
        state.account_by_token(&self.token).map(remote_account)
    }

    async fn admin_nicknames(&self) -> Result<Vec<String>> {
        let mut state = self.server.lock();
        state.counts.admin_list += 1;

        if state.admin_unavailable {
            return Err(RemoteError::Unavailable("admin API is down".to_string()).into());
        }
        if !state.account_by_token(&self.token)?.admin {
            return Err(RemoteError::Authentication("admin scope required".to_string()).into());
        }
        Ok(state.accounts.iter().map(|a| a.username.clone()).collect())
    }

    async fn public_timeline(&self, limit: Option<u32>) -> Result<Vec<RemoteStatus>> {
        let state = self.server.lock();
        state.account_by_token(&self.token)?;

        let statuses = state
            .statuses
            .iter()
            .rev()
            .filter(|s| s.scheduled_at.is_none())
            .take(limit.map(|l| l as usize).unwrap_or(usize::MAX))
            .map(|s| state.remote_status(s))
            .collect();
        Ok(statuses)
    }

    async fn tag_timeline(&self, hashtag: &str, limit: u32) -> Result<Vec<RemoteStatus>> {
        let state = self.server.lock();
        if state.failing_tags.contains(hashtag) {
            return Err(RemoteError::Unavailable(format!("#{} timed out", hashtag)).into());
        }

        let statuses = state
            .tag_timelines
            .get(hashtag)
            .map(|timeline| timeline.iter().take(limit as usize).cloned().collect())
            .unwrap_or_default();
        Ok(statuses)
    }

    async fn upload_media(&self, path: &Path) -> Result<String> {
        let mut state = self.server.lock();
        state.counts.upload_media += 1;
        state.account_by_token(&self.token)?;

        if !path.is_file() {
            return Err(
                RemoteError::Rejected(format!("no media file at {}", path.display())).into(),
            );
        }
        Ok(format!("media-{}", state.next_id()))
    }

    async fn post_status(&self, status: &NewStatus) -> Result<PostedStatus> {
        if !self.server.delay.is_zero() {
            sleep(self.server.delay).await;
        }

        let mut state = self.server.lock();
        state.counts.post_status += 1;

        if state.fail_posts > 0 {
            state.fail_posts -= 1;
            return Err(RemoteError::Unavailable("injected failure".to_string()).into());
        }

        let account = state.account_by_token(&self.token)?.clone();
        let id = state.next_id();
        state.statuses.push(MockStatus {
            id: id.clone(),
            account_id: account.id,
            username: account.username,
            text: status.text.clone(),
            content_type: status.content_type.clone(),
            media_ids: status.media_ids.clone(),
            in_reply_to_id: status.in_reply_to_id.clone(),
            scheduled_at: status.scheduled_at,
            idempotency_key: status.idempotency_key.clone(),
        });

        Ok(PostedStatus {
            url: Some(format!("{}/notice/{}", MOCK_BASE_URL, id)),
            id,
        })
    }

    async fn update_profile(&self, update: &ProfileUpdate) -> Result<()> {
        let mut state = self.server.lock();
        state.counts.update_profile += 1;

        let account = state.account_mut_by_token(&self.token)?;
        match update {
            ProfileUpdate::DisplayName(name) => account.display_name = Some(name.clone()),
            ProfileUpdate::Note(note) => account.note = Some(note.clone()),
            ProfileUpdate::Avatar(path) => account.avatar = Some(path.display().to_string()),
            ProfileUpdate::Header(path) => account.header = Some(path.display().to_string()),
        }
        Ok(())
    }

    async fn lookup_account(&self, acct: &str) -> Result<Option<RemoteAccount>> {
        let state = self.server.lock();
        let username = acct.split('@').next().unwrap_or(acct);
        Ok(state
            .accounts
            .iter()
            .find(|a| a.username == username)
            .map(remote_account))
    }

    async fn follow(&self, account_id: &str) -> Result<()> {
        let mut state = self.server.lock();
        state.counts.follow += 1;

        if !state.accounts.iter().any(|a| a.id == account_id) {
            return Err(FleetError::NotFound(format!("account {}", account_id)));
        }
        let account = state.account_mut_by_token(&self.token)?;
        if !account.following.iter().any(|id| id == account_id) {
            account.following.push(account_id.to_string());
        }
        Ok(())
    }

    async fn own_statuses(&self, limit: u32) -> Result<Vec<RemoteStatus>> {
        let state = self.server.lock();
        let me = state.account_by_token(&self.token)?.id.clone();

        Ok(state
            .statuses
            .iter()
            .rev()
            .filter(|s| s.account_id == me)
            .take(limit as usize)
            .map(|s| state.remote_status(s))
            .collect())
    }

    async fn delete_status(&self, status_id: &str) -> Result<()> {
        let mut state = self.server.lock();
        let me = state.account_by_token(&self.token)?.id.clone();

        let before = state.statuses.len();
        state
            .statuses
            .retain(|s| !(s.id == status_id && s.account_id == me));
        if state.statuses.len() == before {
            return Err(FleetError::NotFound(format!("status {}", status_id)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::DEFAULT_SCOPES;

    fn signup(username: &str) -> Signup {
        Signup {
            username: username.to_string(),
            email: format!("{}@x", username),
            password: "pw".to_string(),
            agreement: true,
            locale: "en".to_string(),
        }
    }

    #[tokio::test]
    async fn test_signup_then_login() {
        let server = MockFediverse::new();
        let app = server.register_app("alice_bot", DEFAULT_SCOPES).await.unwrap();

        let token = server.create_account(&app, &signup("alice")).await.unwrap();
        let me = server.connect(&token).unwrap().verify_credentials().await.unwrap();
        assert_eq!(me.username, "alice");

        let second = server.log_in(&app, "alice", "pw", DEFAULT_SCOPES).await.unwrap();
        assert_ne!(token, second);
    }

    #[tokio::test]
    async fn test_duplicate_username_rejected() {
        let server = MockFediverse::new();
        let app = server.register_app("bot", DEFAULT_SCOPES).await.unwrap();

        server.create_account(&app, &signup("bob")).await.unwrap();
        let result = server.create_account(&app, &signup("bob")).await;
        assert!(matches!(
            result,
            Err(FleetError::Remote(RemoteError::Rejected(_)))
        ));
    }

    #[tokio::test]
    async fn test_wrong_password_is_authentication_error() {
        let server = MockFediverse::new().with_account("carol", "right");
        let app = server.register_app("carol_bot", DEFAULT_SCOPES).await.unwrap();

        let result = server.log_in(&app, "carol", "wrong", DEFAULT_SCOPES).await;
        assert!(matches!(
            result,
            Err(FleetError::Remote(RemoteError::Authentication(_)))
        ));
    }

    #[tokio::test]
    async fn test_admin_listing_requires_admin() {
        let server = MockFediverse::new()
            .with_admin("admin", "adminpass")
            .with_account("dave", "pw");
        let app = server.register_app("x", DEFAULT_SCOPES).await.unwrap();

        let admin = server.log_in(&app, "admin", "adminpass", DEFAULT_SCOPES).await.unwrap();
        let names = server.connect(&admin).unwrap().admin_nicknames().await.unwrap();
        assert_eq!(names, vec!["admin".to_string(), "dave".to_string()]);

        let user = server.log_in(&app, "dave", "pw", DEFAULT_SCOPES).await.unwrap();
        assert!(server.connect(&user).unwrap().admin_nicknames().await.is_err());
    }

    #[tokio::test]
    async fn test_injected_post_failures() {
        let server = MockFediverse::new().with_account("erin", "pw");
        let app = server.register_app("erin_bot", DEFAULT_SCOPES).await.unwrap();
        let token = server.log_in(&app, "erin", "pw", DEFAULT_SCOPES).await.unwrap();
        let session = server.connect(&token).unwrap();

        server.fail_next_posts(1);
        let status = NewStatus {
            text: "hi".to_string(),
            ..Default::default()
        };
        assert!(session.post_status(&status).await.is_err());
        assert!(session.post_status(&status).await.is_ok());

        assert_eq!(server.counts().post_status, 2);
        assert_eq!(server.statuses_by("erin").len(), 1);
    }

    #[tokio::test]
    async fn test_public_timeline_newest_first() {
        let server = MockFediverse::new().with_admin("admin", "adminpass");
        server.seed_status("admin", "first");
        server.seed_status("admin", "second");

        let app = server.register_app("x", DEFAULT_SCOPES).await.unwrap();
        let token = server.log_in(&app, "admin", "adminpass", DEFAULT_SCOPES).await.unwrap();
        let timeline = server.connect(&token).unwrap().public_timeline(None).await.unwrap();

        assert_eq!(timeline.len(), 2);
        assert!(timeline[0].content.contains("second"));
    }
}
