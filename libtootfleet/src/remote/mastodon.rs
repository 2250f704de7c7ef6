//! Mastodon / Pleroma implementation of the remote traits
//!
//! Timelines, media, profile and relationship calls go through the megalodon
//! client. The calls megalodon does not model (OAuth password grant, account
//! signup, the admin user listing, and status submission with
//! `Idempotency-Key` and Pleroma's `content_type`) are explicit, typed HTTP
//! requests made with reqwest.

use async_trait::async_trait;
use megalodon::megalodon::{
    GetAccountStatusesInputOptions, GetPublicTimelineInputOptions, GetTagTimelineInputOptions,
    UpdateCredentialsInputOptions,
};
use megalodon::{Megalodon, SNS};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Sns;
use crate::error::{RemoteError, Result};
use crate::remote::{
    AppCredentials, Instance, NewStatus, PostedStatus, ProfileUpdate, RemoteAccount, RemoteStatus,
    Session, Signup,
};

const USER_AGENT: &str = concat!("tootfleet/", env!("CARGO_PKG_VERSION"));
const OOB_REDIRECT: &str = "urn:ietf:wg:oauth:2.0:oob";
const PLEROMA_ADMIN_USERS: &str = "/api/v1/pleroma/admin/users";
const MASTODON_ADMIN_ACCOUNTS: &str = "/api/v1/admin/accounts";
const ADMIN_PAGE_SIZE: usize = 100;

#[derive(Deserialize)]
struct AppResponse {
    client_id: String,
    client_secret: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct PleromaUsersPage {
    users: Vec<PleromaUser>,
    #[serde(default)]
    count: Option<usize>,
}

#[derive(Deserialize)]
struct PleromaUser {
    nickname: String,
}

#[derive(Deserialize)]
struct MastodonAdminAccount {
    id: String,
    username: String,
}

#[derive(Deserialize)]
struct AccountJson {
    id: String,
    username: String,
    acct: String,
    #[serde(default)]
    avatar: Option<String>,
}

#[derive(Serialize)]
struct StatusBody<'a> {
    status: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_type: Option<&'a str>,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    media_ids: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    in_reply_to_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    scheduled_at: Option<String>,
}

#[derive(Deserialize)]
struct CreatedStatus {
    id: String,
    #[serde(default)]
    url: Option<String>,
}

/// Ensure the instance URL carries a scheme and no trailing slash
pub fn normalize_base_url(url: &str) -> String {
    let url = url.trim().trim_end_matches('/');
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{}", url)
    }
}

fn sns_of(sns: Sns) -> SNS {
    match sns {
        Sns::Pleroma => SNS::Pleroma,
        Sns::Mastodon => SNS::Mastodon,
    }
}

fn build_http(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| RemoteError::Unavailable(format!("Failed to build HTTP client: {}", e)).into())
}

/// Send a request and decode a JSON body, classifying failures
async fn send_json<T: DeserializeOwned>(request: reqwest::RequestBuilder, context: &str) -> Result<T> {
    let response = request.send().await.map_err(|e| map_transport_error(e, context))?;
    let status = response.status();

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(map_http_status(status.as_u16(), context, &body).into());
    }

    response.json::<T>().await.map_err(|e| {
        RemoteError::Unavailable(format!("Malformed response ({}): {}", context, e)).into()
    })
}

/// Unauthenticated client for one instance
pub struct MastodonInstance {
    base_url: String,
    sns: Sns,
    http: reqwest::Client,
    timeout: Duration,
}

impl MastodonInstance {
    pub fn new(base_url: &str, sns: Sns, timeout: Duration) -> Result<Self> {
        Ok(Self {
            base_url: normalize_base_url(base_url),
            sns,
            http: build_http(timeout)?,
            timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn app_token(&self, app: &AppCredentials) -> Result<String> {
        let request = self.http.post(self.url("/oauth/token")).form(&[
            ("grant_type", "client_credentials"),
            ("client_id", app.client_id.as_str()),
            ("client_secret", app.client_secret.as_str()),
            ("redirect_uri", OOB_REDIRECT),
            ("scope", "read write follow push"),
        ]);
        let token: TokenResponse = send_json(request, "application token").await?;
        Ok(token.access_token)
    }
}

#[async_trait]
impl Instance for MastodonInstance {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn register_app(&self, client_name: &str, scopes: &[&str]) -> Result<AppCredentials> {
        let scopes = scopes.join(" ");
        let request = self.http.post(self.url("/api/v1/apps")).form(&[
            ("client_name", client_name),
            ("redirect_uris", OOB_REDIRECT),
            ("scopes", scopes.as_str()),
        ]);

        let app: AppResponse = send_json(request, "register application").await?;
        Ok(AppCredentials {
            client_id: app.client_id,
            client_secret: app.client_secret,
        })
    }

    async fn create_account(&self, app: &AppCredentials, signup: &Signup) -> Result<String> {
        let app_token = self.app_token(app).await?;
        let agreement = if signup.agreement { "true" } else { "false" };

        let request = self
            .http
            .post(self.url("/api/v1/accounts"))
            .bearer_auth(app_token)
            .form(&[
                ("username", signup.username.as_str()),
                ("email", signup.email.as_str()),
                ("password", signup.password.as_str()),
                ("agreement", agreement),
                ("locale", signup.locale.as_str()),
            ]);

        let token: TokenResponse = send_json(request, "create account").await?;
        Ok(token.access_token)
    }

    async fn log_in(
        &self,
        app: &AppCredentials,
        username: &str,
        password: &str,
        scopes: &[&str],
    ) -> Result<String> {
        let scopes = scopes.join(" ");
        let request = self.http.post(self.url("/oauth/token")).form(&[
            ("grant_type", "password"),
            ("client_id", app.client_id.as_str()),
            ("client_secret", app.client_secret.as_str()),
            ("username", username),
            ("password", password),
            ("scope", scopes.as_str()),
        ]);

        match send_json::<TokenResponse>(request, "log in").await {
            Ok(token) => Ok(token.access_token),
            // invalid_grant comes back as 400
            Err(crate::FleetError::Remote(RemoteError::Rejected(msg))) => Err(
                RemoteError::Authentication(format!("Login rejected for '{}': {}", username, msg))
                    .into(),
            ),
            Err(e) => Err(e),
        }
    }

    fn connect(&self, access_token: &str) -> Result<Arc<dyn Session>> {
        let client = megalodon::generator(
            sns_of(self.sns),
            self.base_url.clone(),
            Some(access_token.to_string()),
            Some(USER_AGENT.to_string()),
        )
        .map_err(|e| map_megalodon_error(e, "create client"))?;

        Ok(Arc::new(MastodonSession {
            client,
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            sns: self.sns,
            access_token: access_token.to_string(),
            timeout: self.timeout,
        }))
    }
}

/// Authenticated client for one account
pub struct MastodonSession {
    client: Box<dyn Megalodon + Send + Sync>,
    http: reqwest::Client,
    base_url: String,
    sns: Sns,
    access_token: String,
    timeout: Duration,
}

impl MastodonSession {
    /// Run a megalodon call under the request timeout
    async fn bounded<T, F>(&self, context: &str, call: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<megalodon::response::Response<T>, megalodon::error::Error>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(response)) => Ok(response.json),
            Ok(Err(e)) => Err(map_megalodon_error(e, context).into()),
            Err(_) => Err(RemoteError::Unavailable(format!(
                "{} timed out after {}s",
                context,
                self.timeout.as_secs()
            ))
            .into()),
        }
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.access_token)
    }

    async fn pleroma_nicknames(&self) -> Result<Vec<String>> {
        let mut nicknames = Vec::new();
        let mut page = 1usize;

        loop {
            let request = self.get(PLEROMA_ADMIN_USERS).query(&[
                ("page", page.to_string()),
                ("page_size", ADMIN_PAGE_SIZE.to_string()),
            ]);
            let batch: PleromaUsersPage = send_json(request, "list users").await?;
            let received = batch.users.len();
            nicknames.extend(batch.users.into_iter().map(|u| u.nickname));

            let exhausted = match batch.count {
                Some(total) => nicknames.len() >= total,
                None => received < ADMIN_PAGE_SIZE,
            };
            if received == 0 || exhausted {
                return Ok(nicknames);
            }
            page += 1;
        }
    }

    async fn mastodon_nicknames(&self) -> Result<Vec<String>> {
        let mut nicknames = Vec::new();
        let mut max_id: Option<String> = None;

        loop {
            let mut query = vec![
                ("local", "true".to_string()),
                ("limit", ADMIN_PAGE_SIZE.to_string()),
            ];
            if let Some(id) = &max_id {
                query.push(("max_id", id.clone()));
            }

            let request = self.get(MASTODON_ADMIN_ACCOUNTS).query(&query);
            let batch: Vec<MastodonAdminAccount> = send_json(request, "list accounts").await?;
            let received = batch.len();
            max_id = batch.last().map(|a| a.id.clone());
            nicknames.extend(batch.into_iter().map(|a| a.username));

            if received < ADMIN_PAGE_SIZE {
                return Ok(nicknames);
            }
        }
    }
}

fn account_from(account: megalodon::entities::Account) -> RemoteAccount {
    RemoteAccount {
        id: account.id,
        username: account.username,
        acct: account.acct,
        avatar: Some(account.avatar).filter(|url| !url.is_empty()),
    }
}

fn status_from(status: megalodon::entities::Status) -> RemoteStatus {
    RemoteStatus {
        id: status.id,
        content: status.content,
        account: account_from(status.account),
    }
}

#[async_trait]
impl Session for MastodonSession {
    async fn verify_credentials(&self) -> Result<RemoteAccount> {
        let account = self
            .bounded("verify credentials", self.client.verify_account_credentials())
            .await?;
        Ok(account_from(account))
    }

    async fn admin_nicknames(&self) -> Result<Vec<String>> {
        match self.sns {
            Sns::Pleroma => self.pleroma_nicknames().await,
            Sns::Mastodon => self.mastodon_nicknames().await,
        }
    }

    async fn public_timeline(&self, limit: Option<u32>) -> Result<Vec<RemoteStatus>> {
        let options = GetPublicTimelineInputOptions {
            limit,
            ..Default::default()
        };
        let statuses = self
            .bounded("public timeline", self.client.get_public_timeline(Some(&options)))
            .await?;
        Ok(statuses.into_iter().map(status_from).collect())
    }

    async fn tag_timeline(&self, hashtag: &str, limit: u32) -> Result<Vec<RemoteStatus>> {
        let options = GetTagTimelineInputOptions {
            limit: Some(limit),
            ..Default::default()
        };
        let statuses = self
            .bounded(
                "hashtag timeline",
                self.client.get_tag_timeline(hashtag.to_string(), Some(&options)),
            )
            .await?;
        Ok(statuses.into_iter().map(status_from).collect())
    }

    async fn upload_media(&self, path: &Path) -> Result<String> {
        let uploaded = self
            .bounded(
                "upload media",
                self.client
                    .upload_media(path.to_string_lossy().into_owned(), None),
            )
            .await?;

        let id = match uploaded {
            megalodon::entities::UploadMedia::Attachment(attachment) => attachment.id,
            megalodon::entities::UploadMedia::AsyncAttachment(attachment) => attachment.id,
        };
        Ok(id)
    }

    async fn post_status(&self, status: &NewStatus) -> Result<PostedStatus> {
        let body = StatusBody {
            status: &status.text,
            content_type: status.content_type.as_deref(),
            media_ids: &status.media_ids,
            in_reply_to_id: status.in_reply_to_id.as_deref(),
            scheduled_at: status.scheduled_at.map(|at| at.to_rfc3339()),
        };

        let mut request = self
            .http
            .post(format!("{}/api/v1/statuses", self.base_url))
            .bearer_auth(&self.access_token)
            .json(&body);
        if let Some(key) = &status.idempotency_key {
            request = request.header("Idempotency-Key", key);
        }

        let created: CreatedStatus = send_json(request, "post status").await?;
        Ok(PostedStatus {
            id: created.id,
            url: created.url,
        })
    }

    async fn update_profile(&self, update: &ProfileUpdate) -> Result<()> {
        let options = match update {
            ProfileUpdate::DisplayName(name) => UpdateCredentialsInputOptions {
                display_name: Some(name.clone()),
                ..Default::default()
            },
            ProfileUpdate::Note(note) => UpdateCredentialsInputOptions {
                note: Some(note.clone()),
                ..Default::default()
            },
            ProfileUpdate::Avatar(path) => UpdateCredentialsInputOptions {
                avatar: Some(path.to_string_lossy().into_owned()),
                ..Default::default()
            },
            ProfileUpdate::Header(path) => UpdateCredentialsInputOptions {
                header: Some(path.to_string_lossy().into_owned()),
                ..Default::default()
            },
        };

        self.bounded("update profile", self.client.update_credentials(Some(&options)))
            .await?;
        Ok(())
    }

    async fn lookup_account(&self, acct: &str) -> Result<Option<RemoteAccount>> {
        let request = self.get("/api/v1/accounts/lookup").query(&[("acct", acct)]);
        match send_json::<AccountJson>(request, "lookup account").await {
            Ok(account) => Ok(Some(RemoteAccount {
                id: account.id,
                username: account.username,
                acct: account.acct,
                avatar: account.avatar,
            })),
            Err(crate::FleetError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn follow(&self, account_id: &str) -> Result<()> {
        self.bounded(
            "follow account",
            self.client.follow_account(account_id.to_string(), None),
        )
        .await?;
        Ok(())
    }

    async fn own_statuses(&self, limit: u32) -> Result<Vec<RemoteStatus>> {
        let me = self.verify_credentials().await?;
        let options = GetAccountStatusesInputOptions {
            limit: Some(limit),
            ..Default::default()
        };
        let statuses = self
            .bounded(
                "own statuses",
                self.client.get_account_statuses(me.id, Some(&options)),
            )
            .await?;
        Ok(statuses.into_iter().map(status_from).collect())
    }

    async fn delete_status(&self, status_id: &str) -> Result<()> {
        self.bounded("delete status", self.client.delete_status(status_id.to_string()))
            .await?;
        Ok(())
    }
}

/// Classify a transport-level reqwest failure
fn map_transport_error(error: reqwest::Error, context: &str) -> crate::FleetError {
    if error.is_timeout() {
        RemoteError::Unavailable(format!("{} timed out: {}", context, error)).into()
    } else if let Some(status) = error.status() {
        map_http_status(status.as_u16(), context, &error.to_string())
    } else {
        RemoteError::Unavailable(format!(
            "{} failed: {}. Suggestion: Check your network connection and instance availability.",
            context, error
        ))
        .into()
    }
}

/// Map an HTTP status code to an error
///
/// # Error Mapping
///
/// - 401/403 → `RemoteError::Authentication`
/// - 400/409/422 → `RemoteError::Rejected`
/// - 404 → `FleetError::NotFound`
/// - 429 → `RemoteError::RateLimit`
/// - 5xx and anything else → `RemoteError::Unavailable`
fn map_http_status(status: u16, context: &str, detail: &str) -> crate::FleetError {
    let detail = detail.trim();
    match status {
        401 | 403 => RemoteError::Authentication(format!(
            "{} (HTTP {}): {}. Suggestion: Check the account's credentials and scopes.",
            context, status, detail
        ))
        .into(),
        400 | 409 | 422 => {
            RemoteError::Rejected(format!("{} (HTTP {}): {}", context, status, detail)).into()
        }
        404 => crate::FleetError::NotFound(format!("{} (HTTP 404): {}", context, detail)),
        429 => RemoteError::RateLimit(format!(
            "{} (HTTP 429): {}. Suggestion: Wait a few minutes before retrying.",
            context, detail
        ))
        .into(),
        _ => RemoteError::Unavailable(format!("{} (HTTP {}): {}", context, status, detail)).into(),
    }
}

/// Map megalodon errors to RemoteError
///
/// megalodon does not expose a structured status, so the code is recovered
/// from the error message when present and keywords are used otherwise.
fn map_megalodon_error(error: megalodon::error::Error, context: &str) -> RemoteError {
    classify_message(&error.to_string(), context)
}

fn classify_message(message: &str, context: &str) -> RemoteError {
    let lower = message.to_lowercase();

    match extract_http_status(message) {
        Some(401) | Some(403) => {
            RemoteError::Authentication(format!("{} failed: {}", context, message))
        }
        Some(400) | Some(409) | Some(422) => {
            RemoteError::Rejected(format!("{} failed: {}", context, message))
        }
        Some(429) => RemoteError::RateLimit(format!("{} failed: {}", context, message)),
        Some(_) => RemoteError::Unavailable(format!("{} failed: {}", context, message)),
        None => {
            if lower.contains("unauthorized")
                || lower.contains("forbidden")
                || lower.contains("invalid_token")
            {
                RemoteError::Authentication(format!("{} failed: {}", context, message))
            } else if lower.contains("rate limit") || lower.contains("too many requests") {
                RemoteError::RateLimit(format!("{} failed: {}", context, message))
            } else if lower.contains("validation") || lower.contains("unprocessable") {
                RemoteError::Rejected(format!("{} failed: {}", context, message))
            } else {
                RemoteError::Unavailable(format!("{} failed: {}", context, message))
            }
        }
    }
}

/// Extract an HTTP status code from an error message
///
/// Looks for patterns like "HTTP 401", "status 403", "code: 429" or a
/// standalone three-digit code followed by ':' or ' '.
fn extract_http_status(error_str: &str) -> Option<u16> {
    let prefixes = ["HTTP ", "status ", "code: ", "status_code: "];

    for prefix in &prefixes {
        if let Some(pos) = error_str.find(prefix) {
            let after_prefix = &error_str[pos + prefix.len()..];
            if let Some(code) = after_prefix.get(0..3).and_then(|s| s.parse::<u16>().ok()) {
                if (100..=599).contains(&code) {
                    return Some(code);
                }
            }
        }
    }

    let bytes = error_str.as_bytes();
    for (i, window) in bytes.windows(4).enumerate() {
        let three_digits = window[..3].iter().all(u8::is_ascii_digit);
        let terminated = window[3] == b':' || window[3] == b' ';
        let standalone = i == 0 || !bytes[i - 1].is_ascii_digit();

        if three_digits && terminated && standalone {
            let code = (window[0] - b'0') as u16 * 100
                + (window[1] - b'0') as u16 * 10
                + (window[2] - b'0') as u16;
            if (100..=599).contains(&code) {
                return Some(code);
            }
        }
    }

    None
}
