//! Single-shot posts and replies
//!
//! Both operations act on an existing account only. A username the
//! instance does not know is reported as not found; nothing is provisioned
//! on this path.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{FleetError, Result};
use crate::identity::{AccountSession, IdentityResolver, Resolution};
use crate::publish::{PublishOutcome, PublishRequest, Publisher, SkipReason};

/// Request to post as an existing account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostRequest {
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    pub text: String,
    #[serde(default)]
    pub media: Option<String>,
}

/// Request to reply to the status whose content contains `post_identifier`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyRequest {
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    pub text: String,
    pub post_identifier: String,
    #[serde(default)]
    pub media: Option<String>,
}

/// Outcome of a post or reply, shaped for callers outside the library
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostResponse {
    pub username: String,
    /// `false` when the content had already been delivered
    pub delivered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub toot_url: Option<String>,
    pub fingerprint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<String>,
}

impl PostResponse {
    fn from_outcome(username: &str, outcome: PublishOutcome) -> Self {
        match outcome {
            PublishOutcome::Delivered {
                status_id,
                url,
                fingerprint,
            } => Self {
                username: username.to_string(),
                delivered: true,
                status_id: Some(status_id),
                toot_url: url,
                fingerprint: fingerprint.to_string(),
                skipped: None,
            },
            PublishOutcome::Skipped {
                fingerprint,
                reason,
            } => Self {
                username: username.to_string(),
                delivered: false,
                status_id: None,
                toot_url: None,
                fingerprint: fingerprint.to_string(),
                skipped: Some(
                    match reason {
                        SkipReason::AlreadyDelivered => "already delivered",
                        SkipReason::InFlight => "in flight",
                    }
                    .to_string(),
                ),
            },
        }
    }
}

#[derive(Clone)]
pub struct PostingService {
    resolver: Arc<IdentityResolver>,
    publisher: Arc<Publisher>,
}

impl PostingService {
    pub fn new(resolver: Arc<IdentityResolver>, publisher: Arc<Publisher>) -> Self {
        Self {
            resolver,
            publisher,
        }
    }

    /// Log into an existing account
    pub async fn session(&self, username: &str, password: Option<&str>) -> Result<AccountSession> {
        match self.resolver.resolve(username, password).await? {
            Resolution::Found(session) => Ok(session),
            Resolution::NotFound => Err(FleetError::NotFound(format!(
                "Account '{}' does not exist on the instance",
                username
            ))),
        }
    }

    pub async fn post(&self, request: &PostRequest) -> Result<PostResponse> {
        let session = self
            .session(&request.username, request.password.as_deref())
            .await?;
        let publish = PublishRequest::new(request.text.clone()).with_media(request.media.clone());

        let outcome = self.publisher.publish(&session, &publish).await?;
        Ok(PostResponse::from_outcome(&request.username, outcome))
    }

    /// Reply to the already-located status `target_id`
    pub async fn reply(&self, request: &ReplyRequest, target_id: &str) -> Result<PostResponse> {
        let session = self
            .session(&request.username, request.password.as_deref())
            .await?;
        let publish = PublishRequest::new(request.text.clone())
            .with_media(request.media.clone())
            .in_reply_to(target_id);

        let outcome = self.publisher.publish(&session, &publish).await?;
        Ok(PostResponse::from_outcome(&request.username, outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_request_optional_fields() {
        let request: PostRequest =
            serde_json::from_str(r#"{"username":"alice","text":"hi"}"#).unwrap();
        assert_eq!(request.password, None);
        assert_eq!(request.media, None);
    }

    #[test]
    fn test_reply_request_requires_identifier() {
        let result: std::result::Result<ReplyRequest, _> =
            serde_json::from_str(r#"{"username":"alice","text":"hi"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_skipped_response_shape() {
        let outcome = PublishOutcome::Skipped {
            fingerprint: crate::idempotency::Fingerprint::from_key("abc").unwrap(),
            reason: SkipReason::AlreadyDelivered,
        };
        let json = serde_json::to_value(PostResponse::from_outcome("bob", outcome)).unwrap();

        assert_eq!(json["delivered"], false);
        assert_eq!(json["skipped"], "already delivered");
        assert!(json.get("toot_url").is_none());
    }
}
