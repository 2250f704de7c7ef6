//! Idempotent publishing
//!
//! [`Publisher::publish`] submits a status at most once per fingerprint. The
//! fingerprint is reserved before the remote call and the delivery marker is
//! written only after the remote service accepted the status, so a failed
//! attempt leaves nothing behind and can simply be retried.

use chrono::{DateTime, Utc};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::error::{FleetError, RemoteError, Result};
use crate::identity::AccountSession;
use crate::idempotency::{Fingerprint, FingerprintKind, MarkerStore, Reserve};
use crate::remote::NewStatus;

pub const DEFAULT_CONTENT_TYPE: &str = "text/html";

#[derive(Debug, Clone, Default)]
pub struct PublishRequest {
    pub text: String,
    /// File name inside the media directory
    pub media: Option<String>,
    pub content_type: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Already-resolved id of the status being replied to
    pub in_reply_to: Option<String>,
    pub idempotency_key: Option<String>,
}

impl PublishRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_media(mut self, media: Option<String>) -> Self {
        self.media = media;
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    pub fn in_reply_to(mut self, status_id: impl Into<String>) -> Self {
        self.in_reply_to = Some(status_id.into());
        self
    }

    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyDelivered,
    /// Another publish of the same fingerprint has not finished yet
    InFlight,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Delivered {
        status_id: String,
        url: Option<String>,
        fingerprint: Fingerprint,
    },
    Skipped {
        fingerprint: Fingerprint,
        reason: SkipReason,
    },
}

impl PublishOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, PublishOutcome::Delivered { .. })
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        match self {
            PublishOutcome::Delivered { fingerprint, .. } => fingerprint,
            PublishOutcome::Skipped { fingerprint, .. } => fingerprint,
        }
    }
}

pub struct Publisher {
    markers: Arc<MarkerStore>,
    media_dir: PathBuf,
}

impl Publisher {
    pub fn new(markers: Arc<MarkerStore>, media_dir: PathBuf) -> Self {
        Self { markers, media_dir }
    }

    pub fn markers(&self) -> &MarkerStore {
        &self.markers
    }

    /// Publish a direct post, reply or mirrored post
    pub async fn publish(&self, session: &AccountSession, request: &PublishRequest) -> Result<PublishOutcome> {
        self.publish_as(session, request, FingerprintKind::Direct).await
    }

    /// Publish with fingerprints of `kind` when no idempotency key is given
    pub async fn publish_as(
        &self,
        session: &AccountSession,
        request: &PublishRequest,
        kind: FingerprintKind,
    ) -> Result<PublishOutcome> {
        if request.text.trim().is_empty() {
            return Err(FleetError::InvalidInput("Status text cannot be empty".to_string()));
        }

        let fingerprint = match &request.idempotency_key {
            Some(key) => Fingerprint::from_key(key)?,
            None => Fingerprint::compute(&session.account_id, &request.text, kind),
        };

        let reservation = match self.markers.reserve(&fingerprint)? {
            Reserve::Acquired(reservation) => reservation,
            Reserve::Delivered => {
                tracing::info!(username = %session.username, %fingerprint, "Already delivered, skipping");
                return Ok(PublishOutcome::Skipped {
                    fingerprint,
                    reason: SkipReason::AlreadyDelivered,
                });
            }
            Reserve::InFlight => {
                tracing::info!(username = %session.username, %fingerprint, "Publish in flight elsewhere, skipping");
                return Ok(PublishOutcome::Skipped {
                    fingerprint,
                    reason: SkipReason::InFlight,
                });
            }
        };

        let mut media_ids = Vec::new();
        if let Some(path) = self.media_path(request.media.as_deref())? {
            let id = session
                .api
                .upload_media(&path)
                .await
                .map_err(publish_error)?;
            tracing::debug!(username = %session.username, media = %path.display(), "Media uploaded");
            media_ids.push(id);
        }

        let status = NewStatus {
            text: request.text.clone(),
            content_type: Some(
                request
                    .content_type
                    .clone()
                    .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            ),
            media_ids,
            scheduled_at: request.scheduled_at,
            idempotency_key: Some(fingerprint.to_string()),
            in_reply_to_id: request.in_reply_to.clone(),
        };

        let posted = session
            .api
            .post_status(&status)
            .await
            .map_err(publish_error)?;

        reservation.commit()?;
        tracing::info!(
            username = %session.username,
            status_id = %posted.id,
            %fingerprint,
            scheduled = request.scheduled_at.is_some(),
            "Status published"
        );

        Ok(PublishOutcome::Delivered {
            status_id: posted.id,
            url: posted.url,
            fingerprint,
        })
    }

    /// Existing media file for `media`, if any
    fn media_path(&self, media: Option<&str>) -> Result<Option<PathBuf>> {
        let Some(name) = media.filter(|m| !m.trim().is_empty()) else {
            return Ok(None);
        };

        let relative = Path::new(name);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(FleetError::InvalidInput(format!(
                "Media reference '{}' must be a plain file name",
                name
            )));
        }

        let path = self.media_dir.join(relative);
        if path.is_file() {
            Ok(Some(path))
        } else {
            tracing::debug!(media = %path.display(), "Media file not found, posting without it");
            Ok(None)
        }
    }
}

/// Remote failures during submission become publish errors, except
/// authentication failures which keep their meaning
fn publish_error(error: FleetError) -> FleetError {
    match error {
        auth @ FleetError::Remote(RemoteError::Authentication(_)) => auth,
        FleetError::Remote(remote) => RemoteError::Publish(remote.to_string()).into(),
        FleetError::NotFound(what) => RemoteError::Publish(format!("Not found: {}", what)).into(),
        other => other,
    }
}
