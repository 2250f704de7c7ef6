//! Remote content mirror
//!
//! Republishes hashtag content found on a remote instance under local bot
//! accounts named after the original authors. One cycle fetches the most
//! recent statuses for every hashtag and walks them in order until one is
//! genuinely new; everything before it was either delivered in an earlier
//! cycle or failed.

use futures::future::join_all;
use std::sync::Arc;

use crate::avatar::AvatarSource;
use crate::config::{Config, ProfileSpec};
use crate::error::Result;
use crate::identity::IdentityResolver;
use crate::provision::{AccountProvisioner, ProvisionRequest};
use crate::publish::{PublishOutcome, PublishRequest, Publisher};
use crate::remote::{RemoteStatus, Session};

/// Result of mirroring one remote status
#[derive(Debug)]
pub struct MirrorItem {
    pub username: String,
    pub outcome: Result<PublishOutcome>,
}

#[derive(Debug, Default)]
pub struct MirrorReport {
    /// Statuses fetched across all hashtags
    pub fetched: usize,
    /// Items actually processed, in batch order
    pub items: Vec<MirrorItem>,
}

impl MirrorReport {
    pub fn delivered(&self) -> usize {
        self.items
            .iter()
            .filter(|item| matches!(&item.outcome, Ok(o) if o.is_delivered()))
            .count()
    }

    pub fn failures(&self) -> usize {
        self.items.iter().filter(|item| item.outcome.is_err()).count()
    }
}

pub struct Mirror {
    config: Arc<Config>,
    resolver: Arc<IdentityResolver>,
    provisioner: Arc<AccountProvisioner>,
    publisher: Arc<Publisher>,
}

impl Mirror {
    pub fn new(
        config: Arc<Config>,
        resolver: Arc<IdentityResolver>,
        provisioner: Arc<AccountProvisioner>,
        publisher: Arc<Publisher>,
    ) -> Self {
        Self {
            config,
            resolver,
            provisioner,
            publisher,
        }
    }

    /// Run one mirror cycle.
    ///
    /// Only failing to list local accounts is an error; per-item failures
    /// are part of the report.
    pub async fn mirror_once(
        &self,
        remote: &dyn Session,
        hashtags: &[String],
        limit: u32,
    ) -> Result<MirrorReport> {
        let batch = fetch_batch(remote, hashtags, limit).await;
        let mut report = MirrorReport {
            fetched: batch.len(),
            items: Vec::new(),
        };

        if batch.is_empty() {
            tracing::debug!("Mirror batch empty");
            return Ok(report);
        }

        let mut nicknames = self.resolver.existing_nicknames().await?;

        for status in &batch {
            let username = status.account.username.clone();
            let outcome = self.mirror_item(&mut nicknames, status).await;

            if let Err(e) = &outcome {
                tracing::warn!(username = %username, error = %e, "Mirroring status failed");
            }

            let delivered = matches!(&outcome, Ok(o) if o.is_delivered());
            report.items.push(MirrorItem { username, outcome });

            if delivered {
                break;
            }
        }

        tracing::info!(
            fetched = report.fetched,
            processed = report.items.len(),
            delivered = report.delivered(),
            failures = report.failures(),
            "Mirror cycle finished"
        );
        Ok(report)
    }

    async fn mirror_item(&self, nicknames: &mut Vec<String>, status: &RemoteStatus) -> Result<PublishOutcome> {
        let username = &status.account.username;
        let request = ProvisionRequest {
            username: username.clone(),
            email: format!("{}@{}", username, self.config.mirror.email_domain),
            password: self.config.mirror.password.clone(),
            profile: ProfileSpec::default(),
            avatar: AvatarSource::from_spec(status.account.avatar.as_deref()),
        };

        let account = self.provisioner.ensure(nicknames, &request).await?;
        self.publisher
            .publish(&account.session, &PublishRequest::new(status.content.clone()))
            .await
    }
}

/// Most recent statuses for every hashtag, concatenated in hashtag order
async fn fetch_batch(remote: &dyn Session, hashtags: &[String], limit: u32) -> Vec<RemoteStatus> {
    let fetches = hashtags.iter().map(|tag| async move {
        let result = remote.tag_timeline(tag, limit).await;
        (tag, result)
    });

    let mut batch = Vec::new();
    for (tag, result) in join_all(fetches).await {
        match result {
            Ok(statuses) => {
                tracing::debug!(hashtag = %tag, count = statuses.len(), "Fetched hashtag timeline");
                batch.extend(statuses);
            }
            Err(e) => tracing::warn!(hashtag = %tag, error = %e, "Hashtag fetch failed"),
        }
    }
    batch
}
