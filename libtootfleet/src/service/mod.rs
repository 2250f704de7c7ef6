//! Service layer for Tootfleet
//!
//! [`Fleet`] is the single entry point used by every binary. It builds all
//! components once from an immutable [`Config`] and wires them together:
//!
//! - single-shot posts and replies ([`posting::PostingService`])
//! - roster initialization ([`RosterInitializer`])
//! - the hashtag mirror and the scheduler that repeats it
//!
//! # Example
//!
//! ```no_run
//! use libtootfleet::service::Fleet;
//! use libtootfleet::service::posting::PostRequest;
//! use libtootfleet::Config;
//!
//! # async fn example() -> libtootfleet::Result<()> {
//! let fleet = Fleet::from_config(Config::load()?)?;
//!
//! let response = fleet
//!     .post(&PostRequest {
//!         username: "alice".to_string(),
//!         password: None,
//!         text: "Hello fediverse".to_string(),
//!         media: None,
//!     })
//!     .await?;
//! println!("delivered: {}", response.delivered);
//! # Ok(())
//! # }
//! ```

pub mod posting;

use std::sync::Arc;

use self::posting::{PostRequest, PostResponse, PostingService, ReplyRequest};
use crate::avatar::AvatarFetcher;
use crate::config::{Config, Sns};
use crate::credentials::FileCredentialStore;
use crate::error::{ConfigError, FleetError, Result};
use crate::identity::{AccountSession, IdentityResolver};
use crate::idempotency::MarkerStore;
use crate::locate::locate_status;
use crate::mirror::{Mirror, MirrorReport};
use crate::provision::AccountProvisioner;
use crate::publish::Publisher;
use crate::remote::mastodon::MastodonInstance;
use crate::remote::Instance;
use crate::roster::{InitReport, RosterInitializer};
use crate::scheduler::{MirrorJob, PollScheduler};

/// How many recent statuses `purge` looks at
const PURGE_PAGE: u32 = 40;

pub struct Fleet {
    config: Arc<Config>,
    resolver: Arc<IdentityResolver>,
    remote_resolver: Arc<IdentityResolver>,
    posting: PostingService,
    mirror: Arc<Mirror>,
    roster: RosterInitializer,
    scheduler: PollScheduler,
}

impl Fleet {
    /// Build a fleet talking to the configured instances
    pub fn from_config(config: Config) -> Result<Self> {
        let local = MastodonInstance::new(&config.api_url, config.sns, config.timeout())?;
        let remote = MastodonInstance::new(&config.remote.api_url, Sns::Mastodon, config.timeout())?;
        Self::with_instances(config, Arc::new(local), Arc::new(remote))
    }

    /// Build a fleet on top of arbitrary instance implementations
    pub fn with_instances(
        config: Config,
        local: Arc<dyn Instance>,
        remote: Arc<dyn Instance>,
    ) -> Result<Self> {
        let config = Arc::new(config);
        let media_dir = config.paths.media_dir();

        let store = Arc::new(FileCredentialStore::new(config.paths.secrets_dir())?);
        let remote_store = Arc::new(FileCredentialStore::new(config.paths.remote_secrets_dir())?);
        let markers = Arc::new(MarkerStore::new(config.paths.idempotency_dir())?);

        let resolver = Arc::new(IdentityResolver::new(config.clone(), local, store));
        let remote_resolver = Arc::new(IdentityResolver::new(config.clone(), remote, remote_store));

        let avatars = AvatarFetcher::new(&config.avatar, media_dir.clone(), config.timeout())?;
        let provisioner = Arc::new(AccountProvisioner::new(config.clone(), resolver.clone(), avatars));
        let publisher = Arc::new(Publisher::new(markers, media_dir));

        let mirror = Arc::new(Mirror::new(
            config.clone(),
            resolver.clone(),
            provisioner.clone(),
            publisher.clone(),
        ));
        let roster = RosterInitializer::new(
            config.clone(),
            resolver.clone(),
            provisioner,
            publisher.clone(),
        );

        tracing::debug!(
            api_url = %config.api_url,
            remote_url = %config.remote.api_url,
            users = config.users.len(),
            "Fleet assembled"
        );

        Ok(Self {
            scheduler: PollScheduler::new(config.scheduler.unit()),
            posting: PostingService::new(resolver.clone(), publisher),
            config,
            resolver,
            remote_resolver,
            mirror,
            roster,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn posting(&self) -> &PostingService {
        &self.posting
    }

    pub async fn post(&self, request: &PostRequest) -> Result<PostResponse> {
        self.posting.post(request).await
    }

    /// Reply to the first public status containing `post_identifier`
    pub async fn reply(&self, request: &ReplyRequest) -> Result<PostResponse> {
        let target = self
            .locate_status(&request.post_identifier)
            .await?
            .ok_or_else(|| {
                FleetError::NotFound(format!(
                    "No status contains '{}'",
                    request.post_identifier
                ))
            })?;
        self.posting.reply(request, &target).await
    }

    pub async fn locate_status(&self, substring: &str) -> Result<Option<String>> {
        let admin = self.resolver.log_in_admin().await?;
        locate_status(&admin, substring).await
    }

    pub async fn initialize(&self) -> Result<InitReport> {
        self.roster.initialize().await
    }

    /// Run a single mirror cycle in the foreground
    pub async fn mirror_once(&self) -> Result<MirrorReport> {
        let remote = self.remote_session().await?;
        self.mirror
            .mirror_once(
                remote.api.as_ref(),
                &self.config.remote.hashtags,
                self.config.remote.limit,
            )
            .await
    }

    /// Log into the remote instance and start the background mirror
    pub async fn start_population(&self) -> Result<()> {
        if self.scheduler.is_running().await {
            return Err(crate::error::SchedulerError::AlreadyRunning.into());
        }

        let remote = self.remote_session().await?;
        let job = MirrorJob::new(
            self.mirror.clone(),
            remote.api,
            self.config.remote.hashtags.clone(),
            self.config.remote.limit,
        );
        self.scheduler.start(Arc::new(job)).await
    }

    pub async fn stop_population(&self) -> Result<()> {
        self.scheduler.stop().await
    }

    pub async fn is_populating(&self) -> bool {
        self.scheduler.is_running().await
    }

    /// Delete the most recent statuses of an existing account.
    ///
    /// Delivery markers stay in place, so purged content is not republished.
    pub async fn purge(&self, username: &str, password: Option<&str>) -> Result<usize> {
        let session = self.posting.session(username, password).await?;
        let statuses = session.api.own_statuses(PURGE_PAGE).await?;

        let mut deleted = 0;
        for status in statuses {
            session.api.delete_status(&status.id).await?;
            deleted += 1;
        }

        tracing::info!(username, deleted, "Purged statuses");
        Ok(deleted)
    }

    async fn remote_session(&self) -> Result<AccountSession> {
        let remote = &self.config.remote;
        let user = remote
            .user
            .as_deref()
            .ok_or_else(|| ConfigError::MissingField("remote.user".to_string()))?;
        let password = remote
            .password
            .as_deref()
            .ok_or_else(|| ConfigError::MissingField("remote.password".to_string()))?;

        self.remote_resolver.log_in(user, Some(password)).await
    }
}
