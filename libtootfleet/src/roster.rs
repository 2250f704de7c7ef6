//! Roster initialization
//!
//! Brings every configured account to its declared state: the account
//! exists, its profile fields are set, its initial toots are published once
//! and it follows its configured targets. Running it again is a no-op apart
//! from re-sending profile fields.

use chrono::Utc;
use std::sync::Arc;

use crate::avatar::AvatarSource;
use crate::config::{Config, InitialToot, RosterUser};
use crate::error::{FleetError, Result};
use crate::identity::{AccountSession, IdentityResolver};
use crate::idempotency::FingerprintKind;
use crate::provision::{apply_profile, AccountProvisioner, ProvisionRequest};
use crate::publish::{PublishRequest, Publisher};

/// What happened for one roster user
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UserReport {
    pub created: bool,
    pub delivered: usize,
    pub skipped: usize,
    pub followed: usize,
}

#[derive(Debug)]
pub struct UserOutcome {
    pub login: String,
    pub result: Result<UserReport>,
}

#[derive(Debug, Default)]
pub struct InitReport {
    pub users: Vec<UserOutcome>,
}

impl InitReport {
    pub fn accounts_created(&self) -> usize {
        self.reports().filter(|r| r.created).count()
    }

    pub fn statuses_delivered(&self) -> usize {
        self.reports().map(|r| r.delivered).sum()
    }

    pub fn failures(&self) -> usize {
        self.users.iter().filter(|u| u.result.is_err()).count()
    }

    fn reports(&self) -> impl Iterator<Item = &UserReport> {
        self.users.iter().filter_map(|u| u.result.as_ref().ok())
    }
}

pub struct RosterInitializer {
    config: Arc<Config>,
    resolver: Arc<IdentityResolver>,
    provisioner: Arc<AccountProvisioner>,
    publisher: Arc<Publisher>,
}

impl RosterInitializer {
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

    /// Initialize every roster user; per-user failures end up in the report
    pub async fn initialize(&self) -> Result<InitReport> {
        let mut nicknames = self.resolver.existing_nicknames().await?;
        let mut report = InitReport::default();

        for user in &self.config.users {
            let result = self.initialize_user(&mut nicknames, user).await;
            match &result {
                Ok(r) => tracing::info!(
                    username = %user.login,
                    created = r.created,
                    delivered = r.delivered,
                    followed = r.followed,
                    "Roster user initialized"
                ),
                Err(e) => tracing::error!(username = %user.login, error = %e, "Roster user failed"),
            }
            report.users.push(UserOutcome {
                login: user.login.clone(),
                result,
            });
        }

        Ok(report)
    }

    async fn initialize_user(&self, nicknames: &mut Vec<String>, user: &RosterUser) -> Result<UserReport> {
        let mut report = UserReport::default();

        let session = if nicknames.iter().any(|n| n == &user.login) {
            self.resolver
                .log_in(&user.login, user.password.as_deref())
                .await?
        } else {
            let password = user.password.clone().ok_or_else(|| {
                FleetError::InvalidInput(format!(
                    "Roster user '{}' needs a password to be created",
                    user.login
                ))
            })?;
            let request = ProvisionRequest {
                username: user.login.clone(),
                email: user.email.clone(),
                password,
                profile: user.account.clone(),
                avatar: AvatarSource::from_spec(user.account.avatar.as_deref()),
            };
            let session = self.provisioner.provision(&request).await?;
            nicknames.push(user.login.clone());
            report.created = true;
            session
        };

        // Fresh accounts got their profile during provisioning
        if !report.created {
            apply_profile(
                session.api.as_ref(),
                &user.account,
                &self.config.paths.media_dir(),
            )
            .await?;
        }

        for toot in &user.initial_toots {
            let outcome = self
                .publisher
                .publish_as(&session, &self.toot_request(toot)?, FingerprintKind::Roster)
                .await?;
            if outcome.is_delivered() {
                report.delivered += 1;
            } else {
                report.skipped += 1;
            }
        }

        report.followed = self.follow_targets(&session, nicknames, &user.follow).await?;
        Ok(report)
    }

    fn toot_request(&self, toot: &InitialToot) -> Result<PublishRequest> {
        let mut request = PublishRequest::new(toot.text.clone()).with_media(toot.media.clone());

        if let Some(offset) = &toot.schedule {
            let delay = chrono::Duration::from_std(offset.as_duration()?).map_err(|e| {
                FleetError::InvalidInput(format!("Schedule offset out of range: {}", e))
            })?;
            request = request.scheduled_at(Utc::now() + delay);
        }
        Ok(request)
    }

    /// Follow every target that exists locally; returns how many were followed
    async fn follow_targets(
        &self,
        session: &AccountSession,
        nicknames: &[String],
        targets: &[String],
    ) -> Result<usize> {
        let mut followed = 0;
        for target in targets {
            if !nicknames.iter().any(|n| n == target) {
                tracing::debug!(username = %session.username, target = %target, "Follow target not on instance");
                continue;
            }
            match session.api.lookup_account(target).await? {
                Some(account) => {
                    session.api.follow(&account.id).await?;
                    followed += 1;
                }
                None => tracing::warn!(target = %target, "Follow target lookup found nothing"),
            }
        }
        Ok(followed)
    }
}
