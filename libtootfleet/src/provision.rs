//! Account provisioning
//!
//! Creates bot accounts that do not exist on the instance yet. Remote
//! accounts are never recreated: when a credential record is already present
//! the provisioner logs in instead, which is also how a run interrupted
//! between account creation and the first login recovers.

use std::path::Path;
use std::sync::Arc;

use crate::avatar::{AvatarFetcher, AvatarSource};
use crate::config::{Config, ProfileSpec};
use crate::credentials::CredentialStore;
use crate::error::{FleetError, RemoteError, Result};
use crate::identity::{AccountSession, IdentityResolver};
use crate::remote::{Instance, ProfileUpdate, Session, Signup, DEFAULT_SCOPES};

#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub profile: ProfileSpec,
    pub avatar: AvatarSource,
}

/// Session plus whether the account was created by this call
#[derive(Debug)]
pub struct EnsuredAccount {
    pub session: AccountSession,
    pub created: bool,
}

pub struct AccountProvisioner {
    config: Arc<Config>,
    instance: Arc<dyn Instance>,
    store: Arc<dyn CredentialStore>,
    resolver: Arc<IdentityResolver>,
    avatars: AvatarFetcher,
}

impl AccountProvisioner {
    pub fn new(
        config: Arc<Config>,
        resolver: Arc<IdentityResolver>,
        avatars: AvatarFetcher,
    ) -> Self {
        Self {
            config,
            instance: resolver.instance().clone(),
            store: resolver.store().clone(),
            resolver,
            avatars,
        }
    }

    /// Create the account described by `request` and return its session.
    ///
    /// Errors carry the username.
    pub async fn provision(&self, request: &ProvisionRequest) -> Result<AccountSession> {
        self.provision_inner(request)
            .await
            .map_err(|e| FleetError::provisioning(&request.username, e))
    }

    async fn provision_inner(&self, request: &ProvisionRequest) -> Result<AccountSession> {
        let username = request.username.as_str();

        if let Some(record) = self.store.load(username)? {
            tracing::warn!(username, "Credential record exists, logging in instead of creating");
            let login = self
                .resolver
                .log_in(username, Some(&request.password))
                .await;

            // A record without a token means an earlier run stopped after
            // registering the application; the account may never have been created
            match login {
                Err(FleetError::Remote(RemoteError::Authentication(reason)))
                    if record.access_token.is_none() =>
                {
                    tracing::info!(username, %reason, "Login failed for unfinished provisioning, creating account");
                }
                other => return other,
            }
        }

        let app = self.resolver.ensure_app(username, DEFAULT_SCOPES).await?;

        let signup = Signup {
            username: username.to_string(),
            email: request.email.clone(),
            password: request.password.clone(),
            agreement: true,
            locale: "en".to_string(),
        };
        let token = match self.instance.create_account(&app, &signup).await {
            Ok(token) => token,
            Err(FleetError::Remote(RemoteError::Rejected(reason))) => {
                // The account may exist remotely without a local record
                tracing::warn!(username, %reason, "Account creation rejected, trying login");
                return match self
                    .resolver
                    .log_in(username, Some(&request.password))
                    .await
                {
                    Ok(session) => Ok(session),
                    Err(e) => {
                        tracing::debug!(username, error = %e, "Login after rejected creation failed");
                        Err(RemoteError::Rejected(reason).into())
                    }
                };
            }
            Err(e) => return Err(e),
        };
        tracing::info!(username, email = %request.email, "Account created");

        if let Some(mut record) = self.store.load(username)? {
            record.access_token = Some(token.clone());
            self.store.save(&record)?;
        }

        let session = self.resolver.open_session(username, &token).await?;

        if let Some(path) = self.avatars.resolve(username, &request.avatar).await? {
            session
                .api
                .update_profile(&ProfileUpdate::Avatar(path))
                .await?;
        }

        apply_profile(
            session.api.as_ref(),
            &request.profile,
            &self.config.paths.media_dir(),
        )
        .await?;

        Ok(session)
    }

    /// Log into `username` if it is one of `nicknames`, provision it otherwise.
    ///
    /// A newly provisioned username is appended to `nicknames` so later
    /// items of the same batch see it.
    pub async fn ensure(
        &self,
        nicknames: &mut Vec<String>,
        request: &ProvisionRequest,
    ) -> Result<EnsuredAccount> {
        if nicknames.iter().any(|n| n == &request.username) {
            let session = self
                .resolver
                .log_in(&request.username, Some(&request.password))
                .await?;
            return Ok(EnsuredAccount {
                session,
                created: false,
            });
        }

        let session = self.provision(request).await?;
        nicknames.push(request.username.clone());
        Ok(EnsuredAccount {
            session,
            created: true,
        })
    }
}

/// Apply the present fields of `profile`, one update call per field.
///
/// `avatar` is not applied here; it is only set when an account is created.
pub async fn apply_profile(session: &dyn Session, profile: &ProfileSpec, media_dir: &Path) -> Result<()> {
    if let Some(name) = &profile.display_name {
        session
            .update_profile(&ProfileUpdate::DisplayName(name.clone()))
            .await?;
    }
    if let Some(bio) = &profile.bio {
        session.update_profile(&ProfileUpdate::Note(bio.clone())).await?;
    }
    if let Some(header) = &profile.header {
        let path = media_dir.join(header);
        if path.is_file() {
            session.update_profile(&ProfileUpdate::Header(path)).await?;
        } else {
            tracing::warn!(path = %path.display(), "Header file missing, skipping");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::FileCredentialStore;
    use crate::remote::mock::MockFediverse;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        server: MockFediverse,
        provisioner: AccountProvisioner,
        _dir: TempDir,
    }

    fn fixture(server: MockFediverse) -> Fixture {
        let dir = TempDir::new().unwrap();
        let mut config = Config::with_api_url("https://mock.instance");
        config.paths.media = dir.path().join("media").display().to_string();
        config.avatar.generator_url = None;
        let config = Arc::new(config);

        let store = Arc::new(FileCredentialStore::new(dir.path().join("secrets")).unwrap());
        let resolver = Arc::new(IdentityResolver::new(
            config.clone(),
            Arc::new(server.clone()),
            store,
        ));
        let avatars = AvatarFetcher::new(
            &config.avatar,
            config.paths.media_dir(),
            Duration::from_secs(1),
        )
        .unwrap();

        Fixture {
            server,
            provisioner: AccountProvisioner::new(config, resolver, avatars),
            _dir: dir,
        }
    }

    fn request(username: &str) -> ProvisionRequest {
        ProvisionRequest {
            username: username.to_string(),
            email: format!("{}@x", username),
            password: "pw".to_string(),
            profile: ProfileSpec {
                display_name: Some("Display".to_string()),
                bio: Some("Bio".to_string()),
                ..Default::default()
            },
            avatar: AvatarSource::None,
        }
    }

    #[tokio::test]
    async fn test_provision_creates_account_and_profile() {
        let f = fixture(MockFediverse::new().with_admin("admin", "adminpass"));

        let session = f.provisioner.provision(&request("alice")).await.unwrap();
        assert_eq!(session.username, "alice");

        let account = f.server.account("alice").unwrap();
        assert_eq!(account.display_name.as_deref(), Some("Display"));
        assert_eq!(account.note.as_deref(), Some("Bio"));
        assert_eq!(account.avatar, None);
        assert_eq!(f.server.counts().update_profile, 2);
    }

    #[tokio::test]
    async fn test_existing_record_falls_back_to_login() {
        let f = fixture(MockFediverse::new().with_admin("admin", "adminpass"));

        f.provisioner.provision(&request("bob")).await.unwrap();
        f.provisioner.provision(&request("bob")).await.unwrap();

        assert_eq!(f.server.counts().create_account, 1);
        assert_eq!(f.server.accounts().len(), 2);
    }

    #[tokio::test]
    async fn test_rejection_carries_username() {
        let server = MockFediverse::new().with_admin("admin", "adminpass");
        server.fail_account_creation("email already taken");
        let f = fixture(server);

        let err = f.provisioner.provision(&request("carol")).await.unwrap_err();
        match err {
            FleetError::Provisioning { username, reason } => {
                assert_eq!(username, "carol");
                assert!(reason.contains("email already taken"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unfinished_provisioning_is_resumed() {
        let server = MockFediverse::new().with_admin("admin", "adminpass");
        server.fail_account_creation("instance closed for signups");
        let f = fixture(server);

        assert!(f.provisioner.provision(&request("erin")).await.is_err());

        f.server.clear_failures();
        let session = f.provisioner.provision(&request("erin")).await.unwrap();

        assert_eq!(session.username, "erin");
        assert_eq!(f.server.counts().register_app, 1);
        assert!(f.server.account("erin").is_some());
    }

    #[tokio::test]
    async fn test_remote_account_without_record_is_logged_into() {
        let f = fixture(
            MockFediverse::new()
                .with_admin("admin", "adminpass")
                .with_account("bob", "pw"),
        );

        let session = f.provisioner.provision(&request("bob")).await.unwrap();

        assert_eq!(session.username, "bob");
        assert_eq!(session.account_id, f.server.account("bob").unwrap().id);
        assert_eq!(f.server.counts().create_account, 1);
        assert_eq!(f.server.counts().log_in, 1);
        assert_eq!(f.server.accounts().len(), 2);

        let record = f.provisioner.store.load("bob").unwrap().unwrap();
        assert!(record.access_token.is_some());
    }

    #[tokio::test]
    async fn test_remote_account_with_wrong_password_keeps_rejection() {
        let f = fixture(
            MockFediverse::new()
                .with_admin("admin", "adminpass")
                .with_account("bob", "other"),
        );

        let err = f.provisioner.provision(&request("bob")).await.unwrap_err();

        match err {
            FleetError::Provisioning { username, reason } => {
                assert_eq!(username, "bob");
                assert!(reason.contains("already taken"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ensure_tracks_new_nicknames() {
        let f = fixture(MockFediverse::new().with_admin("admin", "adminpass"));
        let mut nicknames = Vec::new();

        let first = f.provisioner.ensure(&mut nicknames, &request("dave")).await.unwrap();
        let second = f.provisioner.ensure(&mut nicknames, &request("dave")).await.unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(nicknames, vec!["dave".to_string()]);
        assert_eq!(f.server.counts().create_account, 1);
    }
}
