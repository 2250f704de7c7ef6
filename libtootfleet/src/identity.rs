//! Identity resolution: from a username to an authenticated session
//!
//! The resolver never creates accounts. It answers "does this account exist
//! on the instance?" from the admin user listing and, if it does, logs in
//! with supplied, configured or stored credentials. Every successful login
//! refreshes the account's [`CredentialRecord`].

use std::sync::Arc;

use crate::config::Config;
use crate::credentials::{CredentialRecord, CredentialStore};
use crate::error::{FleetError, RemoteError, Result};
use crate::remote::{AppCredentials, Instance, Session, ADMIN_SCOPES, DEFAULT_SCOPES};

/// A logged-in account
#[derive(Clone)]
pub struct AccountSession {
    pub username: String,
    /// Remote account id, the fingerprint namespace for this account
    pub account_id: String,
    pub api: Arc<dyn Session>,
}

impl std::fmt::Debug for AccountSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountSession")
            .field("username", &self.username)
            .field("account_id", &self.account_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub enum Resolution {
    Found(AccountSession),
    /// No such account on the instance; it has to be provisioned first
    NotFound,
}

pub struct IdentityResolver {
    config: Arc<Config>,
    instance: Arc<dyn Instance>,
    store: Arc<dyn CredentialStore>,
}

impl IdentityResolver {
    pub fn new(
        config: Arc<Config>,
        instance: Arc<dyn Instance>,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            config,
            instance,
            store,
        }
    }

    pub fn instance(&self) -> &Arc<dyn Instance> {
        &self.instance
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// Resolve `username` to a session if the account exists remotely.
    ///
    /// Without a password, the roster password for `username` is used.
    pub async fn resolve(&self, username: &str, password: Option<&str>) -> Result<Resolution> {
        let nicknames = self.existing_nicknames().await?;
        if !nicknames.iter().any(|n| n == username) {
            tracing::debug!(username, "Account not present on instance");
            return Ok(Resolution::NotFound);
        }

        let session = self.log_in(username, password).await?;
        Ok(Resolution::Found(session))
    }

    /// Nicknames of every existing account except the administrator
    pub async fn existing_nicknames(&self) -> Result<Vec<String>> {
        let admin = self.log_in_admin().await?;

        let nicknames = admin.api.admin_nicknames().await.map_err(|e| match e {
            auth @ FleetError::Remote(RemoteError::Authentication(_)) => auth,
            other => RemoteError::Unavailable(format!("Admin user listing failed: {}", other)).into(),
        })?;

        let admin_user = &self.config.admin.user;
        Ok(nicknames
            .into_iter()
            .filter(|n| n != admin_user)
            .collect())
    }

    /// Log in as the administrative account with admin scopes
    pub async fn log_in_admin(&self) -> Result<AccountSession> {
        let admin = &self.config.admin;
        self.password_login(&admin.user, &admin.password, ADMIN_SCOPES)
            .await
    }

    /// Log in as `username`.
    ///
    /// Order of preference: supplied password, roster password, stored token.
    pub async fn log_in(&self, username: &str, password: Option<&str>) -> Result<AccountSession> {
        let password = password
            .filter(|p| !p.is_empty())
            .or_else(|| self.config.roster_password(username));

        if let Some(password) = password {
            return self
                .password_login(username, password, DEFAULT_SCOPES)
                .await;
        }

        let token = self
            .store
            .load(username)?
            .and_then(|record| record.access_token);
        match token {
            Some(token) => {
                tracing::debug!(username, "Reusing stored access token");
                self.open_session(username, &token).await
            }
            None => Err(RemoteError::Authentication(format!(
                "No password or stored token for '{}'",
                username
            ))
            .into()),
        }
    }

    async fn password_login(
        &self,
        username: &str,
        password: &str,
        scopes: &[&str],
    ) -> Result<AccountSession> {
        let app = self.ensure_app(username, scopes).await?;
        let token = self
            .instance
            .log_in(&app, username, password, scopes)
            .await?;

        let record = CredentialRecord::new(username, &app.client_id, &app.client_secret)
            .with_token(token.clone());
        self.store.save(&record)?;

        tracing::info!(username, "Logged in");
        self.open_session(username, &token).await
    }

    /// Reuse the stored application for `username` or register a new one
    pub async fn ensure_app(&self, username: &str, scopes: &[&str]) -> Result<AppCredentials> {
        if let Some(record) = self.store.load(username)? {
            return Ok(AppCredentials {
                client_id: record.client_id,
                client_secret: record.client_secret,
            });
        }

        let app = self
            .instance
            .register_app(&format!("{}_bot", username), scopes)
            .await?;
        let record = CredentialRecord::new(username, &app.client_id, &app.client_secret);

        if self.store.create(&record)? {
            tracing::debug!(username, "Registered application");
            return Ok(app);
        }

        // Another caller registered concurrently; theirs is the one on disk
        match self.store.load(username)? {
            Some(winner) => Ok(AppCredentials {
                client_id: winner.client_id,
                client_secret: winner.client_secret,
            }),
            None => Ok(app),
        }
    }

    /// Connect with `token` and learn the account id
    pub async fn open_session(&self, username: &str, token: &str) -> Result<AccountSession> {
        let api = self.instance.connect(token)?;
        let me = api.verify_credentials().await?;

        Ok(AccountSession {
            username: username.to_string(),
            account_id: me.id,
            api,
        })
    }
}
