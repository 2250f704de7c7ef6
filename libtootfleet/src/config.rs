//! Configuration management for Tootfleet
//!
//! The configuration is a single declarative document (YAML, or TOML when the
//! file ends in `.toml`) that is loaded once at startup and shared read-only
//! by every component.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};

/// Password shared by every account the mirror creates.
pub const DEFAULT_MIRROR_PASSWORD: &str = "this-is-the-password-for-retoots";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the local instance the fleet lives on
    pub api_url: String,

    #[serde(default)]
    pub sns: Sns,

    #[serde(default)]
    pub admin: AdminConfig,

    #[serde(default)]
    pub paths: PathsConfig,

    /// Roster of managed local accounts
    #[serde(default)]
    pub users: Vec<RosterUser>,

    #[serde(default)]
    pub remote: RemoteConfig,

    #[serde(default)]
    pub mirror: MirrorConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub avatar: AvatarConfig,

    /// Upper bound for every individual remote call
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Flavour of the local instance
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Sns {
    #[default]
    Pleroma,
    Mastodon,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    #[serde(default = "default_admin_user")]
    pub user: String,
    #[serde(default = "default_admin_email")]
    pub email: String,
    #[serde(default = "default_admin_password")]
    pub password: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            user: default_admin_user(),
            email: default_admin_email(),
            password: default_admin_password(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_secrets_path")]
    pub secrets: String,
    #[serde(default = "default_idempotency_path")]
    pub idempotency: String,
    #[serde(default = "default_media_path")]
    pub media: String,
    /// Credentials for the account the mirror reads the remote instance with
    #[serde(default = "default_remote_secrets_path")]
    pub remote_secrets: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            secrets: default_secrets_path(),
            idempotency: default_idempotency_path(),
            media: default_media_path(),
            remote_secrets: default_remote_secrets_path(),
        }
    }
}

impl PathsConfig {
    pub fn secrets_dir(&self) -> PathBuf {
        expand(&self.secrets)
    }

    pub fn idempotency_dir(&self) -> PathBuf {
        expand(&self.idempotency)
    }

    pub fn media_dir(&self) -> PathBuf {
        expand(&self.media)
    }

    pub fn remote_secrets_dir(&self) -> PathBuf {
        expand(&self.remote_secrets)
    }
}

/// One managed local account
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RosterUser {
    pub login: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub account: ProfileSpec,
    #[serde(default)]
    pub initial_toots: Vec<InitialToot>,
    #[serde(default)]
    pub follow: Vec<String>,
}

/// Declarative profile attributes; every present field is applied once
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ProfileSpec {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    /// Media file name (or URL) used as avatar on first provisioning
    #[serde(default)]
    pub avatar: Option<String>,
    /// Media file name used as header
    #[serde(default)]
    pub header: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InitialToot {
    pub text: String,
    #[serde(default)]
    pub media: Option<String>,
    #[serde(default)]
    pub schedule: Option<ScheduleOffset>,
}

/// Delay before an initial toot goes out: minutes, or a humantime string
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ScheduleOffset {
    Minutes(u64),
    Human(String),
}

impl ScheduleOffset {
    pub fn as_duration(&self) -> Result<Duration> {
        match self {
            ScheduleOffset::Minutes(minutes) => minutes
                .checked_mul(60)
                .map(Duration::from_secs)
                .ok_or_else(|| {
                    ConfigError::InvalidValue {
                        field: "initial_toots.schedule".to_string(),
                        reason: format!("{} minutes is out of range", minutes),
                    }
                    .into()
                }),
            ScheduleOffset::Human(text) => humantime::parse_duration(text).map_err(|e| {
                ConfigError::InvalidValue {
                    field: "initial_toots.schedule".to_string(),
                    reason: format!("'{}': {}", text, e),
                }
                .into()
            }),
        }
    }
}

/// Remote instance the mirror reads hashtag timelines from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_remote_url")]
    pub api_url: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_hashtags")]
    pub hashtags: Vec<String>,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_url: default_remote_url(),
            user: None,
            password: None,
            hashtags: default_hashtags(),
            limit: default_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    #[serde(default = "default_mirror_password")]
    pub password: String,
    #[serde(default = "default_email_domain")]
    pub email_domain: String,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            password: default_mirror_password(),
            email_domain: default_email_domain(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Length of one jitter unit in milliseconds
    #[serde(default = "default_unit_millis")]
    pub unit_millis: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            unit_millis: default_unit_millis(),
        }
    }
}

impl SchedulerConfig {
    pub fn unit(&self) -> Duration {
        Duration::from_millis(self.unit_millis)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvatarConfig {
    /// Face generation service; `None` disables generated avatars
    #[serde(default = "default_generator_url")]
    pub generator_url: Option<String>,
    #[serde(default = "default_gender")]
    pub gender: String,
}

impl Default for AvatarConfig {
    fn default() -> Self {
        Self {
            generator_url: default_generator_url(),
            gender: default_gender(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_admin_user() -> String {
    "admin".to_string()
}
fn default_admin_email() -> String {
    "admin@cyberrange.at".to_string()
}
fn default_admin_password() -> String {
    "adminpass".to_string()
}
fn default_secrets_path() -> String {
    "~/.local/share/tootfleet/secrets".to_string()
}
fn default_idempotency_path() -> String {
    "~/.local/share/tootfleet/idempotency".to_string()
}
fn default_media_path() -> String {
    "~/.local/share/tootfleet/media".to_string()
}
fn default_remote_secrets_path() -> String {
    "~/.local/share/tootfleet/remote-secrets".to_string()
}
fn default_remote_url() -> String {
    "https://mastodon.social".to_string()
}
fn default_hashtags() -> Vec<String> {
    [
        "cybersecurity",
        "infosec",
        "hacked",
        "cyberwarfare",
        "hackernews",
        "deepfake",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_limit() -> u32 {
    15
}
fn default_mirror_password() -> String {
    DEFAULT_MIRROR_PASSWORD.to_string()
}
fn default_email_domain() -> String {
    "cyberrange.at".to_string()
}
fn default_unit_millis() -> u64 {
    1000
}
fn default_generator_url() -> Option<String> {
    Some("https://this-person-does-not-exist.com".to_string())
}
fn default_gender() -> String {
    "all".to_string()
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).to_string())
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load from `path` when given (command-line override), else the default location
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
    }

    /// Load configuration from a specific path
    ///
    /// Files ending in `.toml` are parsed as TOML, anything else as YAML.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let is_toml = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("toml"))
            .unwrap_or(false);

        let config = if is_toml {
            Self::from_toml_str(&content)?
        } else {
            Self::from_yaml_str(&content)?
        };

        tracing::debug!(path = %path.display(), users = config.users.len(), "Config loaded");
        Ok(config)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content).map_err(ConfigError::YamlError)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(ConfigError::TomlError)?;
        config.validate()?;
        Ok(config)
    }

    /// Minimal configuration pointing at `api_url` with every default applied
    pub fn with_api_url(api_url: &str) -> Self {
        Self {
            api_url: api_url.to_string(),
            sns: Sns::default(),
            admin: AdminConfig::default(),
            paths: PathsConfig::default(),
            users: Vec::new(),
            remote: RemoteConfig::default(),
            mirror: MirrorConfig::default(),
            scheduler: SchedulerConfig::default(),
            avatar: AvatarConfig::default(),
            timeout_secs: default_timeout_secs(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_url.trim().is_empty() {
            return Err(ConfigError::MissingField("api_url".to_string()).into());
        }
        if self.admin.user.trim().is_empty() {
            return Err(ConfigError::MissingField("admin.user".to_string()).into());
        }
        if self.remote.limit == 0 {
            return Err(ConfigError::InvalidValue {
                field: "remote.limit".to_string(),
                reason: "must be at least 1".to_string(),
            }
            .into());
        }
        if let Some(user) = self.users.iter().find(|u| u.login.trim().is_empty()) {
            return Err(ConfigError::InvalidValue {
                field: "users.login".to_string(),
                reason: format!("empty login for roster entry with email '{}'", user.email),
            }
            .into());
        }
        Ok(())
    }

    /// Roster entry for `login`, if any
    pub fn roster_user(&self, login: &str) -> Option<&RosterUser> {
        self.users.iter().find(|u| u.login == login)
    }

    /// Configured password for `login`, looked up in the roster
    pub fn roster_password(&self, login: &str) -> Option<&str> {
        self.roster_user(login)
            .and_then(|u| u.password.as_deref())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("TOOTFLEET_CONFIG") {
        return Ok(expand(&path));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("tootfleet").join("config.yaml"))
}
