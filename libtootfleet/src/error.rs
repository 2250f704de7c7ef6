//! Error types for Tootfleet

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FleetError>;

#[derive(Error, Debug)]
pub enum FleetError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Provisioning of '{username}' failed: {reason}")]
    Provisioning { username: String, reason: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl FleetError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            FleetError::InvalidInput(_) => 3,
            FleetError::Remote(RemoteError::Authentication(_)) => 2,
            FleetError::Config(_) => 2,
            FleetError::NotFound(_) => 4,
            FleetError::Remote(_) => 1,
            FleetError::Provisioning { .. } => 1,
            FleetError::Store(_) => 1,
            FleetError::Scheduler(_) => 1,
        }
    }

    /// Wrap an error raised while provisioning `username`.
    ///
    /// Errors that already carry a username are passed through unchanged.
    pub fn provisioning(username: &str, error: FleetError) -> FleetError {
        match error {
            already @ FleetError::Provisioning { .. } => already,
            other => FleetError::Provisioning {
                username: username.to_string(),
                reason: other.to_string(),
            },
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse YAML config: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Failed to parse TOML config: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to (de)serialize credential record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid name '{0}': {1}")]
    InvalidName(String, String),

    #[error("Refusing to follow symbolic link at {0}")]
    Symlink(String),
}

#[derive(Error, Debug, Clone)]
pub enum RemoteError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Publishing failed: {0}")]
    Publish(String),

    #[error("Remote unavailable: {0}")]
    Unavailable(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Task is already running")]
    AlreadyRunning,

    #[error("No task is currently running")]
    NotRunning,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_invalid_input() {
        let error = FleetError::InvalidInput("Empty text".to_string());
        assert_eq!(error.exit_code(), 3);
    }

    #[test]
    fn test_exit_code_authentication_error() {
        let error = FleetError::Remote(RemoteError::Authentication("bad password".to_string()));
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_other_remote_errors() {
        for remote in [
            RemoteError::Publish("x".to_string()),
            RemoteError::Unavailable("x".to_string()),
            RemoteError::Rejected("x".to_string()),
            RemoteError::RateLimit("x".to_string()),
        ] {
            assert_eq!(FleetError::Remote(remote).exit_code(), 1);
        }
    }

    #[test]
    fn test_exit_code_not_found() {
        assert_eq!(FleetError::NotFound("status".to_string()).exit_code(), 4);
    }

    #[test]
    fn test_error_message_formatting_provisioning() {
        let error = FleetError::Provisioning {
            username: "alice".to_string(),
            reason: "email taken".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Provisioning of 'alice' failed: email taken"
        );
    }

    #[test]
    fn test_error_message_formatting_remote() {
        let error: FleetError = RemoteError::Unavailable("connection refused".to_string()).into();
        assert_eq!(
            error.to_string(),
            "Remote error: Remote unavailable: connection refused"
        );
    }

    #[test]
    fn test_scheduler_error_messages() {
        let error: FleetError = SchedulerError::AlreadyRunning.into();
        assert_eq!(error.to_string(), "Scheduler error: Task is already running");

        let error: FleetError = SchedulerError::NotRunning.into();
        assert_eq!(error.to_string(), "Scheduler error: No task is currently running");
    }

    #[test]
    fn test_provisioning_wraps_with_username() {
        let inner: FleetError = RemoteError::Rejected("username taken".to_string()).into();
        let wrapped = FleetError::provisioning("bob", inner);

        match wrapped {
            FleetError::Provisioning { username, reason } => {
                assert_eq!(username, "bob");
                assert!(reason.contains("username taken"));
            }
            other => panic!("Expected provisioning error, got {:?}", other),
        }
    }

    #[test]
    fn test_provisioning_does_not_double_wrap() {
        let inner = FleetError::Provisioning {
            username: "carol".to_string(),
            reason: "avatar".to_string(),
        };
        let wrapped = FleetError::provisioning("someone-else", inner);
        assert!(wrapped.to_string().contains("'carol'"));
    }

    #[test]
    fn test_error_conversion_from_config_error() {
        let config_error = ConfigError::MissingField("api_url".to_string());
        let error: FleetError = config_error.into();
        assert!(matches!(error, FleetError::Config(_)));
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn test_error_conversion_from_store_error() {
        let store_error = StoreError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "denied",
        ));
        let error: FleetError = store_error.into();
        assert!(matches!(error, FleetError::Store(_)));
    }

    #[test]
    fn test_remote_error_clone() {
        let original = RemoteError::Unavailable("timeout".to_string());
        let cloned = original.clone();
        assert_eq!(original.to_string(), cloned.to_string());
    }
}
