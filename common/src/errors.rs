// Error handling framework

use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("Failed to load config from {}: {reason}", path.display())]
    Load { path: PathBuf, reason: String },

    #[error("There is no config content in {}", path.display())]
    Empty { path: PathBuf },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// The file the error refers to, if any
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            ConfigError::NotFound { path }
            | ConfigError::Load { path, .. }
            | ConfigError::Empty { path } => Some(path),
            ConfigError::Invalid(_) => None,
        }
    }
}

/// Queue-related errors
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Failed to connect to queue: {0}")]
    Connection(String),

    #[error("Failed to create stream: {0}")]
    StreamCreation(String),

    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    #[error("Failed to publish message: {0}")]
    PublishFailed(String),

    #[error("Failed to purge messages: {0}")]
    PurgeFailed(String),

    #[error("Message serialization failed: {0}")]
    SerializationFailed(String),

    #[error("Queue operation timeout: {0}")]
    Timeout(String),
}

/// Storage errors (timestamp files and B2 object storage)
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("B2 error: {0}")]
    B2Error(String),

    #[error("Filesystem error: {0}")]
    FileSystemError(String),

    #[error("Invalid JSON: {0}")]
    InvalidJson(String),
}

/// Build probe errors
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Build info request failed: {0}")]
    RequestFailed(String),

    #[error("Unexpected status {status} from {url}")]
    UnexpectedStatus { url: String, status: u16 },

    #[error("Invalid build info from {url}: {reason}")]
    InvalidResponse { url: String, reason: String },
}

/// Interval supervisor errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Job '{0}' is already registered")]
    DuplicateJob(String),

    #[error("Job '{0}' must have a non-zero interval")]
    InvalidInterval(String),

    #[error("Job '{0}' must allow at least one running instance")]
    InvalidMaxInstances(String),

    #[error("Supervisor is already running")]
    AlreadyRunning,

    #[error("Supervisor has been shut down")]
    ShutDown,
}

/// Errors raised by a single dispatch cycle
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Unknown job: {0}")]
    UnknownJob(String),

    #[error("Job '{job}' refers to unknown command '{command}'")]
    UnknownCommand { job: String, command: String },

    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    State(#[from] StorageError),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::InvalidJson(err.to_string())
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::FileSystemError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_mentions_path() {
        let err = ConfigError::Empty {
            path: PathBuf::from("/etc/pulse/trigger_config.json"),
        };
        assert!(err.to_string().contains("/etc/pulse/trigger_config.json"));
        assert_eq!(
            err.path(),
            Some(&PathBuf::from("/etc/pulse/trigger_config.json"))
        );
    }

    #[test]
    fn test_invalid_config_has_no_path() {
        let err = ConfigError::Invalid("topic cannot be empty".to_string());
        assert!(err.path().is_none());
    }

    #[test]
    fn test_dispatch_error_is_transparent() {
        let err: DispatchError = QueueError::Timeout("5s".to_string()).into();
        assert_eq!(err.to_string(), "Queue operation timeout: 5s");
    }

    #[test]
    fn test_scheduler_error_display() {
        let err = SchedulerError::DuplicateJob("status_b2_uploader".to_string());
        assert!(err.to_string().contains("status_b2_uploader"));
    }
}
