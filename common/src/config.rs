// Configuration management: trigger settings (file + env) and the command/job document

use crate::errors::ConfigError;
use crate::queue::NatsConfig;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment prefix for trigger settings, e.g. `PULSE_TRIGGER__B2_ACCOUNT_KEY`
pub const ENV_PREFIX: &str = "PULSE_TRIGGER";

/// Default location of the trigger settings
pub const DEFAULT_TRIGGER_CONFIG_PATH: &str = "configs/trigger_config.json";

/// Default location of the command/job document
pub const DEFAULT_COMMAND_CONFIG_PATH: &str = "configs/cmd_config.json";

/// Longest accepted job interval, one year
pub const MAX_INTERVAL_MINUTES: u64 = 365 * 24 * 60;

/// Trigger settings: broker credentials, log filters and upload bucket identifiers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    #[serde(default)]
    pub pulse_username: Option<String>,
    #[serde(default)]
    pub pulse_password: Option<String>,
    #[serde(default = "default_pulse_url")]
    pub pulse_url: String,
    #[serde(default = "default_pulse_stream")]
    pub pulse_stream: String,
    #[serde(default = "default_pulse_subject_prefix")]
    pub pulse_subject_prefix: String,
    #[serde(default = "default_publish_timeout_seconds")]
    pub publish_timeout_seconds: u64,
    /// Log targets to silence once the config is loaded
    #[serde(default)]
    pub log_filter: Vec<String>,
    #[serde(default)]
    pub b2_account_id: Option<String>,
    #[serde(default)]
    pub b2_account_key: Option<String>,
    #[serde(default)]
    pub b2_upload_bucket_name: Option<String>,
    #[serde(default = "default_b2_region")]
    pub b2_region: String,
    #[serde(default)]
    pub b2_endpoint: Option<String>,
    #[serde(default = "default_b2_status_object")]
    pub b2_status_object: String,
    /// Directory holding one timestamp file per job
    #[serde(default = "default_timestamp_dir")]
    pub timestamp_dir: PathBuf,
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

fn default_pulse_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_pulse_stream() -> String {
    "PULSE".to_string()
}

fn default_pulse_subject_prefix() -> String {
    "pulse".to_string()
}

fn default_publish_timeout_seconds() -> u64 {
    5
}

fn default_b2_region() -> String {
    "us-west-002".to_string()
}

fn default_b2_status_object() -> String {
    "status.json".to_string()
}

fn default_timestamp_dir() -> PathBuf {
    PathBuf::from(".md5")
}

/// Credentials and target of the status upload job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct B2Config {
    pub account_id: String,
    pub account_key: String,
    pub bucket_name: String,
    pub region: String,
    pub endpoint: String,
    pub status_object: String,
}

impl TriggerConfig {
    /// Load trigger settings from a JSON file, overlaid by `PULSE_TRIGGER__*` variables
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = absolute_path(path.as_ref());
        let contents = read_config_document(&path)?;

        let document: Value = serde_json::from_str(&contents).map_err(|e| ConfigError::Load {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        if document.as_object().is_some_and(Map::is_empty) {
            return Err(ConfigError::Empty { path });
        }

        let config = Config::builder()
            .add_source(File::from_str(&contents, FileFormat::Json))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("log_filter")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigError::Load {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        let settings: Self = config.try_deserialize().map_err(|e| ConfigError::Load {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate the settings this process consumes
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pulse_url.is_empty() {
            return Err(ConfigError::Invalid("pulse_url cannot be empty".to_string()));
        }
        if self.pulse_stream.is_empty() {
            return Err(ConfigError::Invalid(
                "pulse_stream cannot be empty".to_string(),
            ));
        }
        if !self
            .pulse_subject_prefix
            .split('.')
            .all(is_valid_subject_token)
        {
            return Err(ConfigError::Invalid(format!(
                "pulse_subject_prefix '{}' is not a valid subject",
                self.pulse_subject_prefix
            )));
        }
        if self.publish_timeout_seconds == 0 {
            return Err(ConfigError::Invalid(
                "publish_timeout_seconds must be greater than 0".to_string(),
            ));
        }
        if self.pulse_username.is_some() != self.pulse_password.is_some() {
            return Err(ConfigError::Invalid(
                "pulse_username and pulse_password must be set together".to_string(),
            ));
        }
        if let Some(bad) = self
            .log_filter
            .iter()
            .find(|target| target.is_empty() || target.contains(['=', ',', ' ']))
        {
            return Err(ConfigError::Invalid(format!(
                "log_filter entry '{}' is not a log target",
                bad
            )));
        }
        if self.b2_status_object.is_empty() {
            return Err(ConfigError::Invalid(
                "b2_status_object cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Broker settings derived from this config
    pub fn nats_config(&self) -> NatsConfig {
        NatsConfig {
            url: self.pulse_url.clone(),
            username: self.pulse_username.clone(),
            password: self.pulse_password.clone(),
            stream_name: self.pulse_stream.clone(),
            subject_prefix: self.pulse_subject_prefix.clone(),
            ..NatsConfig::default()
        }
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.publish_timeout_seconds)
    }

    /// B2 upload settings, present only when account id, key and bucket are all set
    pub fn b2_upload_config(&self) -> Option<B2Config> {
        let non_empty = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let account_id = non_empty(&self.b2_account_id)?;
        let account_key = non_empty(&self.b2_account_key)?;
        let bucket_name = non_empty(&self.b2_upload_bucket_name)?;
        let endpoint = self
            .b2_endpoint
            .clone()
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| format!("s3.{}.backblazeb2.com", self.b2_region));

        Some(B2Config {
            account_id,
            account_key,
            bucket_name,
            region: self.b2_region.clone(),
            endpoint,
            status_object: self.b2_status_object.clone(),
        })
    }
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            pulse_username: None,
            pulse_password: None,
            pulse_url: default_pulse_url(),
            pulse_stream: default_pulse_stream(),
            pulse_subject_prefix: default_pulse_subject_prefix(),
            publish_timeout_seconds: default_publish_timeout_seconds(),
            log_filter: Vec::new(),
            b2_account_id: None,
            b2_account_key: None,
            b2_upload_bucket_name: None,
            b2_region: default_b2_region(),
            b2_endpoint: None,
            b2_status_object: default_b2_status_object(),
            timestamp_dir: default_timestamp_dir(),
            metrics_port: None,
        }
    }
}

/// The command/job document: which jobs exist and how each maps to a task
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandConfig {
    #[serde(default)]
    pub jobs: BTreeMap<String, JobConfig>,
    #[serde(default)]
    pub commands: BTreeMap<String, CommandSpec>,
}

/// One triggered job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    #[serde(default = "default_enable")]
    pub enable: bool,
    /// Queue topic the job's tasks are published to
    pub topic: String,
    /// Name of the command the consumer runs
    pub cmd: String,
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
    /// Overrides merged over the command's default config
    #[serde(default)]
    pub configs: Map<String, Value>,
    /// Number of tasks pushed per dispatch
    #[serde(default = "default_amount")]
    pub amount: u32,
    /// Build-info document probed before each dispatch
    #[serde(default)]
    pub build_info_url: Option<String>,
    /// Publish even when the probed build has not changed
    #[serde(default)]
    pub always_trigger: bool,
}

fn default_enable() -> bool {
    true
}

fn default_interval_minutes() -> u64 {
    60
}

fn default_amount() -> u32 {
    1
}

impl JobConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes.saturating_mul(60))
    }
}

/// A command a consumer knows how to run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandSpec {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub default_config: Map<String, Value>,
}

impl CommandConfig {
    /// Load the command/job document from a JSON file
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = absolute_path(path.as_ref());
        let contents = read_config_document(&path)?;

        let document: Value = serde_json::from_str(&contents).map_err(|e| ConfigError::Load {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        if document.as_object().is_some_and(Map::is_empty) {
            return Err(ConfigError::Empty { path });
        }

        let command_config: Self =
            serde_json::from_value(document).map_err(|e| ConfigError::Load {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        command_config.validate()?;
        Ok(command_config)
    }

    /// Validate every job against the command table
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, job) in &self.jobs {
            if !is_valid_job_name(name) {
                return Err(ConfigError::Invalid(format!(
                    "job name '{}' cannot be used as a timestamp file name",
                    name
                )));
            }
            if !is_valid_subject_token(&job.topic) {
                return Err(ConfigError::Invalid(format!(
                    "job '{}' has invalid topic '{}'",
                    name, job.topic
                )));
            }
            if job.interval_minutes == 0 || job.interval_minutes > MAX_INTERVAL_MINUTES {
                return Err(ConfigError::Invalid(format!(
                    "job '{}' interval_minutes must be between 1 and {}",
                    name, MAX_INTERVAL_MINUTES
                )));
            }
            if job.amount == 0 {
                return Err(ConfigError::Invalid(format!(
                    "job '{}' amount must be greater than 0",
                    name
                )));
            }
            if !self.commands.contains_key(&job.cmd) {
                return Err(ConfigError::Invalid(format!(
                    "job '{}' refers to unknown command '{}'",
                    name, job.cmd
                )));
            }
        }
        Ok(())
    }

    pub fn job(&self, name: &str) -> Option<&JobConfig> {
        self.jobs.get(name)
    }

    pub fn command(&self, name: &str) -> Option<&CommandSpec> {
        self.commands.get(name)
    }

    /// Enabled jobs in name order
    pub fn enabled_jobs(&self) -> impl Iterator<Item = (&String, &JobConfig)> {
        self.jobs.iter().filter(|(_, job)| job.enable)
    }

    /// Distinct topics of the enabled jobs
    pub fn topics(&self) -> BTreeSet<&str> {
        self.enabled_jobs()
            .map(|(_, job)| job.topic.as_str())
            .collect()
    }
}

/// Topic and subject tokens may not contain whitespace or subject wildcards
pub fn is_valid_subject_token(token: &str) -> bool {
    !token.is_empty()
        && !token
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || matches!(c, '.' | '*' | '>'))
}

/// Job names double as timestamp file names
pub fn is_valid_job_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.starts_with(".tmp-")
        && !name.chars().any(|c| c.is_control() || matches!(c, '/' | '\\'))
}

fn absolute_path(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

fn read_config_document(path: &Path) -> Result<String, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ConfigError::NotFound {
            path: path.to_path_buf(),
        },
        _ => ConfigError::Load {
            path: path.to_path_buf(),
            reason: e.to_string(),
        },
    })?;

    if contents.trim().is_empty() {
        return Err(ConfigError::Empty {
            path: path.to_path_buf(),
        });
    }
    Ok(contents)
}
