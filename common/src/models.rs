// Data models for published tasks, probed builds and job status

use crate::config::{CommandSpec, JobConfig};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

// ============================================================================
// Task Models
// ============================================================================

/// MetaTask is the task descriptor published to the queue, one per unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaTask {
    /// Unique task ID, also used as the broker de-duplication ID
    pub task_id: Uuid,
    pub job_name: String,
    pub command_name: String,
    pub topic: String,
    /// Command defaults overlaid by the job's configs
    pub command_config: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildInfo>,
    /// Position of this task within one dispatch (0-based)
    pub sequence: u32,
    pub created_at: DateTime<Utc>,
}

impl MetaTask {
    pub fn new(
        job_name: &str,
        job: &JobConfig,
        command: &CommandSpec,
        build: Option<BuildInfo>,
        sequence: u32,
    ) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            job_name: job_name.to_string(),
            command_name: job.cmd.clone(),
            topic: job.topic.clone(),
            command_config: merge_command_config(&command.default_config, &job.configs),
            build,
            sequence,
            created_at: Utc::now(),
        }
    }
}

/// Overlay job-level settings on a command's defaults (shallow, job wins)
pub fn merge_command_config(
    defaults: &Map<String, Value>,
    overrides: &Map<String, Value>,
) -> Map<String, Value> {
    let mut merged = defaults.clone();
    for (key, value) in overrides {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// BuildInfo describes the latest build reported by the build archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInfo {
    pub build_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    pub url: String,
}

// ============================================================================
// Job State Models
// ============================================================================

/// JobState is the content of a job's timestamp file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobState {
    pub job_name: String,
    pub last_triggered_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_id: Option<String>,
    pub tasks_published: u32,
}

/// StatusReport is the document uploaded by the status job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub generated_at: DateTime<Utc>,
    pub jobs: BTreeMap<String, JobStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub enabled: bool,
    pub topic: String,
    pub cmd: String,
    pub interval_minutes: u64,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub build_id: Option<String>,
    pub tasks_published: Option<u32>,
}
