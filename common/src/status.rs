// Status JSON creator: aggregates job timestamps and uploads them to B2

use crate::config::{B2Config, CommandConfig, TriggerConfig};
use crate::errors::StorageError;
use crate::models::{JobState, JobStatus, StatusReport};
use crate::scheduler::{IntervalSupervisor, ScheduledJob, ScheduledTask};
use crate::state::JobStateStore;
use crate::storage::ObjectStore;
use crate::telemetry;
use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Supervisor id of the status upload job
pub const STATUS_UPLOAD_JOB_ID: &str = "status_b2_uploader";

pub const STATUS_UPLOAD_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Builds the status document from the command config and the timestamp files
pub struct StatusJsonCreator {
    command_config: Arc<CommandConfig>,
    state_store: Arc<JobStateStore>,
    object_store: Arc<dyn ObjectStore>,
    object_key: String,
}

impl StatusJsonCreator {
    pub fn new(
        command_config: Arc<CommandConfig>,
        state_store: Arc<JobStateStore>,
        object_store: Arc<dyn ObjectStore>,
        object_key: impl Into<String>,
    ) -> Self {
        Self {
            command_config,
            state_store,
            object_store,
            object_key: object_key.into(),
        }
    }

    pub async fn build_report(&self) -> Result<StatusReport, StorageError> {
        let mut states: BTreeMap<String, JobState> = self
            .state_store
            .list()
            .await?
            .into_iter()
            .map(|state| (state.job_name.clone(), state))
            .collect();

        let jobs = self
            .command_config
            .jobs
            .iter()
            .map(|(name, job)| {
                let state = states.remove(name);
                let status = JobStatus {
                    enabled: job.enable,
                    topic: job.topic.clone(),
                    cmd: job.cmd.clone(),
                    interval_minutes: job.interval_minutes,
                    last_triggered_at: state.as_ref().map(|s| s.last_triggered_at),
                    build_id: state.as_ref().and_then(|s| s.build_id.clone()),
                    tasks_published: state.as_ref().map(|s| s.tasks_published),
                };
                (name.clone(), status)
            })
            .collect();

        Ok(StatusReport {
            generated_at: Utc::now(),
            jobs,
        })
    }

    /// Build the report and upload it, returning what was uploaded
    #[instrument(skip(self), fields(object_key = %self.object_key))]
    pub async fn upload(&self) -> Result<StatusReport, StorageError> {
        let report = self.build_report().await?;
        let body = serde_json::to_vec_pretty(&report)?;

        let result = self
            .object_store
            .put_object(&self.object_key, &body, "application/json")
            .await;
        telemetry::record_status_upload(result.is_ok());
        result?;

        info!(jobs = report.jobs.len(), "Status JSON uploaded");
        Ok(report)
    }
}

#[async_trait]
impl ScheduledTask for StatusJsonCreator {
    async fn run(&self) -> anyhow::Result<()> {
        self.upload().await.context("Status upload failed")?;
        Ok(())
    }
}

/// Register the status upload job when B2 credentials are configured
///
/// Returns `false` (after one warning) when account id, key or bucket is missing;
/// `connect` is never called in that case.
pub fn register_status_upload<F>(
    supervisor: &mut IntervalSupervisor,
    trigger_config: &TriggerConfig,
    command_config: Arc<CommandConfig>,
    state_store: Arc<JobStateStore>,
    connect: F,
) -> anyhow::Result<bool>
where
    F: FnOnce(&B2Config) -> Result<Arc<dyn ObjectStore>, StorageError>,
{
    let Some(b2_config) = trigger_config.b2_upload_config() else {
        warn!("Please config your B2 Account ID, Key, and Bucket Name to enable Status JSON Creator and B2 Uploader.");
        return Ok(false);
    };

    let object_store = connect(&b2_config).context("Failed to create B2 client")?;
    let creator = StatusJsonCreator::new(
        command_config,
        state_store,
        object_store,
        b2_config.status_object.clone(),
    );

    supervisor.add_job(
        ScheduledJob::new(STATUS_UPLOAD_JOB_ID, STATUS_UPLOAD_INTERVAL, Arc::new(creator))
            .with_max_instances(1),
    )?;

    info!(
        bucket = %b2_config.bucket_name,
        interval_minutes = STATUS_UPLOAD_INTERVAL.as_secs() / 60,
        "Enable Status JSON Creator and B2 Uploader."
    );
    Ok(true)
}
