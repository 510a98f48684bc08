// Task dispatcher: turns configured jobs into MetaTasks on the queue

use crate::config::CommandConfig;
use crate::errors::{DispatchError, SchedulerError, StorageError};
use crate::models::{JobState, MetaTask};
use crate::probe::BuildProbe;
use crate::queue::TaskPublisher;
use crate::scheduler::{IntervalSupervisor, ScheduledJob, ScheduledTask};
use crate::state::JobStateStore;
use crate::telemetry;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Result of one dispatch cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// This many tasks reached the queue
    Published(u32),
    /// The probed build was already dispatched
    Skipped,
}

/// Supervisor id of a job's dispatch loop
pub fn dispatch_job_id(job_name: &str) -> String {
    format!("dispatch:{}", job_name)
}

/// Publishes MetaTasks for every enabled job on the job's interval
#[derive(Clone)]
pub struct TasksTrigger {
    command_config: Arc<CommandConfig>,
    publisher: Arc<dyn TaskPublisher>,
    probe: Arc<dyn BuildProbe>,
    state_store: Arc<JobStateStore>,
    clean_at_begin: bool,
}

impl TasksTrigger {
    pub fn new(
        command_config: Arc<CommandConfig>,
        publisher: Arc<dyn TaskPublisher>,
        probe: Arc<dyn BuildProbe>,
        state_store: Arc<JobStateStore>,
    ) -> Self {
        Self {
            command_config,
            publisher,
            probe,
            state_store,
            clean_at_begin: false,
        }
    }

    /// Purge pending tasks of this producer before the first dispatch
    pub fn with_clean_at_begin(mut self, clean_at_begin: bool) -> Self {
        self.clean_at_begin = clean_at_begin;
        self
    }

    /// Register one dispatch loop per enabled job, returning how many were registered
    ///
    /// With `skip_first_query` the first dispatch happens one interval after start
    /// instead of immediately.
    #[instrument(skip(self, supervisor))]
    pub async fn run(
        &self,
        supervisor: &mut IntervalSupervisor,
        skip_first_query: bool,
    ) -> Result<usize, SchedulerError> {
        if self.clean_at_begin {
            self.clean_queues().await;
        }

        let mut registered = 0;
        for (job_name, job) in self.command_config.enabled_jobs() {
            let task = Arc::new(DispatchTask {
                trigger: self.clone(),
                job_name: job_name.clone(),
            });
            supervisor.add_job(
                ScheduledJob::new(dispatch_job_id(job_name), job.interval(), task)
                    .with_max_instances(1)
                    .run_immediately(!skip_first_query),
            )?;
            registered += 1;
        }

        if registered == 0 {
            warn!("No enabled jobs in command config, nothing will be dispatched");
        } else if skip_first_query {
            info!(jobs = registered, "Skipping first query, first dispatch after one interval");
        }

        Ok(registered)
    }

    /// Purge every topic the enabled jobs publish to. Failures are logged only.
    #[instrument(skip(self))]
    pub async fn clean_queues(&self) -> u64 {
        let mut purged = 0;
        for topic in self.command_config.topics() {
            match self.publisher.purge(topic).await {
                Ok(count) => {
                    info!(topic = %topic, purged = count, "Cleaned pending tasks");
                    purged += count;
                }
                Err(e) => warn!(topic = %topic, error = %e, "Failed to clean pending tasks"),
            }
        }
        purged
    }

    /// Run one dispatch cycle for a job
    #[instrument(skip(self))]
    pub async fn dispatch(&self, job_name: &str) -> Result<DispatchOutcome, DispatchError> {
        let job = self
            .command_config
            .job(job_name)
            .ok_or_else(|| DispatchError::UnknownJob(job_name.to_string()))?;
        let command =
            self.command_config
                .command(&job.cmd)
                .ok_or_else(|| DispatchError::UnknownCommand {
                    job: job_name.to_string(),
                    command: job.cmd.clone(),
                })?;

        let previous = match self.state_store.load(job_name).await {
            Ok(state) => state,
            Err(StorageError::InvalidJson(reason)) => {
                warn!(reason = %reason, "Ignoring unreadable timestamp file");
                None
            }
            Err(e) => return Err(e.into()),
        };

        let build = match &job.build_info_url {
            Some(url) => Some(self.probe.latest_build(url).await?),
            None => None,
        };

        if let Some(build) = &build {
            let last_build_id = previous.as_ref().and_then(|s| s.build_id.as_deref());
            if last_build_id == Some(build.build_id.as_str()) && !job.always_trigger {
                info!(build_id = %build.build_id, "No new build since last trigger, skipping");
                return Ok(DispatchOutcome::Skipped);
            }
        }

        let mut published = 0;
        let mut last_error = None;
        for sequence in 0..job.amount {
            let task = MetaTask::new(job_name, job, command, build.clone(), sequence);
            match self.publisher.publish(&task).await {
                Ok(()) => {
                    published += 1;
                    telemetry::record_task_published(job_name, &job.topic);
                }
                Err(e) => {
                    error!(task_id = %task.task_id, error = %e, "Failed to publish task");
                    telemetry::record_publish_failure(job_name, &job.topic);
                    last_error = Some(e);
                }
            }
        }

        // Leave the timestamp untouched so the next interval tries again
        if published == 0 {
            if let Some(e) = last_error {
                return Err(e.into());
            }
        }

        self.state_store
            .save(&JobState {
                job_name: job_name.to_string(),
                last_triggered_at: Utc::now(),
                build_id: build.map(|b| b.build_id),
                tasks_published: published,
            })
            .await?;

        info!(published = published, topic = %job.topic, "Dispatched tasks");
        Ok(DispatchOutcome::Published(published))
    }
}

/// One job's dispatch cycle as seen by the supervisor
struct DispatchTask {
    trigger: TasksTrigger,
    job_name: String,
}

#[async_trait]
impl ScheduledTask for DispatchTask {
    async fn run(&self) -> anyhow::Result<()> {
        self.trigger.dispatch(&self.job_name).await?;
        Ok(())
    }
}
