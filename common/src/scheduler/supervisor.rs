// Interval supervisor: runs registered jobs on a fixed cadence in the background

use crate::errors::SchedulerError;
use crate::telemetry;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

/// At most one invocation of a job runs at a time unless configured otherwise
pub const DEFAULT_MAX_INSTANCES: usize = 1;

/// A side-effecting job function invoked by the supervisor
#[async_trait]
pub trait ScheduledTask: Send + Sync {
    async fn run(&self) -> anyhow::Result<()>;
}

/// A task bound to an id and an interval
#[derive(Clone)]
pub struct ScheduledJob {
    id: String,
    interval: Duration,
    max_instances: usize,
    run_immediately: bool,
    task: Arc<dyn ScheduledTask>,
}

impl ScheduledJob {
    /// First run happens one interval after the job loop starts
    pub fn new(id: impl Into<String>, interval: Duration, task: Arc<dyn ScheduledTask>) -> Self {
        Self {
            id: id.into(),
            interval,
            max_instances: DEFAULT_MAX_INSTANCES,
            run_immediately: false,
            task,
        }
    }

    pub fn with_max_instances(mut self, max_instances: usize) -> Self {
        self.max_instances = max_instances;
        self
    }

    /// Fire the first run as soon as the job loop starts
    pub fn run_immediately(mut self, run_immediately: bool) -> Self {
        self.run_immediately = run_immediately;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn max_instances(&self) -> usize {
        self.max_instances
    }

    pub fn runs_immediately(&self) -> bool {
        self.run_immediately
    }
}

impl fmt::Debug for ScheduledJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledJob")
            .field("id", &self.id)
            .field("interval", &self.interval)
            .field("max_instances", &self.max_instances)
            .field("run_immediately", &self.run_immediately)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Stopped,
    Running,
    ShutDown,
}

/// Owns the job loops. Dropping it stops every loop.
pub struct IntervalSupervisor {
    jobs: Vec<ScheduledJob>,
    state: SupervisorState,
    shutdown_tx: broadcast::Sender<()>,
    handles: Vec<JoinHandle<()>>,
}

impl IntervalSupervisor {
    pub fn new() -> Self {
        let (shutdown_tx, _shutdown_rx) = broadcast::channel(1);

        Self {
            jobs: Vec::new(),
            state: SupervisorState::Stopped,
            shutdown_tx,
            handles: Vec::new(),
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn jobs(&self) -> &[ScheduledJob] {
        &self.jobs
    }

    pub fn job(&self, id: &str) -> Option<&ScheduledJob> {
        self.jobs.iter().find(|job| job.id == id)
    }

    /// Register a job. Jobs added while running start immediately.
    #[instrument(skip(self, job), fields(job_id = %job.id))]
    pub fn add_job(&mut self, job: ScheduledJob) -> Result<(), SchedulerError> {
        if self.state == SupervisorState::ShutDown {
            return Err(SchedulerError::ShutDown);
        }
        if self.job(&job.id).is_some() {
            return Err(SchedulerError::DuplicateJob(job.id));
        }
        if job.interval.is_zero() {
            return Err(SchedulerError::InvalidInterval(job.id));
        }
        if job.max_instances == 0 {
            return Err(SchedulerError::InvalidMaxInstances(job.id));
        }

        info!(
            interval_seconds = job.interval.as_secs(),
            max_instances = job.max_instances,
            run_immediately = job.run_immediately,
            "Job registered"
        );

        if self.state == SupervisorState::Running {
            let handle = spawn_job_loop(job.clone(), self.shutdown_tx.subscribe());
            self.handles.push(handle);
        }
        self.jobs.push(job);
        Ok(())
    }

    /// Start every registered job loop. Must be called inside a tokio runtime.
    #[instrument(skip(self))]
    pub fn start(&mut self) -> Result<(), SchedulerError> {
        match self.state {
            SupervisorState::Running => return Err(SchedulerError::AlreadyRunning),
            SupervisorState::ShutDown => return Err(SchedulerError::ShutDown),
            SupervisorState::Stopped => {}
        }

        info!(jobs = self.jobs.len(), "Starting interval supervisor");

        let handles: Vec<JoinHandle<()>> = self
            .jobs
            .iter()
            .map(|job| spawn_job_loop(job.clone(), self.shutdown_tx.subscribe()))
            .collect();
        self.handles.extend(handles);
        self.state = SupervisorState::Running;
        Ok(())
    }

    /// Stop every job loop. In-flight invocations are left to finish on their own.
    #[instrument(skip(self))]
    pub async fn shutdown(&mut self) {
        if self.state == SupervisorState::Running {
            info!("Stopping interval supervisor");
            let _ = self.shutdown_tx.send(());

            for handle in self.handles.drain(..) {
                if let Err(e) = handle.await {
                    error!(error = %e, "Job loop terminated abnormally");
                }
            }
        }

        self.state = SupervisorState::ShutDown;
        info!("Interval supervisor stopped");
    }
}

impl Default for IntervalSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

fn spawn_job_loop(job: ScheduledJob, shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
    tokio::spawn(run_job_loop(job, shutdown_rx))
}

async fn run_job_loop(job: ScheduledJob, mut shutdown_rx: broadcast::Receiver<()>) {
    let permits = Arc::new(Semaphore::new(job.max_instances));
    let first_tick = if job.run_immediately {
        Instant::now()
    } else {
        Instant::now() + job.interval
    };
    let mut ticker = interval_at(first_tick, job.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    debug!(job_id = %job.id, "Job loop started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let permit = match permits.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        warn!(
                            job_id = %job.id,
                            max_instances = job.max_instances,
                            "Maximum number of running instances reached, skipping this run"
                        );
                        telemetry::record_job_skipped(&job.id);
                        continue;
                    }
                };

                let task = job.task.clone();
                let job_id = job.id.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    debug!(job_id = %job_id, "Running scheduled job");
                    match task.run().await {
                        Ok(()) => debug!(job_id = %job_id, "Scheduled job finished"),
                        Err(e) => error!(job_id = %job_id, error = ?e, "Scheduled job failed"),
                    }
                });
            }
            _ = shutdown_rx.recv() => {
                debug!(job_id = %job.id, "Shutdown signal received, stopping job loop");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::sleep;

    struct CountingTask {
        runs: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl ScheduledTask for CountingTask {
        async fn run(&self) -> anyhow::Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("upload failed");
            }
            Ok(())
        }
    }

    struct StuckTask {
        runs: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ScheduledTask for StuckTask {
        async fn run(&self) -> anyhow::Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    fn counting(fail: bool) -> (Arc<AtomicUsize>, Arc<dyn ScheduledTask>) {
        let runs = Arc::new(AtomicUsize::new(0));
        let task = Arc::new(CountingTask {
            runs: runs.clone(),
            fail,
        });
        (runs, task)
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_job_runs_on_start_and_every_interval() {
        let (runs, task) = counting(false);
        let mut supervisor = IntervalSupervisor::new();
        supervisor
            .add_job(ScheduledJob::new("dispatch", Duration::from_secs(10), task).run_immediately(true))
            .unwrap();
        supervisor.start().unwrap();

        sleep(Duration::from_secs(1)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        sleep(Duration::from_secs(24)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_job_waits_one_interval() {
        let (runs, task) = counting(false);
        let mut supervisor = IntervalSupervisor::new();
        supervisor
            .add_job(ScheduledJob::new("dispatch", Duration::from_secs(60), task))
            .unwrap();
        supervisor.start().unwrap();

        sleep(Duration::from_secs(59)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        sleep(Duration::from_secs(2)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_job_never_overlaps() {
        let runs = Arc::new(AtomicUsize::new(0));
        let task = Arc::new(StuckTask { runs: runs.clone() });
        let mut supervisor = IntervalSupervisor::new();
        supervisor
            .add_job(ScheduledJob::new("upload", Duration::from_secs(60), task).run_immediately(true))
            .unwrap();
        supervisor.start().unwrap();

        sleep(Duration::from_secs(300)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_job_keeps_its_schedule() {
        let (runs, task) = counting(true);
        let mut supervisor = IntervalSupervisor::new();
        supervisor
            .add_job(ScheduledJob::new("upload", Duration::from_secs(10), task).run_immediately(true))
            .unwrap();
        supervisor.start().unwrap();

        sleep(Duration::from_secs(35)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_added_while_running_is_started() {
        let (runs, task) = counting(false);
        let mut supervisor = IntervalSupervisor::new();
        supervisor.start().unwrap();
        supervisor
            .add_job(ScheduledJob::new("late", Duration::from_secs(10), task).run_immediately(true))
            .unwrap();

        sleep(Duration::from_secs(1)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_ticking() {
        let (runs, task) = counting(false);
        let mut supervisor = IntervalSupervisor::new();
        supervisor
            .add_job(ScheduledJob::new("dispatch", Duration::from_secs(10), task).run_immediately(true))
            .unwrap();
        supervisor.start().unwrap();
        sleep(Duration::from_secs(1)).await;

        supervisor.shutdown().await;
        assert_eq!(supervisor.state(), SupervisorState::ShutDown);

        sleep(Duration::from_secs(100)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_registration_rules() {
        let (_, task) = counting(false);
        let mut supervisor = IntervalSupervisor::new();
        supervisor
            .add_job(ScheduledJob::new("dispatch", Duration::from_secs(10), task.clone()))
            .unwrap();

        assert_eq!(
            supervisor.add_job(ScheduledJob::new("dispatch", Duration::from_secs(10), task.clone())),
            Err(SchedulerError::DuplicateJob("dispatch".to_string()))
        );
        assert_eq!(
            supervisor.add_job(ScheduledJob::new("zero", Duration::ZERO, task.clone())),
            Err(SchedulerError::InvalidInterval("zero".to_string()))
        );
        assert_eq!(
            supervisor.add_job(
                ScheduledJob::new("none", Duration::from_secs(1), task.clone()).with_max_instances(0)
            ),
            Err(SchedulerError::InvalidMaxInstances("none".to_string()))
        );
        assert_eq!(supervisor.jobs().len(), 1);

        let job = supervisor.job("dispatch").unwrap();
        assert_eq!(job.max_instances(), DEFAULT_MAX_INSTANCES);
        assert!(!job.runs_immediately());
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let mut supervisor = IntervalSupervisor::new();
        assert_eq!(supervisor.state(), SupervisorState::Stopped);

        supervisor.start().unwrap();
        assert_eq!(supervisor.state(), SupervisorState::Running);
        assert_eq!(supervisor.start(), Err(SchedulerError::AlreadyRunning));

        supervisor.shutdown().await;
        assert_eq!(supervisor.start(), Err(SchedulerError::ShutDown));
    }
}
