// Integration tests for the pulse trigger
// Dispatcher, supervisor, timestamp store and status uploader wired together

use async_trait::async_trait;
use common::{
    config::{CommandConfig, TriggerConfig},
    dispatcher::{DispatchOutcome, TasksTrigger},
    errors::{ProbeError, QueueError, StorageError},
    models::{BuildInfo, MetaTask, StatusReport},
    probe::BuildProbe,
    queue::TaskPublisher,
    scheduler::{IntervalSupervisor, SupervisorState},
    state::JobStateStore,
    status::{register_status_upload, StatusJsonCreator, STATUS_UPLOAD_JOB_ID},
    storage::ObjectStore,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;

#[derive(Debug, Clone, PartialEq)]
enum QueueEvent {
    Purge(String),
    Publish(MetaTask),
}

/// In-memory queue recording purges and publishes in order
struct RecordingQueue {
    events: Mutex<Vec<QueueEvent>>,
    published_tx: mpsc::UnboundedSender<MetaTask>,
    fail_publish: bool,
}

impl RecordingQueue {
    fn new(fail_publish: bool) -> (Arc<Self>, mpsc::UnboundedReceiver<MetaTask>) {
        let (published_tx, published_rx) = mpsc::unbounded_channel();
        let queue = Arc::new(Self {
            events: Mutex::new(Vec::new()),
            published_tx,
            fail_publish,
        });
        (queue, published_rx)
    }

    async fn events(&self) -> Vec<QueueEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl TaskPublisher for RecordingQueue {
    async fn publish(&self, task: &MetaTask) -> Result<(), QueueError> {
        if self.fail_publish {
            return Err(QueueError::Timeout("no ack from broker".to_string()));
        }
        self.events
            .lock()
            .await
            .push(QueueEvent::Publish(task.clone()));
        let _ = self.published_tx.send(task.clone());
        Ok(())
    }

    async fn purge(&self, topic: &str) -> Result<u64, QueueError> {
        self.events
            .lock()
            .await
            .push(QueueEvent::Purge(topic.to_string()));
        Ok(2)
    }
}

struct StaticProbe(&'static str);

#[async_trait]
impl BuildProbe for StaticProbe {
    async fn latest_build(&self, url: &str) -> Result<BuildInfo, ProbeError> {
        Ok(BuildInfo {
            build_id: self.0.to_string(),
            revision: Some("8f3c2a1b".to_string()),
            url: url.to_string(),
        })
    }
}

#[derive(Default)]
struct MemoryBucket {
    objects: Mutex<Vec<(String, Vec<u8>)>>,
}

#[async_trait]
impl ObjectStore for MemoryBucket {
    async fn put_object(
        &self,
        key: &str,
        data: &[u8],
        _content_type: &str,
    ) -> Result<(), StorageError> {
        self.objects
            .lock()
            .await
            .push((key.to_string(), data.to_vec()));
        Ok(())
    }
}

fn command_config() -> Arc<CommandConfig> {
    let config: CommandConfig = serde_json::from_value(serde_json::json!({
        "jobs": {
            "win10-nightly": {
                "topic": "win10",
                "cmd": "run-hasal-on-latest-nightly",
                "interval_minutes": 60,
                "amount": 2,
                "configs": {"suite": "facebook"},
                "build_info_url": "https://archive.example/latest/firefox.json"
            },
            "win7-nightly": {
                "topic": "win7",
                "cmd": "run-hasal-on-latest-nightly",
                "enable": false
            }
        },
        "commands": {
            "run-hasal-on-latest-nightly": {
                "description": "Run Hasal against the latest nightly",
                "default_config": {"browser": "firefox", "suite": "all"}
            }
        }
    }))
    .expect("valid command config");
    config.validate().expect("command config passes validation");
    Arc::new(config)
}

fn trigger_with(
    queue: Arc<RecordingQueue>,
    state_store: Arc<JobStateStore>,
    clean: bool,
) -> TasksTrigger {
    TasksTrigger::new(
        command_config(),
        queue,
        Arc::new(StaticProbe("20261016094512")),
        state_store,
    )
    .with_clean_at_begin(clean)
}

async fn next_published(rx: &mut mpsc::UnboundedReceiver<MetaTask>) -> MetaTask {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("task published in time")
        .expect("queue still open")
}

#[tokio::test]
async fn test_startup_purges_then_dispatches_enabled_job() {
    let dir = TempDir::new().unwrap();
    let (queue, mut published) = RecordingQueue::new(false);
    let state_store = Arc::new(JobStateStore::new(dir.path().join(".md5")));
    let trigger = trigger_with(queue.clone(), state_store.clone(), true);

    let mut supervisor = IntervalSupervisor::new();
    assert_eq!(trigger.run(&mut supervisor, false).await.unwrap(), 1);
    supervisor.start().unwrap();

    let first = next_published(&mut published).await;
    let second = next_published(&mut published).await;
    supervisor.shutdown().await;
    assert_eq!(supervisor.state(), SupervisorState::ShutDown);

    let events = queue.events().await;
    assert_eq!(events[0], QueueEvent::Purge("win10".to_string()));
    assert!(!events.contains(&QueueEvent::Purge("win7".to_string())));
    assert_eq!(events.len(), 3);

    assert_eq!((first.sequence, second.sequence), (0, 1));
    assert_eq!(first.job_name, "win10-nightly");
    assert_eq!(first.command_config["suite"], serde_json::json!("facebook"));
    assert_eq!(first.command_config["browser"], serde_json::json!("firefox"));
    assert_ne!(first.task_id, second.task_id);
}

#[tokio::test]
async fn test_skip_first_query_waits_for_interval() {
    let dir = TempDir::new().unwrap();
    let (queue, mut published) = RecordingQueue::new(false);
    let trigger = trigger_with(queue.clone(), Arc::new(JobStateStore::new(dir.path())), false);

    let mut supervisor = IntervalSupervisor::new();
    trigger.run(&mut supervisor, true).await.unwrap();
    supervisor.start().unwrap();

    assert!(timeout(Duration::from_millis(300), published.recv())
        .await
        .is_err());
    supervisor.shutdown().await;
    assert!(queue.events().await.is_empty());
}

#[tokio::test]
async fn test_dispatch_state_feeds_status_report() {
    let dir = TempDir::new().unwrap();
    let (queue, _published) = RecordingQueue::new(false);
    let state_store = Arc::new(JobStateStore::new(dir.path()));
    let trigger = trigger_with(queue, state_store.clone(), false);

    assert_eq!(
        trigger.dispatch("win10-nightly").await.unwrap(),
        DispatchOutcome::Published(2)
    );
    assert_eq!(
        trigger.dispatch("win10-nightly").await.unwrap(),
        DispatchOutcome::Skipped
    );

    let bucket = Arc::new(MemoryBucket::default());
    let creator = StatusJsonCreator::new(command_config(), state_store, bucket.clone(), "status.json");
    creator.upload().await.unwrap();

    let objects = bucket.objects.lock().await;
    let report: StatusReport = serde_json::from_slice(&objects[0].1).unwrap();
    let win10 = &report.jobs["win10-nightly"];
    assert_eq!(win10.build_id.as_deref(), Some("20261016094512"));
    assert_eq!(win10.tasks_published, Some(2));
    assert!(report.jobs["win7-nightly"].last_triggered_at.is_none());
}

#[tokio::test]
async fn test_failed_publish_is_retried_next_cycle() {
    let dir = TempDir::new().unwrap();
    let state_store = Arc::new(JobStateStore::new(dir.path()));

    let (broken, _) = RecordingQueue::new(true);
    let trigger = trigger_with(broken, state_store.clone(), false);
    assert!(trigger.dispatch("win10-nightly").await.is_err());
    assert!(state_store.load("win10-nightly").await.unwrap().is_none());

    let (healthy, _) = RecordingQueue::new(false);
    let trigger = trigger_with(healthy, state_store.clone(), false);
    assert_eq!(
        trigger.dispatch("win10-nightly").await.unwrap(),
        DispatchOutcome::Published(2)
    );
}

#[tokio::test]
async fn test_one_supervisor_runs_dispatch_and_upload_jobs() {
    let dir = TempDir::new().unwrap();
    let (queue, _published) = RecordingQueue::new(false);
    let state_store = Arc::new(JobStateStore::new(dir.path()));
    let trigger = trigger_with(queue, state_store.clone(), false);
    let trigger_config = TriggerConfig {
        b2_account_id: Some("0021234".to_string()),
        b2_account_key: Some("K002secret".to_string()),
        b2_upload_bucket_name: Some("hasal-status".to_string()),
        ..TriggerConfig::default()
    };

    let mut supervisor = IntervalSupervisor::new();
    trigger.run(&mut supervisor, true).await.unwrap();
    supervisor.start().unwrap();

    let registered = register_status_upload(
        &mut supervisor,
        &trigger_config,
        command_config(),
        state_store,
        |_| Ok(Arc::new(MemoryBucket::default()) as Arc<dyn ObjectStore>),
    )
    .unwrap();

    assert!(registered);
    assert_eq!(supervisor.jobs().len(), 2);
    assert_eq!(
        supervisor.job(STATUS_UPLOAD_JOB_ID).unwrap().interval(),
        Duration::from_secs(30 * 60)
    );
    supervisor.shutdown().await;
}

#[cfg(test)]
mod live_broker_tests {
    use super::*;
    use common::bootstrap::init_task_publisher;

    #[tokio::test]
    #[ignore] // Run with: cargo test --test integration_tests -- --ignored
    async fn test_publish_and_purge_against_nats() {
        let trigger_config = TriggerConfig {
            pulse_url: std::env::var("NATS_URL")
                .unwrap_or_else(|_| "nats://localhost:4222".to_string()),
            pulse_stream: "PULSE_IT".to_string(),
            ..TriggerConfig::default()
        };
        let publisher = init_task_publisher(&trigger_config)
            .await
            .expect("NATS reachable");

        let config = command_config();
        let job = config.job("win10-nightly").unwrap();
        let command = config.command(&job.cmd).unwrap();
        let task = MetaTask::new("win10-nightly", job, command, None, 0);

        publisher.publish(&task).await.expect("publish acknowledged");
        let purged = publisher.purge("win10").await.expect("purge succeeds");
        assert!(purged >= 1);
    }
}
