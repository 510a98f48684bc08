// Bootstrap utilities for the trigger binary: broker, storage and probe wiring

use crate::config::{B2Config, TriggerConfig};
use crate::errors::StorageError;
use crate::probe::ArchiveBuildProbe;
use crate::queue::{NatsClient, NatsTaskPublisher, TaskPublisher};
use crate::state::JobStateStore;
use crate::storage::{B2Client, ObjectStore};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

/// Connect to the broker and make sure the task stream exists
///
/// # Errors
/// Returns error if the connection or stream creation fails
#[tracing::instrument(skip(config), fields(url = %config.pulse_url))]
pub async fn init_task_publisher(config: &TriggerConfig) -> Result<Arc<dyn TaskPublisher>> {
    info!("Initializing NATS client");

    let nats_client = NatsClient::new(config.nats_config())
        .await
        .context("Failed to initialize NATS client")?;

    nats_client
        .initialize_stream()
        .await
        .context("Failed to initialize NATS stream")?;

    info!(stream = %config.pulse_stream, "NATS client initialized");
    Ok(Arc::new(NatsTaskPublisher::new(nats_client).with_timeout(config.publish_timeout())))
}

pub fn init_build_probe() -> Result<Arc<ArchiveBuildProbe>> {
    let probe = ArchiveBuildProbe::new().context("Failed to initialize build probe")?;
    Ok(Arc::new(probe))
}

/// Timestamp store rooted at the configured directory
pub fn init_state_store(config: &TriggerConfig) -> Arc<JobStateStore> {
    info!(dir = %config.timestamp_dir.display(), "Using timestamp directory");
    Arc::new(JobStateStore::new(config.timestamp_dir.clone()))
}

/// Object store used by the status upload job
pub fn connect_b2(config: &B2Config) -> Result<Arc<dyn ObjectStore>, StorageError> {
    Ok(Arc::new(B2Client::new(config)?))
}
