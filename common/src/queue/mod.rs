// Queue module for NATS JetStream task publishing

pub mod nats;
pub mod publisher;

pub use nats::{NatsClient, NatsConfig};
pub use publisher::{NatsTaskPublisher, TaskPublisher};
