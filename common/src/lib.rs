// Common library for the pulse trigger: config, queue, scheduling and status upload

pub mod bootstrap;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod models;
pub mod probe;
pub mod queue;
pub mod scheduler;
pub mod state;
pub mod status;
pub mod storage;
pub mod telemetry;
