// Scheduler module: interval supervisor for dispatch and upload jobs

pub mod supervisor;

pub use supervisor::{
    IntervalSupervisor, ScheduledJob, ScheduledTask, SupervisorState, DEFAULT_MAX_INSTANCES,
};
