//! Runtime: inter-task channels, per-cycle logic and the task set.

pub mod channels;
pub mod cycles;
pub mod tasks;

pub use channels::{Alert, METRICS, NODE_STATUS, SampleBody, SensorSample};
pub use tasks::{NodeTasks, Shared, spawn};
