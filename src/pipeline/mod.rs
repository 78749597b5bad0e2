//! Pipeline entry points and background tasks.
//!
//! - `diff`: Compare two snapshots
//! - `poll`: Periodic incremental harvesting
//! - `publish`: Periodic catalog publication
//! - `source`: Bootstrap, then poll and publish

pub mod diff;
pub mod poll;
pub mod publish;
pub mod source;

pub use diff::{DiffResult, calculate_diff};
pub use poll::PollTask;
pub use publish::{PublishStats, PublishTask, Publisher};
pub use source::{run_snapshot, run_source};
