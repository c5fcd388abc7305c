mod runner;
mod tracker;

// Public API of the tracking subsystem.
pub use crate::error::TrackerError;
pub use runner::{TICK_INTERVAL, TrackingTask, spawn_tracking};
pub use tracker::ProgressTracker;
