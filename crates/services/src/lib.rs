#![forbid(unsafe_code)]

pub mod app_services;
pub mod error;
pub mod tracking;

pub use course_core::Clock;

pub use app_services::AppServices;
pub use error::{AppServicesError, TrackerError};
pub use tracking::{ProgressTracker, TrackingTask, spawn_tracking};
