//! Shared error types for the services crate.

use thiserror::Error;

use store::StoreError;

/// Errors emitted by `ProgressTracker`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TrackerError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error("progress api is not configured")]
    NotConfigured,
    #[error(transparent)]
    Store(#[from] StoreError),
}
