#![forbid(unsafe_code)]

pub mod http;
pub mod repository;

pub use http::{ApiConfig, HttpProgressStore};
pub use repository::{InMemoryProgressStore, ProgressStore, StoreError};
