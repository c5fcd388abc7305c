use std::sync::Arc;

use tracing::warn;

use course_core::Clock;
use course_core::model::{ChapterId, CourseId, LectureId};
use store::{ApiConfig, HttpProgressStore, ProgressStore};

use crate::error::AppServicesError;
use crate::tracking::{ProgressTracker, TrackingTask, spawn_tracking};

/// Assembles the progress store and hands out per-lecture trackers.
#[derive(Clone)]
pub struct AppServices {
    clock: Clock,
    store: Arc<dyn ProgressStore>,
}

impl AppServices {
    #[must_use]
    pub fn new(clock: Clock, store: Arc<dyn ProgressStore>) -> Self {
        Self { clock, store }
    }

    /// Build services against the REST progress API.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError::Store` if the config is invalid.
    pub fn with_http(clock: Clock, config: ApiConfig) -> Result<Self, AppServicesError> {
        let store = HttpProgressStore::new(config)?;
        Ok(Self::new(clock, Arc::new(store)))
    }

    /// Build services from `COURSE_API_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError::NotConfigured` when no API token is set,
    /// or `AppServicesError::Store` if the config is invalid.
    pub fn from_env(clock: Clock) -> Result<Self, AppServicesError> {
        let config = ApiConfig::from_env().ok_or(AppServicesError::NotConfigured)?;
        Self::with_http(clock, config)
    }

    #[must_use]
    pub fn store(&self) -> Arc<dyn ProgressStore> {
        Arc::clone(&self.store)
    }

    #[must_use]
    pub fn clock(&self) -> Clock {
        self.clock.clone()
    }

    /// Create and initialize a tracker for a lecture.
    ///
    /// Initialization failure is recorded on the tracker and logged, not
    /// returned: tracking stays manually startable, and flushes retry once
    /// the store becomes reachable.
    pub async fn open_lecture(
        &self,
        course_id: CourseId,
        chapter_id: ChapterId,
        lecture_id: LectureId,
    ) -> Arc<ProgressTracker> {
        let tracker = Arc::new(ProgressTracker::new(
            self.clock.clone(),
            Arc::clone(&self.store),
            course_id,
            chapter_id,
            lecture_id,
        ));
        if let Err(err) = tracker.initialize().await {
            warn!(error = %err, "lecture opened without server-side progress record");
        }
        tracker
    }

    /// Open a lecture, begin tracking, and spawn its timer task.
    pub async fn start_lecture(
        &self,
        course_id: CourseId,
        chapter_id: ChapterId,
        lecture_id: LectureId,
    ) -> (Arc<ProgressTracker>, TrackingTask) {
        let tracker = self.open_lecture(course_id, chapter_id, lecture_id).await;
        tracker.start_tracking().await;
        let task = spawn_tracking(Arc::clone(&tracker));
        (tracker, task)
    }

    /// Switch lectures: stop the current session (forcing its final flush)
    /// before the next one starts, so no time bleeds across lectures.
    pub async fn change_lecture(
        &self,
        current: TrackingTask,
        course_id: CourseId,
        chapter_id: ChapterId,
        lecture_id: LectureId,
    ) -> (Arc<ProgressTracker>, TrackingTask) {
        current.stop().await;
        self.start_lecture(course_id, chapter_id, lecture_id).await
    }
}
