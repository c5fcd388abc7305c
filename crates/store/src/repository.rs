use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use course_core::model::{
    ChapterId, ChapterProgress, CourseId, CourseProgress, LectureId, LectureProgress,
    ProgressUpdate,
};

/// Errors surfaced by progress store adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error("course progress not found")]
    NotFound,

    #[error("progress api returned status {0}")]
    HttpStatus(reqwest::StatusCode),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("invalid api base url: {0}")]
    BaseUrl(#[from] url::ParseError),

    #[error("connection error: {0}")]
    Connection(String),
}

/// Port to the remote progress store.
///
/// The store owns all persisted progress; the client only ever reports
/// deltas and re-reads the authoritative snapshot.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Create the progress record for a course if absent.
    ///
    /// Safe to call repeatedly.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the record cannot be created.
    async fn initialize_course(&self, course_id: &CourseId) -> Result<(), StoreError>;

    /// Persist one watch-time delta for a lecture.
    ///
    /// Additive by contract: the store sums `time_spent_secs` into the
    /// lecture record rather than overwriting it.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the course was never initialized,
    /// or other storage errors.
    async fn record_lecture_progress(&self, update: &ProgressUpdate) -> Result<(), StoreError>;

    /// Fetch the full course snapshot.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if missing, or other storage errors.
    async fn fetch_course_progress(&self, course_id: &CourseId)
    -> Result<CourseProgress, StoreError>;
}

type LectureMap = BTreeMap<LectureId, LectureProgress>;
type CourseMap = BTreeMap<ChapterId, LectureMap>;

/// In-memory store implementing the server-side contract, for testing and
/// prototyping: sums reported time, keeps completion sticky, and derives the
/// overall percentage as the mean across known lectures.
#[derive(Clone, Default)]
pub struct InMemoryProgressStore {
    courses: Arc<Mutex<BTreeMap<CourseId, CourseMap>>>,
}

impl InMemoryProgressStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            courses: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }
}

#[async_trait]
impl ProgressStore for InMemoryProgressStore {
    async fn initialize_course(&self, course_id: &CourseId) -> Result<(), StoreError> {
        let mut guard = self
            .courses
            .lock()
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        guard.entry(course_id.clone()).or_default();
        Ok(())
    }

    async fn record_lecture_progress(&self, update: &ProgressUpdate) -> Result<(), StoreError> {
        let mut guard = self
            .courses
            .lock()
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        let course = guard.get_mut(&update.course_id).ok_or(StoreError::NotFound)?;

        let lectures = course.entry(update.chapter_id.clone()).or_default();
        let record = lectures
            .entry(update.lecture_id.clone())
            .or_insert_with(|| LectureProgress {
                lecture_id: update.lecture_id.clone(),
                watch_percentage: 0.0,
                time_spent_secs: 0,
                last_position_secs: 0,
                is_completed: false,
            });

        record.time_spent_secs = record.time_spent_secs.saturating_add(update.time_spent_secs);
        record.watch_percentage = update.watch_percentage;
        record.last_position_secs = update.last_position_secs;
        record.is_completed = record.is_completed || update.is_completed;
        Ok(())
    }

    async fn fetch_course_progress(
        &self,
        course_id: &CourseId,
    ) -> Result<CourseProgress, StoreError> {
        let guard = self
            .courses
            .lock()
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        let course = guard.get(course_id).ok_or(StoreError::NotFound)?;

        let chapters: Vec<ChapterProgress> = course
            .iter()
            .map(|(chapter_id, lectures)| ChapterProgress {
                chapter_id: chapter_id.clone(),
                lectures: lectures.values().cloned().collect(),
            })
            .collect();

        let lecture_count = chapters.iter().map(|c| c.lectures.len()).sum::<usize>();
        let overall_percentage = if lecture_count == 0 {
            0.0
        } else {
            chapters
                .iter()
                .flat_map(|c| c.lectures.iter())
                .map(|l| l.watch_percentage)
                .sum::<f64>()
                / lecture_count as f64
        };

        Ok(CourseProgress {
            course_id: course_id.clone(),
            overall_percentage,
            chapters,
        })
    }
}
