use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use course_core::model::{
    ChapterId, CourseId, CourseProgress, LectureId, LectureProgress, PendingFlush, ProgressSession,
};
use course_core::Clock;
use store::{ProgressStore, StoreError};

use crate::error::TrackerError;

/// Tracks watch time for one lecture and keeps the remote store in sync.
///
/// Owns the wall-clock session, a read-mostly cache of the course snapshot,
/// and the error surface the embedding UI displays. Every flush goes through
/// a single in-flight guard, so overlapping flush attempts for the same
/// session cannot race the watermark: the payload is built only after the
/// guard is acquired and therefore reflects the previously committed state.
pub struct ProgressTracker {
    clock: Clock,
    store: Arc<dyn ProgressStore>,
    session: Mutex<ProgressSession>,
    snapshot: Mutex<Option<CourseProgress>>,
    last_error: Mutex<Option<String>>,
    flush_gate: Mutex<()>,
}

impl ProgressTracker {
    #[must_use]
    pub fn new(
        clock: Clock,
        store: Arc<dyn ProgressStore>,
        course_id: CourseId,
        chapter_id: ChapterId,
        lecture_id: LectureId,
    ) -> Self {
        Self {
            clock,
            store,
            session: Mutex::new(ProgressSession::new(course_id, chapter_id, lecture_id)),
            snapshot: Mutex::new(None),
            last_error: Mutex::new(None),
            flush_gate: Mutex::new(()),
        }
    }

    /// Initialize server-side tracking for the course and seed the local
    /// snapshot. Idempotent; safe to call again after a failure.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::Store` if the store rejects either call. The
    /// error is also recorded on the tracker; tracking may still be started
    /// manually afterwards.
    pub async fn initialize(&self) -> Result<(), TrackerError> {
        let course_id = self.session.lock().await.course_id().clone();
        let seeded = async {
            self.store.initialize_course(&course_id).await?;
            self.store.fetch_course_progress(&course_id).await
        }
        .await;

        match seeded {
            Ok(snapshot) => {
                *self.snapshot.lock().await = Some(snapshot);
                self.record_error(None).await;
                Ok(())
            }
            Err(err) => {
                warn!(course = %course_id, error = %err, "progress initialization failed");
                self.record_error(Some(&err)).await;
                Err(err.into())
            }
        }
    }

    /// Begin tracking. Returns false when the session was already tracking
    /// (in which case nothing changes).
    pub async fn start_tracking(&self) -> bool {
        self.session.lock().await.start(self.clock.now())
    }

    /// Stop tracking and flush any remaining delta as a final save.
    /// No-op when already idle.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::Store` if the final flush fails. The session
    /// still leaves the tracking state; the unflushed delta stays owed.
    pub async fn stop_tracking(&self) -> Result<(), TrackerError> {
        let _gate = self.flush_gate.lock().await;
        self.flush_locked(|session, now| session.stop(now)).await?;
        Ok(())
    }

    /// Force an immediate flush of the outstanding delta without changing
    /// state. Callable while idle; the reported delta is floored to one
    /// second.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::Store` if the flush fails.
    pub async fn save_progress(&self) -> Result<(), TrackerError> {
        let _gate = self.flush_gate.lock().await;
        self.flush_locked(|session, now| Some(session.forced_flush(now)))
            .await?;
        Ok(())
    }

    /// Flush reporting the lecture fully watched and completed, regardless
    /// of the measured watch percentage.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::Store` if the flush fails.
    pub async fn mark_as_completed(&self) -> Result<(), TrackerError> {
        let _gate = self.flush_gate.lock().await;
        self.flush_locked(|session, now| Some(session.completion_flush(now)))
            .await?;
        Ok(())
    }

    /// Store the player position for the next flush. Clamps percentage to
    /// `[0, 100]` and negative positions to zero; does not flush.
    pub async fn update_video_progress(&self, percentage: f64, position_secs: i64) {
        self.session
            .lock()
            .await
            .update_media_progress(percentage, position_secs);
    }

    /// Stop tracking (flushing the remainder) and zero all session state.
    ///
    /// The session is reset even when the final flush fails; the error is
    /// still reported.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::Store` if the final flush fails.
    pub async fn reset_session(&self) -> Result<(), TrackerError> {
        let result = self.stop_tracking().await;
        self.session.lock().await.reset();
        result
    }

    /// One scheduler tick: recompute elapsed time and flush when the
    /// outstanding delta has reached the threshold.
    ///
    /// Skips (returning false) while another flush is in flight; the next
    /// tick retries against the committed watermark.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::Store` if a due flush fails.
    pub async fn tick(&self) -> Result<bool, TrackerError> {
        let Ok(_gate) = self.flush_gate.try_lock() else {
            return Ok(false);
        };
        self.flush_locked(|session, now| session.threshold_flush(now))
            .await
    }

    /// Backstop flush: drain whatever is outstanding even below the
    /// threshold. No-op when nothing is owed.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::Store` if the flush fails.
    pub async fn flush_outstanding(&self) -> Result<bool, TrackerError> {
        let _gate = self.flush_gate.lock().await;
        self.flush_locked(|session, now| session.outstanding_flush(now, false))
            .await
    }

    /// Best-effort teardown: stop tracking and swallow any flush failure.
    /// Used when there is no caller left to report to.
    pub async fn shutdown(&self) {
        // failures are already recorded on the error surface
        let _ = self.stop_tracking().await;
    }

    pub async fn is_tracking(&self) -> bool {
        self.session.lock().await.is_tracking()
    }

    /// Seconds tracked this session, as of the last observation.
    pub async fn total_secs(&self) -> u64 {
        self.session.lock().await.total_secs()
    }

    /// Seconds not yet acknowledged by the store.
    pub async fn outstanding_secs(&self) -> u64 {
        self.session.lock().await.outstanding_secs()
    }

    /// Cached course snapshot from the last successful round trip.
    pub async fn course_progress(&self) -> Option<CourseProgress> {
        self.snapshot.lock().await.clone()
    }

    /// Cached progress record for this tracker's lecture.
    pub async fn lecture_progress(&self) -> Option<LectureProgress> {
        let session = self.session.lock().await;
        let snapshot = self.snapshot.lock().await;
        snapshot
            .as_ref()?
            .lecture(session.chapter_id(), session.lecture_id())
            .cloned()
    }

    /// Message from the most recent failed store call, cleared by the next
    /// success.
    pub async fn last_error(&self) -> Option<String> {
        self.last_error.lock().await.clone()
    }

    // Flush body. Caller holds `flush_gate`; the session lock is only taken
    // to build the payload and to commit, never across the network calls.
    async fn flush_locked<F>(&self, build: F) -> Result<bool, TrackerError>
    where
        F: FnOnce(&mut ProgressSession, DateTime<Utc>) -> Option<PendingFlush>,
    {
        let now = self.clock.now();
        let pending = {
            let mut session = self.session.lock().await;
            build(&mut session, now)
        };
        let Some(pending) = pending else {
            return Ok(false);
        };

        match self.push_and_refetch(&pending).await {
            Ok(snapshot) => {
                self.session.lock().await.commit(&pending);
                *self.snapshot.lock().await = Some(snapshot);
                self.record_error(None).await;
                debug!(
                    lecture = %pending.update.lecture_id,
                    secs = pending.update.time_spent_secs,
                    "progress flushed"
                );
                Ok(true)
            }
            Err(err) => {
                warn!(error = %err, "progress flush failed, delta kept for retry");
                self.record_error(Some(&err)).await;
                Err(err.into())
            }
        }
    }

    // Write-then-refetch: the server response, not the optimistic local
    // state, becomes the cache after every flush.
    async fn push_and_refetch(&self, pending: &PendingFlush) -> Result<CourseProgress, StoreError> {
        self.store.record_lecture_progress(&pending.update).await?;
        self.store
            .fetch_course_progress(&pending.update.course_id)
            .await
    }

    async fn record_error(&self, err: Option<&StoreError>) {
        *self.last_error.lock().await = err.map(ToString::to_string);
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration;
    use course_core::model::ProgressUpdate;
    use course_core::time::fixed_clock;
    use std::sync::atomic::{AtomicBool, Ordering};
    use store::InMemoryProgressStore;

    /// Store double whose writes can be made to fail on demand.
    struct FlakyStore {
        inner: InMemoryProgressStore,
        fail_writes: AtomicBool,
    }

    impl FlakyStore {
        fn new() -> Self {
            Self {
                inner: InMemoryProgressStore::new(),
                fail_writes: AtomicBool::new(false),
            }
        }

        fn set_failing(&self, failing: bool) {
            self.fail_writes.store(failing, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl ProgressStore for FlakyStore {
        async fn initialize_course(&self, course_id: &CourseId) -> Result<(), StoreError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StoreError::Connection("store offline".into()));
            }
            self.inner.initialize_course(course_id).await
        }

        async fn record_lecture_progress(
            &self,
            update: &ProgressUpdate,
        ) -> Result<(), StoreError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StoreError::Connection("store offline".into()));
            }
            self.inner.record_lecture_progress(update).await
        }

        async fn fetch_course_progress(
            &self,
            course_id: &CourseId,
        ) -> Result<CourseProgress, StoreError> {
            self.inner.fetch_course_progress(course_id).await
        }
    }

    fn tracker_with(store: Arc<dyn ProgressStore>) -> (ProgressTracker, Clock) {
        let clock = fixed_clock();
        let tracker = ProgressTracker::new(
            clock.clone(),
            store,
            CourseId::new("c1"),
            ChapterId::new("ch1"),
            LectureId::new("l1"),
        );
        (tracker, clock)
    }

    async fn recorded_secs(tracker: &ProgressTracker) -> u64 {
        tracker
            .lecture_progress()
            .await
            .map(|l| l.time_spent_secs)
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn ticking_for_35_seconds_flushes_exactly_thirty() {
        let store = Arc::new(InMemoryProgressStore::new());
        let (tracker, clock) = tracker_with(store);
        tracker.initialize().await.unwrap();
        tracker.start_tracking().await;

        let mut flushes = 0;
        for _ in 0..35 {
            clock.advance(Duration::seconds(1));
            if tracker.tick().await.unwrap() {
                flushes += 1;
            }
        }

        assert_eq!(flushes, 1);
        assert_eq!(recorded_secs(&tracker).await, 30);
        assert_eq!(tracker.outstanding_secs().await, 5);
    }

    #[tokio::test]
    async fn failed_flush_retries_the_full_delta() {
        let store = Arc::new(FlakyStore::new());
        let (tracker, clock) = tracker_with(Arc::clone(&store) as Arc<dyn ProgressStore>);
        tracker.initialize().await.unwrap();
        tracker.start_tracking().await;

        store.set_failing(true);
        clock.advance(Duration::seconds(30));
        assert!(tracker.tick().await.is_err());
        assert!(tracker.last_error().await.is_some());
        assert_eq!(recorded_secs(&tracker).await, 0);

        // watermark untouched: the retry reports everything since start
        store.set_failing(false);
        clock.advance(Duration::seconds(15));
        assert!(tracker.tick().await.unwrap());
        assert_eq!(recorded_secs(&tracker).await, 45);
        assert!(tracker.last_error().await.is_none());
    }

    #[tokio::test]
    async fn stop_reports_the_unflushed_remainder() {
        let store = Arc::new(InMemoryProgressStore::new());
        let (tracker, clock) = tracker_with(store);
        tracker.initialize().await.unwrap();
        tracker.start_tracking().await;

        clock.advance(Duration::seconds(30));
        assert!(tracker.tick().await.unwrap());
        assert_eq!(recorded_secs(&tracker).await, 30);

        clock.advance(Duration::seconds(35));
        tracker.stop_tracking().await.unwrap();

        assert!(!tracker.is_tracking().await);
        assert_eq!(recorded_secs(&tracker).await, 65);
    }

    #[tokio::test]
    async fn completion_override_ignores_measured_percentage() {
        let store = Arc::new(InMemoryProgressStore::new());
        let (tracker, clock) = tracker_with(store);
        tracker.initialize().await.unwrap();
        tracker.start_tracking().await;
        tracker.update_video_progress(40.0, 300).await;

        clock.advance(Duration::seconds(10));
        tracker.mark_as_completed().await.unwrap();

        let lecture = tracker.lecture_progress().await.unwrap();
        assert!(lecture.is_completed);
        assert_eq!(lecture.watch_percentage, 100.0);
        assert_eq!(lecture.time_spent_secs, 10);
        assert_eq!(tracker.outstanding_secs().await, 0);
    }

    #[tokio::test]
    async fn auto_completion_threshold_is_ninety() {
        let store = Arc::new(InMemoryProgressStore::new());
        let (tracker, clock) = tracker_with(store);
        tracker.initialize().await.unwrap();
        tracker.start_tracking().await;

        tracker.update_video_progress(89.0, 0).await;
        clock.advance(Duration::seconds(31));
        assert!(tracker.tick().await.unwrap());
        assert!(!tracker.lecture_progress().await.unwrap().is_completed);

        tracker.update_video_progress(90.0, 0).await;
        clock.advance(Duration::seconds(31));
        assert!(tracker.tick().await.unwrap());
        assert!(tracker.lecture_progress().await.unwrap().is_completed);
    }

    #[tokio::test]
    async fn forced_save_reports_at_least_one_second() {
        let store = Arc::new(InMemoryProgressStore::new());
        let (tracker, _clock) = tracker_with(store);
        tracker.initialize().await.unwrap();
        tracker.start_tracking().await;

        tracker.save_progress().await.unwrap();
        assert_eq!(recorded_secs(&tracker).await, 1);
    }

    #[tokio::test]
    async fn idle_stop_and_double_start_are_no_ops() {
        let store = Arc::new(InMemoryProgressStore::new());
        let (tracker, clock) = tracker_with(store);
        tracker.initialize().await.unwrap();

        // stop before ever starting: nothing reported
        tracker.stop_tracking().await.unwrap();
        assert_eq!(recorded_secs(&tracker).await, 0);

        assert!(tracker.start_tracking().await);
        clock.advance(Duration::seconds(10));
        tracker.tick().await.unwrap();

        // second start keeps the original session
        assert!(!tracker.start_tracking().await);
        assert_eq!(tracker.total_secs().await, 10);
    }

    #[tokio::test]
    async fn initialization_failure_still_allows_tracking() {
        let store = Arc::new(FlakyStore::new());
        let (tracker, _clock) = tracker_with(Arc::clone(&store) as Arc<dyn ProgressStore>);

        store.set_failing(true);
        assert!(tracker.initialize().await.is_err());
        assert!(tracker.last_error().await.is_some());

        assert!(tracker.start_tracking().await);
        assert!(tracker.is_tracking().await);
    }

    #[tokio::test]
    async fn flush_replaces_snapshot_with_server_response() {
        let store = Arc::new(InMemoryProgressStore::new());
        let (tracker, clock) = tracker_with(Arc::clone(&store) as Arc<dyn ProgressStore>);
        tracker.initialize().await.unwrap();
        assert_eq!(tracker.course_progress().await.unwrap().total_lectures(), 0);

        // another client already reported time for a different lecture
        store
            .record_lecture_progress(&ProgressUpdate {
                course_id: CourseId::new("c1"),
                chapter_id: ChapterId::new("ch2"),
                lecture_id: LectureId::new("l9"),
                time_spent_secs: 120,
                watch_percentage: 80.0,
                last_position_secs: 0,
                is_completed: false,
                is_final: false,
            })
            .await
            .unwrap();

        tracker.start_tracking().await;
        clock.advance(Duration::seconds(30));
        tracker.tick().await.unwrap();

        let snapshot = tracker.course_progress().await.unwrap();
        assert_eq!(snapshot.total_lectures(), 2);
    }

    #[tokio::test]
    async fn reset_zeroes_the_session_after_flushing() {
        let store = Arc::new(InMemoryProgressStore::new());
        let (tracker, clock) = tracker_with(store);
        tracker.initialize().await.unwrap();
        tracker.start_tracking().await;
        tracker.update_video_progress(50.0, 40).await;

        clock.advance(Duration::seconds(12));
        tracker.reset_session().await.unwrap();

        assert!(!tracker.is_tracking().await);
        assert_eq!(tracker.total_secs().await, 0);
        assert_eq!(tracker.outstanding_secs().await, 0);
        // the pre-reset delta still reached the store
        assert_eq!(recorded_secs(&tracker).await, 12);
    }
}
