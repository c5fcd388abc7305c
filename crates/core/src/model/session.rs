use chrono::{DateTime, Utc};

use crate::model::{ChapterId, CourseId, LectureId, ProgressUpdate};

/// Outstanding watch time at or above this value triggers a flush.
pub const FLUSH_THRESHOLD_SECS: u64 = 30;

/// Cadence of the safety-net flush that drains any outstanding delta even
/// when the threshold logic was starved.
pub const BACKSTOP_INTERVAL_SECS: u64 = 120;

/// Watch percentage at or above which a flushed record is marked completed.
pub const AUTO_COMPLETE_THRESHOLD: f64 = 90.0;

/// Floor for reported seconds, so the server always observes forward
/// progress even for very short deltas.
pub const MIN_REPORTED_SECS: u64 = 1;

//
// ─── PENDING FLUSH ─────────────────────────────────────────────────────────────
//

/// A flush that has been prepared but not yet acknowledged by the store.
///
/// The session's watermark only advances when the pending flush is committed
/// after the store call succeeds. Dropping an uncommitted flush leaves the
/// delta outstanding, so the next flush reports it again.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingFlush {
    pub update: ProgressUpdate,
    reported_upto_secs: u64,
}

impl PendingFlush {
    /// Session time covered by this flush, i.e. the watermark after commit.
    #[must_use]
    pub fn reported_upto_secs(&self) -> u64 {
        self.reported_upto_secs
    }
}

//
// ─── SESSION STATE MACHINE ─────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Idle,
    Tracking { started_at: DateTime<Utc> },
}

/// Wall-clock tracking session for one `(course, chapter, lecture)` triple.
///
/// Total session time is derived as `now - started_at` on every observation
/// rather than accumulated tick by tick, so delayed or coalesced timer
/// callbacks self-correct to wall-clock truth instead of drifting.
///
/// Invariant: `flushed_secs <= total_secs`. The difference is exactly the
/// unflushed time owed to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSession {
    course_id: CourseId,
    chapter_id: ChapterId,
    lecture_id: LectureId,
    state: SessionState,
    total_secs: u64,
    flushed_secs: u64,
    watch_percentage: f64,
    last_position_secs: u64,
}

impl ProgressSession {
    #[must_use]
    pub fn new(course_id: CourseId, chapter_id: ChapterId, lecture_id: LectureId) -> Self {
        Self {
            course_id,
            chapter_id,
            lecture_id,
            state: SessionState::Idle,
            total_secs: 0,
            flushed_secs: 0,
            watch_percentage: 0.0,
            last_position_secs: 0,
        }
    }

    #[must_use]
    pub fn course_id(&self) -> &CourseId {
        &self.course_id
    }

    #[must_use]
    pub fn chapter_id(&self) -> &ChapterId {
        &self.chapter_id
    }

    #[must_use]
    pub fn lecture_id(&self) -> &LectureId {
        &self.lecture_id
    }

    #[must_use]
    pub fn is_tracking(&self) -> bool {
        matches!(self.state, SessionState::Tracking { .. })
    }

    /// Seconds tracked since the session started, as of the last observation.
    #[must_use]
    pub fn total_secs(&self) -> u64 {
        self.total_secs
    }

    /// Watermark: seconds already acknowledged by the store.
    #[must_use]
    pub fn flushed_secs(&self) -> u64 {
        self.flushed_secs
    }

    /// Seconds owed to the store.
    #[must_use]
    pub fn outstanding_secs(&self) -> u64 {
        self.total_secs.saturating_sub(self.flushed_secs)
    }

    #[must_use]
    pub fn watch_percentage(&self) -> f64 {
        self.watch_percentage
    }

    #[must_use]
    pub fn last_position_secs(&self) -> u64 {
        self.last_position_secs
    }

    /// Begin tracking. Returns false (and changes nothing) when already
    /// tracking.
    pub fn start(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_tracking() {
            return false;
        }
        self.state = SessionState::Tracking { started_at: now };
        self.total_secs = 0;
        self.flushed_secs = 0;
        true
    }

    /// Recompute the derived total from wall clock and return the
    /// outstanding delta. Idle sessions keep their last totals.
    pub fn observe(&mut self, now: DateTime<Utc>) -> u64 {
        if let SessionState::Tracking { started_at } = self.state {
            let elapsed = (now - started_at).num_seconds().max(0);
            self.total_secs = elapsed as u64;
        }
        self.outstanding_secs()
    }

    /// Store the media position reported by the player, clamped to valid
    /// ranges. Used by the next flush; does not itself trigger one.
    pub fn update_media_progress(&mut self, percentage: f64, position_secs: i64) {
        self.watch_percentage = if percentage.is_nan() {
            0.0
        } else {
            percentage.clamp(0.0, 100.0)
        };
        self.last_position_secs = position_secs.max(0) as u64;
    }

    /// Flush prepared when the outstanding delta reaches the threshold.
    pub fn threshold_flush(&mut self, now: DateTime<Utc>) -> Option<PendingFlush> {
        let outstanding = self.observe(now);
        if outstanding < FLUSH_THRESHOLD_SECS {
            return None;
        }
        Some(self.build_flush(outstanding, None, false))
    }

    /// Flush of whatever is outstanding, if anything. Backstop and stop
    /// paths use this so they never report a zero delta.
    pub fn outstanding_flush(&mut self, now: DateTime<Utc>, is_final: bool) -> Option<PendingFlush> {
        let outstanding = self.observe(now);
        if outstanding == 0 {
            return None;
        }
        Some(self.build_flush(outstanding, None, is_final))
    }

    /// Unconditional flush for explicit saves; the reported delta is floored
    /// to [`MIN_REPORTED_SECS`].
    pub fn forced_flush(&mut self, now: DateTime<Utc>) -> PendingFlush {
        let outstanding = self.observe(now);
        self.build_flush(outstanding, None, false)
    }

    /// Completion override: flush reporting 100% watched and completed,
    /// regardless of the measured percentage.
    pub fn completion_flush(&mut self, now: DateTime<Utc>) -> PendingFlush {
        let outstanding = self.observe(now);
        self.build_flush(outstanding, Some(100.0), false)
    }

    /// Stop tracking, preparing a final flush for any remaining delta.
    /// Returns None (and changes nothing) when already idle.
    pub fn stop(&mut self, now: DateTime<Utc>) -> Option<PendingFlush> {
        if !self.is_tracking() {
            return None;
        }
        let pending = self.outstanding_flush(now, true);
        self.state = SessionState::Idle;
        pending
    }

    /// Advance the watermark after the store acknowledged a flush.
    pub fn commit(&mut self, pending: &PendingFlush) {
        // A restart between prepare and commit resets the totals; never let
        // the watermark overtake them.
        self.flushed_secs = pending.reported_upto_secs.min(self.total_secs);
    }

    /// Zero out all session state. Callers wanting the final flush of a live
    /// session issue [`Self::stop`] first.
    pub fn reset(&mut self) {
        self.state = SessionState::Idle;
        self.total_secs = 0;
        self.flushed_secs = 0;
        self.watch_percentage = 0.0;
        self.last_position_secs = 0;
    }

    fn build_flush(
        &self,
        outstanding: u64,
        percentage_override: Option<f64>,
        is_final: bool,
    ) -> PendingFlush {
        let watch_percentage = percentage_override.unwrap_or(self.watch_percentage);
        let update = ProgressUpdate {
            course_id: self.course_id.clone(),
            chapter_id: self.chapter_id.clone(),
            lecture_id: self.lecture_id.clone(),
            time_spent_secs: outstanding.max(MIN_REPORTED_SECS),
            watch_percentage,
            last_position_secs: self.last_position_secs,
            is_completed: percentage_override.is_some()
                || watch_percentage >= AUTO_COMPLETE_THRESHOLD,
            is_final,
        };
        PendingFlush {
            update,
            reported_upto_secs: self.total_secs,
        }
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
