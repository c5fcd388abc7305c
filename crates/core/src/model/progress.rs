use serde::{Deserialize, Serialize};

use crate::model::{ChapterId, CourseId, LectureId};

/// Per-lecture progress as persisted by the remote store.
///
/// Created server-side on the first update for a lecture, mutated by every
/// flush, never deleted by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LectureProgress {
    pub lecture_id: LectureId,
    /// Watch percentage in `[0, 100]`. Monotonic in intent, not enforced.
    pub watch_percentage: f64,
    /// Accumulated watch time in seconds, summed server-side across flushes.
    pub time_spent_secs: u64,
    /// Last playback position in seconds.
    pub last_position_secs: u64,
    pub is_completed: bool,
}

/// Progress for one chapter of a course.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterProgress {
    pub chapter_id: ChapterId,
    pub lectures: Vec<LectureProgress>,
}

/// Full course progress snapshot, owned by the remote store.
///
/// The client holds a read-mostly cached copy and replaces it wholesale with
/// the server's response after every successful flush.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseProgress {
    pub course_id: CourseId,
    /// Aggregate percentage derived server-side from all lectures.
    pub overall_percentage: f64,
    pub chapters: Vec<ChapterProgress>,
}

impl CourseProgress {
    /// Looks up the progress record for a lecture within a chapter.
    #[must_use]
    pub fn lecture(&self, chapter_id: &ChapterId, lecture_id: &LectureId) -> Option<&LectureProgress> {
        self.chapters
            .iter()
            .find(|c| &c.chapter_id == chapter_id)?
            .lectures
            .iter()
            .find(|l| &l.lecture_id == lecture_id)
    }

    /// Number of lectures with a progress record in this snapshot.
    #[must_use]
    pub fn total_lectures(&self) -> usize {
        self.chapters.iter().map(|c| c.lectures.len()).sum()
    }

    /// Number of lectures marked completed.
    #[must_use]
    pub fn completed_lectures(&self) -> usize {
        self.chapters
            .iter()
            .flat_map(|c| c.lectures.iter())
            .filter(|l| l.is_completed)
            .count()
    }
}

/// One flush payload reported to the remote store.
///
/// `time_spent_secs` is a delta since the previous successful flush, not a
/// cumulative total; the server sums it into the lecture record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub course_id: CourseId,
    pub chapter_id: ChapterId,
    pub lecture_id: LectureId,
    pub time_spent_secs: u64,
    pub watch_percentage: f64,
    pub last_position_secs: u64,
    pub is_completed: bool,
    /// Marks the closing flush of a session. Informational only; the wire
    /// payload does not change shape.
    pub is_final: bool,
}
