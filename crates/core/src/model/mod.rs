mod ids;
mod progress;
mod session;

pub use ids::{ChapterId, CourseId, LectureId, ParseIdError};
pub use progress::{ChapterProgress, CourseProgress, LectureProgress, ProgressUpdate};
pub use session::{
    AUTO_COMPLETE_THRESHOLD, BACKSTOP_INTERVAL_SECS, FLUSH_THRESHOLD_SECS, MIN_REPORTED_SECS,
    PendingFlush, ProgressSession,
};
