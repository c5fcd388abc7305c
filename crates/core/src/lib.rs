#![forbid(unsafe_code)]

pub mod model;
pub mod time;

pub use time::Clock;

pub use model::{
    AUTO_COMPLETE_THRESHOLD, BACKSTOP_INTERVAL_SECS, FLUSH_THRESHOLD_SECS, MIN_REPORTED_SECS,
    ChapterId, ChapterProgress, CourseId, CourseProgress, LectureId, LectureProgress,
    PendingFlush, ProgressSession, ProgressUpdate,
};
