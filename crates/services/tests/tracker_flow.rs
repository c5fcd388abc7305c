use std::sync::Arc;

use chrono::Duration;
use course_core::model::{ChapterId, CourseId, LectureId};
use course_core::time::fixed_clock;
use services::AppServices;
use store::{InMemoryProgressStore, ProgressStore};

#[tokio::test]
async fn lecture_switch_flushes_before_the_next_session() {
    let store = Arc::new(InMemoryProgressStore::new());
    let clock = fixed_clock();
    let services = AppServices::new(clock.clone(), store.clone());

    let course = CourseId::new("course-1");
    let chapter = ChapterId::new("chapter-1");

    let (_first, task) = services
        .start_lecture(course.clone(), chapter.clone(), LectureId::new("lec-1"))
        .await;
    clock.advance(Duration::seconds(45));

    // switching stops the first session and flushes its remainder
    let (second, task) = services
        .change_lecture(task, course.clone(), chapter.clone(), LectureId::new("lec-2"))
        .await;
    clock.advance(Duration::seconds(10));
    second.save_progress().await.unwrap();
    task.stop().await;

    let snapshot = store.fetch_course_progress(&course).await.unwrap();
    let first_lecture = snapshot
        .lecture(&chapter, &LectureId::new("lec-1"))
        .unwrap();
    let second_lecture = snapshot
        .lecture(&chapter, &LectureId::new("lec-2"))
        .unwrap();

    // no cross-lecture bleed: each lecture got exactly its own wall time
    assert_eq!(first_lecture.time_spent_secs, 45);
    assert_eq!(second_lecture.time_spent_secs, 10);
}

#[tokio::test]
async fn completed_lecture_shows_up_in_the_course_snapshot() {
    let store = Arc::new(InMemoryProgressStore::new());
    let clock = fixed_clock();
    let services = AppServices::new(clock.clone(), store.clone());

    let course = CourseId::new("course-1");
    let (tracker, task) = services
        .start_lecture(
            course.clone(),
            ChapterId::new("chapter-1"),
            LectureId::new("lec-1"),
        )
        .await;

    tracker.update_video_progress(95.0, 610).await;
    clock.advance(Duration::seconds(31));
    assert!(tracker.tick().await.unwrap());

    task.stop().await;

    let snapshot = store.fetch_course_progress(&course).await.unwrap();
    assert_eq!(snapshot.completed_lectures(), 1);
    assert!(!tracker.is_tracking().await);
}
