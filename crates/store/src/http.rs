use std::env;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use course_core::model::{
    ChapterId, ChapterProgress, CourseId, CourseProgress, LectureId, LectureProgress,
    ProgressUpdate,
};

use crate::repository::{ProgressStore, StoreError};

/// Connection settings for the progress API.
///
/// The bearer token comes from the surrounding application session; there is
/// no ambient lookup, callers pass the config explicitly.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub base_url: String,
    pub bearer_token: String,
}

impl ApiConfig {
    /// Read the config from `COURSE_API_BASE_URL` / `COURSE_API_TOKEN`.
    ///
    /// Returns None when no token is configured.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let bearer_token = env::var("COURSE_API_TOKEN").ok()?;
        if bearer_token.trim().is_empty() {
            return None;
        }
        let base_url = env::var("COURSE_API_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:4000/api".into());
        Some(Self {
            base_url,
            bearer_token,
        })
    }
}

/// Progress store backed by the course platform's REST API.
#[derive(Clone)]
pub struct HttpProgressStore {
    client: Client,
    base_url: String,
    bearer_token: String,
}

impl HttpProgressStore {
    /// Build a store from the given config.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::BaseUrl` if the base URL does not parse.
    pub fn new(config: ApiConfig) -> Result<Self, StoreError> {
        Url::parse(&config.base_url)?;
        Ok(Self {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            bearer_token: config.bearer_token,
        })
    }

    fn progress_url(&self, course_id: &CourseId) -> String {
        format!("{}/progress/{}", self.base_url, course_id)
    }

    fn lecture_url(&self, update: &ProgressUpdate) -> String {
        format!(
            "{}/progress/{}/chapters/{}/lectures/{}",
            self.base_url, update.course_id, update.chapter_id, update.lecture_id
        )
    }
}

fn check_status(response: Response) -> Result<Response, StoreError> {
    match response.status() {
        StatusCode::NOT_FOUND => Err(StoreError::NotFound),
        status if !status.is_success() => Err(StoreError::HttpStatus(status)),
        _ => Ok(response),
    }
}

#[async_trait]
impl ProgressStore for HttpProgressStore {
    async fn initialize_course(&self, course_id: &CourseId) -> Result<(), StoreError> {
        let url = format!("{}/initialize", self.progress_url(course_id));
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.bearer_token)
            .send()
            .await?;
        check_status(response)?;
        Ok(())
    }

    async fn record_lecture_progress(&self, update: &ProgressUpdate) -> Result<(), StoreError> {
        let response = self
            .client
            .put(self.lecture_url(update))
            .bearer_auth(&self.bearer_token)
            .json(&LectureUpdateRequest::from_update(update))
            .send()
            .await?;
        check_status(response)?;
        Ok(())
    }

    async fn fetch_course_progress(
        &self,
        course_id: &CourseId,
    ) -> Result<CourseProgress, StoreError> {
        let response = self
            .client
            .get(self.progress_url(course_id))
            .bearer_auth(&self.bearer_token)
            .send()
            .await?;
        let body: CourseProgressResponse = check_status(response)?.json().await?;
        Ok(body.into_domain(course_id))
    }
}

//
// ─── WIRE TYPES ────────────────────────────────────────────────────────────────
//

// The API speaks the platform's camelCase JSON. Response fields are optional
// wherever older records may lack them; absence is resolved here so domain
// types stay fully populated.

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LectureUpdateRequest {
    time_spent: u64,
    watch_percentage: f64,
    last_watched_position: u64,
    is_completed: bool,
}

impl LectureUpdateRequest {
    fn from_update(update: &ProgressUpdate) -> Self {
        Self {
            time_spent: update.time_spent_secs,
            watch_percentage: update.watch_percentage,
            last_watched_position: update.last_position_secs,
            is_completed: update.is_completed,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CourseProgressResponse {
    course_id: Option<CourseId>,
    #[serde(default)]
    overall_progress: f64,
    #[serde(default)]
    chapters: Vec<ChapterResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChapterResponse {
    chapter_id: ChapterId,
    #[serde(default)]
    lectures: Vec<LectureResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LectureResponse {
    lecture_id: LectureId,
    #[serde(default)]
    watch_percentage: f64,
    #[serde(default)]
    time_spent: u64,
    #[serde(default)]
    last_watched_position: u64,
    #[serde(default)]
    is_completed: bool,
}

impl CourseProgressResponse {
    fn into_domain(self, requested: &CourseId) -> CourseProgress {
        CourseProgress {
            course_id: self.course_id.unwrap_or_else(|| requested.clone()),
            overall_percentage: self.overall_progress,
            chapters: self
                .chapters
                .into_iter()
                .map(|chapter| ChapterProgress {
                    chapter_id: chapter.chapter_id,
                    lectures: chapter
                        .lectures
                        .into_iter()
                        .map(|lecture| LectureProgress {
                            lecture_id: lecture.lecture_id,
                            watch_percentage: lecture.watch_percentage,
                            time_spent_secs: lecture.time_spent,
                            last_position_secs: lecture.last_watched_position,
                            is_completed: lecture.is_completed,
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}
