//! reqwest client for the survey server
//!
//! Endpoints live under a single base URL (e.g. `http://127.0.0.1:8000/api`).
//! Media goes up as one multipart request: the recording as `video`, each
//! snapshot as a `snapshots` part named `q_{question_id}.jpg`.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use thiserror::Error;

use super::types::{ErrorDetail, StartSessionResponse, SubmissionId, Survey, SurveyId};
use super::SurveyApi;
use crate::session::{Answer, QuestionId, Snapshot};

const VIDEO_FILE_NAME: &str = "survey_video.webm";
const VIDEO_MIME: &str = "video/webm";
const SNAPSHOT_MIME: &str = "image/jpeg";

/// Errors from talking to the survey server
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Server error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("Failed to parse server response: {0}")]
    Parse(String),
    #[error("Invalid survey data: {0}")]
    InvalidSurvey(String),
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
}

pub struct HttpSurveyApi {
    client: Client,
    base_url: String,
}

impl HttpSurveyApi {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

/// Turn a non-2xx response into `ApiError::Api`, pulling FastAPI's `detail`.
async fn check_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = error_message(&body);
    log::error!("Survey server error ({}): {}", status.as_u16(), message);

    Err(ApiError::Api {
        status: status.as_u16(),
        message,
    })
}

fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorDetail>(body) {
        Ok(ErrorDetail {
            detail: serde_json::Value::String(s),
        }) => s,
        Ok(ErrorDetail { detail }) => detail.to_string(),
        Err(_) => body.to_string(),
    }
}

fn network(e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::Network(format!("timed out: {}", e))
    } else {
        ApiError::Network(e.to_string())
    }
}

fn snapshot_file_name(question_id: QuestionId) -> String {
    format!("q_{}.jpg", question_id)
}

#[async_trait]
impl SurveyApi for HttpSurveyApi {
    async fn fetch_survey(&self, survey_id: SurveyId) -> Result<Survey, ApiError> {
        let response = self
            .client
            .get(self.url(&format!("surveys/{}", survey_id)))
            .send()
            .await
            .map_err(network)?;

        let mut survey: Survey = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| ApiError::Parse(e.to_string()))?;
        survey.sort_questions();

        log::info!(
            "Loaded survey {} '{}' with {} questions",
            survey.id,
            survey.title,
            survey.questions.len()
        );
        Ok(survey)
    }

    async fn start_session(&self, survey_id: SurveyId) -> Result<SubmissionId, ApiError> {
        let response = self
            .client
            .post(self.url(&format!("surveys/{}/start", survey_id)))
            .send()
            .await
            .map_err(network)?;

        let started: StartSessionResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| ApiError::Parse(e.to_string()))?;

        log::info!("Server opened submission {}", started.submission_id);
        Ok(started.submission_id)
    }

    async fn save_answers(
        &self,
        submission_id: SubmissionId,
        answers: &[Answer],
    ) -> Result<(), ApiError> {
        let response = self
            .client
            .post(self.url(&format!("submissions/{}/answers", submission_id)))
            .json(answers)
            .send()
            .await
            .map_err(network)?;

        check_status(response).await?;
        log::info!("Saved {} answers for submission {}", answers.len(), submission_id);
        Ok(())
    }

    async fn upload_media(
        &self,
        submission_id: SubmissionId,
        recording: &[u8],
        snapshots: &BTreeMap<QuestionId, Snapshot>,
    ) -> Result<(), ApiError> {
        let video = Part::bytes(recording.to_vec())
            .file_name(VIDEO_FILE_NAME)
            .mime_str(VIDEO_MIME)
            .map_err(|e| ApiError::Parse(e.to_string()))?;

        let mut form = Form::new().part("video", video);
        for (question_id, snapshot) in snapshots {
            let part = Part::bytes(snapshot.image.clone())
                .file_name(snapshot_file_name(*question_id))
                .mime_str(SNAPSHOT_MIME)
                .map_err(|e| ApiError::Parse(e.to_string()))?;
            form = form.part("snapshots", part);
        }

        log::info!(
            "Uploading media for submission {}: {} bytes video, {} snapshots",
            submission_id,
            recording.len(),
            snapshots.len()
        );

        let response = self
            .client
            .post(self.url(&format!("submissions/{}/media", submission_id)))
            .multipart(form)
            .send()
            .await
            .map_err(network)?;

        check_status(response).await?;
        Ok(())
    }

    async fn complete_session(&self, submission_id: SubmissionId) -> Result<(), ApiError> {
        let response = self
            .client
            .post(self.url(&format!("submissions/{}/complete", submission_id)))
            .send()
            .await
            .map_err(network)?;

        check_status(response).await?;
        log::info!("Submission {} completed", submission_id);
        Ok(())
    }
}
