//! Survey server boundary
//!
//! The controller only talks to the server through `SurveyApi`, so tests can
//! swap in an in-memory fake. `HttpSurveyApi` is the reqwest implementation.

mod http;
mod types;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::session::{Answer, QuestionId, Snapshot};

pub use http::{ApiError, HttpSurveyApi};
pub use types::{Question, SubmissionId, Survey, SurveyId};

#[async_trait]
pub trait SurveyApi: Send + Sync + 'static {
    /// Load a survey with its questions in display order.
    async fn fetch_survey(&self, survey_id: SurveyId) -> Result<Survey, ApiError>;

    /// Open a submission on the server.
    async fn start_session(&self, survey_id: SurveyId) -> Result<SubmissionId, ApiError>;

    /// Store the complete, ordered answer list.
    async fn save_answers(
        &self,
        submission_id: SubmissionId,
        answers: &[Answer],
    ) -> Result<(), ApiError>;

    /// Upload the session recording and one snapshot per answered question.
    async fn upload_media(
        &self,
        submission_id: SubmissionId,
        recording: &[u8],
        snapshots: &BTreeMap<QuestionId, Snapshot>,
    ) -> Result<(), ApiError>;

    /// Mark the submission finished.
    async fn complete_session(&self, submission_id: SubmissionId) -> Result<(), ApiError>;
}

/// Fetch a survey with its questions in display order.
/// A survey without questions is a load error.
pub async fn load_survey(api: &dyn SurveyApi, survey_id: SurveyId) -> Result<Survey, ApiError> {
    let mut survey = api.fetch_survey(survey_id).await?;
    if survey.questions.is_empty() {
        return Err(ApiError::InvalidSurvey(format!(
            "survey {} has no questions",
            survey_id
        )));
    }
    survey.sort_questions();
    Ok(survey)
}
