//! Evidence submission transaction
//!
//! Three calls, strictly in order, each awaited before the next:
//! save answers, upload media, complete. The first failure ends the
//! transaction; nothing is retried and earlier steps are not rolled back.

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::api::{ApiError, SurveyApi};
use crate::recording::{RecordingError, RecordingManager};
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitStep {
    SaveAnswers,
    UploadMedia,
    CompleteSession,
}

impl std::fmt::Display for SubmitStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SubmitStep::SaveAnswers => "save_answers",
            SubmitStep::UploadMedia => "upload_media",
            SubmitStep::CompleteSession => "complete_session",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum SubmitFailure {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("Recording unavailable: {0}")]
    Recording(#[from] RecordingError),
}

#[derive(Debug, Error)]
#[error("Submission failed at {step}: {cause}")]
pub struct SubmitError {
    pub step: SubmitStep,
    #[source]
    pub cause: SubmitFailure,
}

impl SubmitError {
    fn at(step: SubmitStep, cause: impl Into<SubmitFailure>) -> Self {
        Self {
            step,
            cause: cause.into(),
        }
    }
}

/// Bound a server call; expiry counts as a failed call.
pub(crate) async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, ApiError>
where
    F: Future<Output = Result<T, ApiError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(ApiError::Timeout(limit)),
    }
}

/// Run the whole transaction for a completed session.
///
/// The recording is finalized between steps one and two, so a session that
/// never recorded still stores its answers and then fails at upload.
pub async fn submit_evidence(
    api: &dyn SurveyApi,
    session: &Session,
    recording: &mut RecordingManager,
    step_timeout: Duration,
) -> Result<(), SubmitError> {
    let submission_id = session.submission_id;
    log::info!(
        "Submitting session {} (submission {}): {} answers, {} snapshots",
        session.id,
        submission_id,
        session.answers().len(),
        session.snapshots().len()
    );

    with_timeout(step_timeout, api.save_answers(submission_id, session.answers()))
        .await
        .map_err(|e| SubmitError::at(SubmitStep::SaveAnswers, e))?;

    let video = recording
        .finalize()
        .map_err(|e| SubmitError::at(SubmitStep::UploadMedia, e))?;

    with_timeout(
        step_timeout,
        api.upload_media(submission_id, video.as_slice(), session.snapshots()),
    )
    .await
    .map_err(|e| SubmitError::at(SubmitStep::UploadMedia, e))?;

    with_timeout(step_timeout, api.complete_session(submission_id))
        .await
        .map_err(|e| SubmitError::at(SubmitStep::CompleteSession, e))?;

    log::info!("Submission {} accepted", submission_id);
    Ok(())
}
