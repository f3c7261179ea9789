//! Wire types for the survey server.

use serde::{Deserialize, Serialize};

pub type SurveyId = i64;
pub type SubmissionId = i64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,
    pub question_text: String,
    /// Position within the survey
    pub order: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Survey {
    pub id: SurveyId,
    pub title: String,
    #[serde(default)]
    pub questions: Vec<Question>,
}

impl Survey {
    /// Put questions into display order. Ties keep server order.
    pub fn sort_questions(&mut self) {
        self.questions.sort_by_key(|q| q.order);
    }

    pub fn question_ids(&self) -> Vec<i64> {
        self.questions.iter().map(|q| q.id).collect()
    }
}

/// Response from POST /surveys/{id}/start
#[derive(Debug, Deserialize)]
pub(crate) struct StartSessionResponse {
    pub submission_id: SubmissionId,
}

/// FastAPI error body
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorDetail {
    pub detail: serde_json::Value,
}
