//! Per-visit session data
//!
//! A `Session` exists from the moment the server hands out a submission id
//! until the visit ends. Answers are append-only and strictly ordered;
//! snapshots are keyed by question and a later capture replaces an earlier one.

use std::collections::BTreeMap;

use serde::Serialize;
use uuid::Uuid;

use crate::api::SubmissionId;

pub type QuestionId = i64;

/// One yes/no response plus the presence reading at the instant of answering.
///
/// Serialized with the server's field names.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub question_id: QuestionId,
    #[serde(rename = "answer")]
    pub response: bool,
    #[serde(rename = "face_detected")]
    pub presence_valid: bool,
    #[serde(rename = "face_score")]
    pub confidence: u8,
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub question_id: QuestionId,
    /// JPEG bytes
    pub image: Vec<u8>,
}

impl Snapshot {
    pub fn new(question_id: QuestionId, image: Vec<u8>) -> Self {
        Self { question_id, image }
    }
}

#[derive(Debug)]
pub struct Session {
    /// Local id for log correlation
    pub id: Uuid,
    pub submission_id: SubmissionId,
    question_ids: Vec<QuestionId>,
    answers: Vec<Answer>,
    snapshots: BTreeMap<QuestionId, Snapshot>,
}

impl Session {
    pub fn new(submission_id: SubmissionId, question_ids: Vec<QuestionId>) -> Self {
        Self {
            id: Uuid::new_v4(),
            submission_id,
            question_ids,
            answers: Vec::new(),
            snapshots: BTreeMap::new(),
        }
    }

    pub fn answers(&self) -> &[Answer] {
        &self.answers
    }

    pub fn snapshots(&self) -> &BTreeMap<QuestionId, Snapshot> {
        &self.snapshots
    }

    pub fn is_complete(&self) -> bool {
        self.answers.len() == self.question_ids.len()
    }

    /// Append the answer for the next unanswered question.
    ///
    /// Returns false, leaving the session untouched, if every question is
    /// already answered or the answer is not for the next question in order.
    pub fn push_answer(&mut self, answer: Answer) -> bool {
        let Some(&expected) = self.question_ids.get(self.answers.len()) else {
            log::warn!(
                "Session {}: answer for question {} rejected, all questions answered",
                self.id,
                answer.question_id
            );
            return false;
        };

        if answer.question_id != expected {
            log::warn!(
                "Session {}: answer for question {} rejected, expected {}",
                self.id,
                answer.question_id,
                expected
            );
            return false;
        }

        self.answers.push(answer);
        true
    }

    /// Store a snapshot for a question of this survey, replacing any earlier one.
    pub fn put_snapshot(&mut self, snapshot: Snapshot) -> bool {
        if !self.question_ids.contains(&snapshot.question_id) {
            log::warn!(
                "Session {}: snapshot for unknown question {} dropped",
                self.id,
                snapshot.question_id
            );
            return false;
        }
        self.snapshots.insert(snapshot.question_id, snapshot);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answer(question_id: QuestionId, response: bool) -> Answer {
        Answer {
            question_id,
            response,
            presence_valid: true,
            confidence: 90,
        }
    }

    #[test]
    fn answers_must_follow_question_order() {
        let mut session = Session::new(7, vec![1, 2, 3]);
        assert!(!session.push_answer(answer(2, true)));
        assert!(session.push_answer(answer(1, true)));
        assert!(!session.push_answer(answer(1, false)));
        assert!(session.push_answer(answer(2, false)));
        assert!(session.push_answer(answer(3, true)));
        assert!(session.is_complete());
        assert!(!session.push_answer(answer(3, true)));
        assert_eq!(session.answers().len(), 3);
    }

    #[test]
    fn later_snapshot_replaces_earlier() {
        let mut session = Session::new(7, vec![1, 2]);
        assert!(session.put_snapshot(Snapshot::new(1, vec![1])));
        assert!(session.put_snapshot(Snapshot::new(1, vec![2])));
        assert!(!session.put_snapshot(Snapshot::new(99, vec![3])));

        assert_eq!(session.snapshots().len(), 1);
        assert_eq!(session.snapshots()[&1].image, vec![2]);
    }

    #[test]
    fn answer_serializes_with_server_field_names() {
        let json = serde_json::to_value(answer(5, false)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "question_id": 5,
                "answer": false,
                "face_detected": true,
                "face_score": 90
            })
        );
    }
}
