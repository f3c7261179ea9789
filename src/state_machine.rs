//! Survey flow state machine
//!
//! Single-writer pattern: every transition goes through `reduce()`, which
//! returns the next state and the effects the controller must run, in order.
//! User commands (`Advance`, `Answer`) can be denied; completion events from
//! effects are never denied and are dropped when they no longer apply.

use serde::Serialize;
use thiserror::Error;

use crate::api::SubmissionId;
use crate::presence::GateReading;
use crate::session::{Answer, QuestionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    LoadFailed,
    InitFailed,
    SubmitFailed,
}

/// Where the respondent is in the survey.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FlowState {
    #[default]
    Intro,
    /// Waiting for the server to open the submission
    Starting,
    /// 1-based question number
    Question {
        index: usize,
    },
    Submitting,
    Success,
    Error {
        reason: ErrorReason,
        message: String,
    },
}

impl FlowState {
    pub fn name(&self) -> &'static str {
        match self {
            FlowState::Intro => "intro",
            FlowState::Starting => "starting",
            FlowState::Question { .. } => "question",
            FlowState::Submitting => "submitting",
            FlowState::Success => "success",
            FlowState::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, FlowState::Success | FlowState::Error { .. })
    }

    /// Presence sampling runs only while the respondent can still act.
    pub fn samples_presence(&self) -> bool {
        matches!(
            self,
            FlowState::Intro | FlowState::Starting | FlowState::Question { .. }
        )
    }
}

#[derive(Debug, Clone)]
pub enum Event {
    /// Respondent confirms readiness on the intro screen
    Advance,
    /// Respondent answers the current question
    Answer { value: bool },

    SessionStarted { submission_id: SubmissionId },
    SessionStartFailed { err: String },

    SubmitSucceeded,
    SubmitFailed { err: String },
}

impl Event {
    fn is_command(&self) -> bool {
        matches!(self, Event::Advance | Event::Answer { .. })
    }
}

/// Side effects for the controller, executed sequentially.
#[derive(Debug, Clone)]
pub enum Effect {
    /// POST start_session; reports back SessionStarted / SessionStartFailed
    StartSession,
    OpenSession { submission_id: SubmissionId },
    StartRecording,
    CaptureSnapshot { question_id: QuestionId },
    RecordAnswer { answer: Answer },
    StopSampler,
    /// Resolves only after the recorder's final flush
    StopRecording,
    /// Runs the three-step transaction; reports back SubmitSucceeded / SubmitFailed
    SubmitEvidence,
    EmitUi,
}

/// Everything outside the state itself that a transition may look at.
#[derive(Debug, Clone, Copy)]
pub struct FlowContext<'a> {
    pub question_ids: &'a [QuestionId],
    pub answered: usize,
    /// Gate evaluated at the instant the event is handled
    pub gate: GateReading,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Face detection required to proceed")]
    PresenceRequired,
    #[error("Question {0} has already been answered")]
    AlreadyAnswered(usize),
    #[error("Action not available while {0}")]
    NotAvailable(&'static str),
    #[error("Session has ended")]
    SessionClosed,
}

/// Reducer: (state, event, context) -> (next_state, effects)
///
/// Key rules:
/// - Never mutate state directly
/// - Gate every command on the presence reading carried in `ctx`
/// - Emit UI after every state change
pub fn reduce(
    state: &FlowState,
    event: Event,
    ctx: &FlowContext<'_>,
) -> Result<(FlowState, Vec<Effect>), TransitionError> {
    use Effect::*;
    use FlowState::*;

    match (state, event) {
        // -----------------
        // Intro
        // -----------------
        (Intro, Event::Advance) => {
            if !ctx.gate.may_proceed {
                return Err(TransitionError::PresenceRequired);
            }
            // `Starting` is visible while the call is in flight
            Ok((Starting, vec![EmitUi, StartSession]))
        }

        // -----------------
        // Starting
        // -----------------
        (Starting, Event::SessionStarted { submission_id }) => Ok((
            Question { index: 1 },
            vec![OpenSession { submission_id }, StartRecording, EmitUi],
        )),
        (Starting, Event::SessionStartFailed { err }) => Ok((
            Error {
                reason: ErrorReason::InitFailed,
                message: err,
            },
            vec![StopSampler, EmitUi],
        )),

        // -----------------
        // Question
        // -----------------
        (Question { index }, Event::Answer { value }) => {
            let index = *index;
            if ctx.answered >= index {
                return Err(TransitionError::AlreadyAnswered(index));
            }
            if !ctx.gate.may_proceed {
                return Err(TransitionError::PresenceRequired);
            }
            let Some(&question_id) = ctx.question_ids.get(index - 1) else {
                return Err(TransitionError::NotAvailable("question out of range"));
            };

            let answer = Answer {
                question_id,
                response: value,
                presence_valid: ctx.gate.may_proceed,
                confidence: ctx.gate.confidence,
            };
            let mut effects = vec![CaptureSnapshot { question_id }, RecordAnswer { answer }];

            if index < ctx.question_ids.len() {
                effects.push(EmitUi);
                Ok((Question { index: index + 1 }, effects))
            } else {
                // Last answer: stop sampling and recording before the network work
                effects.extend([StopSampler, StopRecording, EmitUi, SubmitEvidence]);
                Ok((Submitting, effects))
            }
        }

        // -----------------
        // Submitting
        // -----------------
        (Submitting, Event::SubmitSucceeded) => Ok((Success, vec![EmitUi])),
        (Submitting, Event::SubmitFailed { err }) => Ok((
            Error {
                reason: ErrorReason::SubmitFailed,
                message: err,
            },
            vec![EmitUi],
        )),

        // -----------------
        // Denied commands
        // -----------------
        (Success | Error { .. }, ev) if ev.is_command() => Err(TransitionError::SessionClosed),
        (_, ev) if ev.is_command() => Err(TransitionError::NotAvailable(state.name())),

        // -----------------
        // Completion events that no longer apply (drop silently)
        // -----------------
        _ => Ok((state.clone(), vec![])),
    }
}
