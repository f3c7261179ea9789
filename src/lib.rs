pub mod api;
pub mod capture;
pub mod controller;
pub mod presence;
pub mod recording;
pub mod session;
pub mod settings;
pub mod state_machine;
pub mod submission;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use api::{ApiError, Survey};
use controller::SessionController;
use presence::{GateReading, PresenceClassification};
use state_machine::{ErrorReason, FlowState, TransitionError};

/// Step-specific part of the read model.
/// Tagged union: { "status": "intro", "title": "..." } or { "status": "question", "number": 2, ... }
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum StepView {
    Intro {
        title: String,
    },
    Starting,
    Question {
        number: usize,
        total: usize,
        text: String,
    },
    Submitting,
    Success,
    Error {
        reason: ErrorReason,
        message: String,
    },
}

/// Everything a rendering layer needs, recomputed on every state change and
/// presence tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UiState {
    pub step: StepView,
    pub face_status: PresenceClassification,
    pub may_proceed: bool,
    pub confidence: u8,
    pub recording: bool,
    /// Whether the intro button / YES-NO buttons accept input
    pub controls_enabled: bool,
    pub blocking_message: Option<String>,
    /// 0.0 at intro, 1.0 once every question is answered
    pub progress: f32,
}

impl UiState {
    pub fn build(survey: &Survey, state: &FlowState, gate: GateReading, recording: bool) -> Self {
        let total = survey.questions.len();

        let (step, position) = match state {
            FlowState::Intro => (
                StepView::Intro {
                    title: survey.title.clone(),
                },
                0,
            ),
            FlowState::Starting => (StepView::Starting, 0),
            FlowState::Question { index } => {
                let text = survey
                    .questions
                    .get(index.saturating_sub(1))
                    .map(|q| q.question_text.clone())
                    .unwrap_or_default();
                (
                    StepView::Question {
                        number: *index,
                        total,
                        text,
                    },
                    *index,
                )
            }
            FlowState::Submitting => (StepView::Submitting, total + 1),
            FlowState::Success => (StepView::Success, total + 1),
            FlowState::Error { reason, message } => (
                StepView::Error {
                    reason: *reason,
                    message: message.clone(),
                },
                0,
            ),
        };

        let accepts_input = matches!(state, FlowState::Intro | FlowState::Question { .. });
        let blocking_message = (state.samples_presence() && !gate.may_proceed)
            .then(|| TransitionError::PresenceRequired.to_string());

        Self {
            step,
            face_status: gate.classification,
            may_proceed: gate.may_proceed,
            confidence: gate.confidence,
            recording,
            controls_enabled: accepts_input && gate.may_proceed,
            blocking_message,
            progress: position as f32 / (total + 1) as f32,
        }
    }

    /// Read model for a survey that could not be loaded.
    pub fn load_failed(err: &ApiError) -> Self {
        Self {
            step: StepView::Error {
                reason: ErrorReason::LoadFailed,
                message: err.to_string(),
            },
            face_status: PresenceClassification::Absent,
            may_proceed: false,
            confidence: 0,
            recording: false,
            controls_enabled: false,
            blocking_message: None,
            progress: 0.0,
        }
    }
}

enum Command {
    Advance {
        reply: oneshot::Sender<Result<(), TransitionError>>,
    },
    Answer {
        value: bool,
        reply: oneshot::Sender<Result<(), TransitionError>>,
    },
    Exit,
}

/// Sends commands to a controller running on its own task.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<Command>,
    cancel: CancellationToken,
}

impl SessionHandle {
    /// Move `controller` onto a task and return a handle to drive it.
    pub fn spawn(controller: SessionController) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(32);
        let cancel = controller.cancel_token();
        let task = tokio::spawn(run_session_loop(controller, rx));
        (Self { tx, cancel }, task)
    }

    pub async fn advance(&self) -> Result<(), TransitionError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Advance { reply }, rx).await
    }

    pub async fn answer(&self, value: bool) -> Result<(), TransitionError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Answer { value, reply }, rx).await
    }

    /// Discard the session and stop the loop.
    ///
    /// A command still running is abandoned at once; its remaining server
    /// calls are never made and its reply is `SessionClosed`.
    pub async fn exit(&self) {
        self.cancel.cancel();
        if self.tx.send(Command::Exit).await.is_err() {
            log::debug!("Session loop already stopped");
        }
    }

    async fn request(
        &self,
        command: Command,
        rx: oneshot::Receiver<Result<(), TransitionError>>,
    ) -> Result<(), TransitionError> {
        if self.tx.send(command).await.is_err() {
            return Err(TransitionError::SessionClosed);
        }
        rx.await.unwrap_or(Err(TransitionError::SessionClosed))
    }
}

/// Run commands against the controller one at a time and keep the read
/// model in step with presence ticks.
async fn run_session_loop(mut controller: SessionController, mut rx: mpsc::Receiver<Command>) {
    let mut presence = controller.presence_gate();
    let mut presence_live = true;

    controller.refresh_ui();
    log::info!("Session loop started");

    loop {
        tokio::select! {
            command = rx.recv() => match command {
                Some(Command::Advance { reply }) => {
                    let _ = reply.send(controller.advance().await);
                }
                Some(Command::Answer { value, reply }) => {
                    let _ = reply.send(controller.answer(value).await);
                }
                Some(Command::Exit) | None => {
                    log::info!("Exit requested, shutting down session loop");
                    break;
                }
            },
            changed = presence.changed(), if presence_live => match changed {
                Ok(()) => controller.refresh_ui(),
                Err(_) => {
                    log::debug!("Presence sampling ended");
                    presence_live = false;
                }
            },
        }
    }

    controller.teardown().await;
    log::info!("Session loop ended");
}
