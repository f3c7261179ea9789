//! Effect runner for one survey visit
//!
//! `SessionController` owns the flow state, the session data and every
//! capability handle. Commands go through `reduce()`; the effects it returns
//! run here one after another, and effects that finish with an outcome
//! (session start, submission) feed that outcome back in as the next event.
//! Cancelling the session token abandons whatever effect is in flight and
//! drops everything queued after it.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::api::{load_survey, ApiError, Survey, SurveyApi, SurveyId};
use crate::capture::{EvidenceCapturer, FrameSource};
use crate::presence::{
    presence_channel, spawn_sampler, FaceDetector, PresenceGate, PresenceState, SamplerHandle,
};
use crate::recording::{MediaRecorder, RecordingManager, RecordingState};
use crate::session::{QuestionId, Session, Snapshot};
use crate::settings::AppSettings;
use crate::state_machine::{reduce, Effect, Event, FlowContext, FlowState, TransitionError};
use crate::submission::{submit_evidence, with_timeout};
use crate::UiState;

/// Capabilities injected into a controller.
///
/// Any of the device handles may be missing; the session then degrades the
/// way a visitor without a camera would (gate stays closed, capture and
/// recording are skipped).
pub struct SessionDeps {
    pub api: Arc<dyn SurveyApi>,
    pub detector: Option<Arc<dyn FaceDetector>>,
    pub frames: Option<Arc<dyn FrameSource>>,
    pub recorder: Option<Box<dyn MediaRecorder>>,
}

pub struct SessionController {
    survey: Survey,
    question_ids: Vec<QuestionId>,
    state: FlowState,
    session: Option<Session>,
    gate: PresenceGate,
    sampler: Option<SamplerHandle>,
    capturer: EvidenceCapturer,
    recording: RecordingManager,
    api: Arc<dyn SurveyApi>,
    request_timeout: Duration,
    ui_tx: watch::Sender<UiState>,
    cancel: CancellationToken,
}

impl SessionController {
    /// Load the survey and get the intro screen ready.
    ///
    /// Presence sampling starts here so the respondent sees the gate before
    /// confirming readiness. A load failure is returned before any state
    /// machine activity; render it with `UiState::load_failed`.
    pub async fn open(
        survey_id: SurveyId,
        deps: SessionDeps,
        settings: &AppSettings,
    ) -> Result<Self, ApiError> {
        let request_timeout = settings.request_timeout();
        let survey = with_timeout(request_timeout, load_survey(deps.api.as_ref(), survey_id))
            .await
            .map_err(|e| {
                log::error!("Failed to load survey {}: {}", survey_id, e);
                e
            })?;

        let (publisher, gate) = presence_channel();
        let sampler = match (deps.detector, deps.frames.clone()) {
            (Some(detector), Some(frames)) => Some(spawn_sampler(
                detector,
                frames,
                publisher,
                settings.sampler_config(),
            )),
            _ => {
                log::warn!("No camera or face detector available; progression stays blocked");
                None
            }
        };

        let capturer = match deps.frames {
            Some(frames) => EvidenceCapturer::new(frames, settings.snapshot_jpeg_quality),
            None => EvidenceCapturer::detached(),
        };

        let question_ids = survey.question_ids();
        let state = FlowState::default();
        let initial_ui = UiState::build(&survey, &state, gate.reading(), false);
        let (ui_tx, _) = watch::channel(initial_ui);

        log::info!(
            "Survey {} '{}' ready with {} questions",
            survey.id,
            survey.title,
            question_ids.len()
        );

        Ok(Self {
            survey,
            question_ids,
            state,
            session: None,
            gate,
            sampler,
            capturer,
            recording: RecordingManager::new(deps.recorder, settings.flush_timeout()),
            api: deps.api,
            request_timeout,
            ui_tx,
            cancel: CancellationToken::new(),
        })
    }

    pub fn survey(&self) -> &Survey {
        &self.survey
    }

    pub fn state(&self) -> &FlowState {
        &self.state
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn recording_state(&self) -> RecordingState {
        self.recording.state()
    }

    pub fn presence(&self) -> PresenceState {
        self.gate.latest()
    }

    /// A read handle for waiting on presence changes.
    pub fn presence_gate(&self) -> PresenceGate {
        self.gate.clone()
    }

    pub fn is_sampling(&self) -> bool {
        self.sampler.as_ref().is_some_and(|s| !s.is_stopped())
    }

    pub fn ui_state(&self) -> UiState {
        UiState::build(
            &self.survey,
            &self.state,
            self.gate.reading(),
            self.recording.is_active(),
        )
    }

    pub fn subscribe(&self) -> watch::Receiver<UiState> {
        self.ui_tx.subscribe()
    }

    /// Token that discards the session when cancelled, even mid-command.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Confirm readiness on the intro screen.
    pub async fn advance(&mut self) -> Result<(), TransitionError> {
        self.dispatch(Event::Advance).await
    }

    /// Answer the current question.
    pub async fn answer(&mut self, value: bool) -> Result<(), TransitionError> {
        self.dispatch(Event::Answer { value }).await
    }

    /// Re-publish the read model, e.g. after a presence tick.
    pub fn refresh_ui(&self) {
        self.emit_ui();
    }

    /// Drop the session: stop sampling, release the recorder, forget answers.
    /// Results of calls still in flight are never looked at again.
    pub async fn teardown(mut self) {
        log::info!("Tearing down session in state {}", self.state.name());
        self.cancel.cancel();
        if let Some(sampler) = self.sampler.take() {
            sampler.join().await;
        }
        self.recording.stop().await;
        self.session = None;
    }

    fn answered(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.answers().len())
    }

    async fn dispatch(&mut self, event: Event) -> Result<(), TransitionError> {
        let cancel = self.cancel.clone();
        let mut queue = VecDeque::from([event]);

        while let Some(event) = queue.pop_front() {
            if cancel.is_cancelled() {
                log::info!("Session discarded, ignoring {:?}", event);
                return Err(TransitionError::SessionClosed);
            }

            log::debug!("Handling event: {:?}", event);

            let ctx = FlowContext {
                question_ids: &self.question_ids,
                answered: self.answered(),
                gate: self.gate.reading(),
            };

            let (next, effects) = match reduce(&self.state, event, &ctx) {
                Ok(step) => step,
                Err(e) => {
                    log::info!("Denied in {}: {}", self.state.name(), e);
                    self.emit_ui();
                    return Err(e);
                }
            };

            if self.state != next {
                log::info!("State transition: {:?} -> {:?}", self.state, next);
            }
            self.state = next;

            for effect in effects {
                let follow_up = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        log::info!("Session discarded, dropping pending effects");
                        return Err(TransitionError::SessionClosed);
                    }
                    follow_up = self.run_effect(effect) => follow_up,
                };
                if let Some(follow_up) = follow_up {
                    queue.push_back(follow_up);
                }
            }
        }

        Ok(())
    }

    async fn run_effect(&mut self, effect: Effect) -> Option<Event> {
        log::debug!("Running effect: {:?}", effect);

        match effect {
            Effect::StartSession => {
                match with_timeout(self.request_timeout, self.api.start_session(self.survey.id))
                    .await
                {
                    Ok(submission_id) => Some(Event::SessionStarted { submission_id }),
                    Err(e) => {
                        log::error!("Session start failed: {}", e);
                        Some(Event::SessionStartFailed { err: e.to_string() })
                    }
                }
            }

            Effect::OpenSession { submission_id } => {
                let session = Session::new(submission_id, self.question_ids.clone());
                log::info!(
                    "Session {} opened for submission {}",
                    session.id,
                    submission_id
                );
                self.session = Some(session);
                None
            }

            Effect::StartRecording => {
                self.recording.start().await;
                None
            }

            Effect::CaptureSnapshot { question_id } => {
                match self.capturer.capture().await {
                    Some(image) => {
                        if let Some(session) = self.session.as_mut() {
                            session.put_snapshot(Snapshot::new(question_id, image));
                        }
                    }
                    None => log::warn!("No snapshot for question {}", question_id),
                }
                None
            }

            Effect::RecordAnswer { answer } => {
                match self.session.as_mut() {
                    Some(session) => {
                        session.push_answer(answer);
                    }
                    None => log::error!(
                        "Answer for question {} without a session",
                        answer.question_id
                    ),
                }
                None
            }

            Effect::StopSampler => {
                if let Some(sampler) = self.sampler.take() {
                    sampler.join().await;
                }
                None
            }

            Effect::StopRecording => {
                self.recording.stop().await;
                None
            }

            Effect::SubmitEvidence => {
                let Some(session) = self.session.as_ref() else {
                    log::error!("Submit requested without a session");
                    return Some(Event::SubmitFailed {
                        err: "no active session".to_string(),
                    });
                };

                match submit_evidence(
                    self.api.as_ref(),
                    session,
                    &mut self.recording,
                    self.request_timeout,
                )
                .await
                {
                    Ok(()) => Some(Event::SubmitSucceeded),
                    Err(e) => {
                        log::error!("{}", e);
                        Some(Event::SubmitFailed { err: e.to_string() })
                    }
                }
            }

            Effect::EmitUi => {
                self.emit_ui();
                None
            }
        }
    }

    fn emit_ui(&self) {
        let ui = self.ui_state();
        log::debug!("Emitting UI state: {:?}", serde_json::to_string(&ui));
        self.ui_tx.send_replace(ui);
    }
}
