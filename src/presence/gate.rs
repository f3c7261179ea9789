//! Presence state and the may-proceed gate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// How many faces the last detection tick saw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceClassification {
    Absent,
    Single,
    Multiple,
}

impl PresenceClassification {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceClassification::Absent => "absent",
            PresenceClassification::Single => "single",
            PresenceClassification::Multiple => "multiple",
        }
    }
}

/// Result of one detection tick. Superseded by the next tick, never merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceState {
    pub classification: PresenceClassification,
    /// 0-100, only meaningful for `Single`
    pub confidence: u8,
    pub observed_at: DateTime<Utc>,
}

impl PresenceState {
    pub fn absent() -> Self {
        Self {
            classification: PresenceClassification::Absent,
            confidence: 0,
            observed_at: Utc::now(),
        }
    }

    pub fn single(confidence: u8) -> Self {
        Self {
            classification: PresenceClassification::Single,
            confidence: confidence.min(100),
            observed_at: Utc::now(),
        }
    }

    pub fn multiple() -> Self {
        Self {
            classification: PresenceClassification::Multiple,
            confidence: 0,
            observed_at: Utc::now(),
        }
    }
}

/// What the flow controller and the UI consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GateReading {
    pub classification: PresenceClassification,
    pub may_proceed: bool,
    pub confidence: u8,
}

impl GateReading {
    /// Instantaneous derivation: exactly one face right now, nothing else.
    pub fn derive(state: &PresenceState) -> Self {
        let may_proceed = state.classification == PresenceClassification::Single;
        Self {
            classification: state.classification,
            may_proceed,
            confidence: if may_proceed { state.confidence } else { 0 },
        }
    }
}

/// Write side of the presence channel, held by the sampler.
#[derive(Debug, Clone)]
pub struct PresencePublisher {
    tx: watch::Sender<PresenceState>,
}

impl PresencePublisher {
    pub fn publish(&self, state: PresenceState) {
        self.tx.send_replace(state);
    }

    /// True once every gate has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Read side of the presence channel. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct PresenceGate {
    rx: watch::Receiver<PresenceState>,
}

impl PresenceGate {
    /// Evaluate the gate against the latest published state.
    pub fn reading(&self) -> GateReading {
        GateReading::derive(&self.rx.borrow())
    }

    pub fn latest(&self) -> PresenceState {
        self.rx.borrow().clone()
    }

    /// Wait until a new state is published. Errors when the publisher is gone.
    pub async fn changed(&mut self) -> Result<(), watch::error::RecvError> {
        self.rx.changed().await
    }
}

/// Create a connected publisher/gate pair. Starts out `Absent`.
pub fn presence_channel() -> (PresencePublisher, PresenceGate) {
    let (tx, rx) = watch::channel(PresenceState::absent());
    (PresencePublisher { tx }, PresenceGate { rx })
}
