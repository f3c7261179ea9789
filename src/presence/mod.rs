//! Face-presence sampling and gating
//!
//! The sampler task polls a `FaceDetector` over the live video frames
//! and publishes a `PresenceState` on every tick. The `PresenceGate` derives
//! the may-proceed signal from whatever state was published last; nothing is
//! carried over between ticks.

mod detector;
mod gate;
mod sampler;

pub use detector::{classify, Detection, DetectorError, FaceDetector};
pub use gate::{
    presence_channel, GateReading, PresenceClassification, PresenceGate, PresencePublisher,
    PresenceState,
};
pub use sampler::{spawn_sampler, SamplerConfig, SamplerHandle};
