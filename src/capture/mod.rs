//! Video frame access and per-question evidence snapshots
//!
//! Frames come from an injected `FrameSource`; the detection sampler and the
//! evidence capturer only ever read from it.

mod frame;
mod snapshot;

pub use frame::{FrameSource, VideoFrame};
pub use snapshot::{EvidenceCapturer, DEFAULT_JPEG_QUALITY};
