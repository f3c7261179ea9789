//! Continuous session recording
//!
//! The `MediaRecorder` capability owns the device; the `RecordingManager`
//! owns the lifecycle (idle -> active -> stopped -> finalized) and the
//! buffered chunks.

mod manager;
mod recorder;

pub use manager::{RecordingError, RecordingManager, RecordingState};
pub use recorder::{MediaChunk, MediaError, MediaRecorder};
