//! Media capture capability

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// One encoded piece of the continuous recording, in arrival order.
pub type MediaChunk = Vec<u8>;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("No open media stream")]
    NoStream,
    #[error("Media device error: {0}")]
    Device(String),
    #[error("Recorder did not flush within {0:?}")]
    FlushTimeout(std::time::Duration),
}

/// Continuous audio/video capture over the session's media stream.
///
/// `start` hands back the chunk channel. `stop` must resolve only after the
/// last chunk has been sent; the recorder then drops its sender, and the
/// closed channel is the flush acknowledgment.
#[async_trait]
pub trait MediaRecorder: Send + 'static {
    async fn start(&mut self) -> Result<mpsc::UnboundedReceiver<MediaChunk>, MediaError>;
    async fn stop(&mut self) -> Result<(), MediaError>;
}
