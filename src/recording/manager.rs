//! Recording lifecycle manager
//!
//! Starts at most once, stops at most once, and finalizes idempotently.
//! Chunks are collected on a separate task while the recording is active.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::recorder::{MediaChunk, MediaError, MediaRecorder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingState {
    Idle,
    Active,
    Stopped,
    Finalized,
}

#[derive(Debug, Error)]
pub enum RecordingError {
    #[error("Recording never started")]
    NeverStarted,
    #[error("Recording is still active")]
    NotStopped,
    #[error("Recording data lost: {0}")]
    Lost(String),
}

pub struct RecordingManager {
    recorder: Option<Box<dyn MediaRecorder>>,
    state: RecordingState,
    collector: Option<JoinHandle<Vec<MediaChunk>>>,
    chunks: Vec<MediaChunk>,
    finalized: Option<Arc<Vec<u8>>>,
    flush_timeout: Duration,
    /// Why recording was skipped or lost, if it was
    failure: Option<String>,
}

impl RecordingManager {
    pub fn new(recorder: Option<Box<dyn MediaRecorder>>, flush_timeout: Duration) -> Self {
        Self {
            recorder,
            state: RecordingState::Idle,
            collector: None,
            chunks: Vec::new(),
            finalized: None,
            flush_timeout,
            failure: None,
        }
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == RecordingState::Active
    }

    /// idle -> active. Returns whether recording is running afterwards.
    ///
    /// Without an open stream the recording is skipped for the whole session
    /// and the manager stays idle; the survey itself carries on.
    pub async fn start(&mut self) -> bool {
        if self.state != RecordingState::Idle || self.failure.is_some() {
            log::debug!("Recording start ignored in state {:?}", self.state);
            return self.is_active();
        }

        let Some(recorder) = self.recorder.as_mut() else {
            log::warn!("Recording skipped: no media stream available");
            self.failure = Some(MediaError::NoStream.to_string());
            return false;
        };

        match recorder.start().await {
            Ok(rx) => {
                self.collector = Some(tokio::spawn(collect_chunks(rx)));
                self.state = RecordingState::Active;
                log::info!("Recording started");
                true
            }
            Err(e) => {
                log::warn!("Recording skipped: {}", e);
                self.failure = Some(e.to_string());
                false
            }
        }
    }

    /// active -> stopped, after the recorder acknowledges its final flush.
    ///
    /// A no-op in any other state. The recorder's `stop()` and the closing of
    /// the chunk channel share one `flush_timeout`; missing it leaves the
    /// recording unusable but still moves to stopped.
    pub async fn stop(&mut self) {
        if self.state != RecordingState::Active {
            log::debug!("Recording stop ignored in state {:?}", self.state);
            return;
        }

        let recorder = self.recorder.as_mut();
        let collector = self.collector.as_mut();
        let flush = async move {
            if let Some(recorder) = recorder {
                if let Err(e) = recorder.stop().await {
                    log::warn!("Recorder stop reported an error: {}", e);
                }
            }
            match collector {
                Some(collector) => Some(collector.await),
                None => None,
            }
        };

        match tokio::time::timeout(self.flush_timeout, flush).await {
            Ok(Some(Ok(chunks))) => self.chunks = chunks,
            Ok(Some(Err(e))) => {
                log::error!("Chunk collector failed: {}", e);
                self.failure = Some(e.to_string());
            }
            Ok(None) => {}
            Err(_) => {
                if let Some(collector) = self.collector.as_ref() {
                    collector.abort();
                }
                let err = MediaError::FlushTimeout(self.flush_timeout);
                log::error!("{}", err);
                self.failure = Some(err.to_string());
            }
        }
        self.collector = None;

        self.state = RecordingState::Stopped;
        log::info!(
            "Recording stopped: {} chunks, {} bytes",
            self.chunks.len(),
            self.chunks.iter().map(Vec::len).sum::<usize>()
        );
    }

    /// stopped -> finalized: concatenate chunks into one object.
    /// Calling it again returns the same object without re-concatenating.
    pub fn finalize(&mut self) -> Result<Arc<Vec<u8>>, RecordingError> {
        if let Some(done) = self.finalized.as_ref() {
            return Ok(Arc::clone(done));
        }

        match self.state {
            RecordingState::Idle => Err(RecordingError::NeverStarted),
            RecordingState::Active => Err(RecordingError::NotStopped),
            RecordingState::Stopped => {
                if let Some(reason) = self.failure.as_ref() {
                    return Err(RecordingError::Lost(reason.clone()));
                }
                let assembled = Arc::new(std::mem::take(&mut self.chunks).concat());
                self.finalized = Some(Arc::clone(&assembled));
                self.state = RecordingState::Finalized;
                log::info!("Recording finalized: {} bytes", assembled.len());
                Ok(assembled)
            }
            RecordingState::Finalized => Err(RecordingError::Lost(
                "finalized recording missing".to_string(),
            )),
        }
    }
}

impl Drop for RecordingManager {
    fn drop(&mut self) {
        if let Some(collector) = self.collector.take() {
            collector.abort();
        }
    }
}

async fn collect_chunks(mut rx: mpsc::UnboundedReceiver<MediaChunk>) -> Vec<MediaChunk> {
    let mut chunks = Vec::new();
    while let Some(chunk) = rx.recv().await {
        if chunk.is_empty() {
            continue;
        }
        chunks.push(chunk);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Sends a fixed script of chunks on start and one trailing chunk on stop.
    struct ScriptedRecorder {
        tx: Option<mpsc::UnboundedSender<MediaChunk>>,
        on_start: Vec<MediaChunk>,
        on_stop: Vec<MediaChunk>,
        hold_sender: bool,
    }

    impl ScriptedRecorder {
        fn boxed(on_start: &[&str], on_stop: &[&str]) -> Box<dyn MediaRecorder> {
            Box::new(Self {
                tx: None,
                on_start: on_start.iter().map(|c| c.as_bytes().to_vec()).collect(),
                on_stop: on_stop.iter().map(|c| c.as_bytes().to_vec()).collect(),
                hold_sender: false,
            })
        }
    }

    #[async_trait]
    impl MediaRecorder for ScriptedRecorder {
        async fn start(&mut self) -> Result<mpsc::UnboundedReceiver<MediaChunk>, MediaError> {
            let (tx, rx) = mpsc::unbounded_channel();
            for chunk in self.on_start.drain(..) {
                let _ = tx.send(chunk);
            }
            self.tx = Some(tx);
            Ok(rx)
        }

        async fn stop(&mut self) -> Result<(), MediaError> {
            if let Some(tx) = self.tx.as_ref() {
                for chunk in self.on_stop.drain(..) {
                    let _ = tx.send(chunk);
                }
            }
            if !self.hold_sender {
                self.tx = None;
            }
            Ok(())
        }
    }

    struct NoStream;

    #[async_trait]
    impl MediaRecorder for NoStream {
        async fn start(&mut self) -> Result<mpsc::UnboundedReceiver<MediaChunk>, MediaError> {
            Err(MediaError::NoStream)
        }

        async fn stop(&mut self) -> Result<(), MediaError> {
            Ok(())
        }
    }

    fn manager(recorder: Box<dyn MediaRecorder>) -> RecordingManager {
        RecordingManager::new(Some(recorder), Duration::from_secs(1))
    }

    #[tokio::test]
    async fn full_lifecycle_keeps_late_chunks() {
        let mut rec = manager(ScriptedRecorder::boxed(&["ab", "", "cd"], &["ef"]));
        assert_eq!(rec.state(), RecordingState::Idle);

        assert!(rec.start().await);
        assert_eq!(rec.state(), RecordingState::Active);

        rec.stop().await;
        assert_eq!(rec.state(), RecordingState::Stopped);

        let bytes = rec.finalize().unwrap();
        assert_eq!(bytes.as_slice(), b"abcdef");
        assert_eq!(rec.state(), RecordingState::Finalized);
    }

    #[tokio::test]
    async fn finalize_is_idempotent() {
        let mut rec = manager(ScriptedRecorder::boxed(&["xyz"], &[]));
        rec.start().await;
        rec.stop().await;

        let first = rec.finalize().unwrap();
        let second = rec.finalize().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.as_slice(), second.as_slice());
    }

    #[tokio::test]
    async fn double_start_is_a_noop() {
        let mut rec = manager(ScriptedRecorder::boxed(&["1"], &[]));
        assert!(rec.start().await);
        assert!(rec.start().await);
        rec.stop().await;
        rec.stop().await;
        assert_eq!(rec.state(), RecordingState::Stopped);
        assert!(!rec.start().await);
        assert_eq!(rec.state(), RecordingState::Stopped);
    }

    #[tokio::test]
    async fn missing_stream_skips_recording() {
        let mut rec = manager(Box::new(NoStream));
        assert!(!rec.start().await);
        assert_eq!(rec.state(), RecordingState::Idle);

        rec.stop().await;
        assert_eq!(rec.state(), RecordingState::Idle);
        assert!(matches!(rec.finalize(), Err(RecordingError::NeverStarted)));
    }

    #[tokio::test]
    async fn no_recorder_at_all_skips_recording() {
        let mut rec = RecordingManager::new(None, Duration::from_secs(1));
        assert!(!rec.start().await);
        assert!(matches!(rec.finalize(), Err(RecordingError::NeverStarted)));
    }

    #[tokio::test]
    async fn finalize_before_stop_is_rejected() {
        let mut rec = manager(ScriptedRecorder::boxed(&["1"], &[]));
        rec.start().await;
        assert!(matches!(rec.finalize(), Err(RecordingError::NotStopped)));
    }

    /// Accepts the stop request but never acknowledges it.
    struct StuckOnStop {
        tx: Option<mpsc::UnboundedSender<MediaChunk>>,
    }

    #[async_trait]
    impl MediaRecorder for StuckOnStop {
        async fn start(&mut self) -> Result<mpsc::UnboundedReceiver<MediaChunk>, MediaError> {
            let (tx, rx) = mpsc::unbounded_channel();
            let _ = tx.send(b"partial".to_vec());
            self.tx = Some(tx);
            Ok(rx)
        }

        async fn stop(&mut self) -> Result<(), MediaError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stop_that_never_resolves_is_bounded_by_flush_timeout() {
        let mut rec = RecordingManager::new(
            Some(Box::new(StuckOnStop { tx: None })),
            Duration::from_secs(5),
        );
        assert!(rec.start().await);

        let started = tokio::time::Instant::now();
        tokio::time::timeout(Duration::from_secs(3600), rec.stop())
            .await
            .expect("stop must return once the flush timeout expires");
        assert!(started.elapsed() < Duration::from_secs(6));

        assert_eq!(rec.state(), RecordingState::Stopped);
        assert!(matches!(rec.finalize(), Err(RecordingError::Lost(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn flush_timeout_loses_recording() {
        let mut rec = manager(Box::new(ScriptedRecorder {
            tx: None,
            on_start: vec![b"partial".to_vec()],
            on_stop: vec![],
            hold_sender: true,
        }));
        rec.start().await;
        rec.stop().await;

        assert_eq!(rec.state(), RecordingState::Stopped);
        assert!(matches!(rec.finalize(), Err(RecordingError::Lost(_))));
    }
}
