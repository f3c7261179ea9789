//! Periodic detection sampling
//!
//! Runs on its own task until cancelled, until every `PresenceGate` is
//! dropped, or until the session stops it on entering submission. Each tick
//! is independent of the previous one.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::detector::{classify, FaceDetector};
use super::gate::{PresencePublisher, PresenceState};
use crate::capture::FrameSource;

#[derive(Debug, Clone, Copy)]
pub struct SamplerConfig {
    pub interval: Duration,
    /// A detection call slower than this counts as a failed tick
    pub detect_timeout: Duration,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(200),
            detect_timeout: Duration::from_millis(1000),
        }
    }
}

/// Owns the sampling task. Dropping the handle cancels sampling.
pub struct SamplerHandle {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SamplerHandle {
    /// Request the loop to stop. No further ticks are scheduled.
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled() || self.task.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Stop and wait for the loop to exit.
    pub async fn join(mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::warn!("Detection sampler task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for SamplerHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Start polling `detector` over `frames`, publishing every classification.
pub fn spawn_sampler(
    detector: Arc<dyn FaceDetector>,
    frames: Arc<dyn FrameSource>,
    publisher: PresencePublisher,
    config: SamplerConfig,
) -> SamplerHandle {
    let token = CancellationToken::new();
    let task = tokio::spawn(sampling_loop(
        detector,
        frames,
        publisher,
        config,
        token.clone(),
    ));

    SamplerHandle {
        token,
        task: Some(task),
    }
}

async fn sampling_loop(
    detector: Arc<dyn FaceDetector>,
    frames: Arc<dyn FrameSource>,
    publisher: PresencePublisher,
    config: SamplerConfig,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    log::info!("Detection sampler started (every {:?})", config.interval);

    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                log::info!("Detection sampler stopped");
                break;
            }
            _ = ticker.tick() => {
                if publisher.is_closed() {
                    log::info!("Detection sampler: no gate left, shutting down");
                    break;
                }
                if let Some(state) = sample_once(detector.as_ref(), frames.as_ref(), config.detect_timeout).await {
                    log::debug!(
                        "Presence tick: {} ({})",
                        state.classification.as_str(),
                        state.confidence
                    );
                    publisher.publish(state);
                }
            }
        }
    }
}

/// One tick. `None` means the frame was not ready and the tick is skipped.
async fn sample_once(
    detector: &dyn FaceDetector,
    frames: &dyn FrameSource,
    detect_timeout: Duration,
) -> Option<PresenceState> {
    let frame = frames.latest_frame()?;

    match tokio::time::timeout(detect_timeout, detector.detect(&frame)).await {
        Ok(Ok(detections)) => Some(classify(&detections)),
        Ok(Err(e)) => {
            // Unusable detector blocks progression, it never ends the session
            log::warn!("Face detection failed, treating tick as absent: {}", e);
            Some(PresenceState::absent())
        }
        Err(_) => {
            log::warn!(
                "Face detection timed out (> {:?}), treating tick as absent",
                detect_timeout
            );
            Some(PresenceState::absent())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::VideoFrame;
    use crate::presence::{presence_channel, Detection, DetectorError, PresenceClassification};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct CountingDetector {
        faces: AtomicUsize,
        calls: AtomicUsize,
        fail: AtomicBool,
    }

    impl CountingDetector {
        fn new(faces: usize) -> Arc<Self> {
            Arc::new(Self {
                faces: AtomicUsize::new(faces),
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl FaceDetector for CountingDetector {
        async fn detect(&self, _frame: &VideoFrame) -> Result<Vec<Detection>, DetectorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(DetectorError::Failed("boom".to_string()));
            }
            let n = self.faces.load(Ordering::SeqCst);
            Ok(vec![Detection { score: 0.8 }; n])
        }
    }

    struct Frames {
        ready: AtomicBool,
    }

    impl FrameSource for Frames {
        fn latest_frame(&self) -> Option<VideoFrame> {
            self.ready
                .load(Ordering::SeqCst)
                .then(|| VideoFrame::blank(4, 4))
        }
    }

    fn frames(ready: bool) -> Arc<Frames> {
        Arc::new(Frames {
            ready: AtomicBool::new(ready),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_classification_each_tick() {
        let detector = CountingDetector::new(1);
        let (publisher, gate) = presence_channel();
        let handle = spawn_sampler(
            detector.clone(),
            frames(true),
            publisher,
            SamplerConfig::default(),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(gate.reading().may_proceed);
        assert_eq!(gate.reading().confidence, 80);

        detector.faces.store(2, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(
            gate.reading().classification,
            PresenceClassification::Multiple
        );
        assert!(!gate.reading().may_proceed);

        handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn skips_ticks_while_frame_not_ready() {
        let detector = CountingDetector::new(1);
        let source = frames(false);
        let (publisher, gate) = presence_channel();
        let handle = spawn_sampler(
            detector.clone(),
            source.clone(),
            publisher,
            SamplerConfig::default(),
        );

        tokio::time::sleep(Duration::from_millis(650)).await;
        assert_eq!(detector.calls.load(Ordering::SeqCst), 0);
        assert!(!gate.reading().may_proceed);

        source.ready.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(detector.calls.load(Ordering::SeqCst) >= 1);
        assert!(gate.reading().may_proceed);

        handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn detector_failure_reads_as_absent() {
        let detector = CountingDetector::new(1);
        let (publisher, gate) = presence_channel();
        let handle = spawn_sampler(
            detector.clone(),
            frames(true),
            publisher,
            SamplerConfig::default(),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(gate.reading().may_proceed);

        detector.fail.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(gate.reading().classification, PresenceClassification::Absent);

        handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn no_ticks_after_stop() {
        let detector = CountingDetector::new(1);
        let (publisher, _gate) = presence_channel();
        let handle = spawn_sampler(
            detector.clone(),
            frames(true),
            publisher,
            SamplerConfig::default(),
        );

        tokio::time::sleep(Duration::from_millis(450)).await;
        handle.stop();
        assert!(handle.is_stopped());
        tokio::time::sleep(Duration::from_millis(10)).await;
        let calls_at_stop = detector.calls.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(detector.calls.load(Ordering::SeqCst), calls_at_stop);
        handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn exits_when_all_gates_are_dropped() {
        let detector = CountingDetector::new(1);
        let (publisher, gate) = presence_channel();
        let handle = spawn_sampler(
            detector.clone(),
            frames(true),
            publisher,
            SamplerConfig::default(),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(gate);
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(handle.is_stopped());
    }
}
