//! Still-image evidence capture
//!
//! Freezes the current frame and encodes it as JPEG. A missing frame source,
//! an unready frame or an encoder failure all yield `None`; the caller keeps
//! going without that question's image.

use std::sync::Arc;

use image::codecs::jpeg::JpegEncoder;

use super::frame::{FrameSource, VideoFrame};

pub const DEFAULT_JPEG_QUALITY: u8 = 80;

#[derive(Clone)]
pub struct EvidenceCapturer {
    source: Option<Arc<dyn FrameSource>>,
    quality: u8,
}

impl EvidenceCapturer {
    pub fn new(source: Arc<dyn FrameSource>, quality: u8) -> Self {
        Self {
            source: Some(source),
            quality: quality.clamp(1, 100),
        }
    }

    /// Capturer with no camera attached; every capture is skipped.
    pub fn detached() -> Self {
        Self {
            source: None,
            quality: DEFAULT_JPEG_QUALITY,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.source.is_some()
    }

    /// Encode the current frame. `None` means the capture was skipped.
    pub async fn capture(&self) -> Option<Vec<u8>> {
        let Some(source) = self.source.as_ref() else {
            log::debug!("Snapshot skipped: no frame source attached");
            return None;
        };

        let Some(frame) = source.latest_frame() else {
            log::warn!("Snapshot skipped: no frame available");
            return None;
        };

        let quality = self.quality;
        let (width, height) = (frame.width(), frame.height());
        match tokio::task::spawn_blocking(move || encode_jpeg(&frame, quality)).await {
            Ok(Ok(bytes)) => {
                log::debug!("Snapshot captured: {}x{}, {} bytes", width, height, bytes.len());
                Some(bytes)
            }
            Ok(Err(e)) => {
                log::warn!("Snapshot encode failed: {}", e);
                None
            }
            Err(e) => {
                log::warn!("Snapshot encode task failed: {}", e);
                None
            }
        }
    }
}

fn encode_jpeg(frame: &VideoFrame, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let mut out = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut out, quality);
    encoder.encode_image(&frame.image)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};

    struct StaticFrame(Option<VideoFrame>);

    impl FrameSource for StaticFrame {
        fn latest_frame(&self) -> Option<VideoFrame> {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn capture_produces_decodable_jpeg() {
        let image = RgbImage::from_pixel(32, 24, Rgb([200, 40, 40]));
        let capturer = EvidenceCapturer::new(
            Arc::new(StaticFrame(Some(VideoFrame::new(image)))),
            DEFAULT_JPEG_QUALITY,
        );

        let bytes = capturer.capture().await.expect("snapshot");
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);

        let decoded = image::load_from_memory_with_format(&bytes, ImageFormat::Jpeg).unwrap();
        assert_eq!(decoded.width(), 32);
        assert_eq!(decoded.height(), 24);
    }

    #[tokio::test]
    async fn detached_capturer_returns_none() {
        let capturer = EvidenceCapturer::detached();
        assert!(!capturer.is_attached());
        assert!(capturer.capture().await.is_none());
    }

    #[tokio::test]
    async fn unready_frame_returns_none() {
        let capturer = EvidenceCapturer::new(Arc::new(StaticFrame(None)), 80);
        assert!(capturer.capture().await.is_none());
    }
}
