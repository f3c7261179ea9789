use image::RgbImage;

/// A single decoded frame from the live camera stream.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub image: RgbImage,
}

impl VideoFrame {
    pub fn new(image: RgbImage) -> Self {
        Self { image }
    }

    /// Black frame of the given size
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            image: RgbImage::new(width, height),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Live camera stream. Returns `None` while the stream is still buffering.
pub trait FrameSource: Send + Sync + 'static {
    fn latest_frame(&self) -> Option<VideoFrame>;
}
