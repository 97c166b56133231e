//! Frames and per-camera detection sources.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{ReidError, Result};
use crate::integration::extractor::PersonCrop;
use crate::tracker::{CameraId, Detection, Rect};

/// Raw interleaved RGB pixels of one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameImage {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl FrameImage {
    pub const CHANNELS: usize = 3;

    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * Self::CHANNELS;
        if pixels.len() != expected {
            return Err(ReidError::Source(format!(
                "frame buffer holds {} bytes, expected {} for {}x{} RGB",
                pixels.len(),
                expected,
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Single-colour frame.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let pixels = rgb
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * Self::CHANNELS)
            .collect();
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Paint `rect` (clamped to the frame) with one colour.
    pub fn fill_rect(&mut self, rect: &Rect, rgb: [u8; 3]) {
        let [x1, y1, x2, y2] = pixel_bounds(&rect.clamp_to(self.width, self.height));
        for y in y1..y2 {
            for x in x1..x2 {
                let offset = (y * self.width as usize + x) * Self::CHANNELS;
                self.pixels[offset..offset + Self::CHANNELS].copy_from_slice(&rgb);
            }
        }
    }

    /// Copy out the region under `bbox`, clamped to the frame bounds.
    ///
    /// Boxes entirely outside the frame yield an empty crop.
    pub fn crop(&self, bbox: &Rect) -> PersonCrop {
        let [x1, y1, x2, y2] = pixel_bounds(&bbox.clamp_to(self.width, self.height));
        let (w, h) = (x2 - x1, y2 - y1);
        let mut pixels = Vec::with_capacity(w * h * Self::CHANNELS);
        for y in y1..y2 {
            let row = (y * self.width as usize + x1) * Self::CHANNELS;
            pixels.extend_from_slice(&self.pixels[row..row + w * Self::CHANNELS]);
        }
        PersonCrop::new(w as u32, h as u32, pixels)
    }
}

/// Whole-pixel bounds of an already clamped rect.
fn pixel_bounds(rect: &Rect) -> [usize; 4] {
    let [x1, y1, x2, y2] = rect.to_tlbr();
    let x1 = x1.floor() as usize;
    let y1 = y1.floor() as usize;
    [x1, y1, (x2.ceil() as usize).max(x1), (y2.ceil() as usize).max(y1)]
}

/// One frame of a camera stream with its person detections.
#[derive(Debug, Clone)]
pub struct Frame {
    pub camera_id: CameraId,
    pub frame_number: u64,
    pub captured_at: DateTime<Utc>,
    pub detections: Vec<Detection>,
    /// Pixels for crop extraction; frames without an image yield no observations
    pub image: Option<Arc<FrameImage>>,
}

/// Lazy sequence of frames for one camera.
///
/// Finite for recorded media, unbounded for live feeds. Restarting affects
/// only this camera.
#[async_trait]
pub trait DetectionSource: Send {
    fn camera_id(&self) -> &CameraId;

    /// Next frame, `None` at end of stream.
    async fn next_frame(&mut self) -> Option<Result<Frame>>;

    /// Rewind or reconnect the stream.
    async fn restart(&mut self) -> Result<()>;
}

/// In-memory source replaying a fixed list of frames.
pub struct ReplaySource {
    camera_id: CameraId,
    frames: Vec<Frame>,
    cursor: usize,
}

impl ReplaySource {
    pub fn new(camera_id: impl Into<CameraId>, frames: Vec<Frame>) -> Self {
        Self {
            camera_id: camera_id.into(),
            frames,
            cursor: 0,
        }
    }

    pub fn remaining(&self) -> usize {
        self.frames.len() - self.cursor
    }
}

#[async_trait]
impl DetectionSource for ReplaySource {
    fn camera_id(&self) -> &CameraId {
        &self.camera_id
    }

    async fn next_frame(&mut self) -> Option<Result<Frame>> {
        let frame = self.frames.get(self.cursor)?.clone();
        self.cursor += 1;
        if frame.camera_id != self.camera_id {
            return Some(Err(ReidError::Source(format!(
                "frame {} belongs to {}, not {}",
                frame.frame_number, frame.camera_id, self.camera_id
            ))));
        }
        Some(Ok(frame))
    }

    async fn restart(&mut self) -> Result<()> {
        self.cursor = 0;
        Ok(())
    }
}
