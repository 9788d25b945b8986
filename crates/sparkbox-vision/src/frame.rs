use image::RgbImage;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Instant;

/// One camera frame. Immutable once published; shared by reference.
#[derive(Debug, Clone)]
pub struct Frame {
    pub timestamp: Instant,
    pub width: u32,
    pub height: u32,
    pub pixels: RgbImage,
}

impl Frame {
    pub fn new(pixels: RgbImage) -> Self {
        Self {
            timestamp: Instant::now(),
            width: pixels.width(),
            height: pixels.height(),
            pixels,
        }
    }
}

pub type SharedFrame = Arc<Frame>;

/// Single-writer, many-reader frame slot. The camera thread swaps in the
/// newest frame; readers take a cheap `Arc` snapshot.
#[derive(Default)]
pub struct FrameSlot {
    slot: RwLock<Option<SharedFrame>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, frame: Frame) {
        *self.slot.write() = Some(Arc::new(frame));
    }

    pub fn load(&self) -> Option<SharedFrame> {
        self.slot.read().clone()
    }

    pub fn has_frame(&self) -> bool {
        self.slot.read().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_starts_empty_and_keeps_latest() {
        let slot = FrameSlot::new();
        assert!(slot.load().is_none());

        slot.store(Frame::new(RgbImage::new(4, 4)));
        slot.store(Frame::new(RgbImage::new(8, 8)));

        let latest = slot.load().expect("frame stored");
        assert_eq!(latest.width, 8);
        assert!(slot.has_frame());
    }
}
