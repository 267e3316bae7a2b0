//! Grayscale frame type and region cropping.

use hostel_core::BoundingBox;
use image::{DynamicImage, GrayImage};

/// A captured grayscale camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub sequence: u32,
}

impl Frame {
    /// Convert any decoded image to an 8-bit grayscale frame.
    pub fn from_image(image: DynamicImage, sequence: u32) -> Self {
        let gray = image.into_luma8();
        let (width, height) = gray.dimensions();
        Self {
            data: gray.into_raw(),
            width,
            height,
            sequence,
        }
    }

    /// Average pixel brightness (0 to 255).
    pub fn avg_brightness(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|&b| b as f32).sum::<f32>() / self.data.len() as f32
    }

    /// Copy the region under `face`, clamped to the frame. `None` if the
    /// clamped region is empty or the pixel buffer is short.
    pub fn crop(&self, face: &BoundingBox) -> Option<GrayImage> {
        let w = self.width as usize;
        if self.data.len() < w * self.height as usize {
            return None;
        }
        let (x1, y1, x2, y2) = face.clamp_to(self.width, self.height);
        if x2 <= x1 || y2 <= y1 {
            return None;
        }

        let mut out = Vec::with_capacity(((x2 - x1) * (y2 - y1)) as usize);
        for y in y1 as usize..y2 as usize {
            let row = y * w;
            out.extend_from_slice(&self.data[row + x1 as usize..row + x2 as usize]);
        }
        GrayImage::from_raw(x2 - x1, y2 - y1, out)
    }
}
