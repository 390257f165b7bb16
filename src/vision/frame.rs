//! frame.rs
//! Policy-ready frames and the raw-to-policy transform pipeline.
//!
//! Transform order is fixed: BGR->RGB, optional horizontal flip, optional
//! crop, aspect-preserving resize with centered zero padding, channel-first
//! reorder. Output stays u8 throughout.

use image::{RgbImage, imageops, imageops::FilterType};

use crate::config::CropRect;
use crate::error::{BridgeError, Result};
use crate::vision::capture::RawFrame;

/// One transformed frame: 3 x height x width, u8, RGB planes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Frame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = (width as usize) * (height as usize) * 3;
        if data.len() != expected {
            return Err(BridgeError::ShapeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Planes in channel-first order: all R, then all G, then all B.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Value at (channel, x, y); channel 0 is R.
    #[inline]
    pub fn sample(&self, channel: usize, x: u32, y: u32) -> u8 {
        let plane = (self.width as usize) * (self.height as usize);
        self.data[channel * plane + (y * self.width + x) as usize]
    }
}

/// Runs the full transform pipeline on one raw BGR frame.
pub fn transform_raw(
    raw: &RawFrame,
    flipped: bool,
    crop: Option<&CropRect>,
    target_width: u32,
    target_height: u32,
) -> Result<Frame> {
    let expected = (raw.width as usize) * (raw.height as usize) * 3;
    if raw.data.len() != expected {
        return Err(BridgeError::CaptureFailed(format!(
            "raw frame has {} bytes, expected {} for {}x{}",
            raw.data.len(),
            expected,
            raw.width,
            raw.height
        )));
    }

    let mut rgb = Vec::with_capacity(raw.data.len());
    for px in raw.data.chunks_exact(3) {
        rgb.extend_from_slice(&[px[2], px[1], px[0]]);
    }
    let mut img = RgbImage::from_raw(raw.width, raw.height, rgb)
        .ok_or_else(|| BridgeError::CaptureFailed("raw frame buffer mismatch".to_string()))?;

    if flipped {
        img = imageops::flip_horizontal(&img);
    }

    if let Some(rect) = crop {
        // Rects are validated against config, not the live frame; clamp here
        let x0 = rect.min_x.min(img.width());
        let y0 = rect.min_y.min(img.height());
        let x1 = rect.max_x.min(img.width());
        let y1 = rect.max_y.min(img.height());
        if x1 <= x0 || y1 <= y0 {
            return Err(BridgeError::CaptureFailed(format!(
                "crop rectangle lies outside the {}x{} frame",
                img.width(),
                img.height()
            )));
        }
        img = imageops::crop_imm(&img, x0, y0, x1 - x0, y1 - y0).to_image();
    }

    let img = resize_with_pad(img, target_width, target_height);

    let (width, height) = img.dimensions();
    let plane = (width as usize) * (height as usize);
    let mut data = vec![0u8; plane * 3];
    for (i, px) in img.as_raw().chunks_exact(3).enumerate() {
        data[i] = px[0];
        data[plane + i] = px[1];
        data[2 * plane + i] = px[2];
    }
    Frame::new(width, height, data)
}

/// Resizes preserving aspect ratio, bilinear, centering the result on a black
/// canvas of the target size. A frame already at the target passes through.
fn resize_with_pad(img: RgbImage, target_width: u32, target_height: u32) -> RgbImage {
    let (width, height) = img.dimensions();
    if width == target_width && height == target_height {
        return img;
    }

    let ratio = f64::max(
        width as f64 / target_width as f64,
        height as f64 / target_height as f64,
    );
    let resized_w = ((width as f64 / ratio).floor() as u32).max(1);
    let resized_h = ((height as f64 / ratio).floor() as u32).max(1);
    let resized = imageops::resize(&img, resized_w, resized_h, FilterType::Triangle);

    let mut canvas = RgbImage::new(target_width, target_height);
    let dx = ((target_width - resized_w) / 2) as i64;
    let dy = ((target_height - resized_h) / 2) as i64;
    imageops::overlay(&mut canvas, &resized, dx, dy);
    canvas
}
