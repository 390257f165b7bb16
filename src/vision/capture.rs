//! capture.rs
//! Capture device seam and the backends behind it.
//! - SyntheticCapture: deterministic test-pattern generator with optional noise.
//! - OpenCvCapture: V4L-class hardware via opencv (feature "opencv-backend").
//!
//! Raw frames leave every backend as interleaved BGR bytes, row-major.

use log::debug;
use rand::random_range;

use crate::config::CameraSpec;
use crate::error::{BridgeError, Result};

/// One untransformed frame as delivered by a device: height x width x 3,
/// interleaved BGR, one byte per channel.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// A frame source with an explicit open/release lifecycle. `open` is
/// idempotent; reading from a released device fails with DeviceUnavailable.
pub trait CaptureDevice: Send {
    fn open(&mut self) -> Result<()>;

    fn read_frame(&mut self) -> Result<RawFrame>;

    fn release(&mut self);
}

/// Pattern generator standing in for a physical camera. Every read embeds its
/// sequence number in the first pixel so consumers can assert ordering, and a
/// moving gradient fills the rest.
pub struct SyntheticCapture {
    width: u32,
    height: u32,
    opened: bool,
    seq: u64,
    noisy: bool,
    fail_after: Option<u64>,
}

impl SyntheticCapture {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            opened: false,
            seq: 0,
            noisy: false,
            fail_after: None,
        }
    }

    /// Adds small random brightness noise, as a real sensor would show.
    pub fn with_noise(mut self) -> Self {
        self.noisy = true;
        self
    }

    /// Reads beyond the given count fail, for exercising retry paths.
    pub fn failing_after(mut self, reads: u64) -> Self {
        self.fail_after = Some(reads);
        self
    }
}

impl CaptureDevice for SyntheticCapture {
    fn open(&mut self) -> Result<()> {
        self.opened = true;
        Ok(())
    }

    fn read_frame(&mut self) -> Result<RawFrame> {
        if !self.opened {
            return Err(BridgeError::DeviceUnavailable(
                "synthetic device not opened".to_string(),
            ));
        }
        if let Some(cap) = self.fail_after {
            if self.seq >= cap {
                return Err(BridgeError::CaptureFailed(
                    "synthetic device fault".to_string(),
                ));
            }
        }

        let marker = (self.seq & 0xff) as u8;
        let mut data = Vec::with_capacity((self.width * self.height * 3) as usize);
        for y in 0..self.height {
            for x in 0..self.width {
                let mut value = ((x + y + self.seq as u32) % 256) as u8;
                if self.noisy {
                    value = value.saturating_add(random_range(0..8u8));
                }
                if x == 0 && y == 0 {
                    value = marker;
                }
                // Identical channels keep the marker visible after BGR->RGB
                data.extend_from_slice(&[value, value, value]);
            }
        }

        self.seq += 1;
        Ok(RawFrame {
            width: self.width,
            height: self.height,
            data,
        })
    }

    fn release(&mut self) {
        self.opened = false;
        debug!("synthetic device released after {} reads", self.seq);
    }
}

#[cfg(feature = "opencv-backend")]
pub use self::opencv_backend::OpenCvCapture;

#[cfg(feature = "opencv-backend")]
mod opencv_backend {
    use opencv::{
        core::Mat,
        prelude::*,
        videoio::{self, VideoCapture},
    };

    use super::{CaptureDevice, RawFrame};
    use crate::error::{BridgeError, Result};

    /// Hardware camera addressed by device index.
    pub struct OpenCvCapture {
        index: i32,
        capture: Option<VideoCapture>,
    }

    impl OpenCvCapture {
        pub fn new(index: u32) -> Self {
            Self {
                index: index as i32,
                capture: None,
            }
        }
    }

    impl CaptureDevice for OpenCvCapture {
        fn open(&mut self) -> Result<()> {
            if self.capture.is_some() {
                return Ok(());
            }
            let capture = VideoCapture::new(self.index, videoio::CAP_ANY).map_err(|e| {
                BridgeError::DeviceUnavailable(format!(
                    "failed to open camera {}: {e}",
                    self.index
                ))
            })?;
            let opened = capture.is_opened().map_err(|e| {
                BridgeError::DeviceUnavailable(format!("camera {} state: {e}", self.index))
            })?;
            if !opened {
                return Err(BridgeError::DeviceUnavailable(format!(
                    "camera {} failed to open",
                    self.index
                )));
            }
            self.capture = Some(capture);
            Ok(())
        }

        fn read_frame(&mut self) -> Result<RawFrame> {
            let capture = self.capture.as_mut().ok_or_else(|| {
                BridgeError::DeviceUnavailable(format!("camera {} not opened", self.index))
            })?;

            let mut mat = Mat::default();
            let grabbed = capture
                .read(&mut mat)
                .map_err(|e| BridgeError::CaptureFailed(format!("read error: {e}")))?;
            if !grabbed || mat.rows() <= 0 || mat.cols() <= 0 {
                return Err(BridgeError::CaptureFailed(format!(
                    "camera {} returned an empty frame",
                    self.index
                )));
            }
            if mat.channels() != 3 {
                return Err(BridgeError::CaptureFailed(format!(
                    "camera {} returned {} channels, expected 3",
                    self.index,
                    mat.channels()
                )));
            }

            let data = mat
                .data_bytes()
                .map_err(|e| BridgeError::CaptureFailed(format!("frame access: {e}")))?
                .to_vec();
            Ok(RawFrame {
                width: mat.cols() as u32,
                height: mat.rows() as u32,
                data,
            })
        }

        fn release(&mut self) {
            self.capture = None;
        }
    }
}

/// Default backend for a camera spec: hardware when the opencv backend is
/// compiled in, synthetic otherwise.
#[cfg(feature = "opencv-backend")]
pub fn default_device(spec: &CameraSpec) -> Box<dyn CaptureDevice> {
    Box::new(OpenCvCapture::new(spec.index))
}

#[cfg(not(feature = "opencv-backend"))]
pub fn default_device(_spec: &CameraSpec) -> Box<dyn CaptureDevice> {
    Box::new(SyntheticCapture::new(640, 480).with_noise())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_before_open_fails() {
        let mut device = SyntheticCapture::new(4, 4);
        let err = device.read_frame().unwrap_err();
        assert!(matches!(err, BridgeError::DeviceUnavailable(_)));
    }

    #[test]
    fn test_read_yields_bgr_bytes() {
        let mut device = SyntheticCapture::new(8, 6);
        device.open().unwrap();
        let frame = device.read_frame().unwrap();
        assert_eq!(frame.width, 8);
        assert_eq!(frame.height, 6);
        assert_eq!(frame.data.len(), 8 * 6 * 3);
    }

    #[test]
    fn test_sequence_marker_advances() {
        let mut device = SyntheticCapture::new(4, 4);
        device.open().unwrap();
        let first = device.read_frame().unwrap();
        let second = device.read_frame().unwrap();
        assert_eq!(first.data[0], 0);
        assert_eq!(second.data[0], 1);
    }

    #[test]
    fn test_release_then_reopen() {
        let mut device = SyntheticCapture::new(4, 4);
        device.open().unwrap();
        device.release();
        assert!(device.read_frame().is_err());
        device.open().unwrap();
        assert!(device.read_frame().is_ok());
    }

    #[test]
    fn test_fault_injection_trips_after_cap() {
        let mut device = SyntheticCapture::new(4, 4).failing_after(2);
        device.open().unwrap();
        assert!(device.read_frame().is_ok());
        assert!(device.read_frame().is_ok());
        let err = device.read_frame().unwrap_err();
        assert!(matches!(err, BridgeError::CaptureFailed(_)));
    }
}
