//! Core types, error taxonomy and the driver backend seam.

use std::time::Duration;

/// Pixel format representation (e.g., YUYV, MJPG, RGB3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Create a new `FourCC` from a 4-byte array.
    #[must_use]
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// YUYV pixel format (4:2:2 packed).
    pub const YUYV: Self = Self::new(b"YUYV");
    /// MJPEG pixel format (Motion JPEG).
    pub const MJPG: Self = Self::new(b"MJPG");
    /// NV21 pixel format (the platform default for preview callbacks).
    pub const NV21: Self = Self::new(b"NV21");
}

impl From<v4l::FourCC> for FourCC {
    fn from(fourcc: v4l::FourCC) -> Self {
        Self(fourcc.repr)
    }
}

impl From<FourCC> for v4l::FourCC {
    fn from(fourcc: FourCC) -> Self {
        Self::new(&fourcc.0)
    }
}

impl std::fmt::Display for FourCC {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in self.0 {
            write!(f, "{}", char::from(byte))?;
        }
        Ok(())
    }
}

/// Video format specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Format {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format.
    pub fourcc: FourCC,
    /// Bytes per line (stride).
    pub stride: u32,
    /// Total frame size in bytes.
    pub size: u32,
}

impl Format {
    /// Create a new packed 4:2:2 format specification.
    #[must_use]
    pub const fn new(width: u32, height: u32, fourcc: FourCC) -> Self {
        let stride = width * 2;
        let size = stride * height;
        Self {
            width,
            height,
            fourcc,
            stride,
            size,
        }
    }

    /// Frame size in bytes as a buffer length.
    #[must_use]
    pub const fn byte_len(&self) -> usize {
        self.size as usize
    }
}

/// Metadata for a captured frame.
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    /// Frame sequence number.
    pub sequence: u32,
    /// Capture timestamp.
    pub timestamp: Duration,
    /// Actual bytes used in the frame buffer.
    pub bytes_used: u32,
}

/// A frame produced by a [`FrameSource`].
#[derive(Debug, Clone)]
pub struct Frame {
    /// Raw frame data.
    pub data: Vec<u8>,
    /// Frame metadata.
    pub metadata: FrameMetadata,
}

impl Frame {
    /// Get RGB values for a pixel at the specified coordinates.
    ///
    /// Assumes YUYV layout: each pair of pixels shares one U and one V sample.
    /// Returns `None` when the coordinates fall outside the frame data.
    #[must_use]
    pub fn pixel_at(&self, x: u32, y: u32, width: u32) -> Option<(u8, u8, u8)> {
        yuyv_pixel(&self.data, x, y, width)
    }
}

/// Decode one pixel from a packed YUYV byte slice.
#[must_use]
pub fn yuyv_pixel(data: &[u8], x: u32, y: u32, width: u32) -> Option<(u8, u8, u8)> {
    let pair_x = x & !1;
    let offset = ((y * width + pair_x) * 2) as usize;

    if offset + 3 >= data.len() {
        return None;
    }

    let y_val = if x % 2 == 0 {
        *data.get(offset)?
    } else {
        *data.get(offset + 2)?
    };
    let u = *data.get(offset + 1)?;
    let v = *data.get(offset + 3)?;

    Some(yuv_to_rgb(y_val, u, v))
}

/// Convert YUV values to RGB (ITU-R BT.601), clamped to 0-255.
#[must_use]
#[allow(clippy::many_single_char_names)]
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let y_f = f32::from(y);
    let u_f = f32::from(u) - 128.0;
    let v_f = f32::from(v) - 128.0;

    let r = 1.402f32.mul_add(v_f, y_f);
    let g = 0.714_14f32.mul_add(-v_f, 0.344_14f32.mul_add(-u_f, y_f));
    let b = 1.772f32.mul_add(u_f, y_f);

    let clamp = |val: f32| -> u8 {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        {
            val.clamp(0.0, 255.0) as u8
        }
    };

    (clamp(r), clamp(g), clamp(b))
}

/// Error type for camera HAL operations.
///
/// The first four variants are the protocol's error taxonomy. The remaining
/// ones carry backend and sink failures, which callers may retry.
#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    /// Operation is illegal in the current device state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Malformed or unsupported argument.
    #[error("bad value: {0}")]
    BadValue(String),
    /// Capability not present on this device.
    #[error("unsupported: {0}")]
    Unsupported(String),
    /// Memory provider could not satisfy the request.
    #[error("allocation of {requested} bytes failed ({available} bytes available)")]
    AllocationFailure {
        /// Bytes requested.
        requested: usize,
        /// Bytes still available in the provider.
        available: usize,
    },
    /// Preview sink has no free buffer to hand out.
    #[error("no preview buffer available")]
    BufferUnavailable,
    /// Backend (sensor) failure.
    #[error("device error: {0}")]
    Device(String),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CameraError {
    /// Whether the caller may retry after corrective action.
    ///
    /// `InvalidState` is a call-site bug and `Unsupported` a permanent
    /// capability gap; neither should be retried.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::AllocationFailure { .. } | Self::BufferUnavailable | Self::Device(_) | Self::Io(_)
        )
    }

    /// Negative errno-style status carried by asynchronous error notifications.
    #[must_use]
    pub const fn status_code(&self) -> i32 {
        match self {
            Self::InvalidState(_) => -38,
            Self::BadValue(_) => -22,
            Self::Unsupported(_) => -95,
            Self::AllocationFailure { .. } => -12,
            Self::BufferUnavailable => -16,
            Self::Device(_) | Self::Io(_) => -5,
        }
    }
}

/// Result type for camera operations.
pub type Result<T> = std::result::Result<T, CameraError>;

/// Focus mechanism of a backend that supports autofocus.
pub trait AutoFocus {
    /// Start a focus sweep, superseding any sweep in progress.
    fn begin(&mut self) -> Result<()>;

    /// Finish the current sweep. Returns whether focus was achieved.
    fn settle(&mut self) -> Result<bool>;

    /// Return the lens to its default position.
    fn reset(&mut self);
}

/// The sensor side of a driver: where preview and recording frames come from.
///
/// Optional capabilities are expressed as variants rather than optional
/// entry points: a backend without autofocus returns `None` from
/// [`FrameSource::autofocus`].
pub trait FrameSource: Send {
    /// Human readable backend name, reported by `dump`.
    fn name(&self) -> &str;

    /// Get current format.
    fn format(&self) -> Format;

    /// Set capture format. Returns the actual format set by the backend.
    fn set_format(&mut self, format: &Format) -> Result<Format>;

    /// Preview sizes the backend can produce.
    fn supported_sizes(&self) -> Vec<(u32, u32)> {
        let format = self.format();
        vec![(format.width, format.height)]
    }

    /// Begin streaming.
    fn start(&mut self) -> Result<()>;

    /// Stop streaming. Must be safe to call when not streaming.
    fn stop(&mut self);

    /// Produce the next frame. Only valid between `start` and `stop`.
    fn next_frame(&mut self) -> Result<Frame>;

    /// Focus control, if the backend has one.
    fn autofocus(&mut self) -> Option<&mut dyn AutoFocus> {
        None
    }

    /// Whether recording frames may carry metadata descriptors instead of samples.
    fn supports_metadata_buffers(&self) -> bool {
        false
    }
}
