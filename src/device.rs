//! V4L2-backed frame source using the v4l crate.

use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream as V4lCaptureStream;
use v4l::video::Capture;
use v4l::Device;

use crate::traits::{CameraError, Format, FourCC, Frame, FrameMetadata, FrameSource, Result};
use std::time::Duration;

use tracing::{debug, info};

/// A V4L2 capture device driving the HAL's preview and recording paths.
///
/// Has no focus control and delivers sample data only.
pub struct V4l2Source {
    device: Device,
    card: String,
    driver: String,
    format: Format,
    buffer_count: u32,
    stream: Option<Stream<'static>>,
}

impl V4l2Source {
    /// Open a V4L2 device by index (e.g., 0 for /dev/video0).
    pub fn open(index: u32) -> Result<Self> {
        let device = Device::new(index as usize)
            .map_err(|err| CameraError::Device(format!("open /dev/video{index}: {err}")))?;

        let caps = device
            .query_caps()
            .map_err(|err| CameraError::Device(err.to_string()))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::Unsupported(format!(
                "{} cannot capture video",
                caps.card
            )));
        }
        if !caps.capabilities.contains(v4l::capability::Flags::STREAMING) {
            return Err(CameraError::Unsupported(format!(
                "{} does not support streaming I/O",
                caps.card
            )));
        }

        let fmt = device
            .format()
            .map_err(|err| CameraError::Device(err.to_string()))?;
        info!(card = %caps.card, driver = %caps.driver, "opened V4L2 device");

        Ok(Self {
            device,
            card: caps.card,
            driver: caps.driver,
            format: to_format(&fmt),
            buffer_count: 4,
            stream: None,
        })
    }

    /// Number of mmap buffers to request when streaming starts.
    #[must_use]
    pub fn with_buffer_count(mut self, count: u32) -> Self {
        self.buffer_count = count;
        self
    }

    /// Kernel driver name.
    #[must_use]
    pub fn driver(&self) -> &str {
        &self.driver
    }
}

fn to_format(fmt: &v4l::Format) -> Format {
    Format {
        width: fmt.width,
        height: fmt.height,
        fourcc: FourCC::from(fmt.fourcc),
        stride: fmt.stride,
        size: fmt.size,
    }
}

impl FrameSource for V4l2Source {
    fn name(&self) -> &str {
        &self.card
    }

    fn format(&self) -> Format {
        self.format.clone()
    }

    fn set_format(&mut self, format: &Format) -> Result<Format> {
        if self.stream.is_some() {
            return Err(CameraError::InvalidState(
                "cannot change format while streaming".to_owned(),
            ));
        }
        let mut fmt = self
            .device
            .format()
            .map_err(|err| CameraError::Device(err.to_string()))?;

        fmt.width = format.width;
        fmt.height = format.height;
        fmt.fourcc = format.fourcc.into();

        let fmt = self
            .device
            .set_format(&fmt)
            .map_err(|err| CameraError::Device(err.to_string()))?;

        self.format = to_format(&fmt);
        debug!(
            width = self.format.width,
            height = self.format.height,
            fourcc = %self.format.fourcc,
            "V4L2 format set"
        );
        Ok(self.format.clone())
    }

    fn start(&mut self) -> Result<()> {
        if self.stream.is_none() {
            let stream: Stream<'static> =
                Stream::with_buffers(&self.device, Type::VideoCapture, self.buffer_count)
                    .map_err(|err| CameraError::Device(err.to_string()))?;
            self.stream = Some(stream);
        }
        Ok(())
    }

    fn stop(&mut self) {
        // Dropping the stream issues STREAMOFF and unmaps the buffers.
        self.stream = None;
    }

    fn next_frame(&mut self) -> Result<Frame> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| CameraError::InvalidState("V4L2 device is not streaming".to_owned()))?;
        let (buf, meta) = stream
            .next()
            .map_err(|err| CameraError::Device(err.to_string()))?;

        // V4L2 timestamps are always non-negative in practice
        #[allow(clippy::cast_sign_loss)]
        let secs = meta.timestamp.sec.max(0) as u64;
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        let nanos = (meta.timestamp.usec.max(0) as u32).saturating_mul(1000);

        let used = (meta.bytesused as usize).min(buf.len());
        Ok(Frame {
            data: buf.get(..used).unwrap_or(buf).to_vec(),
            metadata: FrameMetadata {
                sequence: meta.sequence,
                timestamp: Duration::new(secs, nanos),
                bytes_used: meta.bytesused,
            },
        })
    }
}
