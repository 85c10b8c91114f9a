//! Synthetic sensor for running the HAL without hardware.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::traits::{
    AutoFocus, CameraError, Format, FourCC, Frame, FrameMetadata, FrameSource, Result,
};

/// Test pattern types for mock frame generation.
#[derive(Debug, Clone, Copy)]
pub enum TestPattern {
    /// SMPTE color bars pattern.
    ColorBars,
    /// Horizontal gradient from dark to light.
    Gradient,
    /// Solid color with specified Y, U, V values.
    Solid(u8, u8, u8),
}

#[derive(Debug)]
struct Shared {
    fail_frames: AtomicU32,
    focus_succeeds: AtomicBool,
    focus_sweeps: AtomicU32,
    focus_resets: AtomicU32,
}

/// Runtime knobs of a [`MockSensor`] that stay reachable after the sensor
/// has been moved into a device.
#[derive(Debug, Clone)]
pub struct MockControl {
    shared: Arc<Shared>,
}

impl MockControl {
    /// Make the next `count` frame reads fail with a device error.
    pub fn fail_next_frames(&self, count: u32) {
        self.shared.fail_frames.store(count, Ordering::SeqCst);
    }

    /// Choose whether focus sweeps report success.
    pub fn set_focus_outcome(&self, succeeds: bool) {
        self.shared.focus_succeeds.store(succeeds, Ordering::SeqCst);
    }

    /// Focus sweeps started so far.
    #[must_use]
    pub fn focus_sweeps(&self) -> u32 {
        self.shared.focus_sweeps.load(Ordering::SeqCst)
    }

    /// Times the lens was returned to its default position.
    #[must_use]
    pub fn focus_resets(&self) -> u32 {
        self.shared.focus_resets.load(Ordering::SeqCst)
    }
}

/// Lens of a mock sensor with autofocus.
#[derive(Debug)]
pub struct MockFocus {
    shared: Arc<Shared>,
    sweeping: bool,
}

impl AutoFocus for MockFocus {
    fn begin(&mut self) -> Result<()> {
        self.sweeping = true;
        self.shared.focus_sweeps.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn settle(&mut self) -> Result<bool> {
        if !self.sweeping {
            return Err(CameraError::InvalidState("no focus sweep running".to_owned()));
        }
        self.sweeping = false;
        Ok(self.shared.focus_succeeds.load(Ordering::SeqCst))
    }

    fn reset(&mut self) {
        self.sweeping = false;
        self.shared.focus_resets.fetch_add(1, Ordering::SeqCst);
    }
}

/// Mock sensor generating YUYV test patterns.
#[derive(Debug)]
pub struct MockSensor {
    format: Format,
    sizes: Vec<(u32, u32)>,
    pattern: TestPattern,
    frame_count: u32,
    streaming: bool,
    focus: Option<MockFocus>,
    metadata_buffers: bool,
    shared: Arc<Shared>,
}

impl Default for MockSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSensor {
    /// Create a fixed-focus 640x480 color bar sensor.
    #[must_use]
    pub fn new() -> Self {
        Self {
            format: Format::new(640, 480, FourCC::YUYV),
            sizes: vec![(640, 480), (320, 240), (160, 120)],
            pattern: TestPattern::ColorBars,
            frame_count: 0,
            streaming: false,
            focus: None,
            metadata_buffers: false,
            shared: Arc::new(Shared {
                fail_frames: AtomicU32::new(0),
                focus_succeeds: AtomicBool::new(true),
                focus_sweeps: AtomicU32::new(0),
                focus_resets: AtomicU32::new(0),
            }),
        }
    }

    /// Set the format for this sensor.
    #[must_use]
    pub fn with_format(mut self, format: Format) -> Self {
        if !self.sizes.contains(&(format.width, format.height)) {
            self.sizes.push((format.width, format.height));
        }
        self.format = format;
        self
    }

    /// Set the generated pattern.
    #[must_use]
    pub fn with_pattern(mut self, pattern: TestPattern) -> Self {
        self.pattern = pattern;
        self
    }

    /// Give the sensor a focus mechanism.
    #[must_use]
    pub fn with_autofocus(mut self) -> Self {
        self.focus = Some(MockFocus {
            shared: Arc::clone(&self.shared),
            sweeping: false,
        });
        self
    }

    /// Allow recording frames to carry metadata descriptors.
    #[must_use]
    pub fn with_metadata_buffers(mut self) -> Self {
        self.metadata_buffers = true;
        self
    }

    /// Handle for adjusting the sensor after it has been handed to a device.
    #[must_use]
    pub fn control(&self) -> MockControl {
        MockControl {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl FrameSource for MockSensor {
    fn name(&self) -> &str {
        "mock"
    }

    fn format(&self) -> Format {
        self.format.clone()
    }

    fn set_format(&mut self, format: &Format) -> Result<Format> {
        if !self.sizes.contains(&(format.width, format.height)) {
            return Err(CameraError::BadValue(format!(
                "{}x{} not produced by the mock sensor",
                format.width, format.height
            )));
        }
        self.format = Format::new(format.width, format.height, FourCC::YUYV);
        Ok(self.format.clone())
    }

    fn supported_sizes(&self) -> Vec<(u32, u32)> {
        self.sizes.clone()
    }

    fn start(&mut self) -> Result<()> {
        self.streaming = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.streaming = false;
    }

    fn next_frame(&mut self) -> Result<Frame> {
        if !self.streaming {
            return Err(CameraError::InvalidState("mock sensor is not streaming".to_owned()));
        }
        let injected = self
            .shared
            .fail_frames
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if injected.is_ok() {
            return Err(CameraError::Device("injected frame failure".to_owned()));
        }

        let data = generate_test_frame(&self.format, self.pattern);
        let seq = self.frame_count;
        self.frame_count += 1;

        Ok(Frame {
            data,
            metadata: FrameMetadata {
                sequence: seq,
                timestamp: Duration::from_millis(u64::from(seq) * 33), // ~30fps
                bytes_used: self.format.size,
            },
        })
    }

    fn autofocus(&mut self) -> Option<&mut dyn AutoFocus> {
        self.focus.as_mut().map(|focus| focus as &mut dyn AutoFocus)
    }

    fn supports_metadata_buffers(&self) -> bool {
        self.metadata_buffers
    }
}

/// Generate test frame data based on pattern.
pub fn generate_test_frame(format: &Format, pattern: TestPattern) -> Vec<u8> {
    let size = (format.width * format.height * 2) as usize; // YUYV = 2 bytes/pixel
    let mut data = vec![0u8; size];

    match pattern {
        TestPattern::ColorBars => generate_color_bars(&mut data, format.width),
        TestPattern::Gradient => generate_gradient(&mut data, format.width),
        TestPattern::Solid(y, u, v) => fill_pairs(&mut data, |_| (y, u, v)),
    }

    data
}

/// Write each YUYV pixel pair, `pixel_of` maps the pair index to (Y, U, V).
fn fill_pairs<F: Fn(usize) -> (u8, u8, u8)>(data: &mut [u8], pixel_of: F) {
    for (pair, chunk) in data.chunks_exact_mut(4).enumerate() {
        let (y, u, v) = pixel_of(pair);
        chunk.copy_from_slice(&[y, u, y, v]);
    }
}

fn generate_color_bars(data: &mut [u8], width: u32) {
    // White, Yellow, Cyan, Green, Magenta, Red, Blue, Black
    const BARS: [(u8, u8, u8); 8] = [
        (235, 128, 128),
        (210, 16, 146),
        (170, 166, 16),
        (145, 54, 34),
        (106, 202, 222),
        (81, 90, 240),
        (41, 240, 110),
        (16, 128, 128),
    ];

    let pairs_per_row = (width / 2).max(1) as usize;
    let bar_width = (width / 8).max(1) as usize;
    fill_pairs(data, |pair| {
        let x = (pair % pairs_per_row) * 2;
        let bar = (x / bar_width).min(BARS.len() - 1);
        BARS.get(bar).copied().unwrap_or((16, 128, 128))
    });
}

fn generate_gradient(data: &mut [u8], width: u32) {
    let pairs_per_row = (width / 2).max(1) as usize;
    let width = width.max(1) as usize;
    fill_pairs(data, |pair| {
        let x = (pair % pairs_per_row) * 2;
        #[allow(clippy::cast_possible_truncation)]
        let y = ((x * 255) / width) as u8;
        (y, 128, 128)
    });
}
