//! Protocol conformance checks and frame content validators.
//!
//! [`run_conformance`] drives a fresh device over any [`FrameSource`] through
//! the ordering and ownership rules a driver must honour. The validators
//! check captured frames against known test patterns, which is useful with
//! virtual cameras.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use crate::callbacks::Callbacks;
use crate::hal::{CameraHal, HalConfig};
use crate::memory::HeapMemoryProvider;
use crate::msg::MsgType;
use crate::preview::{BufferQueue, Geometry};
use crate::traits::{CameraError, Format, Frame, FrameSource, Result};

/// Outcome of a single conformance check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    /// Short check identifier.
    pub name: &'static str,
    /// Whether the device behaved as required.
    pub passed: bool,
    /// What was observed.
    pub detail: String,
}

/// All checks run against one backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConformanceReport {
    /// Individual results, in run order.
    pub checks: Vec<Check>,
}

impl ConformanceReport {
    /// Whether every check passed.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|check| check.passed)
    }

    /// The checks that failed.
    pub fn failures(&self) -> impl Iterator<Item = &Check> {
        self.checks.iter().filter(|check| !check.passed)
    }

    fn record(&mut self, name: &'static str, passed: bool, detail: String) {
        if passed {
            info!(check = name, "conformance check passed");
        } else {
            warn!(check = name, %detail, "conformance check failed");
        }
        self.checks.push(Check {
            name,
            passed,
            detail,
        });
    }
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for check in &self.checks {
            let mark = if check.passed { "ok  " } else { "FAIL" };
            writeln!(f, "{mark} {}: {}", check.name, check.detail)?;
        }
        Ok(())
    }
}

type Counter = Arc<AtomicUsize>;

fn open_counting<S: FrameSource>(source: S) -> Result<(CameraHal<S, Counter>, Counter)> {
    let videos: Counter = Arc::new(AtomicUsize::new(0));
    let mut hal = CameraHal::open(source, HalConfig::default())?;
    hal.set_callbacks(
        Callbacks::new(Arc::new(HeapMemoryProvider::default()), Arc::clone(&videos))
            .on_data_timestamp(|_, msg, _, videos: &Counter| {
                if msg == MsgType::VIDEO_FRAME {
                    videos.fetch_add(1, Ordering::SeqCst);
                }
            }),
    )?;
    Ok((hal, videos))
}

fn queue_for(format: &Format) -> Arc<std::sync::Mutex<BufferQueue>> {
    BufferQueue::new(
        Geometry {
            width: format.width,
            height: format.height,
            format: format.fourcc,
        },
        2,
    )
    .into_shared()
}

/// Run every conformance check, opening a fresh backend from `factory` for each.
///
/// # Errors
///
/// Returns an error only when a backend cannot be opened or set up; protocol
/// violations are reported in the returned [`ConformanceReport`].
pub fn run_conformance<S, F>(mut factory: F) -> Result<ConformanceReport>
where
    S: FrameSource,
    F: FnMut() -> Result<S>,
{
    let mut report = ConformanceReport::default();
    check_recording_before_preview(&mut report, factory()?)?;
    check_cancel_picture_noop(&mut report, factory()?)?;
    check_gate_and_query(&mut report, factory()?)?;
    check_video_frame_handoff(&mut report, factory()?)?;
    check_release_reclaims(&mut report, factory()?)?;
    Ok(report)
}

fn check_recording_before_preview<S: FrameSource>(
    report: &mut ConformanceReport,
    source: S,
) -> Result<()> {
    let (mut hal, _) = open_counting(source)?;
    let before = hal.state();
    let outcome = hal.start_recording();
    report.record(
        "recording-before-preview",
        matches!(outcome, Err(CameraError::InvalidState(_))) && hal.state() == before,
        format!("start_recording from {before}: {outcome:?}"),
    );
    hal.release();
    Ok(())
}

fn check_cancel_picture_noop<S: FrameSource>(
    report: &mut ConformanceReport,
    source: S,
) -> Result<()> {
    let (mut hal, _) = open_counting(source)?;
    let before = hal.state();
    let outcome = hal.cancel_picture();
    report.record(
        "cancel-picture-noop",
        outcome.is_ok() && hal.state() == before,
        format!("cancel_picture with no capture: {outcome:?}"),
    );
    hal.release();
    Ok(())
}

fn check_gate_and_query<S: FrameSource>(report: &mut ConformanceReport, source: S) -> Result<()> {
    let (mut hal, _) = open_counting(source)?;
    hal.enable_msg_type(MsgType::ERROR);
    let partial = hal.msg_type_enabled(MsgType::ERROR | MsgType::VIDEO_FRAME);
    hal.enable_msg_type(MsgType::VIDEO_FRAME);
    let full = hal.msg_type_enabled(MsgType::ERROR | MsgType::VIDEO_FRAME);
    report.record(
        "gate-and-query",
        !partial && full,
        format!("one of two enabled: {partial}, both enabled: {full}"),
    );
    hal.release();
    Ok(())
}

fn check_video_frame_handoff<S: FrameSource>(
    report: &mut ConformanceReport,
    source: S,
) -> Result<()> {
    let format = source.format();
    let (mut hal, videos) = open_counting(source)?;
    hal.set_preview_window(Some(queue_for(&format)))?;
    hal.enable_msg_type(MsgType::VIDEO_FRAME);
    hal.start_preview()?;
    hal.start_recording()?;

    for _ in 0..3 {
        hal.pump_frame()?;
    }
    let before_disable = videos.load(Ordering::SeqCst);
    hal.disable_msg_type(MsgType::VIDEO_FRAME);
    for _ in 0..2 {
        hal.pump_frame()?;
    }
    let after_disable = videos.load(Ordering::SeqCst);
    let driver_managed = hal.recording_frames().driver_managed();

    report.record(
        "video-frame-handoff",
        before_disable == 3 && after_disable == 3 && driver_managed == 3,
        format!(
            "delivered {before_disable} then {} more after disable; \
             {driver_managed} driver-managed",
            after_disable.saturating_sub(before_disable)
        ),
    );
    hal.release();
    Ok(())
}

fn check_release_reclaims<S: FrameSource>(
    report: &mut ConformanceReport,
    source: S,
) -> Result<()> {
    let format = source.format();
    let queue = queue_for(&format);
    let (mut hal, _) = open_counting(source)?;
    hal.set_preview_window(Some(queue.clone()))?;
    hal.enable_msg_type(MsgType::ALL);
    hal.start_preview()?;
    hal.start_recording()?;
    hal.pump_frame()?;
    hal.take_picture()?;
    hal.release();

    let dequeued = queue
        .lock()
        .map(|queue| queue.dequeued_count())
        .map_err(|_| CameraError::Device("preview queue lock poisoned".to_owned()))?;
    let pending = hal.pending_jobs();
    let outstanding = hal.recording_frames().consumer_owned();
    report.record(
        "release-reclaims",
        dequeued == 0 && pending == 0 && outstanding == 0 && hal.state().is_released(),
        format!("after release: {dequeued} dequeued, {pending} pending, {outstanding} held frames"),
    );
    Ok(())
}

/// Expected RGB values for SMPTE color bars (8 bars).
///
/// Colors in order: White, Yellow, Cyan, Green, Magenta, Red, Blue, Black
const SMPTE_COLOR_BARS: [(u8, u8, u8); 8] = [
    (235, 235, 235),
    (235, 235, 11),
    (12, 236, 237),
    (13, 237, 13),
    (237, 13, 237),
    (238, 14, 13),
    (15, 15, 239),
    (16, 16, 16),
];

/// Tolerance for RGB color matching (accounts for YUV->RGB conversion errors).
const COLOR_TOLERANCE: u32 = 15;

/// Validates that a frame contains the SMPTE color bar pattern.
///
/// Samples the center of each of the 8 vertical stripes.
///
/// # Errors
///
/// Returns `BadValue` if a pixel cannot be read or any bar does not match
/// its expected color within tolerance.
pub fn validate_color_bars(frame: &Frame, format: &Format) -> Result<()> {
    let width = format.width;
    let bar_width = width / 8;
    let center_y = format.height / 2;

    for (bar_idx, expected_rgb) in (0u32..).zip(SMPTE_COLOR_BARS.iter()) {
        let sample_x = (bar_idx * bar_width) + (bar_width / 2);

        let actual_rgb = frame.pixel_at(sample_x, center_y, width).ok_or_else(|| {
            CameraError::BadValue(format!("no pixel at ({sample_x}, {center_y})"))
        })?;

        if !colors_match(actual_rgb, *expected_rgb, COLOR_TOLERANCE) {
            return Err(CameraError::BadValue(format!(
                "color bar {bar_idx} mismatch at ({sample_x}, {center_y}): \
                 expected RGB{expected_rgb:?}, got RGB{actual_rgb:?}"
            )));
        }
    }

    Ok(())
}

/// Validates that luminance rises left to right across the middle row.
///
/// # Errors
///
/// Returns `BadValue` if luminance drops anywhere or changes too little
/// overall (a solid frame).
pub fn validate_gradient(frame: &Frame, format: &Format) -> Result<()> {
    let center_y = format.height / 2;
    let mut first: Option<f32> = None;
    let mut prev: Option<f32> = None;

    for x in (0..format.width).step_by(10) {
        let (r, g, b) = frame
            .pixel_at(x, center_y, format.width)
            .ok_or_else(|| CameraError::BadValue(format!("no pixel at ({x}, {center_y})")))?;

        // Rec. 601 luma
        let luminance = 0.114f32.mul_add(
            f32::from(b),
            0.587f32.mul_add(f32::from(g), 0.299 * f32::from(r)),
        );

        if let Some(prev) = prev {
            if luminance < prev - 1.0 {
                return Err(CameraError::BadValue(format!(
                    "gradient drops at x={x}: {luminance} < {prev}"
                )));
            }
        }
        first.get_or_insert(luminance);
        prev = Some(luminance);
    }

    if let (Some(first), Some(last)) = (first, prev) {
        if last - first < 50.0 {
            return Err(CameraError::BadValue(format!(
                "luminance only rises by {} across the frame",
                last - first
            )));
        }
    }

    Ok(())
}

/// Validates that frame sequence numbers increment by exactly 1.
///
/// # Errors
///
/// Returns `BadValue` if `frames` is empty or has a gap.
pub fn validate_frame_sequence(frames: &[Frame]) -> Result<()> {
    if frames.is_empty() {
        return Err(CameraError::BadValue(
            "cannot validate an empty frame sequence".to_owned(),
        ));
    }

    for (i, pair) in frames.windows(2).enumerate() {
        let [prev, curr] = pair else { continue };
        let expected = prev.metadata.sequence.wrapping_add(1);
        if curr.metadata.sequence != expected {
            return Err(CameraError::BadValue(format!(
                "frame sequence gap at index {}: expected {expected}, got {}",
                i + 1,
                curr.metadata.sequence
            )));
        }
    }

    Ok(())
}

fn colors_match(actual: (u8, u8, u8), expected: (u8, u8, u8), tolerance: u32) -> bool {
    let (ar, ag, ab) = actual;
    let (er, eg, eb) = expected;
    u32::from(ar.abs_diff(er)) <= tolerance
        && u32::from(ag.abs_diff(eg)) <= tolerance
        && u32::from(ab.abs_diff(eb)) <= tolerance
}
