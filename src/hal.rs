//! The camera device handle and its operation table.
//!
//! Consumer-facing operations are synchronous and return quickly. Long
//! running work (focus, capture) is queued and completed by the driver side
//! through [`CameraHal::process_pending`]; frames are produced by
//! [`CameraHal::pump_frame`]. Both are meant to be called from the driver's
//! own loop, which may run on a different thread than the consumer.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::{Arc, MutexGuard};

use tracing::{debug, info, warn};

use crate::callbacks::{Callbacks, Dispatcher};
use crate::command::Command;
use crate::memory::{MemoryRegion, RegionHandle};
use crate::msg::{MessageGate, MsgType};
use crate::params::{self, ParamLimits, Parameters, Size};
use crate::preview::{Crop, Geometry, PreviewSink, SharedPreviewSink, Usage};
use crate::recording::{FrameOwner, MetadataDescriptor, RecordingLedger};
use crate::state::DeviceState;
use crate::traits::{CameraError, Format, Frame, FrameSource, Result};

/// Tunables for a device session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HalConfig {
    /// Preview buffers requested on top of the sink's undequeued minimum.
    pub preview_headroom: usize,
    /// Recording frames the consumer may hold before new ones are dropped.
    pub recording_frame_limit: usize,
}

impl Default for HalConfig {
    fn default() -> Self {
        Self {
            preview_headroom: 2,
            recording_frame_limit: 8,
        }
    }
}

impl HalConfig {
    /// Set the preview buffer headroom. At least one buffer is always kept
    /// dequeueable, so zero is raised to one.
    #[must_use]
    pub const fn with_preview_headroom(mut self, headroom: usize) -> Self {
        self.preview_headroom = if headroom == 0 { 1 } else { headroom };
        self
    }

    /// Set the outstanding recording frame limit.
    #[must_use]
    pub const fn with_recording_frame_limit(mut self, limit: usize) -> Self {
        self.recording_frame_limit = limit;
        self
    }
}

/// Outcome of one [`CameraHal::pump_frame`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameReport {
    /// Sequence number of the source frame.
    pub sequence: u32,
    /// Frame reached the preview sink.
    pub displayed: bool,
    /// A preview-frame data callback fired.
    pub preview_delivered: bool,
    /// A video-frame callback fired, with the handle the consumer must release.
    pub video_frame: Option<RegionHandle>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    Focus,
    Capture,
}

/// One open camera device.
///
/// `S` is the sensor backend and `C` the consumer's context object, handed
/// back on every callback.
pub struct CameraHal<S: FrameSource, C> {
    source: S,
    config: HalConfig,
    state: DeviceState,
    gate: Arc<MessageGate>,
    dispatcher: Dispatcher<C>,
    sink: Option<SharedPreviewSink>,
    ledger: RecordingLedger,
    pending: VecDeque<Pending>,
    metadata_mode: bool,
    params: Parameters,
    limits: ParamLimits,
    display_orientation: i32,
    shutter_sound: bool,
    focus_move_msgs: bool,
    frames_pumped: u64,
    preview_dropped: u64,
    video_dropped: u64,
}

fn lock_sink(sink: &SharedPreviewSink) -> Result<MutexGuard<'_, dyn PreviewSink + 'static>> {
    sink.lock()
        .map_err(|_| CameraError::Device("preview sink lock poisoned".to_owned()))
}

fn configure_sink(sink: &SharedPreviewSink, format: &Format, headroom: usize) -> Result<()> {
    let mut sink = lock_sink(sink)?;
    let count = sink
        .min_undequeued_buffer_count()
        .saturating_add(headroom.max(1));
    sink.set_buffers_geometry(Geometry {
        width: format.width,
        height: format.height,
        format: format.fourcc,
    })?;
    sink.set_buffer_count(count)?;
    sink.set_usage(Usage(Usage::SW_WRITE_OFTEN.0 | Usage::HW_TEXTURE.0))?;
    sink.set_crop(Crop {
        left: 0,
        top: 0,
        right: format.width,
        bottom: format.height,
    })?;
    debug!(buffers = count, "preview sink configured");
    Ok(())
}

impl<S: FrameSource, C> CameraHal<S, C> {
    /// Open a device over `source`.
    pub fn open(mut source: S, config: HalConfig) -> Result<Self> {
        let focus_modes = if source.autofocus().is_some() {
            vec![params::FOCUS_MODE_AUTO, params::FOCUS_MODE_INFINITY]
        } else {
            vec![params::FOCUS_MODE_FIXED]
        };
        let limits = ParamLimits {
            sizes: source.supported_sizes(),
            focus_modes,
            max_frame_rate: 30,
        };
        let format = source.format();
        let params = Parameters::defaults(
            Size {
                width: format.width,
                height: format.height,
            },
            &limits,
        );
        let gate = Arc::new(MessageGate::new());
        info!(source = source.name(), "camera device opened");

        Ok(Self {
            source,
            config,
            state: DeviceState::default(),
            dispatcher: Dispatcher::new(Arc::clone(&gate)),
            gate,
            sink: None,
            ledger: RecordingLedger::default(),
            pending: VecDeque::new(),
            metadata_mode: false,
            params,
            limits,
            display_orientation: 0,
            shutter_sound: true,
            focus_move_msgs: false,
            frames_pumped: 0,
            preview_dropped: 0,
            video_dropped: 0,
        })
    }

    /// Current state machine snapshot.
    pub const fn state(&self) -> DeviceState {
        self.state
    }

    /// The sensor backend.
    pub const fn source(&self) -> &S {
        &self.source
    }

    /// Session configuration.
    pub const fn config(&self) -> &HalConfig {
        &self.config
    }

    /// Asynchronous jobs waiting for [`CameraHal::process_pending`].
    pub fn pending_jobs(&self) -> usize {
        self.pending.len()
    }

    /// The recording-frame ledger.
    pub const fn recording_frames(&self) -> &RecordingLedger {
        &self.ledger
    }

    /// Who owns a delivered recording frame.
    pub fn recording_frame_owner(&self, handle: RegionHandle) -> Option<FrameOwner> {
        self.ledger.owner(handle)
    }

    /// Whether a preview sink is installed.
    pub const fn has_preview_window(&self) -> bool {
        self.sink.is_some()
    }

    /// Install, replace or (with `None`) detach the preview sink.
    ///
    /// Detaching while preview runs stops preview. A replacement installed
    /// while preview runs is configured before it takes over.
    pub fn set_preview_window(&mut self, window: Option<SharedPreviewSink>) -> Result<()> {
        self.state.ensure_open("set_preview_window")?;
        match window {
            Some(sink) => {
                if self.state.is_preview_active() {
                    configure_sink(&sink, &self.source.format(), self.config.preview_headroom)?;
                }
                self.sink = Some(sink);
                debug!("preview window installed");
            }
            None => {
                if self.state.is_preview_active() {
                    warn!("preview window detached while previewing; stopping preview");
                    self.stop_preview();
                }
                self.sink = None;
                debug!("preview window detached");
            }
        }
        Ok(())
    }

    /// Register callbacks, the memory provider and the context object.
    ///
    /// Callbacks are installed once per open device; a second call is rejected
    /// and the installed set stays in place.
    pub fn set_callbacks(&mut self, callbacks: Callbacks<C>) -> Result<()> {
        self.state.ensure_open("set_callbacks")?;
        if self.dispatcher.is_installed() {
            return Err(CameraError::InvalidState(
                "callbacks are already installed".to_owned(),
            ));
        }
        self.dispatcher.install(callbacks);
        Ok(())
    }

    /// Enable a category or set of categories.
    pub fn enable_msg_type(&self, msg: MsgType) {
        if self.state.is_released() {
            return;
        }
        debug!(%msg, "message type enabled");
        self.gate.enable(msg);
    }

    /// Disable a category or set of categories.
    ///
    /// Disabling video frames hands every outstanding recording frame back to
    /// driver management; the consumer must not touch them afterwards.
    pub fn disable_msg_type(&mut self, msg: MsgType) {
        let switched = self.gate.disable(msg);
        debug!(%msg, %switched, "message type disabled");
        if switched.contains(MsgType::VIDEO_FRAME) {
            self.ledger.revert_to_driver();
        }
    }

    /// AND query over `msg`.
    pub fn msg_type_enabled(&self, msg: MsgType) -> bool {
        self.gate.is_enabled(msg)
    }

    /// Start preview. A no-op if already running.
    pub fn start_preview(&mut self) -> Result<()> {
        self.state.ensure_open("start_preview")?;
        if self.state.is_preview_active() {
            return Ok(());
        }
        let Some(sink) = self.sink.as_ref() else {
            return Err(CameraError::InvalidState(
                "start_preview without a preview window".to_owned(),
            ));
        };
        configure_sink(sink, &self.source.format(), self.config.preview_headroom)?;
        self.source.start()?;
        self.state.start_preview(true)?;
        info!(state = %self.state, "preview running");
        Ok(())
    }

    /// Stop preview, forcing recording, focus and capture to end. No-op when idle.
    pub fn stop_preview(&mut self) {
        let teardown = self.state.stop_preview();
        if !teardown.preview {
            return;
        }
        if teardown.focusing {
            if let Some(focus) = self.source.autofocus() {
                focus.reset();
            }
        }
        self.pending.clear();
        self.source.stop();
        if teardown.recording {
            let reclaimed = self.ledger.reclaim_all();
            debug!(reclaimed, "recording frames reclaimed");
        }
        info!("preview stopped");
    }

    /// Whether preview is running.
    pub const fn preview_enabled(&self) -> bool {
        self.state.is_preview_active()
    }

    /// Choose metadata descriptors (`true`) or sample data for recording frames.
    ///
    /// Takes effect for the next `start_recording`; rejected mid-recording.
    pub fn store_meta_data_in_buffers(&mut self, enable: bool) -> Result<()> {
        self.state.ensure_open("store_meta_data_in_buffers")?;
        if enable && !self.source.supports_metadata_buffers() {
            return Err(CameraError::Unsupported(format!(
                "{} cannot store metadata in video buffers",
                self.source.name()
            )));
        }
        if self.state.is_recording() {
            return Err(CameraError::InvalidState(
                "buffer mode must be chosen before start_recording".to_owned(),
            ));
        }
        self.metadata_mode = enable;
        Ok(())
    }

    /// Start recording. Requires a running preview.
    pub fn start_recording(&mut self) -> Result<()> {
        self.state.start_recording()?;
        info!(metadata = self.metadata_mode, "recording started");
        Ok(())
    }

    /// Stop recording. Every delivered frame goes back to the driver and is
    /// reclaimed; a later consumer release of one of them is ignored.
    pub fn stop_recording(&mut self) {
        if self.state.stop_recording() {
            let reclaimed = self.ledger.reclaim_all();
            info!(reclaimed, "recording stopped");
        }
    }

    /// Whether recording is running.
    pub const fn recording_enabled(&self) -> bool {
        self.state.is_recording()
    }

    /// Consumer returns a recording frame delivered through `VIDEO_FRAME`.
    pub fn release_recording_frame(&mut self, handle: RegionHandle) -> Result<()> {
        self.state.ensure_open("release_recording_frame")?;
        self.ledger.release(handle)?;
        Ok(())
    }

    /// Start a focus sweep, superseding any sweep in progress.
    ///
    /// Exactly one `FOCUS` notification follows per completed sweep. Silently
    /// succeeds on devices without focus.
    pub fn auto_focus(&mut self) -> Result<()> {
        self.state.ensure_open("auto_focus")?;
        let mut next = self.state;
        let Some(focus) = self.source.autofocus() else {
            debug!("auto_focus on a fixed-focus device");
            return Ok(());
        };
        next.begin_focus()?;
        focus.begin()?;
        self.state = next;
        self.pending.retain(|job| *job != Pending::Focus);
        self.pending.push_back(Pending::Focus);
        Ok(())
    }

    /// Abandon any sweep and return the lens to its default position.
    pub fn cancel_auto_focus(&mut self) -> Result<()> {
        self.state.ensure_open("cancel_auto_focus")?;
        self.pending.retain(|job| *job != Pending::Focus);
        self.state.end_focus();
        if let Some(focus) = self.source.autofocus() {
            focus.reset();
        }
        Ok(())
    }

    /// Queue a still capture. Results arrive through callbacks.
    pub fn take_picture(&mut self) -> Result<()> {
        let mut next = self.state;
        next.begin_capture()?;
        self.state = next;
        self.pending.push_back(Pending::Capture);
        debug!("capture queued");
        Ok(())
    }

    /// Cancel an outstanding capture; a no-op when none is outstanding.
    pub fn cancel_picture(&mut self) -> Result<()> {
        self.state.ensure_open("cancel_picture")?;
        if self.state.end_capture() {
            self.pending.retain(|job| *job != Pending::Capture);
            debug!("capture cancelled");
        }
        Ok(())
    }

    /// Apply `key=value;...` parameters. Nothing is applied if any entry is invalid.
    pub fn set_parameters(&mut self, flat: &str) -> Result<()> {
        self.state.ensure_open("set_parameters")?;
        let update = Parameters::parse(flat)?;
        let mut merged = self.params.merged(&update, &self.limits)?;

        let requested = merged.size(params::PREVIEW_SIZE)?;
        if requested != self.params.size(params::PREVIEW_SIZE)? {
            if let Some(size) = requested {
                if self.state.is_preview_active() {
                    return Err(CameraError::InvalidState(
                        "preview-size cannot change while preview runs".to_owned(),
                    ));
                }
                let fourcc = self.source.format().fourcc;
                let actual = self
                    .source
                    .set_format(&Format::new(size.width, size.height, fourcc))?;
                let actual = Size {
                    width: actual.width,
                    height: actual.height,
                };
                if actual != size {
                    debug!(requested = %size, %actual, "preview size adjusted by the sensor");
                }
                merged.set(params::PREVIEW_SIZE, &actual.to_string());
            }
        }
        self.params = merged;
        Ok(())
    }

    /// Current parameters in `key=value;...` form.
    pub fn get_parameters(&self) -> Result<String> {
        self.state.ensure_open("get_parameters")?;
        Ok(self.params.flatten())
    }

    /// Vendor command channel. Unknown commands are reported as unsupported.
    pub fn send_command(&mut self, cmd: i32, arg1: i32, arg2: i32) -> Result<()> {
        self.state.ensure_open("send_command")?;
        let command = Command::try_from(cmd)?;
        debug!(?command, arg1, arg2, "command");
        match command {
            Command::SetDisplayOrientation => {
                if ![0, 90, 180, 270].contains(&arg1) {
                    return Err(CameraError::BadValue(format!(
                        "display orientation {arg1} is not a right angle"
                    )));
                }
                self.display_orientation = arg1;
            }
            Command::EnableShutterSound => self.shutter_sound = arg1 != 0,
            Command::EnableFocusMoveMsg => {
                if self.source.autofocus().is_none() {
                    return Err(CameraError::Unsupported(
                        "focus-move messages need autofocus".to_owned(),
                    ));
                }
                self.focus_move_msgs = arg1 != 0;
            }
            Command::SetVideoBufferCount => {
                let count = usize::try_from(arg1)
                    .ok()
                    .filter(|count| *count > 0)
                    .ok_or_else(|| {
                        CameraError::BadValue(format!("video buffer count {arg1}"))
                    })?;
                if self.state.is_recording() {
                    return Err(CameraError::InvalidState(
                        "video buffer count cannot change while recording".to_owned(),
                    ));
                }
                self.config.recording_frame_limit = count;
            }
            Command::Ping => {}
            Command::StartSmoothZoom
            | Command::StopSmoothZoom
            | Command::PlayRecordingSound
            | Command::StartFaceDetection
            | Command::StopFaceDetection
            | Command::SetVideoFormat => {
                return Err(CameraError::Unsupported(format!(
                    "{command:?} on {}",
                    self.source.name()
                )));
            }
        }
        Ok(())
    }

    /// Release every resource. The handle stays valid but inert: fallible
    /// operations return `InvalidState`, void ones do nothing, and only
    /// `dump` still reports anything useful. A second call is a no-op.
    pub fn release(&mut self) {
        if self.state.is_released() {
            return;
        }
        self.stop_preview();
        self.pending.clear();
        let dropped = self.ledger.clear();
        self.sink = None;
        self.dispatcher.clear();
        self.gate.clear();
        self.state.release();
        info!(dropped_frames = dropped, "camera device released");
    }

    /// Write diagnostic state to `out` without touching the device.
    pub fn dump<W: Write>(&self, out: &mut W) -> Result<()> {
        let format = self.source.format();
        writeln!(out, "camera device ({})", self.source.name())?;
        writeln!(out, "  state: {}", self.state)?;
        writeln!(
            out,
            "  format: {}x{} {}",
            format.width, format.height, format.fourcc
        )?;
        writeln!(out, "  messages: {}", self.gate.enabled())?;
        writeln!(out, "  preview window: {}", self.sink.is_some())?;
        writeln!(out, "  callbacks: {}", self.dispatcher.is_installed())?;
        writeln!(out, "  metadata buffers: {}", self.metadata_mode)?;
        writeln!(out, "  display orientation: {}", self.display_orientation)?;
        writeln!(out, "  shutter sound: {}", self.shutter_sound)?;
        writeln!(out, "  focus-move messages: {}", self.focus_move_msgs)?;
        writeln!(out, "  pending jobs: {}", self.pending.len())?;
        writeln!(
            out,
            "  frames: pumped={} preview_dropped={} video_dropped={}",
            self.frames_pumped, self.preview_dropped, self.video_dropped
        )?;
        writeln!(
            out,
            "  recording frames: delivered={} consumer={} driver={} released={} reclaimed={}",
            self.ledger.delivered(),
            self.ledger.consumer_owned(),
            self.ledger.driver_managed(),
            self.ledger.released_by_consumer(),
            self.ledger.reclaimed_by_driver()
        )?;
        writeln!(out, "  parameters: {}", self.params)?;
        Ok(())
    }

    /// Driver side: pull one frame from the source and route it to the
    /// preview sink, the preview callback and, when recording, the video
    /// callback.
    pub fn pump_frame(&mut self) -> Result<FrameReport> {
        self.state.ensure_open("pump_frame")?;
        if !self.state.is_preview_active() {
            return Err(CameraError::InvalidState("preview is not running".to_owned()));
        }

        let frame = match self.source.next_frame() {
            Ok(frame) => frame,
            Err(err) => {
                warn!(%err, "frame read failed");
                self.dispatcher.notify(MsgType::ERROR, err.status_code(), 0);
                return Err(err);
            }
        };
        self.frames_pumped += 1;

        let mut report = FrameReport {
            sequence: frame.metadata.sequence,
            displayed: self.display(&frame)?,
            ..FrameReport::default()
        };
        if !report.displayed {
            self.preview_dropped += 1;
        }

        if self.dispatcher.would_deliver(MsgType::PREVIEW_FRAME) {
            if let Some(region) = self.payload(&frame.data) {
                report.preview_delivered = self.dispatcher.data(MsgType::PREVIEW_FRAME, &region);
            }
        }

        if self.state.is_recording() {
            report.video_frame = self.deliver_video_frame(&frame);
        }
        Ok(report)
    }

    /// Driver side: complete queued focus and capture work, emitting their
    /// callbacks. Returns the number of jobs completed.
    pub fn process_pending(&mut self) -> Result<usize> {
        self.state.ensure_open("process_pending")?;
        let mut completed = 0;
        while let Some(job) = self.pending.pop_front() {
            match job {
                Pending::Focus => self.complete_focus(),
                Pending::Capture => self.complete_capture(),
            }
            completed += 1;
        }
        Ok(completed)
    }

    fn complete_focus(&mut self) {
        self.state.end_focus();
        let outcome = match self.source.autofocus() {
            Some(focus) => focus.settle(),
            None => return,
        };
        match outcome {
            Ok(focused) => {
                debug!(focused, "focus sweep finished");
                self.dispatcher.notify(MsgType::FOCUS, i32::from(focused), 0);
            }
            Err(err) => {
                warn!(%err, "focus sweep failed");
                self.dispatcher.notify(MsgType::FOCUS, 0, 0);
                self.dispatcher.notify(MsgType::ERROR, err.status_code(), 0);
            }
        }
    }

    fn complete_capture(&mut self) {
        let frame = match self.source.next_frame() {
            Ok(frame) => frame,
            Err(err) => {
                warn!(%err, "capture failed");
                self.state.end_capture();
                self.dispatcher.notify(MsgType::ERROR, err.status_code(), 0);
                return;
            }
        };

        self.dispatcher.notify(MsgType::SHUTTER, 0, 0);
        if self.dispatcher.would_deliver(MsgType::RAW_IMAGE) {
            if let Some(region) = self.payload(&frame.data) {
                self.dispatcher.data(MsgType::RAW_IMAGE, &region);
            }
        } else {
            self.dispatcher.notify(MsgType::RAW_IMAGE_NOTIFY, 0, 0);
        }
        if self.dispatcher.would_deliver(MsgType::POSTVIEW_FRAME) {
            if let Some(region) = self.payload(&frame.data) {
                self.dispatcher.data(MsgType::POSTVIEW_FRAME, &region);
            }
        }
        // No encoder in the reference driver: the picture is delivered as sampled.
        if self.dispatcher.would_deliver(MsgType::COMPRESSED_IMAGE) {
            if let Some(region) = self.payload(&frame.data) {
                self.dispatcher.data(MsgType::COMPRESSED_IMAGE, &region);
            }
        }
        self.state.end_capture();
        debug!(sequence = frame.metadata.sequence, "capture delivered");
    }

    /// Draw `frame` into a preview buffer. Returns whether it was enqueued.
    fn display(&self, frame: &Frame) -> Result<bool> {
        let Some(sink) = self.sink.as_ref() else {
            return Ok(false);
        };
        let mut sink = lock_sink(sink)?;
        let mut buffer = match sink.dequeue_buffer() {
            Ok(buffer) => buffer,
            Err(CameraError::BufferUnavailable) => {
                debug!(sequence = frame.metadata.sequence, "no free preview buffer");
                return Ok(false);
            }
            Err(err) => return Err(err),
        };
        match buffer.fill(&frame.data) {
            Ok(()) => {
                sink.enqueue_buffer(buffer)?;
                Ok(true)
            }
            Err(err) => {
                warn!(%err, "preview frame does not fit; buffer cancelled");
                sink.cancel_buffer(buffer)?;
                Ok(false)
            }
        }
    }

    fn deliver_video_frame(&mut self, frame: &Frame) -> Option<RegionHandle> {
        if !self.gate.is_enabled(MsgType::VIDEO_FRAME) {
            self.ledger.revert_to_driver();
            return None;
        }
        if self.ledger.consumer_owned() >= self.config.recording_frame_limit {
            warn!(
                limit = self.config.recording_frame_limit,
                "consumer holds every recording buffer; frame dropped"
            );
            self.video_dropped += 1;
            return None;
        }

        let descriptor;
        let payload: &[u8] = if self.metadata_mode {
            descriptor = MetadataDescriptor {
                kind: MetadataDescriptor::CAMERA_SOURCE,
                buffer_id: u64::from(frame.metadata.sequence),
            }
            .encode();
            &descriptor
        } else {
            &frame.data
        };
        let Some(region) = self.payload(payload) else {
            self.video_dropped += 1;
            return None;
        };

        let handle = region.handle();
        self.ledger.track(handle);
        let delivered = self.dispatcher.data_timestamp(
            frame.metadata.timestamp,
            MsgType::VIDEO_FRAME,
            &region,
        );
        if delivered {
            Some(handle)
        } else {
            self.ledger.forget(handle);
            self.video_dropped += 1;
            None
        }
    }

    /// Copy `bytes` into a fresh region. Allocation failures are reported
    /// through an `ERROR` notification.
    fn payload(&self, bytes: &[u8]) -> Option<MemoryRegion> {
        let result = self.dispatcher.request_memory(bytes.len()).and_then(|mut region| {
            region.write(bytes)?;
            Ok(region)
        });
        match result {
            Ok(region) => Some(region),
            Err(err) => {
                warn!(%err, "payload allocation failed");
                self.dispatcher.notify(MsgType::ERROR, err.status_code(), 0);
                None
            }
        }
    }
}
