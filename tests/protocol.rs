//! Device protocol scenarios against the mock sensor.
//!
//! These run without hardware: `cargo test`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use cam_hal::hal::{CameraHal, HalConfig};
use cam_hal::mock::MockSensor;
use cam_hal::preview::{BufferQueue, Geometry, SharedPreviewSink};
use cam_hal::{
    CameraError, Callbacks, Format, FourCC, Frame, FrameOwner, FrameSource, HeapMemoryProvider,
    MemoryProvider, MetadataDescriptor, MsgType, PreviewSink, RegionHandle,
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Notify(MsgType, i32),
    Data(MsgType, usize),
    Video(Duration, RegionHandle, Vec<u8>),
}

type Log = Arc<Mutex<Vec<Event>>>;

fn display_queue(count: usize) -> Arc<Mutex<BufferQueue>> {
    BufferQueue::new(
        Geometry {
            width: 640,
            height: 480,
            format: FourCC::YUYV,
        },
        count,
    )
    .into_shared()
}

struct Harness {
    hal: CameraHal<MockSensor, Log>,
    log: Log,
    queue: Arc<Mutex<BufferQueue>>,
}

impl Harness {
    fn new(sensor: MockSensor) -> Self {
        Self::with_provider(sensor, Arc::new(HeapMemoryProvider::default()))
    }

    fn with_provider(sensor: MockSensor, memory: Arc<dyn MemoryProvider>) -> Self {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let mut hal =
            CameraHal::open(sensor, HalConfig::default()).expect("device should open");
        hal.set_callbacks(
            Callbacks::new(memory, Arc::clone(&log))
                .on_notify(|msg, ext1, _, log: &Log| {
                    log.lock().expect("log lock").push(Event::Notify(msg, ext1));
                })
                .on_data(|msg, region, log: &Log| {
                    log.lock()
                        .expect("log lock")
                        .push(Event::Data(msg, region.size()));
                })
                .on_data_timestamp(|timestamp, _, region, log: &Log| {
                    log.lock().expect("log lock").push(Event::Video(
                        timestamp,
                        region.handle(),
                        region.data().to_vec(),
                    ));
                }),
        )
        .expect("callbacks accepted");

        let queue = display_queue(3);
        let sink: SharedPreviewSink = queue.clone();
        hal.set_preview_window(Some(sink))
            .expect("window accepted");

        Self { hal, log, queue }
    }

    fn previewing(sensor: MockSensor) -> Self {
        let mut harness = Self::new(sensor);
        harness.hal.start_preview().expect("preview should start");
        harness
    }

    fn events(&self) -> Vec<Event> {
        self.log.lock().expect("log lock").clone()
    }

    fn count(&self, msg: MsgType) -> usize {
        self.events()
            .iter()
            .filter(|event| match event {
                Event::Notify(m, _) | Event::Data(m, _) => *m == msg,
                Event::Video(..) => msg == MsgType::VIDEO_FRAME,
            })
            .count()
    }

    /// Start recording and deliver `frames` video frames to the consumer.
    fn record(&mut self, frames: usize) -> Vec<RegionHandle> {
        self.hal.enable_msg_type(MsgType::VIDEO_FRAME);
        self.hal.start_recording().expect("recording should start");
        for _ in 0..frames {
            self.pump();
        }
        let delivered = self.video_handles();
        assert_eq!(delivered.len(), frames);
        delivered
    }

    fn video_handles(&self) -> Vec<RegionHandle> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Video(_, handle, _) => Some(handle),
                _ => None,
            })
            .collect()
    }

    /// Pump a frame and let the display consume it.
    fn pump(&mut self) {
        self.hal.pump_frame().expect("frame pumped");
        self.queue.lock().expect("queue lock").acquire_frame();
    }
}

#[test]
fn test_recording_before_preview_is_rejected() {
    let mut harness = Harness::new(MockSensor::new());
    let before = harness.hal.state();

    let result = harness.hal.start_recording();
    assert!(matches!(result, Err(CameraError::InvalidState(_))));
    assert_eq!(harness.hal.state(), before);
    assert!(!harness.hal.recording_enabled());
}

#[test]
fn test_video_frames_stop_at_disable_and_revert_to_driver() {
    let mut harness = Harness::previewing(MockSensor::new());
    harness.hal.enable_msg_type(MsgType::VIDEO_FRAME);
    harness.hal.start_recording().expect("recording should start");

    for _ in 0..3 {
        harness.pump();
    }
    let delivered = harness.video_handles();
    assert_eq!(delivered.len(), 3);
    for handle in &delivered {
        assert_eq!(
            harness.hal.recording_frame_owner(*handle),
            Some(FrameOwner::Consumer)
        );
    }

    harness.hal.disable_msg_type(MsgType::VIDEO_FRAME);
    for _ in 0..4 {
        harness.pump();
    }
    assert_eq!(harness.count(MsgType::VIDEO_FRAME), 3, "no callbacks after disable");
    for handle in &delivered {
        assert_eq!(
            harness.hal.recording_frame_owner(*handle),
            Some(FrameOwner::Driver)
        );
        // Late releases of driver-managed frames are tolerated.
        harness
            .hal
            .release_recording_frame(*handle)
            .expect("ignored release");
    }
    assert_eq!(harness.hal.recording_frames().released_by_consumer(), 0);

    harness.hal.stop_recording();
    assert_eq!(harness.hal.recording_frames().driver_managed(), 0);
}

#[test]
fn test_recording_frames_released_by_consumer() {
    let mut harness = Harness::previewing(MockSensor::new());
    harness.hal.enable_msg_type(MsgType::VIDEO_FRAME);
    harness.hal.start_recording().expect("recording should start");
    harness.pump();
    harness.pump();

    let handles = harness.video_handles();
    let first = *handles.first().expect("first video frame");
    harness
        .hal
        .release_recording_frame(first)
        .expect("consumer-owned frame");
    assert!(matches!(
        harness.hal.release_recording_frame(first),
        Err(CameraError::BadValue(_))
    ));
    assert!(matches!(
        harness.hal.release_recording_frame(RegionHandle(u64::MAX)),
        Err(CameraError::BadValue(_))
    ));
    assert_eq!(harness.hal.recording_frames().consumer_owned(), 1);
}

#[test]
fn test_stop_recording_returns_every_frame_to_driver() {
    let mut harness = Harness::previewing(MockSensor::new());
    let delivered = harness.record(3);

    harness.hal.stop_recording();
    assert_eq!(harness.hal.recording_frames().consumer_owned(), 0);
    assert_eq!(harness.hal.recording_frames().driver_managed(), 0);
    for handle in &delivered {
        assert_ne!(
            harness.hal.recording_frame_owner(*handle),
            Some(FrameOwner::Consumer)
        );
        harness
            .hal
            .release_recording_frame(*handle)
            .expect("late release is ignored");
    }
    assert_eq!(harness.hal.recording_frames().released_by_consumer(), 0);
}

#[test]
fn test_stop_preview_returns_recording_frames_to_driver() {
    let mut harness = Harness::previewing(MockSensor::new());
    let delivered = harness.record(2);

    harness.hal.stop_preview();
    assert!(!harness.hal.recording_enabled());
    assert_eq!(harness.hal.recording_frames().consumer_owned(), 0);
    for handle in &delivered {
        assert_eq!(harness.hal.recording_frame_owner(*handle), None);
        harness
            .hal
            .release_recording_frame(*handle)
            .expect("late release is ignored");
    }
}

#[test]
fn test_release_after_reclaim_is_tolerated() {
    let mut harness = Harness::previewing(MockSensor::new());
    let delivered = harness.record(2);
    let first = *delivered.first().expect("first video frame");
    let second = *delivered.get(1).expect("second video frame");
    harness
        .hal
        .release_recording_frame(first)
        .expect("consumer-owned frame");

    harness.hal.disable_msg_type(MsgType::VIDEO_FRAME);
    harness.hal.stop_recording();
    assert_eq!(harness.hal.recording_frame_owner(second), None);
    for _ in 0..2 {
        harness
            .hal
            .release_recording_frame(second)
            .expect("reclaimed frame release is ignored");
    }
    assert!(
        matches!(
            harness.hal.release_recording_frame(first),
            Err(CameraError::BadValue(_))
        ),
        "a frame the consumer already released stays unknown"
    );
}

#[test]
fn test_video_timestamps_follow_sensor() {
    let mut harness = Harness::previewing(MockSensor::new());
    harness.hal.enable_msg_type(MsgType::VIDEO_FRAME);
    harness.hal.start_recording().expect("recording should start");
    harness.pump();
    harness.pump();

    let timestamps: Vec<Duration> = harness
        .events()
        .into_iter()
        .filter_map(|event| match event {
            Event::Video(timestamp, _, _) => Some(timestamp),
            _ => None,
        })
        .collect();
    assert_eq!(
        timestamps,
        vec![Duration::from_millis(0), Duration::from_millis(33)]
    );
}

#[test]
fn test_recording_frame_limit_drops_excess() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let mut hal = CameraHal::open(
        MockSensor::new(),
        HalConfig::default().with_recording_frame_limit(2),
    )
    .expect("device should open");
    hal.set_callbacks(
        Callbacks::new(Arc::new(HeapMemoryProvider::default()), Arc::clone(&log))
            .on_data_timestamp(|timestamp, _, region, log: &Log| {
                log.lock().expect("log lock").push(Event::Video(
                    timestamp,
                    region.handle(),
                    Vec::new(),
                ));
            }),
    )
    .expect("callbacks accepted");
    let sink: SharedPreviewSink = BufferQueue::new(
        Geometry {
            width: 640,
            height: 480,
            format: FourCC::YUYV,
        },
        3,
    )
    .into_shared();
    hal.set_preview_window(Some(sink)).expect("window accepted");
    hal.enable_msg_type(MsgType::VIDEO_FRAME);
    hal.start_preview().expect("preview should start");
    hal.start_recording().expect("recording should start");

    let delivered: Vec<_> = (0..4)
        .filter_map(|_| hal.pump_frame().expect("frame pumped").video_frame)
        .collect();
    assert_eq!(delivered.len(), 2);
    assert_eq!(log.lock().expect("log lock").len(), 2);

    hal.release_recording_frame(*delivered.first().expect("frame"))
        .expect("consumer-owned");
    assert!(hal.pump_frame().expect("frame pumped").video_frame.is_some());
}

#[test]
fn test_metadata_mode_delivers_descriptors() {
    let mut harness = Harness::previewing(MockSensor::new().with_metadata_buffers());
    harness
        .hal
        .store_meta_data_in_buffers(true)
        .expect("metadata supported");
    harness.hal.enable_msg_type(MsgType::VIDEO_FRAME);
    harness.hal.start_recording().expect("recording should start");
    assert!(matches!(
        harness.hal.store_meta_data_in_buffers(false),
        Err(CameraError::InvalidState(_))
    ));
    harness.pump();
    harness.pump();

    let payloads: Vec<Vec<u8>> = harness
        .events()
        .into_iter()
        .filter_map(|event| match event {
            Event::Video(_, _, data) => Some(data),
            _ => None,
        })
        .collect();
    assert_eq!(payloads.len(), 2);
    let second = MetadataDescriptor::decode(payloads.get(1).expect("second payload"))
        .expect("valid descriptor");
    assert_eq!(second.kind, MetadataDescriptor::CAMERA_SOURCE);
    assert_eq!(second.buffer_id, 1);
}

#[test]
fn test_metadata_mode_unsupported_on_plain_sensor() {
    let mut harness = Harness::new(MockSensor::new());
    assert!(matches!(
        harness.hal.store_meta_data_in_buffers(true),
        Err(CameraError::Unsupported(_))
    ));
}

#[test]
fn test_cancel_picture_without_capture_is_noop() {
    let mut harness = Harness::previewing(MockSensor::new());
    let before = harness.hal.state();
    harness.hal.cancel_picture().expect("no-op");
    assert_eq!(harness.hal.state(), before);
    assert!(harness.events().is_empty());
}

#[test]
fn test_cancelled_capture_emits_nothing() {
    let mut harness = Harness::previewing(MockSensor::new());
    harness.hal.enable_msg_type(MsgType::ALL);
    harness.hal.take_picture().expect("capture queued");
    harness.hal.cancel_picture().expect("capture cancelled");
    assert_eq!(harness.hal.process_pending().expect("jobs run"), 0);
    assert_eq!(harness.count(MsgType::SHUTTER), 0);
    assert_eq!(harness.count(MsgType::COMPRESSED_IMAGE), 0);
}

#[test]
fn test_picture_delivers_shutter_then_images() {
    let mut harness = Harness::previewing(MockSensor::new());
    harness.hal.enable_msg_type(
        MsgType::SHUTTER | MsgType::RAW_IMAGE | MsgType::POSTVIEW_FRAME | MsgType::COMPRESSED_IMAGE,
    );
    harness.hal.take_picture().expect("capture queued");
    harness.hal.process_pending().expect("jobs run");

    let order: Vec<MsgType> = harness
        .events()
        .into_iter()
        .filter_map(|event| match event {
            Event::Notify(msg, _) | Event::Data(msg, _) => Some(msg),
            Event::Video(..) => None,
        })
        .collect();
    assert_eq!(
        order,
        vec![
            MsgType::SHUTTER,
            MsgType::RAW_IMAGE,
            MsgType::POSTVIEW_FRAME,
            MsgType::COMPRESSED_IMAGE
        ]
    );
}

#[test]
fn test_allocation_failure_reported_as_error() {
    let mut harness =
        Harness::with_provider(MockSensor::new(), Arc::new(HeapMemoryProvider::new(1024)));
    harness.hal.start_preview().expect("preview should start");
    harness
        .hal
        .enable_msg_type(MsgType::ERROR | MsgType::PREVIEW_FRAME);

    let report = harness.hal.pump_frame().expect("frame still displayed");
    assert!(report.displayed);
    assert!(!report.preview_delivered);
    assert_eq!(
        harness.events(),
        vec![Event::Notify(MsgType::ERROR, -12)]
    );
}

#[test]
fn test_sensor_failure_reported_and_returned() {
    let sensor = MockSensor::new();
    let control = sensor.control();
    let mut harness = Harness::previewing(sensor);
    harness.hal.enable_msg_type(MsgType::ERROR);

    control.fail_next_frames(1);
    let err = harness.hal.pump_frame().expect_err("injected failure");
    assert!(err.is_retryable());
    assert_eq!(harness.events(), vec![Event::Notify(MsgType::ERROR, -5)]);
    harness.pump();
}

#[test]
fn test_disabled_messages_never_fire() {
    let mut harness = Harness::previewing(MockSensor::new().with_autofocus());
    harness.hal.start_recording().expect("recording should start");
    harness.hal.auto_focus().expect("focus starts");
    harness.hal.take_picture().expect("capture queued");
    harness.pump();
    harness.hal.process_pending().expect("jobs run");
    assert!(harness.events().is_empty());
}

#[test]
fn test_focus_disabled_after_scheduling_is_suppressed() {
    let mut harness = Harness::previewing(MockSensor::new().with_autofocus());
    harness.hal.enable_msg_type(MsgType::FOCUS);
    harness.hal.auto_focus().expect("focus starts");
    harness.hal.disable_msg_type(MsgType::FOCUS);
    assert_eq!(harness.hal.process_pending().expect("jobs run"), 1);
    assert_eq!(harness.count(MsgType::FOCUS), 0);
}

#[test]
fn test_superseded_focus_notifies_once() {
    let sensor = MockSensor::new().with_autofocus();
    let control = sensor.control();
    control.set_focus_outcome(false);
    let mut harness = Harness::previewing(sensor);
    harness.hal.enable_msg_type(MsgType::FOCUS);

    harness.hal.auto_focus().expect("first sweep");
    harness.hal.auto_focus().expect("second sweep supersedes");
    harness.hal.process_pending().expect("jobs run");
    assert_eq!(harness.events(), vec![Event::Notify(MsgType::FOCUS, 0)]);
}

#[test]
fn test_focus_without_capability_is_silent() {
    let mut harness = Harness::previewing(MockSensor::new());
    harness.hal.enable_msg_type(MsgType::ALL);
    harness.hal.auto_focus().expect("silent success");
    harness.hal.process_pending().expect("jobs run");
    assert_eq!(harness.count(MsgType::FOCUS), 0);
}

#[test]
fn test_stop_preview_tears_down_everything() {
    let mut harness = Harness::previewing(MockSensor::new().with_autofocus());
    harness.hal.enable_msg_type(MsgType::ALL);
    harness.hal.start_recording().expect("recording should start");
    harness.hal.auto_focus().expect("focus starts");
    harness.hal.take_picture().expect("capture queued");

    harness.hal.stop_preview();
    let state = harness.hal.state();
    assert!(!state.is_preview_active());
    assert!(!state.is_recording());
    assert!(!state.is_focusing());
    assert!(!state.is_capturing());
    assert_eq!(harness.hal.pending_jobs(), 0);
    harness.hal.stop_preview();
}

#[test]
fn test_release_leaves_nothing_held() {
    let mut harness = Harness::previewing(MockSensor::new());
    harness.hal.enable_msg_type(MsgType::ALL);
    harness.hal.start_recording().expect("recording should start");
    harness.hal.pump_frame().expect("frame pumped");
    harness.hal.take_picture().expect("capture queued");

    harness.hal.release();
    assert_eq!(harness.queue.lock().expect("queue lock").dequeued_count(), 0);
    assert_eq!(harness.hal.pending_jobs(), 0);
    assert_eq!(harness.hal.recording_frames().consumer_owned(), 0);
    assert!(!harness.hal.msg_type_enabled(MsgType::ERROR));
    assert!(!harness.hal.has_preview_window());

    harness.hal.release();
    assert!(matches!(
        harness.hal.set_parameters("jpeg-quality=90"),
        Err(CameraError::InvalidState(_))
    ));
}

#[test]
fn test_window_replaced_while_previewing() {
    let mut harness = Harness::previewing(MockSensor::new());
    harness.pump();
    let old_displayed = harness.queue.lock().expect("queue lock").queued_count();

    let replacement = display_queue(2);
    let sink: SharedPreviewSink = replacement.clone();
    harness
        .hal
        .set_preview_window(Some(sink))
        .expect("replacement window accepted");
    assert!(harness.hal.preview_enabled());
    assert_eq!(
        replacement.lock().expect("queue lock").buffer_count(),
        3,
        "replacement sized to min undequeued plus headroom"
    );

    let report = harness.hal.pump_frame().expect("frame pumped");
    assert!(report.displayed);
    let shown = replacement.lock().expect("queue lock").acquire_frame();
    assert!(shown.is_some(), "new window receives frames");
    assert_eq!(
        harness.queue.lock().expect("queue lock").queued_count(),
        old_displayed,
        "old window receives nothing after replacement"
    );
}

#[test]
fn test_unusable_window_while_previewing_keeps_the_old_one() {
    let mut harness = Harness::previewing(MockSensor::new());
    let state = harness.hal.state();

    let busy = display_queue(2);
    let _held = busy
        .lock()
        .expect("queue lock")
        .dequeue_buffer()
        .expect("free buffer");
    let sink: SharedPreviewSink = busy.clone();
    assert!(harness.hal.set_preview_window(Some(sink)).is_err());
    assert_eq!(harness.hal.state(), state);
    assert_eq!(busy.lock().expect("queue lock").buffer_count(), 2);

    harness.hal.pump_frame().expect("frame pumped");
    let shown = harness.queue.lock().expect("queue lock").acquire_frame();
    assert!(shown.is_some(), "frames still reach the original window");
}

#[test]
fn test_start_preview_with_unusable_window_stays_idle() {
    let mut hal: CameraHal<MockSensor, ()> =
        CameraHal::open(MockSensor::new(), HalConfig::default()).expect("device should open");
    let busy = display_queue(2);
    let _held = busy
        .lock()
        .expect("queue lock")
        .dequeue_buffer()
        .expect("free buffer");
    let sink: SharedPreviewSink = busy.clone();
    hal.set_preview_window(Some(sink)).expect("window accepted");

    let before = hal.state();
    assert!(hal.start_preview().is_err());
    assert!(!hal.preview_enabled());
    assert_eq!(hal.state(), before);
}

/// Mock sensor that rounds 160x120 requests up to 320x240.
struct RoundingSensor(MockSensor);

impl FrameSource for RoundingSensor {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn format(&self) -> Format {
        self.0.format()
    }

    fn set_format(&mut self, format: &Format) -> cam_hal::Result<Format> {
        if (format.width, format.height) == (160, 120) {
            return self.0.set_format(&Format::new(320, 240, format.fourcc));
        }
        self.0.set_format(format)
    }

    fn supported_sizes(&self) -> Vec<(u32, u32)> {
        self.0.supported_sizes()
    }

    fn start(&mut self) -> cam_hal::Result<()> {
        self.0.start()
    }

    fn stop(&mut self) {
        self.0.stop();
    }

    fn next_frame(&mut self) -> cam_hal::Result<Frame> {
        self.0.next_frame()
    }
}

#[test]
fn test_preview_size_reports_sensor_choice() {
    let mut hal: CameraHal<RoundingSensor, ()> =
        CameraHal::open(RoundingSensor(MockSensor::new()), HalConfig::default())
            .expect("device should open");
    hal.set_parameters("preview-size=160x120").expect("supported size");

    let format = hal.source().format();
    assert_eq!((format.width, format.height), (320, 240));
    let flat = hal.get_parameters().expect("parameters readable");
    assert!(flat.contains("preview-size=320x240"), "{flat}");

    let queue = display_queue(2);
    let sink: SharedPreviewSink = queue.clone();
    hal.set_preview_window(Some(sink)).expect("window accepted");
    hal.start_preview().expect("preview should start");
    assert_eq!(queue.lock().expect("queue lock").geometry().width, 320);
}

#[test]
fn test_parameters_roundtrip_and_rejects_bad_values() {
    let mut harness = Harness::new(MockSensor::new().with_autofocus());
    let flat = harness.hal.get_parameters().expect("parameters readable");
    assert!(flat.contains("focus-mode-values=auto,infinity"));

    harness
        .hal
        .set_parameters("focus-mode=infinity;jpeg-quality=80")
        .expect("valid update");
    let before = harness.hal.get_parameters().expect("parameters readable");
    assert!(before.contains("jpeg-quality=80"));

    for bad in [
        "jpeg-quality=0",
        "focus-mode=macro",
        "preview-frame-rate=120",
        "no-such-key=1",
        "focus-mode-values=auto",
        "jpeg-quality=90;preview-size=1x",
    ] {
        assert!(
            matches!(
                harness.hal.set_parameters(bad),
                Err(CameraError::BadValue(_))
            ),
            "{bad} should be rejected"
        );
    }
    assert_eq!(
        harness.hal.get_parameters().expect("parameters readable"),
        before,
        "rejected updates apply nothing"
    );
}

#[test]
fn test_unknown_command_is_unsupported() {
    let mut harness = Harness::new(MockSensor::new());
    assert!(matches!(
        harness.hal.send_command(0x1234, 0, 0),
        Err(CameraError::Unsupported(_))
    ));
    harness
        .hal
        .send_command(cam_hal::Command::Ping.into(), 0, 0)
        .expect("ping");
}

#[test]
fn test_dump_is_side_effect_free() {
    let mut harness = Harness::previewing(MockSensor::new());
    harness.hal.enable_msg_type(MsgType::FOCUS | MsgType::VIDEO_FRAME);
    let state = harness.hal.state();
    let params = harness.hal.get_parameters().expect("parameters readable");

    let mut out = Vec::new();
    harness.hal.dump(&mut out).expect("dump succeeds");
    let text = String::from_utf8(out).expect("utf-8 dump");
    assert!(text.contains("messages: FOCUS|VIDEO_FRAME"));

    assert_eq!(harness.hal.state(), state);
    assert_eq!(
        harness.hal.get_parameters().expect("parameters readable"),
        params
    );
    assert!(harness.events().is_empty());
}
