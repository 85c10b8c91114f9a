//! cam-hal demo: preview and record from a V4L2 camera through the HAL.
//!
//! Usage: `cam-hal [device-index] [frames]`. Log level follows `RUST_LOG`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use cam_hal::{
    BufferQueue, CameraHal, Callbacks, Format, FourCC, FrameSource, Geometry, HalConfig,
    HeapMemoryProvider, MsgType, V4l2Source,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Default)]
struct Stats {
    preview_frames: AtomicUsize,
    video_frames: AtomicUsize,
    errors: AtomicUsize,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    if let Err(err) = run() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run() -> cam_hal::Result<()> {
    let mut args = std::env::args().skip(1);
    let index = args.next().and_then(|arg| arg.parse().ok()).unwrap_or(0);
    let frames: usize = args.next().and_then(|arg| arg.parse().ok()).unwrap_or(30);

    let mut source = V4l2Source::open(index)?;
    let format = source.set_format(&Format::new(640, 480, FourCC::YUYV))?;
    println!("Device: {} ({})", source.name(), source.driver());
    println!("Format: {}x{} {}", format.width, format.height, format.fourcc);

    let stats = Arc::new(Stats::default());
    let mut hal = CameraHal::open(source, HalConfig::default())?;
    hal.set_callbacks(
        Callbacks::new(Arc::new(HeapMemoryProvider::default()), Arc::clone(&stats))
            .on_notify(|msg, ext1, _, stats: &Arc<Stats>| {
                if msg == MsgType::ERROR {
                    stats.errors.fetch_add(1, Ordering::Relaxed);
                    warn!(code = ext1, "driver error");
                }
            })
            .on_data(|msg, _, stats: &Arc<Stats>| {
                if msg == MsgType::PREVIEW_FRAME {
                    stats.preview_frames.fetch_add(1, Ordering::Relaxed);
                }
            })
            .on_data_timestamp(|timestamp, _, region, stats: &Arc<Stats>| {
                stats.video_frames.fetch_add(1, Ordering::Relaxed);
                info!(?timestamp, bytes = region.size(), "video frame");
            }),
    )?;

    let display = BufferQueue::new(
        Geometry {
            width: format.width,
            height: format.height,
            format: format.fourcc,
        },
        2,
    )
    .into_shared();
    let sink: Arc<Mutex<BufferQueue>> = Arc::clone(&display);
    hal.set_preview_window(Some(sink))?;
    hal.enable_msg_type(MsgType::ERROR | MsgType::PREVIEW_FRAME | MsgType::VIDEO_FRAME);

    hal.start_preview()?;
    hal.start_recording()?;
    for _ in 0..frames {
        let report = hal.pump_frame()?;
        if let Some(handle) = report.video_frame {
            hal.release_recording_frame(handle)?;
        }
        if let Ok(mut display) = display.lock() {
            display.acquire_frame();
        }
    }
    hal.stop_recording();

    let mut stdout = std::io::stdout();
    hal.dump(&mut stdout)?;
    hal.release();

    println!(
        "preview callbacks: {}, video callbacks: {}, errors: {}",
        stats.preview_frames.load(Ordering::Relaxed),
        stats.video_frames.load(Ordering::Relaxed),
        stats.errors.load(Ordering::Relaxed)
    );
    Ok(())
}
