//! cam-hal: a camera hardware abstraction layer with a V4L2 reference driver.
//!
//! A [`CameraHal`] wraps a [`FrameSource`] backend and enforces the device
//! protocol: the preview/recording state machine, the message gate, buffer
//! ownership for preview and recording frames, and callback delivery.
//! Backends include real V4L2 hardware ([`V4l2Source`]) and a synthetic
//! sensor ([`mock::MockSensor`]) for testing without a camera.

pub mod callbacks;
pub mod command;
pub mod conformance;
pub mod device;
pub mod hal;
pub mod memory;
pub mod mock;
pub mod msg;
pub mod params;
pub mod preview;
pub mod recording;
pub mod state;
pub mod traits;

pub use callbacks::Callbacks;
pub use command::Command;
pub use device::V4l2Source;
pub use hal::{CameraHal, FrameReport, HalConfig};
pub use memory::{HeapMemoryProvider, MemoryProvider, MemoryRegion, RegionHandle};
pub use msg::MsgType;
pub use preview::{BufferQueue, Geometry, PreviewSink, SharedPreviewSink};
pub use recording::{FrameOwner, MetadataDescriptor};
pub use state::DeviceState;
pub use traits::{
    AutoFocus, CameraError, Format, FourCC, Frame, FrameMetadata, FrameSource, Result,
};
