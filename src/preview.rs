//! Preview sink: the buffer queue the driver draws preview frames into.
//!
//! Ownership is carried by [`DequeuedBuffer`] tokens. A token is created by
//! `dequeue_buffer` and consumed by `enqueue_buffer` or `cancel_buffer`, so a
//! buffer the driver handed back can no longer be reached through it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, trace};

use crate::traits::{CameraError, FourCC, Result};

/// Index of a buffer inside a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferSlot(pub usize);

/// Buffer dimensions and pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Pixel format.
    pub format: FourCC,
}

impl Geometry {
    /// Bytes needed for one buffer of this geometry.
    #[must_use]
    pub const fn byte_len(&self) -> usize {
        let pixels = self.width as usize * self.height as usize;
        if matches!(self.format.0, [b'N', b'V', ..]) {
            pixels * 3 / 2
        } else {
            pixels * 2
        }
    }
}

/// Crop rectangle applied by the consumer when displaying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Crop {
    /// Left edge (inclusive).
    pub left: u32,
    /// Top edge (inclusive).
    pub top: u32,
    /// Right edge (exclusive).
    pub right: u32,
    /// Bottom edge (exclusive).
    pub bottom: u32,
}

/// Buffer usage flags requested by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Usage(pub u32);

impl Usage {
    /// CPU writes the buffer frequently.
    pub const SW_WRITE_OFTEN: Self = Self(0x0000_0030);
    /// Buffer is sampled as a texture by the compositor.
    pub const HW_TEXTURE: Self = Self(0x0000_0100);
}

/// A buffer exclusively owned by the driver.
///
/// Not `Clone`: handing it back moves it, which makes reuse after
/// `enqueue_buffer`/`cancel_buffer` a compile error.
#[derive(Debug)]
pub struct DequeuedBuffer {
    queue_id: u64,
    slot: BufferSlot,
    generation: u64,
    geometry: Geometry,
    data: Vec<u8>,
}

impl DequeuedBuffer {
    /// Slot this buffer came from.
    #[must_use]
    pub const fn slot(&self) -> BufferSlot {
        self.slot
    }

    /// Geometry the buffer was allocated with.
    #[must_use]
    pub const fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Copy a full frame into the buffer. The source must match the buffer size.
    pub fn fill(&mut self, src: &[u8]) -> Result<()> {
        if src.len() != self.data.len() {
            return Err(CameraError::BadValue(format!(
                "frame of {} bytes does not match {} byte preview buffer",
                src.len(),
                self.data.len()
            )));
        }
        self.data.copy_from_slice(src);
        Ok(())
    }
}

/// The buffer-queue contract between the driver and the display consumer.
pub trait PreviewSink: Send {
    /// Take a free buffer. The driver owns it until enqueue or cancel.
    fn dequeue_buffer(&mut self) -> Result<DequeuedBuffer>;

    /// Hand a filled buffer to the consumer for display.
    fn enqueue_buffer(&mut self, buffer: DequeuedBuffer) -> Result<()>;

    /// Return an unused buffer to the free pool.
    fn cancel_buffer(&mut self, buffer: DequeuedBuffer) -> Result<()>;

    /// Resize the pool. Rejected while buffers are dequeued.
    fn set_buffer_count(&mut self, count: usize) -> Result<()>;

    /// Change buffer dimensions. Rejected while buffers are dequeued.
    fn set_buffers_geometry(&mut self, geometry: Geometry) -> Result<()>;

    /// Set the display crop.
    fn set_crop(&mut self, crop: Crop) -> Result<()>;

    /// Set usage flags for future allocations.
    fn set_usage(&mut self, usage: Usage) -> Result<()>;

    /// Set the display swap interval.
    fn set_swap_interval(&mut self, interval: u32) -> Result<()>;

    /// Buffers the consumer keeps for itself; the driver sizes its pool above this.
    fn min_undequeued_buffer_count(&self) -> usize;
}

/// A preview sink lent to the driver by its owner.
pub type SharedPreviewSink = Arc<Mutex<dyn PreviewSink>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Free,
    Dequeued(u64),
    Queued,
}

#[derive(Debug)]
struct Slot {
    state: SlotState,
    data: Vec<u8>,
}

/// A frame taken off the queue by the display side.
#[derive(Debug, Clone)]
pub struct DisplayedFrame {
    /// Slot the frame was displayed from.
    pub slot: BufferSlot,
    /// Geometry at display time.
    pub geometry: Geometry,
    /// Pixel data.
    pub data: Vec<u8>,
}

static NEXT_QUEUE_ID: AtomicU64 = AtomicU64::new(1);

/// Arena-backed reference implementation of [`PreviewSink`].
#[derive(Debug)]
pub struct BufferQueue {
    id: u64,
    slots: Vec<Slot>,
    queued: VecDeque<usize>,
    next_generation: u64,
    geometry: Geometry,
    crop: Crop,
    usage: Usage,
    swap_interval: u32,
    min_undequeued: usize,
}

impl BufferQueue {
    /// Create a queue with `count` buffers of the given geometry.
    #[must_use]
    pub fn new(geometry: Geometry, count: usize) -> Self {
        let mut queue = Self {
            id: NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed),
            slots: Vec::new(),
            queued: VecDeque::new(),
            next_generation: 1,
            geometry,
            crop: Crop::default(),
            usage: Usage::default(),
            swap_interval: 1,
            min_undequeued: 1,
        };
        queue.reallocate(count);
        queue
    }

    /// Set how many buffers the consumer reserves for itself.
    #[must_use]
    pub fn with_min_undequeued(mut self, count: usize) -> Self {
        self.min_undequeued = count;
        self
    }

    /// Wrap the queue for handing to a driver while keeping a typed handle.
    #[must_use]
    pub fn into_shared(self) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(self))
    }

    /// Take the oldest queued frame for display and return its slot to the free pool.
    pub fn acquire_frame(&mut self) -> Option<DisplayedFrame> {
        let index = self.queued.pop_front()?;
        let slot = self.slots.get_mut(index)?;
        slot.state = SlotState::Free;
        Some(DisplayedFrame {
            slot: BufferSlot(index),
            geometry: self.geometry,
            data: slot.data.clone(),
        })
    }

    /// Number of buffers currently owned by the driver.
    #[must_use]
    pub fn dequeued_count(&self) -> usize {
        self.count(|state| matches!(state, SlotState::Dequeued(_)))
    }

    /// Number of buffers waiting for display.
    #[must_use]
    pub fn queued_count(&self) -> usize {
        self.queued.len()
    }

    /// Number of buffers available to `dequeue_buffer`.
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.count(|state| state == SlotState::Free)
    }

    /// Total number of buffers.
    #[must_use]
    pub fn buffer_count(&self) -> usize {
        self.slots.len()
    }

    /// Current geometry.
    #[must_use]
    pub const fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Current crop.
    #[must_use]
    pub const fn crop(&self) -> Crop {
        self.crop
    }

    /// Current usage flags.
    #[must_use]
    pub const fn usage(&self) -> Usage {
        self.usage
    }

    /// Current swap interval.
    #[must_use]
    pub const fn swap_interval(&self) -> u32 {
        self.swap_interval
    }

    fn count<F: Fn(SlotState) -> bool>(&self, pred: F) -> usize {
        self.slots.iter().filter(|slot| pred(slot.state)).count()
    }

    fn reallocate(&mut self, count: usize) {
        let len = self.geometry.byte_len();
        self.queued.clear();
        self.slots = (0..count)
            .map(|_| Slot {
                state: SlotState::Free,
                data: vec![0u8; len],
            })
            .collect();
    }

    fn ensure_none_dequeued(&self, what: &str) -> Result<()> {
        let outstanding = self.dequeued_count();
        if outstanding > 0 {
            return Err(CameraError::InvalidState(format!(
                "{what} with {outstanding} buffer(s) still dequeued"
            )));
        }
        Ok(())
    }

    /// Validate a returning token and give back its slot.
    fn reclaim(&mut self, buffer: DequeuedBuffer, op: &str) -> Result<&mut Slot> {
        if buffer.queue_id != self.id {
            return Err(CameraError::InvalidState(format!(
                "{op}: buffer belongs to another queue"
            )));
        }
        let slot = self.slots.get_mut(buffer.slot.0).ok_or_else(|| {
            CameraError::InvalidState(format!("{op}: unknown slot {}", buffer.slot.0))
        })?;
        if slot.state != SlotState::Dequeued(buffer.generation) {
            return Err(CameraError::InvalidState(format!(
                "{op}: slot {} is not dequeued by this token",
                buffer.slot.0
            )));
        }
        slot.data = buffer.data;
        Ok(slot)
    }
}

impl PreviewSink for BufferQueue {
    fn dequeue_buffer(&mut self) -> Result<DequeuedBuffer> {
        let index = self
            .slots
            .iter()
            .position(|slot| slot.state == SlotState::Free)
            .ok_or(CameraError::BufferUnavailable)?;
        let generation = self.next_generation;
        self.next_generation += 1;

        let slot = self
            .slots
            .get_mut(index)
            .ok_or(CameraError::BufferUnavailable)?;
        slot.state = SlotState::Dequeued(generation);
        trace!(slot = index, generation, "buffer dequeued");

        Ok(DequeuedBuffer {
            queue_id: self.id,
            slot: BufferSlot(index),
            generation,
            geometry: self.geometry,
            data: std::mem::take(&mut slot.data),
        })
    }

    fn enqueue_buffer(&mut self, buffer: DequeuedBuffer) -> Result<()> {
        let index = buffer.slot.0;
        self.reclaim(buffer, "enqueue_buffer")?.state = SlotState::Queued;
        self.queued.push_back(index);
        trace!(slot = index, "buffer enqueued");
        Ok(())
    }

    fn cancel_buffer(&mut self, buffer: DequeuedBuffer) -> Result<()> {
        let index = buffer.slot.0;
        self.reclaim(buffer, "cancel_buffer")?.state = SlotState::Free;
        trace!(slot = index, "buffer cancelled");
        Ok(())
    }

    fn set_buffer_count(&mut self, count: usize) -> Result<()> {
        if count <= self.min_undequeued {
            return Err(CameraError::BadValue(format!(
                "buffer count {count} must exceed the {} buffer(s) held by the consumer",
                self.min_undequeued
            )));
        }
        self.ensure_none_dequeued("set_buffer_count")?;
        self.reallocate(count);
        debug!(count, "preview buffer count set");
        Ok(())
    }

    fn set_buffers_geometry(&mut self, geometry: Geometry) -> Result<()> {
        if geometry.width == 0 || geometry.height == 0 {
            return Err(CameraError::BadValue(format!(
                "empty geometry {}x{}",
                geometry.width, geometry.height
            )));
        }
        self.ensure_none_dequeued("set_buffers_geometry")?;
        self.geometry = geometry;
        self.reallocate(self.slots.len());
        debug!(
            width = geometry.width,
            height = geometry.height,
            format = %geometry.format,
            "preview geometry set"
        );
        Ok(())
    }

    fn set_crop(&mut self, crop: Crop) -> Result<()> {
        if crop.left > crop.right
            || crop.top > crop.bottom
            || crop.right > self.geometry.width
            || crop.bottom > self.geometry.height
        {
            return Err(CameraError::BadValue(format!("crop {crop:?} outside buffer")));
        }
        self.crop = crop;
        Ok(())
    }

    fn set_usage(&mut self, usage: Usage) -> Result<()> {
        self.usage = usage;
        Ok(())
    }

    fn set_swap_interval(&mut self, interval: u32) -> Result<()> {
        self.swap_interval = interval;
        Ok(())
    }

    fn min_undequeued_buffer_count(&self) -> usize {
        self.min_undequeued
    }
}
