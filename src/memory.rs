//! Memory provider: shared, reference-counted regions carrying callback payloads.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::traits::{CameraError, Result};

/// Opaque out-of-band identity of a region, used by consumers to refer back
/// to a delivered buffer (e.g. when releasing a recording frame).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionHandle(pub u64);

impl fmt::Display for RegionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "region#{}", self.0)
    }
}

#[derive(Debug, Default)]
struct Accounting {
    in_use: AtomicUsize,
    live: AtomicUsize,
}

struct RegionInner {
    handle: RegionHandle,
    bytes: Box<[u8]>,
    accounting: Arc<Accounting>,
}

impl Drop for RegionInner {
    fn drop(&mut self) {
        self.accounting
            .in_use
            .fetch_sub(self.bytes.len(), Ordering::AcqRel);
        self.accounting.live.fetch_sub(1, Ordering::AcqRel);
        debug!(handle = %self.handle, size = self.bytes.len(), "region reclaimed");
    }
}

/// A provider-allocated block of known size.
///
/// Cloning shares the same block. The driver may write into a region only
/// while it holds the sole reference; once a clone has reached a consumer
/// the contents are frozen.
pub struct MemoryRegion {
    inner: Arc<RegionInner>,
}

impl MemoryRegion {
    /// Size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.bytes.len()
    }

    /// Out-of-band handle.
    #[must_use]
    pub fn handle(&self) -> RegionHandle {
        self.inner.handle
    }

    /// Read-only view of the payload.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.inner.bytes
    }

    /// Copy `src` into the start of the region.
    ///
    /// Fails with `InvalidState` once the region is shared and with `BadValue`
    /// if `src` does not fit.
    pub fn write(&mut self, src: &[u8]) -> Result<()> {
        let size = self.size();
        let handle = self.handle();
        let inner = Arc::get_mut(&mut self.inner).ok_or_else(|| {
            CameraError::InvalidState(format!("{handle} is shared and can no longer be written"))
        })?;
        let dst = inner.bytes.get_mut(..src.len()).ok_or_else(|| {
            CameraError::BadValue(format!("{} bytes do not fit a {size} byte region", src.len()))
        })?;
        dst.copy_from_slice(src);
        Ok(())
    }
}

impl Clone for MemoryRegion {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl fmt::Debug for MemoryRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryRegion")
            .field("handle", &self.inner.handle)
            .field("size", &self.size())
            .finish()
    }
}

/// Allocator for callback payloads.
///
/// The driver keeps no ownership of a region after delivering it; reclaiming
/// it is the provider's business.
pub trait MemoryProvider: Send + Sync {
    /// Allocate a zeroed region of `size` bytes.
    fn request_memory(&self, size: usize) -> Result<MemoryRegion>;
}

/// Heap-backed provider with a fixed byte budget.
///
/// Bytes return to the budget when the last reference to a region drops,
/// whichever side drops it.
#[derive(Debug)]
pub struct HeapMemoryProvider {
    capacity: usize,
    next_handle: AtomicU64,
    accounting: Arc<Accounting>,
}

impl HeapMemoryProvider {
    /// Create a provider that can hold at most `capacity` bytes at once.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            next_handle: AtomicU64::new(1),
            accounting: Arc::new(Accounting::default()),
        }
    }

    /// Budget in bytes.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently held by live regions.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.accounting.in_use.load(Ordering::Acquire)
    }

    /// Number of regions not yet reclaimed.
    #[must_use]
    pub fn live_regions(&self) -> usize {
        self.accounting.live.load(Ordering::Acquire)
    }
}

impl Default for HeapMemoryProvider {
    fn default() -> Self {
        Self::new(64 * 1024 * 1024)
    }
}

impl MemoryProvider for HeapMemoryProvider {
    fn request_memory(&self, size: usize) -> Result<MemoryRegion> {
        if size == 0 {
            return Err(CameraError::BadValue("zero-sized region".to_owned()));
        }

        let reserved = self
            .accounting
            .in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(size).filter(|total| *total <= self.capacity)
            });
        if let Err(used) = reserved {
            let available = self.capacity.saturating_sub(used);
            warn!(size, available, "memory provider exhausted");
            return Err(CameraError::AllocationFailure {
                requested: size,
                available,
            });
        }
        self.accounting.live.fetch_add(1, Ordering::AcqRel);

        let handle = RegionHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        debug!(%handle, size, "region allocated");
        Ok(MemoryRegion {
            inner: Arc::new(RegionInner {
                handle,
                bytes: vec![0u8; size].into_boxed_slice(),
                accounting: Arc::clone(&self.accounting),
            }),
        })
    }
}
