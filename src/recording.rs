//! Ownership ledger for delivered recording frames.

use std::collections::{BTreeMap, VecDeque};

use tracing::{debug, warn};

use crate::memory::RegionHandle;
use crate::traits::{CameraError, Result};

/// Who is responsible for a delivered recording frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOwner {
    /// The consumer holds it and must release it.
    Consumer,
    /// Video frames were disabled; the driver manages the frame and the
    /// consumer must not touch it.
    Driver,
}

/// Result of a consumer release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Frame returned to the driver.
    Released,
    /// Frame was already driver-managed; nothing to do.
    Ignored,
}

/// Reclaimed handles remembered so late consumer releases stay harmless.
const RETIRED_CAPACITY: usize = 256;

/// Tracks every recording frame handed to the consumer.
#[derive(Debug, Default)]
pub struct RecordingLedger {
    frames: BTreeMap<RegionHandle, FrameOwner>,
    retired: VecDeque<RegionHandle>,
    delivered: u64,
    released_by_consumer: u64,
    reclaimed_by_driver: u64,
}

impl RecordingLedger {
    /// Record a frame just delivered to the consumer.
    pub fn track(&mut self, handle: RegionHandle) {
        self.frames.insert(handle, FrameOwner::Consumer);
        self.delivered += 1;
    }

    /// Current owner of a frame, if it is still tracked.
    #[must_use]
    pub fn owner(&self, handle: RegionHandle) -> Option<FrameOwner> {
        self.frames.get(&handle).copied()
    }

    /// Frames the consumer holds and has not released.
    #[must_use]
    pub fn consumer_owned(&self) -> usize {
        self.count(FrameOwner::Consumer)
    }

    /// Frames handed back to driver management and not yet reclaimed.
    #[must_use]
    pub fn driver_managed(&self) -> usize {
        self.count(FrameOwner::Driver)
    }

    /// Total frames ever delivered.
    #[must_use]
    pub const fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Frames the consumer released explicitly.
    #[must_use]
    pub const fn released_by_consumer(&self) -> u64 {
        self.released_by_consumer
    }

    /// Frames the driver reclaimed itself.
    #[must_use]
    pub const fn reclaimed_by_driver(&self) -> u64 {
        self.reclaimed_by_driver
    }

    /// Consumer hands a frame back.
    pub fn release(&mut self, handle: RegionHandle) -> Result<ReleaseOutcome> {
        match self.frames.get(&handle).copied() {
            Some(FrameOwner::Consumer) => {
                self.frames.remove(&handle);
                self.released_by_consumer += 1;
                Ok(ReleaseOutcome::Released)
            }
            Some(FrameOwner::Driver) => {
                warn!(%handle, "release of a driver-managed recording frame ignored");
                Ok(ReleaseOutcome::Ignored)
            }
            None if self.retired.contains(&handle) => {
                debug!(%handle, "release of a reclaimed recording frame ignored");
                Ok(ReleaseOutcome::Ignored)
            }
            None => Err(CameraError::BadValue(format!(
                "{handle} is not an outstanding recording frame"
            ))),
        }
    }

    /// Video frames were disabled: every outstanding frame becomes driver-managed.
    ///
    /// Returns how many frames changed hands.
    pub fn revert_to_driver(&mut self) -> usize {
        let mut reverted = 0;
        for owner in self.frames.values_mut() {
            if *owner == FrameOwner::Consumer {
                *owner = FrameOwner::Driver;
                reverted += 1;
            }
        }
        if reverted > 0 {
            debug!(reverted, "recording frames reverted to driver management");
        }
        reverted
    }

    /// Drop every driver-managed frame. Returns how many were reclaimed.
    ///
    /// Reclaimed handles are retired: a later consumer release of one is
    /// ignored rather than rejected.
    pub fn reclaim_driver_managed(&mut self) -> usize {
        let mut reclaimed = 0;
        let retired = &mut self.retired;
        self.frames.retain(|handle, owner| {
            if *owner == FrameOwner::Consumer {
                return true;
            }
            if retired.len() == RETIRED_CAPACITY {
                retired.pop_front();
            }
            retired.push_back(*handle);
            reclaimed += 1;
            false
        });
        self.reclaimed_by_driver += reclaimed as u64;
        reclaimed
    }

    /// Recording ended: the driver takes back every delivered frame, whoever
    /// held it, and reclaims them. Returns how many were reclaimed.
    pub fn reclaim_all(&mut self) -> usize {
        self.revert_to_driver();
        self.reclaim_driver_managed()
    }

    /// Stop tracking a frame that never reached the consumer.
    pub fn forget(&mut self, handle: RegionHandle) {
        if self.frames.remove(&handle).is_some() {
            self.delivered = self.delivered.saturating_sub(1);
        }
    }

    /// Forget every frame, consumer-owned or not, and the retired handles.
    /// Used on release.
    pub fn clear(&mut self) -> usize {
        let dropped = self.frames.len();
        self.reclaimed_by_driver += dropped as u64;
        self.frames.clear();
        self.retired.clear();
        dropped
    }

    fn count(&self, wanted: FrameOwner) -> usize {
        self.frames.values().filter(|owner| **owner == wanted).count()
    }
}

/// Descriptor carried by recording frames in metadata mode, in place of
/// sample data. The consumer resolves `buffer_id` through its own channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetadataDescriptor {
    /// Buffer kind; [`MetadataDescriptor::CAMERA_SOURCE`] for camera frames.
    pub kind: u32,
    /// Identity of the frame the descriptor points at.
    pub buffer_id: u64,
}

impl MetadataDescriptor {
    /// Kind tag for frames produced by the camera source.
    pub const CAMERA_SOURCE: u32 = 0;
    /// Encoded length in bytes.
    pub const LEN: usize = 16;

    /// Little-endian encoding: kind, four reserved bytes, buffer id.
    #[must_use]
    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        let (kind, rest) = out.split_at_mut(4);
        kind.copy_from_slice(&self.kind.to_le_bytes());
        if let Some(id) = rest.get_mut(4..) {
            id.copy_from_slice(&self.buffer_id.to_le_bytes());
        }
        out
    }

    /// Decode a descriptor from the start of `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let short = || {
            CameraError::BadValue(format!(
                "{} bytes is too short for a descriptor",
                bytes.len()
            ))
        };
        let kind = bytes.get(..4).and_then(|b| b.try_into().ok()).ok_or_else(short)?;
        let id = bytes.get(8..16).and_then(|b| b.try_into().ok()).ok_or_else(short)?;
        Ok(Self {
            kind: u32::from_le_bytes(kind),
            buffer_id: u64::from_le_bytes(id),
        })
    }
}
