//! Message categories and the per-device message gate.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::atomic::{AtomicU32, Ordering};

/// A set of message categories, as a bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MsgType(u32);

impl MsgType {
    /// No categories.
    pub const NONE: Self = Self(0);
    /// Asynchronous error notification.
    pub const ERROR: Self = Self(0x0001);
    /// Shutter fired during a capture.
    pub const SHUTTER: Self = Self(0x0002);
    /// Autofocus completed.
    pub const FOCUS: Self = Self(0x0004);
    /// Zoom progress.
    pub const ZOOM: Self = Self(0x0008);
    /// Preview frame data.
    pub const PREVIEW_FRAME: Self = Self(0x0010);
    /// Recording (video) frame data.
    pub const VIDEO_FRAME: Self = Self(0x0020);
    /// Post-capture preview image.
    pub const POSTVIEW_FRAME: Self = Self(0x0040);
    /// Raw capture data.
    pub const RAW_IMAGE: Self = Self(0x0080);
    /// Encoded capture data.
    pub const COMPRESSED_IMAGE: Self = Self(0x0100);
    /// Raw capture completed, without data.
    pub const RAW_IMAGE_NOTIFY: Self = Self(0x0200);
    /// Per-frame preview metadata.
    pub const PREVIEW_METADATA: Self = Self(0x0400);
    /// Continuous focus lens movement.
    pub const FOCUS_MOVE: Self = Self(0x0800);
    /// Every category.
    pub const ALL: Self = Self(0xFFFF);

    const NAMED: [(Self, &'static str); 12] = [
        (Self::ERROR, "ERROR"),
        (Self::SHUTTER, "SHUTTER"),
        (Self::FOCUS, "FOCUS"),
        (Self::ZOOM, "ZOOM"),
        (Self::PREVIEW_FRAME, "PREVIEW_FRAME"),
        (Self::VIDEO_FRAME, "VIDEO_FRAME"),
        (Self::POSTVIEW_FRAME, "POSTVIEW_FRAME"),
        (Self::RAW_IMAGE, "RAW_IMAGE"),
        (Self::COMPRESSED_IMAGE, "COMPRESSED_IMAGE"),
        (Self::RAW_IMAGE_NOTIFY, "RAW_IMAGE_NOTIFY"),
        (Self::PREVIEW_METADATA, "PREVIEW_METADATA"),
        (Self::FOCUS_MOVE, "FOCUS_MOVE"),
    ];

    /// Build a set from raw bits. Bits outside [`MsgType::ALL`] are dropped.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits & Self::ALL.0)
    }

    /// Raw bitmask.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Whether every category in `other` is also in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether the set is empty.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterate over the named single categories present in this set.
    pub fn iter(self) -> impl Iterator<Item = Self> {
        Self::NAMED
            .into_iter()
            .map(|(category, _)| category)
            .filter(move |category| self.contains(*category))
    }
}

impl BitOr for MsgType {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for MsgType {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for MsgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("NONE");
        }
        let mut first = true;
        for (category, name) in Self::NAMED {
            if self.contains(category) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        let unnamed = self.0 & !Self::NAMED.iter().fold(0, |acc, (c, _)| acc | c.0);
        if unnamed != 0 {
            if !first {
                f.write_str("|")?;
            }
            write!(f, "{unnamed:#x}")?;
        }
        Ok(())
    }
}

/// Bitmask of enabled message categories for one device.
///
/// Mutated by the consumer and read by the driver; an atomic is the only
/// synchronisation needed.
#[derive(Debug, Default)]
pub struct MessageGate {
    bits: AtomicU32,
}

impl MessageGate {
    /// Create a gate with every category disabled.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bits: AtomicU32::new(0),
        }
    }

    /// Enable a category or set of categories.
    pub fn enable(&self, msg: MsgType) {
        self.bits.fetch_or(msg.bits(), Ordering::AcqRel);
    }

    /// Disable a category or set of categories.
    ///
    /// Returns the categories that were enabled before this call and are now off.
    pub fn disable(&self, msg: MsgType) -> MsgType {
        let previous = self.bits.fetch_and(!msg.bits(), Ordering::AcqRel);
        MsgType::from_bits(previous & msg.bits())
    }

    /// AND query: true only if every category in `msg` is enabled.
    ///
    /// An empty query names no category and reports false.
    pub fn is_enabled(&self, msg: MsgType) -> bool {
        !msg.is_empty() && self.enabled().contains(msg)
    }

    /// Snapshot of the enabled set.
    pub fn enabled(&self) -> MsgType {
        MsgType::from_bits(self.bits.load(Ordering::Acquire))
    }

    /// Disable everything.
    pub fn clear(&self) {
        self.bits.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_and_semantics() {
        let gate = MessageGate::new();
        gate.enable(MsgType::FOCUS | MsgType::SHUTTER);

        assert!(gate.is_enabled(MsgType::FOCUS));
        assert!(gate.is_enabled(MsgType::FOCUS | MsgType::SHUTTER));
        assert!(!gate.is_enabled(MsgType::FOCUS | MsgType::VIDEO_FRAME));
        assert!(!gate.is_enabled(MsgType::NONE));
    }

    #[test]
    fn test_disable_reports_switched_bits() {
        let gate = MessageGate::new();
        gate.enable(MsgType::VIDEO_FRAME);

        let off = gate.disable(MsgType::VIDEO_FRAME | MsgType::FOCUS);
        assert_eq!(off, MsgType::VIDEO_FRAME);
        assert_eq!(gate.disable(MsgType::VIDEO_FRAME), MsgType::NONE);
    }

    /// Exhaustive check over the 12 named categories: a short xorshift walk
    /// of enable/disable operations, with every subset queried after each step.
    #[test]
    fn test_and_query_matches_model_for_all_subsets() {
        let categories: Vec<MsgType> = MsgType::ALL.iter().collect();
        assert_eq!(categories.len(), 12);

        let gate = MessageGate::new();
        let mut model = 0u32;
        let mut seed = 0x2545_f491_u32;

        for _ in 0..64 {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            let mask = MsgType::from_bits(seed & 0x0FFF);
            if seed & 0x8000_0000 == 0 {
                gate.enable(mask);
                model |= mask.bits();
            } else {
                gate.disable(mask);
                model &= !mask.bits();
            }

            for subset in 1u32..(1 << 12) {
                let query = MsgType::from_bits(subset);
                let expected = model & subset == subset;
                assert_eq!(gate.is_enabled(query), expected, "query {query} model {model:#x}");
            }
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(MsgType::NONE.to_string(), "NONE");
        assert_eq!(
            (MsgType::FOCUS | MsgType::VIDEO_FRAME).to_string(),
            "FOCUS|VIDEO_FRAME"
        );
        assert_eq!(MsgType::from_bits(0x1000).to_string(), "0x1000");
    }
}
