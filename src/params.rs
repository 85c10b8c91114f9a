//! Key/value parameter exchange in the `key=value;key=value` encoding.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::traits::{CameraError, Result};

/// Preview size key.
pub const PREVIEW_SIZE: &str = "preview-size";
/// Picture size key.
pub const PICTURE_SIZE: &str = "picture-size";
/// Video size key.
pub const VIDEO_SIZE: &str = "video-size";
/// Preview frame rate key.
pub const PREVIEW_FRAME_RATE: &str = "preview-frame-rate";
/// Focus mode key.
pub const FOCUS_MODE: &str = "focus-mode";
/// JPEG quality key.
pub const JPEG_QUALITY: &str = "jpeg-quality";
/// Supported preview sizes (read-only).
pub const SUPPORTED_PREVIEW_SIZES: &str = "preview-size-values";
/// Supported focus modes (read-only).
pub const SUPPORTED_FOCUS_MODES: &str = "focus-mode-values";

/// Focus mode names.
pub const FOCUS_MODE_AUTO: &str = "auto";
/// Fixed focus.
pub const FOCUS_MODE_FIXED: &str = "fixed";
/// Focus at infinity.
pub const FOCUS_MODE_INFINITY: &str = "infinity";

/// What a device accepts, used to validate incoming parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamLimits {
    /// Sizes valid for preview, picture and video.
    pub sizes: Vec<(u32, u32)>,
    /// Valid focus modes.
    pub focus_modes: Vec<&'static str>,
    /// Highest preview frame rate.
    pub max_frame_rate: u32,
}

/// A `WxH` size value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Size {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl FromStr for Size {
    type Err = CameraError;

    fn from_str(value: &str) -> Result<Self> {
        let (w, h) = value
            .split_once('x')
            .ok_or_else(|| CameraError::BadValue(format!("size {value:?} is not WxH")))?;
        let parse = |part: &str| {
            part.parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| CameraError::BadValue(format!("size {value:?} is not WxH")))
        };
        Ok(Self {
            width: parse(w)?,
            height: parse(h)?,
        })
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// An ordered set of camera parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parameters {
    entries: BTreeMap<String, String>,
}

impl Parameters {
    /// Defaults for a device producing `preview` frames within `limits`.
    #[must_use]
    pub fn defaults(preview: Size, limits: &ParamLimits) -> Self {
        let sizes = limits
            .sizes
            .iter()
            .map(|(w, h)| format!("{w}x{h}"))
            .collect::<Vec<_>>()
            .join(",");
        let focus = limits
            .focus_modes
            .first()
            .copied()
            .unwrap_or(FOCUS_MODE_FIXED);

        let mut params = Self::default();
        params.set(PREVIEW_SIZE, &preview.to_string());
        params.set(PICTURE_SIZE, &preview.to_string());
        params.set(VIDEO_SIZE, &preview.to_string());
        params.set(PREVIEW_FRAME_RATE, "30");
        params.set(FOCUS_MODE, focus);
        params.set(JPEG_QUALITY, "90");
        params.set(SUPPORTED_PREVIEW_SIZES, &sizes);
        params.set(SUPPORTED_FOCUS_MODES, &limits.focus_modes.join(","));
        params
    }

    /// Parse the flattened encoding. An empty string is an empty set.
    pub fn parse(flat: &str) -> Result<Self> {
        let mut params = Self::default();
        for entry in flat.split(';').filter(|entry| !entry.is_empty()) {
            let (key, value) = entry.split_once('=').ok_or_else(|| {
                CameraError::BadValue(format!("parameter {entry:?} has no value"))
            })?;
            if key.is_empty() {
                return Err(CameraError::BadValue(format!(
                    "parameter {entry:?} has no key"
                )));
            }
            params.set(key, value);
        }
        Ok(params)
    }

    /// Flatten back to `key=value;key=value`.
    #[must_use]
    pub fn flatten(&self) -> String {
        self.to_string()
    }

    /// Look up a raw value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Set a raw value.
    pub fn set(&mut self, key: &str, value: &str) {
        self.entries.insert(key.to_owned(), value.to_owned());
    }

    /// Look up a `WxH` value.
    pub fn size(&self, key: &str) -> Result<Option<Size>> {
        self.get(key).map(str::parse::<Size>).transpose()
    }

    /// Iterate over entries.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Overlay `update` on a copy of `self` and check the result against `limits`.
    ///
    /// Nothing is applied unless every entry is valid.
    pub fn merged(&self, update: &Self, limits: &ParamLimits) -> Result<Self> {
        let mut merged = self.clone();
        for (key, value) in update.iter() {
            match key {
                PREVIEW_SIZE | PICTURE_SIZE | VIDEO_SIZE => {
                    let size: Size = value.parse()?;
                    if !limits.sizes.contains(&(size.width, size.height)) {
                        return Err(CameraError::BadValue(format!(
                            "{key}={size} is not a supported size"
                        )));
                    }
                }
                PREVIEW_FRAME_RATE => {
                    let rate = value.parse::<u32>().ok().filter(|rate| {
                        (1..=limits.max_frame_rate).contains(rate)
                    });
                    if rate.is_none() {
                        return Err(CameraError::BadValue(format!(
                            "{key}={value} outside 1..={}",
                            limits.max_frame_rate
                        )));
                    }
                }
                FOCUS_MODE => {
                    if !limits.focus_modes.iter().any(|mode| *mode == value) {
                        return Err(CameraError::BadValue(format!(
                            "{key}={value} is not a supported focus mode"
                        )));
                    }
                }
                JPEG_QUALITY => {
                    if !value.parse::<u32>().is_ok_and(|q| (1..=100).contains(&q)) {
                        return Err(CameraError::BadValue(format!("{key}={value} outside 1..=100")));
                    }
                }
                SUPPORTED_PREVIEW_SIZES | SUPPORTED_FOCUS_MODES => {
                    if self.get(key) != Some(value) {
                        return Err(CameraError::BadValue(format!("{key} is read-only")));
                    }
                }
                _ => {
                    return Err(CameraError::BadValue(format!("unknown parameter {key:?}")));
                }
            }
            merged.set(key, value);
        }
        Ok(merged)
    }
}

impl fmt::Display for Parameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in &self.entries {
            if !first {
                f.write_str(";")?;
            }
            write!(f, "{key}={value}")?;
            first = false;
        }
        Ok(())
    }
}
