//! Device state machine for preview, recording, focus and capture.
//!
//! Every transition either succeeds or returns an error with the state left
//! exactly as it was.

use std::fmt;

use tracing::debug;

use crate::traits::{CameraError, Result};

/// Streaming state of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PreviewState {
    /// Nothing streaming.
    #[default]
    Idle,
    /// Preview frames flowing to the sink.
    Previewing,
    /// Preview plus recording.
    Recording,
}

/// What `stop_preview` had to tear down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Teardown {
    /// Preview was running.
    pub preview: bool,
    /// Recording was running.
    pub recording: bool,
    /// A focus sweep was outstanding.
    pub focusing: bool,
    /// A capture was outstanding.
    pub capturing: bool,
}

/// Full device state: streaming state plus the focus and capture sub-states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceState {
    preview: PreviewState,
    focusing: bool,
    capturing: bool,
    released: bool,
}

impl DeviceState {
    /// Streaming state.
    #[must_use]
    pub const fn preview(&self) -> PreviewState {
        self.preview
    }

    /// Whether preview (with or without recording) is running.
    #[must_use]
    pub const fn is_preview_active(&self) -> bool {
        !matches!(self.preview, PreviewState::Idle)
    }

    /// Whether recording is running.
    #[must_use]
    pub const fn is_recording(&self) -> bool {
        matches!(self.preview, PreviewState::Recording)
    }

    /// Whether a focus sweep is outstanding.
    #[must_use]
    pub const fn is_focusing(&self) -> bool {
        self.focusing
    }

    /// Whether a capture is outstanding.
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.capturing
    }

    /// Whether `release` has been called.
    #[must_use]
    pub const fn is_released(&self) -> bool {
        self.released
    }

    /// Fail if the device has been released.
    pub fn ensure_open(&self, op: &str) -> Result<()> {
        if self.released {
            return Err(CameraError::InvalidState(format!(
                "{op} called on a released device"
            )));
        }
        Ok(())
    }

    /// `Idle -> Previewing`. Returns false when preview was already running.
    pub fn start_preview(&mut self, sink_installed: bool) -> Result<bool> {
        self.ensure_open("start_preview")?;
        if self.is_preview_active() {
            return Ok(false);
        }
        if !sink_installed {
            return Err(CameraError::InvalidState(
                "start_preview without a preview window".to_owned(),
            ));
        }
        self.preview = PreviewState::Previewing;
        debug!(state = %self, "preview started");
        Ok(true)
    }

    /// Any preview-active state `-> Idle`, leaving recording, focus and capture.
    pub fn stop_preview(&mut self) -> Teardown {
        let teardown = Teardown {
            preview: self.is_preview_active(),
            recording: self.is_recording(),
            focusing: self.focusing,
            capturing: self.capturing,
        };
        self.preview = PreviewState::Idle;
        self.focusing = false;
        self.capturing = false;
        if teardown.preview {
            debug!(?teardown, "preview stopped");
        }
        teardown
    }

    /// `Previewing -> Recording`.
    pub fn start_recording(&mut self) -> Result<()> {
        self.ensure_open("start_recording")?;
        match self.preview {
            PreviewState::Previewing => {
                self.preview = PreviewState::Recording;
                debug!(state = %self, "recording started");
                Ok(())
            }
            PreviewState::Recording => Err(CameraError::InvalidState(
                "recording already in progress".to_owned(),
            )),
            PreviewState::Idle => Err(CameraError::InvalidState(
                "start_recording requires an active preview".to_owned(),
            )),
        }
    }

    /// `Recording -> Previewing`. Returns false when not recording.
    pub fn stop_recording(&mut self) -> bool {
        if !self.is_recording() {
            return false;
        }
        self.preview = PreviewState::Previewing;
        debug!(state = %self, "recording stopped");
        true
    }

    /// Enter `Focusing`. A sweep already outstanding is superseded.
    pub fn begin_focus(&mut self) -> Result<()> {
        self.ensure_open("auto_focus")?;
        if !self.is_preview_active() {
            return Err(CameraError::InvalidState(
                "auto_focus requires an active preview".to_owned(),
            ));
        }
        self.focusing = true;
        Ok(())
    }

    /// Leave `Focusing`. Returns whether a sweep was outstanding.
    pub fn end_focus(&mut self) -> bool {
        std::mem::replace(&mut self.focusing, false)
    }

    /// Enter `Capturing`.
    pub fn begin_capture(&mut self) -> Result<()> {
        self.ensure_open("take_picture")?;
        if !self.is_preview_active() {
            return Err(CameraError::InvalidState(
                "take_picture requires an active preview".to_owned(),
            ));
        }
        if self.capturing {
            return Err(CameraError::InvalidState(
                "a capture is already in progress".to_owned(),
            ));
        }
        self.capturing = true;
        Ok(())
    }

    /// Leave `Capturing`. Returns whether a capture was outstanding.
    pub fn end_capture(&mut self) -> bool {
        std::mem::replace(&mut self.capturing, false)
    }

    /// Terminal transition. Returns false if already released.
    pub fn release(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.stop_preview();
        self.released = true;
        true
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.released {
            return f.write_str("Released");
        }
        match self.preview {
            PreviewState::Idle => f.write_str("Idle")?,
            PreviewState::Previewing => f.write_str("PreviewRunning")?,
            PreviewState::Recording => f.write_str("PreviewRunning+Recording")?,
        }
        if self.focusing {
            f.write_str("+Focusing")?;
        }
        if self.capturing {
            f.write_str("+Capturing")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_requires_sink() {
        let mut state = DeviceState::default();
        assert!(matches!(
            state.start_preview(false),
            Err(CameraError::InvalidState(_))
        ));
        assert_eq!(state, DeviceState::default());

        assert!(state.start_preview(true).expect("preview should start"));
        assert!(!state.start_preview(true).expect("idempotent start"));
        assert_eq!(state.preview(), PreviewState::Previewing);
    }

    #[test]
    fn test_recording_transitions() {
        let mut state = DeviceState::default();
        assert!(state.start_recording().is_err());
        assert_eq!(state.preview(), PreviewState::Idle);

        state.start_preview(true).expect("preview should start");
        state.start_recording().expect("recording should start");
        let before = state;
        assert!(state.start_recording().is_err());
        assert_eq!(state, before, "failed transition leaves state unchanged");

        assert!(state.stop_recording());
        assert!(!state.stop_recording());
        assert_eq!(state.preview(), PreviewState::Previewing);
    }

    #[test]
    fn test_stop_preview_forces_sub_states() {
        let mut state = DeviceState::default();
        state.start_preview(true).expect("preview should start");
        state.start_recording().expect("recording should start");
        state.begin_focus().expect("focus should start");
        state.begin_capture().expect("capture should start");
        assert_eq!(
            state.to_string(),
            "PreviewRunning+Recording+Focusing+Capturing"
        );

        let teardown = state.stop_preview();
        assert_eq!(
            teardown,
            Teardown {
                preview: true,
                recording: true,
                focusing: true,
                capturing: true
            }
        );
        assert_eq!(state, DeviceState::default());
        assert_eq!(state.stop_preview(), Teardown::default());
    }

    #[test]
    fn test_capture_and_focus_need_preview() {
        let mut state = DeviceState::default();
        assert!(state.begin_focus().is_err());
        assert!(state.begin_capture().is_err());

        state.start_preview(true).expect("preview should start");
        state.begin_capture().expect("capture should start");
        assert!(state.begin_capture().is_err());
        assert!(state.end_capture());
        assert!(!state.end_capture());
    }

    #[test]
    fn test_release_is_terminal() {
        let mut state = DeviceState::default();
        state.start_preview(true).expect("preview should start");
        assert!(state.release());
        assert!(!state.release());
        assert!(!state.is_preview_active());
        assert!(state.start_preview(true).is_err());
        assert_eq!(state.to_string(), "Released");
    }
}
