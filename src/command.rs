//! Vendor-extensible command channel numbering.

use crate::traits::CameraError;

/// Commands accepted by `send_command`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Begin a smooth zoom to `arg1`.
    StartSmoothZoom,
    /// Stop a smooth zoom.
    StopSmoothZoom,
    /// Rotate preview by `arg1` degrees (0, 90, 180, 270).
    SetDisplayOrientation,
    /// Enable (`arg1 != 0`) or disable the shutter sound.
    EnableShutterSound,
    /// Play the recording start/stop sound.
    PlayRecordingSound,
    /// Start face detection of type `arg1`.
    StartFaceDetection,
    /// Stop face detection.
    StopFaceDetection,
    /// Enable (`arg1 != 0`) continuous focus-move notifications.
    EnableFocusMoveMsg,
    /// Liveness check.
    Ping,
    /// Set the number of recording buffers to `arg1`.
    SetVideoBufferCount,
    /// Set the recording pixel format.
    SetVideoFormat,
}

impl TryFrom<i32> for Command {
    type Error = CameraError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => Self::StartSmoothZoom,
            2 => Self::StopSmoothZoom,
            3 => Self::SetDisplayOrientation,
            4 => Self::EnableShutterSound,
            5 => Self::PlayRecordingSound,
            6 => Self::StartFaceDetection,
            7 => Self::StopFaceDetection,
            8 => Self::EnableFocusMoveMsg,
            9 => Self::Ping,
            10 => Self::SetVideoBufferCount,
            11 => Self::SetVideoFormat,
            other => {
                return Err(CameraError::Unsupported(format!("unknown command {other}")));
            }
        })
    }
}

impl From<Command> for i32 {
    fn from(command: Command) -> Self {
        match command {
            Command::StartSmoothZoom => 1,
            Command::StopSmoothZoom => 2,
            Command::SetDisplayOrientation => 3,
            Command::EnableShutterSound => 4,
            Command::PlayRecordingSound => 5,
            Command::StartFaceDetection => 6,
            Command::StopFaceDetection => 7,
            Command::EnableFocusMoveMsg => 8,
            Command::Ping => 9,
            Command::SetVideoBufferCount => 10,
            Command::SetVideoFormat => 11,
        }
    }
}
