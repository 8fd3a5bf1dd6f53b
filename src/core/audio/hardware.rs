//! Platform audio hardware seam.

use std::fmt;

use parking_lot::Mutex;
use thiserror::Error;

/// Non-fatal failure talking to the audio hardware.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Audio route error: {0}")]
pub struct AudioRouteError(pub String);

/// Hardware audio mode, mirroring the telephony modes of mobile platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioMode {
    #[default]
    Normal,
    Ringtone,
    InCall,
    InCommunication,
}

impl fmt::Display for AudioMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioMode::Normal => write!(f, "NORMAL"),
            AudioMode::Ringtone => write!(f, "RINGTONE"),
            AudioMode::InCall => write!(f, "IN_CALL"),
            AudioMode::InCommunication => write!(f, "IN_COMMUNICATION"),
        }
    }
}

/// Current and maximum voice-call stream volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeLevel {
    pub current: u32,
    pub max: u32,
}

/// Access to the device's audio routing.
///
/// Implementations wrap the platform audio manager. All methods are
/// synchronous; they are expected to be cheap property reads and writes.
pub trait AudioHardware: Send + Sync {
    fn mode(&self) -> Result<AudioMode, AudioRouteError>;
    fn set_mode(&self, mode: AudioMode) -> Result<(), AudioRouteError>;

    fn is_speaker_on(&self) -> Result<bool, AudioRouteError>;
    fn set_speaker_on(&self, on: bool) -> Result<(), AudioRouteError>;

    /// Request exclusive focus for voice communication. Returns whether it
    /// was granted.
    fn request_focus(&self) -> Result<bool, AudioRouteError>;
    fn abandon_focus(&self) -> Result<(), AudioRouteError>;

    fn voice_volume(&self) -> Result<VolumeLevel, AudioRouteError>;
    fn set_voice_volume(&self, level: u32) -> Result<(), AudioRouteError>;
}

// =============================================================================
// Virtual Hardware
// =============================================================================

#[derive(Debug, Clone)]
struct VirtualState {
    mode: AudioMode,
    speaker_on: bool,
    focus_held: bool,
    volume: u32,
    max_volume: u32,
    grant_focus: bool,
    fail_writes: bool,
    mode_writes: usize,
    speaker_writes: usize,
}

/// In-memory `AudioHardware` for hosts without a telephony audio stack.
///
/// Counts writes so callers can check that redundant updates are skipped,
/// and can be told to deny focus or fail writes.
#[derive(Debug)]
pub struct VirtualAudioHardware {
    state: Mutex<VirtualState>,
}

impl VirtualAudioHardware {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(VirtualState {
                mode: AudioMode::Normal,
                speaker_on: false,
                focus_held: false,
                volume: 5,
                max_volume: 10,
                grant_focus: true,
                fail_writes: false,
                mode_writes: 0,
                speaker_writes: 0,
            }),
        }
    }

    /// Start from a given mode and speaker state.
    pub fn with_state(mode: AudioMode, speaker_on: bool) -> Self {
        let hardware = Self::new();
        {
            let mut state = hardware.state.lock();
            state.mode = mode;
            state.speaker_on = speaker_on;
        }
        hardware
    }

    pub fn set_grant_focus(&self, grant: bool) {
        self.state.lock().grant_focus = grant;
    }

    /// Make every write fail, as a platform without the permission would.
    pub fn set_fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    /// Simulate the platform changing routing behind the coordinator's back.
    pub fn force_speaker(&self, on: bool) {
        self.state.lock().speaker_on = on;
    }

    pub fn focus_held(&self) -> bool {
        self.state.lock().focus_held
    }

    pub fn mode_writes(&self) -> usize {
        self.state.lock().mode_writes
    }

    pub fn speaker_writes(&self) -> usize {
        self.state.lock().speaker_writes
    }

    fn check_writable(state: &VirtualState) -> Result<(), AudioRouteError> {
        if state.fail_writes {
            Err(AudioRouteError("audio settings are not writable".to_string()))
        } else {
            Ok(())
        }
    }
}

impl Default for VirtualAudioHardware {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioHardware for VirtualAudioHardware {
    fn mode(&self) -> Result<AudioMode, AudioRouteError> {
        Ok(self.state.lock().mode)
    }

    fn set_mode(&self, mode: AudioMode) -> Result<(), AudioRouteError> {
        let mut state = self.state.lock();
        Self::check_writable(&state)?;
        state.mode = mode;
        state.mode_writes += 1;
        Ok(())
    }

    fn is_speaker_on(&self) -> Result<bool, AudioRouteError> {
        Ok(self.state.lock().speaker_on)
    }

    fn set_speaker_on(&self, on: bool) -> Result<(), AudioRouteError> {
        let mut state = self.state.lock();
        Self::check_writable(&state)?;
        state.speaker_on = on;
        state.speaker_writes += 1;
        Ok(())
    }

    fn request_focus(&self) -> Result<bool, AudioRouteError> {
        let mut state = self.state.lock();
        state.focus_held = state.grant_focus;
        Ok(state.focus_held)
    }

    fn abandon_focus(&self) -> Result<(), AudioRouteError> {
        self.state.lock().focus_held = false;
        Ok(())
    }

    fn voice_volume(&self) -> Result<VolumeLevel, AudioRouteError> {
        let state = self.state.lock();
        Ok(VolumeLevel {
            current: state.volume,
            max: state.max_volume,
        })
    }

    fn set_voice_volume(&self, level: u32) -> Result<(), AudioRouteError> {
        let mut state = self.state.lock();
        Self::check_writable(&state)?;
        state.volume = level.min(state.max_volume);
        Ok(())
    }
}
