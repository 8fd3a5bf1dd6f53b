//! Call-scoped audio routing.
//!
//! The coordinator is the only component that mutates audio hardware. A call
//! is bracketed by [`AudioRouteCoordinator::begin_call`], which snapshots the
//! hardware state, and [`AudioRouteCoordinator::end_call`], which restores
//! it. The "call active" flag guarantees the snapshot is never captured twice
//! without an intervening restore.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::hardware::{AudioHardware, AudioMode, AudioRouteError};

/// Output route for call audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RouteMode {
    Earpiece,
    #[default]
    Speaker,
}

impl RouteMode {
    pub fn from_speaker(enabled: bool) -> Self {
        if enabled {
            RouteMode::Speaker
        } else {
            RouteMode::Earpiece
        }
    }

    fn speaker_on(&self) -> bool {
        matches!(self, RouteMode::Speaker)
    }
}

impl fmt::Display for RouteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteMode::Earpiece => write!(f, "earpiece"),
            RouteMode::Speaker => write!(f, "speaker"),
        }
    }
}

/// Audio focus notification from the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusChange {
    Gain,
    Loss,
    LossTransient,
    LossTransientCanDuck,
}

/// Snapshot of the coordinator's routing state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AudioRoute {
    pub mode: RouteMode,
    pub focus_held: bool,
    pub call_active: bool,
    pub saved_original_mode: Option<AudioMode>,
    pub saved_original_speaker: Option<bool>,
    pub saved_original_volume: Option<u32>,
}

/// Keeps hardware audio routing consistent with the call lifecycle.
pub struct AudioRouteCoordinator {
    hardware: Arc<dyn AudioHardware>,
    default_route: RouteMode,
    call_volume: Option<f32>,
    route: Mutex<AudioRoute>,
}

impl AudioRouteCoordinator {
    pub fn new(hardware: Arc<dyn AudioHardware>) -> Self {
        Self {
            hardware,
            default_route: RouteMode::Speaker,
            call_volume: None,
            route: Mutex::new(AudioRoute::default()),
        }
    }

    /// Route asserted at call start and restored after each call.
    pub fn with_default_route(mut self, mode: RouteMode) -> Self {
        self.default_route = mode;
        self.route.get_mut().mode = mode;
        self
    }

    /// Set the voice-call volume to `ratio` of the maximum during calls.
    pub fn with_call_volume(mut self, ratio: f32) -> Self {
        self.call_volume = Some(ratio.clamp(0.0, 1.0));
        self
    }

    /// Current routing state.
    pub fn route(&self) -> AudioRoute {
        self.route.lock().clone()
    }

    pub fn is_call_active(&self) -> bool {
        self.route.lock().call_active
    }

    /// Take over audio routing for a call.
    ///
    /// Returns `false` when the hardware could not be switched into
    /// communication mode; nothing is left to restore in that case and the
    /// call may proceed with degraded routing.
    pub fn begin_call(&self) -> bool {
        let mut route = self.route.lock();
        if route.call_active {
            debug!("Audio call already active, keeping existing snapshot");
            return true;
        }

        let (original_mode, original_speaker) =
            match (self.hardware.mode(), self.hardware.is_speaker_on()) {
                (Ok(mode), Ok(speaker)) => (mode, speaker),
                (Err(e), _) | (_, Err(e)) => {
                    warn!("Cannot snapshot audio state, continuing without routing: {e}");
                    return false;
                }
            };

        let original_volume = match self.call_volume {
            Some(_) => self.hardware.voice_volume().ok().map(|level| level.current),
            None => None,
        };

        let focus_held = match self.hardware.request_focus() {
            Ok(granted) => granted,
            Err(e) => {
                warn!("Audio focus request failed: {e}");
                false
            }
        };
        if !focus_held {
            warn!("Audio focus not granted, call audio may be interrupted");
        }

        if let Err(e) = self.hardware.set_mode(AudioMode::InCommunication) {
            warn!("Cannot enter communication mode: {e}");
            if focus_held {
                if let Err(e) = self.hardware.abandon_focus() {
                    warn!("Failed to release audio focus: {e}");
                }
            }
            return false;
        }

        route.call_active = true;
        route.focus_held = focus_held;
        route.saved_original_mode = Some(original_mode);
        route.saved_original_speaker = Some(original_speaker);
        route.saved_original_volume = original_volume;

        if let Err(e) = self.apply(route.mode) {
            warn!("Failed to assert {} route: {e}", route.mode);
        }

        if let Some(ratio) = self.call_volume {
            self.apply_call_volume(ratio);
        }

        info!(
            route = %route.mode,
            original_mode = %original_mode,
            original_speaker,
            "Audio call started"
        );
        true
    }

    /// Choose the output route. Applied immediately during a call and
    /// remembered otherwise; hardware is only written when it differs from
    /// the target.
    pub fn set_route(&self, mode: RouteMode) {
        let mut route = self.route.lock();
        route.mode = mode;
        if !route.call_active {
            debug!(route = %mode, "No active call, route will apply at call start");
            return;
        }
        match self.apply(mode) {
            Ok(true) => info!(route = %mode, "Audio route changed"),
            Ok(false) => debug!(route = %mode, "Audio route already in place"),
            Err(e) => warn!("Failed to set {mode} route: {e}"),
        }
    }

    /// Re-apply the current route, for when the platform may have changed
    /// routing underneath the call. Returns whether hardware had drifted.
    pub fn reassert_route(&self) -> bool {
        let route = self.route.lock();
        if !route.call_active {
            return false;
        }
        match self.apply(route.mode) {
            Ok(changed) => {
                if changed {
                    info!(route = %route.mode, "Audio route re-asserted");
                }
                changed
            }
            Err(e) => {
                warn!("Failed to re-assert {} route: {e}", route.mode);
                false
            }
        }
    }

    /// Restore the hardware state captured by `begin_call`. No-op when no
    /// call is active.
    pub fn end_call(&self) {
        let mut route = self.route.lock();
        if !route.call_active {
            debug!("No active audio call to end");
            return;
        }

        if let Some(speaker) = route.saved_original_speaker {
            if let Err(e) = self.hardware.set_speaker_on(speaker) {
                warn!("Failed to restore speaker state: {e}");
            }
        }
        if let Some(mode) = route.saved_original_mode {
            if let Err(e) = self.hardware.set_mode(mode) {
                warn!("Failed to restore audio mode: {e}");
            }
        }
        if let Some(volume) = route.saved_original_volume {
            if let Err(e) = self.hardware.set_voice_volume(volume) {
                warn!("Failed to restore call volume: {e}");
            }
        }
        if route.focus_held {
            if let Err(e) = self.hardware.abandon_focus() {
                warn!("Failed to release audio focus: {e}");
            }
        }

        *route = AudioRoute {
            mode: self.default_route,
            ..AudioRoute::default()
        };
        info!("Audio call ended, original routing restored");
    }

    /// Handle an audio focus change reported by the platform.
    pub fn on_focus_change(&self, change: FocusChange) {
        match change {
            FocusChange::Gain => {
                let active = {
                    let mut route = self.route.lock();
                    route.focus_held = route.call_active;
                    route.call_active
                };
                if active {
                    debug!("Audio focus regained");
                    self.reassert_route();
                }
            }
            FocusChange::Loss | FocusChange::LossTransient | FocusChange::LossTransientCanDuck => {
                self.route.lock().focus_held = false;
                info!(?change, "Audio focus lost");
            }
        }
    }

    /// Human-readable hardware state, e.g.
    /// `Mode: IN_COMMUNICATION, Speaker: true, Volume: 8/10`.
    pub fn describe(&self) -> String {
        let mode = self
            .hardware
            .mode()
            .map(|m| m.to_string())
            .unwrap_or_else(|_| "unavailable".to_string());
        let speaker = self
            .hardware
            .is_speaker_on()
            .map(|s| s.to_string())
            .unwrap_or_else(|_| "unavailable".to_string());
        let volume = self
            .hardware
            .voice_volume()
            .map(|v| format!("{}/{}", v.current, v.max))
            .unwrap_or_else(|_| "unavailable".to_string());
        format!("Mode: {mode}, Speaker: {speaker}, Volume: {volume}")
    }

    pub fn log_state(&self) {
        let route = self.route();
        debug!(
            call_active = route.call_active,
            focus_held = route.focus_held,
            route = %route.mode,
            "{}",
            self.describe()
        );
    }

    fn apply(&self, mode: RouteMode) -> Result<bool, AudioRouteError> {
        let mut changed = false;
        if self.hardware.mode()? != AudioMode::InCommunication {
            self.hardware.set_mode(AudioMode::InCommunication)?;
            changed = true;
        }
        if self.hardware.is_speaker_on()? != mode.speaker_on() {
            self.hardware.set_speaker_on(mode.speaker_on())?;
            changed = true;
        }
        Ok(changed)
    }

    fn apply_call_volume(&self, ratio: f32) {
        match self.hardware.voice_volume() {
            Ok(level) => {
                let target = (level.max as f32 * ratio).round() as u32;
                if let Err(e) = self.hardware.set_voice_volume(target) {
                    warn!("Failed to set call volume: {e}");
                } else {
                    debug!(volume = target, max = level.max, "Call volume set");
                }
            }
            Err(e) => warn!("Cannot read call volume: {e}"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::audio::hardware::VirtualAudioHardware;

    fn coordinator() -> (Arc<VirtualAudioHardware>, AudioRouteCoordinator) {
        let hardware = Arc::new(VirtualAudioHardware::with_state(AudioMode::Normal, false));
        let coordinator = AudioRouteCoordinator::new(hardware.clone());
        (hardware, coordinator)
    }

    #[test]
    fn test_begin_and_end_call_restores_state() {
        let (hardware, coordinator) = coordinator();

        assert!(coordinator.begin_call());
        assert_eq!(hardware.mode().unwrap(), AudioMode::InCommunication);
        assert!(hardware.is_speaker_on().unwrap());
        assert!(hardware.focus_held());

        let route = coordinator.route();
        assert!(route.call_active);
        assert_eq!(route.saved_original_mode, Some(AudioMode::Normal));
        assert_eq!(route.saved_original_speaker, Some(false));

        coordinator.end_call();
        assert_eq!(hardware.mode().unwrap(), AudioMode::Normal);
        assert!(!hardware.is_speaker_on().unwrap());
        assert!(!hardware.focus_held());
        assert_eq!(coordinator.route(), AudioRoute::default());
    }

    #[test]
    fn test_end_call_twice_is_noop() {
        let (hardware, coordinator) = coordinator();
        coordinator.begin_call();
        coordinator.end_call();
        let writes = (hardware.mode_writes(), hardware.speaker_writes());

        coordinator.end_call();
        assert_eq!((hardware.mode_writes(), hardware.speaker_writes()), writes);
    }

    #[test]
    fn test_end_call_without_begin_is_noop() {
        let (hardware, coordinator) = coordinator();
        coordinator.end_call();
        assert_eq!(hardware.mode_writes(), 0);
        assert_eq!(hardware.speaker_writes(), 0);
    }

    #[test]
    fn test_end_call_after_failed_begin_is_noop() {
        let (hardware, coordinator) = coordinator();
        hardware.set_fail_writes(true);

        assert!(!coordinator.begin_call());
        assert!(!coordinator.is_call_active());
        assert!(!hardware.focus_held());

        hardware.set_fail_writes(false);
        coordinator.end_call();
        assert_eq!(hardware.mode_writes(), 0);
        assert_eq!(hardware.speaker_writes(), 0);
    }

    #[test]
    fn test_begin_call_twice_keeps_first_snapshot() {
        let (hardware, coordinator) = coordinator();
        coordinator.begin_call();
        assert!(coordinator.begin_call());
        assert_eq!(
            coordinator.route().saved_original_mode,
            Some(AudioMode::Normal)
        );

        coordinator.end_call();
        assert_eq!(hardware.mode().unwrap(), AudioMode::Normal);
    }

    #[test]
    fn test_focus_denied_is_not_fatal() {
        let (hardware, coordinator) = coordinator();
        hardware.set_grant_focus(false);

        assert!(coordinator.begin_call());
        assert!(!coordinator.route().focus_held);
        assert!(hardware.is_speaker_on().unwrap());
    }

    #[test]
    fn test_set_route_is_idempotent() {
        let (hardware, coordinator) = coordinator();
        coordinator.begin_call();
        let writes = hardware.speaker_writes();

        coordinator.set_route(RouteMode::Speaker);
        coordinator.set_route(RouteMode::Speaker);
        assert_eq!(hardware.speaker_writes(), writes);

        coordinator.set_route(RouteMode::Earpiece);
        assert!(!hardware.is_speaker_on().unwrap());
        assert_eq!(hardware.speaker_writes(), writes + 1);
    }

    #[test]
    fn test_set_route_without_call_only_records() {
        let (hardware, coordinator) = coordinator();
        coordinator.set_route(RouteMode::Earpiece);
        assert_eq!(hardware.speaker_writes(), 0);

        coordinator.begin_call();
        assert!(!hardware.is_speaker_on().unwrap());
    }

    #[test]
    fn test_reassert_route_after_platform_drift() {
        let (hardware, coordinator) = coordinator();
        coordinator.begin_call();

        assert!(!coordinator.reassert_route());

        hardware.force_speaker(false);
        assert!(coordinator.reassert_route());
        assert!(hardware.is_speaker_on().unwrap());
    }

    #[test]
    fn test_focus_gain_reasserts_route() {
        let (hardware, coordinator) = coordinator();
        coordinator.begin_call();

        coordinator.on_focus_change(FocusChange::LossTransient);
        assert!(!coordinator.route().focus_held);

        hardware.force_speaker(false);
        coordinator.on_focus_change(FocusChange::Gain);
        assert!(coordinator.route().focus_held);
        assert!(hardware.is_speaker_on().unwrap());
    }

    #[test]
    fn test_call_volume_applied_and_restored() {
        let hardware = Arc::new(VirtualAudioHardware::new());
        let coordinator = AudioRouteCoordinator::new(hardware.clone()).with_call_volume(0.8);

        coordinator.begin_call();
        assert_eq!(hardware.voice_volume().unwrap().current, 8);
        assert_eq!(coordinator.route().saved_original_volume, Some(5));

        coordinator.end_call();
        assert_eq!(hardware.voice_volume().unwrap().current, 5);
    }

    #[test]
    fn test_describe() {
        let (_hardware, coordinator) = coordinator();
        coordinator.begin_call();
        assert_eq!(
            coordinator.describe(),
            "Mode: IN_COMMUNICATION, Speaker: true, Volume: 5/10"
        );
    }

    #[test]
    fn test_default_route_earpiece() {
        let hardware = Arc::new(VirtualAudioHardware::with_state(AudioMode::Normal, true));
        let coordinator =
            AudioRouteCoordinator::new(hardware.clone()).with_default_route(RouteMode::Earpiece);

        coordinator.begin_call();
        assert!(!hardware.is_speaker_on().unwrap());
        coordinator.end_call();
        assert!(hardware.is_speaker_on().unwrap());
        assert_eq!(coordinator.route().mode, RouteMode::Earpiece);
    }
}
