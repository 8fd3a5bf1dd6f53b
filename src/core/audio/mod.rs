//! Device audio routing for voice calls.
//!
//! - `hardware`: the [`AudioHardware`] platform seam and an in-memory
//!   implementation
//! - `coordinator`: [`AudioRouteCoordinator`], which snapshots routing at
//!   call start and restores it at call end
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use waav_voice::core::audio::{AudioRouteCoordinator, RouteMode, VirtualAudioHardware};
//!
//! let coordinator = AudioRouteCoordinator::new(Arc::new(VirtualAudioHardware::new()));
//! coordinator.begin_call();
//! coordinator.set_route(RouteMode::Earpiece);
//! coordinator.end_call();
//! ```

mod coordinator;
mod hardware;

pub use coordinator::{AudioRoute, AudioRouteCoordinator, FocusChange, RouteMode};
pub use hardware::{AudioHardware, AudioMode, AudioRouteError, VirtualAudioHardware, VolumeLevel};
