//! Huddle core: room session controller.
//!
//! Adapts a real-time provider's callbacks into one ordered stream of
//! `RoomEvent`s, and drives the local media and stats services bound to
//! the active session. Pure Rust; the provider is consumed through traits.

pub mod auth;
pub mod controls;
pub mod errors;
pub mod events;
pub mod participants;
pub mod provider;
pub mod room;
pub mod settings;
pub mod stats;

#[cfg(test)]
pub(crate) mod test_support;

pub use auth::AuthServiceError;
pub use controls::{CameraFacing, LocalMediaState, LocalTrack};
pub use errors::HuddleError;
pub use events::{
    ConnectionQuality, ParticipantEvent, ParticipantInfo, RoomEvent, SessionInfo, TrackInfo,
    TrackKind, TrackSource,
};
pub use participants::{ParticipantCallback, ParticipantDelegate, ParticipantStatus};
pub use provider::{
    ConnectRequest, ConnectionProvider, ForegroundService, LocalDataTrack, LocalParticipant,
    ProviderException, RemoteParticipant, Room, RoomCallback, RoomState,
};
pub use room::{LocalCommand, RoomListener, RoomManager, SessionPhase};
pub use settings::{Settings, SettingsStore};
pub use stats::{RoomStats, StatsReport, TrackDirection, TrackStats};
