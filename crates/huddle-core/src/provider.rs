//! Capabilities consumed from the real-time provider.
//!
//! The provider owns transport, codecs and its own reconnect logic. The core
//! only sees rooms, participants and a data track, and receives lifecycle
//! callbacks as `RoomCallback` values through a `RoomListener`.
//!
//! Getters (`sid`, `name`, `state`, `identity`, `tracks`) may be called while
//! the controller holds its internal locks and must not call back into it.
//! Every other method is called with no controller lock held, so it may read
//! `RoomManager` state or deliver callbacks synchronously.

use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::Serialize;
use thiserror::Error;

use crate::controls::{CameraFacing, LocalTrack};
use crate::errors::HuddleError;
use crate::events::TrackInfo;
use crate::participants::ParticipantDelegate;
use crate::room::RoomListener;
use crate::stats::StatsReport;

/// Provider error code signalling that the room is at its participant limit.
pub const ROOM_MAX_PARTICIPANTS_EXCEEDED: i32 = 53105;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("provider error {code}: {message}")]
pub struct ProviderException {
    pub code: i32,
    pub message: String,
}

impl ProviderException {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn is_room_at_capacity(&self) -> bool {
        self.code == ROOM_MAX_PARTICIPANTS_EXCEEDED
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomState {
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
}

/// A provider session.
pub trait Room: Send + Sync {
    fn sid(&self) -> String;
    fn name(&self) -> String;
    fn state(&self) -> RoomState;
    fn local_participant(&self) -> Option<Arc<dyn LocalParticipant>>;
    fn remote_participants(&self) -> Vec<Arc<dyn RemoteParticipant>>;
    /// Request teardown. Completion is reported through `RoomCallback::Disconnected`.
    fn disconnect(&self);
    fn stats(&self) -> BoxFuture<'static, Vec<StatsReport>>;
}

pub trait RemoteParticipant: Send + Sync {
    fn sid(&self) -> String;
    fn identity(&self) -> String;
    fn tracks(&self) -> Vec<TrackInfo>;
    fn set_delegate(&self, delegate: Option<ParticipantDelegate>);
}

pub trait LocalParticipant: Send + Sync {
    fn sid(&self) -> String;
    fn identity(&self) -> String;
    fn tracks(&self) -> Vec<TrackInfo>;
    /// Returns false if the provider refused the publication outright.
    fn publish_track(&self, track: &LocalTrack) -> bool;
    fn unpublish_track(&self, name: &str) -> bool;
    fn set_track_enabled(&self, name: &str, enabled: bool);
    fn switch_camera(&self, facing: CameraFacing);
    fn set_delegate(&self, delegate: Option<ParticipantDelegate>);
}

/// Local data channel passed to the provider at connect time.
pub trait LocalDataTrack: Send + Sync {
    fn name(&self) -> String;
    fn send(&self, message: &str);
    fn release(&self);
}

/// Auxiliary service kept alive while a session is active
/// (e.g. an ongoing-call notification).
pub trait ForegroundService: Send + Sync {
    fn start(&self, room_name: &str);
    fn stop(&self);
}

pub struct ConnectRequest {
    pub identity: String,
    pub room_name: String,
    pub data_track: Arc<dyn LocalDataTrack>,
}

impl fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("identity", &self.identity)
            .field("room_name", &self.room_name)
            .field("data_track", &self.data_track.name())
            .finish()
    }
}

pub trait ConnectionProvider: Send + Sync {
    fn create_data_track(&self, name: &str) -> Result<Arc<dyn LocalDataTrack>, HuddleError>;

    /// Start connecting. An `Err` means no session could even be attempted
    /// (credential exchange failed); every other outcome arrives on `listener`.
    fn connect(
        &self,
        request: ConnectRequest,
        listener: RoomListener,
    ) -> BoxFuture<'static, Result<(), HuddleError>>;
}

/// Session lifecycle callbacks delivered by the provider.
pub enum RoomCallback {
    Connected(Arc<dyn Room>),
    ConnectFailure {
        room: Arc<dyn Room>,
        error: ProviderException,
    },
    Disconnected {
        room: Arc<dyn Room>,
        error: Option<ProviderException>,
    },
    Reconnecting {
        room: Arc<dyn Room>,
        error: ProviderException,
    },
    Reconnected(Arc<dyn Room>),
    ParticipantConnected {
        room: Arc<dyn Room>,
        participant: Arc<dyn RemoteParticipant>,
    },
    ParticipantDisconnected {
        room: Arc<dyn Room>,
        participant: Arc<dyn RemoteParticipant>,
    },
    DominantSpeakerChanged {
        room: Arc<dyn Room>,
        participant: Option<Arc<dyn RemoteParticipant>>,
    },
    RecordingStarted(Arc<dyn Room>),
    RecordingStopped(Arc<dyn Room>),
}

impl RoomCallback {
    pub fn name(&self) -> &'static str {
        match self {
            RoomCallback::Connected(_) => "onConnected",
            RoomCallback::ConnectFailure { .. } => "onConnectFailure",
            RoomCallback::Disconnected { .. } => "onDisconnected",
            RoomCallback::Reconnecting { .. } => "onReconnecting",
            RoomCallback::Reconnected(_) => "onReconnected",
            RoomCallback::ParticipantConnected { .. } => "onParticipantConnected",
            RoomCallback::ParticipantDisconnected { .. } => "onParticipantDisconnected",
            RoomCallback::DominantSpeakerChanged { .. } => "onDominantSpeakerChanged",
            RoomCallback::RecordingStarted(_) => "onRecordingStarted",
            RoomCallback::RecordingStopped(_) => "onRecordingStopped",
        }
    }
}
