use serde::Serialize;
use tokio::sync::broadcast;

use crate::auth::AuthServiceError;
use crate::provider::RoomState;
use crate::stats::RoomStats;

/// Events emitted by the core to UI subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoomEvent {
    Connecting,
    Connected {
        participants: Vec<ParticipantInfo>,
        session: SessionInfo,
        name: String,
    },
    Disconnected,
    ConnectFailure,
    MaxParticipantFailure,
    TokenError {
        reason: Option<AuthServiceError>,
    },
    RemoteParticipantConnected {
        participant: ParticipantInfo,
    },
    RemoteParticipantDisconnected {
        participant_id: String,
    },
    RemoteParticipantUpdated {
        event: ParticipantEvent,
    },
    DominantSpeakerChanged {
        participant_id: Option<String>,
    },
    RecordingStarted,
    RecordingStopped,
    Reconnecting {
        attempt: u32,
    },
    Reconnected,
    StatsUpdate {
        report: RoomStats,
    },
}

/// Track-level changes reported by a remote participant's delegate.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParticipantEvent {
    TrackSubscribed {
        participant_sid: String,
        track: TrackInfo,
    },
    TrackUnsubscribed {
        participant_sid: String,
        track_sid: String,
    },
    TrackSubscriptionFailed {
        participant_sid: String,
        track_sid: String,
        reason: String,
    },
    TrackEnabled {
        participant_sid: String,
        track_sid: String,
        track_kind: TrackKind,
    },
    TrackDisabled {
        participant_sid: String,
        track_sid: String,
        track_kind: TrackKind,
    },
    NetworkQualityChanged {
        participant_sid: String,
        quality: ConnectionQuality,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub sid: String,
    pub name: String,
    pub state: RoomState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParticipantInfo {
    pub sid: String,
    pub identity: String,
    pub is_local: bool,
    pub tracks: Vec<TrackInfo>,
    pub connection_quality: ConnectionQuality,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionQuality {
    Excellent,
    Good,
    Poor,
    Lost,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackInfo {
    pub sid: String,
    pub name: String,
    pub kind: TrackKind,
    pub source: TrackSource,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Audio,
    Video,
    Data,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackSource {
    Microphone,
    Camera,
    ScreenShare,
    Data,
    Unknown,
}

impl TrackSource {
    /// Infer the source of a track from its published name and kind.
    pub fn from_track(name: &str, kind: TrackKind) -> Self {
        use crate::controls::{CAMERA_TRACK_NAME, MICROPHONE_TRACK_NAME, SCREEN_TRACK_NAME};
        match (kind, name) {
            (TrackKind::Data, _) => TrackSource::Data,
            (TrackKind::Audio, MICROPHONE_TRACK_NAME) => TrackSource::Microphone,
            (TrackKind::Video, CAMERA_TRACK_NAME) => TrackSource::Camera,
            (TrackKind::Video, SCREEN_TRACK_NAME) => TrackSource::ScreenShare,
            _ => TrackSource::Unknown,
        }
    }
}

/// Broadcast fan-out of room events.
///
/// Backed by a bounded `tokio::sync::broadcast` channel: emitting never
/// blocks, and a subscriber that falls more than `capacity` events behind
/// loses the oldest ones and observes `RecvError::Lagged` on its next read.
#[derive(Clone)]
pub struct EventEmitter {
    sender: broadcast::Sender<RoomEvent>,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoomEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: RoomEvent) {
        tracing::debug!("sendRoomEvent: {event:?}");
        if self.sender.send(event).is_err() {
            tracing::debug!("room event dropped: no subscribers");
        }
    }
}
