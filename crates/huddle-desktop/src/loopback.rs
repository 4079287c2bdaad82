//! In-process provider: one local participant and an "echo" remote that
//! mirrors the local camera. Used to drive the controller without a backend.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use huddle_core::{
    CameraFacing, ConnectRequest, ConnectionProvider, ForegroundService, HuddleError,
    LocalDataTrack, LocalParticipant, LocalTrack, ParticipantCallback, ParticipantDelegate,
    RemoteParticipant, Room, RoomCallback, RoomListener, RoomState, StatsReport, TrackDirection,
    TrackInfo, TrackKind, TrackSource, TrackStats,
};
use uuid::Uuid;

const ECHO_IDENTITY: &str = "echo";

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_string()
}

fn track(sid: &str, name: &str, kind: TrackKind) -> TrackInfo {
    TrackInfo {
        sid: sid.to_string(),
        name: name.to_string(),
        kind,
        source: TrackSource::from_track(name, kind),
        enabled: true,
    }
}

pub struct LoopbackDataTrack {
    name: String,
}

impl LocalDataTrack for LoopbackDataTrack {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn send(&self, message: &str) {
        tracing::info!("data track {} -> {message}", self.name);
    }

    fn release(&self) {
        tracing::debug!("data track {} released", self.name);
    }
}

struct LoopbackLocal {
    sid: String,
    identity: String,
    tracks: Mutex<Vec<TrackInfo>>,
    delegate: Mutex<Option<ParticipantDelegate>>,
}

impl LoopbackLocal {
    fn delegate(&self) -> Option<ParticipantDelegate> {
        self.delegate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl LocalParticipant for LoopbackLocal {
    fn sid(&self) -> String {
        self.sid.clone()
    }

    fn identity(&self) -> String {
        self.identity.clone()
    }

    fn tracks(&self) -> Vec<TrackInfo> {
        self.tracks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn publish_track(&self, local: &LocalTrack) -> bool {
        let sid = format!("TR_{}", short_id());
        {
            let mut tracks = self.tracks.lock().unwrap_or_else(PoisonError::into_inner);
            tracks.retain(|t| t.name != local.name);
            let mut info = track(&sid, &local.name, local.kind);
            info.enabled = local.enabled;
            tracks.push(info);
        }
        if let Some(delegate) = self.delegate() {
            delegate.handle(ParticipantCallback::TrackPublished {
                track_name: local.name.clone(),
                track_sid: sid,
            });
        }
        true
    }

    fn unpublish_track(&self, name: &str) -> bool {
        let mut tracks = self.tracks.lock().unwrap_or_else(PoisonError::into_inner);
        let before = tracks.len();
        tracks.retain(|t| t.name != name);
        before != tracks.len()
    }

    fn set_track_enabled(&self, name: &str, enabled: bool) {
        let mut tracks = self.tracks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(t) = tracks.iter_mut().find(|t| t.name == name) {
            t.enabled = enabled;
        }
    }

    fn switch_camera(&self, facing: CameraFacing) {
        tracing::info!("loopback camera now facing {facing:?}");
    }

    fn set_delegate(&self, delegate: Option<ParticipantDelegate>) {
        *self.delegate.lock().unwrap_or_else(PoisonError::into_inner) = delegate;
    }
}

struct LoopbackRemote {
    sid: String,
    tracks: Vec<TrackInfo>,
    delegate: Mutex<Option<ParticipantDelegate>>,
}

impl RemoteParticipant for LoopbackRemote {
    fn sid(&self) -> String {
        self.sid.clone()
    }

    fn identity(&self) -> String {
        ECHO_IDENTITY.to_string()
    }

    fn tracks(&self) -> Vec<TrackInfo> {
        self.tracks.clone()
    }

    fn set_delegate(&self, delegate: Option<ParticipantDelegate>) {
        *self.delegate.lock().unwrap_or_else(PoisonError::into_inner) = delegate;
    }
}

pub struct LoopbackRoom {
    this: Weak<LoopbackRoom>,
    sid: String,
    name: String,
    local: Arc<LoopbackLocal>,
    echo: Arc<LoopbackRemote>,
    listener: RoomListener,
    state: Mutex<RoomState>,
    ticks: AtomicU64,
}

impl LoopbackRoom {
    fn handle(&self) -> Option<Arc<dyn Room>> {
        self.this.upgrade().map(|room| room as Arc<dyn Room>)
    }
}

impl Room for LoopbackRoom {
    fn sid(&self) -> String {
        self.sid.clone()
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn state(&self) -> RoomState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn local_participant(&self) -> Option<Arc<dyn LocalParticipant>> {
        Some(self.local.clone() as Arc<dyn LocalParticipant>)
    }

    fn remote_participants(&self) -> Vec<Arc<dyn RemoteParticipant>> {
        vec![self.echo.clone() as Arc<dyn RemoteParticipant>]
    }

    fn disconnect(&self) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = RoomState::Disconnected;
        if let Some(room) = self.handle() {
            self.listener
                .dispatch(RoomCallback::Disconnected { room, error: None });
        }
    }

    fn stats(&self) -> BoxFuture<'static, Vec<StatsReport>> {
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        let mut tracks: Vec<TrackStats> = self
            .local
            .tracks()
            .into_iter()
            .map(|t| synthetic_stats(&t, TrackDirection::Local, tick))
            .collect();
        tracks.extend(
            self.echo
                .tracks
                .iter()
                .map(|t| synthetic_stats(t, TrackDirection::Remote, tick)),
        );
        let report = StatsReport {
            peer_connection_id: format!("PC_{}", self.sid),
            tracks,
        };
        async move { vec![report] }.boxed()
    }
}

fn synthetic_stats(track: &TrackInfo, direction: TrackDirection, tick: u64) -> TrackStats {
    let audio = track.kind == TrackKind::Audio;
    TrackStats {
        track_sid: track.sid.clone(),
        track_name: track.name.clone(),
        kind: track.kind,
        direction,
        codec: if audio { "opus" } else { "VP8" }.to_string(),
        packets_lost: 0,
        bytes: tick * if audio { 4_000 } else { 120_000 },
        packets: (tick * 50) as u32,
        jitter_ms: audio.then_some(3),
        audio_level: audio.then_some(120),
        timestamp_ms: tick as f64 * 1_000.0,
    }
}

/// Connects after `delay`, always successfully.
pub struct LoopbackProvider {
    delay: Duration,
}

impl LoopbackProvider {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl ConnectionProvider for LoopbackProvider {
    fn create_data_track(&self, name: &str) -> Result<Arc<dyn LocalDataTrack>, HuddleError> {
        let track: Arc<dyn LocalDataTrack> = Arc::new(LoopbackDataTrack {
            name: name.to_string(),
        });
        Ok(track)
    }

    fn connect(
        &self,
        request: ConnectRequest,
        listener: RoomListener,
    ) -> BoxFuture<'static, Result<(), HuddleError>> {
        let delay = self.delay;
        async move {
            tracing::debug!("loopback connect {request:?}");
            tokio::time::sleep(delay).await;

            let echo_camera = track(&format!("TR_{}", short_id()), "camera", TrackKind::Video);
            let room = Arc::new_cyclic(|this| LoopbackRoom {
                this: this.clone(),
                sid: format!("RM_{}", short_id()),
                name: request.room_name.clone(),
                local: Arc::new(LoopbackLocal {
                    sid: format!("PA_{}", short_id()),
                    identity: request.identity.clone(),
                    tracks: Mutex::new(Vec::new()),
                    delegate: Mutex::new(None),
                }),
                echo: Arc::new(LoopbackRemote {
                    sid: format!("PA_{}", short_id()),
                    tracks: vec![echo_camera.clone()],
                    delegate: Mutex::new(None),
                }),
                listener: listener.clone(),
                state: Mutex::new(RoomState::Connected),
                ticks: AtomicU64::new(0),
            });

            listener.dispatch(RoomCallback::Connected(room.clone()));

            let echo_delegate = room
                .echo
                .delegate
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            if let Some(delegate) = echo_delegate {
                delegate.handle(ParticipantCallback::TrackSubscribed(echo_camera));
            }
            listener.dispatch(RoomCallback::DominantSpeakerChanged {
                room: room.clone(),
                participant: Some(room.echo.clone() as Arc<dyn RemoteParticipant>),
            });
            Ok(())
        }
        .boxed()
    }
}

/// Stands in for the platform's ongoing-call notification.
pub struct LoggingForegroundService;

impl ForegroundService for LoggingForegroundService {
    fn start(&self, room_name: &str) {
        tracing::info!("in-call service started for {room_name}");
    }

    fn stop(&self) {
        tracing::info!("in-call service stopped");
    }
}
