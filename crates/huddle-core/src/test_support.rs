//! In-memory provider fakes shared by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;

use crate::controls::{CameraFacing, LocalTrack};
use crate::errors::HuddleError;
use crate::events::{RoomEvent, TrackInfo, TrackKind, TrackSource};
use crate::participants::{ParticipantCallback, ParticipantDelegate};
use crate::provider::{
    ConnectRequest, ConnectionProvider, ForegroundService, LocalDataTrack, LocalParticipant,
    ProviderException, RemoteParticipant, Room, RoomCallback, RoomState,
};
use crate::room::RoomListener;
use crate::settings::Settings;
use crate::stats::StatsReport;

/// Settings whose stats poller never ticks within a test.
pub fn test_settings() -> Settings {
    Settings {
        stats_interval_ms: 60_000,
        ..Settings::default()
    }
}

pub async fn next_event(rx: &mut broadcast::Receiver<RoomEvent>) -> RoomEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for room event")
        .expect("room event stream closed")
}

pub fn assert_no_event(rx: &mut broadcast::Receiver<RoomEvent>) {
    match rx.try_recv() {
        Err(TryRecvError::Empty) => {}
        other => panic!("expected no event, got {other:?}"),
    }
}

pub async fn wait_for_listener(provider: &FakeProvider) -> RoomListener {
    for _ in 0..400 {
        if let Some(listener) = provider.listener() {
            return listener;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("provider never received a connect request");
}

fn video_track(sid: &str, name: &str) -> TrackInfo {
    TrackInfo {
        sid: sid.to_string(),
        name: name.to_string(),
        kind: TrackKind::Video,
        source: TrackSource::from_track(name, TrackKind::Video),
        enabled: true,
    }
}

pub fn camera_track(sid: &str) -> TrackInfo {
    video_track(sid, "camera")
}

pub struct FakeDataTrack {
    name: String,
    sent: Mutex<Vec<String>>,
    releases: AtomicUsize,
}

impl FakeDataTrack {
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

impl LocalDataTrack for FakeDataTrack {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn send(&self, message: &str) {
        self.sent.lock().unwrap().push(message.to_string());
    }

    fn release(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

type Hook = Arc<dyn Fn() + Send + Sync>;

pub struct FakeLocalParticipant {
    sid: String,
    identity: String,
    published: Mutex<Vec<String>>,
    enabled: Mutex<HashMap<String, bool>>,
    facing: Mutex<Option<CameraFacing>>,
    delegate: Mutex<Option<ParticipantDelegate>>,
    reject: AtomicBool,
    confirm_via_delegate: AtomicBool,
    publish_hook: Mutex<Option<Hook>>,
}

impl FakeLocalParticipant {
    pub fn new(sid: &str, identity: &str) -> Arc<Self> {
        Arc::new(Self {
            sid: sid.to_string(),
            identity: identity.to_string(),
            published: Mutex::new(Vec::new()),
            enabled: Mutex::new(HashMap::new()),
            facing: Mutex::new(None),
            delegate: Mutex::new(None),
            reject: AtomicBool::new(false),
            confirm_via_delegate: AtomicBool::new(false),
            publish_hook: Mutex::new(None),
        })
    }

    pub fn published(&self) -> Vec<String> {
        self.published.lock().unwrap().clone()
    }

    pub fn enabled(&self, name: &str) -> Option<bool> {
        self.enabled.lock().unwrap().get(name).copied()
    }

    pub fn facing(&self) -> Option<CameraFacing> {
        *self.facing.lock().unwrap()
    }

    pub fn has_delegate(&self) -> bool {
        self.delegate.lock().unwrap().is_some()
    }

    pub fn reject_publications(&self) {
        self.reject.store(true, Ordering::SeqCst);
    }

    /// Report publications back through the installed delegate from inside
    /// `publish_track`, the way a provider with synchronous callbacks would.
    pub fn confirm_publications_via_delegate(&self) {
        self.confirm_via_delegate.store(true, Ordering::SeqCst);
    }

    /// Run `hook` at the start of every `publish_track`.
    pub fn on_publish(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.publish_hook.lock().unwrap() = Some(Arc::new(hook));
    }
}

impl LocalParticipant for FakeLocalParticipant {
    fn sid(&self) -> String {
        self.sid.clone()
    }

    fn identity(&self) -> String {
        self.identity.clone()
    }

    fn tracks(&self) -> Vec<TrackInfo> {
        self.published()
            .iter()
            .map(|name| video_track(&format!("MT-{name}"), name))
            .collect()
    }

    fn publish_track(&self, track: &LocalTrack) -> bool {
        let hook = self.publish_hook.lock().unwrap().clone();
        if let Some(hook) = hook {
            hook();
        }
        if self.reject.load(Ordering::SeqCst) {
            return false;
        }
        self.published.lock().unwrap().push(track.name.clone());
        self.enabled
            .lock()
            .unwrap()
            .insert(track.name.clone(), track.enabled);
        if self.confirm_via_delegate.load(Ordering::SeqCst) {
            let delegate = self.delegate.lock().unwrap().clone();
            if let Some(delegate) = delegate {
                delegate.handle(ParticipantCallback::TrackPublished {
                    track_name: track.name.clone(),
                    track_sid: format!("MT-{}", track.name),
                });
            }
        }
        true
    }

    fn unpublish_track(&self, name: &str) -> bool {
        let mut published = self.published.lock().unwrap();
        let before = published.len();
        published.retain(|n| n != name);
        before != published.len()
    }

    fn set_track_enabled(&self, name: &str, enabled: bool) {
        self.enabled.lock().unwrap().insert(name.to_string(), enabled);
    }

    fn switch_camera(&self, facing: CameraFacing) {
        *self.facing.lock().unwrap() = Some(facing);
    }

    fn set_delegate(&self, delegate: Option<ParticipantDelegate>) {
        *self.delegate.lock().unwrap() = delegate;
    }
}

pub struct FakeRemoteParticipant {
    sid: String,
    identity: String,
    tracks: Vec<TrackInfo>,
    delegate: Mutex<Option<ParticipantDelegate>>,
}

impl FakeRemoteParticipant {
    pub fn new(sid: &str, identity: &str) -> Arc<Self> {
        Self::with_tracks(sid, identity, Vec::new())
    }

    pub fn with_tracks(sid: &str, identity: &str, tracks: Vec<TrackInfo>) -> Arc<Self> {
        Arc::new(Self {
            sid: sid.to_string(),
            identity: identity.to_string(),
            tracks,
            delegate: Mutex::new(None),
        })
    }

    pub fn has_delegate(&self) -> bool {
        self.delegate.lock().unwrap().is_some()
    }

    pub fn delegate(&self) -> Option<ParticipantDelegate> {
        self.delegate.lock().unwrap().clone()
    }
}

impl RemoteParticipant for FakeRemoteParticipant {
    fn sid(&self) -> String {
        self.sid.clone()
    }

    fn identity(&self) -> String {
        self.identity.clone()
    }

    fn tracks(&self) -> Vec<TrackInfo> {
        self.tracks.clone()
    }

    fn set_delegate(&self, delegate: Option<ParticipantDelegate>) {
        *self.delegate.lock().unwrap() = delegate;
    }
}

pub struct FakeRoom {
    sid: String,
    name: String,
    local: Option<Arc<FakeLocalParticipant>>,
    remotes: Vec<Arc<FakeRemoteParticipant>>,
    disconnect_requests: AtomicUsize,
    stats: Mutex<Vec<StatsReport>>,
}

impl FakeRoom {
    pub fn new(
        sid: &str,
        name: &str,
        local: Option<Arc<FakeLocalParticipant>>,
        remotes: Vec<Arc<FakeRemoteParticipant>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            sid: sid.to_string(),
            name: name.to_string(),
            local,
            remotes,
            disconnect_requests: AtomicUsize::new(0),
            stats: Mutex::new(Vec::new()),
        })
    }

    pub fn handle(self: &Arc<Self>) -> Arc<dyn Room> {
        self.clone()
    }

    pub fn disconnect_requests(&self) -> usize {
        self.disconnect_requests.load(Ordering::SeqCst)
    }

    pub fn set_stats(&self, reports: Vec<StatsReport>) {
        *self.stats.lock().unwrap() = reports;
    }
}

impl Room for FakeRoom {
    fn sid(&self) -> String {
        self.sid.clone()
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn state(&self) -> RoomState {
        RoomState::Connected
    }

    fn local_participant(&self) -> Option<Arc<dyn LocalParticipant>> {
        self.local
            .clone()
            .map(|p| p as Arc<dyn LocalParticipant>)
    }

    fn remote_participants(&self) -> Vec<Arc<dyn RemoteParticipant>> {
        self.remotes
            .iter()
            .map(|p| p.clone() as Arc<dyn RemoteParticipant>)
            .collect()
    }

    fn disconnect(&self) {
        self.disconnect_requests.fetch_add(1, Ordering::SeqCst);
    }

    fn stats(&self) -> BoxFuture<'static, Vec<StatsReport>> {
        let reports = self.stats.lock().unwrap().clone();
        async move { reports }.boxed()
    }
}

#[derive(Default)]
pub struct FakeService {
    calls: Mutex<Vec<String>>,
}

impl FakeService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl ForegroundService for FakeService {
    fn start(&self, room_name: &str) {
        self.calls.lock().unwrap().push(format!("start:{room_name}"));
    }

    fn stop(&self) {
        self.calls.lock().unwrap().push("stop".to_string());
    }
}

enum Outcome {
    Pending,
    Connect(Arc<FakeRoom>),
    Fail(Arc<FakeRoom>, ProviderException),
    Error(HuddleError),
}

pub struct FakeProvider {
    listener: Mutex<Option<RoomListener>>,
    requests: Mutex<Vec<(String, String)>>,
    data_tracks: Mutex<Vec<Arc<FakeDataTrack>>>,
    data_track_error: Mutex<Option<HuddleError>>,
    outcome: Mutex<Outcome>,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            listener: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
            data_tracks: Mutex::new(Vec::new()),
            data_track_error: Mutex::new(None),
            outcome: Mutex::new(Outcome::Pending),
        })
    }

    pub fn connect_automatically(&self, room: Arc<FakeRoom>) {
        *self.outcome.lock().unwrap() = Outcome::Connect(room);
    }

    pub fn fail_room(&self, room: Arc<FakeRoom>, error: ProviderException) {
        *self.outcome.lock().unwrap() = Outcome::Fail(room, error);
    }

    pub fn fail_connect(&self, error: HuddleError) {
        *self.outcome.lock().unwrap() = Outcome::Error(error);
    }

    pub fn fail_data_track(&self, error: HuddleError) {
        *self.data_track_error.lock().unwrap() = Some(error);
    }

    pub fn listener(&self) -> Option<RoomListener> {
        self.listener.lock().unwrap().clone()
    }

    pub fn requests(&self) -> Vec<(String, String)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn data_track(&self, index: usize) -> Arc<FakeDataTrack> {
        self.data_tracks.lock().unwrap()[index].clone()
    }

    pub fn data_track_count(&self) -> usize {
        self.data_tracks.lock().unwrap().len()
    }
}

impl ConnectionProvider for FakeProvider {
    fn create_data_track(&self, name: &str) -> Result<Arc<dyn LocalDataTrack>, HuddleError> {
        if let Some(error) = self.data_track_error.lock().unwrap().take() {
            return Err(error);
        }
        let track = Arc::new(FakeDataTrack {
            name: name.to_string(),
            sent: Mutex::new(Vec::new()),
            releases: AtomicUsize::new(0),
        });
        self.data_tracks.lock().unwrap().push(track.clone());
        Ok(track)
    }

    fn connect(
        &self,
        request: ConnectRequest,
        listener: RoomListener,
    ) -> BoxFuture<'static, Result<(), HuddleError>> {
        self.requests
            .lock()
            .unwrap()
            .push((request.identity.clone(), request.room_name.clone()));
        *self.listener.lock().unwrap() = Some(listener.clone());
        let outcome = std::mem::replace(&mut *self.outcome.lock().unwrap(), Outcome::Pending);
        async move {
            match outcome {
                Outcome::Pending => Ok(()),
                Outcome::Connect(room) => {
                    listener.dispatch(RoomCallback::Connected(room));
                    Ok(())
                }
                Outcome::Fail(room, error) => {
                    listener.dispatch(RoomCallback::ConnectFailure { room, error });
                    Ok(())
                }
                Outcome::Error(error) => Err(error),
            }
        }
        .boxed()
    }
}
