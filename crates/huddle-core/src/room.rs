use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::controls::{LocalMediaState, LocalParticipantManager, MediaAction};
use crate::errors::HuddleError;
use crate::events::{EventEmitter, ParticipantEvent, ParticipantInfo, RoomEvent, SessionInfo};
use crate::participants::{
    local_info, DelegateChange, DelegateCommand, ParticipantDelegate, ParticipantRegistry,
    ParticipantRole, ParticipantStatus,
};
use crate::provider::{
    ConnectRequest, ConnectionProvider, ForegroundService, LocalDataTrack, ProviderException,
    Room, RoomCallback,
};
use crate::settings::Settings;
use crate::stats::{RoomStats, StatsPoller, StatsReport};

/// Lifecycle of the single session owned by a `RoomManager`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum SessionPhase {
    #[default]
    Idle,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
}

/// Local media commands, applied in submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalCommand {
    EnableAudio,
    DisableAudio,
    ToggleAudio,
    EnableVideo,
    DisableVideo,
    ToggleVideo,
    SwitchCamera,
    StartScreenCapture,
    StopScreenCapture,
    Pause,
    Resume,
}

/// Handle given to the provider for delivering session callbacks.
#[derive(Clone)]
pub struct RoomListener {
    inner: Weak<RoomInner>,
}

impl RoomListener {
    pub fn dispatch(&self, callback: RoomCallback) {
        match self.inner.upgrade() {
            Some(inner) => inner.submit(Work::Room(callback)),
            None => tracing::debug!("{} after room manager dropped", callback.name()),
        }
    }
}

pub(crate) enum Work {
    Room(RoomCallback),
    Delegate {
        participant_sid: String,
        role: ParticipantRole,
        command: DelegateCommand,
    },
    Local(LocalCommand),
    Stats(Vec<StatsReport>),
    ConnectError(HuddleError),
}

#[derive(Default)]
struct WorkQueue {
    items: VecDeque<Work>,
    draining: bool,
}

#[derive(Default)]
struct SessionSlot {
    phase: SessionPhase,
    room: Option<Arc<dyn Room>>,
    remotes: ParticipantRegistry,
    data_track: Option<Arc<dyn LocalDataTrack>>,
    stats_poller: Option<StatsPoller>,
}

impl SessionSlot {
    fn is_current(&self, room: &Arc<dyn Room>) -> bool {
        self.room.as_ref().is_some_and(|r| r.sid() == room.sid())
    }
}

fn release_data_track(track: Option<Arc<dyn LocalDataTrack>>) {
    if let Some(track) = track {
        tracing::info!("releasing local data track {}", track.name());
        track.release();
    }
}

fn apply_delegate_changes(changes: Vec<DelegateChange>) {
    for change in changes {
        change.apply();
    }
}

pub(crate) struct RoomInner {
    this: Weak<RoomInner>,
    provider: Arc<dyn ConnectionProvider>,
    service: Arc<dyn ForegroundService>,
    emitter: EventEmitter,
    runtime: Handle,
    stats_interval: Duration,
    queue: Mutex<WorkQueue>,
    slot: Mutex<SessionSlot>,
    local: Mutex<LocalParticipantManager>,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn session_info(room: &dyn Room) -> SessionInfo {
    SessionInfo {
        sid: room.sid(),
        name: room.name(),
        state: room.state(),
    }
}

/// Owns the active session and turns provider callbacks, local media
/// commands and stats ticks into one ordered `RoomEvent` stream.
///
/// Provider callbacks, delegate callbacks, local commands and stats are
/// funnelled through a single work queue. Whichever thread submits to an
/// idle queue drains it; submissions made while it is draining (including
/// re-entrant ones from inside a provider call) are queued behind the
/// current item. Events are therefore broadcast in submission order, and
/// the events of one provider callback are out before `dispatch` returns
/// unless another thread is already draining.
pub struct RoomManager {
    inner: Arc<RoomInner>,
}

impl RoomManager {
    /// Must be called from within a tokio runtime.
    pub fn new(
        provider: Arc<dyn ConnectionProvider>,
        service: Arc<dyn ForegroundService>,
        settings: &Settings,
    ) -> Self {
        Self::with_runtime(provider, service, settings, Handle::current())
    }

    pub fn with_runtime(
        provider: Arc<dyn ConnectionProvider>,
        service: Arc<dyn ForegroundService>,
        settings: &Settings,
        runtime: Handle,
    ) -> Self {
        let inner = Arc::new_cyclic(|this| RoomInner {
            this: this.clone(),
            provider,
            service,
            emitter: EventEmitter::new(settings.event_capacity),
            runtime,
            stats_interval: settings.stats_interval(),
            queue: Mutex::new(WorkQueue::default()),
            slot: Mutex::new(SessionSlot::default()),
            local: Mutex::new(LocalParticipantManager::new(settings)),
        });
        Self { inner }
    }

    /// Subscribe to room events. Only events emitted after this call are seen.
    pub fn subscribe(&self) -> broadcast::Receiver<RoomEvent> {
        self.inner.emitter.subscribe()
    }

    pub fn phase(&self) -> SessionPhase {
        lock(&self.inner.slot).phase
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.inner.slot).room.is_some()
    }

    pub fn session(&self) -> Option<SessionInfo> {
        let room = lock(&self.inner.slot).room.clone();
        room.map(|room| session_info(room.as_ref()))
    }

    pub fn remote_participants(&self) -> Vec<ParticipantInfo> {
        lock(&self.inner.slot).remotes.infos()
    }

    pub fn remote_participant_statuses(&self) -> Vec<(String, ParticipantStatus)> {
        lock(&self.inner.slot).remotes.statuses()
    }

    pub fn local_media_state(&self) -> LocalMediaState {
        lock(&self.inner.local).state().clone()
    }

    pub fn has_local_participant(&self) -> bool {
        lock(&self.inner.local).local_participant().is_some()
    }

    pub fn stats_poller_active(&self) -> bool {
        lock(&self.inner.slot)
            .stats_poller
            .as_ref()
            .is_some_and(StatsPoller::is_running)
    }

    pub fn has_data_track(&self) -> bool {
        lock(&self.inner.slot).data_track.is_some()
    }

    /// Start connecting to `room_name` as `identity`.
    ///
    /// Emits `Connecting` before returning; the outcome arrives on the event
    /// stream. Rejected with `SessionActive` (and no event) unless idle.
    pub fn connect(&self, identity: &str, room_name: &str) -> Result<(), HuddleError> {
        {
            let mut slot = lock(&self.inner.slot);
            if slot.phase != SessionPhase::Idle {
                tracing::warn!(
                    "connect({identity}, {room_name}) rejected: session is {:?}",
                    slot.phase
                );
                return Err(HuddleError::SessionActive);
            }
            slot.phase = SessionPhase::Connecting;
            self.inner.emitter.emit(RoomEvent::Connecting);
        }

        let inner = self.inner.clone();
        let identity = identity.to_string();
        let room_name = room_name.to_string();
        self.inner
            .runtime
            .spawn(async move { inner.connect_to_room(identity, room_name).await });
        Ok(())
    }

    /// Request teardown of the active session; no-op when there is none.
    ///
    /// Teardown itself happens when the provider reports the disconnect.
    pub fn disconnect(&self) {
        let room = lock(&self.inner.slot).room.clone();
        match room {
            Some(room) => {
                tracing::info!("disconnect requested for room {}", room.sid());
                room.disconnect();
            }
            None => tracing::debug!("disconnect: no active session"),
        }
    }

    pub fn send_room_event(&self, event: RoomEvent) {
        self.inner.emitter.emit(event);
    }

    /// Best effort: dropped if the data track has been released.
    pub fn send_data_track_message(&self, message: &str) {
        let track = lock(&self.inner.slot).data_track.clone();
        match track {
            Some(track) => track.send(message),
            None => tracing::debug!("Ignoring data track message because data track is released"),
        }
    }

    /// Emits `StatsUpdate` if a session is active when the reports are processed.
    pub fn send_stats_update(&self, reports: Vec<StatsReport>) {
        self.inner.submit_stats(reports);
    }

    pub fn enable_local_audio(&self) {
        self.local_command(LocalCommand::EnableAudio);
    }

    pub fn disable_local_audio(&self) {
        self.local_command(LocalCommand::DisableAudio);
    }

    pub fn toggle_local_audio(&self) {
        self.local_command(LocalCommand::ToggleAudio);
    }

    pub fn enable_local_video(&self) {
        self.local_command(LocalCommand::EnableVideo);
    }

    pub fn disable_local_video(&self) {
        self.local_command(LocalCommand::DisableVideo);
    }

    pub fn toggle_local_video(&self) {
        self.local_command(LocalCommand::ToggleVideo);
    }

    pub fn switch_camera(&self) {
        self.local_command(LocalCommand::SwitchCamera);
    }

    pub fn start_screen_capture(&self) {
        self.local_command(LocalCommand::StartScreenCapture);
    }

    pub fn stop_screen_capture(&self) {
        self.local_command(LocalCommand::StopScreenCapture);
    }

    pub fn on_pause(&self) {
        self.local_command(LocalCommand::Pause);
    }

    pub fn on_resume(&self) {
        self.local_command(LocalCommand::Resume);
    }

    pub fn local_command(&self, command: LocalCommand) {
        self.inner.submit(Work::Local(command));
    }
}

impl RoomInner {
    async fn connect_to_room(self: Arc<Self>, identity: String, room_name: String) {
        let track_name = format!("data-{}", Uuid::new_v4());
        let data_track = match self.provider.create_data_track(&track_name) {
            Ok(track) => track,
            Err(e) => {
                self.submit(Work::ConnectError(e));
                return;
            }
        };
        lock(&self.slot).data_track = Some(data_track.clone());

        tracing::info!("connecting to room {room_name} as {identity}");
        let request = ConnectRequest {
            identity,
            room_name,
            data_track,
        };
        let listener = RoomListener {
            inner: self.this.clone(),
        };
        if let Err(e) = self.provider.connect(request, listener).await {
            self.submit(Work::ConnectError(e));
        }
    }

    pub(crate) fn forward_from_delegate(&self, delegate: &ParticipantDelegate, command: DelegateCommand) {
        self.submit(Work::Delegate {
            participant_sid: delegate.participant_sid().to_string(),
            role: delegate.role(),
            command,
        });
    }

    pub(crate) fn submit_stats(&self, reports: Vec<StatsReport>) {
        self.submit(Work::Stats(reports));
    }

    pub(crate) fn submit(&self, work: Work) {
        {
            let mut queue = lock(&self.queue);
            queue.items.push_back(work);
            if queue.draining {
                return;
            }
            queue.draining = true;
        }
        loop {
            let next = {
                let mut queue = lock(&self.queue);
                match queue.items.pop_front() {
                    Some(work) => work,
                    None => {
                        queue.draining = false;
                        return;
                    }
                }
            };
            self.process(next);
        }
    }

    fn process(&self, work: Work) {
        match work {
            Work::Room(callback) => self.on_room_callback(callback),
            Work::Delegate {
                participant_sid,
                role,
                command,
            } => self.on_delegate_command(&participant_sid, role, command),
            Work::Local(command) => self.on_local_command(command),
            Work::Stats(reports) => self.on_stats(reports),
            Work::ConnectError(e) => self.on_connect_error(e),
        }
    }

    /// Run `f` on the local participant manager, then the provider calls it
    /// queued, with no lock held.
    fn with_local<R>(&self, f: impl FnOnce(&mut LocalParticipantManager) -> R) -> R {
        let (result, actions) = {
            let mut local = lock(&self.local);
            let result = f(&mut local);
            (result, local.take_actions())
        };
        self.run_media_actions(actions);
        result
    }

    fn run_media_actions(&self, actions: Vec<MediaAction>) {
        for action in actions {
            if let Some(name) = action.run() {
                lock(&self.local).on_track_publication_failed(&name, "rejected by provider");
            }
        }
    }

    fn on_room_callback(&self, callback: RoomCallback) {
        tracing::debug!("provider callback {}", callback.name());
        match callback {
            RoomCallback::Connected(room) => self.on_connected(room),
            RoomCallback::ConnectFailure { room, error } => self.on_connect_failure(room, error),
            RoomCallback::Disconnected { room, error } => self.on_disconnected(room, error),
            RoomCallback::Reconnecting { room, error } => {
                let mut slot = lock(&self.slot);
                if !slot.is_current(&room) {
                    tracing::debug!("onReconnecting for inactive room {}", room.sid());
                    return;
                }
                let attempt = match slot.phase {
                    SessionPhase::Reconnecting { attempt } => attempt + 1,
                    _ => 1,
                };
                tracing::info!("onReconnecting: {} attempt {attempt} ({error})", room.name());
                slot.phase = SessionPhase::Reconnecting { attempt };
                slot.remotes.set_status(ParticipantStatus::Reconnecting);
                self.emitter.emit(RoomEvent::Reconnecting { attempt });
            }
            RoomCallback::Reconnected(room) => {
                let mut slot = lock(&self.slot);
                if !slot.is_current(&room) {
                    tracing::debug!("onReconnected for inactive room {}", room.sid());
                    return;
                }
                tracing::info!("onReconnected: {}", room.name());
                slot.phase = SessionPhase::Connected;
                slot.remotes.set_status(ParticipantStatus::Connected);
                self.emitter.emit(RoomEvent::Reconnected);
            }
            RoomCallback::ParticipantConnected { room, participant } => {
                let changes = {
                    let mut slot = lock(&self.slot);
                    if !slot.is_current(&room) {
                        tracing::debug!("participant {} joined inactive room {}", participant.sid(), room.sid());
                        return;
                    }
                    tracing::info!(
                        "RemoteParticipant connected -> room sid: {}, remoteParticipant: {}",
                        room.sid(),
                        participant.sid()
                    );
                    let info = slot.remotes.attach(participant, self.this.clone());
                    self.emitter
                        .emit(RoomEvent::RemoteParticipantConnected { participant: info });
                    slot.remotes.take_delegate_changes()
                };
                apply_delegate_changes(changes);
            }
            RoomCallback::ParticipantDisconnected { room, participant } => {
                let changes = {
                    let mut slot = lock(&self.slot);
                    if !slot.is_current(&room) {
                        tracing::debug!("participant {} left inactive room {}", participant.sid(), room.sid());
                        return;
                    }
                    let sid = participant.sid();
                    tracing::info!(
                        "RemoteParticipant disconnected -> room sid: {}, remoteParticipant: {sid}",
                        room.sid()
                    );
                    if slot.remotes.remove(&sid).is_none() {
                        tracing::debug!("participant {sid} was not tracked");
                    }
                    self.emitter
                        .emit(RoomEvent::RemoteParticipantDisconnected { participant_id: sid });
                    slot.remotes.take_delegate_changes()
                };
                apply_delegate_changes(changes);
            }
            RoomCallback::DominantSpeakerChanged { room, participant } => {
                let slot = lock(&self.slot);
                if !slot.is_current(&room) {
                    return;
                }
                let participant_id = participant.map(|p| p.sid());
                tracing::info!(
                    "DominantSpeakerChanged -> room sid: {}, remoteParticipant: {participant_id:?}",
                    room.sid()
                );
                self.emitter
                    .emit(RoomEvent::DominantSpeakerChanged { participant_id });
            }
            RoomCallback::RecordingStarted(room) => {
                if lock(&self.slot).is_current(&room) {
                    self.emitter.emit(RoomEvent::RecordingStarted);
                }
            }
            RoomCallback::RecordingStopped(room) => {
                if lock(&self.slot).is_current(&room) {
                    self.emitter.emit(RoomEvent::RecordingStopped);
                }
            }
        }
    }

    /// Provider and service calls run with no lock held; only the slot
    /// update happens under `slot`.
    fn on_connected(&self, room: Arc<dyn Room>) {
        if let Some(current) = &lock(&self.slot).room {
            tracing::warn!(
                "onConnected for room {} while {} is active; ignoring",
                room.sid(),
                current.sid()
            );
            return;
        }
        tracing::info!("onConnected -> room sid: {}", room.sid());

        let name = room.name();
        let session = session_info(room.as_ref());
        let local_participant = room.local_participant();
        let remotes = room.remote_participants();

        let (remote_infos, changes) = {
            let mut slot = lock(&self.slot);
            let infos: Vec<ParticipantInfo> = remotes
                .into_iter()
                .map(|remote| slot.remotes.attach(remote, self.this.clone()))
                .collect();
            slot.phase = SessionPhase::Connected;
            slot.room = Some(room.clone());
            slot.stats_poller = Some(StatsPoller::start(
                &self.runtime,
                self.this.clone(),
                room.clone(),
                self.stats_interval,
            ));
            (infos, slot.remotes.take_delegate_changes())
        };

        let local_info = local_participant.map(|participant| {
            participant.set_delegate(Some(ParticipantDelegate::new(
                self.this.clone(),
                participant.sid(),
                ParticipantRole::Local,
            )));
            let info = local_info(participant.as_ref());
            self.with_local(|local| local.set_local_participant(Some(participant)));
            info
        });
        apply_delegate_changes(changes);

        self.service.start(&name);

        let Some(local_info) = local_info else {
            tracing::warn!("room {} has no local participant; Connected not sent", session.sid);
            return;
        };
        let mut participants = vec![local_info];
        participants.extend(remote_infos);
        self.emitter.emit(RoomEvent::Connected {
            participants,
            session,
            name,
        });
        self.with_local(LocalParticipantManager::publish_local_tracks);
    }

    fn on_connect_failure(&self, room: Arc<dyn Room>, error: ProviderException) {
        tracing::error!(
            "Failed to connect to room -> sid: {}, state: {:?}, code: {}, error: {}",
            room.sid(),
            room.state(),
            error.code,
            error.message
        );
        let data_track = {
            let mut slot = lock(&self.slot);
            if slot.room.is_some() {
                tracing::warn!("connect failure reported while a session is active; ignoring");
                return;
            }
            slot.phase = SessionPhase::Idle;
            if error.is_room_at_capacity() {
                self.emitter.emit(RoomEvent::MaxParticipantFailure);
            } else {
                self.emitter.emit(RoomEvent::ConnectFailure);
            }
            slot.data_track.take()
        };
        release_data_track(data_track);
    }

    fn on_connect_error(&self, error: HuddleError) {
        tracing::error!("Failed to retrieve token: {error}");
        let data_track = {
            let mut slot = lock(&self.slot);
            let data_track = if slot.room.is_none() {
                slot.phase = SessionPhase::Idle;
                slot.data_track.take()
            } else {
                None
            };
            self.emitter.emit(RoomEvent::TokenError {
                reason: error.service_error(),
            });
            data_track
        };
        release_data_track(data_track);
    }

    /// The single teardown point. The phase only returns to `Idle` once every
    /// step has run, so a new `connect` cannot interleave with teardown.
    fn on_disconnected(&self, room: Arc<dyn Room>, error: Option<ProviderException>) {
        let (poller, data_track, changes) = {
            let mut slot = lock(&self.slot);
            if slot.room.is_none() {
                tracing::debug!("onDisconnected for room {} without an active session", room.sid());
                return;
            }
            if !slot.is_current(&room) {
                tracing::warn!("onDisconnected for stale room {}; ignoring", room.sid());
                return;
            }
            slot.room = None;
            slot.remotes.clear();
            (
                slot.stats_poller.take(),
                slot.data_track.take(),
                slot.remotes.take_delegate_changes(),
            )
        };
        match &error {
            Some(e) => tracing::warn!(
                "Disconnected from room -> sid: {}, state: {:?}, error: {e}",
                room.sid(),
                room.state()
            ),
            None => tracing::info!(
                "Disconnected from room -> sid: {}, state: {:?}",
                room.sid(),
                room.state()
            ),
        }

        self.service.stop();
        self.emitter.emit(RoomEvent::Disconnected);
        self.with_local(|local| local.set_local_participant(None));
        if let Some(mut poller) = poller {
            poller.stop();
        }
        release_data_track(data_track);
        apply_delegate_changes(changes);
        lock(&self.slot).phase = SessionPhase::Idle;
    }

    fn on_delegate_command(&self, participant_sid: &str, role: ParticipantRole, command: DelegateCommand) {
        match role {
            ParticipantRole::Remote => {
                let mut slot = lock(&self.slot);
                let Some(remote) = slot.remotes.get_mut(participant_sid) else {
                    tracing::debug!("dropping callback from departed participant {participant_sid}");
                    return;
                };
                if let DelegateCommand::Emit(event) = command {
                    if let ParticipantEvent::NetworkQualityChanged { quality, .. } = &event {
                        remote.connection_quality = *quality;
                    }
                    self.emitter.emit(RoomEvent::RemoteParticipantUpdated { event });
                }
            }
            ParticipantRole::Local => self.with_local(|local| {
                if local.local_participant_sid().as_deref() != Some(participant_sid) {
                    tracing::debug!("dropping callback from detached local participant {participant_sid}");
                    return;
                }
                match command {
                    DelegateCommand::LocalTrackPublished(name) => local.on_track_published(&name),
                    DelegateCommand::LocalTrackPublicationFailed { track_name, reason } => {
                        local.on_track_publication_failed(&track_name, &reason)
                    }
                    DelegateCommand::Emit(_) => {}
                }
            }),
        }
    }

    fn on_local_command(&self, command: LocalCommand) {
        tracing::debug!("local command {command:?}");
        self.with_local(|local| match command {
            LocalCommand::EnableAudio => local.enable_local_audio(),
            LocalCommand::DisableAudio => local.disable_local_audio(),
            LocalCommand::ToggleAudio => local.toggle_local_audio(),
            LocalCommand::EnableVideo => local.enable_local_video(),
            LocalCommand::DisableVideo => local.disable_local_video(),
            LocalCommand::ToggleVideo => local.toggle_local_video(),
            LocalCommand::SwitchCamera => local.switch_camera(),
            LocalCommand::StartScreenCapture => local.start_screen_capture(),
            LocalCommand::StopScreenCapture => local.stop_screen_capture(),
            LocalCommand::Pause => local.on_pause(),
            LocalCommand::Resume => local.on_resume(),
        });
    }

    fn on_stats(&self, reports: Vec<StatsReport>) {
        let slot = lock(&self.slot);
        if slot.room.is_none() {
            tracing::debug!("discarding {} stats reports: no active session", reports.len());
            return;
        }
        let local_video_tracks = lock(&self.local).local_video_track_names();
        let report = RoomStats::new(&slot.remotes.infos(), &local_video_tracks, reports);
        self.emitter.emit(RoomEvent::StatsUpdate { report });
    }
}
