use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;

use crate::events::TrackKind;
use crate::provider::LocalParticipant;
use crate::settings::Settings;

pub const MICROPHONE_TRACK_NAME: &str = "microphone";
pub const CAMERA_TRACK_NAME: &str = "camera";
pub const SCREEN_TRACK_NAME: &str = "screen";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraFacing {
    Front,
    Back,
}

impl CameraFacing {
    fn flipped(self) -> Self {
        match self {
            CameraFacing::Front => CameraFacing::Back,
            CameraFacing::Back => CameraFacing::Front,
        }
    }
}

/// A local track the manager asks the provider to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTrack {
    pub name: String,
    pub kind: TrackKind,
    pub enabled: bool,
}

impl LocalTrack {
    fn new(name: &str, kind: TrackKind, enabled: bool) -> Self {
        Self {
            name: name.to_string(),
            kind,
            enabled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalMediaState {
    pub audio_enabled: bool,
    pub video_enabled: bool,
    pub screen_capture_active: bool,
    pub camera_facing: CameraFacing,
    pub published_tracks: BTreeSet<String>,
}

/// A provider call decided by the manager, run once its lock is released.
pub(crate) struct MediaAction {
    participant: Arc<dyn LocalParticipant>,
    op: MediaOp,
}

#[derive(Debug, Clone, PartialEq)]
enum MediaOp {
    Publish(LocalTrack),
    Unpublish(String),
    SetEnabled { name: String, enabled: bool },
    SwitchCamera(CameraFacing),
    Detach,
}

impl MediaAction {
    /// Returns the track name if the provider refused a publication.
    pub(crate) fn run(self) -> Option<String> {
        match self.op {
            MediaOp::Publish(track) => {
                if self.participant.publish_track(&track) {
                    None
                } else {
                    Some(track.name)
                }
            }
            MediaOp::Unpublish(name) => {
                if !self.participant.unpublish_track(&name) {
                    tracing::warn!("failed to unpublish local track {name}");
                }
                None
            }
            MediaOp::SetEnabled { name, enabled } => {
                self.participant.set_track_enabled(&name, enabled);
                None
            }
            MediaOp::SwitchCamera(facing) => {
                self.participant.switch_camera(facing);
                None
            }
            MediaOp::Detach => {
                self.participant.set_delegate(None);
                None
            }
        }
    }
}

/// Local media controls (microphone, camera, screen capture).
///
/// Methods only update `LocalMediaState` and queue the matching provider
/// calls; the owner drains them with `take_actions` and runs them without
/// holding the manager. Detaching the participant resets the state to the
/// `Settings` defaults.
pub struct LocalParticipantManager {
    defaults: LocalMediaState,
    state: LocalMediaState,
    participant: Option<Arc<dyn LocalParticipant>>,
    paused: bool,
    actions: Vec<MediaAction>,
}

impl LocalParticipantManager {
    pub fn new(settings: &Settings) -> Self {
        let defaults = LocalMediaState {
            audio_enabled: settings.mic_enabled_on_join,
            video_enabled: settings.camera_enabled_on_join,
            screen_capture_active: false,
            camera_facing: CameraFacing::Front,
            published_tracks: BTreeSet::new(),
        };
        Self {
            state: defaults.clone(),
            defaults,
            participant: None,
            paused: false,
            actions: Vec::new(),
        }
    }

    pub fn state(&self) -> &LocalMediaState {
        &self.state
    }

    pub fn local_participant(&self) -> Option<&Arc<dyn LocalParticipant>> {
        self.participant.as_ref()
    }

    pub fn local_participant_sid(&self) -> Option<String> {
        self.participant.as_ref().map(|p| p.sid())
    }

    /// Attach or detach the local participant.
    ///
    /// Detaching queues removal of its delegate and resets the state to defaults.
    pub fn set_local_participant(&mut self, participant: Option<Arc<dyn LocalParticipant>>) {
        if participant.is_none() {
            if let Some(old) = self.participant.take() {
                self.actions.push(MediaAction {
                    participant: old,
                    op: MediaOp::Detach,
                });
            }
            self.state = self.defaults.clone();
            self.paused = false;
        }
        self.participant = participant;
    }

    /// Provider calls queued since the last drain, in order.
    pub(crate) fn take_actions(&mut self) -> Vec<MediaAction> {
        std::mem::take(&mut self.actions)
    }

    /// Publish the tracks the current enable flags call for.
    pub fn publish_local_tracks(&mut self) {
        if self.state.audio_enabled {
            self.publish(MICROPHONE_TRACK_NAME, TrackKind::Audio);
        }
        if self.state.video_enabled && !self.paused {
            self.publish(CAMERA_TRACK_NAME, TrackKind::Video);
        }
    }

    pub fn enable_local_audio(&mut self) {
        self.state.audio_enabled = true;
        if self.is_published(MICROPHONE_TRACK_NAME) {
            self.set_enabled(MICROPHONE_TRACK_NAME, true);
        } else {
            self.publish(MICROPHONE_TRACK_NAME, TrackKind::Audio);
        }
        tracing::info!("microphone enabled: true");
    }

    pub fn disable_local_audio(&mut self) {
        self.state.audio_enabled = false;
        self.set_enabled(MICROPHONE_TRACK_NAME, false);
        tracing::info!("microphone enabled: false");
    }

    pub fn toggle_local_audio(&mut self) {
        if self.state.audio_enabled {
            self.disable_local_audio();
        } else {
            self.enable_local_audio();
        }
    }

    pub fn enable_local_video(&mut self) {
        self.state.video_enabled = true;
        if !self.paused {
            self.publish(CAMERA_TRACK_NAME, TrackKind::Video);
        }
        tracing::info!("camera enabled: true");
    }

    /// The camera track is unpublished rather than muted so the capturer is released.
    pub fn disable_local_video(&mut self) {
        self.state.video_enabled = false;
        self.unpublish(CAMERA_TRACK_NAME);
        tracing::info!("camera enabled: false");
    }

    pub fn toggle_local_video(&mut self) {
        if self.state.video_enabled {
            self.disable_local_video();
        } else {
            self.enable_local_video();
        }
    }

    pub fn switch_camera(&mut self) {
        self.state.camera_facing = self.state.camera_facing.flipped();
        if let Some(participant) = &self.participant {
            self.actions.push(MediaAction {
                participant: participant.clone(),
                op: MediaOp::SwitchCamera(self.state.camera_facing),
            });
        }
        tracing::info!("camera switched to {:?}", self.state.camera_facing);
    }

    pub fn start_screen_capture(&mut self) {
        if self.state.screen_capture_active {
            tracing::debug!("screen capture already active");
            return;
        }
        if self.participant.is_none() {
            tracing::debug!("ignoring screen capture start: no local participant");
            return;
        }
        self.state.screen_capture_active = true;
        self.publish(SCREEN_TRACK_NAME, TrackKind::Video);
    }

    pub fn stop_screen_capture(&mut self) {
        if !self.state.screen_capture_active {
            return;
        }
        self.state.screen_capture_active = false;
        self.unpublish(SCREEN_TRACK_NAME);
    }

    /// App moved to background: release the camera but remember it was on.
    pub fn on_pause(&mut self) {
        self.paused = true;
        if self.state.video_enabled {
            self.unpublish(CAMERA_TRACK_NAME);
        }
    }

    pub fn on_resume(&mut self) {
        self.paused = false;
        if self.state.video_enabled {
            self.publish(CAMERA_TRACK_NAME, TrackKind::Video);
        }
    }

    /// Provider confirmed a publication.
    pub fn on_track_published(&mut self, name: &str) {
        if self.state.published_tracks.insert(name.to_string()) {
            tracing::info!("local track published: {name}");
        }
    }

    pub fn on_track_publication_failed(&mut self, name: &str, reason: &str) {
        tracing::warn!("local track publication failed: {name}: {reason}");
        self.state.published_tracks.remove(name);
        if name == SCREEN_TRACK_NAME {
            self.state.screen_capture_active = false;
        }
    }

    /// Names of the published local video tracks, used to label stats.
    pub fn local_video_track_names(&self) -> Vec<String> {
        self.state
            .published_tracks
            .iter()
            .filter(|name| name.as_str() == CAMERA_TRACK_NAME || name.as_str() == SCREEN_TRACK_NAME)
            .cloned()
            .collect()
    }

    fn is_published(&self, name: &str) -> bool {
        self.state.published_tracks.contains(name)
    }

    /// Marks the track published up front; a refusal is reported back through
    /// `on_track_publication_failed`.
    fn publish(&mut self, name: &str, kind: TrackKind) {
        let Some(participant) = self.participant.clone() else {
            return;
        };
        if self.is_published(name) {
            return;
        }
        let enabled = kind != TrackKind::Audio || self.state.audio_enabled;
        self.on_track_published(name);
        self.actions.push(MediaAction {
            participant,
            op: MediaOp::Publish(LocalTrack::new(name, kind, enabled)),
        });
    }

    fn unpublish(&mut self, name: &str) {
        if !self.state.published_tracks.remove(name) {
            return;
        }
        if let Some(participant) = &self.participant {
            self.actions.push(MediaAction {
                participant: participant.clone(),
                op: MediaOp::Unpublish(name.to_string()),
            });
        }
    }

    fn set_enabled(&mut self, name: &str, enabled: bool) {
        if !self.is_published(name) {
            return;
        }
        if let Some(participant) = &self.participant {
            self.actions.push(MediaAction {
                participant: participant.clone(),
                op: MediaOp::SetEnabled {
                    name: name.to_string(),
                    enabled,
                },
            });
        }
    }
}
