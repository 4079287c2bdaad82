use std::sync::{Arc, Weak};

use crate::events::{ConnectionQuality, ParticipantEvent, ParticipantInfo, TrackInfo, TrackKind};
use crate::provider::{LocalParticipant, RemoteParticipant};
use crate::room::RoomInner;

/// Per-participant callbacks delivered by the provider to a delegate.
#[derive(Debug, Clone, PartialEq)]
pub enum ParticipantCallback {
    TrackPublished {
        track_name: String,
        track_sid: String,
    },
    TrackPublicationFailed {
        track_name: String,
        reason: String,
    },
    TrackSubscribed(TrackInfo),
    TrackUnsubscribed {
        track_sid: String,
    },
    TrackSubscriptionFailed {
        track_sid: String,
        reason: String,
    },
    TrackEnabled {
        track_sid: String,
        kind: TrackKind,
    },
    TrackDisabled {
        track_sid: String,
        kind: TrackKind,
    },
    NetworkQualityChanged(ConnectionQuality),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantRole {
    Local,
    Remote,
}

/// What a delegate asks the controller to do with a translated callback.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum DelegateCommand {
    Emit(ParticipantEvent),
    LocalTrackPublished(String),
    LocalTrackPublicationFailed { track_name: String, reason: String },
}

/// Listener installed on one participant for the lifetime of its session.
///
/// Holds only a weak back-reference to the controller; callbacks reaching a
/// delegate whose controller is gone, or whose participant is no longer
/// tracked, are dropped.
#[derive(Clone)]
pub struct ParticipantDelegate {
    controller: Weak<RoomInner>,
    participant_sid: String,
    role: ParticipantRole,
}

impl ParticipantDelegate {
    pub(crate) fn new(controller: Weak<RoomInner>, participant_sid: String, role: ParticipantRole) -> Self {
        Self {
            controller,
            participant_sid,
            role,
        }
    }

    pub fn participant_sid(&self) -> &str {
        &self.participant_sid
    }

    pub fn role(&self) -> ParticipantRole {
        self.role
    }

    pub fn handle(&self, callback: ParticipantCallback) {
        let Some(command) = self.translate(callback) else {
            return;
        };
        match self.controller.upgrade() {
            Some(controller) => controller.forward_from_delegate(self, command),
            None => tracing::debug!(
                "participant {} callback after controller dropped",
                self.participant_sid
            ),
        }
    }

    pub(crate) fn translate(&self, callback: ParticipantCallback) -> Option<DelegateCommand> {
        let participant_sid = self.participant_sid.clone();
        let command = match (self.role, callback) {
            (ParticipantRole::Local, ParticipantCallback::TrackPublished { track_name, .. }) => {
                DelegateCommand::LocalTrackPublished(track_name)
            }
            (ParticipantRole::Local, ParticipantCallback::TrackPublicationFailed { track_name, reason }) => {
                DelegateCommand::LocalTrackPublicationFailed { track_name, reason }
            }
            (ParticipantRole::Remote, ParticipantCallback::TrackSubscribed(track)) => {
                DelegateCommand::Emit(ParticipantEvent::TrackSubscribed {
                    participant_sid,
                    track,
                })
            }
            (ParticipantRole::Remote, ParticipantCallback::TrackUnsubscribed { track_sid }) => {
                DelegateCommand::Emit(ParticipantEvent::TrackUnsubscribed {
                    participant_sid,
                    track_sid,
                })
            }
            (ParticipantRole::Remote, ParticipantCallback::TrackSubscriptionFailed { track_sid, reason }) => {
                DelegateCommand::Emit(ParticipantEvent::TrackSubscriptionFailed {
                    participant_sid,
                    track_sid,
                    reason,
                })
            }
            (ParticipantRole::Remote, ParticipantCallback::TrackEnabled { track_sid, kind }) => {
                DelegateCommand::Emit(ParticipantEvent::TrackEnabled {
                    participant_sid,
                    track_sid,
                    track_kind: kind,
                })
            }
            (ParticipantRole::Remote, ParticipantCallback::TrackDisabled { track_sid, kind }) => {
                DelegateCommand::Emit(ParticipantEvent::TrackDisabled {
                    participant_sid,
                    track_sid,
                    track_kind: kind,
                })
            }
            (ParticipantRole::Remote, ParticipantCallback::NetworkQualityChanged(quality)) => {
                DelegateCommand::Emit(ParticipantEvent::NetworkQualityChanged {
                    participant_sid,
                    quality,
                })
            }
            (role, callback) => {
                tracing::debug!("{role:?} participant {participant_sid}: ignoring {callback:?}");
                return None;
            }
        };
        Some(command)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantStatus {
    Connected,
    Reconnecting,
}

pub(crate) struct RemoteParticipantState {
    pub participant: Arc<dyn RemoteParticipant>,
    pub sid: String,
    pub status: ParticipantStatus,
    pub connection_quality: ConnectionQuality,
    delegate: ParticipantDelegate,
}

impl RemoteParticipantState {
    pub fn info(&self) -> ParticipantInfo {
        ParticipantInfo {
            sid: self.sid.clone(),
            identity: self.participant.identity(),
            is_local: false,
            tracks: self.participant.tracks(),
            connection_quality: self.connection_quality,
        }
    }
}

/// Remote participants of the active session, in provider order.
///
/// Owns one delegate per participant. Installing and detaching delegates
/// on the provider's participants is queued and applied by the caller
/// through `take_delegate_changes` once it has released the registry.
#[derive(Default)]
pub(crate) struct ParticipantRegistry {
    remotes: Vec<RemoteParticipantState>,
    pending: Vec<DelegateChange>,
}

/// A `set_delegate` call on a provider participant, applied outside locks.
pub(crate) struct DelegateChange {
    participant: Arc<dyn RemoteParticipant>,
    delegate: Option<ParticipantDelegate>,
}

impl DelegateChange {
    pub fn apply(self) {
        self.participant.set_delegate(self.delegate);
    }
}

impl ParticipantRegistry {
    /// Track `participant` with a fresh delegate, replacing any previous entry.
    pub fn attach(&mut self, participant: Arc<dyn RemoteParticipant>, controller: Weak<RoomInner>) -> ParticipantInfo {
        let sid = participant.sid();
        if let Some(previous) = self.remove(&sid) {
            tracing::warn!("participant {} re-attached; replacing delegate", previous.sid);
        }
        let delegate = ParticipantDelegate::new(controller, sid.clone(), ParticipantRole::Remote);
        self.pending.push(DelegateChange {
            participant: participant.clone(),
            delegate: Some(delegate.clone()),
        });
        let state = RemoteParticipantState {
            participant,
            sid,
            status: ParticipantStatus::Connected,
            connection_quality: ConnectionQuality::Unknown,
            delegate,
        };
        let info = state.info();
        self.remotes.push(state);
        info
    }

    pub fn remove(&mut self, sid: &str) -> Option<RemoteParticipantState> {
        let index = self.remotes.iter().position(|p| p.sid == sid)?;
        let state = self.remotes.remove(index);
        tracing::debug!("detaching delegate of {}", state.delegate.participant_sid());
        self.pending.push(DelegateChange {
            participant: state.participant.clone(),
            delegate: None,
        });
        Some(state)
    }

    #[cfg(test)]
    pub fn contains(&self, sid: &str) -> bool {
        self.remotes.iter().any(|p| p.sid == sid)
    }

    pub fn get_mut(&mut self, sid: &str) -> Option<&mut RemoteParticipantState> {
        self.remotes.iter_mut().find(|p| p.sid == sid)
    }

    pub fn set_status(&mut self, status: ParticipantStatus) {
        for remote in &mut self.remotes {
            remote.status = status;
        }
    }

    pub fn infos(&self) -> Vec<ParticipantInfo> {
        self.remotes.iter().map(RemoteParticipantState::info).collect()
    }

    pub fn statuses(&self) -> Vec<(String, ParticipantStatus)> {
        self.remotes.iter().map(|p| (p.sid.clone(), p.status)).collect()
    }

    #[cfg(test)]
    pub fn delegate_sids(&self) -> Vec<String> {
        self.remotes
            .iter()
            .map(|p| p.delegate.participant_sid().to_string())
            .collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.remotes.len()
    }

    pub fn clear(&mut self) {
        for remote in self.remotes.drain(..) {
            self.pending.push(DelegateChange {
                participant: remote.participant,
                delegate: None,
            });
        }
    }

    /// Delegate changes queued since the last call, in order.
    pub(crate) fn take_delegate_changes(&mut self) -> Vec<DelegateChange> {
        std::mem::take(&mut self.pending)
    }
}

pub(crate) fn local_info(participant: &dyn LocalParticipant) -> ParticipantInfo {
    ParticipantInfo {
        sid: participant.sid(),
        identity: participant.identity(),
        is_local: true,
        tracks: participant.tracks(),
        connection_quality: ConnectionQuality::Unknown,
    }
}
