use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::events::{ParticipantInfo, TrackKind};
use crate::provider::Room;
use crate::room::RoomInner;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackDirection {
    Local,
    Remote,
}

/// Stats for one track at the time of the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackStats {
    pub track_sid: String,
    pub track_name: String,
    pub kind: TrackKind,
    pub direction: TrackDirection,
    pub codec: String,
    pub packets_lost: u32,
    /// Bytes sent for local tracks, received for remote tracks.
    pub bytes: u64,
    pub packets: u32,
    pub jitter_ms: Option<u32>,
    pub audio_level: Option<u32>,
    pub timestamp_ms: f64,
}

/// Provider snapshot for one peer connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsReport {
    pub peer_connection_id: String,
    pub tracks: Vec<TrackStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteTrackStats {
    pub participant_sid: String,
    pub participant_identity: String,
    pub stats: TrackStats,
}

/// Stats reports resolved against the session at emission time.
///
/// Local tracks are kept only if they are currently published; remote tracks
/// are attributed to the participant owning the track sid, and dropped if no
/// current participant owns it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomStats {
    pub generated_at: DateTime<Utc>,
    pub peer_connection_ids: Vec<String>,
    pub local_tracks: Vec<TrackStats>,
    pub remote_tracks: Vec<RemoteTrackStats>,
}

impl RoomStats {
    pub fn new(
        remote_participants: &[ParticipantInfo],
        local_track_names: &[String],
        reports: Vec<StatsReport>,
    ) -> Self {
        let mut peer_connection_ids = Vec::with_capacity(reports.len());
        let mut local_tracks = Vec::new();
        let mut remote_tracks = Vec::new();

        for report in reports {
            peer_connection_ids.push(report.peer_connection_id);
            for stats in report.tracks {
                match stats.direction {
                    TrackDirection::Local => {
                        if local_track_names.iter().any(|n| n == &stats.track_name) {
                            local_tracks.push(stats);
                        }
                    }
                    TrackDirection::Remote => {
                        let owner = remote_participants
                            .iter()
                            .find(|p| p.tracks.iter().any(|t| t.sid == stats.track_sid));
                        match owner {
                            Some(p) => remote_tracks.push(RemoteTrackStats {
                                participant_sid: p.sid.clone(),
                                participant_identity: p.identity.clone(),
                                stats,
                            }),
                            None => tracing::debug!("no participant owns track {}", stats.track_sid),
                        }
                    }
                }
            }
        }

        Self {
            generated_at: Utc::now(),
            peer_connection_ids,
            local_tracks,
            remote_tracks,
        }
    }
}

/// Periodic stats query bound to one session.
///
/// Each tick asks the room for a snapshot and hands it to the controller,
/// which discards it if the session has already ended. The task stops on
/// `stop()`, on drop, or once the controller is gone.
pub struct StatsPoller {
    room_sid: String,
    handle: Option<JoinHandle<()>>,
}

impl StatsPoller {
    pub(crate) fn start(
        runtime: &Handle,
        controller: Weak<RoomInner>,
        room: Arc<dyn Room>,
        interval: Duration,
    ) -> Self {
        let room_sid = room.sid();
        let sid = room_sid.clone();
        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let reports = room.stats().await;
                let Some(controller) = controller.upgrade() else {
                    break;
                };
                controller.submit_stats(reports);
            }
            tracing::debug!("stats poller for room {sid} finished");
        });
        tracing::info!("stats poller started for room {room_sid} every {interval:?}");
        Self {
            room_sid,
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            tracing::info!("stats poller stopped for room {}", self.room_sid);
        }
    }
}

impl Drop for StatsPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ConnectionQuality, TrackInfo, TrackSource};

    fn track_stats(sid: &str, name: &str, direction: TrackDirection) -> TrackStats {
        TrackStats {
            track_sid: sid.to_string(),
            track_name: name.to_string(),
            kind: TrackKind::Video,
            direction,
            codec: "VP8".to_string(),
            packets_lost: 0,
            bytes: 1024,
            packets: 10,
            jitter_ms: None,
            audio_level: None,
            timestamp_ms: 0.0,
        }
    }

    fn bob() -> ParticipantInfo {
        ParticipantInfo {
            sid: "PA-bob".to_string(),
            identity: "bob".to_string(),
            is_local: false,
            tracks: vec![TrackInfo {
                sid: "MT-bob-cam".to_string(),
                name: "camera".to_string(),
                kind: TrackKind::Video,
                source: TrackSource::Camera,
                enabled: true,
            }],
            connection_quality: ConnectionQuality::Good,
        }
    }

    #[test]
    fn remote_tracks_are_attributed_to_owner() {
        let report = StatsReport {
            peer_connection_id: "PC1".to_string(),
            tracks: vec![
                track_stats("MT-bob-cam", "camera", TrackDirection::Remote),
                track_stats("MT-gone", "camera", TrackDirection::Remote),
            ],
        };
        let stats = RoomStats::new(&[bob()], &[], vec![report]);

        assert_eq!(stats.peer_connection_ids, vec!["PC1"]);
        assert_eq!(stats.remote_tracks.len(), 1);
        assert_eq!(stats.remote_tracks[0].participant_identity, "bob");
        assert_eq!(stats.remote_tracks[0].stats.track_sid, "MT-bob-cam");
    }

    #[test]
    fn local_tracks_filtered_by_published_names() {
        let report = StatsReport {
            peer_connection_id: "PC1".to_string(),
            tracks: vec![
                track_stats("MT-a", "camera", TrackDirection::Local),
                track_stats("MT-b", "screen", TrackDirection::Local),
            ],
        };
        let stats = RoomStats::new(&[], &["camera".to_string()], vec![report]);

        assert_eq!(stats.local_tracks.len(), 1);
        assert_eq!(stats.local_tracks[0].track_name, "camera");
        assert!(stats.remote_tracks.is_empty());
    }

    #[test]
    fn empty_reports_give_empty_stats() {
        let stats = RoomStats::new(&[bob()], &["camera".to_string()], Vec::new());
        assert!(stats.local_tracks.is_empty());
        assert!(stats.remote_tracks.is_empty());
        assert!(stats.peer_connection_ids.is_empty());
    }
}
