mod loopback;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use huddle_core::{RoomEvent, RoomManager, SettingsStore};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;

pub use loopback::{LoggingForegroundService, LoopbackProvider};

const CONNECT_DELAY: Duration = Duration::from_millis(200);

/// One line of the event log printed on stdout.
#[derive(Serialize)]
struct EventLine<'a> {
    seq: u64,
    #[serde(flatten)]
    event: &'a RoomEvent,
}

#[derive(Parser, Debug)]
#[command(name = "huddle-desktop")]
#[command(about = "Join a loopback room and print its events as JSON lines")]
struct Args {
    /// Identity to join as; defaults to the saved display name, then "guest"
    identity: Option<String>,

    /// Room to join
    #[arg(default_value = "lobby")]
    room: String,

    /// How long to stay in the room, in seconds
    #[arg(short, long, default_value_t = 5)]
    seconds: u64,
}

impl Args {
    fn identity_or(&self, display_name: Option<String>) -> String {
        self.identity
            .clone()
            .or(display_name)
            .unwrap_or_else(|| "guest".to_string())
    }
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("huddle")
}

fn ends_session(event: &RoomEvent) -> bool {
    matches!(
        event,
        RoomEvent::Disconnected
            | RoomEvent::ConnectFailure
            | RoomEvent::MaxParticipantFailure
            | RoomEvent::TokenError { .. }
    )
}

/// Join a loopback room, exercise the local controls and print every
/// `RoomEvent` as a JSON line until the session ends.
///
/// Usage: `huddle-desktop [identity] [room] [--seconds N]`
pub fn run() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("huddle_core=debug,huddle_desktop=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let store = SettingsStore::new(data_dir());
    let settings = store.get();
    let identity = args.identity_or(settings.display_name.clone());

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("cannot start tokio runtime: {e}");
            return;
        }
    };

    runtime.block_on(async move {
        let manager = RoomManager::new(
            Arc::new(LoopbackProvider::new(CONNECT_DELAY)),
            Arc::new(LoggingForegroundService),
            &settings,
        );
        let mut events = manager.subscribe();
        let printer = tokio::spawn(async move {
            let mut seq = 0;
            loop {
                match events.recv().await {
                    Ok(event) => {
                        seq += 1;
                        match serde_json::to_string(&EventLine { seq, event: &event }) {
                            Ok(line) => println!("{line}"),
                            Err(e) => tracing::warn!("cannot serialize event: {e}"),
                        }
                        if ends_session(&event) {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(n)) => tracing::warn!("event printer lagged, {n} events dropped"),
                    Err(RecvError::Closed) => break,
                }
            }
        });

        if let Err(e) = manager.connect(&identity, &args.room) {
            tracing::error!("connect failed: {e}");
            return;
        }
        tracing::info!(
            "joined {} as {} for {}s",
            args.room,
            identity,
            args.seconds
        );

        let half = Duration::from_secs(args.seconds) / 2;
        tokio::time::sleep(half).await;
        manager.toggle_local_video();
        manager.send_data_track_message("hello from huddle-desktop");
        tokio::time::sleep(half).await;
        manager.disconnect();

        if tokio::time::timeout(Duration::from_secs(2), printer).await.is_err() {
            tracing::warn!("no Disconnected event within 2s");
        }
    });
}
