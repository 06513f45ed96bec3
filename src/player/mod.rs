//! Playback session controller.
//!
//! One controller drives one playback attempt: launch the player, connect to
//! its IPC channel, wait for playback to actually begin, then hand the
//! connection to a background monitor that reports progress over a channel.
//! The first event a caller receives is always `Started`; the last is always
//! `Ended` or `Error`.

pub mod ipc;
pub mod process;
pub mod transport;

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::PlayerConfig;
use crate::episodes::EpisodeRecord;
use crate::sources::{SourceError, SourceResolver};

pub use ipc::{IpcClient, IpcError, PlayerEvent};
pub use transport::{IpcEndpoint, default_ipc_path, resolve_ipc_path};

/// Observer id for `playback-time`
pub const PLAYBACK_TIME_ID: u64 = 1;
/// Observer id for `duration`
pub const DURATION_ID: u64 = 2;

const EVENT_BUFFER: usize = 32;
const PROGRESS_LOG_STEP: u32 = 5;

#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("failed to launch player '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("could not connect to player ipc after {attempts} attempts")]
    ConnectTimeout { attempts: u32 },
    #[error("playback did not start within {0:?}")]
    StartTimeout(Duration),
    #[error("player closed the ipc channel before playback started")]
    ChannelClosed,
    #[error("player reported an error: {0}")]
    Player(String),
    #[error(transparent)]
    Ipc(#[from] IpcError),
    #[error(transparent)]
    Sources(#[from] SourceError),
    #[error("none of {attempted} sources could be played: {last}")]
    NoPlayableSource {
        attempted: usize,
        #[source]
        last: Box<SourceError>,
    },
}

/// Lifecycle events delivered to the caller
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    Started,
    Progress { percent: f64 },
    Ended { percent: f64 },
    Error { cause: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Connecting,
    AwaitingStart,
    Playing,
    Ended,
    Error,
}

impl Phase {
    fn rank(self) -> u8 {
        match self {
            Phase::Idle => 0,
            Phase::Connecting => 1,
            Phase::AwaitingStart => 2,
            Phase::Playing => 3,
            Phase::Ended | Phase::Error => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Ended | Phase::Error)
    }

    /// Phases only move forward. `Ended` needs a confirmed start first;
    /// `Error` can end any live phase.
    pub fn can_advance_to(self, next: Phase) -> bool {
        if self.is_terminal() || next.rank() <= self.rank() {
            return false;
        }
        match next {
            Phase::Ended => self == Phase::Playing,
            _ => true,
        }
    }
}

/// Playback progress, recomputed as `playback_time / duration * 100`.
/// Zero when either side is zero; values past 100 are passed through.
pub fn compute_progress(playback_time: f64, duration: f64) -> f64 {
    if playback_time <= 0.0 || duration <= 0.0 {
        return 0.0;
    }
    playback_time / duration * 100.0
}

/// Cached player state for one playback
#[derive(Debug, Clone)]
pub struct PlaybackSession {
    phase: Phase,
    playback_time: f64,
    duration: f64,
    progress: f64,
}

impl Default for PlaybackSession {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            playback_time: 0.0,
            duration: 0.0,
            progress: 0.0,
        }
    }
}

impl PlaybackSession {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn progress(&self) -> f64 {
        self.progress
    }

    pub fn playback_time(&self) -> f64 {
        self.playback_time
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Move to `next`, returning false if the transition is not allowed
    pub fn advance(&mut self, next: Phase) -> bool {
        if !self.phase.can_advance_to(next) {
            warn!(from = ?self.phase, to = ?next, "ignoring phase transition");
            return false;
        }
        debug!(from = ?self.phase, to = ?next, "playback phase");
        self.phase = next;
        true
    }

    /// Apply an observed property. Returns the new progress when its whole
    /// percentage changed.
    pub fn apply_property(&mut self, name: &str, data: &Value) -> Option<f64> {
        let value = data.as_f64()?.max(0.0);
        match name {
            "playback-time" => self.playback_time = value,
            "duration" => self.duration = value,
            _ => return None,
        }

        let previous = self.progress;
        self.progress = compute_progress(self.playback_time, self.duration);
        (self.progress.floor() != previous.floor()).then_some(self.progress)
    }
}

/// What an event means while waiting for playback to begin
#[derive(Debug, PartialEq)]
enum StartSignal {
    Started,
    Waiting,
    Failed(String),
    Finished,
}

fn start_signal(event: &PlayerEvent) -> StartSignal {
    match event {
        PlayerEvent::PropertyChange { name, data, .. } => match name.as_str() {
            "playback-time" if data.as_f64().is_some_and(|t| t > 0.0) => StartSignal::Started,
            "idle-active" if data.as_bool() == Some(false) => StartSignal::Started,
            _ => StartSignal::Waiting,
        },
        PlayerEvent::PlaybackRestart | PlayerEvent::FileLoaded => StartSignal::Started,
        PlayerEvent::EndFile { reason, file_error } if reason == "error" => {
            StartSignal::Failed(file_error.clone().unwrap_or_else(|| reason.clone()))
        }
        PlayerEvent::EndFile { .. } => StartSignal::Finished,
        // Anything else counts as no progress yet
        _ => StartSignal::Waiting,
    }
}

/// Retry policy for reaching the player's IPC channel
#[derive(Debug, Clone, Copy)]
pub struct ConnectPolicy {
    /// Wait before the first attempt so the player can bind its socket
    pub settle: Duration,
    pub attempts: u32,
    pub interval: Duration,
    pub deadline: Duration,
}

impl Default for ConnectPolicy {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(300),
            attempts: 20,
            interval: Duration::from_millis(500),
            deadline: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlayerSettings {
    pub command: String,
    pub args: Vec<String>,
    pub endpoint: IpcEndpoint,
    pub connect: ConnectPolicy,
    pub start_deadline: Duration,
}

impl PlayerSettings {
    pub fn from_config(config: &PlayerConfig) -> Self {
        let path = resolve_ipc_path(
            std::env::var(transport::IPC_PATH_ENV).ok(),
            config.ipc_path.as_deref(),
        );

        Self {
            command: config.command.clone(),
            args: config.args.clone(),
            endpoint: IpcEndpoint::new(path),
            connect: ConnectPolicy::default(),
            start_deadline: Duration::from_secs(30),
        }
    }
}

/// Drives a single playback attempt
pub struct PlaybackController {
    settings: PlayerSettings,
    session: PlaybackSession,
    child: Option<Child>,
    cancel: CancellationToken,
}

impl PlaybackController {
    pub fn new(settings: PlayerSettings) -> Self {
        Self {
            settings,
            session: PlaybackSession::default(),
            child: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Phase as seen by the controller. Once playing, the monitor owns the
    /// session and reports the rest through events.
    pub fn phase(&self) -> Phase {
        self.session.phase()
    }

    fn fail<T>(&mut self, err: PlaybackError) -> Result<T, PlaybackError> {
        self.session.advance(Phase::Error);
        error!(error = %err, "playback failed");
        Err(err)
    }

    /// Spawn the player for `stream_url`
    pub fn launch(&mut self, stream_url: &str, title: &str) -> Result<(), PlaybackError> {
        let endpoint = &self.settings.endpoint;
        if let Err(e) = endpoint.remove_artifact() {
            warn!(path = %endpoint.path().display(), error = %e, "could not remove stale ipc socket");
        }

        let args = process::build_args(endpoint.path(), title, &self.settings.args, stream_url);
        debug!(command = %self.settings.command, ?args, "launching player");

        match process::spawn_detached(&self.settings.command, &args) {
            Ok(child) => {
                self.child = Some(child);
                Ok(())
            }
            Err(source) => {
                let command = self.settings.command.clone();
                self.fail(PlaybackError::Spawn { command, source })
            }
        }
    }

    /// Open the IPC channel, retrying while the player starts up
    pub async fn connect(&mut self) -> Result<IpcClient, PlaybackError> {
        self.session.advance(Phase::Connecting);

        let policy = self.settings.connect;
        let endpoint = &self.settings.endpoint;
        let mut attempts = 0u32;

        let attempt_loop = async {
            sleep(policy.settle).await;
            for attempt in 1..=policy.attempts {
                attempts = attempt;
                match endpoint.connect().await {
                    Ok(stream) => return Some(stream),
                    Err(e) => debug!(attempt, error = %e, "player ipc not ready"),
                }
                if attempt < policy.attempts {
                    sleep(policy.interval).await;
                }
            }
            None
        };

        let stream = timeout(policy.deadline, attempt_loop).await.ok().flatten();

        match stream {
            Some(stream) => {
                info!(attempts, path = %endpoint.path().display(), "connected to player ipc");
                Ok(IpcClient::new(stream, self.cancel.child_token()))
            }
            None => self.fail(PlaybackError::ConnectTimeout { attempts }),
        }
    }

    /// Wait for playback to begin, then hand `client` to the monitor.
    ///
    /// The returned channel yields `Started` first.
    pub async fn confirm_start(
        &mut self,
        mut client: IpcClient,
    ) -> Result<mpsc::Receiver<PlaybackEvent>, PlaybackError> {
        self.session.advance(Phase::AwaitingStart);

        let subscribed = async {
            client.get_property("idle-active").await?;
            client.observe_property(PLAYBACK_TIME_ID, "playback-time").await?;
            client.observe_property(DURATION_ID, "duration").await?;
            Ok::<_, IpcError>(())
        }
        .await;
        if let Err(e) = subscribed {
            return self.fail(e.into());
        }

        let deadline = self.settings.start_deadline;
        let session = &mut self.session;
        let wait = async {
            loop {
                let Some(event) = client.next_event().await else {
                    return Err(PlaybackError::ChannelClosed);
                };
                if let PlayerEvent::PropertyChange { name, data, .. } = &event {
                    session.apply_property(name, data);
                }
                match start_signal(&event) {
                    StartSignal::Started => return Ok(()),
                    StartSignal::Waiting => {
                        debug!(?event, "waiting for playback to start");
                    }
                    StartSignal::Failed(cause) => return Err(PlaybackError::Player(cause)),
                    StartSignal::Finished => return Err(PlaybackError::ChannelClosed),
                }
            }
        };

        match timeout(deadline, wait).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return self.fail(e),
            Err(_) => return self.fail(PlaybackError::StartTimeout(deadline)),
        }

        self.session.advance(Phase::Playing);
        info!("playback started");

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        // Fresh channel, cannot be full
        let _ = tx.try_send(PlaybackEvent::Started);
        tokio::spawn(monitor(
            client,
            self.session.clone(),
            tx,
            self.cancel.clone(),
        ));

        Ok(rx)
    }

    /// Launch, connect and confirm start for one stream URL
    pub async fn play(
        &mut self,
        stream_url: &str,
        title: &str,
    ) -> Result<mpsc::Receiver<PlaybackEvent>, PlaybackError> {
        self.launch(stream_url, title)?;
        let client = self.connect().await?;
        self.confirm_start(client).await
    }

    /// Resolve sources for `episode` and play the first one that yields a
    /// stream URL
    pub async fn play_episode(
        &mut self,
        sources: &SourceResolver,
        episode: &EpisodeRecord,
    ) -> Result<mpsc::Receiver<PlaybackEvent>, PlaybackError> {
        let url = match resolve_stream(sources, episode).await {
            Ok(url) => url,
            Err(e) => return self.fail(e),
        };
        self.play(&url, &episode.display_title()).await
    }

    /// Close the IPC connection and kill the player if it is still running
    pub fn stop(&mut self) {
        self.cancel.cancel();

        if let Some(child) = self.child.as_mut() {
            match child.try_wait() {
                Ok(None) => match child.start_kill() {
                    Ok(()) => info!("player stopped"),
                    Err(e) => warn!(error = %e, "failed to kill player"),
                },
                Ok(Some(status)) => debug!(%status, "player already exited"),
                Err(e) => warn!(error = %e, "failed to query player status"),
            }
        }
    }

    /// Stop and remove the IPC socket file
    pub fn cleanup(&mut self) {
        self.stop();
        if let Err(e) = self.settings.endpoint.remove_artifact() {
            warn!(error = %e, "failed to remove ipc socket");
        }
    }
}

/// Stream URL of the highest-priority candidate that resolves.
///
/// Candidates are tried in priority order; failures are logged and the next
/// one is tried. When all of them fail the last error is kept.
pub async fn resolve_stream(
    sources: &SourceResolver,
    episode: &EpisodeRecord,
) -> Result<String, PlaybackError> {
    let candidates = sources.get_sources(episode).await?;
    let attempted = candidates.len();
    let mut last_error = None;

    for candidate in &candidates {
        match sources.get_stream_url(candidate).await {
            Ok(url) => {
                info!(
                    overall = episode.overall,
                    source = %candidate.source_name,
                    priority = candidate.priority,
                    "playing episode"
                );
                return Ok(url);
            }
            Err(e) => {
                warn!(source = %candidate.source_name, error = %e, "source failed, trying next");
                last_error = Some(e);
            }
        }
    }

    let last = last_error.unwrap_or(SourceError::NoSupportedSource {
        episode: episode.overall,
    });
    Err(PlaybackError::NoPlayableSource {
        attempted,
        last: Box::new(last),
    })
}

/// Consume player events after start until the session ends
async fn monitor(
    mut client: IpcClient,
    mut session: PlaybackSession,
    tx: mpsc::Sender<PlaybackEvent>,
    cancel: CancellationToken,
) {
    let mut logged_step = (session.progress() as u32) / PROGRESS_LOG_STEP;

    let terminal = loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("playback monitor stopped");
                break PlaybackEvent::Ended { percent: session.progress() };
            }
            event = client.next_event() => event,
        };

        match event {
            None => {
                info!(progress = session.progress(), "player ipc closed");
                break PlaybackEvent::Ended { percent: session.progress() };
            }
            Some(PlayerEvent::PropertyChange { name, data, .. }) => {
                let Some(percent) = session.apply_property(&name, &data) else {
                    continue;
                };
                let step = (percent as u32) / PROGRESS_LOG_STEP;
                if step != logged_step {
                    logged_step = step;
                    info!(progress = %format!("{:.1}%", percent), "playback progress");
                }
                if tx.send(PlaybackEvent::Progress { percent }).await.is_err() {
                    debug!("playback receiver dropped");
                    return;
                }
            }
            Some(PlayerEvent::EndFile { reason, file_error }) => {
                if reason == "error" {
                    let cause = file_error.unwrap_or(reason);
                    error!(cause = %cause, "player reported an error");
                    break PlaybackEvent::Error { cause };
                }
                info!(reason = %reason, progress = session.progress(), "playback ended");
                break PlaybackEvent::Ended { percent: session.progress() };
            }
            Some(PlayerEvent::Reply { request_id, error, .. }) if error != "success" => {
                debug!(?request_id, error = %error, "player rejected command");
            }
            Some(other) => debug!(event = ?other, "ignoring player event"),
        }
    };

    let phase = match terminal {
        PlaybackEvent::Error { .. } => Phase::Error,
        _ => Phase::Ended,
    };
    session.advance(phase);
    client.close();
    let _ = tx.send(terminal).await;
}
