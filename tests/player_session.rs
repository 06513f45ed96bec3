#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use hisame::player::{
    ConnectPolicy, IpcEndpoint, Phase, PlaybackController, PlaybackError, PlaybackEvent,
    PlayerSettings,
};

fn socket_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("hisame-{}-{}.sock", name, std::process::id()))
}

fn controller(path: &Path) -> PlaybackController {
    PlaybackController::new(PlayerSettings {
        command: "mpv".to_string(),
        args: Vec::new(),
        endpoint: IpcEndpoint::new(path),
        connect: ConnectPolicy {
            settle: Duration::from_millis(10),
            attempts: 5,
            interval: Duration::from_millis(20),
            deadline: Duration::from_secs(2),
        },
        start_deadline: Duration::from_millis(500),
    })
}

/// Accept one connection, read the three startup commands, write `script`,
/// then keep the connection open for `hold`
fn scripted_player(path: &Path, script: &[&str], hold: Duration) -> JoinHandle<Vec<String>> {
    let _ = std::fs::remove_file(path);
    let listener = UnixListener::bind(path).unwrap();
    let script: Vec<String> = script.iter().map(|s| s.to_string()).collect();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();

        let mut commands = Vec::new();
        while commands.len() < 3 {
            match lines.next_line().await {
                Ok(Some(line)) => commands.push(line),
                _ => break,
            }
        }

        for line in script {
            let _ = write.write_all(format!("{}\n", line).as_bytes()).await;
        }
        tokio::time::sleep(hold).await;
        commands
    })
}

async fn collect(mut events: mpsc::Receiver<PlaybackEvent>) -> Vec<PlaybackEvent> {
    let mut seen = Vec::new();
    while let Ok(Some(event)) = tokio::time::timeout(Duration::from_secs(5), events.recv()).await {
        seen.push(event);
    }
    seen
}

async fn start(controller: &mut PlaybackController) -> Result<mpsc::Receiver<PlaybackEvent>, PlaybackError> {
    let client = controller.connect().await?;
    controller.confirm_start(client).await
}

#[tokio::test]
async fn test_connect_exhausts_retries() {
    let path = socket_path("no-listener");
    let _ = std::fs::remove_file(&path);
    let mut controller = controller(&path);

    let result = controller.connect().await;

    assert!(matches!(result, Err(PlaybackError::ConnectTimeout { attempts: 5 })));
    assert_eq!(controller.phase(), Phase::Error);
}

#[tokio::test]
async fn test_progress_reported_on_end_file() {
    let path = socket_path("end-file");
    let player = scripted_player(
        &path,
        &[
            r#"{"event":"property-change","id":1,"name":"playback-time","data":45.0}"#,
            r#"{"event":"property-change","id":2,"name":"duration","data":90.0}"#,
            r#"{"event":"end-file","reason":"eof"}"#,
        ],
        Duration::from_millis(200),
    );
    let mut controller = controller(&path);

    let events = start(&mut controller).await.unwrap();
    assert_eq!(controller.phase(), Phase::Playing);

    assert_eq!(
        collect(events).await,
        vec![
            PlaybackEvent::Started,
            PlaybackEvent::Progress { percent: 50.0 },
            PlaybackEvent::Ended { percent: 50.0 },
        ]
    );

    let commands = player.await.unwrap();
    assert!(commands[0].contains(r#"["get_property","idle-active"]"#));
    assert!(commands[1].contains(r#"["observe_property",1,"playback-time"]"#));
    assert!(commands[2].contains(r#"["observe_property",2,"duration"]"#));

    controller.cleanup();
    assert!(!path.exists());
}

#[tokio::test]
async fn test_channel_close_ends_session() {
    let path = socket_path("close");
    let _player = scripted_player(
        &path,
        &[
            r#"{"event":"file-loaded"}"#,
            r#"{"event":"property-change","id":1,"name":"playback-time","data":10.0}"#,
            r#"{"event":"property-change","id":2,"name":"duration","data":40.0}"#,
        ],
        Duration::from_millis(50),
    );
    let mut controller = controller(&path);

    let events = start(&mut controller).await.unwrap();

    assert_eq!(
        collect(events).await,
        vec![
            PlaybackEvent::Started,
            PlaybackEvent::Progress { percent: 25.0 },
            PlaybackEvent::Ended { percent: 25.0 },
        ]
    );
    controller.cleanup();
}

#[tokio::test]
async fn test_player_error_ends_with_error() {
    let path = socket_path("error");
    let _player = scripted_player(
        &path,
        &[
            r#"{"event":"playback-restart"}"#,
            r#"{"event":"end-file","reason":"error","file_error":"network error"}"#,
        ],
        Duration::from_millis(200),
    );
    let mut controller = controller(&path);

    let events = start(&mut controller).await.unwrap();

    assert_eq!(
        collect(events).await,
        vec![
            PlaybackEvent::Started,
            PlaybackEvent::Error {
                cause: "network error".to_string()
            },
        ]
    );
    controller.cleanup();
}

#[tokio::test]
async fn test_unrecognized_events_do_not_start() {
    let path = socket_path("noise");
    let _player = scripted_player(
        &path,
        &[
            "garbage",
            r#"{"data":true,"error":"success","request_id":1}"#,
            r#"{"event":"property-change","id":1,"name":"playback-time","data":null}"#,
            r#"{"event":"property-change","name":"idle-active","data":true}"#,
            r#"{"event":"start-file"}"#,
        ],
        Duration::from_secs(2),
    );
    let mut controller = controller(&path);

    let result = start(&mut controller).await;

    assert!(matches!(result, Err(PlaybackError::StartTimeout(_))));
    assert_eq!(controller.phase(), Phase::Error);
    controller.cleanup();
}

#[tokio::test]
async fn test_idle_active_false_starts() {
    let path = socket_path("idle");
    let _player = scripted_player(
        &path,
        &[r#"{"event":"property-change","name":"idle-active","data":false}"#],
        Duration::from_millis(50),
    );
    let mut controller = controller(&path);

    let events = start(&mut controller).await.unwrap();
    let seen = collect(events).await;

    assert_eq!(seen.first(), Some(&PlaybackEvent::Started));
    assert_eq!(seen.last(), Some(&PlaybackEvent::Ended { percent: 0.0 }));
    controller.cleanup();
}

#[tokio::test]
async fn test_close_before_start() {
    let path = socket_path("early-close");
    let _player = scripted_player(&path, &[], Duration::ZERO);
    let mut controller = controller(&path);

    let result = start(&mut controller).await;

    assert!(matches!(result, Err(PlaybackError::ChannelClosed)));
    controller.cleanup();
}

#[tokio::test]
async fn test_stop_emits_final_ended() {
    let path = socket_path("stop");
    let _player = scripted_player(
        &path,
        &[
            r#"{"event":"file-loaded"}"#,
            r#"{"event":"property-change","id":1,"name":"playback-time","data":30.0}"#,
            r#"{"event":"property-change","id":2,"name":"duration","data":60.0}"#,
        ],
        Duration::from_secs(5),
    );
    let mut controller = controller(&path);

    let mut events = start(&mut controller).await.unwrap();
    assert_eq!(events.recv().await, Some(PlaybackEvent::Started));
    assert_eq!(events.recv().await, Some(PlaybackEvent::Progress { percent: 50.0 }));

    controller.stop();
    controller.stop();

    assert_eq!(collect(events).await, vec![PlaybackEvent::Ended { percent: 50.0 }]);
    controller.cleanup();
    assert!(!path.exists());
}
