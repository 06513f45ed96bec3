use std::path::Path;
use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::info;

#[cfg(windows)]
const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
#[cfg(windows)]
const DETACHED_PROCESS: u32 = 0x0000_0008;

/// Player arguments: fixed flags, then user extras, then the stream URL
pub fn build_args(ipc_path: &Path, title: &str, extra: &[String], stream_url: &str) -> Vec<String> {
    let mut args = vec![
        "--no-terminal".to_string(),
        "--keep-open=no".to_string(),
        format!("--input-ipc-server={}", ipc_path.display()),
        format!("--force-media-title={}", title),
    ];
    args.extend(extra.iter().cloned());
    args.push(stream_url.to_string());
    args
}

/// Spawn the player detached from our terminal and process group.
///
/// The child is not killed on drop: a player window that is already up
/// stays up even when the caller gives up on it.
pub fn spawn_detached(command: &str, args: &[String]) -> std::io::Result<Child> {
    let mut cmd = Command::new(command);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(false);

    #[cfg(unix)]
    cmd.process_group(0);

    #[cfg(windows)]
    cmd.creation_flags(CREATE_NEW_PROCESS_GROUP | DETACHED_PROCESS);

    let child = cmd.spawn()?;
    info!(command, pid = ?child.id(), "player launched");
    Ok(child)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_args_order() {
        let args = build_args(
            Path::new("/run/user/1000/hisame-mpv.sock"),
            "Ep 4 - Frieren",
            &["--fs".to_string()],
            "https://cdn.example/ep4.mp4",
        );

        assert_eq!(
            args,
            vec![
                "--no-terminal",
                "--keep-open=no",
                "--input-ipc-server=/run/user/1000/hisame-mpv.sock",
                "--force-media-title=Ep 4 - Frieren",
                "--fs",
                "https://cdn.example/ep4.mp4",
            ]
        );
    }

    #[tokio::test]
    async fn test_spawn_missing_binary_fails() {
        let result = spawn_detached("hisame-no-such-player", &[]);
        assert!(result.is_err());
    }
}
