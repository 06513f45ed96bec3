//! Local IPC transport to the player: a Unix domain socket, or a named pipe
//! on Windows. Everything above this module is transport-agnostic.

use std::io;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

/// Environment variable that overrides the IPC path
pub const IPC_PATH_ENV: &str = "MPV_IPC_SOCKET";

/// Any duplex byte stream the IPC client can run over
pub trait IpcStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> IpcStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Platform default IPC path
#[cfg(unix)]
pub fn default_ipc_path() -> PathBuf {
    std::env::var_os("XDG_RUNTIME_DIR")
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
        .join("hisame-mpv.sock")
}

#[cfg(windows)]
pub fn default_ipc_path() -> PathBuf {
    PathBuf::from(r"\\.\pipe\hisame-mpv")
}

/// Pick the IPC path: environment, then config, then the platform default
pub fn resolve_ipc_path(env_value: Option<String>, configured: Option<&Path>) -> PathBuf {
    if let Some(path) = env_value.filter(|v| !v.trim().is_empty()) {
        return PathBuf::from(path);
    }
    configured
        .map(Path::to_path_buf)
        .unwrap_or_else(default_ipc_path)
}

/// Where the player listens for IPC connections
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpcEndpoint {
    path: PathBuf,
}

impl IpcEndpoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(unix)]
    pub async fn connect(&self) -> io::Result<Box<dyn IpcStream>> {
        let stream = tokio::net::UnixStream::connect(&self.path).await?;
        Ok(Box::new(stream))
    }

    #[cfg(windows)]
    pub async fn connect(&self) -> io::Result<Box<dyn IpcStream>> {
        let pipe = tokio::net::windows::named_pipe::ClientOptions::new().open(&self.path)?;
        Ok(Box::new(pipe))
    }

    /// Whether the transport leaves a file behind that needs removing
    pub fn has_artifact(&self) -> bool {
        cfg!(unix)
    }

    /// Remove a leftover socket file. Missing files are fine.
    pub fn remove_artifact(&self) -> io::Result<()> {
        if !self.has_artifact() {
            return Ok(());
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "removed ipc socket");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_wins_over_config() {
        let path = resolve_ipc_path(Some("/tmp/a.sock".to_string()), Some(Path::new("/tmp/b.sock")));
        assert_eq!(path, PathBuf::from("/tmp/a.sock"));
    }

    #[test]
    fn test_config_wins_over_default() {
        let path = resolve_ipc_path(Some("  ".to_string()), Some(Path::new("/tmp/b.sock")));
        assert_eq!(path, PathBuf::from("/tmp/b.sock"));
    }

    #[test]
    fn test_default_path() {
        let path = resolve_ipc_path(None, None);
        assert_eq!(path, default_ipc_path());
        assert!(path.to_string_lossy().contains("hisame-mpv"));
    }

    #[cfg(unix)]
    #[test]
    fn test_remove_missing_artifact_is_ok() {
        let endpoint = IpcEndpoint::new(std::env::temp_dir().join("hisame-test-missing.sock"));
        assert!(endpoint.remove_artifact().is_ok());
    }
}
