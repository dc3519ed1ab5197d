//! Test server harness for end-to-end testing.
//!
//! Provides `TestServer` for running a real Huddle server in tests.

use huddle_server::actors::{RoomActorHandle, RoomState};
use huddle_server::config::Config;
use huddle_server::files::FileStore;
use huddle_server::server::{RunningServer, Server, ServerAddrs};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Test harness for running the Huddle server in integration tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_presence() -> anyhow::Result<()> {
///     let server = TestServer::spawn().await?;
///     let alice = TestClient::join(server.control_addr(), "alice").await?;
///     server.wait_for_participants(&["alice"]).await?;
///     Ok(())
/// }
/// ```
pub struct TestServer {
    addrs: ServerAddrs,
    running: RunningServer,
    cancel_token: CancellationToken,
    data_dir: TempDir,
}

impl TestServer {
    /// Spawn a server with default settings.
    ///
    /// The server will:
    /// - Bind control, video, and audio endpoints on 127.0.0.1:0
    /// - Store files under a fresh temporary directory
    /// - Stream downloads without pacing
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with(HashMap::new()).await
    }

    /// Spawn a server, overriding configuration variables.
    pub async fn spawn_with(overrides: HashMap<String, String>) -> Result<Self, anyhow::Error> {
        let data_dir = tempfile::tempdir()
            .map_err(|e| anyhow::anyhow!("Failed to create data dir: {}", e))?;

        let mut vars = HashMap::from([
            (
                "HUDDLE_CONTROL_BIND_ADDRESS".to_string(),
                "127.0.0.1:0".to_string(),
            ),
            (
                "HUDDLE_VIDEO_BIND_ADDRESS".to_string(),
                "127.0.0.1:0".to_string(),
            ),
            (
                "HUDDLE_AUDIO_BIND_ADDRESS".to_string(),
                "127.0.0.1:0".to_string(),
            ),
            (
                "HUDDLE_DATA_DIR".to_string(),
                data_dir.path().display().to_string(),
            ),
            ("HUDDLE_DOWNLOAD_PACING_MS".to_string(), "0".to_string()),
        ]);
        vars.extend(overrides);

        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let server = Server::bind(config)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;
        let addrs = server.local_addrs();

        let cancel_token = CancellationToken::new();
        let running = server.start(&cancel_token);

        Ok(Self {
            addrs,
            running,
            cancel_token,
            data_dir,
        })
    }

    /// Control channel address.
    pub fn control_addr(&self) -> SocketAddr {
        self.addrs.control
    }

    /// Video relay address.
    pub fn video_addr(&self) -> SocketAddr {
        self.addrs.video
    }

    /// Audio relay address.
    pub fn audio_addr(&self) -> SocketAddr {
        self.addrs.audio
    }

    /// Root of the server's file storage.
    pub fn data_dir(&self) -> &Path {
        self.data_dir.path()
    }

    pub fn room(&self) -> &RoomActorHandle {
        self.running.room()
    }

    pub fn files(&self) -> &Arc<FileStore> {
        self.running.files()
    }

    /// Current room state.
    pub async fn state(&self) -> Result<RoomState, anyhow::Error> {
        self.room()
            .get_state()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to get room state: {}", e))
    }

    /// Wait until exactly `names` are registered.
    pub async fn wait_for_participants(&self, names: &[&str]) -> Result<(), anyhow::Error> {
        let mut expected: Vec<&str> = names.to_vec();
        expected.sort_unstable();

        let deadline = tokio::time::Instant::now() + crate::RECV_TIMEOUT;
        loop {
            let state = self.state().await?;
            if state.names() == expected {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                anyhow::bail!(
                    "Expected participants {:?}, found {:?}",
                    expected,
                    state.names()
                );
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Wait until no upload is in progress.
    pub async fn wait_for_uploads(&self) -> Result<(), anyhow::Error> {
        let deadline = tokio::time::Instant::now() + crate::RECV_TIMEOUT;
        while self.files().active_count().await > 0 {
            if tokio::time::Instant::now() >= deadline {
                anyhow::bail!("Uploads still in progress");
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Ok(())
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        // Stop accepting and abort every task so the test exits promptly
        self.cancel_token.cancel();
        self.running.abort();
    }
}
