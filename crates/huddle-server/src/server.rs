//! Server assembly: bind every endpoint, then spawn the actors and loops.
//!
//! Binding and spawning are separate so that a bind failure, the only fatal
//! runtime error, surfaces before anything is running.

use crate::actors::{
    MediaRelay, MediaSender, MediaSenders, RoomActor, RoomActorHandle,
};
use crate::config::Config;
use crate::control::{ControlContext, ControlListener};
use crate::errors::ServerError;
use crate::files::FileStore;

use huddle_protocol::MediaKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// How often idle uploads are looked for.
pub const REAP_INTERVAL: Duration = Duration::from_secs(30);

/// Bound addresses, useful when configured with port 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerAddrs {
    pub control: SocketAddr,
    pub video: SocketAddr,
    pub audio: SocketAddr,
}

/// A server with all endpoints bound but nothing running yet.
pub struct Server {
    config: Arc<Config>,
    control: TcpListener,
    video: Arc<UdpSocket>,
    audio: Arc<UdpSocket>,
    files: Arc<FileStore>,
    addrs: ServerAddrs,
}

impl Server {
    /// Bind the control listener and both media sockets, and open the data root.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Bind` naming the address that could not be bound,
    /// or an I/O error if the data root cannot be created.
    pub async fn bind(config: Config) -> Result<Self, ServerError> {
        let control = TcpListener::bind(config.control_bind_address)
            .await
            .map_err(|source| ServerError::Bind {
                address: config.control_bind_address,
                source,
            })?;
        let video = bind_udp(config.video_bind_address).await?;
        let audio = bind_udp(config.audio_bind_address).await?;

        let addrs = ServerAddrs {
            control: control.local_addr()?,
            video: video.local_addr()?,
            audio: audio.local_addr()?,
        };

        let files = Arc::new(FileStore::open(&config.data_dir).await?);

        info!(
            target: "huddle.server",
            control = %addrs.control,
            video = %addrs.video,
            audio = %addrs.audio,
            data_dir = %config.data_dir.display(),
            "Endpoints bound"
        );

        Ok(Self {
            config: Arc::new(config),
            control,
            video: Arc::new(video),
            audio: Arc::new(audio),
            files,
            addrs,
        })
    }

    #[must_use]
    pub fn local_addrs(&self) -> ServerAddrs {
        self.addrs
    }

    /// Spawn the room, the control listener, both media relays, and the
    /// upload reaper. Everything stops when `cancel_token` is cancelled.
    pub fn start(self, cancel_token: &CancellationToken) -> RunningServer {
        let media = MediaSenders {
            video: MediaSender::new(MediaKind::Video, Arc::clone(&self.video)),
            audio: MediaSender::new(MediaKind::Audio, Arc::clone(&self.audio)),
        };

        let (room, room_task) = RoomActor::spawn(media, cancel_token.child_token());

        let context = ControlContext {
            room: room.clone(),
            files: Arc::clone(&self.files),
            config: Arc::clone(&self.config),
        };

        let tasks = vec![
            room_task,
            ControlListener::spawn(self.control, context, cancel_token.child_token()),
            MediaRelay::spawn(
                MediaKind::Video,
                self.video,
                self.config.video_max_datagram_bytes,
                room.clone(),
                cancel_token.child_token(),
            ),
            MediaRelay::spawn(
                MediaKind::Audio,
                self.audio,
                self.config.audio_max_datagram_bytes,
                room.clone(),
                cancel_token.child_token(),
            ),
            spawn_transfer_reaper(
                Arc::clone(&self.files),
                self.config.transfer_idle_timeout(),
                cancel_token.child_token(),
            ),
        ];

        info!(target: "huddle.server", "Huddle server running");

        RunningServer {
            addrs: self.addrs,
            room,
            files: self.files,
            tasks,
        }
    }
}

/// Handles to a started server.
pub struct RunningServer {
    addrs: ServerAddrs,
    room: RoomActorHandle,
    files: Arc<FileStore>,
    tasks: Vec<JoinHandle<()>>,
}

impl RunningServer {
    #[must_use]
    pub fn local_addrs(&self) -> ServerAddrs {
        self.addrs
    }

    #[must_use]
    pub fn room(&self) -> &RoomActorHandle {
        &self.room
    }

    #[must_use]
    pub fn files(&self) -> &Arc<FileStore> {
        &self.files
    }

    /// Wait for the long-running tasks to finish after cancellation.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                debug!(target: "huddle.server", error = %e, "Server task ended abnormally");
            }
        }
    }

    /// Abort every long-running task without waiting.
    pub fn abort(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn bind_udp(address: SocketAddr) -> Result<UdpSocket, ServerError> {
    UdpSocket::bind(address)
        .await
        .map_err(|source| ServerError::Bind { address, source })
}

/// Periodically abort uploads idle for longer than `max_idle`.
pub fn spawn_transfer_reaper(
    files: Arc<FileStore>,
    max_idle: Duration,
    cancel_token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(REAP_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = cancel_token.cancelled() => break,
                _ = ticker.tick() => {
                    let reaped = files.reap_idle(max_idle).await;
                    if reaped > 0 {
                        info!(target: "huddle.files", reaped = reaped, "Reaped idle uploads");
                    }
                }
            }
        }

        debug!(target: "huddle.files", "Transfer reaper stopped");
    })
}
