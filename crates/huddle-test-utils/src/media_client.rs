//! UDP media client.

use crate::{QUIET_WINDOW, RECV_TIMEOUT};
use huddle_protocol::{decode_envelope, encode_envelope, Envelope, MediaKind, RequestKind};
use std::net::SocketAddr;
use tokio::net::UdpSocket;

/// Receive buffer, larger than any datagram the relay forwards.
const RECV_BUF_LEN: usize = 128 * 1024;

/// A participant's socket on one media channel.
pub struct MediaClient {
    name: String,
    kind: MediaKind,
    socket: UdpSocket,
    relay: SocketAddr,
}

impl MediaClient {
    /// Bind an ephemeral loopback socket aimed at `relay`.
    pub async fn bind(
        name: &str,
        kind: MediaKind,
        relay: SocketAddr,
    ) -> Result<Self, anyhow::Error> {
        let socket = UdpSocket::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind media socket: {}", e))?;
        Ok(Self {
            name: name.to_string(),
            kind,
            socket,
            relay,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, anyhow::Error> {
        Ok(self.socket.local_addr()?)
    }

    /// Send the `ADD` datagram that records this socket's address.
    pub async fn register(&self) -> Result<(), anyhow::Error> {
        let envelope = Envelope::new(self.name.as_str(), RequestKind::Add).with_media(self.kind);
        self.send(&envelope).await
    }

    /// Encode and send one envelope to the relay.
    pub async fn send(&self, envelope: &Envelope) -> Result<(), anyhow::Error> {
        let datagram = encode_envelope(envelope)
            .map_err(|e| anyhow::anyhow!("Failed to encode envelope: {}", e))?;
        self.send_raw(&datagram).await
    }

    /// Send raw bytes to the relay.
    pub async fn send_raw(&self, datagram: &[u8]) -> Result<(), anyhow::Error> {
        self.socket
            .send_to(datagram, self.relay)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to send datagram: {}", e))?;
        Ok(())
    }

    /// Receive the next datagram and its source.
    pub async fn recv_raw(&self) -> Result<(Vec<u8>, SocketAddr), anyhow::Error> {
        self.recv_raw_within(RECV_TIMEOUT)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Timed out after {:?} waiting for a datagram", RECV_TIMEOUT))
    }

    /// Receive and decode the next datagram.
    pub async fn recv(&self) -> Result<Envelope, anyhow::Error> {
        let (datagram, _) = self.recv_raw().await?;
        decode_envelope(&mut datagram.as_slice())
            .map_err(|e| anyhow::anyhow!("Failed to decode datagram: {}", e))
    }

    /// Receive one datagram if it arrives within `window`.
    pub async fn recv_raw_within(
        &self,
        window: std::time::Duration,
    ) -> Result<Option<(Vec<u8>, SocketAddr)>, anyhow::Error> {
        let mut buf = vec![0u8; RECV_BUF_LEN];
        match tokio::time::timeout(window, self.socket.recv_from(&mut buf)).await {
            Ok(Ok((len, from))) => {
                buf.truncate(len);
                Ok(Some((buf, from)))
            }
            Ok(Err(e)) => Err(anyhow::anyhow!("Media receive error: {}", e)),
            Err(_) => Ok(None),
        }
    }

    /// Assert nothing arrives within the quiet window.
    pub async fn expect_silence(&self) -> Result<(), anyhow::Error> {
        match self.recv_raw_within(QUIET_WINDOW).await? {
            None => Ok(()),
            Some((datagram, from)) => anyhow::bail!(
                "Unexpected {}-byte datagram from {}",
                datagram.len(),
                from
            ),
        }
    }

    /// Register, then poll with probe datagrams from `prober` until this
    /// client receives one, so the relay has provably recorded the address.
    ///
    /// Probes that arrive are consumed.
    pub async fn register_and_wait(&self, prober: &MediaClient) -> Result<(), anyhow::Error> {
        let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
        loop {
            self.register().await?;
            prober
                .send(&crate::fixtures::media_frame(&prober.name, self.kind, b"probe"))
                .await?;
            if self
                .recv_raw_within(std::time::Duration::from_millis(50))
                .await?
                .is_some()
            {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                anyhow::bail!("Relay never delivered to {}", self.name);
            }
        }
    }
}
