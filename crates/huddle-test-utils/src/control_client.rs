//! Scripted control-channel client.
//!
//! Speaks the same length-prefixed framing as a real participant: a raw
//! UTF-8 handshake, then encoded envelopes in both directions.

use crate::{QUIET_WINDOW, RECV_TIMEOUT};
use bytes::{Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use huddle_protocol::framing::{control_codec, MAX_CONTROL_FRAME_LEN};
use huddle_protocol::{decode_envelope, encode_envelope, Envelope, RequestKind, HANDSHAKE_OK};
use std::net::SocketAddr;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

/// A participant connected to the control channel.
pub struct TestClient {
    name: String,
    reader: FramedRead<OwnedReadHalf, LengthDelimitedCodec>,
    writer: FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>,
}

impl TestClient {
    /// Open a control connection without sending the handshake.
    pub async fn connect(addr: SocketAddr) -> Result<Self, anyhow::Error> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to {}: {}", addr, e))?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            name: String::new(),
            reader: FramedRead::new(read_half, control_codec(MAX_CONTROL_FRAME_LEN)),
            writer: FramedWrite::new(write_half, control_codec(MAX_CONTROL_FRAME_LEN)),
        })
    }

    /// Connect and complete the handshake as `name`.
    ///
    /// Fails unless the server answers `OK`.
    pub async fn join(addr: SocketAddr, name: &str) -> Result<Self, anyhow::Error> {
        let mut client = Self::connect(addr).await?;
        let reply = client.handshake(name).await?;
        if reply != HANDSHAKE_OK {
            anyhow::bail!("Handshake as {} rejected: {}", name, reply);
        }
        Ok(client)
    }

    /// Send the name frame and return the server's raw reply.
    pub async fn handshake(&mut self, name: &str) -> Result<String, anyhow::Error> {
        self.send_raw(Bytes::copy_from_slice(name.as_bytes()))
            .await?;
        let reply = self.recv_raw().await?;
        let reply = String::from_utf8(reply.to_vec())
            .map_err(|e| anyhow::anyhow!("Handshake reply is not UTF-8: {}", e))?;
        if reply == HANDSHAKE_OK {
            self.name = name.to_string();
        }
        Ok(reply)
    }

    /// Name accepted by the server, empty before a successful handshake.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Encode and send one envelope.
    pub async fn send(&mut self, envelope: &Envelope) -> Result<(), anyhow::Error> {
        let frame = encode_envelope(envelope)
            .map_err(|e| anyhow::anyhow!("Failed to encode envelope: {}", e))?;
        self.send_raw(frame).await
    }

    /// Send one frame as-is.
    pub async fn send_raw(&mut self, frame: Bytes) -> Result<(), anyhow::Error> {
        self.writer
            .send(frame)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to send frame: {}", e))
    }

    /// Close the write half, as a client exiting without `DISCONNECT` would.
    pub async fn shutdown(&mut self) -> Result<(), anyhow::Error> {
        SinkExt::<Bytes>::close(&mut self.writer)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to close writer: {}", e))
    }

    /// Receive the next frame without decoding it.
    pub async fn recv_raw(&mut self) -> Result<BytesMut, anyhow::Error> {
        match tokio::time::timeout(RECV_TIMEOUT, self.reader.next()).await {
            Ok(Some(Ok(frame))) => Ok(frame),
            Ok(Some(Err(e))) => Err(anyhow::anyhow!("Read error: {}", e)),
            Ok(None) => Err(anyhow::anyhow!("Connection closed by server")),
            Err(_) => Err(anyhow::anyhow!(
                "Timed out after {:?} waiting for a frame",
                RECV_TIMEOUT
            )),
        }
    }

    /// Receive and decode the next envelope.
    pub async fn recv(&mut self) -> Result<Envelope, anyhow::Error> {
        let mut frame = self.recv_raw().await?;
        decode_envelope(&mut frame).map_err(|e| anyhow::anyhow!("Failed to decode envelope: {}", e))
    }

    /// Receive envelopes until one with `request` arrives, skipping others.
    pub async fn recv_request(&mut self, request: RequestKind) -> Result<Envelope, anyhow::Error> {
        loop {
            let envelope = self.recv().await?;
            if envelope.request == request {
                return Ok(envelope);
            }
        }
    }

    /// Receive envelopes until a `POST` arrives.
    pub async fn recv_next_post(&mut self) -> Result<Envelope, anyhow::Error> {
        self.recv_request(RequestKind::Post).await
    }

    /// Assert nothing arrives within the quiet window.
    pub async fn expect_silence(&mut self) -> Result<(), anyhow::Error> {
        match tokio::time::timeout(QUIET_WINDOW, self.reader.next()).await {
            Err(_) => Ok(()),
            Ok(Some(Ok(frame))) => {
                let mut copy = frame.clone();
                match decode_envelope(&mut copy) {
                    Ok(envelope) => anyhow::bail!("Unexpected envelope: {:?}", envelope),
                    Err(_) => anyhow::bail!("Unexpected frame: {:?}", frame),
                }
            }
            Ok(Some(Err(e))) => Err(anyhow::anyhow!("Read error: {}", e)),
            Ok(None) => Err(anyhow::anyhow!("Connection closed by server")),
        }
    }

    /// Assert the server closes the connection, skipping any frames first.
    pub async fn expect_closed(&mut self) -> Result<(), anyhow::Error> {
        let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
        loop {
            match tokio::time::timeout_at(deadline, self.reader.next()).await {
                Ok(None) | Ok(Some(Err(_))) => return Ok(()),
                Ok(Some(Ok(_))) => continue,
                Err(_) => anyhow::bail!("Connection still open after {:?}", RECV_TIMEOUT),
            }
        }
    }
}
