//! Video and audio relay integration tests over real UDP sockets.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use huddle_protocol::{encode_envelope, MediaKind, RequestKind};
use huddle_test_utils::{fixtures, MediaClient, TestClient, TestServer};
use std::collections::HashMap;

async fn alice_and_bob(server: &TestServer) -> Result<(TestClient, TestClient), anyhow::Error> {
    let mut alice = TestClient::join(server.control_addr(), "alice").await?;
    let mut bob = TestClient::join(server.control_addr(), "bob").await?;
    bob.recv_request(RequestKind::Add).await?;
    alice.recv_request(RequestKind::Add).await?;
    Ok((alice, bob))
}

#[tokio::test]
async fn test_video_is_relayed_verbatim_to_registered_peers() -> Result<(), anyhow::Error> {
    let server = TestServer::spawn().await?;
    let (_alice, _bob) = alice_and_bob(&server).await?;

    let alice_video = MediaClient::bind("alice", MediaKind::Video, server.video_addr()).await?;
    let bob_video = MediaClient::bind("bob", MediaKind::Video, server.video_addr()).await?;
    alice_video.register().await?;
    bob_video.register_and_wait(&alice_video).await?;

    let frame = fixtures::video_frame("alice", &[0xAB; 4000]);
    alice_video.send(&frame).await?;

    let (datagram, from) = bob_video.recv_raw().await?;
    assert_eq!(from, server.video_addr());
    assert_eq!(datagram, encode_envelope(&frame)?.to_vec());

    // The sender never hears its own frames
    alice_video.expect_silence().await?;

    let state = server.state().await?;
    let bob_state = state.participant("bob").unwrap();
    assert_eq!(
        bob_state.media.get(MediaKind::Video),
        Some(bob_video.local_addr()?)
    );
    assert_eq!(bob_state.media.get(MediaKind::Audio), None);

    Ok(())
}

#[tokio::test]
async fn test_audio_and_video_are_independent() -> Result<(), anyhow::Error> {
    let server = TestServer::spawn().await?;
    let (_alice, _bob) = alice_and_bob(&server).await?;

    let alice_audio = MediaClient::bind("alice", MediaKind::Audio, server.audio_addr()).await?;
    let bob_audio = MediaClient::bind("bob", MediaKind::Audio, server.audio_addr()).await?;
    let bob_video = MediaClient::bind("bob", MediaKind::Video, server.video_addr()).await?;
    bob_audio.register_and_wait(&alice_audio).await?;

    alice_audio
        .send(&fixtures::audio_frame("alice", b"pcm-samples"))
        .await?;

    let envelope = bob_audio.recv().await?;
    assert_eq!(envelope.sender, "alice");
    assert_eq!(envelope.media_kind, Some(MediaKind::Audio));
    assert_eq!(
        envelope.payload.as_binary().map(|b| b.as_ref()),
        Some(&b"pcm-samples"[..])
    );

    // bob never registered video, so nothing arrives there
    bob_video.expect_silence().await?;

    Ok(())
}

#[tokio::test]
async fn test_oversized_datagram_is_dropped() -> Result<(), anyhow::Error> {
    let server = TestServer::spawn_with(HashMap::from([(
        "HUDDLE_VIDEO_MAX_DATAGRAM_BYTES".to_string(),
        "1024".to_string(),
    )]))
    .await?;
    let (_alice, _bob) = alice_and_bob(&server).await?;

    let alice_video = MediaClient::bind("alice", MediaKind::Video, server.video_addr()).await?;
    let bob_video = MediaClient::bind("bob", MediaKind::Video, server.video_addr()).await?;
    bob_video.register_and_wait(&alice_video).await?;

    alice_video
        .send(&fixtures::video_frame("alice", &[1u8; 2000]))
        .await?;
    bob_video.expect_silence().await?;

    let small = fixtures::video_frame("alice", &[2u8; 100]);
    alice_video.send(&small).await?;
    assert_eq!(bob_video.recv().await?, small);

    Ok(())
}

#[tokio::test]
async fn test_undecodable_datagram_is_dropped() -> Result<(), anyhow::Error> {
    let server = TestServer::spawn().await?;
    let (_alice, _bob) = alice_and_bob(&server).await?;

    let alice_video = MediaClient::bind("alice", MediaKind::Video, server.video_addr()).await?;
    let bob_video = MediaClient::bind("bob", MediaKind::Video, server.video_addr()).await?;
    bob_video.register_and_wait(&alice_video).await?;

    alice_video.send_raw(b"\xff\x00not an envelope").await?;
    bob_video.expect_silence().await?;

    // The relay keeps running
    let frame = fixtures::video_frame("alice", b"after");
    alice_video.send(&frame).await?;
    assert_eq!(bob_video.recv().await?, frame);

    Ok(())
}

#[tokio::test]
async fn test_registration_from_unknown_name_is_ignored() -> Result<(), anyhow::Error> {
    let server = TestServer::spawn().await?;
    let (_alice, _bob) = alice_and_bob(&server).await?;

    let alice_video = MediaClient::bind("alice", MediaKind::Video, server.video_addr()).await?;
    let mallory_video = MediaClient::bind("mallory", MediaKind::Video, server.video_addr()).await?;
    mallory_video.register().await?;

    // mallory's ADD reaches the relay socket before any of bob's
    let bob_video = MediaClient::bind("bob", MediaKind::Video, server.video_addr()).await?;
    bob_video.register_and_wait(&alice_video).await?;

    alice_video
        .send(&fixtures::video_frame("alice", b"frame"))
        .await?;
    bob_video.recv().await?;
    mallory_video.expect_silence().await?;

    let state = server.state().await?;
    assert!(state.participant("mallory").is_none());

    Ok(())
}

#[tokio::test]
async fn test_media_posted_on_control_channel_goes_out_over_udp() -> Result<(), anyhow::Error> {
    let server = TestServer::spawn().await?;
    let (mut alice, mut bob) = alice_and_bob(&server).await?;

    let alice_video = MediaClient::bind("alice", MediaKind::Video, server.video_addr()).await?;
    let bob_video = MediaClient::bind("bob", MediaKind::Video, server.video_addr()).await?;
    bob_video.register_and_wait(&alice_video).await?;

    alice
        .send(&fixtures::video_frame("alice", b"via-control"))
        .await?;

    let datagram = bob_video.recv().await?;
    assert_eq!(datagram.sender, "alice");
    assert_eq!(
        datagram.payload.as_binary().map(|b| b.as_ref()),
        Some(&b"via-control"[..])
    );
    bob.expect_silence().await?;

    Ok(())
}

#[tokio::test]
async fn test_disconnect_clears_media_endpoints() -> Result<(), anyhow::Error> {
    let server = TestServer::spawn().await?;
    let (mut alice, mut bob) = alice_and_bob(&server).await?;

    let alice_video = MediaClient::bind("alice", MediaKind::Video, server.video_addr()).await?;
    let bob_video = MediaClient::bind("bob", MediaKind::Video, server.video_addr()).await?;
    bob_video.register_and_wait(&alice_video).await?;

    bob.send(&fixtures::disconnect("bob")).await?;
    alice.recv_request(RequestKind::Remove).await?;
    server.wait_for_participants(&["alice"]).await?;

    alice_video
        .send(&fixtures::video_frame("alice", b"anyone?"))
        .await?;
    bob_video.expect_silence().await?;

    Ok(())
}
