//! Presence and text relay integration tests.
//!
//! Exercises the handshake, `ADD` notices, and text routing over real TCP
//! connections using the `TestServer` harness.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use huddle_protocol::{RequestKind, HANDSHAKE_OK};
use huddle_server::errors::NAME_TAKEN_MESSAGE;
use huddle_test_utils::{fixtures, TestClient, TestServer};

/// Join `names` in order, draining every `ADD` each client is owed.
async fn join_all(
    server: &TestServer,
    names: &[&str],
) -> Result<Vec<TestClient>, anyhow::Error> {
    let mut clients: Vec<TestClient> = Vec::new();
    for name in names {
        let mut client = TestClient::join(server.control_addr(), name).await?;
        for _ in 0..clients.len() {
            assert_eq!(client.recv().await?.request, RequestKind::Add);
        }
        for existing in &mut clients {
            let add = existing.recv().await?;
            assert_eq!(add.request, RequestKind::Add);
            assert_eq!(add.sender, *name);
        }
        clients.push(client);
    }
    Ok(clients)
}

#[tokio::test]
async fn test_new_participant_learns_existing_ones() -> Result<(), anyhow::Error> {
    let server = TestServer::spawn().await?;

    let mut alice = TestClient::join(server.control_addr(), "alice").await?;
    let mut bob = TestClient::join(server.control_addr(), "bob").await?;

    // bob is told about alice, alice is told about bob
    let existing = bob.recv().await?;
    assert_eq!(existing.request, RequestKind::Add);
    assert_eq!(existing.sender, "alice");

    let joined = alice.recv().await?;
    assert_eq!(joined.request, RequestKind::Add);
    assert_eq!(joined.sender, "bob");

    server.wait_for_participants(&["alice", "bob"]).await?;
    alice.expect_silence().await?;
    bob.expect_silence().await?;

    Ok(())
}

#[tokio::test]
async fn test_duplicate_name_is_rejected_and_closed() -> Result<(), anyhow::Error> {
    let server = TestServer::spawn().await?;
    let mut alice = TestClient::join(server.control_addr(), "alice").await?;

    let mut imposter = TestClient::connect(server.control_addr()).await?;
    let reply = imposter.handshake("alice").await?;
    assert_eq!(reply, NAME_TAKEN_MESSAGE);
    imposter.expect_closed().await?;

    // The original session is untouched and nobody heard about the attempt
    server.wait_for_participants(&["alice"]).await?;
    alice.expect_silence().await?;

    Ok(())
}

#[tokio::test]
async fn test_concurrent_handshakes_for_one_name_admit_exactly_one() -> Result<(), anyhow::Error> {
    let server = TestServer::spawn().await?;
    let addr = server.control_addr();

    let attempts: Vec<_> = (0..8)
        .map(|_| {
            tokio::spawn(async move {
                let mut client = TestClient::connect(addr).await?;
                let reply = client.handshake("carol").await?;
                Ok::<_, anyhow::Error>((reply, client))
            })
        })
        .collect();

    let mut accepted = Vec::new();
    let mut rejected = 0;
    for attempt in attempts {
        let (reply, client) = attempt.await??;
        if reply == HANDSHAKE_OK {
            accepted.push(client);
        } else {
            assert_eq!(reply, NAME_TAKEN_MESSAGE);
            rejected += 1;
        }
    }

    assert_eq!(accepted.len(), 1);
    assert_eq!(rejected, 7);
    server.wait_for_participants(&["carol"]).await?;

    Ok(())
}

#[tokio::test]
async fn test_reserved_name_is_rejected() -> Result<(), anyhow::Error> {
    let server = TestServer::spawn().await?;

    let mut client = TestClient::connect(server.control_addr()).await?;
    let reply = client.handshake("SERVER").await?;
    assert!(reply.starts_with("Invalid username"), "got {reply}");
    client.expect_closed().await?;

    assert!(server.state().await?.participants.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_text_broadcast_reaches_everyone_else() -> Result<(), anyhow::Error> {
    let server = TestServer::spawn().await?;
    let mut clients = join_all(&server, &["alice", "bob", "carol"]).await?;

    let alice = clients.get_mut(0).unwrap();
    alice.send(&fixtures::text("alice", "hello all")).await?;
    alice.expect_silence().await?;

    for client in clients.iter_mut().skip(1) {
        let post = client.recv().await?;
        assert_eq!(post.request, RequestKind::Post);
        assert_eq!(post.sender, "alice");
        assert_eq!(post.payload.as_text(), Some("hello all"));
    }

    Ok(())
}

#[tokio::test]
async fn test_text_to_named_recipients_only() -> Result<(), anyhow::Error> {
    let server = TestServer::spawn().await?;
    let clients = join_all(&server, &["alice", "bob", "carol"]).await?;
    let [mut alice, mut bob, mut carol]: [TestClient; 3] =
        clients.try_into().ok().expect("three clients");

    alice
        .send(&fixtures::text_to("alice", "just you", &["carol", "nobody"]))
        .await?;

    let post = carol.recv().await?;
    assert_eq!(post.sender, "alice");
    assert_eq!(post.payload.as_text(), Some("just you"));
    assert_eq!(post.recipients, vec!["carol".to_string(), "nobody".to_string()]);

    bob.expect_silence().await?;
    alice.expect_silence().await?;

    Ok(())
}

#[tokio::test]
async fn test_sender_name_is_taken_from_the_session() -> Result<(), anyhow::Error> {
    let server = TestServer::spawn().await?;
    let clients = join_all(&server, &["alice", "bob"]).await?;
    let [mut alice, mut bob]: [TestClient; 2] = clients.try_into().ok().expect("two clients");

    alice.send(&fixtures::text("mallory", "trust me")).await?;

    let post = bob.recv().await?;
    assert_eq!(post.sender, "alice");
    assert_eq!(post.payload.as_text(), Some("trust me"));
    alice.expect_silence().await?;

    Ok(())
}

#[tokio::test]
async fn test_undecodable_frame_keeps_the_session_open() -> Result<(), anyhow::Error> {
    let server = TestServer::spawn().await?;
    let clients = join_all(&server, &["alice", "bob"]).await?;
    let [mut alice, mut bob]: [TestClient; 2] = clients.try_into().ok().expect("two clients");

    alice
        .send_raw(bytes::Bytes::from_static(b"\xffgarbage"))
        .await?;
    alice.send(&fixtures::text("alice", "still here")).await?;

    assert_eq!(bob.recv().await?.payload.as_text(), Some("still here"));
    server.wait_for_participants(&["alice", "bob"]).await?;

    Ok(())
}
