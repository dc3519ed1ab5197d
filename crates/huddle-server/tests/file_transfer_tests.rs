//! File upload, listing, and download integration tests.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use huddle_protocol::{FileListing, FileMetadata, RequestKind, TransferId, SERVER_NAME};
use huddle_test_utils::{fixtures, TestClient, TestServer};
use std::time::Duration;

/// Join `names` in order, draining presence notices.
async fn join_all(
    server: &TestServer,
    names: &[&str],
) -> Result<Vec<TestClient>, anyhow::Error> {
    let mut clients: Vec<TestClient> = Vec::new();
    for name in names {
        let mut client = TestClient::join(server.control_addr(), name).await?;
        for _ in 0..clients.len() {
            client.recv_request(RequestKind::Add).await?;
        }
        for existing in &mut clients {
            existing.recv_request(RequestKind::Add).await?;
        }
        clients.push(client);
    }
    Ok(clients)
}

async fn upload(
    client: &mut TestClient,
    filename: &str,
    recipients: &[&str],
    chunks: &[Vec<u8>],
) -> Result<(), anyhow::Error> {
    let name = client.name().to_string();
    client
        .send(&fixtures::file_start(&name, filename, recipients))
        .await?;
    for chunk in chunks {
        client.send(&fixtures::file_chunk(&name, chunk)).await?;
    }
    client.send(&fixtures::file_end(&name)).await
}

async fn list(client: &mut TestClient) -> Result<Vec<FileListing>, anyhow::Error> {
    let name = client.name().to_string();
    client.send(&fixtures::get_files(&name)).await?;
    let reply = client.recv_request(RequestKind::FileList).await?;
    assert_eq!(reply.sender, SERVER_NAME);
    Ok(reply.payload.to_records()?)
}

/// Poll the listing until it holds `count` entries.
async fn wait_for_listing(
    client: &mut TestClient,
    count: usize,
) -> Result<Vec<FileListing>, anyhow::Error> {
    for _ in 0..100 {
        let listing = list(client).await?;
        if listing.len() >= count {
            return Ok(listing);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    anyhow::bail!("Listing never reached {} entries", count)
}

struct Download {
    metadata: FileMetadata,
    body: Vec<u8>,
    chunk_sizes: Vec<usize>,
    notices: Vec<String>,
}

async fn download(
    client: &mut TestClient,
    transfer_id: TransferId,
) -> Result<Download, anyhow::Error> {
    let name = client.name().to_string();
    client
        .send(&fixtures::download_request(&name, transfer_id))
        .await?;

    let first = client.recv().await?;
    assert_eq!(first.request, RequestKind::FileChunk);
    let metadata: FileMetadata = first.payload.to_record()?;

    let mut result = Download {
        metadata,
        body: Vec::new(),
        chunk_sizes: Vec::new(),
        notices: Vec::new(),
    };
    loop {
        let envelope = client.recv().await?;
        match envelope.request {
            RequestKind::FileChunk if envelope.payload.is_empty() => return Ok(result),
            RequestKind::FileChunk => {
                let chunk = envelope
                    .payload
                    .as_binary()
                    .ok_or_else(|| anyhow::anyhow!("chunk without binary payload"))?;
                result.chunk_sizes.push(chunk.len());
                result.body.extend_from_slice(chunk);
            }
            RequestKind::Post => {
                result
                    .notices
                    .push(envelope.payload.as_text().unwrap_or_default().to_string());
            }
            other => anyhow::bail!("Unexpected {:?} during download", other),
        }
    }
}

#[tokio::test]
async fn test_upload_list_and_download_round_trip() -> Result<(), anyhow::Error> {
    let server = TestServer::spawn().await?;
    let clients = join_all(&server, &["alice", "bob", "carol"]).await?;
    let [mut alice, mut bob, mut carol]: [TestClient; 3] =
        clients.try_into().ok().expect("three clients");

    let chunks: Vec<Vec<u8>> = (0..10u8).map(|i| vec![i; 1000]).collect();
    upload(&mut alice, "report.pdf", &["bob"], &chunks).await?;

    let listing = wait_for_listing(&mut bob, 1).await?;
    assert_eq!(listing.len(), 1);
    let entry = listing.first().unwrap();
    assert_eq!(entry.filename, "report.pdf");
    assert_eq!(entry.size, 10_000);
    assert_eq!(entry.from, "alice");

    // Only the addressed recipient sees it
    assert!(list(&mut carol).await?.is_empty());
    assert!(list(&mut alice).await?.is_empty());

    let received = download(&mut bob, entry.transfer_id).await?;
    assert_eq!(received.metadata.filename, "report.pdf");
    assert_eq!(received.metadata.size, 10_000);
    assert_eq!(received.metadata.from, "alice");
    assert_eq!(received.body, chunks.concat());
    assert_eq!(received.chunk_sizes.len(), 10);
    assert!(received.chunk_sizes.iter().take(9).all(|&len| len == 1024));
    assert_eq!(received.chunk_sizes.last(), Some(&784));
    assert!(received.notices.is_empty());

    let on_disk = tokio::fs::read(server.data_dir().join("bob").join("report.pdf")).await?;
    assert_eq!(on_disk.len(), 10_000);

    Ok(())
}

#[tokio::test]
async fn test_empty_upload_is_never_listed() -> Result<(), anyhow::Error> {
    let server = TestServer::spawn().await?;
    let clients = join_all(&server, &["alice", "bob"]).await?;
    let [mut alice, mut bob]: [TestClient; 2] = clients.try_into().ok().expect("two clients");

    upload(&mut alice, "empty.txt", &["bob"], &[]).await?;
    // Uploads from one sender are handled in order, so once this one is
    // listed the empty one has been finished too
    upload(&mut alice, "notes.txt", &["bob"], &[b"some notes".to_vec()]).await?;

    let listing = wait_for_listing(&mut bob, 1).await?;
    let names: Vec<&str> = listing.iter().map(|e| e.filename.as_str()).collect();
    assert_eq!(names, vec!["notes.txt"]);
    assert!(!server.data_dir().join("bob").join("empty.txt").exists());

    Ok(())
}

#[tokio::test]
async fn test_broadcast_upload_gives_each_recipient_a_copy() -> Result<(), anyhow::Error> {
    let server = TestServer::spawn().await?;
    let clients = join_all(&server, &["alice", "bob", "carol"]).await?;
    let [mut alice, mut bob, mut carol]: [TestClient; 3] =
        clients.try_into().ok().expect("three clients");

    upload(&mut alice, "slides.key", &[], &[vec![7u8; 2048]]).await?;

    for client in [&mut bob, &mut carol] {
        let listing = wait_for_listing(client, 1).await?;
        let entry = listing.first().unwrap();
        assert_eq!(entry.filename, "slides.key");
        assert_eq!(entry.size, 2048);

        let received = download(client, entry.transfer_id).await?;
        assert_eq!(received.body, vec![7u8; 2048]);
    }
    assert!(list(&mut alice).await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_repeated_filename_gets_a_suffix() -> Result<(), anyhow::Error> {
    let server = TestServer::spawn().await?;
    let clients = join_all(&server, &["alice", "bob"]).await?;
    let [mut alice, mut bob]: [TestClient; 2] = clients.try_into().ok().expect("two clients");

    upload(&mut alice, "photo.png", &["bob"], &[b"first".to_vec()]).await?;
    upload(&mut alice, "photo.png", &["bob"], &[b"second".to_vec()]).await?;

    let listing = wait_for_listing(&mut bob, 2).await?;
    let mut names: Vec<&str> = listing.iter().map(|e| e.filename.as_str()).collect();
    names.sort_unstable();
    assert_eq!(names, vec!["photo(1).png", "photo.png"]);

    Ok(())
}

#[tokio::test]
async fn test_unknown_transfer_id_gets_a_notice() -> Result<(), anyhow::Error> {
    let server = TestServer::spawn().await?;
    let clients = join_all(&server, &["alice", "bob"]).await?;
    let [mut alice, mut bob]: [TestClient; 2] = clients.try_into().ok().expect("two clients");

    bob.send(&fixtures::download_request("bob", TransferId::new()))
        .await?;

    let notice = bob.recv().await?;
    assert_eq!(notice.request, RequestKind::Post);
    assert_eq!(notice.sender, SERVER_NAME);
    assert_eq!(notice.payload.as_text(), Some("Requested file not found"));
    alice.expect_silence().await?;

    Ok(())
}

#[tokio::test]
async fn test_cannot_download_another_participants_file() -> Result<(), anyhow::Error> {
    let server = TestServer::spawn().await?;
    let clients = join_all(&server, &["alice", "bob", "carol"]).await?;
    let [mut alice, mut bob, mut carol]: [TestClient; 3] =
        clients.try_into().ok().expect("three clients");

    upload(&mut alice, "private.txt", &["bob"], &[b"for bob".to_vec()]).await?;
    let listing = wait_for_listing(&mut bob, 1).await?;
    let transfer_id = listing.first().unwrap().transfer_id;

    carol
        .send(&fixtures::download_request("carol", transfer_id))
        .await?;
    let notice = carol.recv().await?;
    assert_eq!(notice.payload.as_text(), Some("Requested file not found"));

    Ok(())
}

#[tokio::test]
async fn test_malformed_download_request_gets_a_notice() -> Result<(), anyhow::Error> {
    let server = TestServer::spawn().await?;
    let mut bob = TestClient::join(server.control_addr(), "bob").await?;

    let bad = huddle_protocol::Envelope::new("bob", RequestKind::DownloadFile)
        .with_media(huddle_protocol::MediaKind::File)
        .with_text("not a map");
    bob.send(&bad).await?;

    let notice = bob.recv().await?;
    assert_eq!(notice.sender, SERVER_NAME);
    assert_eq!(notice.payload.as_text(), Some("Invalid download request"));
    server.wait_for_participants(&["bob"]).await?;

    Ok(())
}

#[tokio::test]
async fn test_rejected_upload_does_not_corrupt_earlier_one() -> Result<(), anyhow::Error> {
    let server = TestServer::spawn().await?;
    let clients = join_all(&server, &["alice", "bob"]).await?;
    let [mut alice, mut bob]: [TestClient; 2] = clients.try_into().ok().expect("two clients");

    alice
        .send(&fixtures::file_start("alice", "a.txt", &["bob"]))
        .await?;
    alice.send(&fixtures::file_chunk("alice", b"GOOD")).await?;

    // A second upload with an unusable name, interleaved with the first
    upload(&mut alice, "..", &["bob"], &[b"BAD".to_vec()]).await?;
    alice.send(&fixtures::file_end("alice")).await?;

    let listing = wait_for_listing(&mut bob, 1).await?;
    assert_eq!(listing.len(), 1);
    let entry = listing.first().unwrap();
    assert_eq!(entry.filename, "a.txt");
    assert_eq!(entry.size, 4);

    let received = download(&mut bob, entry.transfer_id).await?;
    assert_eq!(received.body, b"GOOD");

    Ok(())
}
