//! # Huddle Test Utilities
//!
//! Shared test utilities for the Huddle server.
//!
//! ## Modules
//!
//! - `server_harness` - Real server on ephemeral ports with an isolated data root
//! - `control_client` - Scripted control-channel client
//! - `media_client` - UDP media client
//! - `fixtures` - Envelope builders for common requests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use huddle_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> anyhow::Result<()> {
//!     let server = TestServer::spawn().await?;
//!     let mut alice = TestClient::join(server.control_addr(), "alice").await?;
//!     let mut bob = TestClient::join(server.control_addr(), "bob").await?;
//!
//!     alice.send(&fixtures::text("alice", "hello")).await?;
//!     assert_eq!(bob.recv_next_post().await?.payload.as_text(), Some("hello"));
//!     Ok(())
//! }
//! ```

pub mod control_client;
pub mod fixtures;
pub mod media_client;
pub mod server_harness;

pub use control_client::TestClient;
pub use media_client::MediaClient;
pub use server_harness::TestServer;

use std::time::Duration;

/// Default wait for anything a test expects to arrive.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Window in which nothing should arrive when asserting silence.
pub const QUIET_WINDOW: Duration = Duration::from_millis(200);
