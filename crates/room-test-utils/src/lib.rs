//! # Room Test Utilities
//!
//! Shared test utilities for the Huddle room service and client.
//!
//! ## Modules
//!
//! - `server_harness` - Spawn a real room service on a random port
//! - `ws_client` - Raw protocol client for frame-level tests
//! - `mock_device` - Scripted `MediaDevice` recording every call
//! - `fixtures` - Codec capabilities and RTP parameters
//! - `assertions` - Polling helpers for eventually-consistent state
//!
//! ## Usage
//!
//! ```rust,ignore
//! use room_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> anyhow::Result<()> {
//!     let server = TestRoomServer::spawn().await?;
//!
//!     let device = Arc::new(MockDevice::new());
//!     let mut session = SessionController::new(device.clone());
//!     session
//!         .join(SessionConfig::new(server.ws_url(), "standup").with_display_name("Ada"))
//!         .await?;
//!
//!     assert_eq!(session.state(), SessionState::Live);
//!     Ok(())
//! }
//! ```

pub mod assertions;
pub mod fixtures;
pub mod mock_device;
pub mod server_harness;
pub mod ws_client;

pub use assertions::*;
pub use fixtures::*;
pub use mock_device::{DeviceCall, MockDevice};
pub use server_harness::TestRoomServer;
pub use ws_client::TestSocket;
