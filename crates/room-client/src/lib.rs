//! Huddle client library.
//!
//! Connects to a room service over WebSocket and walks a participant through
//! join, capability negotiation, producing local media, and consuming every
//! remote producer. Actual capture and rendering sit behind [`MediaDevice`].
//!
//! # Architecture
//!
//! ```text
//! SessionController
//!   ├── SignalingClient  (request/response correlation + event stream)
//!   ├── MediaDevice      (local tracks, transports, consumer sinks)
//!   └── RoomView         (remote peers, chat log, unread count)
//! ```
//!
//! Session state and the room view are published on `tokio::sync::watch`
//! channels so a UI can follow them without holding the controller.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod channel;
pub mod device;
pub mod errors;
pub mod session;
pub mod view;

pub use channel::{SignalingClient, DEFAULT_CONNECT_TIMEOUT};
pub use device::{LocalTrack, MediaDevice};
pub use errors::{ChannelError, DeviceError, SessionError};
pub use session::{SessionConfig, SessionController, SessionState};
pub use view::{RemotePeer, RemoteTrack, RoomView};
