//! Signaling over WebSocket.
//!
//! - [`ws`] - upgrade handler and per-socket read loop
//! - [`handler`] - request dispatch and the join/leave state machine

pub mod handler;
pub mod ws;

pub use handler::SignalingSession;
pub use ws::ws_handler;
