//! Signaling protocol for Huddle.
//!
//! Every WebSocket text frame carries one JSON document. Clients send either a
//! request tagged with a correlation id or a fire-and-forget notification; the
//! server answers each request exactly once and pushes room events.
//!
//! ```text
//! client -> server  {"type":"request","id":7,"request":{"method":"produce","data":{...}}}
//!                   {"type":"notify","message":{"method":"chatMessage","data":{...}}}
//! server -> client  {"type":"response","id":7,"body":{"success":true,"producerId":"..."}}
//!                   {"type":"event","event":{"event":"newProducer","data":{...}}}
//! ```

#![warn(clippy::pedantic)]

pub mod codec;
pub mod messages;
pub mod rtp;
pub mod sanitize;

pub use codec::CodecError;
pub use messages::*;
pub use rtp::*;
