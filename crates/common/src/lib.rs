//! Common utilities and types shared across Huddle components.

#![warn(clippy::pedantic)]

/// Module for common data types
pub mod types;

pub use types::{ConsumerId, MediaKind, PeerId, ProducerId, RoomId, TransportDirection, TransportId};
