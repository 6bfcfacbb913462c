//! Huddle Room Service Library
//!
//! Signaling and session orchestration for a multi-party SFU:
//!
//! - WebSocket signaling with request/response correlation and pushed events
//! - Room lifecycle: lazy creation, join/leave, grace-window eviction
//! - Per-peer transports, producers and consumers on a shared router
//! - A supervised pool of media workers behind a pluggable media engine
//!
//! # Architecture
//!
//! ```text
//! RoomRegistryActor (singleton)
//! └── RoomActor (one per active room, owns its router)
//!     └── ConnectionActor (one per WebSocket, writer half)
//! WorkerPool
//! └── supervisor task per media worker
//! ```
//!
//! # Modules
//!
//! - [`actors`] - Registry, room and connection actors
//! - [`signaling`] - WebSocket endpoint and request dispatch
//! - [`media`] - Media engine traits and the in-process engine
//! - [`workers`] - Worker pool with round-robin selection and respawn
//! - [`routes`] / [`handlers`] - HTTP surface
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types with client-safe messages
//! - [`observability`] - Metrics and health state

pub mod actors;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod media;
pub mod observability;
pub mod routes;
pub mod signaling;
pub mod workers;
