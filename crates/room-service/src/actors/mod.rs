//! Actor model implementation for the room service.
//!
//! ```text
//! RoomRegistryActor (singleton per process)
//! └── supervises N RoomActors
//!     └── RoomActor (one per active room)
//!         ├── owns the room's router and peer state
//!         └── broadcasts through each peer's ConnectionActor
//!             └── ConnectionActor (one per signaling WebSocket, writer half)
//! ```
//!
//! # Key Design Decisions
//!
//! - **Single writer**: room and registry state is only mutated inside their actor
//! - **CancellationToken propagation**: the registry hands child tokens to rooms
//! - **Mailbox monitoring**: depth thresholds with metrics (Room: 100/500, Connection: 50/200)
//! - **At-most-once broadcasts**: a full connection buffer drops events instead
//!   of blocking the room
//!
//! # Modules
//!
//! - [`registry`] - `RoomRegistryActor` singleton that creates and evicts rooms
//! - [`room`] - `RoomActor` per active room
//! - [`connection`] - `ConnectionActor` per signaling connection
//! - [`messages`] - Message types for actor communication
//! - [`metrics`] - Mailbox monitoring and actor metrics

pub mod connection;
pub mod messages;
pub mod metrics;
pub mod registry;
pub mod room;

// Re-export primary types
pub use connection::{ConnectionActor, ConnectionActorHandle};
pub use messages::*;
pub use metrics::{ActorMetrics, ActorType, MailboxMonitor};
pub use registry::{RegistrySettings, RoomRegistryActor, RoomRegistryHandle};
pub use room::{RoomActor, RoomActorHandle};
