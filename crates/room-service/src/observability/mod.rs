//! Observability for the room service.
//!
//! All instrumentation uses `#[instrument(skip_all)]` with explicit fields.
//! Chat text, display names and SDP-like parameters are never logged.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `room_rooms_active` | Gauge | none |
//! | `room_peers_active` | Gauge | none |
//! | `room_connections_active` | Gauge | none |
//! | `room_workers_alive` | Gauge | none |
//! | `room_actor_mailbox_depth` | Gauge | `actor_type` |
//! | `room_signaling_requests_total` | Counter | `method`, `status` |
//! | `room_signaling_request_duration_seconds` | Histogram | `method` |
//! | `room_errors_total` | Counter | `error_type` |
//! | `room_events_dropped_total` | Counter | none |
//! | `room_worker_deaths_total` | Counter | none |
//! | `room_worker_respawn_failures_total` | Counter | none |
//! | `room_actor_panics_total` | Counter | `actor_type` |

pub mod health;
pub mod metrics;

pub use health::HealthState;
pub use metrics::{detached_metrics_handle, init_metrics_recorder};
