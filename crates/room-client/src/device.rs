//! Local media device abstraction.
//!
//! A device owns everything that lives on the client side of a session:
//! captured tracks, the local ends of the send and recv transports, and the
//! sinks attached to consumers. The session controller drives it through
//! this trait and never touches media itself.

use crate::errors::DeviceError;
use async_trait::async_trait;
use common::{ConsumerId, MediaKind, TransportDirection};
use serde_json::Value;
use signaling_protocol::{ConsumerInfo, DtlsParameters, RtpCapabilities, RtpParameters, TransportInfo};

/// A captured local track ready to be produced.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalTrack {
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    pub app_data: Value,
}

#[async_trait]
pub trait MediaDevice: Send + Sync {
    /// Load the router's capabilities and return what this device can
    /// receive. The caller intersects the two.
    async fn load(&self, router_capabilities: &RtpCapabilities)
        -> Result<RtpCapabilities, DeviceError>;

    /// Capture one local track.
    async fn acquire_track(&self, kind: MediaKind) -> Result<LocalTrack, DeviceError>;

    /// Build the local end of a server transport and return the DTLS
    /// parameters to send with `connectTransport`.
    async fn create_transport(
        &self,
        direction: TransportDirection,
        transport: &TransportInfo,
    ) -> Result<DtlsParameters, DeviceError>;

    /// Attach a rendering sink to a consumer before it is resumed.
    async fn attach_consumer(&self, consumer: &ConsumerInfo) -> Result<(), DeviceError>;

    fn close_consumer(&self, consumer_id: &ConsumerId);

    /// Pause or resume a local track.
    fn set_track_enabled(&self, kind: MediaKind, enabled: bool);

    /// Stop a local track for good.
    fn stop_track(&self, kind: MediaKind);

    /// Stop all tracks and close every local transport and consumer.
    fn close(&self);
}
