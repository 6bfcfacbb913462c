//! Scripted `MediaDevice` for client tests.
//!
//! Every call is recorded so tests can assert on what the session controller
//! asked of the device, in order.

use crate::fixtures::{client_dtls_parameters, device_capabilities, rtp_parameters_for};
use async_trait::async_trait;
use common::{ConsumerId, MediaKind, TransportDirection};
use room_client::{DeviceError, LocalTrack, MediaDevice};
use serde_json::json;
use signaling_protocol::{ConsumerInfo, DtlsParameters, RtpCapabilities, TransportInfo};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCall {
    Load,
    AcquireTrack(MediaKind),
    CreateTransport(TransportDirection),
    AttachConsumer(ConsumerId),
    CloseConsumer(ConsumerId),
    SetTrackEnabled(MediaKind, bool),
    StopTrack(MediaKind),
    Close,
}

#[derive(Default)]
struct MockState {
    calls: Vec<DeviceCall>,
    consumers: BTreeSet<ConsumerId>,
    enabled: HashMap<MediaKind, bool>,
    closed: bool,
}

/// Configurable fake device.
///
/// ```rust,ignore
/// let device = MockDevice::new().without_video();
/// ```
pub struct MockDevice {
    capabilities: RtpCapabilities,
    unavailable: BTreeSet<MediaKind>,
    fail_consumers: AtomicBool,
    state: Mutex<MockState>,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    /// Opus + VP8 device where everything succeeds.
    pub fn new() -> Self {
        Self {
            capabilities: device_capabilities(),
            unavailable: BTreeSet::new(),
            fail_consumers: AtomicBool::new(false),
            state: Mutex::new(MockState::default()),
        }
    }

    pub fn with_capabilities(mut self, capabilities: RtpCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Camera acquisition fails.
    pub fn without_video(mut self) -> Self {
        self.unavailable.insert(MediaKind::Video);
        self
    }

    /// Microphone acquisition fails.
    pub fn without_audio(mut self) -> Self {
        self.unavailable.insert(MediaKind::Audio);
        self
    }

    /// `attach_consumer` fails for every consumer.
    pub fn failing_consumers(mut self) -> Self {
        self.fail_consumers = AtomicBool::new(true);
        self
    }

    /// Switch consumer failures on or off mid-test.
    pub fn set_failing_consumers(&self, failing: bool) {
        self.fail_consumers.store(failing, Ordering::SeqCst);
    }

    fn record(&self, call: DeviceCall) {
        self.state.lock().unwrap().calls.push(call);
    }

    pub fn calls(&self) -> Vec<DeviceCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Consumers attached and not yet closed.
    pub fn open_consumers(&self) -> Vec<ConsumerId> {
        self.state
            .lock()
            .unwrap()
            .consumers
            .iter()
            .cloned()
            .collect()
    }

    /// Last enabled flag set for `kind`; tracks start enabled.
    pub fn track_enabled(&self, kind: MediaKind) -> bool {
        self.state
            .lock()
            .unwrap()
            .enabled
            .get(&kind)
            .copied()
            .unwrap_or(true)
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}

#[async_trait]
impl MediaDevice for MockDevice {
    async fn load(
        &self,
        _router_capabilities: &RtpCapabilities,
    ) -> Result<RtpCapabilities, DeviceError> {
        self.record(DeviceCall::Load);
        Ok(self.capabilities.clone())
    }

    async fn acquire_track(&self, kind: MediaKind) -> Result<LocalTrack, DeviceError> {
        self.record(DeviceCall::AcquireTrack(kind));
        if self.unavailable.contains(&kind) {
            return Err(DeviceError::Unavailable(kind));
        }
        Ok(LocalTrack {
            kind,
            rtp_parameters: rtp_parameters_for(kind),
            app_data: json!({ "source": kind.to_string() }),
        })
    }

    async fn create_transport(
        &self,
        direction: TransportDirection,
        transport: &TransportInfo,
    ) -> Result<DtlsParameters, DeviceError> {
        self.record(DeviceCall::CreateTransport(direction));
        if transport.dtls_parameters.fingerprints.is_empty() {
            return Err(DeviceError::Transport(
                "server sent no DTLS fingerprints".to_string(),
            ));
        }
        Ok(client_dtls_parameters())
    }

    async fn attach_consumer(&self, consumer: &ConsumerInfo) -> Result<(), DeviceError> {
        self.record(DeviceCall::AttachConsumer(consumer.id.clone()));
        if self.fail_consumers.load(Ordering::SeqCst) {
            return Err(DeviceError::Consumer("sink rejected".to_string()));
        }
        self.state
            .lock()
            .unwrap()
            .consumers
            .insert(consumer.id.clone());
        Ok(())
    }

    fn close_consumer(&self, consumer_id: &ConsumerId) {
        let mut state = self.state.lock().unwrap();
        state.calls.push(DeviceCall::CloseConsumer(consumer_id.clone()));
        state.consumers.remove(consumer_id);
    }

    fn set_track_enabled(&self, kind: MediaKind, enabled: bool) {
        let mut state = self.state.lock().unwrap();
        state.calls.push(DeviceCall::SetTrackEnabled(kind, enabled));
        state.enabled.insert(kind, enabled);
    }

    fn stop_track(&self, kind: MediaKind) {
        self.record(DeviceCall::StopTrack(kind));
    }

    fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.calls.push(DeviceCall::Close);
        state.consumers.clear();
        state.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unavailable_kind_fails_acquisition() {
        let device = MockDevice::new().without_video();
        assert_eq!(
            device.acquire_track(MediaKind::Video).await,
            Err(DeviceError::Unavailable(MediaKind::Video))
        );
        let audio = device.acquire_track(MediaKind::Audio).await.unwrap();
        assert_eq!(audio.kind, MediaKind::Audio);
        assert_eq!(
            device.calls(),
            vec![
                DeviceCall::AcquireTrack(MediaKind::Video),
                DeviceCall::AcquireTrack(MediaKind::Audio)
            ]
        );
    }

    #[test]
    fn test_close_drops_consumers() {
        let device = MockDevice::new();
        device
            .state
            .lock()
            .unwrap()
            .consumers
            .insert(ConsumerId::from("c1"));
        device.close();
        assert!(device.is_closed());
        assert!(device.open_consumers().is_empty());
    }
}
