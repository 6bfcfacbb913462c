//! In-process media engine.
//!
//! `LocalMediaEngine` performs the negotiation half of an SFU without moving
//! any packets: it assigns payload types, matches codecs between producers
//! and consumer capabilities, generates ICE credentials and DTLS fingerprints,
//! and tracks object lifetimes. Lifetimes are modelled with a
//! `CancellationToken` tree (worker -> router -> transport -> producer and
//! consumer), so closing or killing a parent closes every descendant.
//!
//! Fault injection (`kill_worker`, `fail_next_spawns`) lets tests exercise
//! worker supervision.

use super::{
    MediaConsumer, MediaEngine, MediaError, MediaProducer, MediaRouter, MediaTransport,
    MediaWorker, TransportOptions, WorkerSettings,
};
use async_trait::async_trait;
use common::{ConsumerId, MediaKind, ProducerId, TransportId};
use ring::digest;
use ring::rand::{SecureRandom, SystemRandom};
use serde_json::Value;
use signaling_protocol::{
    DtlsFingerprint, DtlsParameters, DtlsRole, IceCandidate, IceParameters, RtcpParameters,
    RtpCapabilities, RtpCodecCapability, RtpCodecParameters, RtpEncodingParameters,
    RtpHeaderExtension, RtpParameters, TransportInfo,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// First dynamic payload type handed out by a router.
const FIRST_DYNAMIC_PAYLOAD_TYPE: u8 = 100;

/// ICE priority advertised for the single host candidate.
const HOST_CANDIDATE_PRIORITY: u32 = 1_076_302_079;

/// In-process media engine.
#[derive(Clone, Default)]
pub struct LocalMediaEngine {
    shared: Arc<EngineShared>,
}

#[derive(Default)]
struct EngineShared {
    workers: Mutex<HashMap<String, Arc<LocalWorker>>>,
    fail_spawns: AtomicUsize,
    spawned: AtomicU64,
}

impl LocalMediaEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` calls to `spawn_worker` fail.
    pub fn fail_next_spawns(&self, count: usize) {
        self.shared.fail_spawns.store(count, Ordering::SeqCst);
    }

    /// Kill a worker as if its process had crashed.
    ///
    /// Returns false if no live worker has that id.
    pub async fn kill_worker(&self, worker_id: &str) -> bool {
        let removed = self.shared.workers.lock().await.remove(worker_id);
        match removed {
            Some(worker) if worker.is_alive() => {
                warn!(
                    target: "room.media.local",
                    worker_id = %worker_id,
                    "Killing media worker"
                );
                worker.token.cancel();
                true
            }
            _ => false,
        }
    }

    /// Ids of workers that are currently alive.
    pub async fn live_worker_ids(&self) -> Vec<String> {
        let mut workers = self.shared.workers.lock().await;
        workers.retain(|_, worker| worker.is_alive());
        let mut ids: Vec<String> = workers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Total number of successful spawns since creation.
    #[must_use]
    pub fn spawned_count(&self) -> u64 {
        self.shared.spawned.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaEngine for LocalMediaEngine {
    async fn spawn_worker(
        &self,
        settings: &WorkerSettings,
    ) -> Result<Arc<dyn MediaWorker>, MediaError> {
        let injected_failure = self
            .shared
            .fail_spawns
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected_failure {
            return Err(MediaError::WorkerSpawn("injected spawn failure".to_string()));
        }

        if settings.rtc_min_port > settings.rtc_max_port {
            return Err(MediaError::WorkerSpawn(format!(
                "invalid port range {}-{}",
                settings.rtc_min_port, settings.rtc_max_port
            )));
        }

        let seq = self.shared.spawned.fetch_add(1, Ordering::SeqCst) + 1;
        let worker = Arc::new(LocalWorker::new(format!("worker-{seq}"), *settings)?);

        self.shared
            .workers
            .lock()
            .await
            .insert(worker.id.clone(), Arc::clone(&worker));

        info!(
            target: "room.media.local",
            worker_id = %worker.id,
            rtc_min_port = settings.rtc_min_port,
            rtc_max_port = settings.rtc_max_port,
            "Media worker spawned"
        );

        Ok(worker)
    }
}

// ============================================================================
// Worker
// ============================================================================

struct LocalWorker {
    id: String,
    token: CancellationToken,
    ports: Arc<PortAllocator>,
    /// Fingerprint of the worker's DTLS certificate, shared by its transports.
    fingerprint: String,
}

impl LocalWorker {
    fn new(id: String, settings: WorkerSettings) -> Result<Self, MediaError> {
        let mut certificate = [0u8; 32];
        SystemRandom::new()
            .fill(&mut certificate)
            .map_err(|_| MediaError::Crypto("failed to generate certificate".to_string()))?;
        Ok(Self {
            id,
            token: CancellationToken::new(),
            ports: Arc::new(PortAllocator::new(settings.rtc_min_port, settings.rtc_max_port)),
            fingerprint: sha256_fingerprint(&certificate),
        })
    }
}

#[async_trait]
impl MediaWorker for LocalWorker {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_alive(&self) -> bool {
        !self.token.is_cancelled()
    }

    async fn died(&self) {
        self.token.cancelled().await;
    }

    async fn create_router(
        &self,
        codecs: &[RtpCodecCapability],
    ) -> Result<Arc<dyn MediaRouter>, MediaError> {
        if !self.is_alive() {
            return Err(MediaError::WorkerClosed);
        }

        let capabilities = router_capabilities(codecs)?;
        let router = LocalRouter {
            id: uuid::Uuid::new_v4().to_string(),
            worker_id: self.id.clone(),
            ports: Arc::clone(&self.ports),
            fingerprint: self.fingerprint.clone(),
            shared: Arc::new(RouterShared {
                capabilities,
                producers: Mutex::new(HashMap::new()),
                token: self.token.child_token(),
            }),
        };

        debug!(
            target: "room.media.local",
            worker_id = %self.id,
            router_id = %router.id,
            "Router created"
        );

        Ok(Arc::new(router))
    }

    fn close(&self) {
        self.token.cancel();
    }
}

/// Hands out candidate ports round-robin within the configured range.
struct PortAllocator {
    min: u16,
    span: u32,
    next: AtomicU32,
}

impl PortAllocator {
    fn new(min: u16, max: u16) -> Self {
        Self {
            min,
            span: u32::from(max) - u32::from(min) + 1,
            next: AtomicU32::new(0),
        }
    }

    fn next_port(&self) -> u16 {
        let offset = self.next.fetch_add(1, Ordering::Relaxed) % self.span;
        u16::try_from(u32::from(self.min) + offset).unwrap_or(self.min)
    }
}

/// Assign payload types and attach the header extensions the router supports.
fn router_capabilities(codecs: &[RtpCodecCapability]) -> Result<RtpCapabilities, MediaError> {
    let mut next_payload_type = FIRST_DYNAMIC_PAYLOAD_TYPE;
    let mut assigned = Vec::with_capacity(codecs.len());

    for codec in codecs {
        if !codec
            .mime_type
            .to_ascii_lowercase()
            .starts_with(codec.kind.mime_prefix())
        {
            return Err(MediaError::UnsupportedCodec(codec.mime_type.clone()));
        }
        let payload_type = match codec.preferred_payload_type {
            Some(pt) => pt,
            None => {
                let pt = next_payload_type;
                next_payload_type = next_payload_type
                    .checked_add(1)
                    .ok_or_else(|| MediaError::UnsupportedCodec("too many codecs".to_string()))?;
                pt
            }
        };
        assigned.push(RtpCodecCapability {
            preferred_payload_type: Some(payload_type),
            ..codec.clone()
        });
    }

    Ok(RtpCapabilities {
        codecs: assigned,
        header_extensions: vec![
            RtpHeaderExtension {
                kind: None,
                uri: "urn:ietf:params:rtp-hdrext:sdes:mid".to_string(),
                preferred_id: 1,
            },
            RtpHeaderExtension {
                kind: None,
                uri: "http://www.webrtc.org/experiments/rtp-hdrext/abs-send-time".to_string(),
                preferred_id: 4,
            },
            RtpHeaderExtension {
                kind: Some(MediaKind::Audio),
                uri: "urn:ietf:params:rtp-hdrext:ssrc-audio-level".to_string(),
                preferred_id: 10,
            },
        ],
    })
}

// ============================================================================
// Router
// ============================================================================

struct RouterShared {
    capabilities: RtpCapabilities,
    producers: Mutex<HashMap<ProducerId, Arc<LocalProducer>>>,
    token: CancellationToken,
}

impl RouterShared {
    async fn open_producer(&self, producer_id: &ProducerId) -> Option<Arc<LocalProducer>> {
        let mut producers = self.producers.lock().await;
        producers.retain(|_, producer| !producer.is_closed());
        producers.get(producer_id).cloned()
    }
}

struct LocalRouter {
    id: String,
    worker_id: String,
    ports: Arc<PortAllocator>,
    fingerprint: String,
    shared: Arc<RouterShared>,
}

#[async_trait]
impl MediaRouter for LocalRouter {
    fn id(&self) -> &str {
        &self.id
    }

    fn worker_id(&self) -> &str {
        &self.worker_id
    }

    fn rtp_capabilities(&self) -> RtpCapabilities {
        self.shared.capabilities.clone()
    }

    async fn can_consume(&self, producer_id: &ProducerId, capabilities: &RtpCapabilities) -> bool {
        if self.is_closed() {
            return false;
        }
        match self.shared.open_producer(producer_id).await {
            Some(producer) => producer
                .rtp_parameters
                .codecs
                .iter()
                .any(|codec| capabilities.find_match(codec).is_some()),
            None => false,
        }
    }

    async fn create_transport(
        &self,
        options: &TransportOptions,
    ) -> Result<Arc<dyn MediaTransport>, MediaError> {
        if self.is_closed() {
            return Err(MediaError::RouterClosed);
        }

        let id = TransportId::new();
        let info = TransportInfo {
            id: id.clone(),
            ice_parameters: IceParameters {
                username_fragment: random_hex(8)?,
                password: random_hex(16)?,
                ice_lite: true,
            },
            ice_candidates: vec![IceCandidate {
                foundation: "udpcandidate".to_string(),
                priority: HOST_CANDIDATE_PRIORITY,
                ip: options.announced_ip.clone(),
                port: self.ports.next_port(),
                protocol: "udp".to_string(),
                candidate_type: "host".to_string(),
            }],
            dtls_parameters: DtlsParameters {
                role: DtlsRole::Auto,
                fingerprints: vec![DtlsFingerprint {
                    algorithm: "sha-256".to_string(),
                    value: self.fingerprint.clone(),
                }],
            },
        };

        debug!(
            target: "room.media.local",
            router_id = %self.id,
            transport_id = %id,
            "Transport created"
        );

        Ok(Arc::new(LocalTransport {
            id,
            info,
            connected: AtomicBool::new(false),
            token: self.shared.token.child_token(),
            router: Arc::clone(&self.shared),
        }))
    }

    fn close(&self) {
        self.shared.token.cancel();
    }

    fn is_closed(&self) -> bool {
        self.shared.token.is_cancelled()
    }
}

// ============================================================================
// Transport
// ============================================================================

struct LocalTransport {
    id: TransportId,
    info: TransportInfo,
    connected: AtomicBool,
    token: CancellationToken,
    router: Arc<RouterShared>,
}

#[async_trait]
impl MediaTransport for LocalTransport {
    fn id(&self) -> &TransportId {
        &self.id
    }

    fn info(&self) -> TransportInfo {
        self.info.clone()
    }

    async fn connect(&self, remote: DtlsParameters) -> Result<(), MediaError> {
        if self.is_closed() {
            return Err(MediaError::TransportClosed);
        }
        if remote.fingerprints.is_empty() {
            return Err(MediaError::InvalidDtls("no fingerprints".to_string()));
        }
        if self.connected.swap(true, Ordering::SeqCst) {
            return Err(MediaError::AlreadyConnected);
        }
        debug!(
            target: "room.media.local",
            transport_id = %self.id,
            remote_role = ?remote.role,
            "Transport connected"
        );
        Ok(())
    }

    async fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        app_data: Value,
    ) -> Result<Arc<dyn MediaProducer>, MediaError> {
        if self.is_closed() {
            return Err(MediaError::TransportClosed);
        }

        let prefix = kind.mime_prefix();
        if let Some(codec) = rtp_parameters
            .codecs
            .iter()
            .find(|codec| !codec.mime_type.to_ascii_lowercase().starts_with(prefix))
        {
            return Err(MediaError::UnsupportedCodec(codec.mime_type.clone()));
        }
        let supported = rtp_parameters
            .codecs
            .iter()
            .any(|codec| self.router.capabilities.find_match(codec).is_some());
        if !supported {
            return Err(MediaError::UnsupportedCodec(format!(
                "no {kind} codec supported by router"
            )));
        }

        let producer = Arc::new(LocalProducer {
            id: ProducerId::new(),
            kind,
            rtp_parameters,
            app_data,
            token: self.token.child_token(),
        });
        self.router
            .producers
            .lock()
            .await
            .insert(producer.id.clone(), Arc::clone(&producer));

        debug!(
            target: "room.media.local",
            transport_id = %self.id,
            producer_id = %producer.id,
            kind = %kind,
            "Producer created"
        );

        Ok(producer)
    }

    async fn consume(
        &self,
        producer_id: &ProducerId,
        capabilities: &RtpCapabilities,
        paused: bool,
    ) -> Result<Arc<dyn MediaConsumer>, MediaError> {
        if self.is_closed() {
            return Err(MediaError::TransportClosed);
        }
        let producer = self
            .router
            .open_producer(producer_id)
            .await
            .ok_or(MediaError::ProducerNotFound)?;

        let codecs: Vec<RtpCodecParameters> = producer
            .rtp_parameters
            .codecs
            .iter()
            .filter_map(|codec| {
                capabilities.find_match(codec).map(|cap| RtpCodecParameters {
                    payload_type: cap.preferred_payload_type.unwrap_or(codec.payload_type),
                    ..codec.clone()
                })
            })
            .collect();
        if codecs.is_empty() {
            return Err(MediaError::Incompatible);
        }

        let consumer_id = ConsumerId::new();
        let ssrc = random_u32()?;
        let rtp_parameters = RtpParameters {
            mid: Some(consumer_id.to_string()),
            codecs,
            encodings: vec![RtpEncodingParameters {
                ssrc: Some(ssrc),
                max_bitrate: None,
            }],
            rtcp: Some(RtcpParameters {
                cname: Some(producer.id.to_string()),
                reduced_size: true,
            }),
        };

        debug!(
            target: "room.media.local",
            transport_id = %self.id,
            producer_id = %producer.id,
            consumer_id = %consumer_id,
            paused,
            "Consumer created"
        );

        Ok(Arc::new(LocalConsumer {
            id: consumer_id,
            producer_id: producer.id.clone(),
            kind: producer.kind,
            rtp_parameters,
            paused: AtomicBool::new(paused),
            token: self.token.child_token(),
            producer_token: producer.token.clone(),
        }))
    }

    fn close(&self) {
        self.token.cancel();
    }

    fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }
}

// ============================================================================
// Producer / Consumer
// ============================================================================

struct LocalProducer {
    id: ProducerId,
    kind: MediaKind,
    rtp_parameters: RtpParameters,
    app_data: Value,
    token: CancellationToken,
}

impl MediaProducer for LocalProducer {
    fn id(&self) -> &ProducerId {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn app_data(&self) -> &Value {
        &self.app_data
    }

    fn close(&self) {
        self.token.cancel();
    }

    fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }
}

struct LocalConsumer {
    id: ConsumerId,
    producer_id: ProducerId,
    kind: MediaKind,
    rtp_parameters: RtpParameters,
    paused: AtomicBool,
    token: CancellationToken,
    /// A consumer dies with its producer.
    producer_token: CancellationToken,
}

#[async_trait]
impl MediaConsumer for LocalConsumer {
    fn id(&self) -> &ConsumerId {
        &self.id
    }

    fn producer_id(&self) -> &ProducerId {
        &self.producer_id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn rtp_parameters(&self) -> &RtpParameters {
        &self.rtp_parameters
    }

    async fn resume(&self) -> Result<(), MediaError> {
        if self.is_closed() {
            return Err(MediaError::ConsumerClosed);
        }
        self.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.token.cancel();
    }

    fn is_closed(&self) -> bool {
        self.token.is_cancelled() || self.producer_token.is_cancelled()
    }
}

// ============================================================================
// Crypto helpers
// ============================================================================

fn random_bytes<const N: usize>() -> Result<[u8; N], MediaError> {
    let mut bytes = [0u8; N];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| MediaError::Crypto("system random unavailable".to_string()))?;
    Ok(bytes)
}

fn random_hex(len_bytes: usize) -> Result<String, MediaError> {
    let bytes = random_bytes::<32>()?;
    let slice = bytes.get(..len_bytes).unwrap_or(&bytes);
    Ok(hex::encode(slice))
}

fn random_u32() -> Result<u32, MediaError> {
    Ok(u32::from_be_bytes(random_bytes::<4>()?))
}

/// Colon-separated uppercase SHA-256 digest, as carried in SDP fingerprints.
fn sha256_fingerprint(certificate: &[u8]) -> String {
    let digest = digest::digest(&digest::SHA256, certificate);
    digest
        .as_ref()
        .iter()
        .map(|byte| hex::encode_upper([*byte]))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::media::default_media_codecs;
    use serde_json::{json, Map};

    fn settings() -> WorkerSettings {
        WorkerSettings {
            rtc_min_port: 40000,
            rtc_max_port: 40001,
        }
    }

    fn options() -> TransportOptions {
        TransportOptions {
            announced_ip: "127.0.0.1".to_string(),
        }
    }

    fn vp8_parameters() -> RtpParameters {
        RtpParameters {
            mid: Some("0".to_string()),
            codecs: vec![RtpCodecParameters {
                mime_type: "video/VP8".to_string(),
                payload_type: 96,
                clock_rate: 90000,
                channels: None,
                parameters: Map::new(),
            }],
            encodings: vec![],
            rtcp: None,
        }
    }

    fn remote_dtls() -> DtlsParameters {
        DtlsParameters {
            role: DtlsRole::Client,
            fingerprints: vec![DtlsFingerprint {
                algorithm: "sha-256".to_string(),
                value: "AA:BB".to_string(),
            }],
        }
    }

    async fn router() -> (LocalMediaEngine, Arc<dyn MediaWorker>, Arc<dyn MediaRouter>) {
        let engine = LocalMediaEngine::new();
        let worker = engine.spawn_worker(&settings()).await.unwrap();
        let router = worker.create_router(&default_media_codecs()).await.unwrap();
        (engine, worker, router)
    }

    #[tokio::test]
    async fn test_router_assigns_payload_types() {
        let (_engine, _worker, router) = router().await;
        let caps = router.rtp_capabilities();
        let pts: Vec<u8> = caps
            .codecs
            .iter()
            .map(|c| c.preferred_payload_type.unwrap())
            .collect();
        assert_eq!(pts, vec![100, 101, 102]);
    }

    #[tokio::test]
    async fn test_transport_info_shape() {
        let (_engine, _worker, router) = router().await;
        let first = router.create_transport(&options()).await.unwrap().info();
        let second = router.create_transport(&options()).await.unwrap().info();
        let third = router.create_transport(&options()).await.unwrap().info();

        assert_eq!(first.ice_parameters.username_fragment.len(), 16);
        assert_eq!(first.ice_parameters.password.len(), 32);
        assert_ne!(
            first.ice_parameters.username_fragment,
            second.ice_parameters.username_fragment
        );

        // Ports wrap around the two-port range.
        assert_eq!(first.ice_candidates[0].port, 40000);
        assert_eq!(second.ice_candidates[0].port, 40001);
        assert_eq!(third.ice_candidates[0].port, 40000);

        let fingerprint = &first.dtls_parameters.fingerprints[0];
        assert_eq!(fingerprint.algorithm, "sha-256");
        assert_eq!(fingerprint.value.split(':').count(), 32);
    }

    #[tokio::test]
    async fn test_connect_twice_fails() {
        let (_engine, _worker, router) = router().await;
        let transport = router.create_transport(&options()).await.unwrap();
        transport.connect(remote_dtls()).await.unwrap();
        assert_eq!(
            transport.connect(remote_dtls()).await.unwrap_err(),
            MediaError::AlreadyConnected
        );
    }

    #[tokio::test]
    async fn test_connect_requires_fingerprint() {
        let (_engine, _worker, router) = router().await;
        let transport = router.create_transport(&options()).await.unwrap();
        let err = transport
            .connect(DtlsParameters {
                role: DtlsRole::Auto,
                fingerprints: vec![],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::InvalidDtls(_)));
    }

    #[tokio::test]
    async fn test_produce_rejects_codec_of_wrong_kind() {
        let (_engine, _worker, router) = router().await;
        let transport = router.create_transport(&options()).await.unwrap();
        let err = transport
            .produce(MediaKind::Audio, vp8_parameters(), Value::Null)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, MediaError::UnsupportedCodec(_)));
    }

    #[tokio::test]
    async fn test_consume_negotiates_against_capabilities() {
        let (_engine, _worker, router) = router().await;
        let send = router.create_transport(&options()).await.unwrap();
        let recv = router.create_transport(&options()).await.unwrap();
        let producer = send
            .produce(MediaKind::Video, vp8_parameters(), json!({"source": "camera"}))
            .await
            .unwrap();
        assert_eq!(producer.app_data()["source"], "camera");

        let caps = router.rtp_capabilities();
        assert!(router.can_consume(producer.id(), &caps).await);

        let consumer = recv.consume(producer.id(), &caps, true).await.unwrap();
        assert!(consumer.is_paused());
        assert_eq!(consumer.kind(), MediaKind::Video);
        // Payload type comes from the receiver's capabilities.
        assert_eq!(consumer.rtp_parameters().codecs[0].payload_type, 101);
        assert!(consumer.rtp_parameters().encodings[0].ssrc.is_some());

        consumer.resume().await.unwrap();
        assert!(!consumer.is_paused());
    }

    #[tokio::test]
    async fn test_audio_only_capabilities_cannot_consume_video() {
        let (_engine, _worker, router) = router().await;
        let send = router.create_transport(&options()).await.unwrap();
        let recv = router.create_transport(&options()).await.unwrap();
        let producer = send
            .produce(MediaKind::Video, vp8_parameters(), Value::Null)
            .await
            .unwrap();

        let mut audio_only = router.rtp_capabilities();
        audio_only.codecs.retain(|c| c.kind == MediaKind::Audio);

        assert!(!router.can_consume(producer.id(), &audio_only).await);
        assert_eq!(
            recv.consume(producer.id(), &audio_only, true)
                .await
                .err()
                .unwrap(),
            MediaError::Incompatible
        );
    }

    #[tokio::test]
    async fn test_closing_producer_closes_consumers() {
        let (_engine, _worker, router) = router().await;
        let send = router.create_transport(&options()).await.unwrap();
        let recv = router.create_transport(&options()).await.unwrap();
        let producer = send
            .produce(MediaKind::Video, vp8_parameters(), Value::Null)
            .await
            .unwrap();
        let consumer = recv
            .consume(producer.id(), &router.rtp_capabilities(), true)
            .await
            .unwrap();

        producer.close();
        assert!(consumer.is_closed());
        assert_eq!(consumer.resume().await.unwrap_err(), MediaError::ConsumerClosed);
        assert!(!router.can_consume(producer.id(), &router.rtp_capabilities()).await);
    }

    #[tokio::test]
    async fn test_killing_worker_cascades() {
        let (engine, worker, router) = router().await;
        let transport = router.create_transport(&options()).await.unwrap();

        assert!(engine.kill_worker(worker.id()).await);
        worker.died().await;

        assert!(!worker.is_alive());
        assert!(router.is_closed());
        assert!(transport.is_closed());
        assert!(engine.live_worker_ids().await.is_empty());
        assert!(!engine.kill_worker(worker.id()).await);
        assert_eq!(
            router.create_transport(&options()).await.err().unwrap(),
            MediaError::RouterClosed
        );
    }

    #[tokio::test]
    async fn test_fail_next_spawns() {
        let engine = LocalMediaEngine::new();
        engine.fail_next_spawns(2);

        assert!(engine.spawn_worker(&settings()).await.is_err());
        assert!(engine.spawn_worker(&settings()).await.is_err());
        assert!(engine.spawn_worker(&settings()).await.is_ok());
        assert_eq!(engine.spawned_count(), 1);
    }
}
