//! Codec capabilities, RTP parameters and DTLS parameters for tests.
//!
//! Payload types follow common browser defaults: opus 111, VP8 96.

use common::MediaKind;
use serde_json::{json, Map, Value};
use signaling_protocol::{
    DtlsFingerprint, DtlsParameters, DtlsRole, RtcpParameters, RtpCapabilities,
    RtpCodecCapability, RtpCodecParameters, RtpEncodingParameters, RtpParameters,
};

pub fn opus_capability() -> RtpCodecCapability {
    RtpCodecCapability {
        kind: MediaKind::Audio,
        mime_type: "audio/opus".to_string(),
        preferred_payload_type: Some(111),
        clock_rate: 48000,
        channels: Some(2),
        parameters: Map::new(),
    }
}

pub fn vp8_capability() -> RtpCodecCapability {
    RtpCodecCapability {
        kind: MediaKind::Video,
        mime_type: "video/VP8".to_string(),
        preferred_payload_type: Some(96),
        clock_rate: 90000,
        channels: None,
        parameters: Map::new(),
    }
}

/// A codec no router in these tests offers.
pub fn pcmu_capability() -> RtpCodecCapability {
    RtpCodecCapability {
        kind: MediaKind::Audio,
        mime_type: "audio/PCMU".to_string(),
        preferred_payload_type: Some(0),
        clock_rate: 8000,
        channels: Some(1),
        parameters: Map::new(),
    }
}

/// Opus and VP8, what a typical browser device offers.
pub fn device_capabilities() -> RtpCapabilities {
    RtpCapabilities {
        codecs: vec![opus_capability(), vp8_capability()],
        header_extensions: vec![],
    }
}

pub fn audio_only_capabilities() -> RtpCapabilities {
    RtpCapabilities {
        codecs: vec![opus_capability()],
        header_extensions: vec![],
    }
}

pub fn incompatible_capabilities() -> RtpCapabilities {
    RtpCapabilities {
        codecs: vec![pcmu_capability()],
        header_extensions: vec![],
    }
}

fn rtp_parameters(codec: RtpCodecCapability, ssrc: u32) -> RtpParameters {
    RtpParameters {
        mid: None,
        codecs: vec![RtpCodecParameters {
            mime_type: codec.mime_type,
            payload_type: codec.preferred_payload_type.unwrap_or(100),
            clock_rate: codec.clock_rate,
            channels: codec.channels,
            parameters: codec.parameters,
        }],
        encodings: vec![RtpEncodingParameters {
            ssrc: Some(ssrc),
            max_bitrate: None,
        }],
        rtcp: Some(RtcpParameters {
            cname: Some("test-cname".to_string()),
            reduced_size: true,
        }),
    }
}

pub fn opus_rtp_parameters() -> RtpParameters {
    rtp_parameters(opus_capability(), 1111)
}

pub fn vp8_rtp_parameters() -> RtpParameters {
    rtp_parameters(vp8_capability(), 2222)
}

/// Send parameters for `kind`.
pub fn rtp_parameters_for(kind: MediaKind) -> RtpParameters {
    match kind {
        MediaKind::Audio => opus_rtp_parameters(),
        MediaKind::Video => vp8_rtp_parameters(),
    }
}

/// Client DTLS parameters with a fixed fingerprint.
pub fn client_dtls_parameters() -> DtlsParameters {
    DtlsParameters {
        role: DtlsRole::Client,
        fingerprints: vec![DtlsFingerprint {
            algorithm: "sha-256".to_string(),
            value: "AB:CD:EF:01:23:45:67:89:AB:CD:EF:01:23:45:67:89:AB:CD:EF:01:23:45:67:89:AB:CD:EF:01:23:45:67:89"
                .to_string(),
        }],
    }
}

/// `data` of a `produce` request for `kind` on `transport_id`.
pub fn produce_data(transport_id: &str, kind: MediaKind) -> Value {
    json!({
        "transportId": transport_id,
        "kind": kind,
        "rtpParameters": rtp_parameters_for(kind),
        "appData": { "source": kind.to_string() },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameters_match_device_capabilities() {
        let caps = device_capabilities();
        for kind in [MediaKind::Audio, MediaKind::Video] {
            let params = rtp_parameters_for(kind);
            let codec = params.codecs.first().unwrap();
            assert_eq!(caps.find_match(codec).unwrap().kind, kind);
        }
        assert!(incompatible_capabilities()
            .find_match(opus_rtp_parameters().codecs.first().unwrap())
            .is_none());
    }
}
