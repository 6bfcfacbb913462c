//! RTP, ICE and DTLS parameter types exchanged during negotiation.
//!
//! Field names follow the camelCase shape used by WebRTC SFU clients so that a
//! browser device can consume them without translation.

use common::MediaKind;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A codec the router or a device is able to handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCodecCapability {
    pub kind: MediaKind,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_payload_type: Option<u8>,
    pub clock_rate: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u8>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub parameters: Map<String, Value>,
}

impl RtpCodecCapability {
    /// Returns true if an encoded stream described by `codec` can be decoded
    /// with this capability. Matching is on MIME type (case-insensitive),
    /// clock rate and channel count.
    #[must_use]
    pub fn accepts(&self, codec: &RtpCodecParameters) -> bool {
        self.mime_type.eq_ignore_ascii_case(&codec.mime_type)
            && self.clock_rate == codec.clock_rate
            && self.channels.unwrap_or(1) == codec.channels.unwrap_or(1)
    }

    /// Returns true if both capabilities describe the same codec.
    #[must_use]
    pub fn same_codec(&self, other: &RtpCodecCapability) -> bool {
        self.kind == other.kind
            && self.mime_type.eq_ignore_ascii_case(&other.mime_type)
            && self.clock_rate == other.clock_rate
            && self.channels.unwrap_or(1) == other.channels.unwrap_or(1)
    }
}

/// Header extension supported by an endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpHeaderExtension {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<MediaKind>,
    pub uri: String,
    pub preferred_id: u16,
}

/// Full capability set of a router or a device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCapabilities {
    #[serde(default)]
    pub codecs: Vec<RtpCodecCapability>,
    #[serde(default)]
    pub header_extensions: Vec<RtpHeaderExtension>,
}

impl RtpCapabilities {
    /// Returns the capability able to decode `codec`, if any.
    #[must_use]
    pub fn find_match(&self, codec: &RtpCodecParameters) -> Option<&RtpCodecCapability> {
        self.codecs.iter().find(|cap| cap.accepts(codec))
    }

    /// Codecs present in both sets, keeping the payload types of `self`.
    #[must_use]
    pub fn intersect(&self, other: &RtpCapabilities) -> RtpCapabilities {
        let codecs = self
            .codecs
            .iter()
            .filter(|cap| other.codecs.iter().any(|theirs| cap.same_codec(theirs)))
            .cloned()
            .collect();
        let header_extensions = self
            .header_extensions
            .iter()
            .filter(|ext| other.header_extensions.iter().any(|theirs| theirs.uri == ext.uri))
            .cloned()
            .collect();
        RtpCapabilities {
            codecs,
            header_extensions,
        }
    }
}

/// One negotiated codec of a concrete RTP stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCodecParameters {
    pub mime_type: String,
    pub payload_type: u8,
    pub clock_rate: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u8>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub parameters: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpEncodingParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssrc: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_bitrate: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtcpParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cname: Option<String>,
    #[serde(default = "default_true")]
    pub reduced_size: bool,
}

fn default_true() -> bool {
    true
}

/// Parameters of a concrete RTP stream (sent by a producer or delivered to a consumer).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mid: Option<String>,
    pub codecs: Vec<RtpCodecParameters>,
    #[serde(default)]
    pub encodings: Vec<RtpEncodingParameters>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtcp: Option<RtcpParameters>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceParameters {
    pub username_fragment: String,
    pub password: String,
    #[serde(default)]
    pub ice_lite: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub foundation: String,
    pub priority: u32,
    pub ip: String,
    pub port: u16,
    pub protocol: String,
    #[serde(rename = "type")]
    pub candidate_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DtlsRole {
    #[default]
    Auto,
    Client,
    Server,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtlsFingerprint {
    pub algorithm: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DtlsParameters {
    #[serde(default)]
    pub role: DtlsRole,
    pub fingerprints: Vec<DtlsFingerprint>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn opus() -> RtpCodecCapability {
        RtpCodecCapability {
            kind: MediaKind::Audio,
            mime_type: "audio/opus".to_string(),
            preferred_payload_type: Some(100),
            clock_rate: 48000,
            channels: Some(2),
            parameters: Map::new(),
        }
    }

    fn vp8() -> RtpCodecCapability {
        RtpCodecCapability {
            kind: MediaKind::Video,
            mime_type: "video/VP8".to_string(),
            preferred_payload_type: Some(101),
            clock_rate: 90000,
            channels: None,
            parameters: Map::new(),
        }
    }

    fn vp8_stream() -> RtpCodecParameters {
        RtpCodecParameters {
            mime_type: "video/vp8".to_string(),
            payload_type: 96,
            clock_rate: 90000,
            channels: None,
            parameters: Map::new(),
        }
    }

    #[test]
    fn test_accepts_is_case_insensitive_on_mime() {
        assert!(vp8().accepts(&vp8_stream()));
        assert!(!opus().accepts(&vp8_stream()));
    }

    #[test]
    fn test_accepts_checks_channels() {
        let mono = RtpCodecParameters {
            mime_type: "audio/opus".to_string(),
            payload_type: 111,
            clock_rate: 48000,
            channels: Some(1),
            parameters: Map::new(),
        };
        assert!(!opus().accepts(&mono));
    }

    #[test]
    fn test_intersect_keeps_common_codecs() {
        let router = RtpCapabilities {
            codecs: vec![opus(), vp8()],
            header_extensions: vec![],
        };
        let device = RtpCapabilities {
            codecs: vec![vp8()],
            header_extensions: vec![],
        };

        let common = router.intersect(&device);
        assert_eq!(common.codecs.len(), 1);
        assert_eq!(common.codecs[0].kind, MediaKind::Video);
    }

    #[test]
    fn test_ice_candidate_type_field_name() {
        let candidate = IceCandidate {
            foundation: "udpcandidate".to_string(),
            priority: 1,
            ip: "127.0.0.1".to_string(),
            port: 40000,
            protocol: "udp".to_string(),
            candidate_type: "host".to_string(),
        };
        let json = serde_json::to_value(&candidate).unwrap();
        assert_eq!(json["type"], "host");
    }

    #[test]
    fn test_dtls_role_defaults_to_auto() {
        let params: DtlsParameters = serde_json::from_str(
            r#"{"fingerprints":[{"algorithm":"sha-256","value":"AB:CD"}]}"#,
        )
        .unwrap();
        assert_eq!(params.role, DtlsRole::Auto);
    }
}
