//! Carrier media-stream protocol
//!
//! JSON messages exchanged over the bidirectional stream WebSocket. The
//! carrier sends numeric fields as strings, so those are parsed leniently.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// Message received from the carrier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum StreamMessage {
    /// WebSocket established, no call metadata yet
    Connected {
        #[serde(default)]
        protocol: Option<String>,
        #[serde(default)]
        version: Option<String>,
    },

    /// Call metadata; always precedes media
    #[serde(rename_all = "camelCase")]
    Start {
        #[serde(default, deserialize_with = "lenient_u64_opt")]
        sequence_number: Option<u64>,
        #[serde(default)]
        stream_sid: Option<String>,
        start: StartMetadata,
    },

    /// Base64 μ-law audio
    #[serde(rename_all = "camelCase")]
    Media {
        #[serde(default, deserialize_with = "lenient_u64_opt")]
        sequence_number: Option<u64>,
        #[serde(default)]
        stream_sid: Option<String>,
        media: MediaPayload,
    },

    /// Playback of a previously sent mark has completed
    #[serde(rename_all = "camelCase")]
    Mark {
        #[serde(default, deserialize_with = "lenient_u64_opt")]
        sequence_number: Option<u64>,
        #[serde(default)]
        stream_sid: Option<String>,
        mark: MarkLabel,
    },

    /// Keypad digit
    #[serde(rename_all = "camelCase")]
    Dtmf {
        #[serde(default)]
        stream_sid: Option<String>,
        dtmf: DtmfDigit,
    },

    /// Stream ended (caller hung up or the call was redirected)
    #[serde(rename_all = "camelCase")]
    Stop {
        #[serde(default)]
        stream_sid: Option<String>,
    },
}

impl StreamMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StreamMessage::Connected { .. } => "connected",
            StreamMessage::Start { .. } => "start",
            StreamMessage::Media { .. } => "media",
            StreamMessage::Mark { .. } => "mark",
            StreamMessage::Dtmf { .. } => "dtmf",
            StreamMessage::Stop { .. } => "stop",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartMetadata {
    pub stream_sid: String,

    #[serde(default)]
    pub account_sid: Option<String>,

    #[serde(default)]
    pub call_sid: Option<String>,

    #[serde(default)]
    pub tracks: Vec<String>,

    #[serde(default)]
    pub custom_parameters: HashMap<String, String>,

    #[serde(default)]
    pub media_format: Option<MediaFormat>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFormat {
    pub encoding: String,
    pub sample_rate: u32,
    pub channels: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaPayload {
    #[serde(default)]
    pub track: Option<String>,

    /// Per-stream media chunk counter, starts at 1
    #[serde(default, deserialize_with = "lenient_u64_opt")]
    pub chunk: Option<u64>,

    /// Milliseconds since stream start
    #[serde(default, deserialize_with = "lenient_u64_opt")]
    pub timestamp: Option<u64>,

    pub payload: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkLabel {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtmfDigit {
    #[serde(default)]
    pub track: Option<String>,
    pub digit: String,
}

/// Message sent to the carrier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum OutboundMessage {
    #[serde(rename_all = "camelCase")]
    Media {
        stream_sid: String,
        media: OutboundMedia,
    },

    /// Ask the carrier to echo `name` back once playback reaches this point
    #[serde(rename_all = "camelCase")]
    Mark { stream_sid: String, mark: MarkLabel },

    /// Drop all audio buffered on the carrier side
    #[serde(rename_all = "camelCase")]
    Clear { stream_sid: String },
}

impl OutboundMessage {
    pub fn media(stream_sid: impl Into<String>, payload: String) -> Self {
        OutboundMessage::Media {
            stream_sid: stream_sid.into(),
            media: OutboundMedia { payload },
        }
    }

    pub fn mark(stream_sid: impl Into<String>, name: impl Into<String>) -> Self {
        OutboundMessage::Mark {
            stream_sid: stream_sid.into(),
            mark: MarkLabel { name: name.into() },
        }
    }

    pub fn clear(stream_sid: impl Into<String>) -> Self {
        OutboundMessage::Clear {
            stream_sid: stream_sid.into(),
        }
    }

    pub fn is_media(&self) -> bool {
        matches!(self, OutboundMessage::Media { .. })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMedia {
    pub payload: String,
}

/// Accept a number, a numeric string, or null
fn lenient_u64_opt<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Lenient {
        Num(u64),
        Str(String),
    }

    match Option::<Lenient>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Lenient::Num(n)) => Ok(Some(n)),
        Some(Lenient::Str(s)) => s
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start() {
        let raw = r#"{
            "event": "start",
            "sequenceNumber": "1",
            "start": {
                "accountSid": "AC1",
                "streamSid": "MZ1",
                "callSid": "CA1",
                "tracks": ["inbound"],
                "customParameters": {},
                "mediaFormat": {"encoding": "audio/x-mulaw", "sampleRate": 8000, "channels": 1}
            },
            "streamSid": "MZ1"
        }"#;
        match StreamMessage::parse(raw).unwrap() {
            StreamMessage::Start {
                sequence_number,
                start,
                ..
            } => {
                assert_eq!(sequence_number, Some(1));
                assert_eq!(start.stream_sid, "MZ1");
                assert_eq!(start.call_sid.as_deref(), Some("CA1"));
                assert_eq!(start.media_format.unwrap().sample_rate, 8000);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_media_with_string_numbers() {
        let raw = r#"{"event":"media","sequenceNumber":"3","media":{"track":"inbound","chunk":"2","timestamp":"40","payload":"//8="},"streamSid":"MZ1"}"#;
        match StreamMessage::parse(raw).unwrap() {
            StreamMessage::Media { media, sequence_number, .. } => {
                assert_eq!(sequence_number, Some(3));
                assert_eq!(media.chunk, Some(2));
                assert_eq!(media.timestamp, Some(40));
                assert_eq!(media.payload, "//8=");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_connected_and_stop() {
        let msg = StreamMessage::parse(r#"{"event":"connected","protocol":"Call","version":"1.0.0"}"#).unwrap();
        assert_eq!(msg.kind(), "connected");

        let msg = StreamMessage::parse(r#"{"event":"stop","sequenceNumber":"9","streamSid":"MZ1","stop":{"callSid":"CA1"}}"#).unwrap();
        assert_eq!(msg.kind(), "stop");
    }

    #[test]
    fn test_unknown_event_rejected() {
        assert!(StreamMessage::parse(r#"{"event":"bogus"}"#).is_err());
        assert!(StreamMessage::parse("not json").is_err());
    }

    #[test]
    fn test_outbound_serialization() {
        let json = OutboundMessage::media("MZ1", "AAAA".to_string()).to_json().unwrap();
        assert_eq!(json, r#"{"event":"media","streamSid":"MZ1","media":{"payload":"AAAA"}}"#);

        let json = OutboundMessage::clear("MZ1").to_json().unwrap();
        assert_eq!(json, r#"{"event":"clear","streamSid":"MZ1"}"#);

        let json = OutboundMessage::mark("MZ1", "utt-3").to_json().unwrap();
        assert_eq!(json, r#"{"event":"mark","streamSid":"MZ1","mark":{"name":"utt-3"}}"#);
    }
}
