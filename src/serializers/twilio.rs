// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Twilio Media Streams frame serializer.
//!
//! Handles the Twilio Media Streams WebSocket protocol. Audio payloads are
//! base64-encoded G.711 mu-law at 8 kHz mono.
//!
//! # Twilio wire format
//!
//! Incoming:
//! ```json
//! { "event": "connected", "protocol": "Call" }
//! { "event": "start", "start": { "streamSid": "MZ...", "callSid": "CA...",
//!     "customParameters": { "agent_id": "...", "call_log_id": "..." } } }
//! { "event": "media", "media": { "payload": "<base64 ulaw>" } }
//! { "event": "stop" }
//! ```
//!
//! Outgoing:
//! ```json
//! { "event": "media", "streamSid": "MZ...", "media": { "payload": "<base64 ulaw>" } }
//! { "event": "clear", "streamSid": "MZ..." }
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::serializers::{CarrierEvent, CarrierSerializer, OutboundFrame, Provider, StartEvent};
use crate::utils::{decode_base64, encode_base64};

// ---------------------------------------------------------------------------
// Twilio wire-format types
// ---------------------------------------------------------------------------

/// Top-level Twilio WebSocket message (incoming).
#[derive(Deserialize, Debug)]
struct TwilioMessage {
    event: String,
    #[serde(default)]
    start: Option<TwilioStartPayload>,
    #[serde(default)]
    media: Option<TwilioMediaPayload>,
}

/// Payload for the "start" event.
#[derive(Deserialize, Debug)]
struct TwilioStartPayload {
    #[serde(rename = "streamSid")]
    stream_sid: String,
    #[serde(rename = "callSid", default)]
    call_sid: Option<String>,
    #[serde(rename = "customParameters", default)]
    custom_parameters: HashMap<String, String>,
}

/// Payload for the "media" event.
#[derive(Deserialize, Debug)]
struct TwilioMediaPayload {
    payload: String,
}

/// Outgoing Twilio media message.
#[derive(Serialize)]
struct TwilioMediaOut<'a> {
    event: &'a str,
    #[serde(rename = "streamSid")]
    stream_sid: &'a str,
    media: TwilioMediaPayloadOut,
}

/// Outgoing media payload.
#[derive(Serialize)]
struct TwilioMediaPayloadOut {
    payload: String,
}

/// Outgoing Twilio clear message.
#[derive(Serialize)]
struct TwilioClearOut<'a> {
    event: &'a str,
    #[serde(rename = "streamSid")]
    stream_sid: &'a str,
}

// ---------------------------------------------------------------------------
// TwilioSerializer
// ---------------------------------------------------------------------------

/// Serializer for the Twilio Media Streams WebSocket protocol.
#[derive(Debug, Default)]
pub struct TwilioSerializer {
    /// The Twilio stream SID, set when the "start" event is received.
    stream_sid: String,
}

impl TwilioSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a serializer with a pre-set stream SID (tests).
    pub fn with_stream_sid(stream_sid: impl Into<String>) -> Self {
        Self {
            stream_sid: stream_sid.into(),
        }
    }
}

impl CarrierSerializer for TwilioSerializer {
    fn provider(&self) -> Provider {
        Provider::Twilio
    }

    fn set_stream_id(&mut self, stream_id: String) {
        self.stream_sid = stream_id;
    }

    fn serialize(&self, frame: &OutboundFrame) -> Option<String> {
        match frame {
            OutboundFrame::Media(ulaw) => {
                let msg = TwilioMediaOut {
                    event: "media",
                    stream_sid: &self.stream_sid,
                    media: TwilioMediaPayloadOut {
                        payload: encode_base64(ulaw),
                    },
                };
                serde_json::to_string(&msg).ok()
            }
            OutboundFrame::Clear => {
                let msg = TwilioClearOut {
                    event: "clear",
                    stream_sid: &self.stream_sid,
                };
                serde_json::to_string(&msg).ok()
            }
        }
    }

    fn deserialize(&self, data: &[u8]) -> Option<CarrierEvent> {
        let text = std::str::from_utf8(data).ok()?;
        let msg: TwilioMessage = serde_json::from_str(text).ok()?;

        match msg.event.as_str() {
            "connected" => Some(CarrierEvent::Connected),
            "start" => {
                let start = match msg.start {
                    Some(s) => s,
                    None => {
                        warn!("Twilio: start event missing start payload");
                        return None;
                    }
                };
                Some(CarrierEvent::Start(StartEvent {
                    stream_id: start.stream_sid,
                    call_id: start.call_sid,
                    custom_parameters: start.custom_parameters,
                }))
            }
            "media" => {
                let media = msg.media.as_ref()?;
                match decode_base64(&media.payload) {
                    Some(ulaw) => Some(CarrierEvent::Media { payload: ulaw }),
                    None => {
                        warn!("Twilio: failed to decode base64 audio payload");
                        None
                    }
                }
            }
            "stop" => Some(CarrierEvent::Stop),
            // Marks and DTMF acknowledgments are not used by the relay.
            "mark" | "dtmf" => None,
            other => {
                warn!("Twilio: unknown event type '{}'", other);
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_connected() {
        let s = TwilioSerializer::new();
        let event = s
            .deserialize(br#"{"event": "connected", "protocol": "Call", "version": "1.0.0"}"#)
            .unwrap();
        assert!(matches!(event, CarrierEvent::Connected));
    }

    #[test]
    fn test_deserialize_start() {
        let s = TwilioSerializer::new();
        let json = r#"{
            "event": "start",
            "start": {
                "streamSid": "MZ18ad3ab5a668481ce02b83e7395059f0",
                "callSid": "CA1234567890",
                "customParameters": {
                    "agent_id": "agent-7",
                    "call_log_id": "log-42"
                }
            }
        }"#;

        let event = s.deserialize(json.as_bytes()).unwrap();
        let start = match event {
            CarrierEvent::Start(start) => start,
            other => panic!("expected Start, got {other:?}"),
        };
        assert_eq!(start.stream_id, "MZ18ad3ab5a668481ce02b83e7395059f0");
        assert_eq!(start.call_id.as_deref(), Some("CA1234567890"));
        assert_eq!(start.custom_parameters["agent_id"], "agent-7");
        assert_eq!(start.custom_parameters["call_log_id"], "log-42");
    }

    #[test]
    fn test_deserialize_start_missing_payload() {
        let s = TwilioSerializer::new();
        assert!(s.deserialize(br#"{"event": "start"}"#).is_none());
    }

    #[test]
    fn test_deserialize_media() {
        let s = TwilioSerializer::new();
        let payload = encode_base64(&[0xFFu8; 160]);
        let json = format!(r#"{{"event": "media", "media": {{"payload": "{payload}"}}}}"#);

        let event = s.deserialize(json.as_bytes()).unwrap();
        match event {
            CarrierEvent::Media { payload } => {
                assert_eq!(payload.len(), 160);
                assert!(payload.iter().all(|&b| b == 0xFF));
            }
            other => panic!("expected Media, got {other:?}"),
        }
    }

    #[test]
    fn test_deserialize_media_invalid_base64() {
        let s = TwilioSerializer::new();
        let json = r#"{"event": "media", "media": {"payload": "not-valid-base64!!!"}}"#;
        assert!(s.deserialize(json.as_bytes()).is_none());
    }

    #[test]
    fn test_deserialize_stop() {
        let s = TwilioSerializer::new();
        let event = s.deserialize(br#"{"event": "stop", "streamSid": "MZ123"}"#).unwrap();
        assert!(matches!(event, CarrierEvent::Stop));
    }

    #[test]
    fn test_deserialize_unknown_event() {
        let s = TwilioSerializer::new();
        assert!(s.deserialize(br#"{"event": "unknown_event"}"#).is_none());
    }

    #[test]
    fn test_deserialize_invalid_json() {
        let s = TwilioSerializer::new();
        assert!(s.deserialize(b"not json at all").is_none());
        assert!(s.deserialize(&[0xFF, 0xFE, 0xFD]).is_none());
    }

    #[test]
    fn test_serialize_media() {
        let s = TwilioSerializer::with_stream_sid("MZ123");
        let json = s.serialize(&OutboundFrame::Media(vec![0xFF; 160])).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["event"], "media");
        assert_eq!(parsed["streamSid"], "MZ123");
        let payload = parsed["media"]["payload"].as_str().unwrap();
        assert_eq!(decode_base64(payload).unwrap().len(), 160);
    }

    #[test]
    fn test_serialize_clear() {
        let s = TwilioSerializer::with_stream_sid("MZ456");
        let json = s.serialize(&OutboundFrame::Clear).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["event"], "clear");
        assert_eq!(parsed["streamSid"], "MZ456");
    }
}
