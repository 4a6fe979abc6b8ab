// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Telnyx Media Streaming WebSocket frame serializer.
//!
//! Same event vocabulary as the Twilio serializer, with the stream identifier
//! at the top level of every message (`stream_id`) instead of Twilio's
//! `streamSid` key. Audio payloads are base64-encoded G.711 mu-law at 8 kHz.
//!
//! # Telnyx wire format
//!
//! Incoming:
//! ```json
//! { "event": "connected" }
//! { "event": "start", "stream_id": "...", "start": { "call_control_id": "...",
//!     "customParameters": { "agent_id": "..." } } }
//! { "event": "media", "media": { "payload": "<base64 ulaw>" } }
//! { "event": "stop" }
//! ```
//!
//! Outgoing:
//! ```json
//! { "event": "media", "stream_id": "...", "media": { "payload": "<base64 ulaw>" } }
//! { "event": "clear", "stream_id": "..." }
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::serializers::{CarrierEvent, CarrierSerializer, OutboundFrame, Provider, StartEvent};
use crate::utils::{decode_base64, encode_base64};

// ---------------------------------------------------------------------------
// Telnyx wire-format types
// ---------------------------------------------------------------------------

/// Incoming Telnyx WebSocket message envelope.
#[derive(Deserialize, Debug)]
struct TelnyxMessage {
    event: String,
    #[serde(default)]
    stream_id: Option<String>,
    #[serde(default)]
    start: Option<TelnyxStartPayload>,
    #[serde(default)]
    media: Option<TelnyxMediaPayload>,
}

/// Payload inside a Telnyx `start` event.
#[derive(Deserialize, Debug)]
struct TelnyxStartPayload {
    #[serde(default)]
    call_control_id: Option<String>,
    #[serde(rename = "customParameters", default)]
    custom_parameters: HashMap<String, String>,
}

/// Media payload inside a Telnyx `media` event.
#[derive(Deserialize, Debug)]
struct TelnyxMediaPayload {
    payload: String,
}

/// Outgoing Telnyx media message.
#[derive(Serialize)]
struct TelnyxMediaOut<'a> {
    event: &'a str,
    stream_id: &'a str,
    media: TelnyxMediaPayloadOut,
}

/// Outgoing media payload.
#[derive(Serialize)]
struct TelnyxMediaPayloadOut {
    payload: String,
}

/// Outgoing Telnyx clear message (interruptions).
#[derive(Serialize)]
struct TelnyxClearOut<'a> {
    event: &'a str,
    stream_id: &'a str,
}

// ---------------------------------------------------------------------------
// TelnyxSerializer
// ---------------------------------------------------------------------------

/// Serializer for the Telnyx Media Streaming WebSocket protocol.
#[derive(Debug, Default)]
pub struct TelnyxSerializer {
    /// The Telnyx stream identifier, set when the "start" event is received.
    stream_id: String,
}

impl TelnyxSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a serializer with a pre-set stream id (tests).
    pub fn with_stream_id(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
        }
    }
}

impl CarrierSerializer for TelnyxSerializer {
    fn provider(&self) -> Provider {
        Provider::Telnyx
    }

    fn set_stream_id(&mut self, stream_id: String) {
        self.stream_id = stream_id;
    }

    fn serialize(&self, frame: &OutboundFrame) -> Option<String> {
        match frame {
            OutboundFrame::Media(ulaw) => {
                let msg = TelnyxMediaOut {
                    event: "media",
                    stream_id: &self.stream_id,
                    media: TelnyxMediaPayloadOut {
                        payload: encode_base64(ulaw),
                    },
                };
                serde_json::to_string(&msg).ok()
            }
            OutboundFrame::Clear => {
                let msg = TelnyxClearOut {
                    event: "clear",
                    stream_id: &self.stream_id,
                };
                serde_json::to_string(&msg).ok()
            }
        }
    }

    fn deserialize(&self, data: &[u8]) -> Option<CarrierEvent> {
        let text = std::str::from_utf8(data).ok()?;
        let msg: TelnyxMessage = serde_json::from_str(text).ok()?;

        match msg.event.as_str() {
            "connected" => Some(CarrierEvent::Connected),
            "start" => {
                let stream_id = match msg.stream_id {
                    Some(id) => id,
                    None => {
                        warn!("Telnyx: start event missing stream_id");
                        return None;
                    }
                };
                let start = msg.start.unwrap_or(TelnyxStartPayload {
                    call_control_id: None,
                    custom_parameters: HashMap::new(),
                });
                Some(CarrierEvent::Start(StartEvent {
                    stream_id,
                    call_id: start.call_control_id,
                    custom_parameters: start.custom_parameters,
                }))
            }
            "media" => {
                let media = msg.media.as_ref()?;
                match decode_base64(&media.payload) {
                    Some(ulaw) => Some(CarrierEvent::Media { payload: ulaw }),
                    None => {
                        warn!("Telnyx: failed to decode base64 audio payload");
                        None
                    }
                }
            }
            "stop" => Some(CarrierEvent::Stop),
            other => {
                warn!("Telnyx: unknown event type '{}'", other);
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
