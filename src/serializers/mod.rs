// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Carrier frame serialization for WebSocket media-stream protocols.
//!
//! Two wire formats are accepted (Twilio Media Streams and Telnyx Media
//! Streaming). Inbound messages normalize into [`CarrierEvent`] so the rest
//! of the relay is provider-neutral; outbound [`OutboundFrame`] values
//! serialize into the carrier's JSON, which differs between providers only
//! in the stream-identifier key name (`streamSid` vs `stream_id`).

pub mod telnyx;
pub mod twilio;

use std::collections::HashMap;

/// Carrier wire formats understood by the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Twilio,
    Telnyx,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Twilio => "twilio",
            Provider::Telnyx => "telnyx",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stream metadata carried by a `start` frame.
#[derive(Debug, Clone, Default)]
pub struct StartEvent {
    /// The carrier's stream identifier (set exactly once per call).
    pub stream_id: String,
    /// The carrier's call identifier, when present.
    pub call_id: Option<String>,
    /// Custom parameters attached by the dial plan (e.g. `agent_id`).
    pub custom_parameters: HashMap<String, String>,
}

/// Provider-neutral inbound carrier event.
#[derive(Debug)]
pub enum CarrierEvent {
    /// Initial connection acknowledgment; informational only.
    Connected,
    /// Stream started; carries identifiers and custom parameters.
    Start(StartEvent),
    /// One media frame of decoded mu-law bytes (nominally 160 bytes / 20 ms).
    Media { payload: Vec<u8> },
    /// Stream stopped by the carrier.
    Stop,
}

/// Outbound action toward the carrier.
#[derive(Debug)]
pub enum OutboundFrame {
    /// One mu-law audio payload, already packetized upstream.
    Media(Vec<u8>),
    /// Flush any audio the carrier has buffered (interruptions).
    Clear,
}

/// Frame codec for one carrier wire format.
pub trait CarrierSerializer: Send + Sync {
    /// Which wire format this serializer speaks.
    fn provider(&self) -> Provider;

    /// Record the stream identifier announced by the `start` frame.
    fn set_stream_id(&mut self, stream_id: String);

    /// Serialize an outbound frame to wire JSON.
    fn serialize(&self, frame: &OutboundFrame) -> Option<String>;

    /// Parse an inbound wire message. Returns `None` for malformed frames,
    /// which callers log and skip.
    fn deserialize(&self, data: &[u8]) -> Option<CarrierEvent>;
}

/// Detect the wire format of a raw `start` message from field presence.
///
/// Twilio puts the stream identifier inside the start payload
/// (`start.streamSid`); Telnyx carries it at the top level (`stream_id`).
/// Non-start messages and unrecognized shapes return `None`.
pub fn detect_provider(text: &str) -> Option<Provider> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    if value.get("event")?.as_str()? != "start" {
        return None;
    }
    if value.pointer("/start/streamSid").and_then(|v| v.as_str()).is_some() {
        return Some(Provider::Twilio);
    }
    if value.get("stream_id").and_then(|v| v.as_str()).is_some() {
        return Some(Provider::Telnyx);
    }
    None
}

/// Construct the serializer for a detected provider.
pub fn serializer_for(provider: Provider) -> Box<dyn CarrierSerializer> {
    match provider {
        Provider::Twilio => Box::new(twilio::TwilioSerializer::new()),
        Provider::Telnyx => Box::new(telnyx::TelnyxSerializer::new()),
    }
}
