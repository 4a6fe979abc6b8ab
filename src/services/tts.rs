// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Streaming text-to-speech client (ElevenLabs HTTP streaming API).
//!
//! Synthesis is requested with `output_format=ulaw_8000`, so the chunked
//! response body is already G.711 mu-law at the carrier's rate and no
//! resampling or re-encoding happens on the hot path. The provider's chunk
//! boundaries are arbitrary; [`FramePacketizer`] re-frames the body into
//! exactly 160-byte (20 ms) payloads, with any remainder below one frame
//! flushed as a final short frame at end-of-stream.

use std::collections::VecDeque;
use std::time::Instant;

use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde::Serialize;
use tracing::{debug, warn};

use crate::services::{http_client, ServiceError};

/// One 20 ms mu-law frame at 8 kHz.
pub const ULAW_FRAME_BYTES: usize = 160;

// ---------------------------------------------------------------------------
// Repacketizer
// ---------------------------------------------------------------------------

/// Rolling byte buffer that re-frames arbitrary chunks into exact
/// [`ULAW_FRAME_BYTES`] payloads.
#[derive(Debug, Default)]
pub struct FramePacketizer {
    buf: Vec<u8>,
}

impl FramePacketizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a provider chunk and drain all complete frames.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::with_capacity(self.buf.len() / ULAW_FRAME_BYTES);
        while self.buf.len() >= ULAW_FRAME_BYTES {
            frames.push(self.buf.drain(..ULAW_FRAME_BYTES).collect());
        }
        frames
    }

    /// Take the remainder (< one frame) at end-of-stream, if any.
    pub fn flush(&mut self) -> Option<Vec<u8>> {
        if self.buf.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.buf))
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    model_id: &'a str,
}

// ---------------------------------------------------------------------------
// TtsClient
// ---------------------------------------------------------------------------

/// Streaming synthesis client.
pub struct TtsClient {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl TtsClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.elevenlabs.io".to_string(),
            client: http_client(),
        }
    }

    /// Builder: set a custom API base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Start synthesis of `text` and return the framed audio stream.
    ///
    /// The returned [`UlawStream`] yields exact 20 ms frames as the provider
    /// produces audio; the caller drives it and decides when to stop reading
    /// (playback-token checks live with the caller).
    pub async fn synthesize(
        &self,
        text: &str,
        voice_id: &str,
        model_id: &str,
    ) -> Result<UlawStream, ServiceError> {
        let url = format!(
            "{}/v1/text-to-speech/{}/stream?output_format=ulaw_8000",
            self.base_url, voice_id
        );

        let started = Instant::now();
        let response = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .json(&SynthesisRequest { text, model_id })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Status {
                service: "tts",
                status: status.as_u16(),
                body,
            });
        }

        let ttfb_ms = started.elapsed().as_secs_f64() * 1000.0;
        debug!(ttfb_ms, chars = text.chars().count(), "synthesis stream open");

        Ok(UlawStream {
            stream: response.bytes_stream().boxed(),
            packetizer: FramePacketizer::new(),
            pending: VecDeque::new(),
            body_done: false,
            flushed: false,
            ttfb_ms,
        })
    }
}

impl std::fmt::Debug for TtsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtsClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// UlawStream
// ---------------------------------------------------------------------------

/// Framed synthesis output: 160-byte mu-law payloads in production order.
pub struct UlawStream {
    stream: BoxStream<'static, reqwest::Result<bytes::Bytes>>,
    packetizer: FramePacketizer,
    pending: VecDeque<Vec<u8>>,
    body_done: bool,
    flushed: bool,
    /// Time from request to response headers, in milliseconds.
    pub ttfb_ms: f64,
}

impl UlawStream {
    /// Next 20 ms frame, or `None` at end-of-stream. The final frame may be
    /// shorter than 160 bytes. Read errors end the stream after a log line;
    /// the turn is abandoned, not the call.
    pub async fn next_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Some(frame);
            }

            if self.body_done {
                if self.flushed {
                    return None;
                }
                self.flushed = true;
                return self.packetizer.flush();
            }

            match self.stream.next().await {
                Some(Ok(chunk)) => {
                    self.pending.extend(self.packetizer.push(&chunk));
                }
                Some(Err(e)) => {
                    warn!(error = %e, "error reading synthesis stream");
                    self.body_done = true;
                }
                None => {
                    self.body_done = true;
                }
            }
        }
    }
}
