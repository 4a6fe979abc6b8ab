// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Per-call session: owns all state for one carrier WebSocket.
//!
//! Lifecycle: the upgrade handler calls [`run`] with the raw socket and the
//! URL-supplied hints. The session waits for the carrier's `start` frame,
//! detects the wire format from field presence, fetches the agent config,
//! speaks the greeting under the initial playback token, then feeds every
//! `media` frame through barge-in detection and the turn segmenter. A
//! completed turn launches the pipeline orchestrator unless one is already
//! running (the new turn is dropped, not queued). `stop` or socket close
//! latches the call-ended flag, finalizes metrics, and posts the call report.
//!
//! Sessions are fully isolated: nothing here is shared across calls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, trace, warn};

use crate::audio::codec::{mulaw_to_pcm, rms_db};
use crate::config::{AgentConfig, Settings};
use crate::metrics::{build_report, CallStatus, TranscriptEntry, UsageTracker};
use crate::pipeline::Pipeline;
use crate::playback::{PlaybackGate, PlaybackToken};
use crate::prompt;
use crate::serializers::{
    detect_provider, serializer_for, CarrierEvent, CarrierSerializer, OutboundFrame, Provider,
    StartEvent,
};
use crate::services::backend::BackendClient;
use crate::services::llm::{ChatMessage, LlmClient, Role, LARGE_CHAT_MODEL, SMALL_CHAT_MODEL};
use crate::services::stt::SttClient;
use crate::services::tts::TtsClient;
use crate::vad::TurnSegmenter;

/// Barge-in threshold while the agent is speaking. Higher than the turn
/// threshold (default -40 dB) to reduce false triggers from room noise
/// bleeding over the agent's outbound audio.
pub const BARGE_IN_THRESHOLD_DB: f64 = -35.0;

/// Outbound queue depth between the orchestrator and the socket writer.
const OUTBOUND_QUEUE: usize = 256;

// ---------------------------------------------------------------------------
// Shared per-call state
// ---------------------------------------------------------------------------

/// One outbound frame tagged with the playback token it was produced under.
/// The writer drops frames whose token is no longer current.
#[derive(Debug)]
pub struct OutboundItem {
    pub token: PlaybackToken,
    pub frame: OutboundFrame,
}

/// State shared between the session loop and the pipeline orchestrator.
pub struct CallState {
    pub gate: PlaybackGate,
    pub outbound: mpsc::Sender<OutboundItem>,
    /// Append-only conversation history (never shrinks).
    pub history: Mutex<Vec<ChatMessage>>,
    /// Append-only transcript for the final report.
    pub transcript: Mutex<Vec<TranscriptEntry>>,
    pub usage: Mutex<UsageTracker>,
    /// Set while a turn is in the orchestrator; new turns are dropped.
    pub processing: AtomicBool,
    /// Count of synthesis loops currently emitting audio (barge-in window).
    /// A counter rather than a flag: a superseded loop may notice its stale
    /// token only after its successor has already started.
    pub speaking: AtomicU64,
    pub agent: AgentConfig,
    /// System prompt after marker-driven optimization, computed once.
    pub optimized_prompt: String,
    /// Chat model selected from the optimized prompt's size.
    pub chat_model: &'static str,
}

/// URL-supplied session hints (`/ws?agent_id=..&call_log_id=..&provider=..`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionQuery {
    pub agent_id: Option<String>,
    pub call_log_id: Option<String>,
    pub provider: Option<String>,
}

/// Custom parameters on the `start` frame win over URL hints.
fn resolve_identifier(
    params: &HashMap<String, String>,
    key: &str,
    hint: Option<&String>,
) -> String {
    params
        .get(key)
        .cloned()
        .or_else(|| hint.cloned())
        .unwrap_or_default()
}

fn provider_hint(query: &SessionQuery) -> Option<Provider> {
    match query.provider.as_deref() {
        Some("twilio") => Some(Provider::Twilio),
        Some("telnyx") => Some(Provider::Telnyx),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Session entry
// ---------------------------------------------------------------------------

/// Drive one carrier WebSocket for its whole lifetime.
pub async fn run(socket: WebSocket, settings: Arc<Settings>, query: SessionQuery) {
    // Provider secrets are required to answer a call at all; refuse cleanly
    // when any is missing so the carrier just sees a closed socket.
    let (Some(stt_key), Some(llm_key), Some(tts_key)) = (
        settings.deepgram_api_key.clone(),
        settings.openai_api_key.clone(),
        settings.elevenlabs_api_key.clone(),
    ) else {
        error!("provider API key missing, refusing session");
        return;
    };

    let (ws_sink, mut ws_stream) = socket.split();

    // --- Wait for the start frame and detect the wire format ---------------
    let hint = provider_hint(&query);
    let (start, read_serializer, write_serializer) =
        match await_start(&mut ws_stream, hint).await {
            Some(parts) => parts,
            None => {
                info!("socket ended before start frame");
                return;
            }
        };

    let agent_id = resolve_identifier(&start.custom_parameters, "agent_id", query.agent_id.as_ref());
    let call_log_id = resolve_identifier(
        &start.custom_parameters,
        "call_log_id",
        query.call_log_id.as_ref(),
    );
    let call_started = Instant::now();

    info!(
        provider = %read_serializer.provider(),
        stream_id = %start.stream_id,
        call_id = start.call_id.as_deref().unwrap_or(""),
        agent_id = %agent_id,
        "call started"
    );

    // --- Agent configuration ------------------------------------------------
    let backend = BackendClient::new(
        settings.backend_base_url.clone(),
        settings.internal_api_secret.clone(),
    );
    let agent = match backend.fetch_agent_config(&agent_id).await {
        Ok(record) => record.into_config(),
        Err(e) => {
            warn!(error = %e, "agent config fetch failed, answering with defaults");
            AgentConfig::default()
        }
    };

    // --- Wire up the pipeline and shared state ------------------------------
    let optimized_prompt = prompt::optimize(&agent.system_prompt);
    let chat_model = prompt::select_model(&optimized_prompt, SMALL_CHAT_MODEL, LARGE_CHAT_MODEL);

    let pipeline = Arc::new(Pipeline {
        stt: SttClient::new(stt_key)
            .with_language(agent.stt_language.clone())
            .with_keywords(agent.keywords.clone()),
        llm: LlmClient::new(llm_key),
        tts: TtsClient::new(tts_key),
    });

    let gate = PlaybackGate::new();
    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
    let state = Arc::new(CallState {
        gate: gate.clone(),
        outbound: outbound_tx.clone(),
        history: Mutex::new(Vec::new()),
        transcript: Mutex::new(Vec::new()),
        usage: Mutex::new(UsageTracker::default()),
        processing: AtomicBool::new(false),
        speaking: AtomicU64::new(0),
        agent,
        optimized_prompt,
        chat_model,
    });

    let writer = tokio::spawn(write_loop(
        ws_sink,
        write_serializer,
        outbound_rx,
        gate.clone(),
    ));

    // --- Greeting (always precedes any user turn) ---------------------------
    if let Some(greeting) = state.agent.greeting.clone() {
        let token = state.gate.capture(); // the initial zero
        state.transcript.lock().await.push(TranscriptEntry {
            role: Role::Assistant.as_str().to_string(),
            content: greeting.clone(),
        });
        state
            .history
            .lock()
            .await
            .push(ChatMessage::assistant(greeting.clone()));
        state.usage.lock().await.turns_count += 1;

        let pipeline = Arc::clone(&pipeline);
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            pipeline.speak(&state, token, &greeting).await;
        });
    }

    // --- Media loop ----------------------------------------------------------
    let mut segmenter = TurnSegmenter::new(state.agent.vad.clone());
    let mut status = CallStatus::Completed;

    while let Some(message) = ws_stream.next().await {
        let message = match message {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "carrier socket error");
                status = CallStatus::Error;
                break;
            }
        };

        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => {
                debug!("carrier closed the socket");
                break;
            }
            _ => continue,
        };

        let Some(event) = read_serializer.deserialize(text.as_bytes()) else {
            // Malformed frame: logged by the serializer, skipped here.
            continue;
        };

        match event {
            CarrierEvent::Media { payload } => {
                let pcm = mulaw_to_pcm(&payload);

                if state.speaking.load(std::sync::atomic::Ordering::Acquire) > 0
                    && rms_db(&pcm) >= BARGE_IN_THRESHOLD_DB
                {
                    info!("barge-in detected, clearing playback");
                    let fresh = state.gate.bump();
                    let _ = outbound_tx
                        .send(OutboundItem {
                            token: fresh,
                            frame: OutboundFrame::Clear,
                        })
                        .await;
                }

                if let Some(turn) = segmenter.push_frame(&pcm) {
                    if state.processing.load(std::sync::atomic::Ordering::Acquire) {
                        debug!(
                            duration_ms = turn.duration_ms,
                            "orchestrator busy, dropping turn"
                        );
                    } else {
                        let token = state.gate.bump();
                        state
                            .processing
                            .store(true, std::sync::atomic::Ordering::Release);
                        tokio::spawn(
                            Arc::clone(&pipeline).run_turn(Arc::clone(&state), turn, token),
                        );
                    }
                }
            }
            CarrierEvent::Stop => {
                info!("carrier stream stopped");
                break;
            }
            CarrierEvent::Connected => trace!("carrier connected event mid-stream"),
            CarrierEvent::Start(_) => {
                // The stream identifier is set exactly once.
                warn!("duplicate start frame ignored");
            }
        }
    }

    // --- Finalize ------------------------------------------------------------
    state.gate.end_call();

    let duration_seconds = call_started.elapsed().as_secs_f64();
    let stats = segmenter.stats();
    let usage = state.usage.lock().await.clone();
    let transcript = state.transcript.lock().await.clone();

    let report = build_report(
        call_log_id,
        duration_seconds,
        transcript,
        status,
        &usage,
        stats.voice_activity_percent(),
        &settings.cost_rates,
    );
    if let Err(e) = backend.post_call_report(&report).await {
        error!(error = %e, "failed to deliver call report");
    }

    // Orchestrator tasks may still hold a sender clone through the shared
    // state; the gate is latched, so cut the writer loose rather than wait.
    drop(outbound_tx);
    writer.abort();
    let _ = writer.await;
    info!(duration_seconds, turns = usage.turns_count, "call finished");
}

/// Read frames until the carrier's `start` arrives; returns the start event
/// plus one serializer for each socket half.
async fn await_start(
    ws_stream: &mut (impl futures_util::Stream<Item = Result<Message, axum::Error>> + Unpin),
    hint: Option<Provider>,
) -> Option<(StartEvent, Box<dyn CarrierSerializer>, Box<dyn CarrierSerializer>)> {
    loop {
        let message = match ws_stream.next().await? {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "carrier socket error before start");
                return None;
            }
        };

        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => return None,
            _ => continue,
        };

        let Some(provider) = detect_provider(&text).or(hint) else {
            trace!("pre-start frame ignored");
            continue;
        };

        let mut read_serializer = serializer_for(provider);
        match read_serializer.deserialize(text.as_bytes()) {
            Some(CarrierEvent::Start(start)) => {
                read_serializer.set_stream_id(start.stream_id.clone());
                let mut write_serializer = serializer_for(provider);
                write_serializer.set_stream_id(start.stream_id.clone());
                return Some((start, read_serializer, write_serializer));
            }
            _ => continue,
        }
    }
}

/// Socket writer: serializes outbound frames, dropping any whose playback
/// token has been superseded. All sends cease once the call has ended.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    serializer: Box<dyn CarrierSerializer>,
    mut outbound_rx: mpsc::Receiver<OutboundItem>,
    gate: PlaybackGate,
) {
    while let Some(item) = outbound_rx.recv().await {
        if gate.call_ended() {
            break;
        }
        if !gate.still_valid(item.token) {
            trace!("dropping frame from superseded stream");
            continue;
        }
        let Some(json) = serializer.serialize(&item.frame) else {
            continue;
        };
        if sink.send(Message::Text(json)).await.is_err() {
            debug!("carrier socket closed during send");
            break;
        }
    }
}
