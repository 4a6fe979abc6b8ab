// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Per-turn pipeline orchestration: STT -> LLM -> TTS with overlap.
//!
//! Given a finalized user turn, the orchestrator transcribes it, streams a
//! chat completion, and synthesizes the reply back to the carrier. The first
//! complete sentence of the reply starts synthesis while the model is still
//! decoding, hiding most of the completion time behind TTS startup; the
//! remainder is spoken afterwards.
//!
//! Cancellation is cooperative throughout: the playback token captured at
//! launch is re-checked after every suspension point, and a stale token
//! (barge-in, newer turn, hangup) makes each stage return without mutating
//! session state further. Provider failures abandon the turn with a log line;
//! the session keeps serving later turns.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::audio::wav::wrap_turn_pcm;
use crate::metrics::TranscriptEntry;
use crate::playback::PlaybackToken;
use crate::prompt;
use crate::serializers::OutboundFrame;
use crate::services::llm::{ChatMessage, LlmClient, Role};
use crate::services::stt::SttClient;
use crate::services::tts::TtsClient;
use crate::session::{CallState, OutboundItem};
use crate::vad::Turn;

/// How many prior messages accompany the current user message in the
/// completion request.
const HISTORY_WINDOW: usize = 6;

/// The per-session pipeline: one client per stage, shared by every turn.
pub struct Pipeline {
    pub stt: SttClient,
    pub llm: LlmClient,
    pub tts: TtsClient,
}

impl Pipeline {
    /// Process one finalized turn end to end.
    ///
    /// The caller bumps the playback gate, captures `token`, and sets the
    /// session's `processing` flag before launching; this method clears the
    /// flag on every exit path.
    pub async fn run_turn(self: Arc<Self>, state: Arc<CallState>, turn: Turn, token: PlaybackToken) {
        state.processing.store(true, Ordering::Release);
        self.run_turn_inner(&state, turn, token).await;
        state.processing.store(false, Ordering::Release);
    }

    async fn run_turn_inner(self: &Arc<Self>, state: &Arc<CallState>, turn: Turn, token: PlaybackToken) {
        // --- STT -----------------------------------------------------------
        let wav = wrap_turn_pcm(&turn.pcm);
        let stt_started = Instant::now();
        let transcription = match self.stt.transcribe(wav).await {
            Ok(t) => t,
            Err(e) => {
                error!(error = %e, "transcription failed, abandoning turn");
                return;
            }
        };

        {
            let mut usage = state.usage.lock().await;
            usage.stt_latency.record(stt_started.elapsed().as_secs_f64() * 1000.0);
            usage.stt_duration_sec += if transcription.duration_secs > 0.0 {
                transcription.duration_secs
            } else {
                turn.duration_ms as f64 / 1000.0
            };
        }

        let user_text = transcription.text.trim().to_string();
        if user_text.is_empty() {
            debug!("empty transcript, no reply");
            return;
        }

        if !state.gate.still_valid(token) {
            debug!("turn superseded after transcription");
            return;
        }

        // --- Record the user message --------------------------------------
        state
            .history
            .lock()
            .await
            .push(ChatMessage::user(user_text.clone()));
        state.transcript.lock().await.push(TranscriptEntry {
            role: Role::User.as_str().to_string(),
            content: user_text.clone(),
        });

        // --- Build the completion request ----------------------------------
        let messages = {
            let history = state.history.lock().await;
            let user_turns = history.iter().filter(|m| m.role == Role::User).count();
            let flow = prompt::flow_state(user_turns, &user_text);
            let system = prompt::build_system_prompt(&state.optimized_prompt, &flow);

            let mut messages = Vec::with_capacity(HISTORY_WINDOW + 2);
            messages.push(ChatMessage::system(system));
            // The current user message plus up to HISTORY_WINDOW before it.
            let tail = history.len().saturating_sub(HISTORY_WINDOW + 1);
            messages.extend(history[tail..].iter().cloned());
            messages
        };

        // --- LLM streaming with first-sentence early start ------------------
        let llm_started = Instant::now();
        let mut first_spoken: Option<String> = None;
        let mut first_tts: Option<JoinHandle<bool>> = None;
        let gate = state.gate.clone();

        let outcome = self
            .llm
            .stream_completion(
                state.chat_model,
                &messages,
                state.agent.temperature,
                |sentence| {
                    first_spoken = Some(sentence.to_string());
                    let pipeline = Arc::clone(self);
                    let state = Arc::clone(state);
                    let text = sentence.to_string();
                    debug!(chars = text.len(), "first sentence ready, starting synthesis");
                    first_tts = Some(tokio::spawn(async move {
                        pipeline.speak(&state, token, &text).await
                    }));
                },
                || !gate.still_valid(token),
            )
            .await;

        let outcome = match outcome {
            Ok(o) => o,
            Err(e) => {
                error!(error = %e, "chat completion failed, abandoning turn");
                return;
            }
        };

        {
            let mut usage = state.usage.lock().await;
            usage.llm_latency.record(llm_started.elapsed().as_secs_f64() * 1000.0);
            if let Some(tokens) = outcome.usage {
                usage.llm_input_tokens += tokens.prompt_tokens;
                usage.llm_output_tokens += tokens.completion_tokens;
            }
        }

        if outcome.interrupted || !state.gate.still_valid(token) {
            debug!("turn superseded during decode");
            if let Some(handle) = first_tts {
                let _ = handle.await;
            }
            return;
        }

        let reply = outcome.text.trim().to_string();
        if reply.is_empty() {
            debug!("empty completion, no reply");
            return;
        }

        // --- Record the assistant message -----------------------------------
        state
            .history
            .lock()
            .await
            .push(ChatMessage::assistant(reply.clone()));
        state.transcript.lock().await.push(TranscriptEntry {
            role: Role::Assistant.as_str().to_string(),
            content: reply.clone(),
        });
        state.usage.lock().await.turns_count += 1;

        // --- Speak the remainder (or the whole reply) ------------------------
        match first_tts {
            Some(handle) => {
                let _ = handle.await;
                let first = first_spoken.unwrap_or_default();
                // When decode raced past the early-start prefix, only the
                // remainder is spoken; a reply that no longer starts with it
                // (shouldn't happen, but providers have surprised us) is
                // spoken in full.
                let remainder = match outcome.text.strip_prefix(first.as_str()) {
                    Some(rest) => rest.trim(),
                    None => reply.as_str(),
                };
                if !remainder.is_empty() {
                    self.speak(state, token, remainder).await;
                }
            }
            None => {
                self.speak(state, token, &reply).await;
            }
        }
    }

    /// Synthesize `text` and emit framed audio to the carrier under `token`.
    ///
    /// Every frame re-checks the playback gate; a stale token stops the read
    /// loop, which also closes the provider stream. Returns whether the whole
    /// synthesis was emitted.
    pub async fn speak(&self, state: &Arc<CallState>, token: PlaybackToken, text: &str) -> bool {
        if text.is_empty() || !state.gate.still_valid(token) {
            return false;
        }

        let mut stream = match self
            .tts
            .synthesize(text, &state.agent.voice_id, &state.agent.tts_model)
            .await
        {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "synthesis failed");
                return false;
            }
        };

        {
            let mut usage = state.usage.lock().await;
            usage.tts_latency.record(stream.ttfb_ms);
            usage.tts_characters += text.chars().count() as u64;
        }

        state.speaking.fetch_add(1, Ordering::AcqRel);
        let mut completed = true;
        loop {
            if !state.gate.still_valid(token) {
                debug!("playback superseded, stopping synthesis output");
                completed = false;
                break;
            }
            let frame = match stream.next_frame().await {
                Some(f) => f,
                None => break,
            };
            if !state.gate.still_valid(token) {
                completed = false;
                break;
            }
            if state
                .outbound
                .send(OutboundItem {
                    token,
                    frame: OutboundFrame::Media(frame),
                })
                .await
                .is_err()
            {
                completed = false;
                break;
            }
        }
        state.speaking.fetch_sub(1, Ordering::AcqRel);
        completed
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stt", &self.stt)
            .field("llm", &self.llm)
            .field("tts", &self.tts)
            .finish()
    }
}
