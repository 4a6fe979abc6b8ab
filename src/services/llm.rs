// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Streaming chat-completion client (OpenAI-compatible).
//!
//! Sends `/chat/completions` requests with `stream: true` and consumes the
//! SSE response incrementally. A first-sentence callback fires at most once,
//! synchronously from the read loop, as soon as the accumulated text contains
//! a complete opening sentence; the caller uses it to start synthesis while
//! decoding continues. Cancellation is cooperative: the loop consults the
//! caller's predicate between chunks and exits early without error.

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::services::sse::{SseEvent, SseParser};
use crate::services::{http_client, ServiceError};

/// Default model for ordinary prompts.
pub const SMALL_CHAT_MODEL: &str = "gpt-4o-mini";
/// Model used when the optimized prompt exceeds the size threshold.
pub const LARGE_CHAT_MODEL: &str = "gpt-4o";
/// Hard cap on reply length; phone turns are short.
pub const REPLY_MAX_TOKENS: u64 = 250;

/// Sentence terminators for the early-start scan. Opening punctuation
/// (`¿`, `¡`) never terminates.
const SENTENCE_TERMINATORS: &[char] = &['.', '!', '?'];
/// Minimum char index of a qualifying terminator.
const MIN_TERMINATOR_INDEX: usize = 10;
/// Minimum char length of a qualifying sentence prefix.
const MIN_PREFIX_CHARS: usize = 20;

// ---------------------------------------------------------------------------
// Conversation messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One role-tagged message of the conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Request body for `/chat/completions`.
#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    stream_options: StreamOptions,
    temperature: f64,
    max_tokens: u64,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

/// A single SSE chunk from the streaming endpoint.
#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<UsageInfo>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageInfo {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// Token counts reported by the provider for one completion.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Outcome of one streaming completion.
#[derive(Debug, Default)]
pub struct StreamOutcome {
    /// Accumulated reply text (possibly partial when interrupted).
    pub text: String,
    pub usage: Option<TokenUsage>,
    /// Whether the caller's cancellation predicate ended the stream early.
    pub interrupted: bool,
}

// ---------------------------------------------------------------------------
// First-sentence scan
// ---------------------------------------------------------------------------

/// Byte offset just past the first complete sentence, if any.
///
/// A terminator in `.!?` qualifies when its char index is at least
/// [`MIN_TERMINATOR_INDEX`] and the prefix through it is at least
/// [`MIN_PREFIX_CHARS`] chars; shorter candidates are skipped and the scan
/// continues.
pub fn first_sentence_end(text: &str) -> Option<usize> {
    for (char_idx, (byte_idx, c)) in text.char_indices().enumerate() {
        if SENTENCE_TERMINATORS.contains(&c)
            && char_idx >= MIN_TERMINATOR_INDEX
            && char_idx + 1 >= MIN_PREFIX_CHARS
        {
            return Some(byte_idx + c.len_utf8());
        }
    }
    None
}

// ---------------------------------------------------------------------------
// LlmClient
// ---------------------------------------------------------------------------

/// OpenAI-compatible streaming chat client.
pub struct LlmClient {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl LlmClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            client: http_client(),
        }
    }

    /// Builder: set a custom API base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Run one streaming completion.
    ///
    /// `on_first_sentence` fires at most once, before this future resolves,
    /// with the first complete sentence of the reply. `cancelled` is polled
    /// between chunks; when it returns true the stream is dropped and the
    /// partial outcome returned with `interrupted` set.
    pub async fn stream_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
        temperature: f64,
        mut on_first_sentence: impl FnMut(&str),
        mut cancelled: impl FnMut() -> bool,
    ) -> Result<StreamOutcome, ServiceError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatCompletionRequest {
            model,
            messages,
            stream: true,
            stream_options: StreamOptions {
                include_usage: true,
            },
            temperature,
            max_tokens: REPLY_MAX_TOKENS,
        };

        debug!(model, messages = messages.len(), "starting streaming chat completion");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Status {
                service: "llm",
                status: status.as_u16(),
                body,
            });
        }

        let mut outcome = StreamOutcome::default();
        let mut first_sentence_fired = false;
        let mut sse_parser = SseParser::new();
        let mut byte_stream = response.bytes_stream();

        'stream: while let Some(chunk_result) = byte_stream.next().await {
            if cancelled() {
                debug!("completion stream superseded, stopping decode");
                outcome.interrupted = true;
                break;
            }

            let chunk = match chunk_result {
                Ok(c) => c,
                Err(e) => {
                    warn!(error = %e, "error reading completion stream");
                    break;
                }
            };

            let text = match std::str::from_utf8(&chunk) {
                Ok(t) => t,
                Err(_) => {
                    warn!("non-UTF-8 data in completion stream, skipping chunk");
                    continue;
                }
            };

            for event in sse_parser.feed(text) {
                let data = match event {
                    SseEvent::Done => break 'stream,
                    SseEvent::Data(data) => data,
                };

                let chunk: ChatCompletionChunk = match serde_json::from_str(&data) {
                    Ok(c) => c,
                    Err(e) => {
                        warn!(error = %e, data = %data, "failed to parse completion chunk");
                        continue;
                    }
                };

                if let Some(usage) = chunk.usage {
                    outcome.usage = Some(TokenUsage {
                        prompt_tokens: usage.prompt_tokens,
                        completion_tokens: usage.completion_tokens,
                    });
                }

                let delta = chunk
                    .choices
                    .first()
                    .and_then(|c| c.delta.as_ref())
                    .and_then(|d| d.content.as_deref());
                if let Some(content) = delta {
                    if !content.is_empty() {
                        outcome.text.push_str(content);

                        if !first_sentence_fired {
                            if let Some(end) = first_sentence_end(&outcome.text) {
                                first_sentence_fired = true;
                                on_first_sentence(&outcome.text[..end]);
                            }
                        }
                    }
                }
            }
        }

        debug!(
            chars = outcome.text.len(),
            interrupted = outcome.interrupted,
            "completion stream finished"
        );
        Ok(outcome)
    }
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sentence_basic() {
        let text = "Claro que sí, con mucho gusto. Le explico los detalles.";
        let end = first_sentence_end(text).unwrap();
        assert_eq!(&text[..end], "Claro que sí, con mucho gusto.");
    }

    #[test]
    fn test_first_sentence_too_short_prefix_skipped() {
        // "Sí, claro." ends at char index 9 -- below both minimums, so the
        // scan continues to the next terminator.
        let text = "Sí, claro. Ahora le cuento todos los pasos a seguir.";
        let end = first_sentence_end(text).unwrap();
        assert_eq!(
            &text[..end],
            "Sí, claro. Ahora le cuento todos los pasos a seguir."
        );
    }

    #[test]
    fn test_first_sentence_none_without_terminator() {
        assert!(first_sentence_end("todavía no hay frase completa").is_none());
        assert!(first_sentence_end("").is_none());
    }

    #[test]
    fn test_first_sentence_opening_punctuation_ignored() {
        // The inverted marks must not terminate anything.
        let text = "¿Cómo está usted hoy? Me alegro mucho.";
        let end = first_sentence_end(text).unwrap();
        assert_eq!(&text[..end], "¿Cómo está usted hoy?");
    }

    #[test]
    fn test_first_sentence_exclamation() {
        let text = "¡Perfecto, quedamos así entonces! Le mando los datos.";
        let end = first_sentence_end(text).unwrap();
        assert_eq!(&text[..end], "¡Perfecto, quedamos así entonces!");
    }

    #[test]
    fn test_first_sentence_multibyte_boundary() {
        // Terminator right after a multi-byte char keeps byte offsets valid.
        let text = "La información ya está aquí. Segunda frase.";
        let end = first_sentence_end(text).unwrap();
        assert_eq!(&text[..end], "La información ya está aquí.");
    }

    #[test]
    fn test_request_serialization() {
        let messages = vec![ChatMessage::system("eres útil"), ChatMessage::user("hola")];
        let req = ChatCompletionRequest {
            model: SMALL_CHAT_MODEL,
            messages: &messages,
            stream: true,
            stream_options: StreamOptions {
                include_usage: true,
            },
            temperature: 0.5,
            max_tokens: REPLY_MAX_TOKENS,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["model"], "gpt-4o-mini");
        assert_eq!(json["stream"], true);
        assert_eq!(json["stream_options"]["include_usage"], true);
        assert_eq!(json["max_tokens"], 250);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hola");
    }

    #[test]
    fn test_chunk_parsing() {
        let chunk: ChatCompletionChunk = serde_json::from_str(
            r#"{"id":"c1","choices":[{"index":0,"delta":{"content":"Hola"}}]}"#,
        )
        .unwrap();
        assert_eq!(
            chunk.choices[0].delta.as_ref().unwrap().content.as_deref(),
            Some("Hola")
        );

        let usage_chunk: ChatCompletionChunk = serde_json::from_str(
            r#"{"id":"c2","choices":[],"usage":{"prompt_tokens":120,"completion_tokens":42}}"#,
        )
        .unwrap();
        let usage = usage_chunk.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 120);
        assert_eq!(usage.completion_tokens, 42);
    }

    #[test]
    fn test_message_constructors() {
        assert_eq!(ChatMessage::system("a").role, Role::System);
        assert_eq!(ChatMessage::user("b").role, Role::User);
        assert_eq!(ChatMessage::assistant("c").role, Role::Assistant);
        assert_eq!(Role::Assistant.as_str(), "assistant");
    }
}
