// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Deepgram batch speech-to-text client.
//!
//! Each finalized turn is wrapped in a WAV container and posted to
//! `/v1/listen` as a single request; the relay's VAD already delimits
//! utterances, so streaming recognition buys nothing here and batch mode
//! keeps the provider stateless.

use serde::Deserialize;
use tracing::debug;

use crate::services::{http_client, ServiceError};

/// Result of transcribing one turn.
#[derive(Debug, Clone, Default)]
pub struct Transcription {
    pub text: String,
    pub confidence: f64,
    /// Spoken audio duration billed by the provider, in seconds.
    pub duration_secs: f64,
}

// ---------------------------------------------------------------------------
// Deepgram JSON response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct DgResponse {
    #[serde(default)]
    metadata: Option<DgMetadata>,
    #[serde(default)]
    results: Option<DgResults>,
}

#[derive(Debug, Deserialize)]
struct DgMetadata {
    #[serde(default)]
    duration: f64,
}

#[derive(Debug, Deserialize)]
struct DgResults {
    #[serde(default)]
    channels: Vec<DgChannel>,
}

#[derive(Debug, Deserialize)]
struct DgChannel {
    #[serde(default)]
    alternatives: Vec<DgAlternative>,
}

#[derive(Debug, Deserialize)]
struct DgAlternative {
    #[serde(default)]
    transcript: String,
    #[serde(default)]
    confidence: f64,
}

// ---------------------------------------------------------------------------
// SttClient
// ---------------------------------------------------------------------------

/// Batch transcription client for Deepgram's pre-recorded API.
pub struct SttClient {
    api_key: String,
    model: String,
    /// Language hint; `None` requests provider-side detection.
    language: Option<String>,
    /// Domain keywords boosted during recognition.
    keywords: Vec<String>,
    base_url: String,
    client: reqwest::Client,
}

impl SttClient {
    /// Create a client with the default model (`nova-2`).
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: "nova-2".to_string(),
            language: None,
            keywords: Vec::new(),
            base_url: "https://api.deepgram.com".to_string(),
            client: http_client(),
        }
    }

    /// Builder: set the Deepgram model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Builder: set the language hint (omit for detection).
    pub fn with_language(mut self, language: Option<String>) -> Self {
        self.language = language;
        self
    }

    /// Builder: set recognition keywords.
    pub fn with_keywords(mut self, keywords: Vec<String>) -> Self {
        self.keywords = keywords;
        self
    }

    /// Builder: set a custom API base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Query parameters for the listen request.
    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("model", self.model.clone()),
            ("smart_format", "true".to_string()),
            ("punctuate", "true".to_string()),
            ("encoding", "linear16".to_string()),
            ("sample_rate", "8000".to_string()),
        ];
        match &self.language {
            Some(lang) => pairs.push(("language", lang.clone())),
            None => pairs.push(("detect_language", "true".to_string())),
        }
        for keyword in &self.keywords {
            pairs.push(("keywords", keyword.clone()));
        }
        pairs
    }

    /// Transcribe one WAV-wrapped turn.
    pub async fn transcribe(&self, wav: Vec<u8>) -> Result<Transcription, ServiceError> {
        let url = format!("{}/v1/listen", self.base_url);

        let response = self
            .client
            .post(&url)
            .query(&self.query_pairs())
            .header("Authorization", format!("Token {}", self.api_key))
            .header("Content-Type", "audio/wav")
            .body(wav)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Status {
                service: "deepgram",
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        let parsed: DgResponse =
            serde_json::from_str(&body).map_err(|source| ServiceError::Parse {
                service: "deepgram",
                source,
            })?;

        let duration_secs = parsed.metadata.map(|m| m.duration).unwrap_or(0.0);
        let alternative = parsed
            .results
            .and_then(|r| r.channels.into_iter().next())
            .and_then(|c| c.alternatives.into_iter().next());

        let transcription = match alternative {
            Some(alt) => Transcription {
                text: alt.transcript,
                confidence: alt.confidence,
                duration_secs,
            },
            None => Transcription {
                duration_secs,
                ..Default::default()
            },
        };

        debug!(
            text = %transcription.text,
            confidence = transcription.confidence,
            duration_secs,
            "transcription complete"
        );
        Ok(transcription)
    }
}

impl std::fmt::Debug for SttClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SttClient")
            .field("model", &self.model)
            .field("language", &self.language)
            .field("keywords", &self.keywords.len())
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_pairs_with_language() {
        let stt = SttClient::new("key")
            .with_language(Some("es".to_string()))
            .with_keywords(vec!["hipoteca".to_string(), "interés".to_string()]);
        let pairs = stt.query_pairs();

        assert!(pairs.contains(&("model", "nova-2".to_string())));
        assert!(pairs.contains(&("encoding", "linear16".to_string())));
        assert!(pairs.contains(&("sample_rate", "8000".to_string())));
        assert!(pairs.contains(&("smart_format", "true".to_string())));
        assert!(pairs.contains(&("punctuate", "true".to_string())));
        assert!(pairs.contains(&("language", "es".to_string())));
        assert!(!pairs.iter().any(|(k, _)| *k == "detect_language"));
        let keywords: Vec<_> = pairs.iter().filter(|(k, _)| *k == "keywords").collect();
        assert_eq!(keywords.len(), 2);
    }

    #[test]
    fn test_query_pairs_without_language_requests_detection() {
        let pairs = SttClient::new("key").query_pairs();
        assert!(pairs.contains(&("detect_language", "true".to_string())));
        assert!(!pairs.iter().any(|(k, _)| *k == "language"));
    }

    #[test]
    fn test_parse_transcription_response() {
        let json = r#"{
            "metadata": { "duration": 2.14 },
            "results": {
                "channels": [{
                    "alternatives": [{
                        "transcript": "quiero información sobre la hipoteca",
                        "confidence": 0.97
                    }]
                }]
            }
        }"#;

        let parsed: DgResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.metadata.unwrap().duration, 2.14);
        let alt = &parsed.results.unwrap().channels[0].alternatives[0];
        assert_eq!(alt.transcript, "quiero información sobre la hipoteca");
        assert_eq!(alt.confidence, 0.97);
    }

    #[test]
    fn test_parse_empty_results() {
        let json = r#"{"metadata": {"duration": 0.5}, "results": {"channels": []}}"#;
        let parsed: DgResponse = serde_json::from_str(json).unwrap();
        assert!(parsed.results.unwrap().channels.is_empty());
    }

    #[test]
    fn test_base_url_trailing_slash_stripped() {
        let stt = SttClient::new("key").with_base_url("http://localhost:9999/");
        assert_eq!(stt.base_url, "http://localhost:9999");
    }
}
