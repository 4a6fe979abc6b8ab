// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Process settings and per-agent configuration.
//!
//! [`Settings`] is read once from the environment at startup. [`AgentConfig`]
//! is fetched per call from the agent-config service; missing fields fall
//! back to the documented defaults so a call still answers when the config
//! service is degraded.

use std::env;

use serde::Deserialize;

use crate::metrics::CostRates;
use crate::vad::VadTuning;

/// Default ElevenLabs voice used when the agent record carries none.
pub const DEFAULT_VOICE_ID: &str = "21m00Tcm4TlvDq8ikWAM";
/// Default TTS model (supports ulaw_8000 output).
pub const DEFAULT_TTS_MODEL: &str = "eleven_turbo_v2_5";
/// Default sampling temperature for chat completion.
pub const DEFAULT_TEMPERATURE: f64 = 0.5;

const DEFAULT_SYSTEM_PROMPT: &str =
    "Eres un asistente telefónico amable y profesional. Responde de forma \
     breve y conversacional; estás en una llamada de voz.";

// ---------------------------------------------------------------------------
// Process settings (environment)
// ---------------------------------------------------------------------------

/// Service-wide settings loaded from the environment.
///
/// Provider keys are optional here: a missing STT key terminates the
/// individual session at start (with a logged error) rather than the process,
/// so `/health` keeps answering.
#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub deepgram_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub elevenlabs_api_key: Option<String>,
    /// Base URL of the agent-config service and call-log sink.
    pub backend_base_url: String,
    /// Shared secret sent to the backend on every request.
    pub internal_api_secret: Option<String>,
    /// Deployment mode reported by `/health`.
    pub mode: String,
    pub cost_rates: CostRates,
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            deepgram_api_key: env::var("DEEPGRAM_API_KEY").ok(),
            openai_api_key: env::var("OPENAI_API_KEY").ok(),
            elevenlabs_api_key: env::var("ELEVENLABS_API_KEY").ok(),
            backend_base_url: env::var("BACKEND_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            internal_api_secret: env::var("INTERNAL_API_SECRET").ok(),
            mode: env::var("RELAY_MODE").unwrap_or_else(|_| "production".to_string()),
            cost_rates: cost_rates_from_env(),
        }
    }
}

fn env_f64(name: &str) -> Option<f64> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

fn cost_rates_from_env() -> CostRates {
    let defaults = CostRates::default();
    CostRates {
        stt_per_minute: env_f64("COST_STT_PER_MINUTE").unwrap_or(defaults.stt_per_minute),
        llm_input_per_mtok: env_f64("COST_LLM_INPUT_PER_MTOK")
            .unwrap_or(defaults.llm_input_per_mtok),
        llm_output_per_mtok: env_f64("COST_LLM_OUTPUT_PER_MTOK")
            .unwrap_or(defaults.llm_output_per_mtok),
        tts_per_mchar: env_f64("COST_TTS_PER_MCHAR").unwrap_or(defaults.tts_per_mchar),
    }
}

// ---------------------------------------------------------------------------
// Agent configuration
// ---------------------------------------------------------------------------

/// Immutable per-session agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub system_prompt: String,
    /// Spoken before any user turn when present.
    pub greeting: Option<String>,
    pub voice_id: String,
    pub tts_model: String,
    /// `None` requests provider-side language detection.
    pub stt_language: Option<String>,
    /// Domain keywords hinted to the STT provider.
    pub keywords: Vec<String>,
    pub vad: VadTuning,
    pub temperature: f64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            greeting: None,
            voice_id: DEFAULT_VOICE_ID.to_string(),
            tts_model: DEFAULT_TTS_MODEL.to_string(),
            stt_language: None,
            keywords: Vec::new(),
            vad: VadTuning::default(),
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

/// Raw agent record as returned by the config service. Every field is
/// optional; [`AgentConfigRecord::into_config`] applies defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentConfigRecord {
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub greeting: Option<String>,
    #[serde(default)]
    pub voice_id: Option<String>,
    #[serde(default)]
    pub tts_model: Option<String>,
    #[serde(default)]
    pub stt_language: Option<String>,
    #[serde(default)]
    pub keywords: Option<Vec<String>>,
    #[serde(default)]
    pub silence_threshold_db: Option<f64>,
    #[serde(default)]
    pub silence_duration_ms: Option<u64>,
    #[serde(default)]
    pub prefix_padding_ms: Option<u64>,
    #[serde(default)]
    pub temperature: Option<f64>,
}

impl AgentConfigRecord {
    pub fn into_config(self) -> AgentConfig {
        let defaults = AgentConfig::default();
        let vad_defaults = VadTuning::default();
        AgentConfig {
            system_prompt: self
                .system_prompt
                .filter(|p| !p.trim().is_empty())
                .unwrap_or(defaults.system_prompt),
            greeting: self.greeting.filter(|g| !g.trim().is_empty()),
            voice_id: self.voice_id.unwrap_or(defaults.voice_id),
            tts_model: self.tts_model.unwrap_or(defaults.tts_model),
            stt_language: self.stt_language.filter(|l| !l.is_empty()),
            keywords: self.keywords.unwrap_or_default(),
            vad: VadTuning {
                silence_threshold_db: self
                    .silence_threshold_db
                    .unwrap_or(vad_defaults.silence_threshold_db),
                silence_duration_ms: self
                    .silence_duration_ms
                    .unwrap_or(vad_defaults.silence_duration_ms),
                prefix_padding_ms: self
                    .prefix_padding_ms
                    .unwrap_or(vad_defaults.prefix_padding_ms),
            },
            temperature: self.temperature.unwrap_or(defaults.temperature),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_record_falls_back_to_defaults() {
        let config = AgentConfigRecord::default().into_config();
        assert_eq!(config.voice_id, DEFAULT_VOICE_ID);
        assert_eq!(config.tts_model, DEFAULT_TTS_MODEL);
        assert!(config.greeting.is_none());
        assert!(config.stt_language.is_none());
        assert!((config.temperature - DEFAULT_TEMPERATURE).abs() < f64::EPSILON);
        assert!((config.vad.silence_threshold_db - (-40.0)).abs() < f64::EPSILON);
        assert_eq!(config.vad.silence_duration_ms, 800);
        assert_eq!(config.vad.prefix_padding_ms, 300);
    }

    #[test]
    fn test_record_overrides_applied() {
        let record: AgentConfigRecord = serde_json::from_str(
            r#"{
                "system_prompt": "Eres Ana, asesora de ventas.",
                "greeting": "¡Hola! Soy Ana.",
                "voice_id": "voice-x",
                "stt_language": "es",
                "keywords": ["hipoteca", "interés"],
                "silence_duration_ms": 600,
                "temperature": 0.3
            }"#,
        )
        .unwrap();

        let config = record.into_config();
        assert_eq!(config.system_prompt, "Eres Ana, asesora de ventas.");
        assert_eq!(config.greeting.as_deref(), Some("¡Hola! Soy Ana."));
        assert_eq!(config.voice_id, "voice-x");
        assert_eq!(config.stt_language.as_deref(), Some("es"));
        assert_eq!(config.keywords, vec!["hipoteca", "interés"]);
        assert_eq!(config.vad.silence_duration_ms, 600);
        assert_eq!(config.vad.prefix_padding_ms, 300); // untouched default
        assert!((config.temperature - 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn test_blank_prompt_and_greeting_ignored() {
        let record = AgentConfigRecord {
            system_prompt: Some("   ".to_string()),
            greeting: Some("".to_string()),
            ..Default::default()
        };
        let config = record.into_config();
        assert!(!config.system_prompt.trim().is_empty());
        assert!(config.greeting.is_none());
    }
}
