// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Per-call accounting: stage latencies, provider usage, cost estimation,
//! and the end-of-call report posted to the call-log sink.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Latency accumulation
// ---------------------------------------------------------------------------

/// Running average for one pipeline stage's latency.
#[derive(Debug, Clone, Copy, Default)]
pub struct LatencyStat {
    sum_ms: f64,
    count: u64,
}

impl LatencyStat {
    pub fn record(&mut self, ms: f64) {
        self.sum_ms += ms;
        self.count += 1;
    }

    /// Average in milliseconds; 0 when nothing was recorded.
    pub fn avg_ms(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.sum_ms / self.count as f64
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

// ---------------------------------------------------------------------------
// Usage counters
// ---------------------------------------------------------------------------

/// Provider usage accumulated across a call.
#[derive(Debug, Clone, Default)]
pub struct UsageTracker {
    /// Assistant speech turns (greeting included).
    pub turns_count: u64,
    /// Audio seconds billed by the STT provider.
    pub stt_duration_sec: f64,
    pub llm_input_tokens: u64,
    pub llm_output_tokens: u64,
    pub tts_characters: u64,
    pub stt_latency: LatencyStat,
    pub llm_latency: LatencyStat,
    pub tts_latency: LatencyStat,
}

impl UsageTracker {
    /// Estimated provider spend for the call under the given rates.
    pub fn estimated_cost(&self, rates: &CostRates) -> f64 {
        let stt = self.stt_duration_sec / 60.0 * rates.stt_per_minute;
        let llm = self.llm_input_tokens as f64 / 1_000_000.0 * rates.llm_input_per_mtok
            + self.llm_output_tokens as f64 / 1_000_000.0 * rates.llm_output_per_mtok;
        let tts = self.tts_characters as f64 / 1_000_000.0 * rates.tts_per_mchar;
        stt + llm + tts
    }
}

/// Per-unit provider rates. Defaults match the billed list prices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostRates {
    /// STT dollars per audio minute.
    pub stt_per_minute: f64,
    /// LLM dollars per 1M input tokens.
    pub llm_input_per_mtok: f64,
    /// LLM dollars per 1M output tokens.
    pub llm_output_per_mtok: f64,
    /// TTS dollars per 1M characters.
    pub tts_per_mchar: f64,
}

impl Default for CostRates {
    fn default() -> Self {
        Self {
            stt_per_minute: 0.0043,
            llm_input_per_mtok: 0.15,
            llm_output_per_mtok: 0.60,
            tts_per_mchar: 30.0,
        }
    }
}

// ---------------------------------------------------------------------------
// End-of-call report
// ---------------------------------------------------------------------------

/// Terminal status recorded in the call report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Completed,
    Error,
}

/// One transcript line (role-tagged text).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: String,
    pub content: String,
}

/// Usage block of the final report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageReport {
    pub turns_count: u64,
    pub stt_duration_sec: f64,
    pub llm_input_tokens: u64,
    pub llm_output_tokens: u64,
    pub tts_characters: u64,
    pub estimated_cost: f64,
    pub voice_activity_percent: f64,
    pub avg_latency_stt_ms: f64,
    pub avg_latency_llm_ms: f64,
    pub avg_latency_tts_ms: f64,
}

/// The final per-call document posted to the call-log sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallReport {
    pub call_log_id: String,
    pub duration_seconds: f64,
    pub transcript: Vec<TranscriptEntry>,
    pub status: CallStatus,
    pub ended_at: String,
    pub usage: UsageReport,
}

/// `ended_at` stamp for the report: epoch seconds with millisecond
/// precision, `Z`-suffixed.
fn ended_at_now() -> String {
    let elapsed = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}.{:03}Z", elapsed.as_secs(), elapsed.subsec_millis())
}

/// Assemble the final report from the call's accumulated state, stamped with
/// the current time.
pub fn build_report(
    call_log_id: String,
    duration_seconds: f64,
    transcript: Vec<TranscriptEntry>,
    status: CallStatus,
    usage: &UsageTracker,
    voice_activity_percent: f64,
    rates: &CostRates,
) -> CallReport {
    CallReport {
        call_log_id,
        duration_seconds,
        transcript,
        status,
        ended_at: ended_at_now(),
        usage: UsageReport {
            turns_count: usage.turns_count,
            stt_duration_sec: usage.stt_duration_sec,
            llm_input_tokens: usage.llm_input_tokens,
            llm_output_tokens: usage.llm_output_tokens,
            tts_characters: usage.tts_characters,
            estimated_cost: usage.estimated_cost(rates),
            voice_activity_percent,
            avg_latency_stt_ms: usage.stt_latency.avg_ms(),
            avg_latency_llm_ms: usage.llm_latency.avg_ms(),
            avg_latency_tts_ms: usage.tts_latency.avg_ms(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_stat_average() {
        let mut stat = LatencyStat::default();
        assert_eq!(stat.avg_ms(), 0.0);
        stat.record(100.0);
        stat.record(300.0);
        assert_eq!(stat.count(), 2);
        assert!((stat.avg_ms() - 200.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_default_rates() {
        let rates = CostRates::default();
        assert!((rates.stt_per_minute - 0.0043).abs() < f64::EPSILON);
        assert!((rates.llm_input_per_mtok - 0.15).abs() < f64::EPSILON);
        assert!((rates.llm_output_per_mtok - 0.60).abs() < f64::EPSILON);
        assert!((rates.tts_per_mchar - 30.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_estimated_cost() {
        let usage = UsageTracker {
            stt_duration_sec: 120.0, // 2 minutes
            llm_input_tokens: 1_000_000,
            llm_output_tokens: 500_000,
            tts_characters: 100_000,
            ..Default::default()
        };
        let cost = usage.estimated_cost(&CostRates::default());
        // 2 * 0.0043 + 0.15 + 0.30 + 3.0
        assert!((cost - 3.4586).abs() < 1e-9, "got {cost}");
    }

    #[test]
    fn test_estimated_cost_zero_usage() {
        let usage = UsageTracker::default();
        assert_eq!(usage.estimated_cost(&CostRates::default()), 0.0);
    }

    #[test]
    fn test_report_json_shape() {
        let mut usage = UsageTracker {
            turns_count: 3,
            stt_duration_sec: 14.5,
            llm_input_tokens: 2400,
            llm_output_tokens: 310,
            tts_characters: 800,
            ..Default::default()
        };
        usage.stt_latency.record(420.0);
        usage.llm_latency.record(910.0);
        usage.tts_latency.record(350.0);

        let report = build_report(
            "log-42".to_string(),
            63.2,
            vec![TranscriptEntry {
                role: "assistant".to_string(),
                content: "Hola, ¿en qué puedo ayudarte?".to_string(),
            }],
            CallStatus::Completed,
            &usage,
            37.5,
            &CostRates::default(),
        );

        assert!(report.ended_at.ends_with('Z'));
        assert!(report.ended_at.contains('.'));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["call_log_id"], "log-42");
        assert_eq!(json["status"], "completed");
        assert_eq!(json["usage"]["turns_count"], 3);
        assert_eq!(json["usage"]["llm_input_tokens"], 2400);
        assert_eq!(json["usage"]["voice_activity_percent"], 37.5);
        assert_eq!(json["usage"]["avg_latency_stt_ms"], 420.0);
        assert_eq!(json["transcript"][0]["role"], "assistant");
        assert!(json["usage"]["estimated_cost"].as_f64().unwrap() > 0.0);
    }
}
