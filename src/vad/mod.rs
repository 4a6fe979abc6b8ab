// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Energy-based voice activity detection and turn segmentation.
//!
//! [`TurnSegmenter`] converts a stream of 20 ms PCM frames into complete
//! [`Turn`]s. While idle it keeps a bounded ring of recent frames sized to
//! the configured prefix padding; the first voiced frame seeds the turn with
//! that pre-roll so word onsets are not clipped. While speaking, every frame
//! (voiced or not) is appended; a trailing silence run of at least the
//! configured duration finalizes the turn. Utterances shorter than
//! [`MIN_TURN_DURATION_MS`] are discarded as blips.
//!
//! Timing is derived from sample counts (stream time), which for in-order
//! real-time frames is equivalent to wall clock and keeps the machine
//! deterministic under test.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::audio::codec::rms_db;
use crate::audio::TELEPHONY_SAMPLE_RATE;

/// Minimum speech span for an utterance to be emitted as a turn.
pub const MIN_TURN_DURATION_MS: u64 = 300;

/// VAD tuning parameters, loaded per agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadTuning {
    /// Frames at or above this dBFS level count as voiced.
    pub silence_threshold_db: f64,
    /// Trailing silence required to end a turn.
    pub silence_duration_ms: u64,
    /// Pre-roll retained before speech start.
    pub prefix_padding_ms: u64,
}

impl Default for VadTuning {
    fn default() -> Self {
        Self {
            silence_threshold_db: -40.0,
            silence_duration_ms: 800,
            prefix_padding_ms: 300,
        }
    }
}

/// One complete user utterance.
#[derive(Debug)]
pub struct Turn {
    /// Linear PCM (16-bit LE, 8 kHz, mono): prefix pre-roll through the
    /// trailing silence.
    pub pcm: Vec<u8>,
    /// Measured speech span in milliseconds, excluding the trailing silence.
    pub duration_ms: u64,
}

/// Frame counters kept for the end-of-call report.
#[derive(Debug, Clone, Copy, Default)]
pub struct SegmenterStats {
    pub frames_received: u64,
    pub frames_voiced: u64,
}

impl SegmenterStats {
    /// Share of received frames that were voiced, as a percentage.
    pub fn voice_activity_percent(&self) -> f64 {
        if self.frames_received == 0 {
            return 0.0;
        }
        self.frames_voiced as f64 / self.frames_received as f64 * 100.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SegmenterState {
    Idle,
    Speaking,
}

/// Turn segmentation state machine.
///
/// Emits at most one [`Turn`] per utterance and never emits while still
/// hearing the same utterance.
pub struct TurnSegmenter {
    tuning: VadTuning,
    state: SegmenterState,
    /// Recent idle frames, bounded to `prefix_padding_ms` of audio.
    prefix_ring: VecDeque<Vec<u8>>,
    /// Total milliseconds currently held in the ring.
    prefix_ms: u64,
    /// PCM accumulated for the in-progress turn.
    turn_buf: Vec<u8>,
    /// Milliseconds elapsed since speech start (prefix excluded).
    turn_elapsed_ms: u64,
    /// Current run of trailing silence.
    silence_run_ms: u64,
    stats: SegmenterStats,
}

impl TurnSegmenter {
    pub fn new(tuning: VadTuning) -> Self {
        Self {
            tuning,
            state: SegmenterState::Idle,
            prefix_ring: VecDeque::with_capacity(16),
            prefix_ms: 0,
            turn_buf: Vec::new(),
            turn_elapsed_ms: 0,
            silence_run_ms: 0,
            stats: SegmenterStats::default(),
        }
    }

    /// Return the running frame counters.
    pub fn stats(&self) -> SegmenterStats {
        self.stats
    }

    /// Whether the segmenter is currently inside an utterance.
    pub fn in_turn(&self) -> bool {
        self.state == SegmenterState::Speaking
    }

    /// Feed one PCM frame (16-bit LE @ 8 kHz). Returns a completed [`Turn`]
    /// when the trailing-silence condition is met.
    pub fn push_frame(&mut self, pcm: &[u8]) -> Option<Turn> {
        if pcm.is_empty() {
            return None;
        }

        let frame_ms = (pcm.len() as u64 / 2) * 1000 / TELEPHONY_SAMPLE_RATE as u64;
        let level_db = rms_db(pcm);
        // Equality with the threshold counts as voiced.
        let voiced = level_db >= self.tuning.silence_threshold_db;

        self.stats.frames_received += 1;
        if voiced {
            self.stats.frames_voiced += 1;
        }

        match self.state {
            SegmenterState::Idle => {
                if voiced {
                    trace!(level_db, "speech start");
                    self.state = SegmenterState::Speaking;
                    self.turn_buf.clear();
                    for frame in self.prefix_ring.drain(..) {
                        self.turn_buf.extend_from_slice(&frame);
                    }
                    self.prefix_ms = 0;
                    self.turn_buf.extend_from_slice(pcm);
                    self.turn_elapsed_ms = frame_ms;
                    self.silence_run_ms = 0;
                } else {
                    self.prefix_ring.push_back(pcm.to_vec());
                    self.prefix_ms += frame_ms;
                    while self.prefix_ms > self.tuning.prefix_padding_ms {
                        match self.prefix_ring.pop_front() {
                            Some(evicted) => {
                                self.prefix_ms -= (evicted.len() as u64 / 2) * 1000
                                    / TELEPHONY_SAMPLE_RATE as u64;
                            }
                            None => break,
                        }
                    }
                }
                None
            }
            SegmenterState::Speaking => {
                self.turn_buf.extend_from_slice(pcm);
                self.turn_elapsed_ms += frame_ms;

                if voiced {
                    self.silence_run_ms = 0;
                    return None;
                }

                self.silence_run_ms += frame_ms;
                // Equality with the configured duration counts as long enough.
                if self.silence_run_ms >= self.tuning.silence_duration_ms {
                    return self.finalize();
                }
                None
            }
        }
    }

    /// Close out the in-progress utterance and reset to idle.
    fn finalize(&mut self) -> Option<Turn> {
        let speech_ms = self.turn_elapsed_ms.saturating_sub(self.silence_run_ms);
        let pcm = std::mem::take(&mut self.turn_buf);

        self.state = SegmenterState::Idle;
        self.turn_elapsed_ms = 0;
        self.silence_run_ms = 0;

        if speech_ms < MIN_TURN_DURATION_MS {
            debug!(speech_ms, "discarding short utterance");
            return None;
        }

        debug!(speech_ms, bytes = pcm.len(), "turn complete");
        Some(Turn {
            pcm,
            duration_ms: speech_ms,
        })
    }
}

impl std::fmt::Debug for TurnSegmenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnSegmenter")
            .field("state", &self.state)
            .field("tuning", &self.tuning)
            .field("turn_elapsed_ms", &self.turn_elapsed_ms)
            .field("silence_run_ms", &self.silence_run_ms)
            .field("stats", &self.stats)
            .finish()
    }
}
