// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Playback-token gate: the at-most-one-speaker invariant.
//!
//! Each session owns one monotonic counter guarding the carrier's downstream
//! audio. An attempt to speak captures the current token; any later increment
//! (new turn, barge-in) invalidates that capture, and every outbound frame
//! and every streaming read re-checks validity before proceeding. The gate is
//! also the call-ended latch: once ended, no capture is ever valid again.
//!
//! This is the sole cancellation channel for outbound audio and streaming
//! decode; there are no ambient cancellation exceptions. Spawned work holds a
//! captured token by value plus a cheap clone of the gate handle.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// A captured position of the playback counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackToken(u64);

/// Session-scoped playback gate. Clones share the same counter and latch.
#[derive(Debug, Clone, Default)]
pub struct PlaybackGate {
    inner: Arc<GateInner>,
}

#[derive(Debug, Default)]
struct GateInner {
    token: AtomicU64,
    call_ended: AtomicBool,
}

impl PlaybackGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read and remember the current token.
    pub fn capture(&self) -> PlaybackToken {
        PlaybackToken(self.inner.token.load(Ordering::Acquire))
    }

    /// Invalidate every prior capture and return a fresh one.
    pub fn bump(&self) -> PlaybackToken {
        let next = self.inner.token.fetch_add(1, Ordering::AcqRel) + 1;
        PlaybackToken(next)
    }

    /// Whether a captured token still owns the speaker.
    ///
    /// A capture is valid iff it equals the current counter and the call has
    /// not ended.
    pub fn still_valid(&self, token: PlaybackToken) -> bool {
        !self.call_ended() && self.inner.token.load(Ordering::Acquire) == token.0
    }

    /// Latch the end of the call. Idempotent; invalidates all captures.
    pub fn end_call(&self) {
        self.inner.call_ended.store(true, Ordering::Release);
    }

    pub fn call_ended(&self) -> bool {
        self.inner.call_ended.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_is_valid_until_bump() {
        let gate = PlaybackGate::new();
        let token = gate.capture();
        assert!(gate.still_valid(token));

        gate.bump();
        assert!(!gate.still_valid(token));
    }

    #[test]
    fn test_bump_returns_current_capture() {
        let gate = PlaybackGate::new();
        let fresh = gate.bump();
        assert!(gate.still_valid(fresh));
        assert_eq!(fresh, gate.capture());
    }

    #[test]
    fn test_successive_bumps_invalidate_each_prior() {
        let gate = PlaybackGate::new();
        let first = gate.bump();
        let second = gate.bump();
        assert!(!gate.still_valid(first));
        assert!(gate.still_valid(second));
    }

    #[test]
    fn test_end_call_invalidates_everything() {
        let gate = PlaybackGate::new();
        let token = gate.capture();
        gate.end_call();
        assert!(gate.call_ended());
        assert!(!gate.still_valid(token));
        // Even a post-latch capture is never valid.
        assert!(!gate.still_valid(gate.capture()));
    }

    #[test]
    fn test_end_call_is_idempotent() {
        let gate = PlaybackGate::new();
        gate.end_call();
        gate.end_call();
        assert!(gate.call_ended());
    }

    #[test]
    fn test_clones_share_state() {
        let gate = PlaybackGate::new();
        let token = gate.capture();
        let clone = gate.clone();

        clone.bump();
        assert!(!gate.still_valid(token));

        clone.end_call();
        assert!(gate.call_ended());
    }
}
