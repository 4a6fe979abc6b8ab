// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! End-to-end scenarios over the carrier-facing audio path: wire frames
//! through the serializer, the mu-law codec, and the turn segmenter, plus the
//! playback-gate properties the session relies on.

use voice_relay::audio::codec::{linear_to_mulaw, mulaw_to_pcm, rms_db};
use voice_relay::audio::wav::{wrap_turn_pcm, WAV_HEADER_LEN};
use voice_relay::playback::PlaybackGate;
use voice_relay::serializers::twilio::TwilioSerializer;
use voice_relay::serializers::{CarrierEvent, CarrierSerializer, OutboundFrame};
use voice_relay::session::BARGE_IN_THRESHOLD_DB;
use voice_relay::utils::encode_base64;
use voice_relay::vad::{TurnSegmenter, VadTuning};

/// One 20 ms carrier frame of constant-amplitude PCM, encoded as mu-law.
fn ulaw_frame(amplitude: i16) -> Vec<u8> {
    let sample = linear_to_mulaw(amplitude);
    vec![sample; 160]
}

/// Wrap a mu-law payload in a Twilio media message.
fn media_message(ulaw: &[u8]) -> String {
    format!(
        r#"{{"event": "media", "media": {{"payload": "{}"}}}}"#,
        encode_base64(ulaw)
    )
}

/// Push one wire-level media message through serializer + codec + segmenter.
fn feed(
    serializer: &TwilioSerializer,
    segmenter: &mut TurnSegmenter,
    ulaw: &[u8],
) -> Option<voice_relay::vad::Turn> {
    let event = serializer.deserialize(media_message(ulaw).as_bytes()).unwrap();
    let payload = match event {
        CarrierEvent::Media { payload } => payload,
        other => panic!("expected media event, got {other:?}"),
    };
    segmenter.push_frame(&mulaw_to_pcm(&payload))
}

// ---------------------------------------------------------------------------
// Scenario: happy path
// ---------------------------------------------------------------------------

#[test]
fn happy_path_emits_one_two_second_turn() {
    let serializer = TwilioSerializer::with_stream_sid("MZ-test");
    let mut segmenter = TurnSegmenter::new(VadTuning::default());

    // ~-20 dBFS tone, comfortably voiced at the -40 dB threshold.
    let voiced = ulaw_frame(3277);
    let silence = ulaw_frame(0);

    let mut turns = Vec::new();

    // 1 s of silence.
    for _ in 0..50 {
        assert!(feed(&serializer, &mut segmenter, &silence).is_none());
    }
    // 2 s of voiced tone.
    for _ in 0..100 {
        assert!(feed(&serializer, &mut segmenter, &voiced).is_none());
    }
    // 800 ms of trailing silence finalizes exactly one turn.
    for _ in 0..40 {
        if let Some(turn) = feed(&serializer, &mut segmenter, &silence) {
            turns.push(turn);
        }
    }

    assert_eq!(turns.len(), 1, "exactly one turn per utterance");
    let turn = &turns[0];
    assert_eq!(turn.duration_ms, 2000);

    // The turn's PCM wraps cleanly for the STT upload.
    let wav = wrap_turn_pcm(&turn.pcm);
    assert_eq!(&wav[0..4], b"RIFF");
    assert_eq!(wav.len(), WAV_HEADER_LEN + turn.pcm.len());

    let stats = segmenter.stats();
    assert_eq!(stats.frames_received, 190);
    assert_eq!(stats.frames_voiced, 100);
}

// ---------------------------------------------------------------------------
// Scenario: short blip discarded
// ---------------------------------------------------------------------------

#[test]
fn short_blip_produces_no_turn() {
    let serializer = TwilioSerializer::with_stream_sid("MZ-test");
    let mut segmenter = TurnSegmenter::new(VadTuning::default());

    let voiced = ulaw_frame(3277);
    let silence = ulaw_frame(0);

    for _ in 0..5 {
        assert!(feed(&serializer, &mut segmenter, &voiced).is_none());
    }
    for _ in 0..40 {
        assert!(
            feed(&serializer, &mut segmenter, &silence).is_none(),
            "a 100 ms blip must not become a turn"
        );
    }
}

// ---------------------------------------------------------------------------
// Scenario: barge-in thresholds
// ---------------------------------------------------------------------------

#[test]
fn barge_in_level_is_stricter_than_turn_level() {
    // A -30 dBFS frame (as in a real interruption) crosses the barge-in bar;
    // quieter room noise around -38 dBFS does not, though it would count as
    // voiced for turn detection.
    let loud = mulaw_to_pcm(&ulaw_frame(1036)); // ~-30 dBFS
    let noise = mulaw_to_pcm(&ulaw_frame(412)); // ~-38 dBFS

    assert!(rms_db(&loud) >= BARGE_IN_THRESHOLD_DB);
    assert!(rms_db(&noise) < BARGE_IN_THRESHOLD_DB);
    assert!(rms_db(&noise) >= VadTuning::default().silence_threshold_db);
}

// ---------------------------------------------------------------------------
// Scenario: playback gate under barge-in
// ---------------------------------------------------------------------------

#[test]
fn superseded_tokens_never_regain_validity() {
    let gate = PlaybackGate::new();

    // Greeting speaks under the initial token.
    let greeting = gate.capture();
    assert!(gate.still_valid(greeting));

    // First user turn supersedes the greeting.
    let turn1 = gate.bump();
    assert!(!gate.still_valid(greeting));
    assert!(gate.still_valid(turn1));

    // Barge-in supersedes the reply mid-playback.
    let barge = gate.bump();
    assert!(!gate.still_valid(turn1));
    assert!(gate.still_valid(barge));

    // Hangup invalidates everything, permanently.
    gate.end_call();
    assert!(!gate.still_valid(barge));
    assert!(!gate.still_valid(gate.capture()));
}

// ---------------------------------------------------------------------------
// Scenario: Telnyx output keys
// ---------------------------------------------------------------------------

#[test]
fn telnyx_start_drives_stream_id_outbound() {
    use voice_relay::serializers::{detect_provider, serializer_for, Provider};

    let start = r#"{"event":"start","stream_id":"st-9","start":{"call_control_id":"cc-9"}}"#;
    let provider = detect_provider(start).unwrap();
    assert_eq!(provider, Provider::Telnyx);

    let mut serializer = serializer_for(provider);
    let event = serializer.deserialize(start.as_bytes()).unwrap();
    let stream_id = match event {
        CarrierEvent::Start(s) => s.stream_id,
        other => panic!("expected start, got {other:?}"),
    };
    serializer.set_stream_id(stream_id);

    let json = serializer
        .serialize(&OutboundFrame::Media(vec![0xFF; 160]))
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed["stream_id"], "st-9");
    assert!(parsed.get("streamSid").is_none());
}
