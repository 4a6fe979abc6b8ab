// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! WAV container framing for the transcription upload.
//!
//! Every turn the relay produces is narrowband telephony audio (16-bit PCM,
//! 8 kHz, mono), so the format fields of the header are fixed at compile
//! time; only the two size fields depend on the payload.

use crate::audio::TELEPHONY_SAMPLE_RATE;

/// Length of the RIFF/WAVE header preceding the sample data.
pub const WAV_HEADER_LEN: usize = 44;

const CHANNELS: u16 = 1;
const BITS_PER_SAMPLE: u16 = 16;
const BLOCK_ALIGN: u16 = CHANNELS * BITS_PER_SAMPLE / 8;
const BYTE_RATE: u32 = TELEPHONY_SAMPLE_RATE * BLOCK_ALIGN as u32;

/// Wrap one turn's PCM in a WAV container ready to post to the STT provider.
pub fn wrap_turn_pcm(pcm: &[u8]) -> Vec<u8> {
    let data_len = pcm.len().min(u32::MAX as usize) as u32;

    let mut wav = Vec::with_capacity(WAV_HEADER_LEN + pcm.len());

    // RIFF chunk: size counts everything after this field.
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&data_len.saturating_add(WAV_HEADER_LEN as u32 - 8).to_le_bytes());
    wav.extend_from_slice(b"WAVE");

    // "fmt " chunk: uncompressed PCM, mono, 8 kHz.
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes());
    wav.extend_from_slice(&CHANNELS.to_le_bytes());
    wav.extend_from_slice(&TELEPHONY_SAMPLE_RATE.to_le_bytes());
    wav.extend_from_slice(&BYTE_RATE.to_le_bytes());
    wav.extend_from_slice(&BLOCK_ALIGN.to_le_bytes());
    wav.extend_from_slice(&BITS_PER_SAMPLE.to_le_bytes());

    // "data" chunk.
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_len.to_le_bytes());
    wav.extend_from_slice(pcm);

    wav
}
