// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Provider clients: speech-to-text, chat completion, speech synthesis, and
//! the relay's own backend (agent config + call-log sink).
//!
//! Providers are stateless HTTP endpoints. A failed provider call abandons
//! the current turn and is logged; it never tears down the session and is
//! never retried.

pub mod backend;
pub mod llm;
pub mod sse;
pub mod stt;
pub mod tts;

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by provider clients.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{service} returned HTTP {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("failed to parse {service} response: {source}")]
    Parse {
        service: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Shared HTTP client configuration for all provider clients.
pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(90))
        .connect_timeout(Duration::from_secs(10))
        .build()
        .expect("failed to build HTTP client")
}
