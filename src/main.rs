// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! voice-relay process entry: HTTP server exposing the carrier WebSocket
//! endpoint and a health probe.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use voice_relay::config::Settings;
use voice_relay::session::{self, SessionQuery};

#[derive(Clone)]
struct AppState {
    settings: Arc<Settings>,
}

/// GET /health - static liveness probe.
async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "mode": state.settings.mode,
    }))
}

/// GET /ws - carrier WebSocket endpoint.
async fn handle_ws(
    ws: WebSocketUpgrade,
    Query(query): Query<SessionQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| session::run(socket, state.settings.clone(), query))
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,voice_relay=debug".parse().unwrap()),
        )
        .init();

    let settings = Arc::new(Settings::from_env());
    let port = settings.port;

    if settings.deepgram_api_key.is_none() {
        tracing::warn!("DEEPGRAM_API_KEY not set; sessions will be refused");
    }

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/ws", get(handle_ws))
        .with_state(AppState { settings });

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "voice-relay listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind listen address");
    axum::serve(listener, app)
        .await
        .expect("server terminated unexpectedly");
}
