// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Relay backend client: agent configuration and the call-log sink.

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::AgentConfigRecord;
use crate::metrics::CallReport;
use crate::services::{http_client, ServiceError};

/// Header carrying the shared secret on every backend request.
const SECRET_HEADER: &str = "x-internal-secret";

#[derive(Debug, Serialize)]
struct AgentConfigRequest<'a> {
    #[serde(rename = "agentId")]
    agent_id: &'a str,
}

/// Client for the agent-config service and the call-log sink.
pub struct BackendClient {
    base_url: String,
    secret: Option<String>,
    client: reqwest::Client,
}

impl BackendClient {
    pub fn new(base_url: impl Into<String>, secret: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret,
            client: http_client(),
        }
    }

    fn with_secret(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.secret {
            Some(secret) => builder.header(SECRET_HEADER, secret),
            None => builder,
        }
    }

    /// Fetch the agent record for a call.
    ///
    /// Callers fall back to [`crate::config::AgentConfig::default`] on error
    /// so the call still answers.
    pub async fn fetch_agent_config(
        &self,
        agent_id: &str,
    ) -> Result<AgentConfigRecord, ServiceError> {
        let url = format!("{}/api/agent-config", self.base_url);
        let response = self
            .with_secret(self.client.post(&url))
            .json(&AgentConfigRequest { agent_id })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Status {
                service: "agent-config",
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        let record: AgentConfigRecord =
            serde_json::from_str(&body).map_err(|source| ServiceError::Parse {
                service: "agent-config",
                source,
            })?;
        debug!(agent_id, "agent config fetched");
        Ok(record)
    }

    /// Post the final per-call report. Failures are logged by the caller;
    /// there is no retry.
    pub async fn post_call_report(&self, report: &CallReport) -> Result<(), ServiceError> {
        let url = format!("{}/api/call-reports", self.base_url);
        let response = self
            .with_secret(self.client.post(&url))
            .json(report)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "call-log sink rejected report");
            return Err(ServiceError::Status {
                service: "call-log",
                status: status.as_u16(),
                body,
            });
        }

        debug!(call_log_id = %report.call_log_id, "call report delivered");
        Ok(())
    }
}

impl std::fmt::Debug for BackendClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendClient")
            .field("base_url", &self.base_url)
            .field("has_secret", &self.secret.is_some())
            .finish()
    }
}
