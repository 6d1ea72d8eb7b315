//! HTTP client for the pushprobe relay.

use anyhow::{anyhow, bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::time::{sleep, Instant};

#[derive(Debug, Deserialize, Serialize)]
pub struct RegisterResponse {
    pub ok: bool,
    pub outcome: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SendFailure {
    pub device_id: String,
    pub error: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SendResponse {
    pub ok: bool,
    pub sent_count: usize,
    #[serde(default)]
    pub attempted: usize,
    #[serde(default)]
    pub failures: Vec<SendFailure>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct StatusResponse {
    pub nonce: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acked_at: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct UsersResponse {
    pub ok: bool,
    pub users: Vec<String>,
    pub count: usize,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: String,
    #[serde(default)]
    message: String,
}

/// How an end-to-end probe ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Acked { acked_at: Option<String> },
    TimedOut,
}

pub struct ProbeClient {
    client: reqwest::Client,
    api_url: String,
    api_token: Option<String>,
}

impl ProbeClient {
    pub fn new(api_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_token: None,
        })
    }

    /// Bearer token presented on operator routes such as the user listing.
    pub fn with_api_token(mut self, token: Option<String>) -> Self {
        self.api_token = token.filter(|t| !t.is_empty());
        self
    }

    pub async fn register(
        &self,
        user_id: &str,
        device_id: &str,
        fcm_token: &str,
        platform: &str,
    ) -> Result<RegisterResponse> {
        let body = serde_json::json!({
            "user_id": user_id,
            "device_id": device_id,
            "fcm_token": fcm_token,
            "platform": platform,
        });
        self.post("/devices/register", &body).await
    }

    pub async fn send(
        &self,
        user_id: &str,
        title: &str,
        body: &str,
        data: Option<Value>,
    ) -> Result<SendResponse> {
        let mut payload = serde_json::json!({
            "user_id": user_id,
            "title": title,
            "body": body,
        });
        if let Some(data) = data {
            payload["data"] = data;
        }
        self.post("/messages/send", &payload).await
    }

    pub async fn ack(&self, nonce: &str) -> Result<()> {
        let _: Value = self
            .post("/test/ack", &serde_json::json!({ "nonce": nonce }))
            .await?;
        Ok(())
    }

    pub async fn status(&self, nonce: &str) -> Result<StatusResponse> {
        let url = format!("{}/test/status", self.api_url);
        let response = self
            .client
            .get(&url)
            .query(&[("nonce", nonce)])
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;
        Self::decode(response).await
    }

    pub async fn users(&self) -> Result<UsersResponse> {
        let url = format!("{}/users", self.api_url);
        let mut request = self.client.get(&url);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;
        Self::decode(response).await
    }

    /// Poll the status of `nonce` until it is acknowledged or `timeout` passes.
    /// Individual poll failures are logged and retried.
    pub async fn wait_for_ack(
        &self,
        nonce: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> ProbeOutcome {
        let deadline = Instant::now() + timeout;

        while Instant::now() < deadline {
            match self.status(nonce).await {
                Ok(status) if status.status.eq_ignore_ascii_case("ACKED") => {
                    return ProbeOutcome::Acked {
                        acked_at: status.acked_at,
                    };
                }
                Ok(status) => tracing::debug!(nonce, status = %status.status, "not acknowledged yet"),
                Err(e) => tracing::debug!(nonce, error = %e, "status poll failed"),
            }
            sleep(poll_interval).await;
        }

        ProbeOutcome::TimedOut
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let url = format!("{}{}", self.api_url, path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?;
        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        let text = response.text().await.context("failed to read response body")?;

        if !status.is_success() {
            match serde_json::from_str::<ErrorBody>(&text) {
                Ok(body) if !body.error.is_empty() => {
                    bail!("relay returned {} {}: {}", status.as_u16(), body.error, body.message)
                }
                _ => bail!("relay returned {}: {}", status.as_u16(), text),
            }
        }

        serde_json::from_str(&text).map_err(|e| anyhow!("invalid response body: {}", e))
    }
}
