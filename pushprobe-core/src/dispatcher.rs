//! Notification dispatcher.
//!
//! Fans one message out to every active device of a user. Each device send is
//! an independent unit of work; failures are collected per device and the
//! configured [`DispatchPolicy`] decides whether the dispatch as a whole
//! succeeded. Sends already accepted by the gateway are never rolled back.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::credentials::{CredentialProvider, DelegatedToken, ServiceAccountCredentials};
use crate::models::{Device, DeviceOutcome, DispatchReport, Platform};
use crate::registry::DeviceRegistry;
use crate::secrets::SecretProvider;
use crate::test_runs::TestRuns;
use crate::{PushProbeError, Result};

pub const DEFAULT_FCM_API_BASE_URL: &str = "https://fcm.googleapis.com";

const E2E_PROBE_TYPE: &str = "e2e_test";

/// When a fan-out with per-device failures still counts as a success.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchPolicy {
    /// At least one device accepted the message (or there were none).
    #[default]
    AtLeastOne,
    /// Every device accepted the message.
    AllOrNothing,
}

impl DispatchPolicy {
    pub fn is_satisfied(&self, report: &DispatchReport) -> bool {
        if report.attempted == 0 {
            return true;
        }
        match self {
            Self::AtLeastOne => report.succeeded >= 1,
            Self::AllOrNothing => report.succeeded == report.attempted,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub api_base_url: String,
    /// Identifier handed to the secret provider for the service-account JSON.
    pub service_account_secret: String,
    pub timeout: Duration,
    pub policy: DispatchPolicy,
    pub max_concurrent_sends: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_FCM_API_BASE_URL.to_string(),
            service_account_secret: "fcm-service-account.json".to_string(),
            timeout: Duration::from_secs(30),
            policy: DispatchPolicy::AtLeastOne,
            max_concurrent_sends: 4,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DispatchRequest {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    /// Kept as the caller's JSON text so a payload that is not a flat
    /// string map can be forwarded verbatim.
    #[serde(default)]
    pub data: Option<Box<RawValue>>,
}

#[derive(Serialize)]
struct SendEnvelope<'a> {
    message: GatewayMessage<'a>,
}

#[derive(Serialize)]
struct GatewayMessage<'a> {
    token: &'a str,
    notification: Notification<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a BTreeMap<String, String>>,
}

#[derive(Serialize)]
struct Notification<'a> {
    title: &'a str,
    body: &'a str,
}

struct SendFailure {
    status: Option<u16>,
    message: String,
}

pub struct Dispatcher {
    registry: DeviceRegistry,
    test_runs: TestRuns,
    credentials: Arc<CredentialProvider>,
    secrets: Arc<dyn SecretProvider>,
    client: reqwest::Client,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(
        registry: DeviceRegistry,
        test_runs: TestRuns,
        credentials: Arc<CredentialProvider>,
        secrets: Arc<dyn SecretProvider>,
        config: DispatchConfig,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PushProbeError::upstream(None, format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            registry,
            test_runs,
            credentials,
            secrets,
            client,
            config,
        })
    }

    pub fn policy(&self) -> DispatchPolicy {
        self.config.policy
    }

    /// Send `request` to every active device of its user.
    ///
    /// A payload tagged as an e2e test records its `PENDING` test run before
    /// anything is sent, so the nonce is spent even if the dispatch later
    /// fails. Retry a failed e2e test with a fresh nonce.
    pub async fn dispatch(&self, request: &DispatchRequest) -> Result<DispatchReport> {
        if request.user_id.is_empty() || request.title.is_empty() || request.body.is_empty() {
            return Err(PushProbeError::Validation(
                "missing required fields: user_id, title, body".to_string(),
            ));
        }

        let devices = self
            .registry
            .list_active_devices(&request.user_id, &Platform::ALL)?;

        // Recorded before the fan-out so a fast client ack finds the run.
        if let Some(nonce) = e2e_nonce(request.data.as_deref()) {
            self.record_probe(&nonce, &request.user_id);
        }

        if devices.is_empty() {
            info!(user_id = %request.user_id, "no active devices, nothing to send");
            return Ok(DispatchReport::default());
        }

        let creds = self.load_credentials()?;
        let token = self.credentials.token_for(&creds).await?;
        let data = flatten_data(request.data.as_deref());
        let url = format!(
            "{}/v1/projects/{}/messages:send",
            self.config.api_base_url.trim_end_matches('/'),
            creds.project_id
        );

        let sends: Vec<_> = devices
            .iter()
            .map(|device| {
                let url = url.as_str();
                let token = &token;
                let data = data.as_ref();
                async move {
                    let result = self.send_one(url, token, device, request, data).await;
                    (device, result)
                }
            })
            .collect();

        let results: Vec<(&Device, std::result::Result<(), SendFailure>)> = stream::iter(sends)
            .buffer_unordered(self.config.max_concurrent_sends.max(1))
            .collect()
            .await;

        let mut report = DispatchReport {
            attempted: results.len(),
            ..DispatchReport::default()
        };
        let mut token_rejected = false;

        for (device, result) in results {
            match result {
                Ok(()) => {
                    report.succeeded += 1;
                    report.outcomes.push(DeviceOutcome {
                        device_id: device.device_id.clone(),
                        platform: device.platform,
                        delivered: true,
                        error: None,
                    });
                }
                Err(failure) => {
                    token_rejected |= failure.status == Some(401);
                    warn!(
                        user_id = %request.user_id,
                        device_id = %device.device_id,
                        status = ?failure.status,
                        error = %failure.message,
                        "push send failed"
                    );
                    report.outcomes.push(DeviceOutcome {
                        device_id: device.device_id.clone(),
                        platform: device.platform,
                        delivered: false,
                        error: Some(failure.message),
                    });
                }
            }
        }

        if token_rejected {
            self.credentials.invalidate().await;
        }

        if !self.config.policy.is_satisfied(&report) {
            error!(
                user_id = %request.user_id,
                attempted = report.attempted,
                succeeded = report.succeeded,
                policy = ?self.config.policy,
                "dispatch failed"
            );
            return Err(PushProbeError::upstream(
                None,
                format!(
                    "delivered to {} of {} devices",
                    report.succeeded, report.attempted
                ),
            ));
        }

        info!(
            user_id = %request.user_id,
            attempted = report.attempted,
            succeeded = report.succeeded,
            "dispatch complete"
        );
        Ok(report)
    }

    fn load_credentials(&self) -> Result<ServiceAccountCredentials> {
        let raw = self.secrets.get_secret(&self.config.service_account_secret)?;
        ServiceAccountCredentials::from_json(&raw)
    }

    fn record_probe(&self, nonce: &str, user_id: &str) {
        if let Err(e) = self.test_runs.create_pending(nonce, user_id) {
            warn!(nonce, user_id, error = %e, "failed to create test run record");
        }
    }

    async fn send_one(
        &self,
        url: &str,
        token: &DelegatedToken,
        device: &Device,
        request: &DispatchRequest,
        data: Option<&BTreeMap<String, String>>,
    ) -> std::result::Result<(), SendFailure> {
        let envelope = SendEnvelope {
            message: GatewayMessage {
                token: &device.fcm_token,
                notification: Notification {
                    title: &request.title,
                    body: &request.body,
                },
                data,
            },
        };

        let response = self
            .client
            .post(url)
            .bearer_auth(token.expose())
            .json(&envelope)
            .send()
            .await
            .map_err(|e| SendFailure {
                status: None,
                message: format!("send request failed: {}", e),
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(SendFailure {
            status: Some(status.as_u16()),
            message: format!("gateway returned {}: {}", status.as_u16(), body),
        })
    }
}

/// The nonce of a payload tagged `{"type": "e2e_test", "nonce": "<non-empty>"}`.
pub fn e2e_nonce(data: Option<&RawValue>) -> Option<String> {
    let value: Value = serde_json::from_str(data?.get()).ok()?;
    let object = value.as_object()?;
    if object.get("type")?.as_str()? != E2E_PROBE_TYPE {
        return None;
    }
    object
        .get("nonce")?
        .as_str()
        .filter(|nonce| !nonce.is_empty())
        .map(str::to_string)
}

/// The gateway only takes a flat string map as `data`. Anything else is
/// wrapped as `{"data": "<raw json>"}` with the caller's text untouched.
pub fn flatten_data(data: Option<&RawValue>) -> Option<BTreeMap<String, String>> {
    let raw = data?.get();
    if raw.trim() == "null" {
        return None;
    }

    match serde_json::from_str::<BTreeMap<String, String>>(raw) {
        Ok(flat) => (!flat.is_empty()).then_some(flat),
        Err(_) => {
            warn!(raw, "data payload is not a flat string map, wrapping it");
            Some(BTreeMap::from([("data".to_string(), raw.to_string())]))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialConfig;
    use crate::models::TestRunStatus;
    use crate::secrets::InMemorySecretProvider;
    use crate::storage::Storage;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RSA_KEY: &str = include_str!("../tests/fixtures/test_rsa_key.pem");
    const SECRET_ID: &str = "fcm-service-account.json";
    const SEND_PATH: &str = "/v1/projects/probe-project/messages:send";

    struct Harness {
        server: MockServer,
        registry: DeviceRegistry,
        test_runs: TestRuns,
        dispatcher: Dispatcher,
    }

    async fn harness(policy: DispatchPolicy) -> Harness {
        let server = MockServer::start().await;
        let storage = Storage::in_memory().unwrap();
        let registry = DeviceRegistry::new(storage.clone());
        let test_runs = TestRuns::new(storage);

        let service_account = json!({
            "type": "service_account",
            "project_id": "probe-project",
            "private_key_id": "kid-1",
            "private_key": RSA_KEY,
            "client_email": "pusher@probe-project.iam.gserviceaccount.com",
            "token_uri": format!("{}/token", server.uri()),
        });
        let secrets = InMemorySecretProvider::new().with_secret(SECRET_ID, service_account.to_string());

        let dispatcher = Dispatcher::new(
            registry.clone(),
            test_runs.clone(),
            Arc::new(CredentialProvider::new(CredentialConfig::default()).unwrap()),
            Arc::new(secrets),
            DispatchConfig {
                api_base_url: server.uri(),
                policy,
                ..DispatchConfig::default()
            },
        )
        .unwrap();

        Harness {
            server,
            registry,
            test_runs,
            dispatcher,
        }
    }

    async fn mount_token(server: &MockServer, expected_calls: u64) {
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "ya29.test",
                "token_type": "Bearer",
                "expires_in": 3600,
            })))
            .expect(expected_calls)
            .mount(server)
            .await;
    }

    async fn mount_send(server: &MockServer, fcm_token: &str, status: u16) {
        Mock::given(method("POST"))
            .and(path(SEND_PATH))
            .and(header("authorization", "Bearer ya29.test"))
            .and(body_partial_json(json!({ "message": { "token": fcm_token } })))
            .respond_with(ResponseTemplate::new(status).set_body_json(json!({ "name": "m/1" })))
            .mount(server)
            .await;
    }

    fn raw(text: &str) -> Box<RawValue> {
        RawValue::from_string(text.to_string()).unwrap()
    }

    fn request(user_id: &str, data: Option<Value>) -> DispatchRequest {
        DispatchRequest {
            user_id: user_id.to_string(),
            title: "Hello".to_string(),
            body: "World".to_string(),
            data: data.map(|v| serde_json::value::to_raw_value(&v).unwrap()),
        }
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn test_dispatch_future_is_send() {
        let storage = Storage::in_memory().unwrap();
        let dispatcher = Dispatcher::new(
            DeviceRegistry::new(storage.clone()),
            TestRuns::new(storage),
            Arc::new(CredentialProvider::new(CredentialConfig::default()).unwrap()),
            Arc::new(InMemorySecretProvider::new()),
            DispatchConfig::default(),
        )
        .unwrap();
        let req = request("alice", None);

        // Handlers spawn this future on a multi-threaded runtime.
        let fut = dispatcher.dispatch(&req);
        assert_send(&fut);
    }

    #[test]
    fn test_flatten_data_rules() {
        assert_eq!(flatten_data(None), None);
        assert_eq!(flatten_data(Some(&raw("null"))), None);
        assert_eq!(flatten_data(Some(&raw("{}"))), None);

        let flat = flatten_data(Some(&raw(r#"{"type":"e2e_test","nonce":"n"}"#))).unwrap();
        assert_eq!(flat.get("type").map(String::as_str), Some("e2e_test"));
        assert_eq!(flat.len(), 2);

        let wrapped = flatten_data(Some(&raw(r#"{"count":3}"#))).unwrap();
        assert_eq!(wrapped.len(), 1);
        assert_eq!(wrapped["data"], r#"{"count":3}"#);

        let wrapped = flatten_data(Some(&raw(r#"["a","b"]"#))).unwrap();
        assert_eq!(wrapped["data"], r#"["a","b"]"#);
    }

    #[test]
    fn test_wrapped_data_keeps_caller_text() {
        let text = r#"{"z":{"n":12345678901234567890123},"a":1}"#;

        let wrapped = flatten_data(Some(&raw(text))).unwrap();
        assert_eq!(wrapped.len(), 1);
        assert_eq!(wrapped["data"], text);
    }

    #[test]
    fn test_request_data_survives_deserialization_verbatim() {
        let req: DispatchRequest = serde_json::from_str(
            r#"{"user_id":"u","title":"t","body":"b","data":{"z":[1.50],"a":18446744073709551616}}"#,
        )
        .unwrap();
        assert_eq!(
            req.data.as_deref().map(RawValue::get),
            Some(r#"{"z":[1.50],"a":18446744073709551616}"#)
        );

        let req: DispatchRequest =
            serde_json::from_str(r#"{"user_id":"u","title":"t","body":"b","data":null}"#).unwrap();
        assert!(flatten_data(req.data.as_deref()).is_none());
    }

    #[test]
    fn test_e2e_nonce_detection() {
        assert_eq!(
            e2e_nonce(Some(&raw(r#"{"type":"e2e_test","nonce":"abc123"}"#))),
            Some("abc123".to_string())
        );
        assert_eq!(e2e_nonce(Some(&raw(r#"{"type":"e2e_test","nonce":""}"#))), None);
        assert_eq!(e2e_nonce(Some(&raw(r#"{"type":"e2e_test"}"#))), None);
        assert_eq!(e2e_nonce(Some(&raw(r#"{"type":"chat","nonce":"x"}"#))), None);
        assert_eq!(e2e_nonce(Some(&raw(r#"{"type":"e2e_test","nonce":7}"#))), None);
        assert_eq!(e2e_nonce(Some(&raw(r#""e2e_test""#))), None);
        assert_eq!(e2e_nonce(None), None);
    }

    #[test]
    fn test_policy_evaluation() {
        let report = |attempted, succeeded| DispatchReport {
            attempted,
            succeeded,
            outcomes: Vec::new(),
        };
        assert!(DispatchPolicy::AtLeastOne.is_satisfied(&report(0, 0)));
        assert!(DispatchPolicy::AtLeastOne.is_satisfied(&report(3, 1)));
        assert!(!DispatchPolicy::AtLeastOne.is_satisfied(&report(3, 0)));
        assert!(DispatchPolicy::AllOrNothing.is_satisfied(&report(0, 0)));
        assert!(!DispatchPolicy::AllOrNothing.is_satisfied(&report(3, 2)));
        assert!(DispatchPolicy::AllOrNothing.is_satisfied(&report(3, 3)));
    }

    #[tokio::test]
    async fn test_zero_devices_is_vacuous_success() {
        let h = harness(DispatchPolicy::AtLeastOne).await;

        let report = h.dispatcher.dispatch(&request("nobody", None)).await.unwrap();
        assert_eq!(report.attempted, 0);
        assert_eq!(report.succeeded, 0);
        assert!(h.server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tagged_probe_creates_pending_run() {
        let h = harness(DispatchPolicy::AtLeastOne).await;

        h.dispatcher
            .dispatch(&request(
                "alice",
                Some(json!({"type": "e2e_test", "nonce": "abc123"})),
            ))
            .await
            .unwrap();

        let run = h.test_runs.get_status("abc123").unwrap();
        assert_eq!(run.status, TestRunStatus::Pending);
        assert!(run.acked_at.is_none());

        h.test_runs.acknowledge("abc123").unwrap();
        assert_eq!(
            h.test_runs.get_status("abc123").unwrap().status,
            TestRunStatus::Acked
        );
        assert!(matches!(
            h.test_runs.acknowledge("abc123"),
            Err(PushProbeError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_fan_out_sends_one_message_per_device() {
        let h = harness(DispatchPolicy::AtLeastOne).await;
        mount_token(&h.server, 1).await;
        mount_send(&h.server, "tok-a", 200).await;
        mount_send(&h.server, "tok-i", 200).await;
        h.registry.register("alice", "A", "android", "tok-a").unwrap();
        h.registry.register("alice", "I", "ios", "tok-i").unwrap();
        h.registry.register("bob", "B", "android", "tok-b").unwrap();

        let report = h
            .dispatcher
            .dispatch(&request("alice", Some(json!({"kind": "greeting"}))))
            .await
            .unwrap();
        assert_eq!(report.attempted, 2);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failures().count(), 0);

        let sends: Vec<Value> = h
            .server
            .received_requests()
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.url.path() == SEND_PATH)
            .map(|r| serde_json::from_slice(&r.body).unwrap())
            .collect();
        assert_eq!(sends.len(), 2);
        for send in &sends {
            assert_eq!(send["message"]["notification"]["title"], "Hello");
            assert_eq!(send["message"]["notification"]["body"], "World");
            assert_eq!(send["message"]["data"]["kind"], "greeting");
        }
    }

    #[tokio::test]
    async fn test_message_without_data_omits_field() {
        let h = harness(DispatchPolicy::AtLeastOne).await;
        mount_token(&h.server, 1).await;
        mount_send(&h.server, "tok-a", 200).await;
        h.registry.register("alice", "A", "android", "tok-a").unwrap();

        h.dispatcher.dispatch(&request("alice", None)).await.unwrap();

        let send = h
            .server
            .received_requests()
            .await
            .unwrap()
            .into_iter()
            .find(|r| r.url.path() == SEND_PATH)
            .unwrap();
        let body: Value = serde_json::from_slice(&send.body).unwrap();
        assert!(body["message"].get("data").is_none());
    }

    #[tokio::test]
    async fn test_partial_failure_continues_and_reports() {
        let h = harness(DispatchPolicy::AtLeastOne).await;
        mount_token(&h.server, 1).await;
        mount_send(&h.server, "tok-bad", 404).await;
        mount_send(&h.server, "tok-good", 200).await;
        h.registry.register("alice", "BAD", "android", "tok-bad").unwrap();
        h.registry.register("alice", "GOOD", "ios", "tok-good").unwrap();

        let report = h.dispatcher.dispatch(&request("alice", None)).await.unwrap();
        assert_eq!(report.attempted, 2);
        assert_eq!(report.succeeded, 1);

        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].device_id, "BAD");
        assert!(failures[0].error.as_deref().unwrap().contains("404"));
    }

    #[tokio::test]
    async fn test_all_or_nothing_rejects_partial_delivery() {
        let h = harness(DispatchPolicy::AllOrNothing).await;
        mount_token(&h.server, 1).await;
        mount_send(&h.server, "tok-bad", 500).await;
        mount_send(&h.server, "tok-good", 200).await;
        h.registry.register("alice", "BAD", "android", "tok-bad").unwrap();
        h.registry.register("alice", "GOOD", "ios", "tok-good").unwrap();

        let err = h.dispatcher.dispatch(&request("alice", None)).await.unwrap_err();
        assert!(matches!(err, PushProbeError::Upstream { .. }));
        assert!(err.to_string().contains("1 of 2"));
    }

    #[tokio::test]
    async fn test_every_send_failing_is_upstream_error() {
        let h = harness(DispatchPolicy::AtLeastOne).await;
        mount_token(&h.server, 1).await;
        mount_send(&h.server, "tok-a", 503).await;
        h.registry.register("alice", "A", "android", "tok-a").unwrap();

        let err = h.dispatcher.dispatch(&request("alice", None)).await.unwrap_err();
        assert!(matches!(err, PushProbeError::Upstream { .. }));
    }

    #[tokio::test]
    async fn test_audit_failure_does_not_fail_dispatch() {
        let h = harness(DispatchPolicy::AtLeastOne).await;
        mount_token(&h.server, 1).await;
        mount_send(&h.server, "tok-a", 200).await;
        h.registry.register("alice", "A", "android", "tok-a").unwrap();
        h.test_runs.create_pending("reused", "alice").unwrap();

        let report = h
            .dispatcher
            .dispatch(&request(
                "alice",
                Some(json!({"type": "e2e_test", "nonce": "reused"})),
            ))
            .await
            .unwrap();
        assert_eq!(report.succeeded, 1);
    }

    #[tokio::test]
    async fn test_token_failure_aborts_before_sending() {
        let h = harness(DispatchPolicy::AtLeastOne).await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid_client"))
            .mount(&h.server)
            .await;
        h.registry.register("alice", "A", "android", "tok-a").unwrap();

        let err = h.dispatcher.dispatch(&request("alice", None)).await.unwrap_err();
        assert!(matches!(err, PushProbeError::Upstream { status: Some(401), .. }));

        let sent = h
            .server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.url.path() == SEND_PATH)
            .count();
        assert_eq!(sent, 0);
    }

    #[tokio::test]
    async fn test_failed_dispatch_still_spends_nonce() {
        let h = harness(DispatchPolicy::AtLeastOne).await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&h.server)
            .await;
        h.registry.register("alice", "A", "android", "tok-a").unwrap();
        let tagged = request("alice", Some(json!({"type": "e2e_test", "nonce": "once"})));

        assert!(h.dispatcher.dispatch(&tagged).await.is_err());
        assert_eq!(
            h.test_runs.get_status("once").unwrap().status,
            TestRunStatus::Pending
        );
        assert!(matches!(
            h.test_runs.create_pending("once", "alice"),
            Err(PushProbeError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_service_account_is_secret_error() {
        let server = MockServer::start().await;
        let storage = Storage::in_memory().unwrap();
        let registry = DeviceRegistry::new(storage.clone());
        registry.register("alice", "A", "android", "tok-a").unwrap();

        let dispatcher = Dispatcher::new(
            registry,
            TestRuns::new(storage),
            Arc::new(CredentialProvider::new(CredentialConfig::default()).unwrap()),
            Arc::new(InMemorySecretProvider::new()),
            DispatchConfig {
                api_base_url: server.uri(),
                ..DispatchConfig::default()
            },
        )
        .unwrap();

        let err = dispatcher.dispatch(&request("alice", None)).await.unwrap_err();
        assert!(matches!(err, PushProbeError::Secret(_)));
    }

    #[tokio::test]
    async fn test_rejected_token_is_not_reused() {
        let h = harness(DispatchPolicy::AtLeastOne).await;
        mount_token(&h.server, 2).await;
        mount_send(&h.server, "tok-a", 401).await;
        h.registry.register("alice", "A", "android", "tok-a").unwrap();

        assert!(h.dispatcher.dispatch(&request("alice", None)).await.is_err());
        assert!(h.dispatcher.dispatch(&request("alice", None)).await.is_err());
    }

    #[tokio::test]
    async fn test_cached_token_shared_across_dispatches() {
        let h = harness(DispatchPolicy::AtLeastOne).await;
        mount_token(&h.server, 1).await;
        mount_send(&h.server, "tok-a", 200).await;
        h.registry.register("alice", "A", "android", "tok-a").unwrap();

        h.dispatcher.dispatch(&request("alice", None)).await.unwrap();
        h.dispatcher.dispatch(&request("alice", None)).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_fields_are_validation_errors() {
        let h = harness(DispatchPolicy::AtLeastOne).await;
        let mut req = request("alice", None);
        req.title.clear();

        let err = h.dispatcher.dispatch(&req).await.unwrap_err();
        assert!(matches!(err, PushProbeError::Validation(_)));
    }
}
