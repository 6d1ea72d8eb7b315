//! Relay server configuration.

use pushprobe_core::dispatcher::DEFAULT_FCM_API_BASE_URL;
use pushprobe_core::{
    CredentialConfig, DispatchConfig, DispatchPolicy, EnvSecretProvider, FileSecretProvider,
    SecretProvider,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretSource {
    File,
    Env,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub listen_addr: String,
    pub storage_path: PathBuf,
    pub max_payload_size: usize,
    /// Sends per user per minute. 0 disables throttling.
    pub rate_limit_per_minute: u32,
    /// 0 keeps test runs forever.
    pub test_run_retention_days: u64,
    pub cleanup_interval_secs: u64,
    pub secret_source: SecretSource,
    pub secrets_dir: PathBuf,
    pub service_account_secret: String,
    /// Secret holding the HS256 key that signs operator bearer tokens.
    pub auth_secret: String,
    pub fcm_api_base_url: String,
    pub http_timeout_secs: u64,
    pub token_refresh_margin_secs: u64,
    pub dispatch_policy: DispatchPolicy,
    pub max_concurrent_sends: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8744".to_string(),
            storage_path: PathBuf::from("pushprobe.db"),
            max_payload_size: 65_536,
            rate_limit_per_minute: 60,
            test_run_retention_days: 30,
            cleanup_interval_secs: 3600,
            secret_source: SecretSource::File,
            secrets_dir: PathBuf::from("secrets"),
            service_account_secret: "fcm-service-account.json".to_string(),
            auth_secret: "relay-auth-secret".to_string(),
            fcm_api_base_url: DEFAULT_FCM_API_BASE_URL.to_string(),
            http_timeout_secs: 30,
            token_refresh_margin_secs: 300,
            dispatch_policy: DispatchPolicy::AtLeastOne,
            max_concurrent_sends: 4,
        }
    }
}

impl RelayConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml_dep::from_str(&content)?;
        Ok(config)
    }

    pub fn credential_config(&self) -> CredentialConfig {
        CredentialConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            refresh_margin: Duration::from_secs(self.token_refresh_margin_secs),
            ..CredentialConfig::default()
        }
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            api_base_url: self.fcm_api_base_url.clone(),
            service_account_secret: self.service_account_secret.clone(),
            timeout: Duration::from_secs(self.http_timeout_secs),
            policy: self.dispatch_policy,
            max_concurrent_sends: self.max_concurrent_sends,
        }
    }

    pub fn secret_provider(&self) -> Arc<dyn SecretProvider> {
        match self.secret_source {
            SecretSource::File => Arc::new(FileSecretProvider::new(&self.secrets_dir)),
            SecretSource::Env => Arc::new(EnvSecretProvider),
        }
    }
}
