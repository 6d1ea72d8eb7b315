//! Shared model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::PushProbeError;

/// Client platform. Only these two are accepted at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Android,
    Ios,
}

impl Platform {
    /// Every platform the dispatcher fans out to.
    pub const ALL: [Platform; 2] = [Platform::Android, Platform::Ios];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Android => "android",
            Self::Ios => "ios",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = PushProbeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "android" => Ok(Self::Android),
            "ios" => Ok(Self::Ios),
            other => Err(PushProbeError::Validation(format!(
                "invalid platform: {} (must be 'android' or 'ios')",
                other
            ))),
        }
    }
}

/// A registered device row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub user_id: String,
    pub device_id: String,
    pub platform: Platform,
    pub fcm_token: String,
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
}

/// Whether a registration inserted a new row or refreshed an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterOutcome {
    Created,
    Updated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TestRunStatus {
    Pending,
    Acked,
}

impl TestRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Acked => "ACKED",
        }
    }
}

impl FromStr for TestRunStatus {
    type Err = PushProbeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "ACKED" => Ok(Self::Acked),
            other => Err(PushProbeError::Storage(format!(
                "unknown test run status in store: {}",
                other
            ))),
        }
    }
}

/// Public view of a test run. `acked_at` is only set once acknowledged.
#[derive(Debug, Clone, Serialize)]
pub struct TestRun {
    pub nonce: String,
    pub status: TestRunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acked_at: Option<DateTime<Utc>>,
}

/// Result of one device send inside a dispatch.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceOutcome {
    pub device_id: String,
    pub platform: Platform,
    pub delivered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregated per-device results of a dispatch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub outcomes: Vec<DeviceOutcome>,
}

impl DispatchReport {
    pub fn failures(&self) -> impl Iterator<Item = &DeviceOutcome> {
        self.outcomes.iter().filter(|o| !o.delivered)
    }
}

/// Convert a stored Unix-seconds timestamp.
pub(crate) fn from_unix(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_parses_only_known_values() {
        assert_eq!("android".parse::<Platform>().unwrap(), Platform::Android);
        assert_eq!("ios".parse::<Platform>().unwrap(), Platform::Ios);
        assert!(matches!(
            "Android".parse::<Platform>(),
            Err(PushProbeError::Validation(_))
        ));
        assert!("web".parse::<Platform>().is_err());
    }

    #[test]
    fn pending_run_omits_acked_at() {
        let run = TestRun {
            nonce: "abc".to_string(),
            status: TestRunStatus::Pending,
            acked_at: None,
        };
        let json = serde_json::to_value(&run).unwrap();
        assert_eq!(json["status"], "PENDING");
        assert!(json.get("acked_at").is_none());
    }
}
