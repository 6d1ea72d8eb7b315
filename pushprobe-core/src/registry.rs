//! Device registry.
//!
//! A `device_id` belongs to exactly one user. Registration is an upsert keyed
//! on `(user_id, device_id)`; the ownership check and the upsert run inside a
//! single IMMEDIATE transaction, and the unique index on `device_id` backs it
//! up for writers that bypass this module.

use chrono::Utc;
use rusqlite::{params_from_iter, OptionalExtension, TransactionBehavior};
use tracing::{debug, info};

use crate::models::{from_unix, Device, Platform, RegisterOutcome};
use crate::storage::Storage;
use crate::{is_constraint_violation, PushProbeError, Result};

#[derive(Clone)]
pub struct DeviceRegistry {
    storage: Storage,
}

impl DeviceRegistry {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// Register or refresh a device.
    ///
    /// Re-registering the same `(user_id, device_id)` replaces the token,
    /// reactivates the device and bumps `updated_at`. Registering a
    /// `device_id` already owned by another user is a conflict and changes
    /// nothing.
    pub fn register(
        &self,
        user_id: &str,
        device_id: &str,
        platform: &str,
        fcm_token: &str,
    ) -> Result<RegisterOutcome> {
        if user_id.is_empty() || device_id.is_empty() || fcm_token.is_empty() || platform.is_empty()
        {
            return Err(PushProbeError::Validation(
                "missing required fields: user_id, device_id, fcm_token, platform".to_string(),
            ));
        }
        let platform: Platform = platform.parse()?;

        let mut conn = self.storage.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let owner: Option<String> = tx
            .query_row(
                "SELECT user_id FROM devices WHERE device_id = ?1",
                [device_id],
                |row| row.get(0),
            )
            .optional()?;

        let outcome = match owner {
            Some(ref existing) if existing != user_id => {
                debug!(device_id, "device already owned by another user");
                return Err(PushProbeError::Conflict(format!(
                    "device_id '{}' already registered to another user",
                    device_id
                )));
            }
            Some(_) => RegisterOutcome::Updated,
            None => RegisterOutcome::Created,
        };

        let now = Utc::now().timestamp();
        tx.execute(
            "INSERT INTO devices (user_id, device_id, platform, fcm_token, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5, ?5)
             ON CONFLICT(user_id, device_id) DO UPDATE SET
                fcm_token = excluded.fcm_token,
                is_active = 1,
                updated_at = excluded.updated_at",
            rusqlite::params![user_id, device_id, platform.as_str(), fcm_token, now],
        )
        .map_err(|e| {
            if is_constraint_violation(&e) {
                PushProbeError::Conflict(format!(
                    "device_id '{}' already registered to another user",
                    device_id
                ))
            } else {
                e.into()
            }
        })?;

        tx.commit()?;

        info!(user_id, device_id, %platform, ?outcome, "device registered");
        Ok(outcome)
    }

    /// Distinct user ids that own at least one device row, ascending.
    pub fn list_users(&self) -> Result<Vec<String>> {
        let conn = self.storage.conn()?;
        let mut stmt = conn.prepare("SELECT DISTINCT user_id FROM devices ORDER BY user_id ASC")?;
        let users = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(users)
    }

    /// Active devices of `user_id` on any of `platforms`.
    pub fn list_active_devices(&self, user_id: &str, platforms: &[Platform]) -> Result<Vec<Device>> {
        if platforms.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = (0..platforms.len())
            .map(|i| format!("?{}", i + 2))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT user_id, device_id, platform, fcm_token, is_active, updated_at
             FROM devices
             WHERE user_id = ?1 AND is_active = 1 AND platform IN ({})
             ORDER BY id ASC",
            placeholders
        );

        let args = std::iter::once(user_id).chain(platforms.iter().map(|p| p.as_str()));

        let conn = self.storage.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(args), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, bool>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(user_id, device_id, platform, fcm_token, is_active, updated_at)| {
                Ok(Device {
                    user_id,
                    device_id,
                    platform: platform.parse().map_err(|_| {
                        PushProbeError::Storage(format!("unknown platform in store: {}", platform))
                    })?,
                    fcm_token,
                    is_active,
                    updated_at: from_unix(updated_at),
                })
            })
            .collect()
    }
}
