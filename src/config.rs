//! Audit store configuration

use crate::error::{AuditError, Result};
use serde::{Deserialize, Serialize};

/// Configuration for an `AuditStore` and its transports
///
/// Every field has a default, so a partial JSON document is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuditConfig {
    /// Channel name shared by every context on the bus
    pub channel_name: String,

    /// Storage key of the persisted settings snapshot
    pub settings_key: String,

    /// Storage key of the startup users snapshot
    pub snapshot_key: String,

    /// Maximum entries held in the pending buffer while paused
    pub pending_capacity: usize,

    /// Floor for the live log capacity regardless of the configured limit
    pub min_log_capacity: usize,

    /// Live log limit used when no settings are persisted
    pub default_limit: usize,

    /// Initial page size of the view
    pub default_page_size: usize,

    /// Per-channel buffer of the broadcast hub
    pub hub_capacity: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            channel_name: "mfe-bus-v1".to_string(),
            settings_key: "audit_widget_settings_v1".to_string(),
            snapshot_key: "mfe_users_v1".to_string(),
            pending_capacity: 1000,
            min_log_capacity: 50,
            default_limit: 500,
            default_page_size: 10,
            hub_capacity: 256,
        }
    }
}

impl AuditConfig {
    /// Parse a (possibly partial) JSON configuration document
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| AuditError::Config(format!("Invalid audit config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the store unusable
    pub fn validate(&self) -> Result<()> {
        if self.channel_name.is_empty() {
            return Err(AuditError::Config(
                "Channel name cannot be empty".to_string(),
            ));
        }
        if self.default_page_size == 0 {
            return Err(AuditError::Config(
                "Default page size must be >= 1".to_string(),
            ));
        }
        if self.hub_capacity == 0 {
            return Err(AuditError::Config(
                "Hub capacity must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}
