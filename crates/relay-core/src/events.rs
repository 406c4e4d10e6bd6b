//! Well-known channels and the event payloads published on them.
//!
//! Business services are free to send arbitrary `(type, payload)` pairs;
//! these types cover the notifications the hub was built for so publishers
//! and clients agree on field names.

use serde::{Deserialize, Serialize};

/// Channel carrying task-state changes.
pub const TASK_UPDATES: &str = "task_updates";

/// Channel carrying account-status changes.
pub const ACCOUNT_STATUS: &str = "account_status";

/// Channel carrying operator/system notices.
pub const SYSTEM_NOTICES: &str = "system_notices";

/// A task changed state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskUpdate {
    pub task_id: u64,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TaskUpdate {
    /// Event `type` used on the wire.
    pub const EVENT_TYPE: &'static str = "task_update";

    pub fn new(task_id: u64, status: impl Into<String>) -> Self {
        Self {
            task_id,
            status: status.into(),
            progress: None,
            message: None,
        }
    }
}

/// An account's status changed (e.g. banned, rate limited, recovered).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountStatusChange {
    pub account_id: u64,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AccountStatusChange {
    pub const EVENT_TYPE: &'static str = "account_status";
}

/// Severity of a system notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Warning,
    Critical,
}

/// A notice addressed to every subscribed client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemNotice {
    pub level: NoticeLevel,
    pub title: String,
    pub message: String,
}

impl SystemNotice {
    pub const EVENT_TYPE: &'static str = "system_notice";
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_update_omits_empty_fields() {
        let update = TaskUpdate::new(7, "done");
        assert_eq!(
            serde_json::to_value(&update).unwrap(),
            json!({"task_id": 7, "status": "done"})
        );
    }

    #[test]
    fn test_notice_level_wire_names() {
        let notice = SystemNotice {
            level: NoticeLevel::Warning,
            title: "Maintenance".to_string(),
            message: "Back in 5 minutes".to_string(),
        };
        let value = serde_json::to_value(&notice).unwrap();
        assert_eq!(value["level"], "warning");
    }
}
