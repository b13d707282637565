use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::Id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    /// Waiting for its execution time
    Pending,
    /// Applied by the server
    Executed,
    /// Withdrawn before execution
    Cancelled,
}

impl ScheduleStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ScheduleStatus::Pending)
    }

    /// Statuses only move forward: `pending -> executed | cancelled`.
    pub fn can_transition_to(&self, next: ScheduleStatus) -> bool {
        *self == next || *self == ScheduleStatus::Pending
    }
}

/// Deferred actuation bound to a `led` widget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEntry {
    /// Server-assigned identifier
    pub id: Id,
    /// Target actuator widget
    pub widget_id: Id,
    /// State applied on execution
    pub desired_state: bool,
    /// Absolute execution instant, computed by the server for timers
    #[serde(with = "super::timestamp")]
    pub execute_at: OffsetDateTime,
    /// Relative delay the entry was created with, for timer-style entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u64>,
    /// Optional user label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Lifecycle status
    pub status: ScheduleStatus,
}

impl ScheduleEntry {
    pub fn is_pending(&self) -> bool {
        self.status == ScheduleStatus::Pending
    }

    pub fn is_timer(&self) -> bool {
        self.duration_seconds.is_some()
    }
}

/// When a new entry should fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScheduleTime {
    /// Absolute instant
    At {
        #[serde(rename = "executeAt", with = "super::timestamp")]
        execute_at: OffsetDateTime,
    },
    /// Relative delay, resolved to an instant by the server
    After {
        #[serde(rename = "durationSeconds")]
        duration_seconds: u64,
    },
}

/// Body of a schedule or timer creation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateScheduleRequest {
    /// State applied on execution
    pub desired_state: bool,
    /// Execution time
    #[serde(flatten)]
    pub time: ScheduleTime,
    /// Optional user label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl CreateScheduleRequest {
    pub fn at(desired_state: bool, execute_at: OffsetDateTime) -> Self {
        Self {
            desired_state,
            time: ScheduleTime::At { execute_at },
            label: None,
        }
    }

    pub fn after(desired_state: bool, duration_seconds: u64) -> Self {
        Self {
            desired_state,
            time: ScheduleTime::After { duration_seconds },
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Rejects requests that could never fire.
    pub fn validate(&self, now: OffsetDateTime) -> Result<(), String> {
        match self.time {
            ScheduleTime::At { execute_at } if execute_at <= now => {
                Err(format!("execution time {execute_at} is not in the future"))
            }
            ScheduleTime::After { duration_seconds: 0 } => {
                Err("timer duration must be at least one second".to_string())
            }
            _ => Ok(()),
        }
    }
}
