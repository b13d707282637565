use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::{Id, WidgetRecord, WidgetValue};

/// Event pushed by the platform over the live stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A widget was created or changed server-side
    WidgetUpdate(WidgetUpdate),
    /// A widget was deleted server-side
    WidgetDeleted(WidgetDeleted),
    /// Fresh readings from a device
    TelemetryUpdate(TelemetryUpdate),
    /// A schedule entry fired
    ScheduleExecuted(ScheduleNotice),
    /// A schedule entry was withdrawn
    ScheduleCancelled(ScheduleNotice),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetUpdate {
    /// Dashboard the widget belongs to
    pub dashboard_id: Id,
    /// Device the widget is bound to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<Id>,
    /// Canonical record
    pub widget: WidgetRecord,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetDeleted {
    /// Dashboard the widget belonged to
    pub dashboard_id: Id,
    /// Device the widget was bound to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<Id>,
    /// Removed widget
    pub widget_id: Id,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryUpdate {
    /// Dashboard scope, when the server knows it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dashboard_id: Option<Id>,
    /// Reporting device
    pub device_id: Id,
    /// Telemetry key to reading
    #[serde(default)]
    pub data: BTreeMap<String, WidgetValue>,
}

impl TelemetryUpdate {
    /// Looks a key up case-insensitively, as virtual pins are matched.
    pub fn get_ignore_case(&self, key: &str) -> Option<&WidgetValue> {
        self.data
            .get(key)
            .or_else(|| {
                self.data
                    .iter()
                    .find(|(candidate, _)| candidate.eq_ignore_ascii_case(key))
                    .map(|(_, value)| value)
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleNotice {
    /// Actuator widget the schedule belongs to
    pub widget_id: Id,
    /// Affected entry, if reported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_id: Option<Id>,
    /// Dashboard scope, when the server knows it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dashboard_id: Option<Id>,
}

/// Discriminant of a [`StreamEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventKind {
    WidgetUpdate,
    WidgetDeleted,
    TelemetryUpdate,
    ScheduleExecuted,
    ScheduleCancelled,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::WidgetUpdate,
        EventKind::WidgetDeleted,
        EventKind::TelemetryUpdate,
        EventKind::ScheduleExecuted,
        EventKind::ScheduleCancelled,
    ];

    /// Wire tag carried in the `type` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::WidgetUpdate => "widget_update",
            EventKind::WidgetDeleted => "widget_deleted",
            EventKind::TelemetryUpdate => "telemetry_update",
            EventKind::ScheduleExecuted => "schedule_executed",
            EventKind::ScheduleCancelled => "schedule_cancelled",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == tag)
    }
}

impl core::fmt::Display for EventKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl StreamEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            StreamEvent::WidgetUpdate(_) => EventKind::WidgetUpdate,
            StreamEvent::WidgetDeleted(_) => EventKind::WidgetDeleted,
            StreamEvent::TelemetryUpdate(_) => EventKind::TelemetryUpdate,
            StreamEvent::ScheduleExecuted(_) => EventKind::ScheduleExecuted,
            StreamEvent::ScheduleCancelled(_) => EventKind::ScheduleCancelled,
        }
    }

    pub fn dashboard_id(&self) -> Option<&str> {
        match self {
            StreamEvent::WidgetUpdate(update) => Some(&update.dashboard_id),
            StreamEvent::WidgetDeleted(deleted) => Some(&deleted.dashboard_id),
            StreamEvent::TelemetryUpdate(update) => update.dashboard_id.as_deref(),
            StreamEvent::ScheduleExecuted(notice) | StreamEvent::ScheduleCancelled(notice) => {
                notice.dashboard_id.as_deref()
            }
        }
    }

    pub fn device_id(&self) -> Option<&str> {
        match self {
            StreamEvent::WidgetUpdate(update) => update
                .device_id
                .as_deref()
                .or(update.widget.device_id.as_deref()),
            StreamEvent::WidgetDeleted(deleted) => deleted.device_id.as_deref(),
            StreamEvent::TelemetryUpdate(update) => Some(&update.device_id),
            StreamEvent::ScheduleExecuted(_) | StreamEvent::ScheduleCancelled(_) => None,
        }
    }

    /// Widget the event is about, for widget- and schedule-scoped events.
    pub fn widget_id(&self) -> Option<&str> {
        match self {
            StreamEvent::WidgetUpdate(update) => Some(&update.widget.id),
            StreamEvent::WidgetDeleted(deleted) => Some(&deleted.widget_id),
            StreamEvent::TelemetryUpdate(_) => None,
            StreamEvent::ScheduleExecuted(notice) | StreamEvent::ScheduleCancelled(notice) => {
                Some(&notice.widget_id)
            }
        }
    }
}
