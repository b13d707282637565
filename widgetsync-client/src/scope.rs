use widgetsync_api::{Binding, Id, StreamEvent, WidgetRecord, WidgetValue};

pub fn matches_dashboard(event: &StreamEvent, dashboard_id: &str) -> bool {
    event.dashboard_id() == Some(dashboard_id)
}

/// False only when the event names a different dashboard.
pub fn may_concern_dashboard(event: &StreamEvent, dashboard_id: &str) -> bool {
    event.dashboard_id().is_none_or(|id| id == dashboard_id)
}

pub fn matches_device(event: &StreamEvent, device_id: &str) -> bool {
    event.device_id() == Some(device_id)
}

pub fn matches_widget(event: &StreamEvent, widget_id: &str) -> bool {
    event.widget_id() == Some(widget_id)
}

/// Telemetry from `device_id` carrying exactly `key`.
pub fn matches_device_key(event: &StreamEvent, device_id: &str, key: &str) -> bool {
    match event {
        StreamEvent::TelemetryUpdate(update) => {
            update.device_id == device_id && update.data.contains_key(key)
        }
        _ => false,
    }
}

/// Telemetry from `device_id` carrying `pin`, compared case-insensitively.
pub fn matches_virtual_pin(event: &StreamEvent, device_id: &str, pin: &str) -> bool {
    match event {
        StreamEvent::TelemetryUpdate(update) => {
            update.device_id == device_id && update.get_ignore_case(pin).is_some()
        }
        _ => false,
    }
}

/// Reading destined for `record`, if the event's telemetry matches its binding.
pub fn telemetry_for<'e>(event: &'e StreamEvent, record: &WidgetRecord) -> Option<&'e WidgetValue> {
    let StreamEvent::TelemetryUpdate(update) = event else {
        return None;
    };

    match record.binding() {
        Binding::VirtualPin { device_id, pin } if matches_virtual_pin(event, device_id, pin) => {
            update.get_ignore_case(pin)
        }
        Binding::Telemetry { device_id, key } if matches_device_key(event, device_id, key) => {
            update.data.get(key)
        }
        _ => None,
    }
}

/// What a widget view is showing: one dashboard, or one device's detail page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ViewScope {
    Dashboard(Id),
    Device(Id),
}

impl ViewScope {
    /// Cheap early-exit check run before any widget is looked at.
    ///
    /// `tracks_device` answers whether the view currently shows a widget of
    /// the given device; it admits telemetry that carries no dashboard id.
    pub fn admits(&self, event: &StreamEvent, tracks_device: impl Fn(&str) -> bool) -> bool {
        match (self, event) {
            (ViewScope::Dashboard(id), StreamEvent::WidgetUpdate(_))
            | (ViewScope::Dashboard(id), StreamEvent::WidgetDeleted(_)) => {
                matches_dashboard(event, id)
            }
            (ViewScope::Dashboard(id), StreamEvent::TelemetryUpdate(update)) => {
                match update.dashboard_id.as_deref() {
                    Some(dashboard_id) => dashboard_id == id,
                    None => tracks_device(&update.device_id),
                }
            }
            (ViewScope::Device(id), StreamEvent::WidgetUpdate(_))
            | (ViewScope::Device(id), StreamEvent::WidgetDeleted(_))
            | (ViewScope::Device(id), StreamEvent::TelemetryUpdate(_)) => matches_device(event, id),
            (_, StreamEvent::ScheduleExecuted(_)) | (_, StreamEvent::ScheduleCancelled(_)) => false,
        }
    }

    /// Whether a record belongs in a view of this scope.
    pub fn holds(&self, record: &WidgetRecord) -> bool {
        match self {
            ViewScope::Dashboard(id) => record.dashboard_id == *id,
            ViewScope::Device(id) => record.device_id.as_deref() == Some(id.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use widgetsync_api::{
        Layout, ScheduleNotice, TelemetryUpdate, WidgetDeleted, WidgetKind, WidgetValue,
    };

    use super::*;

    fn telemetry(
        dashboard_id: Option<&str>,
        device_id: &str,
        data: &[(&str, WidgetValue)],
    ) -> StreamEvent {
        StreamEvent::TelemetryUpdate(TelemetryUpdate {
            dashboard_id: dashboard_id.map(str::to_string),
            device_id: device_id.to_string(),
            data: data
                .iter()
                .map(|(key, value)| (key.to_string(), value.clone()))
                .collect::<BTreeMap<_, _>>(),
        })
    }

    fn record(kind: WidgetKind, key: Option<&str>, pin: Option<&str>) -> WidgetRecord {
        WidgetRecord {
            id: "w1".to_string(),
            dashboard_id: "d1".to_string(),
            device_id: Some("dev1".to_string()),
            kind,
            label: String::new(),
            value: WidgetValue::Unknown,
            binding_key: key.map(str::to_string),
            virtual_pin: pin.map(str::to_string),
            layout: Layout::default(),
            next_scheduled_at: None,
        }
    }

    #[test]
    fn test_device_key_matching() {
        let event = telemetry(None, "dev1", &[("temp", WidgetValue::Number(20.0))]);

        assert!(matches_device_key(&event, "dev1", "temp"));
        assert!(!matches_device_key(&event, "dev1", "TEMP"));
        assert!(!matches_device_key(&event, "dev1", "humidity"));
        assert!(!matches_device_key(&event, "dev2", "temp"));
    }

    #[test]
    fn test_virtual_pin_matching_ignores_case() {
        let event = telemetry(None, "dev1", &[("V1", WidgetValue::Bool(true))]);

        assert!(matches_virtual_pin(&event, "dev1", "v1"));
        assert!(!matches_virtual_pin(&event, "dev1", "v2"));
        assert!(!matches_virtual_pin(&event, "dev2", "v1"));
    }

    #[test]
    fn test_non_telemetry_never_matches_bindings() {
        let event = StreamEvent::WidgetDeleted(WidgetDeleted {
            dashboard_id: "d1".to_string(),
            device_id: Some("dev1".to_string()),
            widget_id: "w1".to_string(),
        });

        assert!(!matches_device_key(&event, "dev1", "temp"));
        assert!(!matches_virtual_pin(&event, "dev1", "v1"));
        assert!(matches_dashboard(&event, "d1"));
        assert!(matches_widget(&event, "w1"));
    }

    #[test]
    fn test_telemetry_for_respects_binding() {
        let event = telemetry(
            None,
            "dev1",
            &[("temp", WidgetValue::Number(20.0)), ("v1", WidgetValue::Bool(true))],
        );

        let gauge = record(WidgetKind::Gauge, Some("temp"), None);
        let led = record(WidgetKind::Led, Some("temp"), Some("V1"));
        let other_led = record(WidgetKind::Led, None, Some("v2"));
        let unbound = record(WidgetKind::Card, None, None);

        assert_eq!(telemetry_for(&event, &gauge), Some(&WidgetValue::Number(20.0)));
        assert_eq!(telemetry_for(&event, &led), Some(&WidgetValue::Bool(true)));
        assert_eq!(telemetry_for(&event, &other_led), None);
        assert_eq!(telemetry_for(&event, &unbound), None);
    }

    #[test]
    fn test_dashboard_scope_admission() {
        let scope = ViewScope::Dashboard("d1".to_string());
        let tracks = |device: &str| device == "dev1";

        assert!(scope.admits(&telemetry(Some("d1"), "dev9", &[]), tracks));
        assert!(!scope.admits(&telemetry(Some("d2"), "dev1", &[]), tracks));
        assert!(scope.admits(&telemetry(None, "dev1", &[]), tracks));
        assert!(!scope.admits(&telemetry(None, "dev2", &[]), tracks));

        let notice = StreamEvent::ScheduleExecuted(ScheduleNotice {
            widget_id: "w1".to_string(),
            schedule_id: None,
            dashboard_id: Some("d1".to_string()),
        });
        assert!(!scope.admits(&notice, tracks));
    }

    #[test]
    fn test_may_concern_dashboard() {
        assert!(may_concern_dashboard(&telemetry(None, "dev1", &[]), "d1"));
        assert!(may_concern_dashboard(&telemetry(Some("d1"), "dev1", &[]), "d1"));
        assert!(!may_concern_dashboard(&telemetry(Some("d2"), "dev1", &[]), "d1"));
    }

    #[test]
    fn test_device_scope_admission() {
        let scope = ViewScope::Device("dev1".to_string());

        assert!(scope.admits(&telemetry(Some("d7"), "dev1", &[]), |_| false));
        assert!(!scope.admits(&telemetry(None, "dev2", &[]), |_| true));
        assert!(scope.holds(&record(WidgetKind::Gauge, Some("temp"), None)));
    }
}
