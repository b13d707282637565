use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use widgetsync_api::StreamEvent;

use crate::cache::WidgetCache;
use crate::hub::{Subscription, SubscriptionHub};

/// Reconciler statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcilerStats {
    /// Events that passed the view's scope check
    pub admitted: u64,
    /// Events rejected by the scope check
    pub filtered: u64,
    /// Widget values changed by telemetry
    pub patched: u64,
}

#[derive(Default)]
struct Counters {
    admitted: AtomicU64,
    filtered: AtomicU64,
    patched: AtomicU64,
}

/// Keeps a widget cache in step with the live stream.
pub struct TelemetryReconciler;

impl TelemetryReconciler {
    /// Starts routing stream events into `cache`. The returned handle keeps
    /// the routing alive; it holds no strong reference to the cache.
    pub fn attach(hub: &SubscriptionHub, cache: &Arc<WidgetCache>) -> ReconcilerHandle {
        let counters = Arc::new(Counters::default());
        let weak = Arc::downgrade(cache);

        let subscription = {
            let counters = counters.clone();
            hub.attach(move |event| Self::apply(&weak, &counters, event))
        };

        ReconcilerHandle {
            counters,
            _subscription: subscription,
        }
    }

    fn apply(cache: &Weak<WidgetCache>, counters: &Counters, event: &StreamEvent) {
        let Some(cache) = cache.upgrade() else {
            return;
        };

        if !cache.scope().admits(event, |device_id| cache.tracks_device(device_id)) {
            counters.filtered.fetch_add(1, Ordering::Relaxed);
            return;
        }
        counters.admitted.fetch_add(1, Ordering::Relaxed);

        match event {
            StreamEvent::TelemetryUpdate(_) => {
                let changed = cache.apply_telemetry_event(event);
                counters.patched.fetch_add(changed.len() as u64, Ordering::Relaxed);
            }
            StreamEvent::WidgetUpdate(update) => {
                if let Err(e) = cache.upsert(update.widget.clone()) {
                    tracing::warn!("Rejected streamed widget {}: {}", update.widget.id, e);
                }
            }
            StreamEvent::WidgetDeleted(deleted) => {
                cache.remove(&deleted.widget_id);
            }
            StreamEvent::ScheduleExecuted(_) | StreamEvent::ScheduleCancelled(_) => {}
        }
    }
}

/// Live routing from a hub into a cache; detaches on drop.
pub struct ReconcilerHandle {
    counters: Arc<Counters>,
    _subscription: Subscription,
}

impl ReconcilerHandle {
    pub fn stats(&self) -> ReconcilerStats {
        ReconcilerStats {
            admitted: self.counters.admitted.load(Ordering::Relaxed),
            filtered: self.counters.filtered.load(Ordering::Relaxed),
            patched: self.counters.patched.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use widgetsync_api::{
        Layout, TelemetryUpdate, WidgetDeleted, WidgetKind, WidgetRecord, WidgetUpdate,
        WidgetValue,
    };

    use super::*;
    use crate::scope::ViewScope;

    fn gauge(id: &str, dashboard_id: &str) -> WidgetRecord {
        WidgetRecord {
            id: id.to_string(),
            dashboard_id: dashboard_id.to_string(),
            device_id: Some("dev1".to_string()),
            kind: WidgetKind::Gauge,
            label: "Temperature".to_string(),
            value: WidgetValue::Number(20.0),
            binding_key: Some("temp".to_string()),
            virtual_pin: None,
            layout: Layout::default(),
            next_scheduled_at: None,
        }
    }

    fn setup() -> (SubscriptionHub, Arc<WidgetCache>, ReconcilerHandle) {
        let hub = SubscriptionHub::new();
        let cache = Arc::new(WidgetCache::new(ViewScope::Dashboard("d1".to_string())));
        cache.replace_all(vec![gauge("w1", "d1")]);
        let handle = TelemetryReconciler::attach(&hub, &cache);
        (hub, cache, handle)
    }

    fn update(record: WidgetRecord) -> StreamEvent {
        StreamEvent::WidgetUpdate(WidgetUpdate {
            dashboard_id: record.dashboard_id.clone(),
            device_id: record.device_id.clone(),
            widget: record,
        })
    }

    #[test]
    fn test_widget_update_is_idempotent() {
        let (hub, cache, _handle) = setup();
        let mut record = gauge("w2", "d1");
        record.label = "Outdoor".to_string();

        hub.publish(&update(record.clone()));
        let once = cache.records();
        hub.publish(&update(record));

        assert_eq!(cache.records(), once);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_foreign_dashboard_events_are_filtered() {
        let (hub, cache, handle) = setup();

        hub.publish(&update(gauge("w9", "d2")));
        hub.publish(&StreamEvent::WidgetDeleted(WidgetDeleted {
            dashboard_id: "d2".to_string(),
            device_id: None,
            widget_id: "w1".to_string(),
        }));

        assert!(!cache.contains("w9"));
        assert!(cache.contains("w1"));
        assert_eq!(handle.stats().filtered, 2);
    }

    #[test]
    fn test_deletion_removes_and_repeats_are_harmless() {
        let (hub, cache, _handle) = setup();
        let event = StreamEvent::WidgetDeleted(WidgetDeleted {
            dashboard_id: "d1".to_string(),
            device_id: Some("dev1".to_string()),
            widget_id: "w1".to_string(),
        });

        hub.publish(&event);
        hub.publish(&event);

        assert!(cache.is_empty());
    }

    #[test]
    fn test_untagged_telemetry_for_tracked_device_is_applied() {
        let (hub, cache, handle) = setup();

        hub.publish(&StreamEvent::TelemetryUpdate(TelemetryUpdate {
            dashboard_id: None,
            device_id: "dev1".to_string(),
            data: BTreeMap::from([("temp".to_string(), WidgetValue::Number(24.0))]),
        }));

        assert_eq!(cache.get("w1").unwrap().value, WidgetValue::Number(24.0));
        assert_eq!(handle.stats().patched, 1);
    }

    #[test]
    fn test_dropped_handle_stops_routing() {
        let (hub, cache, handle) = setup();
        drop(handle);

        hub.publish(&update(gauge("w2", "d1")));

        assert!(!cache.contains("w2"));
        assert_eq!(hub.listener_count(), 0);
    }
}
