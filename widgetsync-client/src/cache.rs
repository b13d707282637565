use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use widgetsync_api::{Id, StreamEvent, WidgetPatch, WidgetRecord, is_local_id};

use crate::coerce::{coerce_value, normalize_value};
use crate::error::CacheError;
use crate::listeners::{ListenerGuard, ListenerSet};
use crate::scope::{ViewScope, telemetry_for};

/// Mutation reported to cache observers after it has been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheChange {
    Upserted(Id),
    Patched(Id),
    Removed(Id),
    Replaced { count: usize },
}

pub type CacheSubscription = ListenerGuard<CacheChange>;

/// Authoritative client-side widget collection of one view.
pub struct WidgetCache {
    scope: ViewScope,
    records: RwLock<BTreeMap<Id, WidgetRecord>>,
    observers: Arc<ListenerSet<CacheChange>>,
}

impl WidgetCache {
    pub fn new(scope: ViewScope) -> Self {
        Self {
            scope,
            records: RwLock::new(BTreeMap::new()),
            observers: Arc::new(ListenerSet::new()),
        }
    }

    pub fn scope(&self) -> &ViewScope {
        &self.scope
    }

    pub fn get(&self, id: &str) -> Option<WidgetRecord> {
        self.records.read().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Records in display order.
    pub fn records(&self) -> Vec<WidgetRecord> {
        let mut records: Vec<WidgetRecord> = self.records.read().values().cloned().collect();
        records.sort_by(|a, b| a.layout.order.cmp(&b.layout.order).then_with(|| a.id.cmp(&b.id)));
        records
    }

    pub fn tracks_device(&self, device_id: &str) -> bool {
        self.records
            .read()
            .values()
            .any(|record| record.device_id.as_deref() == Some(device_id))
    }

    /// Registers a callback fired after every applied mutation.
    pub fn subscribe<F>(&self, listener: F) -> CacheSubscription
    where
        F: Fn(&CacheChange) + Send + Sync + 'static,
    {
        ListenerGuard::new(self.observers.attach(listener), &self.observers)
    }

    /// Inserts or replaces a record by id. Returns whether anything changed.
    ///
    /// A `led` must carry a virtual pin that no other live record on the same
    /// device holds. A local placeholder holding the pin is superseded.
    pub fn upsert(&self, record: WidgetRecord) -> Result<bool, CacheError> {
        let mut record = record;
        record.value = normalize_value(record.kind, &record.value);

        let mut superseded = Vec::new();
        {
            let mut records = self.records.write();

            if record.is_actuator() {
                let binding = (record.device_id.as_deref(), record.virtual_pin.as_deref());
                let (device_id, pin) = match binding {
                    (_, None) => return Err(CacheError::MissingVirtualPin(record.id.clone())),
                    (None, _) => return Err(CacheError::MissingDevice(record.id.clone())),
                    (Some(device_id), Some(pin)) => (device_id, pin),
                };

                for other in records.values() {
                    if other.id == record.id || !other.holds_pin(device_id, pin) {
                        continue;
                    }
                    if is_local_id(&other.id) && !is_local_id(&record.id) {
                        superseded.push(other.id.clone());
                    } else {
                        return Err(CacheError::PinInUse {
                            device_id: device_id.to_string(),
                            pin: pin.to_string(),
                        });
                    }
                }
            }

            for id in &superseded {
                records.remove(id);
            }

            if records.get(&record.id) == Some(&record) && superseded.is_empty() {
                return Ok(false);
            }

            records.insert(record.id.clone(), record.clone());
        }

        for id in superseded {
            tracing::debug!("Placeholder {} superseded by {}", id, record.id);
            self.observers.notify(&CacheChange::Removed(id));
        }
        self.observers.notify(&CacheChange::Upserted(record.id));

        Ok(true)
    }

    /// Merges fields into an existing record. Unknown ids are ignored.
    pub fn patch(&self, id: &str, patch: WidgetPatch) -> bool {
        {
            let mut records = self.records.write();
            let Some(record) = records.get_mut(id) else {
                tracing::debug!("Dropping patch for unknown widget {}", id);
                return false;
            };

            let mut next = record.clone();
            if let Some(label) = patch.label {
                next.label = label;
            }
            if let Some(value) = patch.value.as_ref() {
                next.value = coerce_value(next.kind, &record.value, value);
            }
            if let Some(layout) = patch.layout {
                next.layout = layout;
            }
            if let Some(next_scheduled_at) = patch.next_scheduled_at {
                next.next_scheduled_at = next_scheduled_at;
            }

            if next == *record {
                return false;
            }
            *record = next;
        }

        self.observers.notify(&CacheChange::Patched(id.to_string()));
        true
    }

    /// Removes a record. Idempotent.
    pub fn remove(&self, id: &str) -> bool {
        if self.records.write().remove(id).is_none() {
            tracing::debug!("Widget {} already gone", id);
            return false;
        }

        self.observers.notify(&CacheChange::Removed(id.to_string()));
        true
    }

    /// Replaces the whole collection with a fresh snapshot.
    ///
    /// Records outside the view's scope and `led` records violating the pin
    /// invariant are skipped. Returns the number of records kept.
    pub fn replace_all(&self, snapshot: Vec<WidgetRecord>) -> usize {
        let mut next: BTreeMap<Id, WidgetRecord> = BTreeMap::new();

        for mut record in snapshot {
            if !self.scope.holds(&record) {
                tracing::warn!("Skipping widget {} outside {:?}", record.id, self.scope);
                continue;
            }
            if record.is_actuator() {
                let valid = match (record.device_id.as_deref(), record.virtual_pin.as_deref()) {
                    (Some(device_id), Some(pin)) => {
                        !next.values().any(|other| other.holds_pin(device_id, pin))
                    }
                    _ => false,
                };
                if !valid {
                    tracing::warn!("Skipping actuator {} with missing or duplicate pin", record.id);
                    continue;
                }
            }
            record.value = normalize_value(record.kind, &record.value);
            next.insert(record.id.clone(), record);
        }

        let count = next.len();
        *self.records.write() = next;

        self.observers.notify(&CacheChange::Replaced { count });
        count
    }

    /// Patches the value of every record whose binding matches a telemetry
    /// event. Returns the ids that changed.
    pub fn apply_telemetry_event(&self, event: &StreamEvent) -> Vec<Id> {
        if !matches!(event, StreamEvent::TelemetryUpdate(_)) {
            return Vec::new();
        }

        let mut changed = Vec::new();
        {
            let mut records = self.records.write();
            for record in records.values_mut() {
                let Some(incoming) = telemetry_for(event, record) else {
                    continue;
                };

                let value = coerce_value(record.kind, &record.value, incoming);
                if value != record.value {
                    record.value = value;
                    changed.push(record.id.clone());
                }
            }
        }

        for id in &changed {
            self.observers.notify(&CacheChange::Patched(id.clone()));
        }

        changed
    }

    /// Lowest `v{n}` pin not held by a live actuator on `device_id`.
    pub fn next_virtual_pin(&self, device_id: &str) -> String {
        let records = self.records.read();

        (0u32..)
            .map(|n| format!("v{n}"))
            .find(|pin| !records.values().any(|record| record.holds_pin(device_id, pin)))
            .unwrap_or_default()
    }
}
