use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use uuid::Uuid;
use widgetsync_api::{
    CreateWidgetRequest, Id, LOCAL_ID_PREFIX, Layout, WidgetPatch, WidgetRecord, is_local_id,
};

use crate::actuator::{ActuatorController, ToggleOutcome};
use crate::api::CommandApi;
use crate::cache::{CacheChange, CacheSubscription, WidgetCache};
use crate::error::{CacheError, CommandError, SessionError};
use crate::hub::SubscriptionHub;
use crate::reconciler::{ReconcilerHandle, TelemetryReconciler};
use crate::schedule::ScheduleRegistry;
use crate::scope::ViewScope;
use crate::settings::ActuatorConfig;

/// Per-widget actors owned by a session, kept in step with the cache.
struct Actors {
    api: Arc<dyn CommandApi>,
    cache: Weak<WidgetCache>,
    hub: Weak<SubscriptionHub>,
    config: ActuatorConfig,
    actuators: Mutex<HashMap<Id, Arc<ActuatorController>>>,
    schedules: Mutex<HashMap<Id, Arc<ScheduleRegistry>>>,
}

impl Actors {
    fn on_change(&self, change: &CacheChange) {
        match change {
            CacheChange::Upserted(id) => self.ensure_actuator(id),
            CacheChange::Removed(id) => self.retire(id),
            CacheChange::Replaced { .. } => self.sync(),
            CacheChange::Patched(_) => {}
        }
    }

    fn ensure_actuator(&self, id: &str) {
        let (Some(cache), Some(hub)) = (self.cache.upgrade(), self.hub.upgrade()) else {
            return;
        };
        let Some(record) = cache.get(id).filter(|record| record.is_actuator()) else {
            return;
        };
        if is_local_id(&record.id) {
            return;
        }

        let controller = {
            let mut actuators = self.actuators.lock();
            if actuators.contains_key(id) {
                return;
            }
            let controller = Arc::new(ActuatorController::new(
                &record,
                self.api.clone(),
                &cache,
                self.config,
            ));
            actuators.insert(record.id.clone(), controller.clone());
            controller
        };

        controller.attach(&hub);
        tracing::debug!("Actuator controller started for {}", record.id);
    }

    fn retire(&self, id: &str) {
        let actuator = self.actuators.lock().remove(id);
        let registry = self.schedules.lock().remove(id);

        if let Some(actuator) = actuator {
            actuator.close();
            tracing::debug!("Actuator controller stopped for {}", id);
        }
        if let Some(registry) = registry {
            registry.close();
        }
    }

    fn sync(&self) {
        let Some(cache) = self.cache.upgrade() else {
            return;
        };
        let leds: Vec<WidgetRecord> = cache
            .records()
            .into_iter()
            .filter(|record| record.is_actuator() && !is_local_id(&record.id))
            .collect();
        let live: HashSet<&str> = leds.iter().map(|record| record.id.as_str()).collect();

        let stale: Vec<Id> = {
            let actuators = self.actuators.lock();
            let schedules = self.schedules.lock();
            actuators
                .keys()
                .chain(schedules.keys())
                .filter(|id| !live.contains(id.as_str()))
                .cloned()
                .collect()
        };
        for id in stale {
            self.retire(&id);
        }

        for record in &leds {
            let existing = self.actuators.lock().get(&record.id).cloned();
            match existing {
                Some(controller) => {
                    let state = record.value.coerce_bool().unwrap_or(false);
                    if !controller.reseed(state) && controller.current() != state {
                        // Keep showing the in-flight optimistic state.
                        cache.patch(&record.id, WidgetPatch::value(controller.current()));
                    }
                }
                None => self.ensure_actuator(&record.id),
            }
        }
    }

    fn close_all(&self) {
        let actuators: Vec<_> = self.actuators.lock().drain().map(|(_, a)| a).collect();
        let schedules: Vec<_> = self.schedules.lock().drain().map(|(_, r)| r).collect();

        for actuator in actuators {
            actuator.close();
        }
        for registry in schedules {
            registry.close();
        }
    }
}

/// One open dashboard view: its cache, the stream routing into it, and the
/// actuator and schedule actors of its `led` widgets.
pub struct DashboardSession {
    dashboard_id: Id,
    api: Arc<dyn CommandApi>,
    cache: Arc<WidgetCache>,
    actors: Arc<Actors>,
    routing: Mutex<Option<(ReconcilerHandle, CacheSubscription)>>,
}

impl DashboardSession {
    /// Loads the dashboard and starts following the stream.
    pub async fn open(
        dashboard_id: impl Into<Id>,
        hub: &Arc<SubscriptionHub>,
        api: Arc<dyn CommandApi>,
        config: ActuatorConfig,
    ) -> Result<Self, CommandError> {
        let dashboard_id = dashboard_id.into();
        let snapshot = api.fetch_widgets(&dashboard_id).await?;

        let cache = Arc::new(WidgetCache::new(ViewScope::Dashboard(dashboard_id.clone())));
        let actors = Arc::new(Actors {
            api: api.clone(),
            cache: Arc::downgrade(&cache),
            hub: Arc::downgrade(hub),
            config,
            actuators: Mutex::new(HashMap::new()),
            schedules: Mutex::new(HashMap::new()),
        });

        let observer = {
            let actors = Arc::downgrade(&actors);
            cache.subscribe(move |change| {
                if let Some(actors) = actors.upgrade() {
                    actors.on_change(change);
                }
            })
        };
        let count = cache.replace_all(snapshot);
        let reconciler = TelemetryReconciler::attach(hub, &cache);

        tracing::info!("Opened dashboard {} with {} widgets", dashboard_id, count);

        Ok(Self {
            dashboard_id,
            api,
            cache,
            actors,
            routing: Mutex::new(Some((reconciler, observer))),
        })
    }

    pub fn dashboard_id(&self) -> &str {
        &self.dashboard_id
    }

    pub fn cache(&self) -> &Arc<WidgetCache> {
        &self.cache
    }

    pub fn widgets(&self) -> Vec<WidgetRecord> {
        self.cache.records()
    }

    pub fn is_open(&self) -> bool {
        self.routing.lock().is_some()
    }

    /// Re-reads every widget, e.g. after the stream reconnects.
    pub async fn refresh(&self) -> Result<usize, CommandError> {
        let snapshot = self.api.fetch_widgets(&self.dashboard_id).await?;
        if !self.is_open() {
            return Ok(0);
        }
        Ok(self.cache.replace_all(snapshot))
    }

    pub fn actuator(&self, widget_id: &str) -> Option<Arc<ActuatorController>> {
        self.actors.actuators.lock().get(widget_id).cloned()
    }

    pub async fn toggle(&self, widget_id: &str) -> Result<ToggleOutcome, SessionError> {
        let controller = self
            .actuator(widget_id)
            .ok_or_else(|| CacheError::NotFound(widget_id.to_string()))?;
        Ok(controller.toggle().await?)
    }

    /// Schedule registry of an actuator widget, created on first use.
    pub fn schedules(&self, widget_id: &str) -> Result<Arc<ScheduleRegistry>, CacheError> {
        let record = self
            .cache
            .get(widget_id)
            .filter(|record| record.is_actuator() && !is_local_id(&record.id))
            .ok_or_else(|| CacheError::NotFound(widget_id.to_string()))?;

        let (registry, created) = {
            let mut schedules = self.actors.schedules.lock();
            match schedules.get(&record.id) {
                Some(registry) => (registry.clone(), false),
                None => {
                    let registry = Arc::new(ScheduleRegistry::new(
                        &record,
                        self.api.clone(),
                        &self.cache,
                    ));
                    schedules.insert(record.id.clone(), registry.clone());
                    (registry, true)
                }
            }
        };

        if created {
            if let Some(hub) = self.actors.hub.upgrade() {
                registry.attach(&hub);
            }
        }

        Ok(registry)
    }

    /// Adds a widget, showing a placeholder until the server answers.
    ///
    /// A `led` without a virtual pin gets the lowest free one on its device.
    pub async fn add_widget(
        &self,
        request: CreateWidgetRequest,
    ) -> Result<WidgetRecord, SessionError> {
        let mut request = request;
        if request.kind.is_actuator() {
            let device_id = request
                .device_id
                .clone()
                .ok_or_else(|| CacheError::MissingDevice(request.label.clone()))?;
            if request.virtual_pin.is_none() {
                request.virtual_pin = Some(self.cache.next_virtual_pin(&device_id));
            }
        }
        if !request.layout.is_valid() {
            return Err(CacheError::InvalidLayout(request.label.clone()).into());
        }

        let placeholder = format!("{}{}", LOCAL_ID_PREFIX, Uuid::new_v4());
        self.cache
            .upsert(request.to_record(placeholder.clone(), self.dashboard_id.clone()))?;

        let canonical = match self.api.create_widget(&self.dashboard_id, &request).await {
            Ok(canonical) => canonical,
            Err(e) => {
                tracing::warn!("Creating widget {} failed: {}", request.label, e);
                self.cache.remove(&placeholder);
                return Err(e.into());
            }
        };

        let stored = self.cache.upsert(canonical.clone());
        self.cache.remove(&placeholder);
        if let Err(e) = stored {
            // The server holds the widget now; follow its view.
            tracing::warn!("Widget {} created but not cached: {}", canonical.id, e);
            if let Err(e) = self.refresh().await {
                tracing::warn!(
                    "Resync of {} after creating {} failed: {}",
                    self.dashboard_id,
                    canonical.id,
                    e
                );
            }
        }

        tracing::info!("Widget {} added to {}", canonical.id, self.dashboard_id);
        Ok(canonical)
    }

    /// Deletes a widget once the server confirms.
    pub async fn delete_widget(&self, widget_id: &str) -> Result<(), SessionError> {
        if !self.cache.contains(widget_id) || is_local_id(widget_id) {
            return Err(CacheError::NotFound(widget_id.to_string()).into());
        }

        self.api.delete_widget(&self.dashboard_id, widget_id).await?;
        self.cache.remove(widget_id);

        tracing::info!("Widget {} deleted from {}", widget_id, self.dashboard_id);
        Ok(())
    }

    pub fn update_layout(&self, widget_id: &str, layout: Layout) -> Result<(), CacheError> {
        if !layout.is_valid() {
            return Err(CacheError::InvalidLayout(widget_id.to_string()));
        }
        if !self.cache.contains(widget_id) {
            return Err(CacheError::NotFound(widget_id.to_string()));
        }

        self.cache.patch(widget_id, WidgetPatch::layout(layout));
        Ok(())
    }

    /// Detaches from the stream. Commands already in flight complete but
    /// their results are discarded.
    pub fn close(&self) {
        let routing = self.routing.lock().take();
        if routing.is_none() {
            return;
        }
        drop(routing);

        self.actors.close_all();
        tracing::info!("Closed dashboard {}", self.dashboard_id);
    }
}

impl Drop for DashboardSession {
    fn drop(&mut self) {
        self.close();
    }
}
