use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use time::OffsetDateTime;
use tokio::runtime::Handle;
use widgetsync_api::{
    CreateScheduleRequest, Id, ScheduleEntry, StreamEvent, WidgetPatch, WidgetRecord,
};

use crate::api::CommandApi;
use crate::cache::WidgetCache;
use crate::error::{CommandError, ScheduleError};
use crate::hub::{Subscription, SubscriptionHub};
use crate::scope::{matches_dashboard, may_concern_dashboard};

#[derive(Default)]
struct Entries {
    list: Vec<ScheduleEntry>,
    fetched: bool,
}

/// Schedules and timers of one actuator widget.
///
/// The server owns every entry. Mutations go to the command API and the
/// local list is only ever replaced wholesale by [`ScheduleRegistry::refresh`].
pub struct ScheduleRegistry {
    widget_id: Id,
    dashboard_id: Id,
    api: Arc<dyn CommandApi>,
    cache: Weak<WidgetCache>,
    entries: RwLock<Entries>,
    refresh_lock: tokio::sync::Mutex<()>,
    closed: AtomicBool,
    subscription: Mutex<Option<Subscription>>,
}

impl ScheduleRegistry {
    pub fn new(record: &WidgetRecord, api: Arc<dyn CommandApi>, cache: &Arc<WidgetCache>) -> Self {
        Self {
            widget_id: record.id.clone(),
            dashboard_id: record.dashboard_id.clone(),
            api,
            cache: Arc::downgrade(cache),
            entries: RwLock::new(Entries::default()),
            refresh_lock: tokio::sync::Mutex::new(()),
            closed: AtomicBool::new(false),
            subscription: Mutex::new(None),
        }
    }

    /// Refreshes whenever the stream reports this widget's schedules changed.
    ///
    /// Refreshes run on the runtime current at attach time; outside a runtime
    /// the registry only reacts to deletion.
    pub fn attach(self: &Arc<Self>, hub: &SubscriptionHub) {
        let runtime = Handle::try_current().ok();
        if runtime.is_none() {
            tracing::warn!("No runtime for schedule refreshes of {}", self.widget_id);
        }

        let weak = Arc::downgrade(self);
        let subscription = hub.attach(move |event| {
            let Some(registry) = weak.upgrade() else {
                return;
            };
            match event {
                StreamEvent::ScheduleExecuted(notice) | StreamEvent::ScheduleCancelled(notice)
                    if notice.widget_id == registry.widget_id
                        && may_concern_dashboard(event, &registry.dashboard_id) =>
                {
                    if let Some(runtime) = &runtime {
                        runtime.spawn(Self::refresh_in_background(Arc::downgrade(&registry)));
                    }
                }
                StreamEvent::WidgetDeleted(deleted)
                    if deleted.widget_id == registry.widget_id
                        && matches_dashboard(event, &registry.dashboard_id) =>
                {
                    registry.close();
                }
                _ => {}
            }
        });

        let previous = self.subscription.lock().replace(subscription);
        drop(previous);
    }

    async fn refresh_in_background(registry: Weak<Self>) {
        let Some(registry) = registry.upgrade() else {
            return;
        };
        if let Err(e) = registry.refresh().await {
            tracing::warn!("Schedule refresh for {} failed: {}", registry.widget_id, e);
        }
    }

    pub fn widget_id(&self) -> &str {
        &self.widget_id
    }

    pub fn is_fetched(&self) -> bool {
        self.entries.read().fetched
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Every known entry in server order.
    pub fn entries(&self) -> Vec<ScheduleEntry> {
        self.entries.read().list.clone()
    }

    /// Pending entries, earliest first.
    pub fn pending(&self) -> Vec<ScheduleEntry> {
        let mut pending: Vec<ScheduleEntry> = self
            .entries
            .read()
            .list
            .iter()
            .filter(|entry| entry.is_pending())
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.execute_at.cmp(&b.execute_at).then_with(|| a.id.cmp(&b.id)));
        pending
    }

    pub fn next(&self) -> Option<ScheduleEntry> {
        self.pending().into_iter().next()
    }

    /// Submits a schedule or timer. The new entry shows up after the refresh
    /// that follows a successful submission.
    pub async fn create(&self, request: CreateScheduleRequest) -> Result<(), ScheduleError> {
        request
            .validate(OffsetDateTime::now_utc())
            .map_err(ScheduleError::InvalidRequest)?;

        self.api.create_schedule(&self.widget_id, &request).await?;
        tracing::info!("Schedule created for {}", self.widget_id);

        self.refresh_after_mutation().await;
        Ok(())
    }

    pub async fn cancel(&self, entry_id: &str) -> Result<(), ScheduleError> {
        let known = self
            .entries
            .read()
            .list
            .iter()
            .find(|entry| entry.id == entry_id)
            .map(|entry| entry.status);
        if let Some(status) = known.filter(|status| status.is_terminal()) {
            return Err(ScheduleError::InvalidRequest(format!(
                "schedule {} is already {:?}",
                entry_id, status
            )));
        }

        self.api.cancel_schedule(&self.widget_id, entry_id).await?;
        tracing::info!("Schedule {} cancelled for {}", entry_id, self.widget_id);

        self.refresh_after_mutation().await;
        Ok(())
    }

    async fn refresh_after_mutation(&self) {
        if let Err(e) = self.refresh().await {
            tracing::warn!(
                "Schedule list of {} is stale after a successful change: {}",
                self.widget_id,
                e
            );
        }
    }

    /// Replaces the local list with the server's. Returns the entry count.
    pub async fn refresh(&self) -> Result<usize, CommandError> {
        let _serialized = self.refresh_lock.lock().await;

        let fetched = self.api.list_schedules(&self.widget_id).await?;
        if self.is_closed() {
            tracing::debug!("Discarding schedules of closed widget {}", self.widget_id);
            return Ok(0);
        }

        let count = {
            let mut entries = self.entries.write();
            let observed: HashMap<&str, _> = entries
                .list
                .iter()
                .map(|entry| (entry.id.as_str(), entry.status))
                .collect();

            let mut next_list = Vec::with_capacity(fetched.len());
            for mut entry in fetched {
                if entry.widget_id != self.widget_id {
                    tracing::warn!(
                        "Ignoring schedule {} of widget {} in list for {}",
                        entry.id,
                        entry.widget_id,
                        self.widget_id
                    );
                    continue;
                }
                if let Some(&previous) = observed.get(entry.id.as_str()) {
                    if !previous.can_transition_to(entry.status) {
                        tracing::warn!(
                            "Schedule {} reported {:?} after {:?}, keeping {:?}",
                            entry.id,
                            entry.status,
                            previous,
                            previous
                        );
                        entry.status = previous;
                    }
                }
                next_list.push(entry);
            }

            let count = next_list.len();
            *entries = Entries {
                list: next_list,
                fetched: true,
            };
            count
        };

        self.publish_next();
        Ok(count)
    }

    fn publish_next(&self) {
        let Some(cache) = self.cache.upgrade() else {
            return;
        };
        let next_at = self.next().map(|entry| entry.execute_at);
        cache.patch(&self.widget_id, WidgetPatch::next_scheduled_at(next_at));
    }

    /// Stops reacting to the stream and discards later refresh results.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let subscription = self.subscription.lock().take();
        drop(subscription);
    }
}

#[cfg(test)]
mod tests {
    use time::Duration;
    use widgetsync_api::{
        Layout, ScheduleNotice, ScheduleStatus, WidgetDeleted, WidgetKind, WidgetValue,
    };

    use super::*;
    use crate::mock::{MockCommandApi, Operation};
    use crate::scope::ViewScope;

    fn led() -> WidgetRecord {
        WidgetRecord {
            id: "pump".to_string(),
            dashboard_id: "d1".to_string(),
            device_id: Some("dev1".to_string()),
            kind: WidgetKind::Led,
            label: "Pump".to_string(),
            value: WidgetValue::Bool(false),
            binding_key: None,
            virtual_pin: Some("v1".to_string()),
            layout: Layout::default(),
            next_scheduled_at: None,
        }
    }

    fn setup() -> (Arc<MockCommandApi>, Arc<WidgetCache>, ScheduleRegistry) {
        let api = Arc::new(MockCommandApi::with_widgets(vec![led()]));
        let cache = Arc::new(WidgetCache::new(ViewScope::Dashboard("d1".to_string())));
        cache.upsert(led()).unwrap();
        let registry = ScheduleRegistry::new(&led(), api.clone(), &cache);
        (api, cache, registry)
    }

    #[tokio::test]
    async fn test_create_refreshes_from_server() {
        let (api, cache, registry) = setup();
        let at = OffsetDateTime::now_utc() + Duration::hours(1);

        registry.create(CreateScheduleRequest::at(true, at)).await.unwrap();

        let pending = registry.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].status, ScheduleStatus::Pending);
        assert_eq!(pending[0].execute_at, at);
        assert_eq!(api.calls(Operation::ListSchedules), 1);
        assert_eq!(cache.get("pump").unwrap().next_scheduled_at, Some(at));
    }

    #[tokio::test]
    async fn test_failed_create_leaves_state_untouched() {
        let (api, _cache, registry) = setup();
        api.fail_next(
            Operation::CreateSchedule,
            CommandError::failure(Some(422), "Too many schedules"),
        );

        let error = registry
            .create(CreateScheduleRequest::after(true, 60))
            .await
            .unwrap_err();

        assert_eq!(error.to_string(), "Too many schedules");
        assert!(registry.entries().is_empty());
        assert!(!registry.is_fetched());
        assert_eq!(api.calls(Operation::ListSchedules), 0);
    }

    #[tokio::test]
    async fn test_invalid_request_never_reaches_server() {
        let (api, _cache, registry) = setup();
        let past = OffsetDateTime::now_utc() - Duration::minutes(1);

        let error = registry
            .create(CreateScheduleRequest::at(true, past))
            .await
            .unwrap_err();

        assert!(matches!(error, ScheduleError::InvalidRequest(_)));
        assert_eq!(api.calls(Operation::CreateSchedule), 0);
    }

    #[tokio::test]
    async fn test_pending_is_ordered_and_next_is_earliest() {
        let (_api, cache, registry) = setup();
        let now = OffsetDateTime::now_utc();

        registry
            .create(CreateScheduleRequest::at(true, now + Duration::hours(3)))
            .await
            .unwrap();
        registry
            .create(CreateScheduleRequest::at(false, now + Duration::hours(1)))
            .await
            .unwrap();

        let times: Vec<_> = registry.pending().iter().map(|e| e.execute_at).collect();
        assert_eq!(times, vec![now + Duration::hours(1), now + Duration::hours(3)]);
        assert_eq!(registry.next().unwrap().execute_at, now + Duration::hours(1));
        assert_eq!(
            cache.get("pump").unwrap().next_scheduled_at,
            Some(now + Duration::hours(1))
        );
    }

    #[tokio::test]
    async fn test_cancel_refreshes_and_clears_next() {
        let (_api, cache, registry) = setup();
        registry
            .create(CreateScheduleRequest::after(true, 300))
            .await
            .unwrap();
        let entry = registry.next().unwrap();

        registry.cancel(&entry.id).await.unwrap();

        assert!(registry.pending().is_empty());
        assert_eq!(registry.entries()[0].status, ScheduleStatus::Cancelled);
        assert_eq!(cache.get("pump").unwrap().next_scheduled_at, None);

        let again = registry.cancel(&entry.id).await.unwrap_err();
        assert!(matches!(again, ScheduleError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_terminal_status_is_never_reversed() {
        let (api, _cache, registry) = setup();
        registry
            .create(CreateScheduleRequest::after(true, 300))
            .await
            .unwrap();
        let id = registry.next().unwrap().id;

        api.set_schedule_status(&id, ScheduleStatus::Executed);
        registry.refresh().await.unwrap();
        api.set_schedule_status(&id, ScheduleStatus::Pending);
        registry.refresh().await.unwrap();

        assert_eq!(registry.entries()[0].status, ScheduleStatus::Executed);
        assert!(registry.next().is_none());
    }

    #[tokio::test]
    async fn test_events_from_other_dashboards_are_ignored() {
        let (api, _cache, registry) = setup();
        let registry = Arc::new(registry);
        let hub = SubscriptionHub::new();
        registry.attach(&hub);

        hub.publish(&StreamEvent::ScheduleExecuted(ScheduleNotice {
            widget_id: "pump".to_string(),
            schedule_id: None,
            dashboard_id: Some("d2".to_string()),
        }));
        hub.publish(&StreamEvent::WidgetDeleted(WidgetDeleted {
            dashboard_id: "d2".to_string(),
            device_id: None,
            widget_id: "pump".to_string(),
        }));
        tokio::task::yield_now().await;

        assert!(!registry.is_closed());
        assert_eq!(api.calls(Operation::ListSchedules), 0);
        assert_eq!(hub.listener_count(), 1);
    }

    #[tokio::test]
    async fn test_refresh_after_close_is_discarded() {
        let (_api, _cache, registry) = setup();
        registry.close();

        assert_eq!(registry.refresh().await, Ok(0));
        assert!(!registry.is_fetched());
    }
}
