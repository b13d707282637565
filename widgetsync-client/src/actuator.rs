use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use time::OffsetDateTime;
use tokio::time::{Instant, timeout};
use widgetsync_api::{Id, StreamEvent, WidgetPatch, WidgetRecord, WidgetValue};

use crate::api::CommandApi;
use crate::cache::WidgetCache;
use crate::error::CommandError;
use crate::hub::{Subscription, SubscriptionHub};
use crate::scope::{matches_dashboard, matches_virtual_pin, may_concern_dashboard};
use crate::settings::ActuatorConfig;

/// Local view of an actuator's on/off state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActuatorState {
    Idle { state: bool },
    Pending(PendingAction),
}

impl ActuatorState {
    /// State currently displayed: the optimistic one while pending.
    pub fn current(&self) -> bool {
        match self {
            ActuatorState::Idle { state } => *state,
            ActuatorState::Pending(action) => action.requested,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, ActuatorState::Pending(_))
    }
}

/// The single actuation request allowed in flight per widget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAction {
    pub widget_id: Id,
    pub requested: bool,
    pub previous: bool,
    pub submitted_at: OffsetDateTime,
    ticket: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Another request is in flight
    Pending,
    /// A stream-applied state is still inside its suppression window
    Suppressed,
    /// The controller was closed
    Closed,
}

/// Successful result of [`ActuatorController::toggle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    /// The command succeeded and the optimistic state stands
    Applied { state: bool },
    /// The stream settled the state before the command returned
    Settled { state: bool },
    /// The tap was dropped without issuing a command
    Ignored(IgnoreReason),
}

struct Inner {
    state: ActuatorState,
    suppressed_until: Option<Instant>,
    next_ticket: u64,
    closed: bool,
    subscription: Option<Subscription>,
}

/// Optimistic on/off control of one `led` widget.
///
/// A toggle flips the displayed state at once and issues the command. Only
/// one command is in flight at a time; further taps are dropped. Success
/// keeps the optimistic state, failure or timeout rolls it back, and a state
/// pushed by the stream wins over both.
pub struct ActuatorController {
    widget_id: Id,
    dashboard_id: Id,
    device_id: Option<Id>,
    virtual_pin: Option<String>,
    api: Arc<dyn CommandApi>,
    cache: Weak<WidgetCache>,
    config: ActuatorConfig,
    inner: Mutex<Inner>,
}

impl ActuatorController {
    pub fn new(
        record: &WidgetRecord,
        api: Arc<dyn CommandApi>,
        cache: &Arc<WidgetCache>,
        config: ActuatorConfig,
    ) -> Self {
        Self {
            widget_id: record.id.clone(),
            dashboard_id: record.dashboard_id.clone(),
            device_id: record.device_id.clone(),
            virtual_pin: record.virtual_pin.clone(),
            api,
            cache: Arc::downgrade(cache),
            config,
            inner: Mutex::new(Inner {
                state: ActuatorState::Idle {
                    state: record.value.coerce_bool().unwrap_or(false),
                },
                suppressed_until: None,
                next_ticket: 1,
                closed: false,
                subscription: None,
            }),
        }
    }

    /// Starts listening to the stream. The hub holds only a weak reference.
    pub fn attach(self: &Arc<Self>, hub: &SubscriptionHub) {
        let weak = Arc::downgrade(self);
        let subscription = hub.attach(move |event| {
            if let Some(controller) = weak.upgrade() {
                controller.handle_event(event);
            }
        });

        let previous = self.inner.lock().subscription.replace(subscription);
        drop(previous);
    }

    pub fn widget_id(&self) -> &str {
        &self.widget_id
    }

    pub fn state(&self) -> ActuatorState {
        self.inner.lock().state.clone()
    }

    pub fn current(&self) -> bool {
        self.inner.lock().state.current()
    }

    pub fn is_pending(&self) -> bool {
        self.inner.lock().state.is_pending()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn is_suppressed(&self) -> bool {
        self.inner
            .lock()
            .suppressed_until
            .is_some_and(|until| Instant::now() < until)
    }

    /// Flips the actuator. Errors carry the command failure after the
    /// optimistic state has been rolled back.
    pub async fn toggle(&self) -> Result<ToggleOutcome, CommandError> {
        let (ticket, requested, previous) = {
            let mut inner = self.inner.lock();

            if inner.closed {
                return Ok(ToggleOutcome::Ignored(IgnoreReason::Closed));
            }
            let previous = match &inner.state {
                ActuatorState::Pending(_) => {
                    tracing::debug!("Toggle of {} dropped: request in flight", self.widget_id);
                    return Ok(ToggleOutcome::Ignored(IgnoreReason::Pending));
                }
                ActuatorState::Idle { state } => *state,
            };
            if inner.suppressed_until.is_some_and(|until| Instant::now() < until) {
                tracing::debug!("Toggle of {} dropped: inside suppression window", self.widget_id);
                return Ok(ToggleOutcome::Ignored(IgnoreReason::Suppressed));
            }

            let ticket = inner.next_ticket;
            inner.next_ticket += 1;
            inner.state = ActuatorState::Pending(PendingAction {
                widget_id: self.widget_id.clone(),
                requested: !previous,
                previous,
                submitted_at: OffsetDateTime::now_utc(),
                ticket,
            });

            (ticket, !previous, previous)
        };

        self.write_cache(requested);

        let result = match timeout(
            self.config.command_timeout(),
            self.api.set_actuator_state(&self.widget_id, requested),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(CommandError::Timeout),
        };

        self.resolve(ticket, requested, previous, result)
    }

    fn resolve(
        &self,
        ticket: u64,
        requested: bool,
        previous: bool,
        result: Result<WidgetRecord, CommandError>,
    ) -> Result<ToggleOutcome, CommandError> {
        let settled = {
            let mut inner = self.inner.lock();

            if inner.closed {
                tracing::debug!("Discarding command result for closed widget {}", self.widget_id);
                return Ok(ToggleOutcome::Ignored(IgnoreReason::Closed));
            }

            let still_pending =
                matches!(&inner.state, ActuatorState::Pending(action) if action.ticket == ticket);
            if !still_pending {
                let state = inner.state.current();
                return match result {
                    Ok(_) => Ok(ToggleOutcome::Settled { state }),
                    Err(e) => {
                        tracing::warn!(
                            "Command for {} failed after the stream settled it: {}",
                            self.widget_id,
                            e
                        );
                        Err(e)
                    }
                };
            }

            let settled = if result.is_ok() { requested } else { previous };
            inner.state = ActuatorState::Idle { state: settled };
            settled
        };

        match result {
            Ok(record) => {
                if record.value.coerce_bool().is_some_and(|value| value != requested) {
                    tracing::debug!(
                        "Command response for {} disagrees with requested state",
                        self.widget_id
                    );
                }
                Ok(ToggleOutcome::Applied { state: settled })
            }
            Err(e) => {
                tracing::warn!("Rolling back {} after {}: {}", self.widget_id, e.label(), e);
                self.write_cache(settled);
                Err(e)
            }
        }
    }

    /// Applies a stream-confirmed state. Settling a pending request opens
    /// the suppression window; an idle controller just takes the value.
    pub fn apply_stream_state(&self, state: bool) {
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }
            if let ActuatorState::Pending(action) = &inner.state {
                tracing::debug!(
                    "Stream settled {} to {} while {} was pending",
                    self.widget_id,
                    state,
                    action.requested
                );
                inner.suppressed_until = Some(Instant::now() + self.config.suppression_window());
            }
            inner.state = ActuatorState::Idle { state };
        }

        self.write_cache(state);
    }

    /// Re-seeds an idle controller from a refreshed record. A pending
    /// controller is left alone. Returns whether the state was taken.
    pub fn reseed(&self, state: bool) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            ActuatorState::Idle { .. } if !inner.closed => {
                inner.state = ActuatorState::Idle { state };
                true
            }
            _ => false,
        }
    }

    /// Stops listening and discards any later command results.
    pub fn close(&self) {
        let subscription = {
            let mut inner = self.inner.lock();
            inner.closed = true;
            inner.subscription.take()
        };
        drop(subscription);
    }

    pub fn handle_event(&self, event: &StreamEvent) {
        match event {
            StreamEvent::WidgetUpdate(update)
                if update.widget.id == self.widget_id
                    && matches_dashboard(event, &self.dashboard_id) =>
            {
                match update.widget.value.coerce_bool() {
                    Some(state) => self.apply_stream_state(state),
                    None => tracing::debug!("Ignoring non-boolean value for {}", self.widget_id),
                }
            }
            StreamEvent::TelemetryUpdate(update) => {
                let (Some(device_id), Some(pin)) = (&self.device_id, &self.virtual_pin) else {
                    return;
                };
                if !may_concern_dashboard(event, &self.dashboard_id)
                    || !matches_virtual_pin(event, device_id, pin)
                {
                    return;
                }
                let reading = update.get_ignore_case(pin);
                if let Some(state) = reading.and_then(WidgetValue::coerce_bool) {
                    self.apply_stream_state(state);
                }
            }
            StreamEvent::WidgetDeleted(deleted)
                if deleted.widget_id == self.widget_id
                    && matches_dashboard(event, &self.dashboard_id) =>
            {
                tracing::debug!("Widget {} deleted, closing controller", self.widget_id);
                self.close();
            }
            StreamEvent::WidgetUpdate(_)
            | StreamEvent::WidgetDeleted(_)
            | StreamEvent::ScheduleExecuted(_)
            | StreamEvent::ScheduleCancelled(_) => {}
        }
    }

    fn write_cache(&self, state: bool) {
        if let Some(cache) = self.cache.upgrade() {
            cache.patch(&self.widget_id, WidgetPatch::value(state));
        }
    }
}
