use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use time::{Duration, OffsetDateTime};
use tokio::sync::Semaphore;
use widgetsync_api::{
    CreateScheduleRequest, CreateWidgetRequest, Id, ScheduleEntry, ScheduleNotice, ScheduleStatus,
    ScheduleTime, StreamEvent, WidgetRecord, WidgetUpdate, WidgetValue, encode_event,
};

use crate::api::CommandApi;
use crate::error::CommandError;
use crate::transport::{ChannelTransport, Frame};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    SetActuatorState,
    CreateSchedule,
    CancelSchedule,
    ListSchedules,
    FetchWidgets,
    CreateWidget,
    DeleteWidget,
}

#[derive(Default)]
struct Backend {
    widgets: BTreeMap<Id, WidgetRecord>,
    schedules: Vec<ScheduleEntry>,
    failures: HashMap<Operation, CommandError>,
    calls: HashMap<Operation, usize>,
}

/// In-memory [`CommandApi`] for tests and the simulator.
///
/// Counts calls per operation, can fail the next call of an operation and
/// can hold calls in flight until released.
#[derive(Default)]
pub struct MockCommandApi {
    backend: Mutex<Backend>,
    gates: Mutex<HashMap<Operation, Arc<Semaphore>>>,
    stream: Mutex<Option<ChannelTransport>>,
    next_id: AtomicU64,
}

impl MockCommandApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_widgets(widgets: Vec<WidgetRecord>) -> Self {
        let api = Self::new();
        for widget in widgets {
            api.insert_widget(widget);
        }
        api
    }

    /// Echoes actuator changes and executed schedules back as stream frames.
    pub fn with_stream(self, transport: ChannelTransport) -> Self {
        *self.stream.lock() = Some(transport);
        self
    }

    pub fn insert_widget(&self, widget: WidgetRecord) {
        self.backend.lock().widgets.insert(widget.id.clone(), widget);
    }

    pub fn widget(&self, id: &str) -> Option<WidgetRecord> {
        self.backend.lock().widgets.get(id).cloned()
    }

    pub fn widgets(&self) -> Vec<WidgetRecord> {
        self.backend.lock().widgets.values().cloned().collect()
    }

    pub fn schedules(&self, widget_id: &str) -> Vec<ScheduleEntry> {
        self.backend
            .lock()
            .schedules
            .iter()
            .filter(|entry| entry.widget_id == widget_id)
            .cloned()
            .collect()
    }

    pub fn set_schedule_status(&self, entry_id: &str, status: ScheduleStatus) {
        let mut backend = self.backend.lock();
        if let Some(entry) = backend.schedules.iter_mut().find(|entry| entry.id == entry_id) {
            entry.status = status;
        }
    }

    /// Makes the next call of `operation` fail with `error`.
    pub fn fail_next(&self, operation: Operation, error: CommandError) {
        self.backend.lock().failures.insert(operation, error);
    }

    pub fn calls(&self, operation: Operation) -> usize {
        self.backend.lock().calls.get(&operation).copied().unwrap_or(0)
    }

    /// Holds every call of `operation` until [`MockCommandApi::release`].
    pub fn hold(&self, operation: Operation) {
        self.gates.lock().insert(operation, Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self, operation: Operation) {
        if let Some(gate) = self.gates.lock().remove(&operation) {
            gate.close();
        }
    }

    pub fn hold_actuator(&self) {
        self.hold(Operation::SetActuatorState);
    }

    pub fn release_actuator(&self) {
        self.release(Operation::SetActuatorState);
    }

    /// Executes pending schedules due at `now`, applying their states.
    pub fn execute_due(&self, now: OffsetDateTime) -> Vec<ScheduleEntry> {
        let executed: Vec<ScheduleEntry> = {
            let mut backend = self.backend.lock();
            let mut executed = Vec::new();
            for entry in backend.schedules.iter_mut() {
                if entry.is_pending() && entry.execute_at <= now {
                    entry.status = ScheduleStatus::Executed;
                    executed.push(entry.clone());
                }
            }
            for entry in &executed {
                if let Some(widget) = backend.widgets.get_mut(&entry.widget_id) {
                    widget.value = WidgetValue::Bool(entry.desired_state);
                }
            }
            executed
        };

        for entry in &executed {
            if let Some(widget) = self.widget(&entry.widget_id) {
                self.echo(StreamEvent::WidgetUpdate(WidgetUpdate {
                    dashboard_id: widget.dashboard_id.clone(),
                    device_id: widget.device_id.clone(),
                    widget: widget.clone(),
                }));
                self.echo(StreamEvent::ScheduleExecuted(ScheduleNotice {
                    widget_id: entry.widget_id.clone(),
                    schedule_id: Some(entry.id.clone()),
                    dashboard_id: Some(widget.dashboard_id),
                }));
            }
        }

        executed
    }

    fn begin(&self, operation: Operation) {
        *self.backend.lock().calls.entry(operation).or_default() += 1;
    }

    fn take_failure(&self, operation: Operation) -> Result<(), CommandError> {
        match self.backend.lock().failures.remove(&operation) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn pass_gate(&self, operation: Operation) {
        let gate = self.gates.lock().get(&operation).cloned();
        if let Some(gate) = gate {
            // Acquire only returns once the gate is closed.
            let _ = gate.acquire().await;
        }
    }

    fn enter(&self, operation: Operation) -> Result<(), CommandError> {
        self.begin(operation);
        self.take_failure(operation)
    }

    fn next_id(&self, prefix: &str) -> Id {
        format!("{}-{}", prefix, self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn echo(&self, event: StreamEvent) {
        let Some(transport) = self.stream.lock().clone() else {
            return;
        };
        match encode_event(&event) {
            Ok(text) => {
                if let Err(e) = transport.try_send(Frame::Text(text)) {
                    tracing::debug!("Mock stream echo dropped: {}", e);
                }
            }
            Err(e) => tracing::warn!("Failed to encode mock event: {}", e),
        }
    }

    fn not_found(what: &str, id: &str) -> CommandError {
        CommandError::failure(Some(404), format!("{} {} not found", what, id))
    }
}

#[async_trait]
impl CommandApi for MockCommandApi {
    async fn set_actuator_state(
        &self,
        widget_id: &str,
        desired_state: bool,
    ) -> Result<WidgetRecord, CommandError> {
        self.begin(Operation::SetActuatorState);
        self.pass_gate(Operation::SetActuatorState).await;
        self.take_failure(Operation::SetActuatorState)?;

        let record = {
            let mut backend = self.backend.lock();
            let widget = backend
                .widgets
                .get_mut(widget_id)
                .ok_or_else(|| Self::not_found("Widget", widget_id))?;
            if !widget.is_actuator() {
                return Err(CommandError::failure(
                    Some(400),
                    format!("Widget {} is not an actuator", widget_id),
                ));
            }
            widget.value = WidgetValue::Bool(desired_state);
            widget.clone()
        };

        self.echo(StreamEvent::WidgetUpdate(WidgetUpdate {
            dashboard_id: record.dashboard_id.clone(),
            device_id: record.device_id.clone(),
            widget: record.clone(),
        }));

        Ok(record)
    }

    async fn create_schedule(
        &self,
        widget_id: &str,
        request: &CreateScheduleRequest,
    ) -> Result<(), CommandError> {
        self.enter(Operation::CreateSchedule)?;

        if self.widget(widget_id).is_none() {
            return Err(Self::not_found("Widget", widget_id));
        }

        let (execute_at, duration_seconds) = match request.time {
            ScheduleTime::At { execute_at } => (execute_at, None),
            ScheduleTime::After { duration_seconds } => (
                OffsetDateTime::now_utc() + Duration::seconds(duration_seconds as i64),
                Some(duration_seconds),
            ),
        };

        let entry = ScheduleEntry {
            id: self.next_id("sch"),
            widget_id: widget_id.to_string(),
            desired_state: request.desired_state,
            execute_at,
            duration_seconds,
            label: request.label.clone(),
            status: ScheduleStatus::Pending,
        };
        self.backend.lock().schedules.push(entry);

        Ok(())
    }

    async fn cancel_schedule(&self, widget_id: &str, entry_id: &str) -> Result<(), CommandError> {
        self.enter(Operation::CancelSchedule)?;

        let mut backend = self.backend.lock();
        let entry = backend
            .schedules
            .iter_mut()
            .find(|entry| entry.id == entry_id && entry.widget_id == widget_id)
            .ok_or_else(|| Self::not_found("Schedule", entry_id))?;
        if !entry.is_pending() {
            return Err(CommandError::failure(
                Some(409),
                format!("Schedule {} is no longer pending", entry_id),
            ));
        }
        entry.status = ScheduleStatus::Cancelled;

        Ok(())
    }

    async fn list_schedules(&self, widget_id: &str) -> Result<Vec<ScheduleEntry>, CommandError> {
        self.enter(Operation::ListSchedules)?;
        Ok(self.schedules(widget_id))
    }

    async fn fetch_widgets(&self, dashboard_id: &str) -> Result<Vec<WidgetRecord>, CommandError> {
        self.enter(Operation::FetchWidgets)?;

        Ok(self
            .backend
            .lock()
            .widgets
            .values()
            .filter(|widget| widget.dashboard_id == dashboard_id)
            .cloned()
            .collect())
    }

    async fn create_widget(
        &self,
        dashboard_id: &str,
        request: &CreateWidgetRequest,
    ) -> Result<WidgetRecord, CommandError> {
        self.begin(Operation::CreateWidget);
        self.pass_gate(Operation::CreateWidget).await;
        self.take_failure(Operation::CreateWidget)?;

        let record = request.to_record(self.next_id("w"), dashboard_id);
        self.insert_widget(record.clone());

        Ok(record)
    }

    async fn delete_widget(&self, dashboard_id: &str, widget_id: &str) -> Result<(), CommandError> {
        self.enter(Operation::DeleteWidget)?;

        let mut backend = self.backend.lock();
        match backend.widgets.get(widget_id) {
            Some(widget) if widget.dashboard_id == dashboard_id => {
                backend.widgets.remove(widget_id);
                backend.schedules.retain(|entry| entry.widget_id != widget_id);
                Ok(())
            }
            _ => Err(Self::not_found("Widget", widget_id)),
        }
    }
}
