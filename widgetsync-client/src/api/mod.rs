mod rest;

pub use rest::RestCommandApi;

use async_trait::async_trait;
use widgetsync_api::{CreateScheduleRequest, CreateWidgetRequest, ScheduleEntry, WidgetRecord};

use crate::error::CommandError;

/// Outbound command collaborator. Every mutation the engine makes goes
/// through here; nothing is written back into the stream.
#[async_trait]
pub trait CommandApi: Send + Sync {
    /// Drives an actuator and returns its canonical record
    async fn set_actuator_state(
        &self,
        widget_id: &str,
        desired_state: bool,
    ) -> Result<WidgetRecord, CommandError>;

    async fn create_schedule(
        &self,
        widget_id: &str,
        request: &CreateScheduleRequest,
    ) -> Result<(), CommandError>;

    async fn cancel_schedule(&self, widget_id: &str, entry_id: &str) -> Result<(), CommandError>;

    async fn list_schedules(&self, widget_id: &str) -> Result<Vec<ScheduleEntry>, CommandError>;

    async fn fetch_widgets(&self, dashboard_id: &str) -> Result<Vec<WidgetRecord>, CommandError>;

    async fn create_widget(
        &self,
        dashboard_id: &str,
        request: &CreateWidgetRequest,
    ) -> Result<WidgetRecord, CommandError>;

    async fn delete_widget(&self, dashboard_id: &str, widget_id: &str) -> Result<(), CommandError>;
}
