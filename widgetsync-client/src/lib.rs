pub mod actuator;
pub mod api;
pub mod cache;
pub mod coerce;
pub mod error;
pub mod hub;
pub mod listeners;
pub mod reconciler;
pub mod schedule;
pub mod scope;
pub mod session;
pub mod settings;
pub mod transport;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use actuator::{ActuatorController, ActuatorState, IgnoreReason, PendingAction, ToggleOutcome};
pub use api::{CommandApi, RestCommandApi};
pub use cache::{CacheChange, CacheSubscription, WidgetCache};
pub use error::{CacheError, CommandError, ScheduleError, SessionError, TransportError};
pub use hub::{HubStats, Subscription, SubscriptionHub};
pub use reconciler::{ReconcilerHandle, ReconcilerStats, TelemetryReconciler};
pub use schedule::ScheduleRegistry;
pub use scope::ViewScope;
pub use session::DashboardSession;
pub use settings::{ActuatorConfig, ApiConfig, Settings, SettingsError, StreamConfig};
pub use transport::{ChannelTransport, Frame, FrameSource, StreamPump, Transport};
