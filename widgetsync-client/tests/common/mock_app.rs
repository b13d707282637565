#![allow(dead_code)]

use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinHandle;

use widgetsync_api::{Layout, StreamEvent, WidgetKind, WidgetRecord, WidgetValue, encode_event};
use widgetsync_client::mock::MockCommandApi;
use widgetsync_client::{
    ActuatorConfig, ChannelTransport, DashboardSession, Frame, StreamPump, SubscriptionHub,
    TransportError,
};

pub const DASHBOARD: &str = "dash-home";
pub const DEVICE: &str = "dev-greenhouse";

pub struct MockApp {
    pub hub: Arc<SubscriptionHub>,
    pub api: Arc<MockCommandApi>,
    pub transport: ChannelTransport,
    pub pump: JoinHandle<Result<u64, TransportError>>,
    pub session: DashboardSession,
}

impl MockApp {
    pub async fn new(widgets: Vec<WidgetRecord>) -> Self {
        Self::with_config(widgets, ActuatorConfig::default()).await
    }

    pub async fn with_config(widgets: Vec<WidgetRecord>, config: ActuatorConfig) -> Self {
        let hub = Arc::new(SubscriptionHub::new());
        let (transport, pump) = StreamPump::channel(hub.clone(), 64);
        let api = Arc::new(MockCommandApi::with_widgets(widgets).with_stream(transport.clone()));
        let session = DashboardSession::open(DASHBOARD, &hub, api.clone(), config)
            .await
            .unwrap();

        Self {
            hub,
            api,
            transport,
            pump: pump.spawn(),
            session,
        }
    }

    /// Pushes an event through the transport, as the server would.
    pub async fn push(&self, event: &StreamEvent) {
        self.push_raw(encode_event(event).unwrap()).await;
    }

    pub async fn push_raw(&self, text: impl Into<String>) {
        let before = self.hub.stats().received;
        self.transport.send(Frame::Text(text.into())).await.unwrap();
        self.wait_for_frames(before + 1).await;
    }

    /// Yields until the hub has seen at least `count` frames.
    pub async fn wait_for_frames(&self, count: u64) {
        while self.hub.stats().received < count {
            tokio::task::yield_now().await;
        }
    }

    pub fn value(&self, widget_id: &str) -> WidgetValue {
        self.session.cache().get(widget_id).unwrap().value
    }
}

pub fn led(id: &str, pin: &str) -> WidgetRecord {
    WidgetRecord {
        id: id.to_string(),
        dashboard_id: DASHBOARD.to_string(),
        device_id: Some(DEVICE.to_string()),
        kind: WidgetKind::Led,
        label: id.to_string(),
        value: WidgetValue::Bool(false),
        binding_key: None,
        virtual_pin: Some(pin.to_string()),
        layout: Layout::default(),
        next_scheduled_at: None,
    }
}

pub fn gauge(id: &str, key: &str) -> WidgetRecord {
    WidgetRecord {
        id: id.to_string(),
        dashboard_id: DASHBOARD.to_string(),
        device_id: Some(DEVICE.to_string()),
        kind: WidgetKind::Gauge,
        label: id.to_string(),
        value: WidgetValue::Number(0.0),
        binding_key: Some(key.to_string()),
        virtual_pin: None,
        layout: Layout::default(),
        next_scheduled_at: None,
    }
}

/// Telemetry frame text for `DEVICE` with the given `data` object.
pub fn telemetry_frame(data: Value) -> String {
    serde_json::json!({
        "type": "telemetry_update",
        "deviceId": DEVICE,
        "data": data,
    })
    .to_string()
}
