use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;

use widgetsync_api::{StreamEvent, WidgetDeleted, WidgetUpdate, WidgetValue};
use widgetsync_client::{
    CacheChange, TelemetryReconciler, ViewScope, WidgetCache,
};

use crate::common::mock_app::{DASHBOARD, DEVICE, MockApp, gauge, led, telemetry_frame};

mod common;

#[tokio::test]
async fn test_pin_telemetry_only_touches_its_own_led() {
    let app = MockApp::new(vec![led("pump", "v1"), led("fan", "v2"), gauge("temp", "temp")]).await;
    let fan_before = app.session.cache().get("fan").unwrap();
    let temp_before = app.session.cache().get("temp").unwrap();

    app.push_raw(telemetry_frame(json!({ "v1": true }))).await;

    assert_eq!(app.value("pump"), WidgetValue::Bool(true));
    assert_eq!(app.session.cache().get("fan").unwrap(), fan_before);
    assert_eq!(app.session.cache().get("temp").unwrap(), temp_before);
}

#[tokio::test]
async fn test_shared_device_keys_do_not_bleed() {
    let app = MockApp::new(vec![gauge("temp", "temperature"), gauge("hum", "humidity")]).await;

    app.push_raw(telemetry_frame(json!({ "temperature": 24.5, "Humidity": 80 })))
        .await;

    assert_eq!(app.value("temp"), WidgetValue::Number(24.5));
    // Telemetry keys match exactly; only virtual pins ignore case.
    assert_eq!(app.value("hum"), WidgetValue::Number(0.0));
}

#[tokio::test]
async fn test_bad_frames_are_dropped_and_stream_continues() {
    let app = MockApp::new(vec![gauge("temp", "temp")]).await;

    app.push_raw("{ not json").await;
    app.push_raw(r#"{"deviceId":"dev-greenhouse"}"#).await;
    app.push_raw(r#"{"type":"firmware_update"}"#).await;
    app.push_raw(telemetry_frame(json!({ "temp": "19.5" }))).await;

    assert_eq!(app.value("temp"), WidgetValue::Number(19.5));
    assert_eq!(app.hub.stats().dropped, 3);
}

#[tokio::test]
async fn test_widget_update_twice_equals_once() {
    let app = MockApp::new(vec![gauge("temp", "temp")]).await;
    let mut changed = gauge("temp", "temp");
    changed.label = "Greenhouse".to_string();
    changed.value = WidgetValue::Number(30.0);
    let event = StreamEvent::WidgetUpdate(WidgetUpdate {
        dashboard_id: DASHBOARD.to_string(),
        device_id: Some(DEVICE.to_string()),
        widget: changed.clone(),
    });

    app.push(&event).await;
    let once = app.session.widgets();
    app.push(&event).await;

    assert_eq!(app.session.widgets(), once);
    assert_eq!(app.session.cache().get("temp").unwrap(), changed);
}

#[tokio::test]
async fn test_events_for_other_dashboards_are_ignored() {
    let app = MockApp::new(vec![gauge("temp", "temp")]).await;
    let mut foreign = gauge("other", "temp");
    foreign.dashboard_id = "dash-office".to_string();

    app.push(&StreamEvent::WidgetUpdate(WidgetUpdate {
        dashboard_id: "dash-office".to_string(),
        device_id: Some(DEVICE.to_string()),
        widget: foreign,
    }))
    .await;
    app.push(&StreamEvent::WidgetDeleted(WidgetDeleted {
        dashboard_id: "dash-office".to_string(),
        device_id: None,
        widget_id: "temp".to_string(),
    }))
    .await;

    assert_eq!(app.session.widgets().len(), 1);
    assert!(app.session.cache().contains("temp"));
}

#[tokio::test]
async fn test_server_deletion_removes_widget_and_controller() {
    let app = MockApp::new(vec![led("pump", "v1")]).await;
    let controller = app.session.actuator("pump").unwrap();

    app.push(&StreamEvent::WidgetDeleted(WidgetDeleted {
        dashboard_id: DASHBOARD.to_string(),
        device_id: Some(DEVICE.to_string()),
        widget_id: "pump".to_string(),
    }))
    .await;

    assert!(!app.session.cache().contains("pump"));
    assert!(app.session.actuator("pump").is_none());
    assert!(controller.is_closed());
}

#[tokio::test]
async fn test_device_view_reconciles_independently() {
    let app = MockApp::new(vec![gauge("temp", "temp")]).await;

    let device_cache = Arc::new(WidgetCache::new(ViewScope::Device(DEVICE.to_string())));
    let mut detail = gauge("temp-detail", "temp");
    detail.dashboard_id = "dash-device".to_string();
    device_cache.replace_all(vec![detail]);
    let _routing = TelemetryReconciler::attach(&app.hub, &device_cache);

    app.push_raw(telemetry_frame(json!({ "temp": 21.0 }))).await;

    assert_eq!(app.value("temp"), WidgetValue::Number(21.0));
    assert_eq!(
        device_cache.get("temp-detail").unwrap().value,
        WidgetValue::Number(21.0)
    );

    app.session.update_layout("temp", widgetsync_api::Layout::new(2, 2, 1)).unwrap();
    assert_eq!(
        device_cache.get("temp-detail").unwrap().layout,
        widgetsync_api::Layout::default()
    );
}

#[tokio::test]
async fn test_observers_are_notified_after_mutations() {
    let app = MockApp::new(vec![gauge("temp", "temp")]).await;
    let changes = Arc::new(Mutex::new(Vec::new()));
    let _subscription = {
        let changes = changes.clone();
        app.session
            .cache()
            .subscribe(move |change| changes.lock().push(change.clone()))
    };

    app.push_raw(telemetry_frame(json!({ "temp": 5 }))).await;
    app.push_raw(telemetry_frame(json!({ "temp": 5 }))).await;
    app.session.refresh().await.unwrap();

    assert_eq!(
        *changes.lock(),
        vec![
            CacheChange::Patched("temp".to_string()),
            CacheChange::Replaced { count: 1 },
        ]
    );
}

#[tokio::test]
async fn test_closed_session_stops_receiving() {
    let app = MockApp::new(vec![gauge("temp", "temp")]).await;

    app.session.close();
    app.push_raw(telemetry_frame(json!({ "temp": 40 }))).await;

    assert_eq!(app.value("temp"), WidgetValue::Number(0.0));
    assert_eq!(app.hub.listener_count(), 0);
}
