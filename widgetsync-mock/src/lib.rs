use std::collections::BTreeMap;
use std::error::Error;
use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::broadcast::error::RecvError;
use widgetsync_api::{
    CreateScheduleRequest, Layout, StreamEvent, TelemetryUpdate, WidgetKind, WidgetRecord,
    WidgetValue, encode_event,
};
use widgetsync_client::mock::MockCommandApi;
use widgetsync_client::{
    CacheChange, DashboardSession, Frame, StreamPump, SubscriptionHub, ToggleOutcome,
};

use crate::settings::{Mock, Settings};
use crate::simulate::{simulated_humidity, simulated_lux, simulated_temperature};

pub mod settings;
mod simulate;

const PUMP: &str = "greenhouse-pump";
const FAN: &str = "greenhouse-fan";

pub async fn run(settings: &Arc<Settings>) -> Result<(), Box<dyn Error>> {
    let mock = &settings.mock;
    let hub = Arc::new(SubscriptionHub::new());
    let (transport, pump) = StreamPump::channel(hub.clone(), settings.client.stream.frame_buffer);
    let pump = pump.spawn();

    let api = Arc::new(
        MockCommandApi::with_widgets(seed_widgets(mock)).with_stream(transport.clone()),
    );
    let session = DashboardSession::open(
        &mock.dashboard_id,
        &hub,
        api.clone(),
        settings.client.actuator,
    )
    .await?;
    tracing::info!(
        "Mock dashboard {} serving {} widgets",
        mock.dashboard_id,
        session.widgets().len()
    );

    let _observer = {
        let cache = session.cache().clone();
        session.cache().subscribe(move |change| match change {
            CacheChange::Patched(id) | CacheChange::Upserted(id) => {
                if let Some(widget) = cache.get(id) {
                    tracing::debug!("{} = {:?}", widget.label, widget.value);
                }
            }
            CacheChange::Removed(id) => tracing::info!("Widget {id} removed"),
            CacheChange::Replaced { count } => {
                tracing::info!("Dashboard reloaded with {count} widgets")
            }
        })
    };

    let mut events = hub.subscribe();
    let mut telemetry = tokio::time::interval(mock.telemetry_interval());
    let mut schedule_tick = tokio::time::interval(mock.schedule_tick());
    let mut demo = tokio::time::interval(mock.demo_interval());
    // The first tick of an interval completes immediately.
    demo.tick().await;

    let mut mock_index: u32 = 0;
    loop {
        tokio::select! {
            _ = telemetry.tick() => {
                const INTERVAL_COUNT: u32 = 180;

                let day_fraction = (mock_index % INTERVAL_COUNT) as f64 / INTERVAL_COUNT as f64;
                let frame = telemetry_frame(mock, day_fraction)?;
                if let Err(e) = transport.send(frame).await {
                    tracing::warn!("Telemetry not delivered: {e}");
                }
                mock_index = mock_index.wrapping_add(1);
            },
            _ = schedule_tick.tick() => {
                for entry in api.execute_due(OffsetDateTime::now_utc()) {
                    tracing::info!("Executed schedule {} for {}", entry.id, entry.widget_id);
                }
            },
            _ = demo.tick() => {
                run_demo_step(&session).await;
            },
            event = events.recv() => match event {
                Ok(StreamEvent::ScheduleCancelled(notice)) => {
                    tracing::info!("Schedule of {} cancelled", notice.widget_id);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Event log skipped {skipped} events");
                }
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down mock dashboard");
                break;
            },
        }
    }

    session.close();
    transport.disconnect();
    let frames = pump.await??;
    tracing::info!("Stream closed after {frames} frames");

    Ok(())
}

/// Flips the pump and arms a short timer on the fan.
async fn run_demo_step(session: &DashboardSession) {
    match session.toggle(PUMP).await {
        Ok(ToggleOutcome::Applied { state }) => tracing::info!("Pump switched {}", on_off(state)),
        Ok(outcome) => tracing::debug!("Pump toggle: {outcome:?}"),
        Err(e) => tracing::warn!("Pump toggle failed: {e}"),
    }

    let registry = match session.schedules(FAN) {
        Ok(registry) => registry,
        Err(e) => {
            tracing::warn!("Fan schedules unavailable: {e}");
            return;
        }
    };
    if registry.next().is_some() {
        return;
    }

    let fan_on = session
        .cache()
        .get(FAN)
        .and_then(|widget| widget.value.as_bool())
        .unwrap_or(false);
    let request = CreateScheduleRequest::after(!fan_on, 3).with_label("Ventilation burst");
    match registry.create(request).await {
        Ok(()) => tracing::info!("Fan timer armed to switch {}", on_off(!fan_on)),
        Err(e) => tracing::warn!("Fan timer rejected: {e}"),
    }
}

fn telemetry_frame(mock: &Mock, day_fraction: f64) -> Result<Frame, Box<dyn Error>> {
    let data = BTreeMap::from([
        ("temperature".to_string(), WidgetValue::from(simulated_temperature(day_fraction))),
        ("humidity".to_string(), WidgetValue::from(simulated_humidity(day_fraction))),
        ("lux".to_string(), WidgetValue::from(simulated_lux(day_fraction))),
    ]);
    let event = StreamEvent::TelemetryUpdate(TelemetryUpdate {
        dashboard_id: Some(mock.dashboard_id.clone()),
        device_id: mock.device_id.clone(),
        data,
    });

    Ok(Frame::Text(encode_event(&event)?))
}

fn seed_widgets(mock: &Mock) -> Vec<WidgetRecord> {
    let widget = |id: &str, kind: WidgetKind, label: &str, order: i32| WidgetRecord {
        id: id.to_string(),
        dashboard_id: mock.dashboard_id.clone(),
        device_id: Some(mock.device_id.clone()),
        kind,
        label: label.to_string(),
        value: WidgetValue::Unknown,
        binding_key: None,
        virtual_pin: None,
        layout: Layout::new(1, 1, order),
        next_scheduled_at: None,
    };

    vec![
        WidgetRecord {
            binding_key: Some("temperature".to_string()),
            value: WidgetValue::Number(0.0),
            ..widget("greenhouse-temperature", WidgetKind::Gauge, "Temperature", 0)
        },
        WidgetRecord {
            binding_key: Some("humidity".to_string()),
            value: WidgetValue::Number(0.0),
            ..widget("greenhouse-humidity", WidgetKind::Gauge, "Humidity", 1)
        },
        WidgetRecord {
            binding_key: Some("lux".to_string()),
            value: WidgetValue::Number(0.0),
            layout: Layout::new(2, 1, 2),
            ..widget("greenhouse-lux", WidgetKind::Chart, "Light", 2)
        },
        WidgetRecord {
            virtual_pin: Some("v0".to_string()),
            value: WidgetValue::Bool(false),
            ..widget(PUMP, WidgetKind::Led, "Water pump", 3)
        },
        WidgetRecord {
            virtual_pin: Some("v1".to_string()),
            value: WidgetValue::Bool(false),
            ..widget(FAN, WidgetKind::Led, "Vent fan", 4)
        },
    ]
}

fn on_off(state: bool) -> &'static str {
    if state { "on" } else { "off" }
}

#[cfg(test)]
mod tests {
    use widgetsync_api::{Binding, parse_text};

    use super::*;

    fn mock() -> Mock {
        Mock {
            dashboard_id: "dash-test".to_string(),
            device_id: "dev-test".to_string(),
            telemetry_interval_ms: 10,
            schedule_tick_ms: 10,
            demo_interval_ms: 10,
        }
    }

    #[test]
    fn test_seed_widgets_bind_every_telemetry_key() {
        let widgets = seed_widgets(&mock());
        let keys: Vec<_> = widgets
            .iter()
            .filter_map(|widget| match widget.binding() {
                Binding::Telemetry { key, .. } => Some(key.to_string()),
                _ => None,
            })
            .collect();

        assert_eq!(keys, ["temperature", "humidity", "lux"]);
        assert_eq!(widgets.iter().filter(|w| w.is_actuator()).count(), 2);
    }

    #[test]
    fn test_telemetry_frame_parses() {
        let Frame::Text(text) = telemetry_frame(&mock(), 0.5).unwrap() else {
            panic!("expected a text frame");
        };
        let StreamEvent::TelemetryUpdate(update) = parse_text(&text).unwrap() else {
            panic!("expected telemetry");
        };

        assert_eq!(update.device_id, "dev-test");
        assert_eq!(update.data["lux"], WidgetValue::Number(500.0));
    }
}
