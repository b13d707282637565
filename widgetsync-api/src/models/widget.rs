use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use super::Id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WidgetKind {
    /// Free-form value tile
    Card,
    /// Numeric dial
    Gauge,
    /// Read-only status lamp
    Indicator,
    /// Remotely switched actuator
    Led,
    /// Numeric series
    Chart,
}

impl WidgetKind {
    pub fn is_actuator(&self) -> bool {
        matches!(self, WidgetKind::Led)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, WidgetKind::Gauge | WidgetKind::Chart)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WidgetKind::Card => "card",
            WidgetKind::Gauge => "gauge",
            WidgetKind::Indicator => "indicator",
            WidgetKind::Led => "led",
            WidgetKind::Chart => "chart",
        }
    }
}

/// Value displayed by a widget.
///
/// On the wire this is any JSON scalar; `null` and the literal string
/// `"unknown"` both decode to [`WidgetValue::Unknown`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum WidgetValue {
    Number(f64),
    Bool(bool),
    Text(String),
    #[default]
    Unknown,
}

impl WidgetValue {
    pub fn is_unknown(&self) -> bool {
        matches!(self, WidgetValue::Unknown)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            WidgetValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            WidgetValue::Number(value) => Some(*value),
            _ => None,
        }
    }

    /// Reads the value as an on/off state, accepting the spellings devices
    /// commonly report (`1`, `"on"`, `"HIGH"`, ...).
    pub fn coerce_bool(&self) -> Option<bool> {
        match self {
            WidgetValue::Bool(value) => Some(*value),
            WidgetValue::Number(value) if value.is_finite() => Some(*value != 0.0),
            WidgetValue::Number(_) => None,
            WidgetValue::Text(text) => match text.trim().to_ascii_lowercase().as_str() {
                "true" | "on" | "1" | "high" | "yes" => Some(true),
                "false" | "off" | "0" | "low" | "no" => Some(false),
                _ => None,
            },
            WidgetValue::Unknown => None,
        }
    }

    /// Reads the value as a finite number.
    pub fn coerce_number(&self) -> Option<f64> {
        match self {
            WidgetValue::Number(value) if value.is_finite() => Some(*value),
            WidgetValue::Number(_) => None,
            WidgetValue::Bool(value) => Some(if *value { 1.0 } else { 0.0 }),
            WidgetValue::Text(text) => text.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
            WidgetValue::Unknown => None,
        }
    }
}

impl From<Value> for WidgetValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Bool(value) => WidgetValue::Bool(value),
            Value::Number(number) => number
                .as_f64()
                .map(WidgetValue::Number)
                .unwrap_or(WidgetValue::Unknown),
            Value::String(text) if text == "unknown" => WidgetValue::Unknown,
            Value::String(text) => WidgetValue::Text(text),
            Value::Null | Value::Array(_) | Value::Object(_) => WidgetValue::Unknown,
        }
    }
}

impl From<WidgetValue> for Value {
    fn from(value: WidgetValue) -> Self {
        match value {
            WidgetValue::Number(number) => serde_json::Number::from_f64(number)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            WidgetValue::Bool(value) => Value::Bool(value),
            WidgetValue::Text(text) => Value::String(text),
            WidgetValue::Unknown => Value::String("unknown".into()),
        }
    }
}

impl From<bool> for WidgetValue {
    fn from(value: bool) -> Self {
        WidgetValue::Bool(value)
    }
}

impl From<f64> for WidgetValue {
    fn from(value: f64) -> Self {
        WidgetValue::Number(value)
    }
}

impl From<&str> for WidgetValue {
    fn from(value: &str) -> Self {
        WidgetValue::Text(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    /// Column span (1 or 2)
    pub width: u8,
    /// Row span (1 or 2)
    pub height: u8,
    /// Position on the dashboard, ascending
    pub order: i32,
}

impl Layout {
    pub fn new(width: u8, height: u8, order: i32) -> Self {
        Self {
            width,
            height,
            order,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self.width, 1 | 2) && matches!(self.height, 1 | 2)
    }
}

impl Default for Layout {
    fn default() -> Self {
        Self::new(1, 1, 0)
    }
}

/// One dashboard tile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetRecord {
    /// Stable identifier, unique within the dashboard
    pub id: Id,
    /// Owning dashboard
    pub dashboard_id: Id,
    /// Source device, absent for non-device widgets
    #[serde(default)]
    pub device_id: Option<Id>,
    /// Tile type
    pub kind: WidgetKind,
    /// Display label
    #[serde(default)]
    pub label: String,
    /// Last known value
    #[serde(default)]
    pub value: WidgetValue,
    /// Telemetry field tracked by non-actuator widgets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binding_key: Option<String>,
    /// Actuator channel of `led` widgets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_pin: Option<String>,
    /// Placement on the dashboard
    #[serde(default)]
    pub layout: Layout,
    /// Earliest pending schedule of this actuator
    #[serde(default, with = "super::timestamp::option")]
    pub next_scheduled_at: Option<OffsetDateTime>,
}

/// What a widget listens to on the telemetry stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding<'a> {
    Telemetry { device_id: &'a str, key: &'a str },
    VirtualPin { device_id: &'a str, pin: &'a str },
    Unbound,
}

impl WidgetRecord {
    pub fn binding(&self) -> Binding<'_> {
        let Some(device_id) = self.device_id.as_deref() else {
            return Binding::Unbound;
        };

        if self.kind.is_actuator() {
            match self.virtual_pin.as_deref() {
                Some(pin) => Binding::VirtualPin { device_id, pin },
                None => Binding::Unbound,
            }
        } else {
            match self.binding_key.as_deref() {
                Some(key) => Binding::Telemetry { device_id, key },
                None => Binding::Unbound,
            }
        }
    }

    pub fn is_actuator(&self) -> bool {
        self.kind.is_actuator()
    }

    /// Whether this record uses `pin` on `device_id`, compared case-insensitively.
    pub fn holds_pin(&self, device_id: &str, pin: &str) -> bool {
        self.is_actuator()
            && self.device_id.as_deref() == Some(device_id)
            && self
                .virtual_pin
                .as_deref()
                .is_some_and(|own| own.eq_ignore_ascii_case(pin))
    }
}

/// Field-wise update merged into a cached record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WidgetPatch {
    pub label: Option<String>,
    pub value: Option<WidgetValue>,
    pub layout: Option<Layout>,
    pub next_scheduled_at: Option<Option<OffsetDateTime>>,
}

impl WidgetPatch {
    pub fn value(value: impl Into<WidgetValue>) -> Self {
        Self {
            value: Some(value.into()),
            ..Self::default()
        }
    }

    pub fn layout(layout: Layout) -> Self {
        Self {
            layout: Some(layout),
            ..Self::default()
        }
    }

    pub fn next_scheduled_at(at: Option<OffsetDateTime>) -> Self {
        Self {
            next_scheduled_at: Some(at),
            ..Self::default()
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.label.is_none()
            && self.value.is_none()
            && self.layout.is_none()
            && self.next_scheduled_at.is_none()
    }
}

/// Body of a widget creation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWidgetRequest {
    /// Source device
    #[serde(default)]
    pub device_id: Option<Id>,
    /// Tile type
    pub kind: WidgetKind,
    /// Display label
    pub label: String,
    /// Telemetry field for non-actuator widgets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binding_key: Option<String>,
    /// Actuator channel, allocated client-side when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_pin: Option<String>,
    /// Placement on the dashboard
    #[serde(default)]
    pub layout: Layout,
}

impl CreateWidgetRequest {
    /// Builds the placeholder record shown until the server answers.
    pub fn to_record(&self, id: impl Into<Id>, dashboard_id: impl Into<Id>) -> WidgetRecord {
        WidgetRecord {
            id: id.into(),
            dashboard_id: dashboard_id.into(),
            device_id: self.device_id.clone(),
            kind: self.kind,
            label: self.label.clone(),
            value: if self.kind.is_actuator() {
                WidgetValue::Bool(false)
            } else {
                WidgetValue::Unknown
            },
            binding_key: self.binding_key.clone(),
            virtual_pin: self.virtual_pin.clone(),
            layout: self.layout,
            next_scheduled_at: None,
        }
    }
}
