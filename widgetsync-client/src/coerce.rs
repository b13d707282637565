use widgetsync_api::{WidgetKind, WidgetValue};

/// Turns an incoming reading into the value stored on a widget of `kind`.
///
/// Never fails: a reading that cannot be interpreted keeps `previous`.
/// `led` widgets always end up with a boolean.
pub fn coerce_value(
    kind: WidgetKind,
    previous: &WidgetValue,
    incoming: &WidgetValue,
) -> WidgetValue {
    match kind {
        WidgetKind::Led => WidgetValue::Bool(
            incoming
                .coerce_bool()
                .or_else(|| previous.coerce_bool())
                .unwrap_or(false),
        ),
        WidgetKind::Gauge | WidgetKind::Chart => match incoming.coerce_number() {
            Some(number) => WidgetValue::Number(number),
            None => previous.clone(),
        },
        WidgetKind::Card | WidgetKind::Indicator => match incoming {
            WidgetValue::Unknown => previous.clone(),
            WidgetValue::Number(number) if !number.is_finite() => previous.clone(),
            other => other.clone(),
        },
    }
}

/// Normalises the value a record arrives with, so a `led` never holds a
/// raw number or string.
pub fn normalize_value(kind: WidgetKind, value: &WidgetValue) -> WidgetValue {
    match kind {
        WidgetKind::Led => WidgetValue::Bool(value.coerce_bool().unwrap_or(false)),
        _ => value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_led_values_become_boolean() {
        let previous = WidgetValue::Bool(true);

        assert_eq!(
            coerce_value(WidgetKind::Led, &previous, &WidgetValue::Number(0.0)),
            WidgetValue::Bool(false)
        );
        assert_eq!(
            coerce_value(WidgetKind::Led, &previous, &WidgetValue::from("garbage")),
            WidgetValue::Bool(true)
        );
        assert_eq!(
            coerce_value(WidgetKind::Led, &WidgetValue::Unknown, &WidgetValue::Unknown),
            WidgetValue::Bool(false)
        );
    }

    #[test]
    fn test_numeric_widgets_keep_previous_on_garbage() {
        let previous = WidgetValue::Number(21.0);

        assert_eq!(
            coerce_value(WidgetKind::Gauge, &previous, &WidgetValue::from("22.5")),
            WidgetValue::Number(22.5)
        );
        assert_eq!(
            coerce_value(WidgetKind::Gauge, &previous, &WidgetValue::from("n/a")),
            previous
        );
        assert_eq!(
            coerce_value(WidgetKind::Chart, &previous, &WidgetValue::Unknown),
            previous
        );
    }

    #[test]
    fn test_cards_accept_any_scalar() {
        let previous = WidgetValue::Number(1.0);

        assert_eq!(
            coerce_value(WidgetKind::Card, &previous, &WidgetValue::from("open")),
            WidgetValue::from("open")
        );
        assert_eq!(
            coerce_value(WidgetKind::Indicator, &previous, &WidgetValue::Unknown),
            previous
        );
    }

    #[test]
    fn test_normalize() {
        assert_eq!(
            normalize_value(WidgetKind::Led, &WidgetValue::from("on")),
            WidgetValue::Bool(true)
        );
        assert_eq!(
            normalize_value(WidgetKind::Gauge, &WidgetValue::from("on")),
            WidgetValue::from("on")
        );
    }
}
