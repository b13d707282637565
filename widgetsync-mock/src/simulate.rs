use std::f64::consts::PI;

use rand::Rng;

/// Greenhouse air temperature in °C over one simulated day.
pub fn simulated_temperature(day_fraction: f64) -> f64 {
    let radians = day_fraction * 2.0 * PI;
    let base = (radians - PI / 2.0).sin().max(-0.4) * 9.0 + 21.0;

    let noise = rand::rng().random_range(-0.3..0.3);

    ((base + noise) * 10.0).round() / 10.0
}

/// Relative humidity in percent, falling while the air warms up.
pub fn simulated_humidity(day_fraction: f64) -> f64 {
    let radians = day_fraction * 2.0 * PI;

    if (0.3..=0.7).contains(&day_fraction) {
        ((radians.sin().max(0.0) * 25.0) + 55.0).round()
    } else {
        ((radians.cos().max(0.0) * 30.0) + 60.0).round()
    }
}

/// Light level in lux: flat daylight with soft sunrise and sunset ramps.
pub fn simulated_lux(day_fraction: f64) -> f64 {
    const DAYLIGHT_LUX: f64 = 500.0;
    const NIGHT_LUX: f64 = 2.0;
    const SUNRISE: (f64, f64) = (0.23, 0.25);
    const SUNSET: (f64, f64) = (0.73, 0.75);

    match day_fraction {
        f if (SUNRISE.0..SUNRISE.1).contains(&f) => {
            ((f - SUNRISE.0) / (SUNRISE.1 - SUNRISE.0) * PI / 2.0).sin() * DAYLIGHT_LUX
        }
        f if (SUNRISE.1..SUNSET.0).contains(&f) => DAYLIGHT_LUX,
        f if (SUNSET.0..SUNSET.1).contains(&f) => {
            ((f - SUNSET.0) / (SUNSET.1 - SUNSET.0) * PI / 2.0).cos() * DAYLIGHT_LUX
        }
        _ => NIGHT_LUX,
    }
    .max(NIGHT_LUX)
    .round()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daylight_is_brighter_than_night() {
        assert!(simulated_lux(0.5) > simulated_lux(0.0));
        assert_eq!(simulated_lux(0.5), 500.0);
        assert_eq!(simulated_lux(0.9), 2.0);
    }

    #[test]
    fn test_temperature_follows_the_day() {
        let night = simulated_temperature(0.0);
        let afternoon = simulated_temperature(0.5);

        assert!((17.0..=18.0).contains(&night), "night was {night}");
        assert!((29.5..=30.5).contains(&afternoon), "afternoon was {afternoon}");
    }

    #[test]
    fn test_values_stay_in_range() {
        for step in 0..100 {
            let fraction = step as f64 / 100.0;
            let humidity = simulated_humidity(fraction);
            let temperature = simulated_temperature(fraction);

            assert!((0.0..=100.0).contains(&humidity));
            assert!((10.0..=32.0).contains(&temperature));
        }
    }
}
