//! Unit conversions for the derived fields sent to the sinks.

pub fn celsius_to_fahrenheit(celsius: f64) -> f64 {
    celsius * 9.0 / 5.0 + 32.0
}

pub fn mbar_to_inhg(mbar: f64) -> f64 {
    mbar * 0.02952998751
}

/// Absolute humidity in g/m3, via the Magnus-Tetens approximation of
/// saturation vapor pressure.
pub fn absolute_humidity_g_m3(temp_celsius: f64, relative_humidity_pct: f64) -> f64 {
    let svp = 6.112 * ((17.67 * temp_celsius) / (temp_celsius + 243.5)).exp();
    svp * relative_humidity_pct * 2.1674 / (273.15 + temp_celsius)
}
