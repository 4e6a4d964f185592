//! Fixed-point scale factor transforms
//!
//! One direction everywhere: `engineering = raw * 10^scale`. Negative
//! scales shrink (raw 1500 @ scale -1 reads 150), positive scales grow
//! (raw 150 @ scale 1 reads 1500).

/// Apply a power-of-ten scale factor to a raw register value
pub fn apply_scale(raw: f64, scale: i8) -> f64 {
    raw * 10f64.powi(i32::from(scale))
}

/// Remove a scale factor from an engineering value, rounding to the nearest raw
pub fn remove_scale(value: f64, scale: i8) -> f64 {
    (value / 10f64.powi(i32::from(scale))).round()
}
