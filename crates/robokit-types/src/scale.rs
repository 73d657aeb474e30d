//! Range mapping helpers for drivers converting raw readings.

/// Map `input` from `min..max` onto `0.0..=1.0`.
///
/// `min` and `max` may be given in either order.
pub fn from_scale(input: f64, min: f64, max: f64) -> f64 {
    let (lo, hi) = (min.min(max), min.max(max));
    (input - lo) / (hi - lo)
}

/// Map `input` from `0.0..=1.0` onto `min..max`, clamping to the range.
pub fn to_scale(input: f64, min: f64, max: f64) -> f64 {
    let (lo, hi) = (min.min(max), min.max(max));
    (input * (hi - lo) + lo).clamp(lo, hi)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_scale_maps_into_unit_range() {
        assert!((from_scale(5.0, 0.0, 10.0) - 0.5).abs() < f64::EPSILON);
        assert!((from_scale(5.0, 10.0, 0.0) - 0.5).abs() < f64::EPSILON);
        assert!((from_scale(0.0, 0.0, 255.0)).abs() < f64::EPSILON);
    }

    #[test]
    fn to_scale_clamps() {
        assert!((to_scale(0.5, 0.0, 10.0) - 5.0).abs() < f64::EPSILON);
        assert!((to_scale(2.0, 0.0, 10.0) - 10.0).abs() < f64::EPSILON);
        assert!((to_scale(-1.0, 0.0, 10.0)).abs() < f64::EPSILON);
    }
}
