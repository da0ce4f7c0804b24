//! Math utility functions

/// Index and value of the maximum element
///
/// Linear scan; the first occurrence wins on ties. Returns `None` for an
/// empty slice.
pub fn argmax(x: &[f32]) -> Option<(usize, f32)> {
    let (first, rest) = x.split_first()?;
    let mut best = (0, *first);
    for (i, &v) in rest.iter().enumerate() {
        if v > best.1 {
            best = (i + 1, v);
        }
    }
    Some(best)
}

/// Round to a fixed number of decimal places
pub fn round_to(value: f32, decimals: i32) -> f32 {
    let factor = 10f64.powi(decimals);
    ((value as f64 * factor).round() / factor) as f32
}
