//! Piecewise-linear interpolation over strictly increasing knots.
//!
//! Outside the knot range the value is held flat at the nearest boundary knot.
//! Rate grids rely on this: a single time knot means "constant across time".

/// Locate `x` among `knots` and return `(lower index, upper index, weight)`.
///
/// The interpolated value is `v[lo] + u * (v[hi] - v[lo])`. Outside the knot
/// range both indices point at the boundary knot and `u = 0`.
///
/// `knots` must be non-empty and strictly increasing.
pub fn bracket(knots: &[f64], x: f64) -> (usize, usize, f64) {
    let last = knots.len() - 1;
    if x <= knots[0] || last == 0 {
        return (0, 0, 0.0);
    }
    if x >= knots[last] {
        return (last, last, 0.0);
    }

    // First knot strictly greater than x; guaranteed in 1..=last here.
    let hi = knots.partition_point(|&k| k <= x);
    let lo = hi - 1;
    let span = knots[hi] - knots[lo];
    let u = if span > 0.0 { (x - knots[lo]) / span } else { 0.0 };
    (lo, hi, u)
}

/// Whether `values` is non-empty, finite and strictly increasing.
pub fn is_strictly_increasing(values: &[f64]) -> bool {
    !values.is_empty()
        && values.iter().all(|v| v.is_finite())
        && values.windows(2).all(|w| w[0] < w[1])
}
