//! Least squares solver for the damped Gauss-Newton step.
//!
//! Each iteration of the fit solves a small linear problem of the form:
//!
//! ```text
//! minimize || J δ + r ||^2 + λ || D δ ||^2
//! ```
//!
//! We stack the damping rows under the Jacobian and solve the augmented system
//! with SVD, which stays robust when some columns are nearly collinear (wide
//! priors on neighbouring grid points produce exactly that).

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    // Try progressively looser tolerances if strict solve fails.
    for &tol in &[1e-12, 1e-10, 1e-8] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// Solve the Levenberg-Marquardt step `(J^T J + λ D^2) δ = -J^T r`.
///
/// `scale` holds the diagonal of `D`; zero entries leave that column undamped.
pub fn damped_step(
    jac: &DMatrix<f64>,
    resid: &DVector<f64>,
    scale: &DVector<f64>,
    lambda: f64,
) -> Option<DVector<f64>> {
    let m = jac.nrows();
    let n = jac.ncols();
    let mut a = DMatrix::<f64>::zeros(m + n, n);
    let mut b = DVector::<f64>::zeros(m + n);

    a.view_mut((0, 0), (m, n)).copy_from(jac);
    for i in 0..m {
        b[i] = -resid[i];
    }
    let sl = lambda.max(0.0).sqrt();
    for j in 0..n {
        a[(m + j, j)] = sl * scale[j];
    }

    solve_least_squares(&a, &b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn least_squares_solves_simple_system() {
        // Fit y = 2 + 3x on x = [0,1,2]
        let x = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0]);
        let y = DVector::from_row_slice(&[2.0, 5.0, 8.0]);

        let beta = solve_least_squares(&x, &y).unwrap();
        assert!((beta[0] - 2.0).abs() < 1e-10);
        assert!((beta[1] - 3.0).abs() < 1e-10);
    }

    #[test]
    fn undamped_step_is_gauss_newton() {
        // r(x) = x - 4 at x = 1 has Jacobian 1, so the full step is +3.
        let jac = DMatrix::from_row_slice(1, 1, &[1.0]);
        let r = DVector::from_row_slice(&[-3.0]);
        let scale = DVector::from_row_slice(&[1.0]);
        let step = damped_step(&jac, &r, &scale, 0.0).unwrap();
        assert!((step[0] - 3.0).abs() < 1e-12);

        let damped = damped_step(&jac, &r, &scale, 1.0).unwrap();
        assert!((damped[0] - 1.5).abs() < 1e-12);
    }
}
