//! Quadratic fit of seeing against telescope focus for TELFOCUS

use ccsmsg::{CcsError, CcsResult};

/// Fewest distinct focus positions a quadratic needs
pub const MIN_FIT_POSITIONS: usize = 3;

/// `seeing = a * focus^2 + b * focus + c`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FocusFit {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub chi_squared: f64,
}

impl FocusFit {
    pub fn evaluate(&self, focus: f64) -> f64 {
        self.a * focus * focus + self.b * focus + self.c
    }

    /// Focus of best seeing
    pub fn minimum(&self) -> f64 {
        -self.b / (2.0 * self.a)
    }

    pub fn seeing_at_minimum(&self) -> f64 {
        self.evaluate(self.minimum())
    }
}

/// Least squares fit of a parabola to `(focus, seeing)` samples.
///
/// Solves the normal equations with Cramer's rule, working in focus offsets
/// from the mean so sub-millimetre ranges stay well conditioned.
pub fn fit_focus(samples: &[(f64, f64)]) -> CcsResult<FocusFit> {
    let mut positions: Vec<f64> = samples.iter().map(|(x, _)| *x).collect();
    positions.sort_by(|a, b| a.total_cmp(b));
    positions.dedup();
    if positions.len() < MIN_FIT_POSITIONS {
        return Err(CcsError::Fit(format!(
            "{} distinct focus positions, need {}", positions.len(), MIN_FIT_POSITIONS
        )));
    }

    let n = samples.len() as f64;
    let mean = samples.iter().map(|(x, _)| x).sum::<f64>() / n;

    let (mut su, mut su2, mut su3, mut su4) = (0.0, 0.0, 0.0, 0.0);
    let (mut sy, mut suy, mut su2y) = (0.0, 0.0, 0.0);
    for &(x, y) in samples {
        let u = x - mean;
        su += u;
        su2 += u * u;
        su3 += u * u * u;
        su4 += u * u * u * u;
        sy += y;
        suy += u * y;
        su2y += u * u * y;
    }

    // | su4 su3 su2 | |a|   |su2y|
    // | su3 su2 su  | |b| = |suy |
    // | su2 su  n   | |c|   |sy  |
    let det3 = |m: [[f64; 3]; 3]| {
        m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
            - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
            + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
    };
    let det = det3([[su4, su3, su2], [su3, su2, su], [su2, su, n]]);
    if det == 0.0 || !det.is_finite() {
        return Err(CcsError::Fit("Singular normal equations".to_string()));
    }
    let a = det3([[su2y, su3, su2], [suy, su2, su], [sy, su, n]]) / det;
    let b_u = det3([[su4, su2y, su2], [su3, suy, su], [su2, sy, n]]) / det;
    let c_u = det3([[su4, su3, su2y], [su3, su2, suy], [su2, su, sy]]) / det;

    if a <= 0.0 {
        return Err(CcsError::Fit(format!("No minimum, curvature {}", a)));
    }

    // Back from offsets to absolute focus
    let mut fit = FocusFit {
        a,
        b: b_u - 2.0 * a * mean,
        c: a * mean * mean - b_u * mean + c_u,
        chi_squared: 0.0,
    };
    fit.chi_squared = samples
        .iter()
        .map(|&(x, y)| {
            let expected = fit.evaluate(x);
            if expected != 0.0 { (y - expected).powi(2) / expected } else { 0.0 }
        })
        .sum();
    Ok(fit)
}
