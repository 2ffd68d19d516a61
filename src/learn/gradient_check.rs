//! Finite-difference verification of analytic gradients.
//!
//! Used to catch implementation bugs in gradient code: each dimension of the
//! analytic gradient is compared against a forward-difference approximation
//! of the paired objective. Mismatches are diagnostics, never failures.

use log::warn;
use rayon::prelude::*;

use crate::error::{Error, Result};

use super::objective::Objective;

/// A dimension whose analytic and numerical gradients disagree.
#[derive(Debug, Clone, Copy)]
pub struct Mismatch {
    pub index: usize,
    pub analytic: f64,
    pub approx: f64,
    pub diff: f64,
}

/// Finite-difference gradient verifier.
///
/// `step` trades truncation error against rounding noise; `tolerance` trades
/// detection sensitivity against false alarms from that noise. Both are
/// exposed because the right values depend on the objective's conditioning.
#[derive(Debug, Clone, Copy)]
pub struct GradientCheck {
    pub step: f64,
    pub tolerance: f64,
}

impl Default for GradientCheck {
    fn default() -> Self {
        Self {
            step: 1e-8,
            tolerance: 0.1,
        }
    }
}

impl GradientCheck {
    pub fn new(step: f64, tolerance: f64) -> Self {
        Self { step, tolerance }
    }

    /// Compare `analytic` against `(f(w + h·e_i) − f(w)) / h` per dimension.
    ///
    /// Returns only the dimensions whose absolute difference exceeds the
    /// tolerance; an empty report means the gradient checks out. Errors from
    /// the objective itself (NaN, dimension) still propagate.
    pub fn verify<F>(&self, objective: &F, analytic: &[f64], w: &[f64]) -> Result<Vec<Mismatch>>
    where
        F: Objective + Sync,
    {
        if analytic.len() != w.len() {
            return Err(Error::DimensionMismatch {
                expected: w.len(),
                got: analytic.len(),
            });
        }

        let h = self.step;
        let f0 = objective.evaluate(w)?;

        // Each dimension perturbs its own copy of w; order is irrelevant.
        let mismatches: Vec<Mismatch> = (0..w.len())
            .into_par_iter()
            .map(|i| -> Result<(usize, f64, f64)> {
                let mut wh = w.to_vec();
                wh[i] += h;
                let fh = objective.evaluate(&wh)?;
                let approx = (fh - f0) / h;
                let diff = (analytic[i] - approx).abs();
                Ok((i, approx, diff))
            })
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .filter(|&(_, _, diff)| diff > self.tolerance)
            .map(|(index, approx, diff)| Mismatch {
                index,
                analytic: analytic[index],
                approx,
                diff,
            })
            .collect();

        for m in &mismatches {
            warn!(
                "gradient mismatch at dimension {}: analytic {:.6}, finite-difference {:.6} (|diff| {:.6})",
                m.index, m.analytic, m.approx, m.diff
            );
        }
        Ok(mismatches)
    }
}
