//! Regularized log-likelihood objective and its analytic gradient.
//!
//! Both evaluators borrow the same immutable dataset/model context and must
//! be configured with the same `lambda`; the optimizer treats them as a
//! matched pair and cannot detect a mismatch itself.

use rayon::prelude::*;

use crate::crf::ConditionalRandomField;
use crate::dataset::DataSet;
use crate::error::{Error, Result};

/// Scalar objective of a weight vector.
pub trait Objective {
    /// Expected weight dimension.
    fn dim(&self) -> usize;

    /// Evaluate the objective at `w`. Never mutates `w`.
    fn evaluate(&self, w: &[f64]) -> Result<f64>;
}

/// Gradient of an [`Objective`], written into a caller-owned buffer.
pub trait ObjectiveGradient {
    /// Expected weight dimension.
    fn dim(&self) -> usize;

    /// Write the gradient at `w` into `grad` (preallocated, length `dim`).
    /// Mutates `grad` only; never reallocates it.
    fn evaluate_into(&self, grad: &mut [f64], w: &[f64]) -> Result<()>;
}

/// Regularized log-likelihood of the training data:
///
/// `Σ_i [w·φ(x_i, y_i) − log Z(x_i)] − λ‖w‖²`
///
/// Per-example terms are accumulated in parallel with an associative sum, so
/// results may differ across runs by floating-point rounding only.
#[derive(Debug)]
pub struct LogLikelihood<'a> {
    data: &'a DataSet,
    crf: &'a ConditionalRandomField,
    lambda: f64,
}

impl<'a> LogLikelihood<'a> {
    pub fn new(data: &'a DataSet, crf: &'a ConditionalRandomField) -> Self {
        Self {
            data,
            crf,
            lambda: 0.0,
        }
    }

    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    /// Set the regularization coefficient. Must be non-negative and finite.
    pub fn set_lambda(&mut self, lambda: f64) -> Result<()> {
        check_lambda(lambda)?;
        self.lambda = lambda;
        Ok(())
    }

    pub fn step_size(&self) -> usize {
        self.crf.step_size()
    }
}

impl Objective for LogLikelihood<'_> {
    fn dim(&self) -> usize {
        self.crf.dim()
    }

    fn evaluate(&self, w: &[f64]) -> Result<f64> {
        let n = self.crf.dim();
        if w.len() != n {
            return Err(Error::InvalidDimension {
                expected: n,
                got: w.len(),
            });
        }

        let data_term: f64 = (0..self.data.len())
            .into_par_iter()
            .map(|i| -> Result<f64> {
                let image = self.data.image(i);
                let score = self.crf.score(image, self.data.bbox(i), w)?;
                let log_z = self.crf.log_partition(image, w)?;
                Ok(score - log_z)
            })
            .sum::<Result<f64>>()?;

        let penalty: f64 = self.lambda * w.iter().map(|v| v * v).sum::<f64>();
        let value = data_term - penalty;
        if !value.is_finite() {
            return Err(Error::NotANumber);
        }
        Ok(value)
    }
}

/// Analytic gradient of [`LogLikelihood`]:
///
/// `Σ_i [φ(x_i, y_i) − E_model φ(x_i, ·)] − 2λw`
///
/// The penalty term uses the `2λw` convention, matching the `λ‖w‖²` penalty
/// of the paired objective.
#[derive(Debug)]
pub struct LogLikelihoodGradient<'a> {
    data: &'a DataSet,
    crf: &'a ConditionalRandomField,
    lambda: f64,
}

impl<'a> LogLikelihoodGradient<'a> {
    pub fn new(data: &'a DataSet, crf: &'a ConditionalRandomField) -> Self {
        Self {
            data,
            crf,
            lambda: 0.0,
        }
    }

    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    /// Set the regularization coefficient. Must equal the paired
    /// [`LogLikelihood`]'s lambda; this pairing is not checked.
    pub fn set_lambda(&mut self, lambda: f64) -> Result<()> {
        check_lambda(lambda)?;
        self.lambda = lambda;
        Ok(())
    }

    pub fn step_size(&self) -> usize {
        self.crf.step_size()
    }
}

impl ObjectiveGradient for LogLikelihoodGradient<'_> {
    fn dim(&self) -> usize {
        self.crf.dim()
    }

    fn evaluate_into(&self, grad: &mut [f64], w: &[f64]) -> Result<()> {
        let n = self.crf.dim();
        if w.len() != n {
            return Err(Error::InvalidDimension {
                expected: n,
                got: w.len(),
            });
        }
        if grad.len() != n {
            return Err(Error::DimensionMismatch {
                expected: n,
                got: grad.len(),
            });
        }

        // Per-example (observed - expected) counts, summed over private
        // partial accumulators.
        let summed = (0..self.data.len())
            .into_par_iter()
            .try_fold(
                || vec![0.0; n],
                |mut acc, i| -> Result<Vec<f64>> {
                    let image = self.data.image(i);
                    self.crf
                        .observed_counts_into(&mut acc, image, self.data.bbox(i))?;
                    let mut expected = vec![0.0; n];
                    self.crf.expected_counts_into(&mut expected, image, w)?;
                    for (a, e) in acc.iter_mut().zip(&expected) {
                        *a -= e;
                    }
                    Ok(acc)
                },
            )
            .try_reduce(
                || vec![0.0; n],
                |mut a, b| {
                    for (x, y) in a.iter_mut().zip(&b) {
                        *x += y;
                    }
                    Ok(a)
                },
            )?;

        let two_lambda = 2.0 * self.lambda;
        for i in 0..n {
            let g = summed[i] - two_lambda * w[i];
            if !g.is_finite() {
                return Err(Error::NotANumber);
            }
            grad[i] = g;
        }
        Ok(())
    }
}

fn check_lambda(lambda: f64) -> Result<()> {
    if !lambda.is_finite() || lambda < 0.0 {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "lambda must be non-negative and finite",
        )));
    }
    Ok(())
}
