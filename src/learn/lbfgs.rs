//! Limited-memory BFGS optimizer.
//!
//! Maximizes an [`Objective`] by minimizing its negation: the search
//! direction comes from the two-loop recursion over a bounded history of
//! `(step, gradient-delta)` pairs, and steps are chosen by a backtracking
//! line search satisfying the sufficient-decrease and strong curvature
//! conditions.

use std::collections::VecDeque;
use std::io;

use log::{debug, info};

use crate::error::{Error, Result};
use crate::weights::Weights;

use super::objective::{Objective, ObjectiveGradient};

const STEP_DEC: f64 = 0.5;
const STEP_INC: f64 = 2.1;
const MIN_STEP: f64 = 1e-20;
const MAX_STEP: f64 = 1e20;

/// L-BFGS optimization parameters.
#[derive(Debug, Clone)]
pub struct LbfgsParams {
    num_memories: usize,
    max_iterations: usize,
    epsilon: f64,
    period: usize,
    delta: f64,
    ftol: f64,
    gtol: f64,
    max_linesearch: usize,
}

impl Default for LbfgsParams {
    fn default() -> Self {
        Self {
            num_memories: 6,
            max_iterations: 100,
            epsilon: 1e-5,
            period: 10,
            delta: 1e-5,
            ftol: 1e-4,
            gtol: 0.9,
            max_linesearch: 20,
        }
    }
}

fn invalid(msg: &str) -> Error {
    Error::Io(io::Error::new(io::ErrorKind::InvalidInput, msg))
}

impl LbfgsParams {
    pub fn num_memories(&self) -> usize {
        self.num_memories
    }

    pub fn set_num_memories(&mut self, num_memories: usize) -> Result<()> {
        if num_memories < 1 {
            return Err(invalid("num_memories must be at least 1"));
        }
        self.num_memories = num_memories;
        Ok(())
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Iteration budget; this is the optimizer's cancellation point, checked
    /// once per iteration.
    pub fn set_max_iterations(&mut self, max_iterations: usize) -> Result<()> {
        if max_iterations < 1 {
            return Err(invalid("max_iterations must be at least 1"));
        }
        self.max_iterations = max_iterations;
        Ok(())
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Gradient-norm convergence threshold.
    pub fn set_epsilon(&mut self, epsilon: f64) -> Result<()> {
        if epsilon < 0.0 {
            return Err(invalid("epsilon must be non-negative"));
        }
        self.epsilon = epsilon;
        Ok(())
    }

    pub fn period(&self) -> usize {
        self.period
    }

    /// Lookback for the relative objective-change test; 0 disables it.
    pub fn set_period(&mut self, period: usize) {
        self.period = period;
    }

    pub fn delta(&self) -> f64 {
        self.delta
    }

    pub fn set_delta(&mut self, delta: f64) -> Result<()> {
        if delta < 0.0 {
            return Err(invalid("delta must be non-negative"));
        }
        self.delta = delta;
        Ok(())
    }

    pub fn ftol(&self) -> f64 {
        self.ftol
    }

    /// Sufficient-decrease constant of the line search.
    pub fn set_ftol(&mut self, ftol: f64) -> Result<()> {
        if ftol <= 0.0 || ftol >= 0.5 {
            return Err(invalid("ftol must be in (0, 0.5)"));
        }
        self.ftol = ftol;
        Ok(())
    }

    pub fn gtol(&self) -> f64 {
        self.gtol
    }

    /// Curvature constant of the line search.
    pub fn set_gtol(&mut self, gtol: f64) -> Result<()> {
        if gtol <= self.ftol || gtol >= 1.0 {
            return Err(invalid("gtol must be in (ftol, 1)"));
        }
        self.gtol = gtol;
        Ok(())
    }

    pub fn max_linesearch(&self) -> usize {
        self.max_linesearch
    }

    pub fn set_max_linesearch(&mut self, max_linesearch: usize) -> Result<()> {
        if max_linesearch == 0 {
            return Err(invalid("max_linesearch must be positive"));
        }
        self.max_linesearch = max_linesearch;
        Ok(())
    }
}

/// How an optimization run ended. Terminal failures are surfaced as
/// [`Error`] values instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Gradient norm or relative objective change fell below threshold.
    Converged,
    /// The iteration budget was exhausted first.
    MaxIterationsReached,
}

/// Result of a successful optimization run.
#[derive(Debug, Clone)]
pub struct Learned {
    pub weights: Weights,
    /// Final objective value (on the maximized scale).
    pub value: f64,
    pub iterations: usize,
    pub termination: Termination,
}

/// One stored correction pair: `s = x_{k+1} - x_k`, `y = g_{k+1} - g_k`.
#[derive(Debug)]
struct Correction {
    s: Vec<f64>,
    y: Vec<f64>,
    rho: f64,
}

/// L-BFGS driver over a paired objective and gradient evaluator.
///
/// The two evaluators must describe the same function (same model context,
/// same regularization coefficient); that pairing is the caller's
/// responsibility.
#[derive(Debug)]
pub struct Lbfgs<'a, F, G> {
    objective: &'a F,
    gradient: &'a G,
    params: LbfgsParams,
}

impl<'a, F: Objective, G: ObjectiveGradient> Lbfgs<'a, F, G> {
    pub fn new(objective: &'a F, gradient: &'a G) -> Self {
        Self {
            objective,
            gradient,
            params: LbfgsParams::default(),
        }
    }

    pub fn params(&self) -> &LbfgsParams {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut LbfgsParams {
        &mut self.params
    }

    /// Maximize the objective starting from `initial`.
    ///
    /// The caller's vector is copied; it is never mutated. On any terminal
    /// failure (`Roundoff`, `DimensionMismatch`, `NotANumber`) no weight
    /// vector is returned.
    pub fn learn_weights(&self, initial: &[f64]) -> Result<Learned> {
        let n = self.objective.dim();
        if self.gradient.dim() != n {
            return Err(Error::DimensionMismatch {
                expected: n,
                got: self.gradient.dim(),
            });
        }
        if initial.len() != n {
            return Err(Error::InvalidDimension {
                expected: n,
                got: initial.len(),
            });
        }

        let m = self.params.num_memories;
        let mut x = initial.to_vec();
        let mut g = vec![0.0; n];
        let mut fx = self.eval(&x, &mut g)?;

        let mut history: VecDeque<Correction> = VecDeque::with_capacity(m);
        let mut past_fx: VecDeque<f64> = VecDeque::new();
        let mut iterations = 0;

        let termination = loop {
            let gnorm = norm(&g);
            let xnorm = norm(&x).max(1.0);
            debug!(
                "iteration {}: fx = {:.6}, ||x|| = {:.6}, ||g|| = {:.6}",
                iterations, -fx, xnorm, gnorm
            );

            if gnorm / xnorm < self.params.epsilon {
                break Termination::Converged;
            }

            // Relative objective change over the last `period` iterations.
            if self.params.period > 0 {
                past_fx.push_back(fx);
                if past_fx.len() > self.params.period + 1 {
                    past_fx.pop_front();
                }
                if past_fx.len() == self.params.period + 1 {
                    let past = *past_fx.front().unwrap();
                    let improvement = (past - fx) / fx.abs().max(1.0);
                    if improvement < self.params.delta {
                        break Termination::Converged;
                    }
                }
            }

            if iterations >= self.params.max_iterations {
                break Termination::MaxIterationsReached;
            }
            iterations += 1;

            let d = direction(&history, &g, n)?;
            let step0 = if history.is_empty() {
                1.0 / norm(&d)
            } else {
                1.0
            };
            let (fx_new, x_new, g_new) = self.line_search(&x, fx, &g, &d, step0)?;

            let s: Vec<f64> = x_new.iter().zip(&x).map(|(a, b)| a - b).collect();
            let y: Vec<f64> = g_new.iter().zip(&g).map(|(a, b)| a - b).collect();
            let ys = dot(&y, &s);
            // Only curvature-positive pairs keep the inverse-Hessian
            // approximation positive definite.
            if ys > 1e-10 {
                if history.len() == m {
                    history.pop_front();
                }
                history.push_back(Correction { s, y, rho: 1.0 / ys });
            }

            x = x_new;
            g = g_new;
            fx = fx_new;
        };

        info!(
            "L-BFGS finished after {} iterations: {:?}, objective = {:.6}",
            iterations, termination, -fx
        );
        Ok(Learned {
            weights: x,
            value: -fx,
            iterations,
            termination,
        })
    }

    /// Evaluate the negated objective and gradient at `x`, converting any
    /// non-finite value into `NotANumber` on the spot.
    fn eval(&self, x: &[f64], g: &mut [f64]) -> Result<f64> {
        let fx = self.objective.evaluate(x)?;
        self.gradient.evaluate_into(g, x)?;
        if !fx.is_finite() || g.iter().any(|v| !v.is_finite()) {
            return Err(Error::NotANumber);
        }
        for v in g.iter_mut() {
            *v = -*v;
        }
        Ok(-fx)
    }

    /// Backtracking line search along `d` from `x`.
    ///
    /// Accepts the first step satisfying both the sufficient-decrease
    /// (`ftol`) and strong curvature (`gtol`) conditions; fails with
    /// [`Error::Roundoff`] when no such step exists within the trial budget
    /// or representable step range.
    fn line_search(
        &self,
        x: &[f64],
        fx0: f64,
        g0: &[f64],
        d: &[f64],
        step0: f64,
    ) -> Result<(f64, Vec<f64>, Vec<f64>)> {
        let dg_init = dot(g0, d);
        if dg_init >= 0.0 {
            // Not a descent direction; the history has gone numerically bad.
            return Err(Error::Roundoff);
        }

        let mut step = step0;
        let mut x_new = vec![0.0; x.len()];
        let mut g_new = vec![0.0; x.len()];

        for _ in 0..self.params.max_linesearch {
            for (i, v) in x_new.iter_mut().enumerate() {
                *v = x[i] + step * d[i];
            }
            let fx = self.eval(&x_new, &mut g_new)?;

            let width = if fx > fx0 + self.params.ftol * step * dg_init {
                STEP_DEC
            } else {
                let dg = dot(&g_new, d);
                if dg < self.params.gtol * dg_init {
                    STEP_INC
                } else if dg > -self.params.gtol * dg_init {
                    STEP_DEC
                } else {
                    return Ok((fx, x_new, g_new));
                }
            };

            step *= width;
            if !(MIN_STEP..=MAX_STEP).contains(&step) {
                return Err(Error::Roundoff);
            }
        }
        Err(Error::Roundoff)
    }
}

/// Two-loop recursion: approximate the inverse Hessian applied to `-g`.
fn direction(history: &VecDeque<Correction>, g: &[f64], n: usize) -> Result<Vec<f64>> {
    let mut q: Vec<f64> = g.iter().map(|v| -v).collect();
    if history.is_empty() {
        // Steepest descent until a correction pair exists.
        return Ok(q);
    }

    let mut alphas = vec![0.0; history.len()];
    for (idx, c) in history.iter().enumerate().rev() {
        if c.s.len() != n || c.y.len() != n {
            return Err(Error::DimensionMismatch {
                expected: n,
                got: c.s.len().min(c.y.len()),
            });
        }
        let alpha = c.rho * dot(&c.s, &q);
        for (qv, yv) in q.iter_mut().zip(&c.y) {
            *qv -= alpha * yv;
        }
        alphas[idx] = alpha;
    }

    // Scale by the most recent curvature estimate.
    let last = history.back().unwrap();
    let gamma = dot(&last.s, &last.y) / dot(&last.y, &last.y);
    for v in q.iter_mut() {
        *v *= gamma;
    }

    for (idx, c) in history.iter().enumerate() {
        let beta = c.rho * dot(&c.y, &q);
        for (qv, sv) in q.iter_mut().zip(&c.s) {
            *qv += (alphas[idx] - beta) * sv;
        }
    }
    Ok(q)
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Concave quadratic f(w) = -‖w - target‖², maximized at `target`.
    struct Quadratic {
        target: Vec<f64>,
    }

    impl Objective for Quadratic {
        fn dim(&self) -> usize {
            self.target.len()
        }

        fn evaluate(&self, w: &[f64]) -> Result<f64> {
            Ok(-w
                .iter()
                .zip(&self.target)
                .map(|(a, b)| (a - b) * (a - b))
                .sum::<f64>())
        }
    }

    impl ObjectiveGradient for Quadratic {
        fn dim(&self) -> usize {
            self.target.len()
        }

        fn evaluate_into(&self, grad: &mut [f64], w: &[f64]) -> Result<()> {
            for i in 0..w.len() {
                grad[i] = -2.0 * (w[i] - self.target[i]);
            }
            Ok(())
        }
    }

    #[test]
    fn test_converges_to_quadratic_maximum() {
        let f = Quadratic {
            target: vec![3.0, -1.0],
        };
        let mut lbfgs = Lbfgs::new(&f, &f);
        lbfgs.params_mut().set_num_memories(5).unwrap();
        lbfgs.params_mut().set_max_iterations(100).unwrap();

        let learned = lbfgs.learn_weights(&[0.0, 0.0]).unwrap();
        assert_eq!(learned.termination, Termination::Converged);
        assert!((learned.weights[0] - 3.0).abs() < 1e-3);
        assert!((learned.weights[1] + 1.0).abs() < 1e-3);
        assert!(learned.value.abs() < 1e-6);
    }

    #[test]
    fn test_already_converged_at_start() {
        let f = Quadratic {
            target: vec![1.0, 2.0],
        };
        let lbfgs = Lbfgs::new(&f, &f);
        let learned = lbfgs.learn_weights(&[1.0, 2.0]).unwrap();
        assert_eq!(learned.termination, Termination::Converged);
        assert_eq!(learned.iterations, 0);
    }

    #[test]
    fn test_iteration_budget_is_honored() {
        let f = Quadratic {
            target: vec![3.0, -1.0],
        };
        let mut lbfgs = Lbfgs::new(&f, &f);
        lbfgs.params_mut().set_max_iterations(1).unwrap();
        lbfgs.params_mut().set_period(0);

        let learned = lbfgs.learn_weights(&[0.0, 0.0]).unwrap();
        assert_eq!(learned.termination, Termination::MaxIterationsReached);
        assert_eq!(learned.iterations, 1);
    }

    #[test]
    fn test_small_memory_still_converges() {
        let f = Quadratic {
            target: vec![1.0, 2.0, 3.0, 4.0, 5.0],
        };
        let mut lbfgs = Lbfgs::new(&f, &f);
        lbfgs.params_mut().set_num_memories(2).unwrap();

        let learned = lbfgs.learn_weights(&[10.0, -5.0, 8.0, 0.0, 0.0]).unwrap();
        assert_eq!(learned.termination, Termination::Converged);
        for (w, t) in learned.weights.iter().zip(&f.target) {
            assert!((w - t).abs() < 1e-3);
        }
    }

    struct Poisoned;

    impl Objective for Poisoned {
        fn dim(&self) -> usize {
            1
        }

        fn evaluate(&self, _w: &[f64]) -> Result<f64> {
            Ok(f64::NAN)
        }
    }

    impl ObjectiveGradient for Poisoned {
        fn dim(&self) -> usize {
            1
        }

        fn evaluate_into(&self, grad: &mut [f64], _w: &[f64]) -> Result<()> {
            grad[0] = 1.0;
            Ok(())
        }
    }

    #[test]
    fn test_nan_objective_is_a_terminal_failure() {
        let f = Poisoned;
        let lbfgs = Lbfgs::new(&f, &f);
        assert!(matches!(
            lbfgs.learn_weights(&[1.0]),
            Err(Error::NotANumber)
        ));
    }

    /// Gradient with the wrong sign: every direction looks like descent but
    /// no step can satisfy sufficient decrease.
    struct FlippedGradient;

    impl Objective for FlippedGradient {
        fn dim(&self) -> usize {
            1
        }

        fn evaluate(&self, w: &[f64]) -> Result<f64> {
            Ok(-w[0] * w[0])
        }
    }

    impl ObjectiveGradient for FlippedGradient {
        fn dim(&self) -> usize {
            1
        }

        fn evaluate_into(&self, grad: &mut [f64], w: &[f64]) -> Result<()> {
            grad[0] = 2.0 * w[0];
            Ok(())
        }
    }

    #[test]
    fn test_line_search_failure_is_roundoff() {
        let f = FlippedGradient;
        let lbfgs = Lbfgs::new(&f, &f);
        assert!(matches!(lbfgs.learn_weights(&[1.0]), Err(Error::Roundoff)));
    }

    #[test]
    fn test_initial_vector_dimension_is_checked() {
        let f = Quadratic {
            target: vec![1.0, 2.0],
        };
        let lbfgs = Lbfgs::new(&f, &f);
        match lbfgs.learn_weights(&[0.0, 0.0, 0.0]) {
            Err(Error::InvalidDimension { expected, got }) => {
                assert_eq!((expected, got), (2, 3));
            }
            other => panic!("expected InvalidDimension, got {:?}", other),
        }
    }

    #[test]
    fn test_mismatched_evaluator_pair_is_rejected() {
        let f = Quadratic {
            target: vec![1.0, 2.0],
        };
        let g = Quadratic {
            target: vec![1.0, 2.0, 3.0],
        };
        let lbfgs = Lbfgs::new(&f, &g);
        assert!(matches!(
            lbfgs.learn_weights(&[0.0, 0.0]),
            Err(Error::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_caller_vector_is_not_mutated() {
        let f = Quadratic {
            target: vec![3.0, -1.0],
        };
        let lbfgs = Lbfgs::new(&f, &f);
        let initial = vec![0.5, 0.5];
        let _ = lbfgs.learn_weights(&initial).unwrap();
        assert_eq!(initial, vec![0.5, 0.5]);
    }

    #[test]
    fn test_param_validation() {
        let mut params = LbfgsParams::default();
        assert!(params.set_num_memories(0).is_err());
        assert!(params.set_max_iterations(0).is_err());
        assert!(params.set_epsilon(-1.0).is_err());
        assert!(params.set_ftol(0.6).is_err());
        assert!(params.set_gtol(1.5).is_err());
        assert!(params.set_max_linesearch(0).is_err());
        assert!(params.set_num_memories(5).is_ok());
        assert_eq!(params.num_memories(), 5);
    }
}
