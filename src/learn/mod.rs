//! Parameter learning for the localization CRF.
//!
//! This module contains the regularized log-likelihood objective and its
//! analytic gradient, a finite-difference gradient verifier, and the L-BFGS
//! optimizer that drives the weights to convergence.

mod gradient_check;
mod lbfgs;
mod objective;

pub use self::gradient_check::{GradientCheck, Mismatch};
pub use self::lbfgs::{Lbfgs, LbfgsParams, Learned, Termination};
pub use self::objective::{LogLikelihood, LogLikelihoodGradient, Objective, ObjectiveGradient};
