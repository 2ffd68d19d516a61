//! Conditional Random Field training for object localization.
//!
//! This library trains the weights of a CRF that scores candidate bounding
//! boxes for an object in an image. Training maximizes a regularized
//! log-likelihood objective with L-BFGS; a finite-difference verifier checks
//! the analytic gradient against numerical differentiation.
//!
//! # Examples
//!
//! ```no_run
//! use std::path::Path;
//!
//! use crfloc::learn::{GradientCheck, Lbfgs, LogLikelihood, LogLikelihoodGradient, ObjectiveGradient};
//! use crfloc::{save_weights, ConditionalRandomField, DataSet};
//!
//! let mut data = DataSet::new();
//! data.load_images(Path::new("features"), Path::new("subsets/train.txt"))?;
//! data.load_bboxes(Path::new("annotations/train.ess"))?;
//!
//! let mut crf = ConditionalRandomField::new(data.codebook_size());
//! crf.set_step_size(16)?;
//!
//! let mut loglik = LogLikelihood::new(&data, &crf);
//! loglik.set_lambda(1000.0)?;
//! let mut loglik_grad = LogLikelihoodGradient::new(&data, &crf);
//! loglik_grad.set_lambda(1000.0)?;
//!
//! // Sanity-check the analytic gradient before spending time on training.
//! let w0 = vec![0.0; data.codebook_size()];
//! let mut grad = vec![0.0; data.codebook_size()];
//! loglik_grad.evaluate_into(&mut grad, &w0)?;
//! let mismatches = GradientCheck::default().verify(&loglik, &grad, &w0)?;
//! assert!(mismatches.is_empty());
//!
//! let lbfgs = Lbfgs::new(&loglik, &loglik_grad);
//! let learned = lbfgs.learn_weights(&w0)?;
//! save_weights(Path::new("weights.txt"), &learned.weights)?;
//! # Ok::<(), crfloc::Error>(())
//! ```

mod crf;
mod dataset;
mod error;
mod measures;
mod weights;

/// Learning module: objective, gradient verification and optimization
pub mod learn;

// Re-export main types
pub use self::crf::ConditionalRandomField;
pub use self::dataset::{BoundingBox, DataSet, ImageData, InterestPoint};
pub use self::error::{Error, Result};
pub use self::measures::{overlap, write_recall_overlap};
pub use self::weights::{load_weights, random_weights, save_weights, Weights};
