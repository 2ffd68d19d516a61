//! Conditional Random Field over candidate bounding boxes.
//!
//! A candidate box `y` for image `x` is scored linearly as `w · φ(x, y)`,
//! where `φ(x, y)` is the histogram of visual words whose interest points
//! fall inside `y`. The conditional distribution is
//! `p(y | x; w) = exp(w · φ(x, y)) / Z(x; w)` with the partition function
//! summing over every candidate box.

use std::io;

use crate::dataset::{BoundingBox, ImageData};
use crate::error::{Error, Result};

/// Linear-chain-free CRF scoring model for box localization.
#[derive(Debug, Clone)]
pub struct ConditionalRandomField {
    /// Feature dimension (visual-word codebook size).
    dim: usize,
    /// Candidate grid stride: 1 enumerates every box (exhaustive search),
    /// larger values enumerate a sliding-window grid.
    step_size: usize,
    /// Weights used for decoding; set via [`set_weights`](Self::set_weights).
    weights: Vec<f64>,
}

impl ConditionalRandomField {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            step_size: 1,
            weights: Vec::new(),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn step_size(&self) -> usize {
        self.step_size
    }

    /// Set the candidate grid stride. Must be at least 1.
    pub fn set_step_size(&mut self, step_size: usize) -> Result<()> {
        if step_size < 1 {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "step_size must be at least 1",
            )));
        }
        self.step_size = step_size;
        Ok(())
    }

    /// Store weights for decoding.
    pub fn set_weights(&mut self, weights: &[f64]) -> Result<()> {
        self.check_dim(weights)?;
        self.weights = weights.to_vec();
        Ok(())
    }

    fn check_dim(&self, w: &[f64]) -> Result<()> {
        if w.len() != self.dim {
            return Err(Error::InvalidDimension {
                expected: self.dim,
                got: w.len(),
            });
        }
        Ok(())
    }

    /// A dataset word id at or beyond `dim` would index past the weight
    /// vector; report it as a dimension error instead of panicking.
    fn check_words(&self, image: &ImageData) -> Result<()> {
        for p in &image.points {
            if p.word as usize >= self.dim {
                return Err(Error::DimensionMismatch {
                    expected: self.dim,
                    got: p.word as usize + 1,
                });
            }
        }
        Ok(())
    }

    /// All candidate boxes for `image`: corners on the stride grid.
    fn candidates(&self, image: &ImageData) -> Vec<BoundingBox> {
        let xs: Vec<u32> = (0..image.width).step_by(self.step_size).collect();
        let ys: Vec<u32> = (0..image.height).step_by(self.step_size).collect();

        let mut boxes = Vec::new();
        for (i, &left) in xs.iter().enumerate() {
            for &right in &xs[i..] {
                for (j, &top) in ys.iter().enumerate() {
                    for &bottom in &ys[j..] {
                        boxes.push(BoundingBox::new(left, top, right, bottom));
                    }
                }
            }
        }
        boxes
    }

    /// Linear score `w · φ(image, bbox)`.
    pub fn score(&self, image: &ImageData, bbox: &BoundingBox, w: &[f64]) -> Result<f64> {
        self.check_dim(w)?;
        self.check_words(image)?;
        let mut score = 0.0;
        for p in &image.points {
            if bbox.contains(p.x, p.y) {
                score += w[p.word as usize];
            }
        }
        Ok(score)
    }

    /// Log partition function `log Σ_y exp(w · φ(image, y))`.
    ///
    /// Computed max-shifted for stability; a non-finite result is reported
    /// as [`Error::NotANumber`] instead of being propagated.
    pub fn log_partition(&self, image: &ImageData, w: &[f64]) -> Result<f64> {
        let scores = self.candidate_scores(image, w)?;
        let max = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        if !max.is_finite() {
            return Err(Error::NotANumber);
        }
        let sum: f64 = scores.iter().map(|s| (s - max).exp()).sum();
        let log_z = max + sum.ln();
        if !log_z.is_finite() {
            return Err(Error::NotANumber);
        }
        Ok(log_z)
    }

    fn candidate_scores(&self, image: &ImageData, w: &[f64]) -> Result<Vec<f64>> {
        self.check_dim(w)?;
        let candidates = self.candidates(image);
        let mut scores = Vec::with_capacity(candidates.len());
        for bbox in &candidates {
            let s = self.score(image, bbox, w)?;
            if !s.is_finite() {
                return Err(Error::NotANumber);
            }
            scores.push(s);
        }
        Ok(scores)
    }

    /// Accumulate the model feature expectation `Σ_y p(y|x) φ(x, y)` into
    /// `out`. The buffer must be zeroed by the caller and have length `dim`.
    pub fn expected_counts_into(
        &self,
        out: &mut [f64],
        image: &ImageData,
        w: &[f64],
    ) -> Result<()> {
        if out.len() != self.dim {
            return Err(Error::DimensionMismatch {
                expected: self.dim,
                got: out.len(),
            });
        }
        let candidates = self.candidates(image);
        let scores = self.candidate_scores(image, w)?;
        let max = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let sum: f64 = scores.iter().map(|s| (s - max).exp()).sum();
        let log_z = max + sum.ln();
        if !log_z.is_finite() {
            return Err(Error::NotANumber);
        }

        for (bbox, score) in candidates.iter().zip(&scores) {
            let prob = (score - log_z).exp();
            for p in &image.points {
                if bbox.contains(p.x, p.y) {
                    out[p.word as usize] += prob;
                }
            }
        }
        Ok(())
    }

    /// Accumulate the empirical features `φ(image, bbox)` into `out`.
    pub fn observed_counts_into(
        &self,
        out: &mut [f64],
        image: &ImageData,
        bbox: &BoundingBox,
    ) -> Result<()> {
        if out.len() != self.dim {
            return Err(Error::DimensionMismatch {
                expected: self.dim,
                got: out.len(),
            });
        }
        self.check_words(image)?;
        for p in &image.points {
            if bbox.contains(p.x, p.y) {
                out[p.word as usize] += 1.0;
            }
        }
        Ok(())
    }

    /// Decode the highest-scoring candidate box under the stored weights.
    pub fn best_box(&self, image: &ImageData) -> Result<BoundingBox> {
        self.check_dim(&self.weights)?;
        let mut best = BoundingBox::new(0, 0, 0, 0);
        let mut best_score = f64::NEG_INFINITY;
        for bbox in self.candidates(image) {
            let s = self.score(image, &bbox, &self.weights)?;
            if s > best_score {
                best_score = s;
                best = bbox;
            }
        }
        Ok(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::InterestPoint;
    use approx::assert_relative_eq;

    fn tiny_image() -> ImageData {
        ImageData {
            name: "tiny".to_string(),
            width: 2,
            height: 2,
            points: vec![
                InterestPoint { x: 0, y: 0, word: 0 },
                InterestPoint { x: 1, y: 1, word: 1 },
            ],
        }
    }

    #[test]
    fn test_candidate_count() {
        let crf = ConditionalRandomField::new(2);
        // 2x2 image, stride 1: 3 (left,right) pairs x 3 (top,bottom) pairs.
        assert_eq!(crf.candidates(&tiny_image()).len(), 9);
    }

    #[test]
    fn test_stride_reduces_candidates() {
        let mut crf = ConditionalRandomField::new(2);
        crf.set_step_size(2).unwrap();
        let image = ImageData {
            name: "wide".to_string(),
            width: 4,
            height: 4,
            points: vec![],
        };
        // Grid {0, 2} in each axis: 3 pairs per axis.
        assert_eq!(crf.candidates(&image).len(), 9);
    }

    #[test]
    fn test_score_counts_points_in_box() {
        let crf = ConditionalRandomField::new(2);
        let image = tiny_image();
        let w = vec![2.0, -3.0];

        let whole = BoundingBox::new(0, 0, 1, 1);
        assert_relative_eq!(crf.score(&image, &whole, &w).unwrap(), -1.0);

        let corner = BoundingBox::new(0, 0, 0, 0);
        assert_relative_eq!(crf.score(&image, &corner, &w).unwrap(), 2.0);
    }

    #[test]
    fn test_log_partition_zero_weights() {
        let crf = ConditionalRandomField::new(2);
        // With w = 0 every candidate scores 0, so Z = #candidates.
        let w = vec![0.0, 0.0];
        let log_z = crf.log_partition(&tiny_image(), &w).unwrap();
        assert_relative_eq!(log_z, (9.0f64).ln(), epsilon = 1e-12);
    }

    #[test]
    fn test_log_partition_overflow_is_reported() {
        let crf = ConditionalRandomField::new(2);
        let w = vec![f64::MAX, f64::MAX];
        assert!(matches!(
            crf.log_partition(&tiny_image(), &w),
            Err(Error::NotANumber)
        ));
    }

    #[test]
    fn test_dimension_checked() {
        let crf = ConditionalRandomField::new(2);
        let w = vec![0.0; 3];
        match crf.log_partition(&tiny_image(), &w) {
            Err(Error::InvalidDimension { expected, got }) => {
                assert_eq!((expected, got), (2, 3));
            }
            other => panic!("expected InvalidDimension, got {:?}", other),
        }
    }

    #[test]
    fn test_expected_counts_sum_to_expected_mass() {
        let crf = ConditionalRandomField::new(2);
        let image = tiny_image();
        let w = vec![0.0, 0.0];
        let mut out = vec![0.0; 2];
        crf.expected_counts_into(&mut out, &image, &w).unwrap();
        // Under uniform p(y), E[count of word k] is the fraction of
        // candidates containing the point carrying word k. Each corner point
        // of a 2x2 image lies in 4 of the 9 candidates.
        assert_relative_eq!(out[0], 4.0 / 9.0, epsilon = 1e-12);
        assert_relative_eq!(out[1], 4.0 / 9.0, epsilon = 1e-12);
    }

    #[test]
    fn test_best_box_prefers_positive_words() {
        let mut crf = ConditionalRandomField::new(2);
        crf.set_weights(&[1.0, -1.0]).unwrap();
        let best = crf.best_box(&tiny_image()).unwrap();
        // Only the word-0 point at (0, 0) should be inside.
        assert!(best.contains(0, 0));
        assert!(!best.contains(1, 1));
    }

    #[test]
    fn test_word_id_beyond_dim_is_an_error() {
        let crf = ConditionalRandomField::new(2);
        let image = ImageData {
            name: "bad".to_string(),
            width: 2,
            height: 2,
            points: vec![InterestPoint { x: 0, y: 0, word: 5 }],
        };
        let w = vec![0.0, 0.0];

        // Word id 5 against a 2-dimensional model must be rejected, not
        // index past the weight vector.
        let whole = BoundingBox::new(0, 0, 1, 1);
        match crf.score(&image, &whole, &w) {
            Err(Error::DimensionMismatch { expected, got }) => {
                assert_eq!((expected, got), (2, 6));
            }
            other => panic!("expected DimensionMismatch, got {:?}", other),
        }

        let mut out = vec![0.0; 2];
        assert!(matches!(
            crf.observed_counts_into(&mut out, &image, &whole),
            Err(Error::DimensionMismatch { .. })
        ));
        assert!(matches!(
            crf.expected_counts_into(&mut out, &image, &w),
            Err(Error::DimensionMismatch { .. })
        ));
        assert!(matches!(
            crf.log_partition(&image, &w),
            Err(Error::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_set_step_size_rejects_zero() {
        let mut crf = ConditionalRandomField::new(2);
        // An invalid stride is a bad input, not a dimension error.
        assert!(matches!(crf.set_step_size(0), Err(Error::Io(_))));
        assert!(crf.set_step_size(1).is_ok());
    }
}
