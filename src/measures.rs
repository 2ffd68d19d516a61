//! Localization quality measures.
//!
//! The standard localization score is the area overlap between a predicted
//! box and the ground truth; a detection counts as a hit when the overlap
//! reaches a threshold, and recall is the hit fraction across the dataset.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use log::info;

use crate::crf::ConditionalRandomField;
use crate::dataset::{BoundingBox, DataSet};
use crate::error::Result;

/// Intersection-over-union of two boxes, in [0, 1].
pub fn overlap(a: &BoundingBox, b: &BoundingBox) -> f64 {
    let left = a.left.max(b.left);
    let top = a.top.max(b.top);
    let right = a.right.min(b.right);
    let bottom = a.bottom.min(b.bottom);
    if right < left || bottom < top {
        return 0.0;
    }
    let inter = BoundingBox::new(left, top, right, bottom).area() as f64;
    let union = (a.area() + b.area()) as f64 - inter;
    if union == 0.0 {
        return 0.0;
    }
    inter / union
}

/// Decode every example with the CRF's stored weights and write a
/// recall-over-overlap-threshold curve to `path`, one `threshold recall`
/// line per threshold 0.0, 0.05, ..., 1.0.
pub fn write_recall_overlap(
    path: &Path,
    data: &DataSet,
    crf: &ConditionalRandomField,
) -> Result<()> {
    let mut overlaps = Vec::with_capacity(data.len());
    for i in 0..data.len() {
        let predicted = crf.best_box(data.image(i))?;
        overlaps.push(overlap(&predicted, data.bbox(i)));
    }

    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    let total = overlaps.len().max(1) as f64;
    for step in 0..=20 {
        let threshold = step as f64 * 0.05;
        let hits = overlaps.iter().filter(|&&o| o >= threshold).count();
        writeln!(writer, "{:.2} {:.6}", threshold, hits as f64 / total)?;
    }
    writer.flush()?;
    info!(
        "wrote recall/overlap curve for {} examples to {}",
        data.len(),
        path.display()
    );
    Ok(())
}
