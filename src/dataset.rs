//! Dataset loading for localization training.
//!
//! An example is an image together with a ground-truth bounding box. Images
//! arrive pre-processed as lists of quantized interest points ("visual
//! words"); this crate performs no feature extraction of its own.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use log::info;

use crate::error::{Error, Result};

/// A quantized interest point: pixel position plus codebook word id.
#[derive(Debug, Clone, Copy)]
pub struct InterestPoint {
    pub x: u32,
    pub y: u32,
    pub word: u32,
}

/// One image of the dataset: its dimensions and interest points.
#[derive(Debug, Clone)]
pub struct ImageData {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub points: Vec<InterestPoint>,
}

/// Axis-aligned box with inclusive pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl BoundingBox {
    pub fn new(left: u32, top: u32, right: u32, bottom: u32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Area in pixels (boxes are inclusive on both ends).
    pub fn area(&self) -> u64 {
        if self.right < self.left || self.bottom < self.top {
            return 0;
        }
        (self.right - self.left + 1) as u64 * (self.bottom - self.top + 1) as u64
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.left && x <= self.right && y >= self.top && y <= self.bottom
    }
}

/// Training examples: images with their ground-truth annotations.
///
/// A loaded dataset is read-only; the objective and gradient evaluators
/// borrow it shared and never mutate it.
#[derive(Debug, Default)]
pub struct DataSet {
    images: Vec<ImageData>,
    bboxes: Vec<BoundingBox>,
    codebook_size: usize,
}

fn open(path: &Path) -> Result<BufReader<File>> {
    let file = File::open(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => Error::FileNotFound(path.to_path_buf()),
        _ => Error::Io(e),
    })?;
    Ok(BufReader::new(file))
}

fn bad_line(path: &Path, lineno: usize) -> Error {
    Error::Io(io::Error::new(
        io::ErrorKind::InvalidData,
        format!("{}:{}: malformed line", path.display(), lineno),
    ))
}

impl DataSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an in-memory example. The codebook grows to cover its word ids.
    pub fn push(&mut self, image: ImageData, bbox: BoundingBox) {
        for p in &image.points {
            self.codebook_size = self.codebook_size.max(p.word as usize + 1);
        }
        self.images.push(image);
        self.bboxes.push(bbox);
    }

    /// Load images listed in `subset_list` (lines of `name width height`).
    ///
    /// Interest points for image `name` are read from `dir/name.txt`, one
    /// `x y word` triple per line.
    pub fn load_images(&mut self, dir: &Path, subset_list: &Path) -> Result<()> {
        let reader = open(subset_list)?;
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut fields = line.split_whitespace();
            let (name, width, height) = match (fields.next(), fields.next(), fields.next()) {
                (Some(n), Some(w), Some(h)) => {
                    let w = w.parse().map_err(|_| bad_line(subset_list, lineno + 1))?;
                    let h = h.parse().map_err(|_| bad_line(subset_list, lineno + 1))?;
                    (n.to_string(), w, h)
                }
                _ => return Err(bad_line(subset_list, lineno + 1)),
            };

            let points = Self::load_points(&dir.join(format!("{}.txt", name)))?;
            for p in &points {
                self.codebook_size = self.codebook_size.max(p.word as usize + 1);
            }
            self.images.push(ImageData {
                name,
                width,
                height,
                points,
            });
        }
        info!(
            "loaded {} images from {} (codebook size {})",
            self.images.len(),
            dir.display(),
            self.codebook_size
        );
        Ok(())
    }

    fn load_points(path: &Path) -> Result<Vec<InterestPoint>> {
        let reader = open(path)?;
        let mut points = Vec::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut fields = line.split_whitespace();
            match (fields.next(), fields.next(), fields.next()) {
                (Some(x), Some(y), Some(word)) => points.push(InterestPoint {
                    x: x.parse().map_err(|_| bad_line(path, lineno + 1))?,
                    y: y.parse().map_err(|_| bad_line(path, lineno + 1))?,
                    word: word.parse().map_err(|_| bad_line(path, lineno + 1))?,
                }),
                _ => return Err(bad_line(path, lineno + 1)),
            }
        }
        Ok(points)
    }

    /// Load ground-truth annotations, one `left top right bottom` line per
    /// image, in the same order as the subset list.
    pub fn load_bboxes(&mut self, path: &Path) -> Result<()> {
        let reader = open(path)?;
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let coords: Vec<u32> = line
                .split_whitespace()
                .map(|f| f.parse().map_err(|_| bad_line(path, lineno + 1)))
                .collect::<Result<_>>()?;
            if coords.len() != 4 {
                return Err(bad_line(path, lineno + 1));
            }
            self.bboxes
                .push(BoundingBox::new(coords[0], coords[1], coords[2], coords[3]));
        }
        info!("loaded {} annotations from {}", self.bboxes.len(), path.display());
        Ok(())
    }

    /// Number of usable examples (images with an annotation).
    pub fn len(&self) -> usize {
        self.images.len().min(self.bboxes.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn image(&self, i: usize) -> &ImageData {
        &self.images[i]
    }

    pub fn bbox(&self, i: usize) -> &BoundingBox {
        &self.bboxes[i]
    }

    /// Size of the visual-word codebook; equals the feature dimension.
    pub fn codebook_size(&self) -> usize {
        self.codebook_size
    }
}
