//! Weight vector initialization and persistence.
//!
//! Weights are stored as plain text, one decimal value per line in ascending
//! feature-index order with no header. The dimension of a persisted vector is
//! inferred from the line count on load.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use log::info;
use rand::Rng;

use crate::error::{Error, Result};

/// Dense parameter vector, one entry per feature.
pub type Weights = Vec<f64>;

/// Initialize a weight vector of dimension `n` uniformly in [-1, 1].
///
/// The generator is supplied by the caller so that initialization is
/// reproducible from an explicit seed.
pub fn random_weights<R: Rng>(n: usize, rng: &mut R) -> Weights {
    (0..n).map(|_| rng.gen_range(-1.0..=1.0)).collect()
}

/// Write a weight vector to `path`, one value per line.
pub fn save_weights(path: &Path, weights: &[f64]) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    for w in weights {
        writeln!(writer, "{}", w)?;
    }
    writer.flush()?;
    info!("saved {} weights to {}", weights.len(), path.display());
    Ok(())
}

/// Read a weight vector from `path`; the dimension is the number of lines.
pub fn load_weights(path: &Path) -> Result<Weights> {
    let file = File::open(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => Error::FileNotFound(path.to_path_buf()),
        _ => Error::Io(e),
    })?;
    let reader = BufReader::new(file);

    let mut weights = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        let text = line.trim();
        // Dimension is inferred from the line count, so a blank line is as
        // malformed as any other non-number.
        let value: f64 = text.parse().map_err(|_| Error::ParseWeight {
            line: lineno + 1,
            text: text.to_string(),
        })?;
        weights.push(value);
    }
    info!("loaded {} weights from {}", weights.len(), path.display());
    Ok(weights)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.txt");

        let w = vec![0.0, 1.5, -2.25];
        save_weights(&path, &w).unwrap();

        // Three values, three lines.
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 3);

        let loaded = load_weights(&path).unwrap();
        assert_eq!(loaded, w);
    }

    #[test]
    fn test_round_trip_preserves_precision() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.txt");

        // f64 Display is shortest-round-trip, so equality is exact.
        let w = vec![std::f64::consts::PI, 1e-300, -7.062499999999999e-2];
        save_weights(&path, &w).unwrap();
        assert_eq!(load_weights(&path).unwrap(), w);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_weights(&dir.path().join("nope.txt"));
        match result {
            Err(Error::FileNotFound(path)) => {
                assert!(path.ends_with("nope.txt"));
            }
            other => panic!("expected FileNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_load_malformed_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.txt");
        std::fs::write(&path, "1.0\nbogus\n3.0\n").unwrap();

        match load_weights(&path) {
            Err(Error::ParseWeight { line, text }) => {
                assert_eq!(line, 2);
                assert_eq!(text, "bogus");
            }
            other => panic!("expected ParseWeight, got {:?}", other),
        }
    }

    #[test]
    fn test_blank_line_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.txt");
        std::fs::write(&path, "1.0\n\n3.0\n").unwrap();

        // Skipping the blank line would silently shrink the dimension.
        match load_weights(&path) {
            Err(Error::ParseWeight { line, text }) => {
                assert_eq!(line, 2);
                assert_eq!(text, "");
            }
            other => panic!("expected ParseWeight, got {:?}", other),
        }
    }

    #[test]
    fn test_random_weights_seeded() {
        let mut rng = StdRng::seed_from_u64(42);
        let w1 = random_weights(100, &mut rng);
        assert_eq!(w1.len(), 100);
        assert!(w1.iter().all(|&v| (-1.0..=1.0).contains(&v)));

        // Same seed reproduces the same vector.
        let mut rng = StdRng::seed_from_u64(42);
        let w2 = random_weights(100, &mut rng);
        assert_eq!(w1, w2);
    }
}
