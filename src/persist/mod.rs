//! Saving and loading measurement data.
//!
//! Three formats cover lab use: compact binary (bincode) for bulk
//! traces, optionally gzipped, pretty JSON for anything a human might
//! want to diff, and MATLAB `.mat` files for handing results to
//! colleagues who live in MATLAB.
//!
//! Relative filenames resolve against [`crate::paths::file_dir`], so
//! experiment scripts can say `save_bin("sweep7", &trace)` and have it
//! land in the session's data directory.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::paths;

pub mod mat;

pub use mat::{load_mat, save_mat, MatFile, MatVar};

/// Appends `ext` to `filename` unless it already ends with it.
///
/// Unlike `Path::with_extension` this never replaces an existing
/// extension, so `sweep.raw` gains a suffix and becomes `sweep.raw.gz`.
pub(crate) fn with_extension_suffix(filename: &Path, ext: &str) -> PathBuf {
    match filename.extension().and_then(|e| e.to_str()) {
        Some(e) if e.eq_ignore_ascii_case(ext) => filename.to_path_buf(),
        _ => {
            let mut name = filename.as_os_str().to_os_string();
            name.push(".");
            name.push(ext);
            PathBuf::from(name)
        }
    }
}

/// Saves any serializable value as compact binary.
pub fn save_bin<T, P>(filename: P, data: &T) -> Result<()>
where
    T: Serialize + ?Sized,
    P: AsRef<Path>,
{
    let path = paths::resolve_data_file(filename)?;
    let file = File::create(&path)
        .with_context(|| format!("Failed to open file for writing: {}", path.display()))?;
    let writer = BufWriter::new(file);
    bincode::serialize_into(writer, data)
        .with_context(|| format!("Failed to serialize data to {}", path.display()))?;
    Ok(())
}

/// Loads a value previously written with [`save_bin`].
pub fn load_bin<T, P>(filename: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = paths::resolve_existing_file(filename)?;
    let file = File::open(&path)
        .with_context(|| format!("Failed to open file for reading: {}", path.display()))?;
    let reader = BufReader::new(file);
    bincode::deserialize_from(reader)
        .with_context(|| format!("Failed to deserialize data from {}", path.display()))
}

/// Saves compact binary through a gzip layer. A `.gz` suffix is added
/// to the filename if not already present.
pub fn save_bin_gz<T, P>(filename: P, data: &T) -> Result<()>
where
    T: Serialize + ?Sized,
    P: AsRef<Path>,
{
    let gz_name = with_extension_suffix(filename.as_ref(), "gz");
    let path = paths::resolve_data_file(&gz_name)?;
    let file = File::create(&path)
        .with_context(|| format!("Failed to open file for writing: {}", path.display()))?;
    let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    bincode::serialize_into(&mut encoder, data)
        .with_context(|| format!("Failed to serialize data to {}", path.display()))?;
    encoder
        .finish()
        .with_context(|| format!("Failed to finish gzip stream for {}", path.display()))?;
    Ok(())
}

/// Loads a value previously written with [`save_bin_gz`]. The `.gz`
/// suffix is added to the filename if not already present.
pub fn load_bin_gz<T, P>(filename: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let gz_name = with_extension_suffix(filename.as_ref(), "gz");
    let path = paths::resolve_existing_file(&gz_name)?;
    let file = File::open(&path)
        .with_context(|| format!("Failed to open file for reading: {}", path.display()))?;
    let decoder = GzDecoder::new(BufReader::new(file));
    bincode::deserialize_from(decoder)
        .with_context(|| format!("Failed to deserialize data from {}", path.display()))
}

/// Saves any serializable value as pretty-printed JSON. A `.json`
/// suffix is added to the filename if not already present.
pub fn save_json<T, P>(filename: P, data: &T) -> Result<()>
where
    T: Serialize + ?Sized,
    P: AsRef<Path>,
{
    let json_name = with_extension_suffix(filename.as_ref(), "json");
    let path = paths::resolve_data_file(&json_name)?;
    let file = File::create(&path)
        .with_context(|| format!("Failed to open file for writing: {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, data)
        .with_context(|| format!("Failed to serialize data to {}", path.display()))?;
    writer
        .flush()
        .with_context(|| format!("Failed to flush {}", path.display()))?;
    Ok(())
}

/// Loads a value previously written with [`save_json`]. The `.json`
/// suffix is added to the filename if not already present.
pub fn load_json<T, P>(filename: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let json_name = with_extension_suffix(filename.as_ref(), "json");
    let path = paths::resolve_existing_file(&json_name)?;
    let file = File::open(&path)
        .with_context(|| format!("Failed to open file for reading: {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to deserialize data from {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct SweepRecord {
        bias_v: Vec<f64>,
        power_mw: Vec<f64>,
        note: String,
    }

    fn sample_record() -> SweepRecord {
        SweepRecord {
            bias_v: vec![0.0, 0.5, 1.0, 1.5],
            power_mw: vec![0.02, 0.11, 0.48, 1.9],
            note: "laser diode LIV".to_string(),
        }
    }

    #[test]
    fn test_with_extension_suffix() {
        assert_eq!(
            with_extension_suffix(Path::new("sweep"), "gz"),
            PathBuf::from("sweep.gz")
        );
        assert_eq!(
            with_extension_suffix(Path::new("sweep.gz"), "gz"),
            PathBuf::from("sweep.gz")
        );
        // Appended, never replaced.
        assert_eq!(
            with_extension_suffix(Path::new("sweep.raw"), "gz"),
            PathBuf::from("sweep.raw.gz")
        );
    }

    #[test]
    fn test_bin_round_trip() {
        let dir = tempdir().unwrap();
        let record = sample_record();

        // Absolute paths bypass the session file dir.
        let path = dir.path().join("liv.bin");
        save_bin(&path, &record).unwrap();
        let loaded: SweepRecord = load_bin(&path).unwrap();
        assert_eq!(loaded, record);
    }

    #[test]
    fn test_bin_gz_round_trip_adds_suffix() {
        let dir = tempdir().unwrap();
        let record = sample_record();

        save_bin_gz(dir.path().join("liv"), &record).unwrap();
        assert!(dir.path().join("liv.gz").exists());
        assert!(!dir.path().join("liv").exists());

        // Loading works with or without the suffix spelled out.
        let a: SweepRecord = load_bin_gz(dir.path().join("liv")).unwrap();
        let b: SweepRecord = load_bin_gz(dir.path().join("liv.gz")).unwrap();
        assert_eq!(a, record);
        assert_eq!(b, record);
    }

    #[test]
    fn test_gzipped_file_is_actually_compressed() {
        let dir = tempdir().unwrap();
        // Highly repetitive data compresses well.
        let record = SweepRecord {
            bias_v: vec![0.25; 4096],
            power_mw: vec![1.0; 4096],
            note: "flat trace".to_string(),
        };

        save_bin(dir.path().join("flat.bin"), &record).unwrap();
        save_bin_gz(dir.path().join("flat"), &record).unwrap();

        let plain = std::fs::metadata(dir.path().join("flat.bin")).unwrap().len();
        let zipped = std::fs::metadata(dir.path().join("flat.gz")).unwrap().len();
        assert!(zipped < plain / 2, "gzip saved {} vs plain {}", zipped, plain);
    }

    #[test]
    fn test_json_round_trip_is_readable() {
        let dir = tempdir().unwrap();
        let record = sample_record();

        save_json(dir.path().join("liv"), &record).unwrap();
        let text = std::fs::read_to_string(dir.path().join("liv.json")).unwrap();
        assert!(text.contains("bias_v"));
        assert!(text.contains("laser diode LIV"));

        let loaded: SweepRecord = load_json(dir.path().join("liv")).unwrap();
        assert_eq!(loaded, record);
    }

    #[test]
    fn test_load_missing_file_names_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("never_saved.bin");
        let err = load_bin::<SweepRecord, _>(&path).unwrap_err();
        assert!(err.to_string().contains("never_saved.bin"));
    }
}
