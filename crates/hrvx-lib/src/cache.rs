//! On-disk store of processed cases.
//!
//! One binary entry per case, written atomically: the bytes land in a
//! temporary file in the cache directory and reach their final name by
//! rename, so a concurrent reader never observes a partial entry.
//! Encoding is bincode over the serde model, which round-trips f64
//! bit patterns including NaN and the infinities.

use crate::case::ProcessedCase;
use crate::error::CacheError;
use log::{info, warn};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const ENTRY_PREFIX: &str = "case_";
const ENTRY_EXT: &str = ".bin";

#[derive(Debug, Clone)]
pub struct CaseCache {
    root: PathBuf,
}

impl CaseCache {
    /// Open a cache directory, creating it if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|source| CacheError::Io { path: root.clone(), source })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the entry for `case_id`.
    pub fn entry_path(&self, case_id: &str) -> PathBuf {
        self.root.join(format!("{ENTRY_PREFIX}{case_id}{ENTRY_EXT}"))
    }

    /// Whether an entry for `case_id` already exists.
    pub fn contains(&self, case_id: &str) -> bool {
        self.entry_path(case_id).is_file()
    }

    /// Persist a processed case, replacing any previous entry.
    pub fn save(&self, case: &ProcessedCase) -> Result<PathBuf, CacheError> {
        let bytes = bincode::serde::encode_to_vec(case, bincode::config::standard())
            .map_err(|e| CacheError::Encode { case: case.case.id.clone(), reason: e.to_string() })?;
        let path = self.entry_path(&case.case.id);
        let mut tmp = tempfile::NamedTempFile::new_in(&self.root)
            .map_err(|source| CacheError::Io { path: self.root.clone(), source })?;
        tmp.write_all(&bytes)
            .map_err(|source| CacheError::Io { path: path.clone(), source })?;
        tmp.persist(&path)
            .map_err(|e| CacheError::Io { path: path.clone(), source: e.error })?;
        info!("cached case {} ({} bytes)", case.case.id, bytes.len());
        Ok(path)
    }

    /// Load one entry.
    pub fn load(&self, path: &Path) -> Result<ProcessedCase, CacheError> {
        let bytes = fs::read(path)
            .map_err(|source| CacheError::Io { path: path.to_path_buf(), source })?;
        let (case, _) =
            bincode::serde::decode_from_slice::<ProcessedCase, _>(&bytes, bincode::config::standard())
                .map_err(|e| CacheError::Corrupt { path: path.to_path_buf(), reason: e.to_string() })?;
        Ok(case)
    }

    /// Load every readable entry in name order. Corrupt entries are
    /// logged and skipped, never fatal.
    pub fn load_all(&self) -> Result<Vec<ProcessedCase>, CacheError> {
        let mut paths = Vec::new();
        let entries = fs::read_dir(&self.root)
            .map_err(|source| CacheError::Io { path: self.root.clone(), source })?;
        for entry in entries {
            let entry = entry
                .map_err(|source| CacheError::Io { path: self.root.clone(), source })?;
            let path = entry.path();
            let name = path.file_name().and_then(|s| s.to_str()).unwrap_or_default();
            if name.starts_with(ENTRY_PREFIX) && name.ends_with(ENTRY_EXT) {
                paths.push(path);
            }
        }
        paths.sort();
        let mut cases = Vec::with_capacity(paths.len());
        for path in paths {
            match self.load(&path) {
                Ok(case) => cases.push(case),
                Err(err) => warn!("skipping cache entry: {err}"),
            }
        }
        Ok(cases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::{Case, FeatureBundle, ProcessedCase, Record};
    use crate::signal::{RRSeries, WindowSeries};
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn sample_case(id: &str, rr: Vec<f64>) -> ProcessedCase {
        let record = Record {
            name: "3000001_0001".to_string(),
            case_id: id.to_string(),
            path: PathBuf::from(format!("/data/x_{id}/{id}/3000001_0001")),
            fs: 125.0,
            length: 4000,
            channels: Vec::new(),
            base_time: None,
            base_date: None,
        };
        let mut bundles = BTreeMap::new();
        bundles.insert(
            record.name.clone(),
            FeatureBundle {
                rr: RRSeries { rr },
                linear: None,
                nonlinear: Some(crate::analysis::window::NonlinearFeatures {
                    app_entropy: WindowSeries { values: vec![0.1, f64::NAN, 0.3] },
                    sample_entropy: WindowSeries { values: vec![0.2, 0.4] },
                    higuchi_fd: WindowSeries::default(),
                    dfa: WindowSeries::default(),
                    sd_ratio: WindowSeries { values: vec![f64::INFINITY, 1.5] },
                }),
            },
        );
        ProcessedCase {
            case: Case {
                id: id.to_string(),
                pathology: "atrial_fibrillation".to_string(),
                sig_thresh: 1000,
                records: vec![record],
            },
            channel: "II".to_string(),
            bundles,
        }
    }

    fn assert_bits_eq(a: &[f64], b: &[f64]) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert_eq!(x.to_bits(), y.to_bits());
        }
    }

    #[test]
    fn round_trip_preserves_every_bit() {
        let dir = tempdir().unwrap();
        let cache = CaseCache::open(dir.path()).unwrap();
        let case = sample_case("p000123", vec![0.8, f64::NAN, 0.75, f64::NEG_INFINITY]);
        let path = cache.save(&case).unwrap();
        assert!(path.ends_with("case_p000123.bin"));
        assert!(cache.contains("p000123"));

        let loaded = cache.load(&path).unwrap();
        assert_eq!(loaded.case.id, "p000123");
        assert_eq!(loaded.channel, "II");
        assert_eq!(loaded.case.records.len(), 1);
        let bundle = &loaded.bundles["3000001_0001"];
        let original = &case.bundles["3000001_0001"];
        assert_bits_eq(&bundle.rr.rr, &original.rr.rr);
        let (got, want) = (
            bundle.nonlinear.as_ref().unwrap(),
            original.nonlinear.as_ref().unwrap(),
        );
        assert_bits_eq(&got.app_entropy.values, &want.app_entropy.values);
        assert_bits_eq(&got.sd_ratio.values, &want.sd_ratio.values);
    }

    #[test]
    fn saving_twice_overwrites_the_entry() {
        let dir = tempdir().unwrap();
        let cache = CaseCache::open(dir.path()).unwrap();
        cache.save(&sample_case("p000123", vec![0.8])).unwrap();
        cache.save(&sample_case("p000123", vec![0.9, 0.7])).unwrap();

        let cases = cache.load_all().unwrap();
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].bundles["3000001_0001"].rr.len(), 2);
    }

    #[test]
    fn load_all_skips_corrupt_entries() {
        let dir = tempdir().unwrap();
        let cache = CaseCache::open(dir.path()).unwrap();
        cache.save(&sample_case("p000123", vec![0.8])).unwrap();
        fs::write(dir.path().join("case_p000999.bin"), [0xFFu8; 16]).unwrap();
        fs::write(dir.path().join("notes.txt"), "unrelated").unwrap();

        let cases = cache.load_all().unwrap();
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].case.id, "p000123");
    }

    #[test]
    fn missing_cache_entry_is_not_a_hit() {
        let dir = tempdir().unwrap();
        let cache = CaseCache::open(dir.path().join("fresh")).unwrap();
        assert!(!cache.contains("p000123"));
        assert!(cache.load(&cache.entry_path("p000123")).is_err());
    }
}
