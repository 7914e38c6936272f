//! Persisted archive formats: histogram result archives and performance logs
//!
//! Two JSON payloads travel through the pipeline:
//! - a `ResultArchive` per job (written by the external analysis program and
//!   merged per label), mapping histogram names to bin contents and errors;
//! - a `PerfLog` per run, holding every job's memory curves under the
//!   well-known `<label>_rss` / `<label>_vir` keys.
//!
//! Both carry a `format` tag so a reader can reject payloads from a different
//! tool generation before interpreting them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Format tag for result archives
pub const HIST_FORMAT: &str = "validar-hist-v1";
/// Format tag for performance logs
pub const PERFLOG_FORMAT: &str = "validar-perflog-v1";

/// File name the external analysis program must write into its job directory
pub const RESULT_ARCHIVE_NAME: &str = "histograms.json";
/// File name of the merged performance log
pub const PERF_LOG_NAME: &str = "log.json";
/// Extension of merged per-label archives (`<label>.json`)
pub const ARCHIVE_EXT: &str = "json";

/// Key suffix for resident-memory curves
pub const RSS_SUFFIX: &str = "_rss";
/// Key suffix for virtual-memory curves
pub const VIR_SUFFIX: &str = "_vir";

/// Errors for archive loading and shape validation
///
/// These are deliberately typed: a bad archive must degrade exactly one
/// comparison cell (recorded as a failed verdict with a note), never abort
/// the run, so callers need to tell I/O from parse from shape problems.
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse archive JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported archive format {found:?}, expected {expected:?}")]
    Format { found: String, expected: String },

    #[error("histogram {name} has {bins} bins but {errors} errors")]
    Shape {
        name: String,
        bins: usize,
        errors: usize,
    },
}

/// A binned distribution: bin contents plus per-bin absolute errors
///
/// `bins` and `errors` always have equal length in a validated archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    pub bins: Vec<f64>,
    pub errors: Vec<f64>,
}

impl Histogram {
    /// Build a histogram with zero error on every bin
    pub fn with_zero_errors(bins: Vec<f64>) -> Self {
        let errors = vec![0.0; bins.len()];
        Self { bins, errors }
    }

    /// Total entry count (sum of bin contents)
    pub fn entries(&self) -> f64 {
        self.bins.iter().sum()
    }

    /// Number of bins
    pub fn bin_count(&self) -> usize {
        self.bins.len()
    }
}

/// One job's result archive: histogram name → histogram
///
/// Serialized as pretty JSON. BTreeMap keeps the payload deterministic so
/// archives diff cleanly between runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultArchive {
    /// Format tag, rejected on mismatch
    pub format: String,
    /// Producing tool version, informational only
    #[serde(default)]
    pub version: String,
    pub histograms: BTreeMap<String, Histogram>,
}

impl ResultArchive {
    /// Create an empty archive tagged with the current format
    pub fn new() -> Self {
        Self {
            format: HIST_FORMAT.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            histograms: BTreeMap::new(),
        }
    }

    /// Parse and validate an archive from a JSON string
    pub fn from_json_str(content: &str) -> Result<Self, ArchiveError> {
        let archive: Self = serde_json::from_str(content)?;
        archive.validate()?;
        Ok(archive)
    }

    /// Load and validate an archive from disk
    pub fn from_file(path: &Path) -> Result<Self, ArchiveError> {
        let content = fs::read_to_string(path).map_err(|source| ArchiveError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&content)
    }

    /// Check the format tag and every histogram's bin/error shape
    pub fn validate(&self) -> Result<(), ArchiveError> {
        if self.format != HIST_FORMAT {
            return Err(ArchiveError::Format {
                found: self.format.clone(),
                expected: HIST_FORMAT.to_string(),
            });
        }
        for (name, hist) in &self.histograms {
            if hist.bins.len() != hist.errors.len() {
                return Err(ArchiveError::Shape {
                    name: name.clone(),
                    bins: hist.bins.len(),
                    errors: hist.errors.len(),
                });
            }
        }
        Ok(())
    }

    /// Merge another archive into this one, histogram by histogram
    ///
    /// Same-name histograms are added bin-by-bin with errors combined in
    /// quadrature. A same-name histogram whose bin count differs is skipped
    /// with a warning; the batch never aborts over one malformed job output.
    pub fn merge_from(&mut self, other: &ResultArchive) {
        for (name, hist) in &other.histograms {
            match self.histograms.get_mut(name) {
                None => {
                    self.histograms.insert(name.clone(), hist.clone());
                }
                Some(existing) if existing.bin_count() == hist.bin_count() => {
                    for (bin, add) in existing.bins.iter_mut().zip(&hist.bins) {
                        *bin += add;
                    }
                    for (err, add) in existing.errors.iter_mut().zip(&hist.errors) {
                        *err = (*err * *err + add * add).sqrt();
                    }
                }
                Some(existing) => {
                    tracing::warn!(
                        histogram = %name,
                        have = existing.bin_count(),
                        got = hist.bin_count(),
                        "bin count mismatch while merging, skipping contribution"
                    );
                }
            }
        }
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the archive to disk
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

impl Default for ResultArchive {
    fn default() -> Self {
        Self::new()
    }
}

/// One job's memory time series
///
/// Points are `(elapsed seconds, MB)` pairs; elapsed values come from the
/// retrospective reconstruction in [`crate::sampler::elapsed_axis`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryCurve {
    /// Job id that produced this curve
    pub job: String,
    pub points: Vec<[f64; 2]>,
}

impl MemoryCurve {
    /// Elapsed value of the last point, i.e. the job's reconstructed runtime
    pub fn last_elapsed(&self) -> Option<f64> {
        self.points.last().map(|p| p[0])
    }
}

/// The run-wide performance log
///
/// Curves are stored under `"<label>_rss"` and `"<label>_vir"` keys; each key
/// holds one curve per job of that label, retained individually so later
/// curve fits see every job rather than an average.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerfLog {
    pub format: String,
    #[serde(default)]
    pub version: String,
    pub curves: BTreeMap<String, Vec<MemoryCurve>>,
}

impl PerfLog {
    pub fn new() -> Self {
        Self {
            format: PERFLOG_FORMAT.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            curves: BTreeMap::new(),
        }
    }

    /// Well-known resident-memory key for a label
    pub fn rss_key(label: &str) -> String {
        format!("{label}{RSS_SUFFIX}")
    }

    /// Well-known virtual-memory key for a label
    pub fn vir_key(label: &str) -> String {
        format!("{label}{VIR_SUFFIX}")
    }

    /// Append a curve under a key
    pub fn push_curve(&mut self, key: String, curve: MemoryCurve) {
        self.curves.entry(key).or_default().push(curve);
    }

    /// All resident-memory curves across every label
    pub fn rss_curves(&self) -> impl Iterator<Item = &MemoryCurve> {
        self.suffix_curves(RSS_SUFFIX)
    }

    /// All virtual-memory curves across every label
    pub fn vir_curves(&self) -> impl Iterator<Item = &MemoryCurve> {
        self.suffix_curves(VIR_SUFFIX)
    }

    fn suffix_curves<'a>(&'a self, suffix: &'a str) -> impl Iterator<Item = &'a MemoryCurve> {
        self.curves
            .iter()
            .filter(move |(key, _)| key.ends_with(suffix))
            .flat_map(|(_, curves)| curves.iter())
    }

    pub fn from_json_str(content: &str) -> Result<Self, ArchiveError> {
        let log: Self = serde_json::from_str(content)?;
        if log.format != PERFLOG_FORMAT {
            return Err(ArchiveError::Format {
                found: log.format.clone(),
                expected: PERFLOG_FORMAT.to_string(),
            });
        }
        Ok(log)
    }

    pub fn from_file(path: &Path) -> Result<Self, ArchiveError> {
        let content = fs::read_to_string(path).map_err(|source| ArchiveError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&content)
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

impl Default for PerfLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hist(bins: &[f64], errors: &[f64]) -> Histogram {
        Histogram {
            bins: bins.to_vec(),
            errors: errors.to_vec(),
        }
    }

    #[test]
    fn test_histogram_entries() {
        let h = hist(&[1.0, 2.0, 3.0], &[0.0, 0.0, 0.0]);
        assert_eq!(h.entries(), 6.0);
        assert_eq!(h.bin_count(), 3);
    }

    #[test]
    fn test_histogram_with_zero_errors() {
        let h = Histogram::with_zero_errors(vec![4.0, 5.0]);
        assert_eq!(h.errors, vec![0.0, 0.0]);
    }

    #[test]
    fn test_archive_round_trip() {
        let mut archive = ResultArchive::new();
        archive
            .histograms
            .insert("h_mass".to_string(), hist(&[1.0, 2.0], &[1.0, 1.4]));

        let json = archive.to_json().unwrap();
        let parsed = ResultArchive::from_json_str(&json).unwrap();
        assert_eq!(parsed.histograms.len(), 1);
        assert_eq!(parsed.histograms["h_mass"].bins, vec![1.0, 2.0]);
    }

    #[test]
    fn test_archive_rejects_wrong_format() {
        let json = r#"{"format":"other-tool-v9","histograms":{}}"#;
        let err = ResultArchive::from_json_str(json).unwrap_err();
        assert!(matches!(err, ArchiveError::Format { .. }));
    }

    #[test]
    fn test_archive_rejects_shape_mismatch() {
        let json = r#"{
            "format": "validar-hist-v1",
            "histograms": { "bad": { "bins": [1.0, 2.0], "errors": [0.5] } }
        }"#;
        let err = ResultArchive::from_json_str(json).unwrap_err();
        assert!(matches!(err, ArchiveError::Shape { .. }));
    }

    #[test]
    fn test_archive_missing_file_is_io_error() {
        let err = ResultArchive::from_file(Path::new("/nonexistent/archive.json")).unwrap_err();
        assert!(matches!(err, ArchiveError::Io { .. }));
    }

    #[test]
    fn test_merge_adds_bins_and_combines_errors() {
        let mut a = ResultArchive::new();
        a.histograms
            .insert("h".to_string(), hist(&[1.0, 2.0], &[3.0, 0.0]));
        let mut b = ResultArchive::new();
        b.histograms
            .insert("h".to_string(), hist(&[10.0, 20.0], &[4.0, 0.0]));

        a.merge_from(&b);
        let merged = &a.histograms["h"];
        assert_eq!(merged.bins, vec![11.0, 22.0]);
        // 3-4-5 triangle in quadrature
        assert!((merged.errors[0] - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_merge_inserts_new_histograms() {
        let mut a = ResultArchive::new();
        let mut b = ResultArchive::new();
        b.histograms
            .insert("h_new".to_string(), hist(&[7.0], &[1.0]));

        a.merge_from(&b);
        assert!(a.histograms.contains_key("h_new"));
    }

    #[test]
    fn test_merge_skips_bin_count_mismatch() {
        let mut a = ResultArchive::new();
        a.histograms.insert("h".to_string(), hist(&[1.0], &[0.0]));
        let mut b = ResultArchive::new();
        b.histograms
            .insert("h".to_string(), hist(&[1.0, 2.0], &[0.0, 0.0]));

        a.merge_from(&b);
        // mismatched contribution dropped, original left intact
        assert_eq!(a.histograms["h"].bins, vec![1.0]);
    }

    #[test]
    fn test_perflog_keys() {
        assert_eq!(PerfLog::rss_key("DY"), "DY_rss");
        assert_eq!(PerfLog::vir_key("DY"), "DY_vir");
    }

    #[test]
    fn test_perflog_suffix_iteration() {
        let mut log = PerfLog::new();
        log.push_curve(
            PerfLog::rss_key("DY"),
            MemoryCurve {
                job: "j1".to_string(),
                points: vec![[0.0, 100.0]],
            },
        );
        log.push_curve(
            PerfLog::rss_key("TTbar"),
            MemoryCurve {
                job: "j2".to_string(),
                points: vec![[0.0, 200.0]],
            },
        );
        log.push_curve(
            PerfLog::vir_key("DY"),
            MemoryCurve {
                job: "j1".to_string(),
                points: vec![[0.0, 300.0]],
            },
        );

        assert_eq!(log.rss_curves().count(), 2);
        assert_eq!(log.vir_curves().count(), 1);
    }

    #[test]
    fn test_perflog_round_trip() {
        let mut log = PerfLog::new();
        log.push_curve(
            PerfLog::rss_key("DY"),
            MemoryCurve {
                job: "dy_job".to_string(),
                points: vec![[0.0, 100.0], [1.0, 110.0]],
            },
        );

        let json = log.to_json().unwrap();
        let parsed = PerfLog::from_json_str(&json).unwrap();
        assert_eq!(parsed.curves["DY_rss"][0].last_elapsed(), Some(1.0));
    }

    #[test]
    fn test_curve_last_elapsed_empty() {
        let curve = MemoryCurve {
            job: "j".to_string(),
            points: vec![],
        };
        assert_eq!(curve.last_elapsed(), None);
    }
}
