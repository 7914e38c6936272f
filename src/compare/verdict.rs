// Verdict types shared by both comparison stages

use serde::{Deserialize, Serialize};

/// Outcome of one (group, histogram) comparison cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonVerdict {
    pub group: String,
    pub histogram: String,
    pub passed: bool,
    /// Chi-square over degrees of freedom; 0 means statistically identical
    pub chi2_ndf: f64,
    /// Reference minus candidate total entries, diagnostic only
    pub entries_delta: f64,
    /// What degraded this cell, when anything did
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl ComparisonVerdict {
    /// Verdict from a computed comparison. The pass rule is strict:
    /// only an exactly-zero metric passes.
    pub fn from_metric(group: &str, histogram: &str, chi2_ndf: f64, entries_delta: f64) -> Self {
        Self {
            group: group.to_string(),
            histogram: histogram.to_string(),
            passed: chi2_ndf == 0.0,
            chi2_ndf,
            entries_delta,
            note: None,
        }
    }

    /// Verdict for a cell whose comparison could not run at all.
    /// Always failed, whatever the pinned metric value says.
    pub fn data_error(
        group: &str,
        histogram: &str,
        chi2_ndf: f64,
        entries_delta: f64,
        note: String,
    ) -> Self {
        Self {
            group: group.to_string(),
            histogram: histogram.to_string(),
            passed: false,
            chi2_ndf,
            entries_delta,
            note: Some(note),
        }
    }

    pub fn with_note(mut self, note: Option<String>) -> Self {
        self.note = note;
        self
    }
}

/// Outcome of the run-wide performance comparison
///
/// `*_diff_pct` values follow `(old - new) / old * 100`: positive means
/// the candidate improved. Only the runtime and resident-memory diffs can
/// fail the verdict; the virtual-memory diff is carried for inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceVerdict {
    pub passed: bool,
    pub rss_diff_pct: f64,
    pub vir_diff_pct: f64,
    pub time_diff_pct: f64,
    /// Steady-state resident memory of the reference run, MB
    pub old_rss_mb: f64,
    pub new_rss_mb: f64,
    pub old_vir_mb: f64,
    pub new_vir_mb: f64,
    /// Mean job runtime of the reference run, seconds
    pub old_runtime_s: f64,
    pub new_runtime_s: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl PerformanceVerdict {
    /// Failed verdict for inputs no fit can be computed from
    pub fn degenerate(note: &str) -> Self {
        Self {
            passed: false,
            rss_diff_pct: 0.0,
            vir_diff_pct: 0.0,
            time_diff_pct: 0.0,
            old_rss_mb: 0.0,
            new_rss_mb: 0.0,
            old_vir_mb: 0.0,
            new_vir_mb: 0.0,
            old_runtime_s: 0.0,
            new_runtime_s: 0.0,
            note: Some(note.to_string()),
        }
    }
}
