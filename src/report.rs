//! Final report assembly
//!
//! The aggregator is a pure fold over verdicts: the nested distribution map
//! and the performance verdict go in, `overall_passed` comes out as their
//! plain conjunction. No weighting, no partial credit; one failing cell
//! fails the run. The report is serialized once and consumed by whatever
//! renders or archives it.

use crate::compare::{ComparisonVerdict, PerformanceVerdict, VerdictMap};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};

/// Format tag for validation reports
pub const REPORT_FORMAT: &str = "validar-report-v1";
/// File name of the persisted report
pub const REPORT_NAME: &str = "validation_report.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub format: String,
    #[serde(default)]
    pub version: String,
    pub overall_passed: bool,
    pub performance: PerformanceVerdict,
    /// group → histogram → verdict
    pub distributions: VerdictMap,
}

impl ValidationReport {
    /// Fold all verdicts into the final report
    pub fn assemble(performance: PerformanceVerdict, distributions: VerdictMap) -> Self {
        let overall_passed = performance.passed
            && distributions
                .values()
                .flat_map(|cells| cells.values())
                .all(|v| v.passed);
        Self {
            format: REPORT_FORMAT.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            overall_passed,
            performance,
            distributions,
        }
    }

    pub fn cell_count(&self) -> usize {
        self.distributions.values().map(|cells| cells.len()).sum()
    }

    pub fn failed_cell_count(&self) -> usize {
        self.distributions
            .values()
            .flat_map(|cells| cells.values())
            .filter(|v| !v.passed)
            .count()
    }

    /// Distribution verdicts worth looking at, worst first
    ///
    /// Failing cells only; with `all` set, every cell (the all-plots view).
    pub fn ranked(&self, all: bool) -> Vec<&ComparisonVerdict> {
        let mut cells: Vec<&ComparisonVerdict> = self
            .distributions
            .values()
            .flat_map(|cells| cells.values())
            .filter(|v| all || !v.passed)
            .collect();
        cells.sort_by(|a, b| {
            b.chi2_ndf
                .partial_cmp(&a.chi2_ndf)
                .unwrap_or(Ordering::Equal)
        });
        cells
    }

    /// Generate human-readable report
    pub fn to_report_string(&self, all_plots: bool) -> String {
        let mut report = String::new();

        if self.overall_passed {
            report.push_str("✅ VALIDATION PASSED\n\n");
        } else {
            report.push_str("❌ VALIDATION FAILED\n\n");
        }

        let perf = &self.performance;
        report.push_str(&format!(
            "Performance: {}\n",
            if perf.passed { "✅" } else { "❌" }
        ));
        report.push_str(&format!(
            "  resident memory: {:.1} MB -> {:.1} MB ({:+.1} %)\n",
            perf.old_rss_mb, perf.new_rss_mb, perf.rss_diff_pct
        ));
        report.push_str(&format!(
            "  virtual memory:  {:.1} MB -> {:.1} MB ({:+.1} %)\n",
            perf.old_vir_mb, perf.new_vir_mb, perf.vir_diff_pct
        ));
        report.push_str(&format!(
            "  mean runtime:    {:.1} s -> {:.1} s ({:+.1} %)\n",
            perf.old_runtime_s, perf.new_runtime_s, perf.time_diff_pct
        ));
        if let Some(note) = &perf.note {
            report.push_str(&format!("  note: {note}\n"));
        }

        report.push_str(&format!(
            "\nDistributions: {} compared, {} failed\n",
            self.cell_count(),
            self.failed_cell_count()
        ));
        for verdict in self.ranked(all_plots) {
            report.push_str(&format!(
                "  {} {}/{}  chi2/ndf = {:.2}  entries delta = {:+.1}",
                if verdict.passed { "✅" } else { "❌" },
                verdict.group,
                verdict.histogram,
                verdict.chi2_ndf,
                verdict.entries_delta
            ));
            if let Some(note) = &verdict.note {
                report.push_str(&format!("  ({note})"));
            }
            report.push('\n');
        }
        report
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json()?)
            .with_context(|| format!("failed to write report {}", path.display()))?;
        Ok(())
    }
}

/// Persist the report under the output directory and return its path
pub fn write_report(report: &ValidationReport, out_dir: &Path) -> Result<PathBuf> {
    let path = out_dir.join(REPORT_NAME);
    report.save(&path)?;
    tracing::info!(path = %path.display(), "validation report written");
    Ok(path)
}
