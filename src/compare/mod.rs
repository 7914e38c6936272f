// Statistical comparison of a fresh run against a reference run
//
// Two independent comparisons feed the final report:
// - distribution: merged histograms are compared cell by cell with a
//   weighted chi-square over degrees of freedom; only an exactly-zero
//   metric passes.
// - performance: pooled per-job memory curves are reduced to one linear
//   fit per side, evaluated at the mean job runtime; percent differences
//   are gated by the configured tolerances.
//
// Data problems (an archive or histogram missing on one side, a pair
// binned differently) degrade exactly the cells they touch: each such
// cell becomes a failed verdict carrying a note, and every other cell
// proceeds.

mod config;
mod distribution;
mod performance;
mod verdict;

pub use config::CompareConfig;
pub use distribution::{chi2_over_ndf, compare_histograms, fallback_metric};
pub use performance::assess_performance;
pub use verdict::{ComparisonVerdict, PerformanceVerdict};

use crate::archive::{ArchiveError, Histogram, ResultArchive, ARCHIVE_EXT};
use crate::config::JobCatalog;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Nested verdict map: group → histogram → verdict
pub type VerdictMap = BTreeMap<String, BTreeMap<String, ComparisonVerdict>>;

/// Compare the staged reference and candidate archives group by group
///
/// For every recognized group the cell set is the union of the catalog's
/// expected histograms and the names found in either side's archive,
/// optionally narrowed by the histogram-name filter. Every cell yields a
/// verdict; nothing is silently skipped.
pub fn compare_groups(
    old_dir: &Path,
    new_dir: &Path,
    catalog: &JobCatalog,
    config: &CompareConfig,
) -> VerdictMap {
    let mut verdicts = VerdictMap::new();

    for group in catalog.recognized_groups() {
        let old = load_side(old_dir, &group, "reference");
        let new = load_side(new_dir, &group, "candidate");

        let mut names: BTreeSet<String> =
            catalog.expected_histograms(&group).into_iter().collect();
        if let Ok(archive) = &old {
            names.extend(archive.histograms.keys().cloned());
        }
        if let Ok(archive) = &new {
            names.extend(archive.histograms.keys().cloned());
        }
        if let Some(filter) = &config.histogram_filter {
            names.retain(|name| filter.is_match(name));
        }

        let cells: BTreeMap<String, ComparisonVerdict> = names
            .into_iter()
            .map(|name| {
                let verdict = compare_cell(&group, &name, &old, &new);
                (name, verdict)
            })
            .collect();
        verdicts.insert(group, cells);
    }
    verdicts
}

fn load_side(
    dir: &Path,
    group: &str,
    side: &str,
) -> Result<ResultArchive, ArchiveError> {
    let path = dir.join(format!("{group}.{ARCHIVE_EXT}"));
    let loaded = ResultArchive::from_file(&path);
    if let Err(e) = &loaded {
        tracing::warn!(group, side, error = %e, "archive not usable");
    }
    loaded
}

/// Verdict for one (group, histogram) cell
///
/// Both sides present → [`compare_histograms`] decides, refusing pairs
/// binned differently. Anything less is a data error: the verdict fails
/// with the fallback metric where one side still has a histogram, and
/// the note says what was missing.
fn compare_cell(
    group: &str,
    name: &str,
    old: &Result<ResultArchive, ArchiveError>,
    new: &Result<ResultArchive, ArchiveError>,
) -> ComparisonVerdict {
    let old_hist = old.as_ref().ok().and_then(|a| a.histograms.get(name));
    let new_hist = new.as_ref().ok().and_then(|a| a.histograms.get(name));

    match (old_hist, new_hist) {
        (Some(reference), Some(candidate)) => {
            compare_histograms(group, name, reference, candidate)
        }
        (reference, candidate) => {
            let metric = reference
                .or(candidate)
                .map(fallback_metric)
                .unwrap_or(0.0);
            let delta = total(reference) - total(candidate);
            let note = missing_note(old, new, reference, candidate);
            ComparisonVerdict::data_error(group, name, metric, delta, note)
        }
    }
}

fn total(hist: Option<&Histogram>) -> f64 {
    hist.map(Histogram::entries).unwrap_or(0.0)
}

fn missing_note(
    old: &Result<ResultArchive, ArchiveError>,
    new: &Result<ResultArchive, ArchiveError>,
    old_hist: Option<&Histogram>,
    new_hist: Option<&Histogram>,
) -> String {
    let mut parts = Vec::new();
    match old {
        Err(e) => parts.push(format!("reference archive unreadable: {e}")),
        Ok(_) if old_hist.is_none() => {
            parts.push("absent from reference archive".to_string());
        }
        Ok(_) => {}
    }
    match new {
        Err(e) => parts.push(format!("candidate archive unreadable: {e}")),
        Ok(_) if new_hist.is_none() => {
            parts.push("absent from candidate archive".to_string());
        }
        Ok(_) => {}
    }
    parts.join("; ")
}
