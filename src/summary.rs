//! Per-label merging of job outputs and comparison staging
//!
//! After the batch barrier, every completed job's result archive is merged
//! into its label's archive (bin-wise sums, errors in quadrature) while the
//! memory curves are carried over individually per job. The merged archives
//! plus the run-wide performance log are persisted at the top level of the
//! output directory, then both comparison sides are staged under fixed
//! `comparison/old` and `comparison/new` trees so the comparators and any
//! later rendering step read from one known place.

use crate::archive::{PerfLog, ResultArchive, ARCHIVE_EXT, PERF_LOG_NAME};
use crate::scheduler::{BatchResult, RunArtifact};
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const COMPARISON_DIR: &str = "comparison";
/// Reference side of the staged comparison tree
pub const REFERENCE_SIDE: &str = "old";
/// Fresh-run side of the staged comparison tree
pub const CANDIDATE_SIDE: &str = "new";

/// One label's merged view of the run
#[derive(Debug, Clone)]
pub struct SampleGroup {
    pub label: String,
    /// Bin-wise merge of every readable job archive under this label
    pub archive: ResultArchive,
    /// Jobs whose archives contributed to the merge, in id order
    pub jobs: Vec<String>,
}

/// The whole run, merged by label
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub groups: BTreeMap<String, SampleGroup>,
    pub perf_log: PerfLog,
}

impl RunSummary {
    /// Merge a finished batch into per-label groups
    ///
    /// Memory curves are kept for every completed job. A job whose result
    /// archive is missing or malformed is excluded from its label's merge
    /// with a warning; the merge itself never aborts.
    pub fn build(batch: &BatchResult) -> Self {
        let mut artifacts: Vec<&RunArtifact> = batch.artifacts.values().collect();
        artifacts.sort_by(|a, b| a.job.cmp(&b.job));

        let mut groups: BTreeMap<String, SampleGroup> = BTreeMap::new();
        let mut perf_log = PerfLog::new();

        for artifact in artifacts {
            let (rss, vir) = artifact.curves();
            perf_log.push_curve(PerfLog::rss_key(&artifact.label), rss);
            perf_log.push_curve(PerfLog::vir_key(&artifact.label), vir);

            let group = groups
                .entry(artifact.label.clone())
                .or_insert_with(|| SampleGroup {
                    label: artifact.label.clone(),
                    archive: ResultArchive::new(),
                    jobs: Vec::new(),
                });
            match ResultArchive::from_file(&artifact.archive) {
                Ok(job_archive) => {
                    group.archive.merge_from(&job_archive);
                    group.jobs.push(artifact.job.clone());
                }
                Err(e) => {
                    tracing::warn!(
                        job = %artifact.job,
                        label = %artifact.label,
                        error = %e,
                        "result archive unreadable, excluded from merge"
                    );
                }
            }
        }

        tracing::info!(
            groups = groups.len(),
            curves = perf_log.curves.values().map(Vec::len).sum::<usize>(),
            "run summary built"
        );
        Self { groups, perf_log }
    }

    /// Write one merged archive per label plus the performance log
    pub fn persist(&self, out_dir: &Path) -> Result<()> {
        fs::create_dir_all(out_dir)
            .with_context(|| format!("failed to create output directory {}", out_dir.display()))?;
        for (label, group) in &self.groups {
            let path = out_dir.join(format!("{label}.{ARCHIVE_EXT}"));
            group
                .archive
                .save(&path)
                .with_context(|| format!("failed to write merged archive for label {label:?}"))?;
        }
        self.perf_log
            .save(&out_dir.join(PERF_LOG_NAME))
            .context("failed to write performance log")?;
        Ok(())
    }
}

/// Stage both comparison sides and return `(old, new)` directories
///
/// Archives at the top level of the reference directory are copied into
/// `comparison/old`, those of the output directory into `comparison/new`.
/// An absent or unreadable reference directory stages nothing on that side;
/// the comparators then report the missing archives cell by cell.
pub fn stage_comparison(out_dir: &Path, reference_dir: &Path) -> Result<(PathBuf, PathBuf)> {
    let comparison = out_dir.join(COMPARISON_DIR);
    let old_dir = comparison.join(REFERENCE_SIDE);
    let new_dir = comparison.join(CANDIDATE_SIDE);
    fs::create_dir_all(&old_dir)
        .with_context(|| format!("failed to create {}", old_dir.display()))?;
    fs::create_dir_all(&new_dir)
        .with_context(|| format!("failed to create {}", new_dir.display()))?;

    copy_archives(reference_dir, &old_dir)?;
    copy_archives(out_dir, &new_dir)?;
    Ok((old_dir, new_dir))
}

/// Copy top-level `.json` archives from one directory into another
fn copy_archives(from: &Path, to: &Path) -> Result<()> {
    let entries = match fs::read_dir(from) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(
                dir = %from.display(),
                error = %e,
                "archive directory unreadable, staging nothing from it"
            );
            return Ok(());
        }
    };

    let mut staged = 0usize;
    for entry in entries {
        let entry = entry.with_context(|| format!("failed to list {}", from.display()))?;
        let path = entry.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(ARCHIVE_EXT) {
            continue;
        }
        if let Some(name) = path.file_name() {
            fs::copy(&path, to.join(name))
                .with_context(|| format!("failed to stage {}", path.display()))?;
            staged += 1;
        }
    }
    if staged == 0 {
        tracing::warn!(dir = %from.display(), "no archives staged");
    } else {
        tracing::debug!(dir = %from.display(), staged, "archives staged");
    }
    Ok(())
}
