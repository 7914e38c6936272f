//! Job catalog: which inputs to run and how their outputs are grouped
//!
//! The catalog is a TOML file:
//!
//! ```toml
//! [basic]
//! path = "/data/store"            # base path prefixed to every input
//!
//! [samples."mc/dy_mumu.pxlio"]
//! label = "DY"
//!
//! [histograms]                    # histogram name -> containing group
//! h_mass = "DY"
//!
//! [groups]
//! names = ["DY", "TTbar"]         # recognized groups, defaults to the
//!                                 # distinct sample labels
//! ```
//!
//! Catalog problems are fatal: nothing is scheduled until the whole catalog
//! validates, so a typo cannot burn hours of compute first.

use crate::scheduler::JobSpec;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct JobCatalog {
    pub basic: BasicSection,
    #[serde(default)]
    pub samples: BTreeMap<String, SampleEntry>,
    /// Histogram name → group it is compared under
    #[serde(default)]
    pub histograms: BTreeMap<String, String>,
    #[serde(default)]
    pub groups: Option<GroupsSection>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BasicSection {
    /// Base directory prefixed to each sample input path
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SampleEntry {
    pub label: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupsSection {
    pub names: Vec<String>,
}

/// Label stems that would collide with the run-wide `log.json` and
/// `validation_report.json` files written next to the merged archives
const RESERVED_LABELS: &[&str] = &["log", "validation_report"];

impl JobCatalog {
    /// Load and validate a catalog from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read job catalog {}", path.display()))?;
        let catalog: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse job catalog {}", path.display()))?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Reject catalogs the scheduler or comparators could not act on
    pub fn validate(&self) -> Result<()> {
        if self.samples.is_empty() {
            bail!("job catalog defines no samples");
        }

        let mut seen = BTreeSet::new();
        for (input, entry) in &self.samples {
            if entry.label.trim().is_empty() {
                bail!("sample {input:?} has an empty label");
            }
            // labels name merged archive files
            if entry.label.contains('/') {
                bail!("label {:?} must not contain '/'", entry.label);
            }
            if RESERVED_LABELS.contains(&entry.label.as_str()) {
                bail!("label {:?} is reserved for run-wide output files", entry.label);
            }
            let id = job_id(input)?;
            if !seen.insert(id.clone()) {
                bail!("duplicate job id {id:?}: input file stems must be unique");
            }
        }

        let groups = self.recognized_groups();
        for (histogram, group) in &self.histograms {
            if !groups.contains(group) {
                bail!("histogram {histogram:?} references unrecognized group {group:?}");
            }
        }
        Ok(())
    }

    /// The groups comparisons run over: `[groups] names` when given,
    /// otherwise the distinct sample labels
    pub fn recognized_groups(&self) -> BTreeSet<String> {
        match &self.groups {
            Some(section) => section.names.iter().cloned().collect(),
            None => self.samples.values().map(|s| s.label.clone()).collect(),
        }
    }

    /// Histogram names the catalog expects inside a group's archives
    pub fn expected_histograms(&self, group: &str) -> Vec<String> {
        self.histograms
            .iter()
            .filter(|(_, g)| g.as_str() == group)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Expand the catalog into schedulable jobs, inputs resolved against
    /// the base path
    pub fn jobs(&self) -> Result<Vec<JobSpec>> {
        self.samples
            .iter()
            .map(|(input, entry)| {
                Ok(JobSpec {
                    id: job_id(input)?,
                    label: entry.label.clone(),
                    input: self.basic.path.join(input),
                })
            })
            .collect()
    }
}

/// Job id for an input path: its file stem
fn job_id(input: &str) -> Result<String> {
    match Path::new(input).file_stem().and_then(|s| s.to_str()) {
        Some(stem) if !stem.is_empty() => Ok(stem.to_string()),
        _ => bail!("cannot derive a job id from input {input:?}"),
    }
}
