// Comparison configuration: tolerances and histogram selection

use anyhow::{bail, Result};
use regex::Regex;

/// Tolerances and filters applied during comparison
///
/// Tolerances are percentages bounding how much *worse* the candidate may
/// be. Improvements are never gated, so a tolerance of 0 still accepts a
/// run that got faster or smaller.
#[derive(Debug, Clone)]
pub struct CompareConfig {
    /// Allowed resident-memory regression, percent
    pub mem_tolerance: f64,
    /// Allowed runtime regression, percent
    pub time_tolerance: f64,
    /// When set, only histogram names matching this pattern are compared
    pub histogram_filter: Option<Regex>,
}

impl Default for CompareConfig {
    fn default() -> Self {
        Self {
            mem_tolerance: 10.0,
            time_tolerance: 100.0,
            histogram_filter: None,
        }
    }
}

impl CompareConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.mem_tolerance.is_finite() || self.mem_tolerance < 0.0 {
            bail!("memory tolerance must be a non-negative percentage");
        }
        if !self.time_tolerance.is_finite() || self.time_tolerance < 0.0 {
            bail!("time tolerance must be a non-negative percentage");
        }
        Ok(())
    }
}
