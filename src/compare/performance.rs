// Run-wide performance comparison over pooled memory curves
//
// Every job's curve contributes its points to one pooled sample per side;
// a least-squares line fit over the interior of the pooled elapsed range
// (start-up and tear-down transients trimmed off) is evaluated at the mean
// job runtime, giving one representative steady-state MB per side. The
// runtime itself is the mean of each curve's final elapsed value.
//
// The decision gates only on regressions: a candidate that is slower than
// the runtime tolerance or heavier in resident memory than the memory
// tolerance fails. Virtual memory is reported but never gates, and any
// improvement passes no matter how large.

use super::config::CompareConfig;
use super::verdict::PerformanceVerdict;
use crate::archive::{MemoryCurve, PerfLog};

/// Seconds trimmed from each end of the pooled elapsed range before fitting
const FIT_MARGIN_S: f64 = 4.0;

#[derive(Debug, Clone, Copy)]
pub(super) struct LinearFit {
    pub(super) intercept: f64,
    pub(super) slope: f64,
}

impl LinearFit {
    pub(super) fn eval(&self, x: f64) -> f64 {
        self.intercept + self.slope * x
    }
}

/// Ordinary least-squares line through a point cloud
///
/// `None` when fewer than two points exist or all elapsed values coincide.
pub(super) fn linear_fit(points: &[[f64; 2]]) -> Option<LinearFit> {
    if points.len() < 2 {
        return None;
    }
    let n = points.len() as f64;
    let mean_x = points.iter().map(|p| p[0]).sum::<f64>() / n;
    let mean_y = points.iter().map(|p| p[1]).sum::<f64>() / n;

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for p in points {
        let dx = p[0] - mean_x;
        sxx += dx * dx;
        sxy += dx * (p[1] - mean_y);
    }
    if sxx == 0.0 {
        return None;
    }
    let slope = sxy / sxx;
    Some(LinearFit {
        intercept: mean_y - slope * mean_x,
        slope,
    })
}

/// Restrict the pooled points to the interior of the elapsed range
///
/// Ranges of `2 * FIT_MARGIN_S` seconds or narrower keep every point.
pub(super) fn interior_points(points: &[[f64; 2]]) -> Vec<[f64; 2]> {
    let min_x = points.iter().map(|p| p[0]).fold(f64::INFINITY, f64::min);
    let max_x = points.iter().map(|p| p[0]).fold(f64::NEG_INFINITY, f64::max);
    if max_x - min_x <= 2.0 * FIT_MARGIN_S {
        return points.to_vec();
    }
    points
        .iter()
        .copied()
        .filter(|p| p[0] >= min_x + FIT_MARGIN_S && p[0] <= max_x - FIT_MARGIN_S)
        .collect()
}

#[derive(Debug, Clone, Copy)]
struct SideStats {
    steady_mb: f64,
    mean_runtime_s: f64,
}

/// Reduce one side's curves to its steady-state memory and mean runtime
///
/// The fit prefers the interior window; when the interior holds too few
/// points for a line, the full range is used. `None` when no curve carries
/// any point.
fn side_stats<'a>(curves: impl Iterator<Item = &'a MemoryCurve>) -> Option<SideStats> {
    let curves: Vec<&MemoryCurve> = curves.collect();
    let points: Vec<[f64; 2]> = curves
        .iter()
        .flat_map(|c| c.points.iter().copied())
        .collect();
    let runtimes: Vec<f32> = curves
        .iter()
        .filter_map(|c| c.last_elapsed())
        .map(|t| t as f32)
        .collect();
    if points.is_empty() || runtimes.is_empty() {
        return None;
    }

    let mean_runtime_s = trueno::Vector::from_slice(&runtimes).mean().unwrap_or(0.0) as f64;
    let fit = linear_fit(&interior_points(&points)).or_else(|| linear_fit(&points))?;
    Some(SideStats {
        steady_mb: fit.eval(mean_runtime_s),
        mean_runtime_s,
    })
}

fn percent_diff(old: f64, new: f64) -> f64 {
    (old - new) / old * 100.0
}

/// Compare the reference and candidate performance logs
pub fn assess_performance(
    old: &PerfLog,
    new: &PerfLog,
    config: &CompareConfig,
) -> PerformanceVerdict {
    let mut notes: Vec<String> = Vec::new();

    let (old_rss, new_rss) = match (side_stats(old.rss_curves()), side_stats(new.rss_curves())) {
        (Some(o), Some(n)) => (o, n),
        _ => {
            return PerformanceVerdict::degenerate(
                "no usable resident-memory curves on at least one side",
            )
        }
    };
    if old_rss.steady_mb <= 0.0 || old_rss.mean_runtime_s <= 0.0 {
        return PerformanceVerdict::degenerate(
            "reference fit yields a non-positive steady state or runtime",
        );
    }

    let rss_diff_pct = percent_diff(old_rss.steady_mb, new_rss.steady_mb);
    let time_diff_pct = percent_diff(old_rss.mean_runtime_s, new_rss.mean_runtime_s);

    let (old_vir_mb, new_vir_mb, vir_diff_pct) =
        match (side_stats(old.vir_curves()), side_stats(new.vir_curves())) {
            (Some(o), Some(n)) if o.steady_mb > 0.0 => {
                (o.steady_mb, n.steady_mb, percent_diff(o.steady_mb, n.steady_mb))
            }
            _ => {
                notes.push("virtual-memory fit unavailable".to_string());
                (0.0, 0.0, 0.0)
            }
        };

    let passed =
        time_diff_pct >= -config.time_tolerance && rss_diff_pct >= -config.mem_tolerance;

    tracing::info!(
        passed,
        rss_diff_pct = format!("{rss_diff_pct:+.1}"),
        time_diff_pct = format!("{time_diff_pct:+.1}"),
        vir_diff_pct = format!("{vir_diff_pct:+.1}"),
        "performance assessed"
    );

    PerformanceVerdict {
        passed,
        rss_diff_pct,
        vir_diff_pct,
        time_diff_pct,
        old_rss_mb: old_rss.steady_mb,
        new_rss_mb: new_rss.steady_mb,
        old_vir_mb,
        new_vir_mb,
        old_runtime_s: old_rss.mean_runtime_s,
        new_runtime_s: new_rss.mean_runtime_s,
        note: (!notes.is_empty()).then(|| notes.join("; ")),
    }
}
