// Histogram comparison via a weighted chi-square over degrees of freedom
//
// For bins i where the combined squared error is positive:
//
//     chi2/ndf = (1/ndf) * Σ (ref_i − cand_i)² / (err_ref_i² + err_cand_i²)
//
// Bins carrying no error on either side are excluded from both the sum and
// ndf. Identical histograms score exactly 0, and only 0 passes: any
// statistically visible deviation is a failure to be reviewed, not scored.

use super::verdict::ComparisonVerdict;
use crate::archive::Histogram;

/// The chi2/ndf metric between a reference and a candidate histogram
///
/// Edge cases, checked in order:
/// - both sides empty → 0 (trivially identical);
/// - one side empty → the non-empty side's entries over its bin count,
///   a stand-in that scales with how much data the other side is missing;
/// - no bin with positive combined error → 0.
///
/// Mismatched bin counts are not detected here; bins past the shorter
/// side are ignored. [`compare_histograms`] refuses such pairs up front.
pub fn chi2_over_ndf(reference: &Histogram, candidate: &Histogram) -> f64 {
    let ref_total = reference.entries();
    let cand_total = candidate.entries();
    if ref_total == 0.0 && cand_total == 0.0 {
        return 0.0;
    }
    if cand_total == 0.0 {
        return fallback_metric(reference);
    }
    if ref_total == 0.0 {
        return fallback_metric(candidate);
    }

    let bins = reference.bin_count().min(candidate.bin_count());
    let mut sum = 0.0;
    let mut ndf = 0usize;
    for i in 0..bins {
        let denom = reference.errors[i].powi(2) + candidate.errors[i].powi(2);
        if denom > 0.0 {
            let delta = reference.bins[i] - candidate.bins[i];
            sum += delta * delta / denom;
            ndf += 1;
        }
    }
    if ndf == 0 {
        0.0
    } else {
        sum / ndf as f64
    }
}

/// Stand-in metric when a real chi-square is undefined: total entries of
/// the side that has data, divided by its bin count
pub fn fallback_metric(side: &Histogram) -> f64 {
    if side.bin_count() == 0 {
        return 0.0;
    }
    side.entries() / side.bin_count() as f64
}

/// Full verdict for one histogram pair
///
/// A pair binned differently is not comparable: the verdict fails
/// outright and the note names both bin counts. The pinned metric is the
/// entry density of the side with data, reference preferred.
pub fn compare_histograms(
    group: &str,
    name: &str,
    reference: &Histogram,
    candidate: &Histogram,
) -> ComparisonVerdict {
    let entries_delta = reference.entries() - candidate.entries();

    if reference.bin_count() != candidate.bin_count() {
        let note = format!(
            "bin count mismatch: reference has {} bins, candidate has {}",
            reference.bin_count(),
            candidate.bin_count()
        );
        let pinned = if reference.entries() > 0.0 {
            fallback_metric(reference)
        } else {
            fallback_metric(candidate)
        };
        return ComparisonVerdict::data_error(group, name, pinned, entries_delta, note);
    }

    let metric = chi2_over_ndf(reference, candidate);
    let note = match (reference.entries() == 0.0, candidate.entries() == 0.0) {
        (true, true) | (false, false) => None,
        (true, false) => Some("reference side has zero entries".to_string()),
        (false, true) => Some("candidate side has zero entries".to_string()),
    };
    ComparisonVerdict::from_metric(group, name, metric, entries_delta).with_note(note)
}
