//! Benchmarks for the comparison layer
//!
//! Covers the per-histogram chi-square metric, archive merging, and the
//! performance assessment over many memory curves.
//!
//! Run with: cargo bench --bench compare_throughput

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use validar::archive::{Histogram, MemoryCurve, PerfLog, ResultArchive};
use validar::compare::{assess_performance, chi2_over_ndf, CompareConfig};

/// Deterministic histogram fill, vaguely peaked like real spectra
fn make_histogram(bins: usize, shift: f64) -> Histogram {
    let values: Vec<f64> = (0..bins)
        .map(|i| ((i as f64 * 0.37 + shift).sin().abs() * 500.0) + 1.0)
        .collect();
    let errors = values.iter().map(|v| v.sqrt()).collect();
    Histogram {
        bins: values,
        errors,
    }
}

fn make_archive(histograms: usize, bins: usize, shift: f64) -> ResultArchive {
    let mut archive = ResultArchive::new();
    for h in 0..histograms {
        archive
            .histograms
            .insert(format!("h_{h}"), make_histogram(bins, shift + h as f64));
    }
    archive
}

fn make_perf_log(jobs: usize, points: usize) -> PerfLog {
    let mut log = PerfLog::new();
    for j in 0..jobs {
        let curve = MemoryCurve {
            job: format!("job_{j}"),
            points: (0..points)
                .map(|i| {
                    let elapsed = i as f64 * 0.5;
                    [elapsed, 120.0 + (elapsed * 0.7).sin() * 5.0]
                })
                .collect(),
        };
        log.push_curve(PerfLog::rss_key("DY"), curve.clone());
        log.push_curve(PerfLog::vir_key("DY"), curve);
    }
    log
}

fn bench_chi2_over_ndf(c: &mut Criterion) {
    let mut group = c.benchmark_group("chi2_over_ndf");

    for bins in [100usize, 1_000, 10_000].iter() {
        group.throughput(Throughput::Elements(*bins as u64));
        group.bench_with_input(BenchmarkId::from_parameter(bins), bins, |b, &bins| {
            let reference = make_histogram(bins, 0.0);
            let candidate = make_histogram(bins, 0.1);

            b.iter(|| {
                let metric = chi2_over_ndf(black_box(&reference), black_box(&candidate));
                black_box(metric);
            });
        });
    }

    group.finish();
}

fn bench_archive_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("archive_merge");

    for histograms in [10usize, 100].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{histograms}x1000_bins")),
            histograms,
            |b, &histograms| {
                let base = make_archive(histograms, 1_000, 0.0);
                let other = make_archive(histograms, 1_000, 0.2);

                b.iter(|| {
                    let mut merged = base.clone();
                    merged.merge_from(black_box(&other));
                    black_box(merged);
                });
            },
        );
    }

    group.finish();
}

fn bench_assess_performance(c: &mut Criterion) {
    let mut group = c.benchmark_group("assess_performance");
    let config = CompareConfig::default();

    for jobs in [10usize, 100].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{jobs}_jobs")),
            jobs,
            |b, &jobs| {
                let old = make_perf_log(jobs, 200);
                let new = make_perf_log(jobs, 200);

                b.iter(|| {
                    let verdict = assess_performance(black_box(&old), black_box(&new), &config);
                    black_box(verdict);
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_chi2_over_ndf,
    bench_archive_merge,
    bench_assess_performance,
);

criterion_main!(benches);
