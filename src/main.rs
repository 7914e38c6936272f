use anyhow::Result;
use clap::Parser;
use std::path::Path;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use validar::archive::{PerfLog, PERF_LOG_NAME};
use validar::cli::Cli;
use validar::compare::{assess_performance, compare_groups, CompareConfig, PerformanceVerdict};
use validar::config::JobCatalog;
use validar::report::{write_report, ValidationReport};
use validar::sampler::SamplerConfig;
use validar::scheduler::{JobScheduler, SchedulerConfig, JOBS_DIR};
use validar::summary::{stage_comparison, RunSummary};

/// Initialize tracing subscriber on stderr, keeping stdout for the report
fn init_tracing(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.debug);

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}

/// The whole pipeline; `Ok` carries the overall verdict
fn run(cli: &Cli) -> Result<bool> {
    let compare_config = cli.compare_config()?;
    let catalog = JobCatalog::from_file(&cli.jobs)?;
    let jobs = catalog.jobs()?;
    tracing::info!(
        catalog = %cli.jobs.display(),
        jobs = jobs.len(),
        "catalog loaded"
    );

    let scheduler = JobScheduler::new(SchedulerConfig {
        parallelism: cli.parallelism(),
        jobs_root: cli.output.join(JOBS_DIR),
        launch: cli.launch_spec(),
        sampler: SamplerConfig::default(),
    });
    let batch = scheduler.run_batch(jobs)?;

    let summary = RunSummary::build(&batch);
    summary.persist(&cli.output)?;

    let (old_dir, new_dir) = stage_comparison(&cli.output, &cli.reference)?;

    let performance = load_performance(&old_dir, &new_dir, &compare_config);
    let distributions = compare_groups(&old_dir, &new_dir, &catalog, &compare_config);

    let report = ValidationReport::assemble(performance, distributions);
    write_report(&report, &cli.output)?;
    print!("{}", report.to_report_string(cli.all_plots));

    Ok(report.overall_passed)
}

/// Run the performance comparison over the staged logs
///
/// A log that cannot be read degrades to a failed verdict naming the side,
/// mirroring how distribution cells degrade.
fn load_performance(old_dir: &Path, new_dir: &Path, config: &CompareConfig) -> PerformanceVerdict {
    let old = PerfLog::from_file(&old_dir.join(PERF_LOG_NAME));
    let new = PerfLog::from_file(&new_dir.join(PERF_LOG_NAME));
    match (old, new) {
        (Ok(old), Ok(new)) => assess_performance(&old, &new, config),
        (old, new) => {
            let mut parts = Vec::new();
            if let Err(e) = &old {
                parts.push(format!("reference performance log unreadable: {e}"));
            }
            if let Err(e) = &new {
                parts.push(format!("candidate performance log unreadable: {e}"));
            }
            let note = parts.join("; ");
            tracing::warn!(%note, "performance comparison skipped");
            PerformanceVerdict::degenerate(&note)
        }
    }
}
