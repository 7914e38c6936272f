//! CLI argument parsing for Validar

use crate::compare::CompareConfig;
use crate::scheduler::LaunchSpec;
use anyhow::{Context, Result};
use clap::Parser;
use regex::Regex;
use std::num::NonZeroUsize;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "validar")]
#[command(version)]
#[command(
    about = "Validates an analysis program's output and performance against a reference run",
    long_about = None
)]
pub struct Cli {
    /// Analysis program run once per catalogued sample
    #[arg(short = 'e', long = "executable", value_name = "PATH")]
    pub executable: PathBuf,

    /// Extra option passed through to the analysis program (repeatable)
    #[arg(long = "exe-option", value_name = "OPT", allow_hyphen_values = true)]
    pub exe_options: Vec<String>,

    /// Configuration file passed through to the analysis program
    #[arg(long = "exe-config", value_name = "PATH")]
    pub exe_config: Option<PathBuf>,

    /// Job catalog (TOML) naming samples, labels and histogram groups
    #[arg(short = 'j', long = "jobs", value_name = "CATALOG")]
    pub jobs: PathBuf,

    /// Directory holding the reference run's archives
    #[arg(long = "reference", value_name = "DIR", default_value = "./old")]
    pub reference: PathBuf,

    /// Allowed resident-memory regression in percent
    #[arg(long = "mem-tolerance", value_name = "PCT", default_value = "10")]
    pub mem_tolerance: f64,

    /// Allowed runtime regression in percent
    #[arg(long = "time-tolerance", value_name = "PCT", default_value = "100")]
    pub time_tolerance: f64,

    /// Output directory for job results, merged archives and the report
    #[arg(
        short = 'o',
        long = "output",
        value_name = "DIR",
        default_value = "./output"
    )]
    pub output: PathBuf,

    /// Worker threads for job execution (default: CPU count)
    #[arg(long = "jobs-parallel", value_name = "N")]
    pub jobs_parallel: Option<usize>,

    /// List every distribution cell in the report, not only failing ones
    #[arg(long = "all-plots")]
    pub all_plots: bool,

    /// Compare only histograms whose name matches this regular expression
    #[arg(long = "histogram-filter", value_name = "REGEX")]
    pub histogram_filter: Option<String>,

    /// Log level or filter directive (error, warn, info, debug, trace)
    #[arg(long = "debug", value_name = "LEVEL", default_value = "info")]
    pub debug: String,
}

impl Cli {
    /// Comparison settings derived from the flags, validated
    pub fn compare_config(&self) -> Result<CompareConfig> {
        let histogram_filter = self
            .histogram_filter
            .as_deref()
            .map(Regex::new)
            .transpose()
            .context("invalid --histogram-filter pattern")?;
        let config = CompareConfig {
            mem_tolerance: self.mem_tolerance,
            time_tolerance: self.time_tolerance,
            histogram_filter,
        };
        config.validate()?;
        Ok(config)
    }

    /// Worker thread count, defaulting to the machine's CPU count
    pub fn parallelism(&self) -> usize {
        self.jobs_parallel
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(NonZeroUsize::get)
                    .unwrap_or(1)
            })
            .max(1)
    }

    /// Fixed part of the analysis program invocation
    ///
    /// Pass-through options come first, the optional config file last,
    /// directly in front of the per-job input argument.
    pub fn launch_spec(&self) -> LaunchSpec {
        let mut options = self.exe_options.clone();
        if let Some(config) = &self.exe_config {
            options.push(config.display().to_string());
        }
        LaunchSpec {
            executable: self.executable.clone(),
            options,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_minimal_invocation_defaults() {
        let cli = parse(&["validar", "-e", "/usr/bin/analyzer", "--jobs", "jobs.toml"]);
        assert_eq!(cli.reference, PathBuf::from("./old"));
        assert_eq!(cli.output, PathBuf::from("./output"));
        assert_eq!(cli.mem_tolerance, 10.0);
        assert_eq!(cli.time_tolerance, 100.0);
        assert_eq!(cli.debug, "info");
        assert!(!cli.all_plots);
        assert!(cli.jobs_parallel.is_none());
    }

    #[test]
    fn test_missing_required_args_rejected() {
        assert!(Cli::try_parse_from(["validar"]).is_err());
        assert!(Cli::try_parse_from(["validar", "-e", "/usr/bin/analyzer"]).is_err());
    }

    #[test]
    fn test_repeatable_exe_options_keep_order() {
        let cli = parse(&[
            "validar",
            "-e",
            "prog",
            "--jobs",
            "j.toml",
            "--exe-option",
            "--fast",
            "--exe-option",
            "--no-syst",
        ]);
        assert_eq!(cli.exe_options, vec!["--fast", "--no-syst"]);
    }

    #[test]
    fn test_launch_spec_appends_config_last() {
        let cli = parse(&[
            "validar",
            "-e",
            "prog",
            "--jobs",
            "j.toml",
            "--exe-option",
            "--fast",
            "--exe-config",
            "/etc/analyzer.cfg",
        ]);
        let launch = cli.launch_spec();
        assert_eq!(launch.executable, PathBuf::from("prog"));
        assert_eq!(launch.options, vec!["--fast", "/etc/analyzer.cfg"]);
    }

    #[test]
    fn test_compare_config_from_flags() {
        let cli = parse(&[
            "validar",
            "-e",
            "prog",
            "--jobs",
            "j.toml",
            "--mem-tolerance",
            "5",
            "--histogram-filter",
            "^h_",
        ]);
        let config = cli.compare_config().unwrap();
        assert_eq!(config.mem_tolerance, 5.0);
        assert!(config.histogram_filter.unwrap().is_match("h_mass"));
    }

    #[test]
    fn test_bad_filter_pattern_rejected() {
        let cli = parse(&[
            "validar",
            "-e",
            "prog",
            "--jobs",
            "j.toml",
            "--histogram-filter",
            "[unclosed",
        ]);
        assert!(cli.compare_config().is_err());
    }

    #[test]
    fn test_negative_tolerance_rejected() {
        let cli = parse(&[
            "validar",
            "-e",
            "prog",
            "--jobs",
            "j.toml",
            "--time-tolerance=-3",
        ]);
        assert!(cli.compare_config().is_err());
    }

    #[test]
    fn test_parallelism_is_at_least_one() {
        let cli = parse(&[
            "validar",
            "-e",
            "prog",
            "--jobs",
            "j.toml",
            "--jobs-parallel",
            "0",
        ]);
        assert_eq!(cli.parallelism(), 1);
    }
}
