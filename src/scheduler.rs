//! Parallel execution of analysis jobs
//!
//! A bounded pool of worker threads drains a job channel; each worker owns
//! one external process at a time: it creates the job directory, spawns the
//! analysis program with stdout and stderr redirected into `job.log`, runs
//! the memory sampler until the process terminates, then reaps it with
//! `wait4` to collect the exit status together with that child's own rusage.
//!
//! Job failures are data, not errors: a job that cannot be launched or exits
//! non-zero becomes a [`JobFailure`] and the batch carries on. The only
//! batch-level error is the degenerate case where the analysis program never
//! started for any job at all.

use crate::archive::{MemoryCurve, RESULT_ARCHIVE_NAME};
use crate::sampler::{elapsed_axis, ResourceSampler, SamplerConfig};
use anyhow::{bail, Context, Result};
use crossbeam::channel;
use nix::sys::resource::{getrusage, UsageWho};
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;
use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

/// Subdirectory of the output directory holding per-job working dirs
pub const JOBS_DIR: &str = "jobs";

/// File receiving the child's stdout and stderr inside its job directory
pub const JOB_LOG_NAME: &str = "job.log";

/// Lines of `job.log` kept as failure diagnostics
const LOG_TAIL_LINES: usize = 20;

/// One invocation of the external analysis program
#[derive(Debug, Clone)]
pub struct JobSpec {
    /// Unique job id, derived from the input file stem
    pub id: String,
    /// Sample label the job's output is merged under
    pub label: String,
    /// Resolved input file path
    pub input: PathBuf,
}

/// How to invoke the analysis program, shared by every job
///
/// The full command line is `<executable> -o <job dir> <options..> <input>`.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub executable: PathBuf,
    pub options: Vec<String>,
}

/// Scheduler tuning
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Worker thread count (resolved, at least 1)
    pub parallelism: usize,
    /// Directory receiving one subdirectory per job
    pub jobs_root: PathBuf,
    pub launch: LaunchSpec,
    pub sampler: SamplerConfig,
}

/// One memory observation of one job
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSample {
    pub job: String,
    /// Tick index, monotonically increasing per job
    pub seq: u64,
    pub rss_mb: f64,
    pub vsz_mb: f64,
}

/// Everything a completed job leaves behind
#[derive(Debug, Clone)]
pub struct RunArtifact {
    pub job: String,
    pub label: String,
    pub samples: Vec<ResourceSample>,
    /// Child user CPU time over its whole lifetime, from `wait4` rusage
    pub cpu_seconds: f64,
    /// The result archive the analysis program wrote into the job directory
    pub archive: PathBuf,
}

impl RunArtifact {
    /// Build the persisted `(rss, vir)` memory curves on the reconstructed
    /// elapsed axis
    pub fn curves(&self) -> (MemoryCurve, MemoryCurve) {
        let axis = elapsed_axis(self.cpu_seconds, self.samples.len());
        let rss = axis
            .iter()
            .zip(&self.samples)
            .map(|(&t, s)| [t, s.rss_mb])
            .collect();
        let vir = axis
            .iter()
            .zip(&self.samples)
            .map(|(&t, s)| [t, s.vsz_mb])
            .collect();
        (
            MemoryCurve {
                job: self.job.clone(),
                points: rss,
            },
            MemoryCurve {
                job: self.job.clone(),
                points: vir,
            },
        )
    }
}

/// Why a job produced no artifact
#[derive(Debug, Clone, PartialEq)]
pub enum FailureKind {
    /// The process could not be started or managed at all
    Launch { error: String },
    /// The process ran but terminated unsuccessfully
    Exit {
        code: Option<i32>,
        signal: Option<i32>,
    },
}

impl FailureKind {
    pub fn is_launch(&self) -> bool {
        matches!(self, FailureKind::Launch { .. })
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Launch { error } => write!(f, "launch failed: {error}"),
            FailureKind::Exit {
                code: Some(code), ..
            } => write!(f, "exit code {code}"),
            FailureKind::Exit {
                signal: Some(signal),
                ..
            } => write!(f, "killed by signal {signal}"),
            FailureKind::Exit { .. } => write!(f, "abnormal termination"),
        }
    }
}

/// Diagnostic record of a job that reached no Completed state
#[derive(Debug, Clone)]
pub struct JobFailure {
    pub job: String,
    pub label: String,
    pub kind: FailureKind,
    /// Last lines of `job.log`, empty when nothing was captured
    pub log_tail: String,
}

impl JobFailure {
    fn launch(spec: &JobSpec, error: String) -> Self {
        Self {
            job: spec.id.clone(),
            label: spec.label.clone(),
            kind: FailureKind::Launch { error },
            log_tail: String::new(),
        }
    }

    fn exit(spec: &JobSpec, code: Option<i32>, signal: Option<i32>, log_tail: String) -> Self {
        Self {
            job: spec.id.clone(),
            label: spec.label.clone(),
            kind: FailureKind::Exit { code, signal },
            log_tail,
        }
    }
}

/// Outcome of one job
pub type JobOutcome = std::result::Result<RunArtifact, JobFailure>;

/// Everything a batch run produced
#[derive(Debug, Default)]
pub struct BatchResult {
    pub artifacts: HashMap<String, RunArtifact>,
    pub failures: Vec<JobFailure>,
}

impl BatchResult {
    /// True when nothing ran at all: no artifacts and every failure was a
    /// launch failure. This is the only condition that halts the run.
    pub fn all_launches_failed(&self) -> bool {
        self.artifacts.is_empty()
            && !self.failures.is_empty()
            && self.failures.iter().all(|f| f.kind.is_launch())
    }
}

/// Runs a batch of jobs over a bounded worker pool
pub struct JobScheduler {
    config: SchedulerConfig,
}

impl JobScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    /// Run every job to a terminal state and collect the outcomes
    ///
    /// Returns after the last worker has finished. Fails only when the
    /// analysis program could not be started for a single job; partial
    /// failures are reported in the returned [`BatchResult`] instead.
    pub fn run_batch(&self, jobs: Vec<JobSpec>) -> Result<BatchResult> {
        fs::create_dir_all(&self.config.jobs_root).with_context(|| {
            format!(
                "failed to create job root {}",
                self.config.jobs_root.display()
            )
        })?;

        let workers = self.config.parallelism.max(1).min(jobs.len().max(1));
        let total = jobs.len();
        tracing::info!(jobs = total, workers, "starting batch");

        let usage_before = getrusage(UsageWho::RUSAGE_CHILDREN)
            .context("getrusage(RUSAGE_CHILDREN) before batch")?;

        let (job_tx, job_rx) = channel::unbounded::<JobSpec>();
        let (res_tx, res_rx) = channel::unbounded::<JobOutcome>();
        for job in jobs {
            // receiver outlives this loop, send cannot fail
            let _ = job_tx.send(job);
        }
        drop(job_tx);

        thread::scope(|s| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let res_tx = res_tx.clone();
                s.spawn(move || {
                    while let Ok(spec) = job_rx.recv() {
                        let outcome = self.run_one(&spec);
                        if res_tx.send(outcome).is_err() {
                            break;
                        }
                    }
                });
            }
        });
        drop(res_tx);

        let mut result = BatchResult::default();
        for outcome in res_rx {
            match outcome {
                Ok(artifact) => {
                    result.artifacts.insert(artifact.job.clone(), artifact);
                }
                Err(failure) => {
                    tracing::warn!(
                        job = %failure.job,
                        label = %failure.label,
                        kind = %failure.kind,
                        "job failed"
                    );
                    result.failures.push(failure);
                }
            }
        }

        let usage_after = getrusage(UsageWho::RUSAGE_CHILDREN)
            .context("getrusage(RUSAGE_CHILDREN) after batch")?;
        let batch_cpu = timeval_seconds(usage_after.user_time())
            - timeval_seconds(usage_before.user_time());
        tracing::info!(
            completed = result.artifacts.len(),
            failed = result.failures.len(),
            batch_cpu_seconds = format!("{batch_cpu:.2}"),
            "batch finished"
        );

        if result.all_launches_failed() {
            bail!(
                "analysis program never started: all {} jobs failed to launch",
                result.failures.len()
            );
        }
        Ok(result)
    }

    /// Drive one job to a terminal state
    fn run_one(&self, spec: &JobSpec) -> JobOutcome {
        let job_dir = self.config.jobs_root.join(&spec.id);
        if let Err(e) = fs::create_dir_all(&job_dir) {
            return Err(JobFailure::launch(
                spec,
                format!("creating {}: {e}", job_dir.display()),
            ));
        }

        let log_path = job_dir.join(JOB_LOG_NAME);
        let (stdout_log, stderr_log) = match open_log_pair(&log_path) {
            Ok(pair) => pair,
            Err(e) => {
                return Err(JobFailure::launch(
                    spec,
                    format!("creating {}: {e}", log_path.display()),
                ))
            }
        };

        let mut cmd = Command::new(&self.config.launch.executable);
        cmd.arg("-o")
            .arg(&job_dir)
            .args(&self.config.launch.options)
            .arg(&spec.input)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout_log))
            .stderr(Stdio::from(stderr_log));

        tracing::info!(job = %spec.id, label = %spec.label, "launching");
        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return Err(JobFailure::launch(spec, e.to_string())),
        };
        let pid = Pid::from_raw(child.id() as i32);

        // Observe until the child terminates, then reap it ourselves; the
        // sampler never waits, so exit status and rusage are still ours.
        let trace = ResourceSampler::new(self.config.sampler).watch(pid);
        let (status, usage) = match wait_with_usage(pid) {
            Ok(reaped) => reaped,
            Err(e) => {
                return Err(JobFailure::launch(
                    spec,
                    format!("waiting for pid {pid}: {e}"),
                ))
            }
        };
        let cpu_seconds = rusage_user_seconds(&usage);

        match status {
            WaitStatus::Exited(_, 0) => {
                let samples: Vec<ResourceSample> = trace
                    .samples
                    .iter()
                    .enumerate()
                    .map(|(i, s)| ResourceSample {
                        job: spec.id.clone(),
                        seq: i as u64,
                        rss_mb: s.rss_mb,
                        vsz_mb: s.vsz_mb,
                    })
                    .collect();
                tracing::info!(
                    job = %spec.id,
                    ticks = samples.len(),
                    cpu_seconds = format!("{cpu_seconds:.2}"),
                    "completed"
                );
                Ok(RunArtifact {
                    job: spec.id.clone(),
                    label: spec.label.clone(),
                    samples,
                    cpu_seconds,
                    archive: job_dir.join(RESULT_ARCHIVE_NAME),
                })
            }
            WaitStatus::Exited(_, code) => Err(JobFailure::exit(
                spec,
                Some(code),
                None,
                read_log_tail(&log_path),
            )),
            WaitStatus::Signaled(_, signal, _) => Err(JobFailure::exit(
                spec,
                None,
                Some(signal as i32),
                read_log_tail(&log_path),
            )),
            other => Err(JobFailure::exit(
                spec,
                None,
                None,
                format!("unexpected wait status: {other:?}"),
            )),
        }
    }
}

fn open_log_pair(path: &Path) -> io::Result<(File, File)> {
    let file = File::create(path)?;
    let clone = file.try_clone()?;
    Ok((file, clone))
}

/// Blocking wait that also returns the child's rusage
fn wait_with_usage(pid: Pid) -> io::Result<(WaitStatus, libc::rusage)> {
    let mut status: libc::c_int = 0;
    // rusage is plain data, zeroed is a valid initial value
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    let ret = unsafe { libc::wait4(pid.as_raw(), &mut status, 0, &mut usage) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    let status = WaitStatus::from_raw(pid, status).map_err(io::Error::other)?;
    Ok((status, usage))
}

fn rusage_user_seconds(usage: &libc::rusage) -> f64 {
    usage.ru_utime.tv_sec as f64 + usage.ru_utime.tv_usec as f64 / 1e6
}

fn timeval_seconds(tv: nix::sys::time::TimeVal) -> f64 {
    tv.tv_sec() as f64 + tv.tv_usec() as f64 / 1e6
}

/// Last lines of a job log, for failure diagnostics
fn read_log_tail(path: &Path) -> String {
    let Ok(content) = fs::read_to_string(path) else {
        return String::new();
    };
    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(LOG_TAIL_LINES);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(id: &str) -> JobSpec {
        JobSpec {
            id: id.to_string(),
            label: "L".to_string(),
            input: PathBuf::from("/tmp/in.dat"),
        }
    }

    fn launch_failure(id: &str) -> JobFailure {
        JobFailure::launch(&spec(id), "no such file".to_string())
    }

    fn exit_failure(id: &str) -> JobFailure {
        JobFailure::exit(&spec(id), Some(1), None, String::new())
    }

    #[test]
    fn test_all_launches_failed_requires_failures() {
        let result = BatchResult::default();
        assert!(!result.all_launches_failed());
    }

    #[test]
    fn test_all_launches_failed_true_case() {
        let result = BatchResult {
            artifacts: HashMap::new(),
            failures: vec![launch_failure("a"), launch_failure("b")],
        };
        assert!(result.all_launches_failed());
    }

    #[test]
    fn test_exit_failure_does_not_halt() {
        let result = BatchResult {
            artifacts: HashMap::new(),
            failures: vec![launch_failure("a"), exit_failure("b")],
        };
        assert!(!result.all_launches_failed());
    }

    #[test]
    fn test_artifact_prevents_halt() {
        let mut artifacts = HashMap::new();
        artifacts.insert(
            "ok".to_string(),
            RunArtifact {
                job: "ok".to_string(),
                label: "L".to_string(),
                samples: vec![],
                cpu_seconds: 1.0,
                archive: PathBuf::from("/tmp/histograms.json"),
            },
        );
        let result = BatchResult {
            artifacts,
            failures: vec![launch_failure("a")],
        };
        assert!(!result.all_launches_failed());
    }

    #[test]
    fn test_failure_kind_display() {
        assert_eq!(
            FailureKind::Exit {
                code: Some(3),
                signal: None
            }
            .to_string(),
            "exit code 3"
        );
        assert_eq!(
            FailureKind::Exit {
                code: None,
                signal: Some(9)
            }
            .to_string(),
            "killed by signal 9"
        );
        assert!(FailureKind::Launch {
            error: "enoent".to_string()
        }
        .to_string()
        .contains("enoent"));
    }

    #[test]
    fn test_artifact_curves_use_reconstructed_axis() {
        let artifact = RunArtifact {
            job: "j".to_string(),
            label: "L".to_string(),
            samples: vec![
                ResourceSample {
                    job: "j".to_string(),
                    seq: 0,
                    rss_mb: 100.0,
                    vsz_mb: 400.0,
                },
                ResourceSample {
                    job: "j".to_string(),
                    seq: 1,
                    rss_mb: 120.0,
                    vsz_mb: 410.0,
                },
            ],
            cpu_seconds: 3.0,
            archive: PathBuf::from("/tmp/histograms.json"),
        };
        let (rss, vir) = artifact.curves();
        assert_eq!(rss.points, vec![[0.0, 100.0], [1.5, 120.0]]);
        assert_eq!(vir.points, vec![[0.0, 400.0], [1.5, 410.0]]);
        assert_eq!(rss.job, "j");
    }

    #[test]
    fn test_read_log_tail_keeps_last_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.log");
        let content: Vec<String> = (0..30).map(|i| format!("line {i}")).collect();
        fs::write(&path, content.join("\n")).unwrap();

        let tail = read_log_tail(&path);
        assert!(tail.starts_with("line 10"));
        assert!(tail.ends_with("line 29"));
    }

    #[test]
    fn test_read_log_tail_missing_file() {
        assert_eq!(read_log_tail(Path::new("/nonexistent/job.log")), "");
    }
}
