//! Live memory sampling of analysis child processes
//!
//! While a job runs, a sampler polls `/proc/<pid>/status` once per tick and
//! records resident (VmRSS) and virtual (VmSize) memory in MB. The tick has
//! no timestamp: wall time is distorted by scheduler pressure when many jobs
//! share the machine, so the elapsed axis is reconstructed afterwards from
//! the child's measured CPU time via [`elapsed_axis`].
//!
//! A tick that cannot be read (the process exited mid-poll, or the kernel
//! briefly reports no Vm fields) is skipped rather than recorded as zero;
//! a zero sample would bend the memory curve downwards at random points.

use nix::unistd::Pid;
use std::fs;
use std::thread;
use std::time::Duration;

/// Default sampling tick
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(1);

const KB_PER_MB: f64 = 1024.0;

/// Sampler tuning
#[derive(Debug, Clone, Copy)]
pub struct SamplerConfig {
    /// Delay between memory polls
    pub period: Duration,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            period: DEFAULT_PERIOD,
        }
    }
}

/// One memory observation, in MB
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemorySample {
    pub rss_mb: f64,
    pub vsz_mb: f64,
}

/// The ordered samples collected over one job's lifetime
#[derive(Debug, Clone, Default)]
pub struct SampleTrace {
    pub samples: Vec<MemorySample>,
}

impl SampleTrace {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Polls one child process until it terminates
pub struct ResourceSampler {
    config: SamplerConfig,
}

impl ResourceSampler {
    pub fn new(config: SamplerConfig) -> Self {
        Self { config }
    }

    /// Sample `pid` every tick until the process exits or turns zombie
    ///
    /// The caller keeps ownership of the child and must still reap it; this
    /// only observes. Termination is detected through `/proc/<pid>/stat`
    /// rather than by waiting, so the child's exit status and rusage stay
    /// available to the caller.
    pub fn watch(&self, pid: Pid) -> SampleTrace {
        let mut trace = SampleTrace::default();
        loop {
            if !process_alive(pid) {
                break;
            }
            if let Some(sample) = read_proc_memory(pid) {
                trace.samples.push(sample);
            }
            thread::sleep(self.config.period);
        }
        tracing::debug!(pid = pid.as_raw(), ticks = trace.len(), "sampling done");
        trace
    }
}

/// Read the current memory footprint of a process, in MB
///
/// Returns `None` when the process is gone or `/proc/<pid>/status` carries
/// no `VmRSS`/`VmSize` lines (zombies and kernel threads do not).
pub fn read_proc_memory(pid: Pid) -> Option<MemorySample> {
    let content = fs::read_to_string(format!("/proc/{}/status", pid.as_raw())).ok()?;
    parse_status_memory(&content)
}

/// True while the process exists and has not turned zombie
///
/// A zombie has exited; its memory is gone even though the pid lingers
/// until the parent reaps it.
pub fn process_alive(pid: Pid) -> bool {
    let content = match fs::read_to_string(format!("/proc/{}/stat", pid.as_raw())) {
        Ok(content) => content,
        Err(_) => return false,
    };
    parse_stat_state(&content) != Some('Z')
}

fn parse_status_memory(content: &str) -> Option<MemorySample> {
    let mut rss_kb = None;
    let mut vsz_kb = None;
    for line in content.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            rss_kb = parse_kb_field(rest);
        } else if let Some(rest) = line.strip_prefix("VmSize:") {
            vsz_kb = parse_kb_field(rest);
        }
    }
    Some(MemorySample {
        rss_mb: rss_kb? / KB_PER_MB,
        vsz_mb: vsz_kb? / KB_PER_MB,
    })
}

fn parse_kb_field(rest: &str) -> Option<f64> {
    rest.trim().strip_suffix("kB")?.trim().parse().ok()
}

/// Extract the state character from `/proc/<pid>/stat`
///
/// The comm field may itself contain spaces and parentheses, so the state
/// is found after the last `)` rather than by naive splitting.
fn parse_stat_state(content: &str) -> Option<char> {
    let after_comm = &content[content.rfind(')')? + 1..];
    after_comm.split_whitespace().next()?.chars().next()
}

/// Reconstruct the elapsed axis for `n` samples from measured CPU seconds
///
/// Sample `i` is placed at `i * (cpu_seconds / n)`, so the axis starts at
/// zero and the final sample sits just short of the full CPU time. Wall
/// time is deliberately not used: under a loaded machine it measures the
/// scheduler, not the program.
pub fn elapsed_axis(cpu_seconds: f64, n: usize) -> Vec<f64> {
    if n == 0 {
        return Vec::new();
    }
    let dt = cpu_seconds / n as f64;
    (0..n).map(|i| i as f64 * dt).collect()
}
