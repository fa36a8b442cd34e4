//! Batch job submission for harmonisation runs (LSF) and status polling.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::process::Command;
use std::thread;
use std::time::Duration;

use camino::Utf8PathBuf;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::transfer::find_in_path;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Suspended,
    Done,
    Exited,
    Unknown(String),
}

impl JobStatus {
    pub fn from_lsf(stat: &str) -> Self {
        match stat.trim() {
            "PEND" => JobStatus::Pending,
            "RUN" => JobStatus::Running,
            "PSUSP" | "USUSP" | "SSUSP" => JobStatus::Suspended,
            "DONE" => JobStatus::Done,
            "EXIT" => JobStatus::Exited,
            other => JobStatus::Unknown(other.to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Exited)
    }

    /// Anything other than done, running or pending gets killed and resubmitted.
    pub fn needs_resubmit(&self) -> bool {
        !matches!(
            self,
            JobStatus::Done | JobStatus::Running | JobStatus::Pending
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "PEND"),
            JobStatus::Running => write!(f, "RUN"),
            JobStatus::Suspended => write!(f, "SUSP"),
            JobStatus::Done => write!(f, "DONE"),
            JobStatus::Exited => write!(f, "EXIT"),
            JobStatus::Unknown(raw) => write!(f, "{raw}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSpec {
    pub name: String,
    pub command: String,
    pub working_dir: Option<Utf8PathBuf>,
}

pub trait JobScheduler {
    fn submit(&self, spec: &JobSpec) -> Result<JobId, SyncError>;
    fn status(&self, id: &JobId) -> Result<JobStatus, SyncError>;
    fn kill(&self, id: &JobId) -> Result<(), SyncError>;
}

impl<S: JobScheduler + ?Sized> JobScheduler for &S {
    fn submit(&self, spec: &JobSpec) -> Result<JobId, SyncError> {
        (**self).submit(spec)
    }

    fn status(&self, id: &JobId) -> Result<JobStatus, SyncError> {
        (**self).status(id)
    }

    fn kill(&self, id: &JobId) -> Result<(), SyncError> {
        (**self).kill(id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LsfOptions {
    pub queue: Option<String>,
    pub memory_mb: u32,
    pub cpus: u32,
    pub job_group: Option<String>,
    /// Address LSF mails on job completion.
    pub notify: Option<String>,
}

impl Default for LsfOptions {
    fn default() -> Self {
        Self {
            queue: None,
            memory_mb: 2000,
            cpus: 1,
            job_group: None,
            notify: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LsfScheduler {
    options: LsfOptions,
    bin_dir: Option<PathBuf>,
}

impl LsfScheduler {
    pub fn new(options: LsfOptions) -> Self {
        let bin_dir = find_in_path("bsub").and_then(|path| path.parent().map(PathBuf::from));
        Self { options, bin_dir }
    }

    pub fn bsub_args(&self, spec: &JobSpec) -> Vec<String> {
        let memory = self.options.memory_mb.to_string();
        let mut args = vec![
            "-M".to_string(),
            memory.clone(),
            "-n".to_string(),
            self.options.cpus.to_string(),
            "-R".to_string(),
            format!("select[mem>{memory}] rusage[mem={memory}]"),
            "-J".to_string(),
            spec.name.clone(),
            "-o".to_string(),
            format!("{}.o", spec.name),
            "-e".to_string(),
            format!("{}.e", spec.name),
        ];
        if let Some(notify) = &self.options.notify {
            args.extend(["-N".to_string(), notify.clone()]);
        }
        if let Some(queue) = &self.options.queue {
            args.extend(["-q".to_string(), queue.clone()]);
        }
        if let Some(group) = &self.options.job_group {
            args.extend(["-g".to_string(), group.clone()]);
        }
        args.push(spec.command.clone());
        args
    }

    fn tool(&self, name: &str) -> Result<PathBuf, SyncError> {
        self.bin_dir
            .as_ref()
            .map(|dir| dir.join(name))
            .filter(|path| path.exists())
            .ok_or_else(|| SyncError::MissingTool(name.to_string()))
    }

    fn run(&self, name: &str, args: &[String], spec: Option<&JobSpec>) -> Result<String, SyncError> {
        let program = self.tool(name)?;
        let mut cmd = Command::new(&program);
        cmd.args(args);
        if let Some(dir) = spec.and_then(|spec| spec.working_dir.as_ref()) {
            cmd.current_dir(dir.as_std_path());
        }
        let output = cmd
            .output()
            .map_err(|err| SyncError::Scheduler(format!("{name}: {err}")))?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(SyncError::Scheduler(format!(
                "{name} exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

impl JobScheduler for LsfScheduler {
    fn submit(&self, spec: &JobSpec) -> Result<JobId, SyncError> {
        let stdout = self.run("bsub", &self.bsub_args(spec), Some(spec))?;
        let id = parse_job_id(&stdout)
            .ok_or_else(|| SyncError::Scheduler(format!("no job id in bsub output: {stdout}")))?;
        tracing::info!(job = %id, name = %spec.name, "job submitted");
        Ok(id)
    }

    fn status(&self, id: &JobId) -> Result<JobStatus, SyncError> {
        let args = ["-a", "-noheader", "-o", "stat"]
            .into_iter()
            .map(String::from)
            .chain([id.0.clone()])
            .collect::<Vec<_>>();
        let stdout = self.run("bjobs", &args, None)?;
        Ok(parse_status(&stdout))
    }

    fn kill(&self, id: &JobId) -> Result<(), SyncError> {
        self.run("bkill", &[id.0.clone()], None).map(|_| ())
    }
}

/// `Job <1234> is submitted to queue <normal>.`
pub fn parse_job_id(stdout: &str) -> Option<JobId> {
    let re = Regex::new(r"Job <(\d+)>").ok()?;
    if let Some(caps) = re.captures(stdout) {
        return Some(JobId(caps[1].to_string()));
    }
    let digits = Regex::new(r"\d+").ok()?;
    digits.find(stdout).map(|found| JobId(found.as_str().to_string()))
}

pub fn parse_status(stdout: &str) -> JobStatus {
    stdout
        .split_whitespace()
        .next()
        .map(JobStatus::from_lsf)
        .unwrap_or_else(|| JobStatus::Unknown(String::new()))
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackedJob {
    pub spec: JobSpec,
    pub id: JobId,
    pub status: JobStatus,
    pub resubmissions: u32,
}

/// Jobs submitted by one run, owned by that run.
pub struct JobTracker<S: JobScheduler> {
    scheduler: S,
    jobs: Vec<TrackedJob>,
    max_resubmissions: u32,
}

impl<S: JobScheduler> JobTracker<S> {
    pub fn new(scheduler: S, max_resubmissions: u32) -> Self {
        Self {
            scheduler,
            jobs: Vec::new(),
            max_resubmissions,
        }
    }

    pub fn jobs(&self) -> &[TrackedJob] {
        &self.jobs
    }

    pub fn submit(&mut self, spec: JobSpec) -> Result<&TrackedJob, SyncError> {
        let id = self.scheduler.submit(&spec)?;
        self.jobs.push(TrackedJob {
            spec,
            id,
            status: JobStatus::Pending,
            resubmissions: 0,
        });
        let index = self.jobs.len() - 1;
        Ok(&self.jobs[index])
    }

    /// Updates every unfinished job, kills and resubmits failed ones, and
    /// returns a count per status.
    pub fn refresh(&mut self) -> Result<BTreeMap<String, usize>, SyncError> {
        let mut counts = BTreeMap::new();
        for job in &mut self.jobs {
            if !job.status.is_terminal() {
                job.status = self.scheduler.status(&job.id)?;
                if job.status.needs_resubmit() && job.resubmissions < self.max_resubmissions {
                    tracing::warn!(job = %job.id, status = %job.status, "job failed, resubmitting");
                    if let Err(err) = self.scheduler.kill(&job.id) {
                        tracing::debug!(job = %job.id, error = %err, "kill before resubmit failed");
                    }
                    job.id = self.scheduler.submit(&job.spec)?;
                    job.status = JobStatus::Pending;
                    job.resubmissions += 1;
                } else if job.status.needs_resubmit() && !job.status.is_terminal() {
                    // Out of retries: stop watching it.
                    job.status = JobStatus::Exited;
                }
            }
            *counts.entry(job.status.to_string()).or_insert(0) += 1;
        }
        Ok(counts)
    }

    pub fn all_terminal(&self) -> bool {
        self.jobs.iter().all(|job| job.status.is_terminal())
    }

    /// Polls until every job has finished or the policy gives up.
    pub fn wait(&mut self, policy: &PollPolicy) -> Result<PollOutcome, SyncError> {
        self.wait_with(policy, thread::sleep)
    }

    pub fn wait_with(
        &mut self,
        policy: &PollPolicy,
        sleep: impl FnMut(Duration),
    ) -> Result<PollOutcome, SyncError> {
        policy.poll_with(
            || {
                let counts = self.refresh()?;
                tracing::info!(?counts, "job status");
                Ok(self.all_terminal())
            },
            sleep,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollOutcome {
    Finished { attempts: u32 },
    GaveUp { attempts: u32 },
}

/// Exponential backoff between status checks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub multiplier: f64,
    pub max_interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            multiplier: 1.5,
            max_interval: Duration::from_secs(600),
            max_attempts: 200,
        }
    }
}

impl PollPolicy {
    /// Delay after the given (zero-based) attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.min(64) as i32);
        let secs = self.interval.as_secs_f64() * factor;
        Duration::from_secs_f64(secs.min(self.max_interval.as_secs_f64()))
    }

    pub fn poll_with(
        &self,
        mut check: impl FnMut() -> Result<bool, SyncError>,
        mut sleep: impl FnMut(Duration),
    ) -> Result<PollOutcome, SyncError> {
        for attempt in 0..self.max_attempts {
            if check()? {
                return Ok(PollOutcome::Finished {
                    attempts: attempt + 1,
                });
            }
            if attempt + 1 < self.max_attempts {
                sleep(self.delay(attempt));
            }
        }
        Ok(PollOutcome::GaveUp {
            attempts: self.max_attempts,
        })
    }
}
