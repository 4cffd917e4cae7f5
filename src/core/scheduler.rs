// Cron job scheduling

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use croner::Cron;
use futures_util::future::BoxFuture;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A job body. Called once per tick; the returned future runs to completion
/// before the next due job starts.
pub type JobFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    InvalidPeriod { job: String, period: String, reason: String },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPeriod { job, period, reason } => {
                write!(f, "invalid period `{}` for job `{}`: {}", period, job, reason)
            }
        }
    }
}

impl std::error::Error for SchedulerError {}

struct ScheduledJob {
    name: String,
    cron: Cron,
    job: JobFn,
    next_run: Option<DateTime<Utc>>,
}

impl ScheduledJob {
    fn schedule_after(&mut self, time: &DateTime<Utc>) {
        self.next_run = self.cron.find_next_occurrence(time, false).ok();
    }
}

/// Parse a cron expression with five fields, or six with leading seconds.
pub fn parse_period(period: &str) -> Result<Cron, String> {
    Cron::new(period)
        .with_seconds_optional()
        .parse()
        .map_err(|e| e.to_string())
}

/// Cron scheduler running every job on a single background task.
///
/// Jobs are added before [`CronScheduler::start`]. Due jobs run one after
/// another, so a slow job delays the ones behind it.
#[derive(Default)]
pub struct CronScheduler {
    jobs: Vec<ScheduledJob>,
}

impl CronScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `job` to run on every occurrence of `period`.
    pub fn add<F>(&mut self, name: impl Into<String>, period: &str, job: F) -> Result<(), SchedulerError>
    where
        F: Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        let name = name.into();
        let cron = parse_period(period).map_err(|reason| SchedulerError::InvalidPeriod {
            job: name.clone(),
            period: period.to_string(),
            reason,
        })?;

        self.jobs.push(ScheduledJob {
            name,
            cron,
            job: Arc::new(job),
            next_run: None,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn job_names(&self) -> Vec<String> {
        self.jobs.iter().map(|j| j.name.clone()).collect()
    }

    /// Spawn the scheduler loop.
    pub fn start(self) -> RunningScheduler {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let jobs = self.jobs;

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = run_loop(jobs) => {}
            }
        });

        tracing::info!("Scheduler started");
        RunningScheduler { cancel, handle }
    }
}

async fn run_loop(mut jobs: Vec<ScheduledJob>) {
    let now = Utc::now();
    for job in &mut jobs {
        job.schedule_after(&now);
    }

    loop {
        let Some(next) = jobs.iter().filter_map(|j| j.next_run).min() else {
            // Nothing will ever be due again.
            std::future::pending::<()>().await;
            return;
        };

        let wait = (next - Utc::now()).to_std().unwrap_or_default();
        tokio::time::sleep(wait).await;

        let now = Utc::now();
        for job in jobs.iter_mut().filter(|j| j.next_run.is_some_and(|t| t <= now)) {
            tracing::trace!(job = %job.name, "running scheduled job");
            (job.job)().await;
            job.schedule_after(&Utc::now());
        }
    }
}

/// Handle to a started [`CronScheduler`].
pub struct RunningScheduler {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl RunningScheduler {
    /// Stop the scheduler. A job in flight is dropped, which kills its
    /// process.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            tracing::warn!("Scheduler task ended abnormally: {}", e);
        }
        tracing::info!("Scheduler stopped");
    }
}
