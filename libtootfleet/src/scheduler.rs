//! Background poll scheduler
//!
//! A [`PollScheduler`] owns at most one background loop. The loop runs a
//! [`PollJob`] cycle, sleeps for an irregular number of time units, and
//! repeats until stopped. Stopping is cooperative: the flag is checked once
//! per iteration, so a cycle or sleep already in progress runs to completion
//! and [`PollScheduler::stop`] waits for it.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::error::{Result, SchedulerError};
use crate::mirror::Mirror;
use crate::remote::Session;

/// Number of time units to sleep after cycle `x`.
///
/// Always within `[10, 80]`.
pub fn jitter_units(x: u64) -> u64 {
    let r = x % 40;
    10 + ((1234 + r * r * r) % 71)
}

/// One unit of recurring work
#[async_trait]
pub trait PollJob: Send + Sync {
    /// Run one cycle; failures are the job's to log
    async fn run_cycle(&self);
}

struct RunningTask {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

pub struct PollScheduler {
    state: Mutex<Option<RunningTask>>,
    unit: Duration,
}

impl PollScheduler {
    pub fn new(unit: Duration) -> Self {
        Self {
            state: Mutex::new(None),
            unit,
        }
    }

    /// Start the loop with `job`.
    ///
    /// Fails with [`SchedulerError::AlreadyRunning`] while a loop is live.
    pub async fn start(&self, job: Arc<dyn PollJob>) -> Result<()> {
        let mut state = self.state.lock().await;

        if let Some(task) = state.as_ref() {
            if !task.handle.is_finished() {
                return Err(SchedulerError::AlreadyRunning.into());
            }
        }

        let stop = Arc::new(AtomicBool::new(false));
        let handle = tokio::spawn(run_loop(job, stop.clone(), self.unit));
        *state = Some(RunningTask { stop, handle });

        tracing::info!("Poll scheduler started");
        Ok(())
    }

    /// Signal the loop to stop and wait until it has exited.
    ///
    /// Fails with [`SchedulerError::NotRunning`] when idle.
    pub async fn stop(&self) -> Result<()> {
        let mut state = self.state.lock().await;

        let task = match state.take() {
            Some(task) if !task.handle.is_finished() => task,
            _ => return Err(SchedulerError::NotRunning.into()),
        };

        task.stop.store(true, Ordering::SeqCst);
        if let Err(e) = task.handle.await {
            tracing::error!(error = %e, "Poll loop ended abnormally");
        }

        tracing::info!("Poll scheduler stopped");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        let state = self.state.lock().await;
        state.as_ref().map_or(false, |t| !t.handle.is_finished())
    }
}

async fn run_loop(job: Arc<dyn PollJob>, stop: Arc<AtomicBool>, unit: Duration) {
    let mut x: u64 = 0;
    loop {
        if stop.load(Ordering::SeqCst) {
            tracing::debug!(cycles = x, "Stop requested, leaving poll loop");
            break;
        }

        job.run_cycle().await;

        let units = jitter_units(x);
        tracing::debug!(cycle = x, units, "Sleeping until next cycle");
        sleep(unit * units as u32).await;
        x = x.wrapping_add(1);
    }
}

/// Poll job mirroring remote hashtags into the local instance
pub struct MirrorJob {
    mirror: Arc<Mirror>,
    remote: Arc<dyn Session>,
    hashtags: Vec<String>,
    limit: u32,
}

impl MirrorJob {
    pub fn new(mirror: Arc<Mirror>, remote: Arc<dyn Session>, hashtags: Vec<String>, limit: u32) -> Self {
        Self {
            mirror,
            remote,
            hashtags,
            limit,
        }
    }
}

#[async_trait]
impl PollJob for MirrorJob {
    async fn run_cycle(&self) {
        if let Err(e) = self
            .mirror
            .mirror_once(self.remote.as_ref(), &self.hashtags, self.limit)
            .await
        {
            tracing::error!(error = %e, "Mirror cycle failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FleetError;
    use std::sync::atomic::AtomicUsize;

    struct CountingJob {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl PollJob for CountingJob {
        async fn run_cycle(&self) {
            self.runs.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn job() -> Arc<CountingJob> {
        Arc::new(CountingJob {
            runs: AtomicUsize::new(0),
        })
    }

    #[test]
    fn test_jitter_bounds() {
        for x in 0..1000 {
            let units = jitter_units(x);
            assert!((10..=80).contains(&units), "jitter({}) = {}", x, units);
        }
    }

    #[test]
    fn test_jitter_known_values() {
        // 1234 % 71 = 27
        assert_eq!(jitter_units(0), 37);
        // (1234 + 1) % 71 = 28
        assert_eq!(jitter_units(1), 38);
        assert_eq!(jitter_units(40), jitter_units(0));
    }

    #[test]
    fn test_jitter_is_irregular() {
        let distinct: std::collections::HashSet<u64> = (0..40).map(jitter_units).collect();
        assert!(distinct.len() > 10);
    }

    #[tokio::test]
    async fn test_start_twice_rejected() {
        let scheduler = PollScheduler::new(Duration::from_millis(1));
        scheduler.start(job()).await.unwrap();

        let second = scheduler.start(job()).await;
        assert!(matches!(
            second,
            Err(FleetError::Scheduler(SchedulerError::AlreadyRunning))
        ));

        scheduler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_when_idle_rejected() {
        let scheduler = PollScheduler::new(Duration::from_millis(1));
        assert!(matches!(
            scheduler.stop().await,
            Err(FleetError::Scheduler(SchedulerError::NotRunning))
        ));
    }

    #[tokio::test]
    async fn test_start_stop_start() {
        let scheduler = PollScheduler::new(Duration::from_millis(1));
        let job = job();

        scheduler.start(job.clone()).await.unwrap();
        assert!(scheduler.is_running().await);
        tokio::time::sleep(Duration::from_millis(20)).await;
        scheduler.stop().await.unwrap();
        assert!(!scheduler.is_running().await);

        let runs = job.runs.load(Ordering::SeqCst);
        assert!(runs >= 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(job.runs.load(Ordering::SeqCst), runs, "no cycles after stop");

        scheduler.start(job).await.unwrap();
        scheduler.stop().await.unwrap();
    }
}
