use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Time from `now_ms` (milliseconds since the Unix epoch) to the next
/// wall-clock multiple of `interval`. A time exactly on a boundary waits a
/// full interval.
///
/// With a 20 minute interval, runs land on :00, :20 and :40 regardless of
/// when the process started.
pub fn delay_until_next_boundary(now_ms: i64, interval: Duration) -> Duration {
    let interval_ms = interval.as_millis().max(1) as i64;
    let elapsed = now_ms.rem_euclid(interval_ms);
    Duration::from_millis((interval_ms - elapsed) as u64)
}

/// Handle to a scheduled job. Dropping it without [`JobHandle::close`]
/// also stops the schedule, but without waiting for an in-flight run.
pub struct JobHandle {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl JobHandle {
    /// Stop scheduling new runs and wait for an in-flight run to finish.
    pub async fn close(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!(job = self.name, error = %e, "Scheduled job task ended abnormally");
        }
        tracing::info!(job = self.name, "Scheduled job stopped");
    }
}

/// Run `job` at every wall-clock multiple of `interval`, one run at a time.
///
/// A run that overruns the next boundary delays it rather than overlapping;
/// boundaries missed entirely are skipped.
pub fn schedule<F, Fut>(name: &'static str, interval: Duration, job: F) -> JobHandle
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let interval = interval.max(Duration::from_millis(1));
    let (shutdown, mut shutdown_rx) = watch::channel(false);

    let first = delay_until_next_boundary(chrono::Utc::now().timestamp_millis(), interval);
    tracing::info!(
        job = name,
        interval_secs = interval.as_secs(),
        first_run_in_secs = first.as_secs(),
        "Scheduled job"
    );

    let task = tokio::spawn(async move {
        let mut timer = tokio::time::interval_at(Instant::now() + first, interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = timer.tick() => {}
                // Err means the handle was dropped: stop as well
                _ = shutdown_rx.changed() => break,
            }
            if *shutdown_rx.borrow() {
                break;
            }

            tracing::debug!(job = name, "Running scheduled job");
            job().await;
        }
    });

    JobHandle {
        name,
        shutdown,
        task,
    }
}
