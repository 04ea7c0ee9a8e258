// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Periodic flush timer.
///
/// The first tick fires one full period after start. Stopping cancels the timer and waits for the
/// task to exit, so once [`Heartbeat::stop`] returns no further tick can run.
/// A zero period is raised to [`MIN_PERIOD`].
pub struct Heartbeat {
    cancel_token: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Heartbeat {
    pub fn start<F>(period: Duration, on_tick: F) -> Self
    where
        F: Fn() + Send + 'static,
    {
        let period = period.max(MIN_PERIOD);
        let cancel_token = CancellationToken::new();
        let cancelled = cancel_token.clone();
        let task = tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => break,
                    _ = ticks.tick() => {
                        debug!("Heartbeat flush");
                        on_tick();
                    }
                }
            }
            debug!("Heartbeat stopped");
        });
        Heartbeat {
            cancel_token,
            task: Mutex::new(Some(task)),
        }
    }

    /// Safe to call any number of times, also concurrently: every caller returns only once the
    /// task has exited.
    pub async fn stop(&self) {
        self.cancel_token.cancel();
        // Held across the join so a concurrent caller waits instead of seeing an empty slot
        let mut task = self.task.lock().await;
        if let Some(task) = task.take() {
            if let Err(e) = task.await {
                error!("Heartbeat task failed: {e}");
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_ticks_at_fixed_interval() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let heartbeat = Heartbeat::start(Duration::from_millis(100), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);

        heartbeat.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent_and_final() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let heartbeat = Heartbeat::start(Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(25)).await;
        heartbeat.stop().await;
        heartbeat.stop().await;
        assert!(heartbeat.is_stopped());

        let after_stop = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), after_stop);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_period_does_not_panic() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let heartbeat = Heartbeat::start(Duration::ZERO, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(5)).await;
        heartbeat.stop().await;
        assert!(ticks.load(Ordering::SeqCst) > 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_stops_both_wait_for_exit() {
        let started = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));
        let (on_start, on_finish) = (Arc::clone(&started), Arc::clone(&finished));
        let heartbeat = Arc::new(Heartbeat::start(Duration::from_millis(10), move || {
            on_start.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(100));
            on_finish.fetch_add(1, Ordering::SeqCst);
        }));

        while started.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        let first = {
            let heartbeat = Arc::clone(&heartbeat);
            tokio::spawn(async move { heartbeat.stop().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        heartbeat.stop().await;
        assert_eq!(
            finished.load(Ordering::SeqCst),
            started.load(Ordering::SeqCst)
        );
        first.await.unwrap();
    }
}
