//! Background health checker with a latched status (C3, spec §4.3).

use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Unknown,
}

impl HealthStatus {
    fn to_u8(self) -> u8 {
        match self {
            HealthStatus::Healthy => 0,
            HealthStatus::Unhealthy => 1,
            HealthStatus::Unknown => 2,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => HealthStatus::Healthy,
            1 => HealthStatus::Unhealthy,
            _ => HealthStatus::Unknown,
        }
    }
}

/// Polls an `is_available` probe on an interval and latches the last result.
/// `is_healthy()` reads the latch and never blocks on a fresh probe.
pub struct HealthChecker {
    latched: Arc<AtomicU8>,
    cancel: CancellationToken,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl HealthChecker {
    /// Spawns the polling task. `probe` is called every `interval`, each
    /// call bounded by `probe_timeout`; a timed-out probe counts as unhealthy.
    pub fn spawn<F, Fut>(
        name: &'static str,
        interval: Duration,
        probe_timeout: Duration,
        mut probe: F,
    ) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send,
    {
        let latched = Arc::new(AtomicU8::new(HealthStatus::Unknown.to_u8()));
        let cancel = CancellationToken::new();

        let task_latched = latched.clone();
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = task_cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                if task_cancel.is_cancelled() {
                    break;
                }

                let outcome = tokio::select! {
                    biased;
                    _ = task_cancel.cancelled() => break,
                    r = tokio::time::timeout(probe_timeout, probe()) => r,
                };

                let status = match outcome {
                    Ok(true) => HealthStatus::Healthy,
                    Ok(false) => HealthStatus::Unhealthy,
                    Err(_) => {
                        warn!(provider = name, "health probe timed out");
                        HealthStatus::Unhealthy
                    }
                };
                task_latched.store(status.to_u8(), Ordering::Relaxed);
            }
        });

        HealthChecker {
            latched,
            cancel,
            task: std::sync::Mutex::new(Some(handle)),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status() == HealthStatus::Healthy
    }

    pub fn status(&self) -> HealthStatus {
        HealthStatus::from_u8(self.latched.load(Ordering::Relaxed))
    }

    /// Idempotent: safe to call more than once, from any thread.
    pub fn stop(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.task.lock().expect("health task mutex poisoned").take() {
            handle.abort();
        }
    }
}

impl Drop for HealthChecker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[tokio::test]
    async fn latches_healthy_after_first_probe() {
        let checker = HealthChecker::spawn(
            "test",
            Duration::from_millis(5),
            Duration::from_millis(50),
            || async { true },
        );
        assert_eq!(checker.status(), HealthStatus::Unknown);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(checker.is_healthy());
        checker.stop();
    }

    #[tokio::test]
    async fn latches_unhealthy_on_false_probe() {
        let checker = HealthChecker::spawn(
            "test",
            Duration::from_millis(5),
            Duration::from_millis(50),
            || async { false },
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(checker.status(), HealthStatus::Unhealthy);
        checker.stop();
    }

    #[tokio::test]
    async fn probe_timeout_counts_as_unhealthy() {
        let checker = HealthChecker::spawn(
            "test",
            Duration::from_millis(5),
            Duration::from_millis(5),
            || async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                true
            },
        );
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(checker.status(), HealthStatus::Unhealthy);
        checker.stop();
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_halts_polling() {
        let polled = Arc::new(AtomicBool::new(false));
        let polled_task = polled.clone();
        let checker = HealthChecker::spawn(
            "test",
            Duration::from_millis(5),
            Duration::from_millis(50),
            move || {
                let polled_task = polled_task.clone();
                async move {
                    polled_task.store(true, Ordering::Relaxed);
                    true
                }
            },
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        checker.stop();
        checker.stop();
        assert!(polled.load(Ordering::Relaxed));
    }
}
