//! Consulting a named retry resource from a decorator.

use crate::cancellation::CancellationToken;
use crate::errors::StreamflowError;
use crate::manager::Resources;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// What a decorator does when its retry resource cannot be consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessErrorPolicy {
    /// Do not block on the resource: forward without waiting, stop retrying.
    #[default]
    FailOpen,
    /// Wait this long before trying again.
    FailClosed(Duration),
}

/// A handle on one named retry resource, resolved on every call.
#[derive(Debug, Clone)]
pub struct RetryGate {
    resources: Resources,
    resource: String,
    policy: AccessErrorPolicy,
}

impl RetryGate {
    /// Creates a gate on the retry resource labelled `resource`.
    #[must_use]
    pub fn new(resources: Resources, resource: impl Into<String>, policy: AccessErrorPolicy) -> Self {
        Self {
            resources,
            resource: resource.into(),
            policy,
        }
    }

    /// The resource label.
    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// The configured access error policy.
    #[must_use]
    pub fn policy(&self) -> AccessErrorPolicy {
        self.policy
    }

    /// Returns true if the resource exists and never stops escalating.
    #[must_use]
    pub fn is_unbounded(&self) -> bool {
        self.resources
            .retry(&self.resource)
            .is_ok_and(|r| r.is_unbounded())
    }

    /// Asks the resource how long to wait.
    ///
    /// # Errors
    ///
    /// Returns an error if the resource is missing or could not answer.
    pub async fn access(&self) -> Result<Duration, StreamflowError> {
        self.resources
            .access_retry(&self.resource, |r| async move { r.access().await })
            .await
    }

    /// Returns the time to wait, applying the policy to access errors.
    pub async fn wait_duration(&self) -> Duration {
        match self.access().await {
            Ok(wait) => wait,
            Err(e) => self.on_access_error(&e),
        }
    }

    /// Applies the policy to an access error, returning the time to wait.
    pub(crate) fn on_access_error(&self, err: &StreamflowError) -> Duration {
        match self.policy {
            AccessErrorPolicy::FailOpen => {
                warn!(resource = %self.resource, error = %err, "Retry resource access failed, not waiting");
                Duration::ZERO
            }
            AccessErrorPolicy::FailClosed(wait) => {
                warn!(
                    resource = %self.resource,
                    error = %err,
                    wait_ms = wait.as_millis() as u64,
                    "Retry resource access failed, waiting"
                );
                wait
            }
        }
    }

    /// Starts a fresh escalation. Failures are logged.
    pub async fn trigger_backoff(&self) {
        let result = self
            .resources
            .access_retry(&self.resource, |r| async move { r.trigger_backoff().await })
            .await;
        if let Err(e) = result {
            warn!(resource = %self.resource, error = %e, "Failed to trigger backoff");
        }
    }

    /// Returns the resource to idle. Failures are logged.
    pub async fn reset(&self) {
        let result = self
            .resources
            .access_retry(&self.resource, |r| async move { r.reset().await })
            .await;
        if let Err(e) = result {
            warn!(resource = %self.resource, error = %e, "Failed to reset retry resource");
        }
    }

    /// Joins the escalation on the resource, triggering backoff if no other
    /// caller is escalating on it.
    pub async fn escalate(&self) {
        if self.resources.join_escalation(&self.resource) {
            self.trigger_backoff().await;
        } else {
            debug!(resource = %self.resource, "Joining escalation in progress");
        }
    }

    /// Leaves the escalation after a success. The resource is reset once
    /// the last escalating caller recovers.
    pub async fn recover(&self) {
        if self.resources.leave_escalation(&self.resource) {
            self.reset().await;
        }
    }

    /// Leaves the escalation without touching the resource.
    pub fn give_up(&self) {
        self.resources.leave_escalation(&self.resource);
    }

    /// Sleeps for `wait` unless `shutdown` fires first.
    ///
    /// Returns false if shutdown won.
    pub async fn sleep(wait: Duration, shutdown: &CancellationToken) -> bool {
        if wait.is_zero() {
            return !shutdown.is_cancelled();
        }
        tokio::select! {
            biased;
            () = shutdown.cancelled() => false,
            () = tokio::time::sleep(wait) => true,
        }
    }

    /// Runs `operation` until `failed` rejects its outcome no longer, the
    /// resource reports exhaustion or shutdown fires.
    ///
    /// The first failure joins the escalation on the resource and every
    /// retry waits out `access`. A success after a retry leaves the
    /// escalation, resetting the resource if no other caller is still
    /// escalating on it. The last outcome is returned either way.
    pub async fn with_backoff<T, F, Fut>(
        &self,
        shutdown: &CancellationToken,
        mut operation: F,
        failed: impl Fn(&T) -> bool,
    ) -> T
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = T>,
    {
        let mut attempt = 0u32;
        loop {
            let outcome = operation().await;
            if !failed(&outcome) {
                if attempt > 0 {
                    self.recover().await;
                }
                return outcome;
            }
            if attempt == 0 {
                self.escalate().await;
            }

            let wait = match self.access().await {
                Ok(wait) if wait.is_zero() => {
                    debug!(resource = %self.resource, attempt, "Backoff exhausted, giving up");
                    self.give_up();
                    return outcome;
                }
                Ok(wait) => wait,
                Err(e) => match self.on_access_error(&e) {
                    wait if wait.is_zero() => {
                        self.give_up();
                        return outcome;
                    }
                    wait => wait,
                },
            };

            attempt += 1;
            debug!(
                resource = %self.resource,
                attempt,
                wait_ms = wait.as_millis() as u64,
                "Retrying after backoff"
            );
            if !Self::sleep(wait, shutdown).await {
                self.give_up();
                return outcome;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::Environment;
    use crate::retry::{BackoffConfig, LocalRetry};
    use crate::testing::MockRetry;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn resources_with_local(max_retries: u64) -> Resources {
        let res = Resources::new(Environment::new());
        let config = BackoffConfig::new()
            .with_initial_interval(Duration::from_millis(10))
            .with_max_interval(Duration::from_millis(10))
            .with_randomization_factor(0.0)
            .with_max_retries(max_retries);
        res.store_retry("backoff", Arc::new(LocalRetry::new(config)));
        res
    }

    #[tokio::test]
    async fn test_missing_resource_fails_open() {
        crate::testing::init_tracing();
        let gate = RetryGate::new(Resources::new(Environment::new()), "nope", AccessErrorPolicy::FailOpen);
        assert!(gate.access().await.is_err());
        assert_eq!(gate.wait_duration().await, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_fail_closed_waits() {
        crate::testing::init_tracing();
        let res = Resources::new(Environment::new());
        res.store_retry(
            "broken",
            Arc::new(MockRetry::new(|| Err(StreamflowError::Shutdown("store down".into())))),
        );
        let gate = RetryGate::new(
            res,
            "broken",
            AccessErrorPolicy::FailClosed(Duration::from_millis(250)),
        );
        assert_eq!(gate.wait_duration().await, Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_backoff_recovers() {
        crate::testing::init_tracing();
        let gate = RetryGate::new(resources_with_local(5), "backoff", AccessErrorPolicy::FailOpen);
        let calls = &AtomicU32::new(0);
        let shutdown = CancellationToken::new();

        let result: Result<u32, String> = gate
            .with_backoff(
                &shutdown,
                move || async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n < 2 { Err("flaky".to_string()) } else { Ok(n) }
                },
                Result::is_err,
            )
            .await;

        assert_eq!(result, Ok(2));
        assert_eq!(gate.access().await.unwrap(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_backoff_gives_up_when_exhausted() {
        crate::testing::init_tracing();
        let gate = RetryGate::new(resources_with_local(2), "backoff", AccessErrorPolicy::FailOpen);
        let calls = &AtomicU32::new(0);
        let shutdown = CancellationToken::new();

        let result: Result<(), &str> = gate
            .with_backoff(
                &shutdown,
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("down")
                },
                Result::is_err,
            )
            .await;

        assert_eq!(result, Err("down"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_backoff_stops_on_shutdown() {
        crate::testing::init_tracing();
        let gate = RetryGate::new(resources_with_local(0), "backoff", AccessErrorPolicy::FailOpen);
        let shutdown = CancellationToken::new();
        shutdown.cancel("closing");

        let result: Result<(), &str> = gate
            .with_backoff(&shutdown, || async { Err("down") }, Result::is_err)
            .await;
        assert_eq!(result, Err("down"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_backoff_stops_when_resource_unreachable() {
        crate::testing::init_tracing();
        let res = Resources::new(Environment::new());
        let retry = Arc::new(MockRetry::new(|| Err(StreamflowError::Shutdown("store down".into()))));
        res.store_retry("broken", retry.clone());
        let gate = RetryGate::new(res.clone(), "broken", AccessErrorPolicy::FailOpen);
        let calls = &AtomicU32::new(0);
        let shutdown = CancellationToken::new();

        let result: Result<(), &str> = gate
            .with_backoff(
                &shutdown,
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("down")
                },
                Result::is_err,
            )
            .await;

        assert_eq!(result, Err("down"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(retry.trigger_count(), 1);
        assert!(res.join_escalation("broken"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_peer_recovery_keeps_escalation_running() {
        crate::testing::init_tracing();
        let gate = RetryGate::new(resources_with_local(5), "backoff", AccessErrorPolicy::FailOpen);
        let shutdown = CancellationToken::new();
        let recovering_calls = &AtomicU32::new(0);
        let failing_calls = &AtomicU32::new(0);

        let recovering = gate.with_backoff(
            &shutdown,
            move || async move {
                if recovering_calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err("flaky")
                } else {
                    Ok(())
                }
            },
            Result::is_err,
        );
        let failing = gate.with_backoff(
            &shutdown,
            move || async move {
                failing_calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), &str>("down")
            },
            Result::is_err,
        );
        let (recovered, failed) = tokio::join!(recovering, failing);

        assert_eq!(recovered, Ok(()));
        assert_eq!(failed, Err("down"));
        assert_eq!(recovering_calls.load(Ordering::SeqCst), 2);
        assert_eq!(failing_calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_escalation_triggers_and_resets_once() {
        let res = Resources::new(Environment::new());
        let retry = Arc::new(MockRetry::fixed(Duration::from_millis(5)));
        res.store_retry("r", retry.clone());
        let first = RetryGate::new(res.clone(), "r", AccessErrorPolicy::FailOpen);
        let second = RetryGate::new(res, "r", AccessErrorPolicy::FailOpen);

        first.escalate().await;
        second.escalate().await;
        assert_eq!(retry.trigger_count(), 1);

        first.recover().await;
        assert_eq!(retry.reset_count(), 0);
        second.recover().await;
        assert_eq!(retry.reset_count(), 1);
    }
}
