// src/session/guard.rs — At most one job per session
//
// `ExecutionGuard::acquire` waits (bounded) for the session's single gate
// permit and flips Active -> Busy. The returned `JobGuard` flips it back when
// released or dropped, so no exit path can strand a session in Busy.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OwnedSemaphorePermit;

use super::{RetryOutcome, Session};
use crate::infra::config::SessionPolicy;
use crate::infra::errors::SessionError;

#[derive(Debug, Clone, Copy)]
pub struct ExecutionGuard {
    timeout: Duration,
    retry_budget: u32,
}

impl ExecutionGuard {
    pub fn new(timeout: Duration, retry_budget: u32) -> Self {
        Self {
            timeout,
            retry_budget: retry_budget.max(1),
        }
    }

    pub fn from_policy(policy: &SessionPolicy) -> Self {
        Self::new(policy.acquire_timeout, policy.retry_budget)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn retry_budget(&self) -> u32 {
        self.retry_budget
    }

    /// Claim the session for one job, waiting at most the configured timeout.
    pub async fn acquire(&self, session: &Arc<Session>) -> Result<JobGuard, SessionError> {
        self.acquire_within(session, self.timeout).await
    }

    pub async fn acquire_within(
        &self,
        session: &Arc<Session>,
        timeout: Duration,
    ) -> Result<JobGuard, SessionError> {
        let id = session.id();
        let permit = match tokio::time::timeout(timeout, session.gate().acquire_owned()).await {
            Err(_elapsed) => {
                tracing::debug!(session_id = %id, timeout_ms = timeout.as_millis() as u64, "acquire timed out");
                return Err(SessionError::Busy(id));
            }
            // The gate closes when the session turns terminal.
            Ok(Err(_closed)) => {
                return Err(session
                    .terminal_error()
                    .unwrap_or(SessionError::Invariant(format!(
                        "session {id}: gate closed while not terminal"
                    ))));
            }
            Ok(Ok(permit)) => permit,
        };

        session.begin_job()?;
        tracing::debug!(session_id = %id, "job started");
        Ok(JobGuard {
            session: Arc::clone(session),
            permit: Some(permit),
            retry_budget: self.retry_budget,
        })
    }
}

/// Exclusive claim on a session. Releases on drop.
#[derive(Debug)]
pub struct JobGuard {
    session: Arc<Session>,
    permit: Option<OwnedSemaphorePermit>,
    retry_budget: u32,
}

impl JobGuard {
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn is_released(&self) -> bool {
        self.permit.is_none()
    }

    /// Failures count against the retry budget; a success clears it.
    pub fn record_outcome(&self, success: bool) -> RetryOutcome {
        let outcome = self.session.record_outcome(success, self.retry_budget);
        match outcome {
            RetryOutcome::Counted { failures } => tracing::warn!(
                session_id = %self.session.id(),
                failures,
                budget = self.retry_budget,
                "job failed"
            ),
            RetryOutcome::Exhausted { failures } => tracing::warn!(
                session_id = %self.session.id(),
                failures,
                "retry budget exhausted, session invalidated"
            ),
            RetryOutcome::Reset | RetryOutcome::Ignored => {}
        }
        outcome
    }

    /// Busy -> Active and hand the gate to the next waiter. Idempotent.
    pub fn release(&mut self) {
        let Some(permit) = self.permit.take() else {
            return;
        };
        self.session.end_job();
        drop(permit);
        tracing::debug!(session_id = %self.session.id(), "job released");
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::{image_data, tabular_data};
    use crate::session::{InvalidationReason, SessionStatus};

    fn guard() -> ExecutionGuard {
        ExecutionGuard::new(Duration::from_millis(50), 3)
    }

    #[tokio::test]
    async fn test_acquire_marks_busy_and_release_restores() {
        let s = Arc::new(Session::new(image_data(), vec![]));
        let mut job = guard().acquire(&s).await.unwrap();
        assert_eq!(s.status(), SessionStatus::Busy);
        job.release();
        assert_eq!(s.status(), SessionStatus::Active);
        assert!(job.is_released());
    }

    #[tokio::test]
    async fn test_second_acquire_is_busy() {
        let s = Arc::new(Session::new(image_data(), vec![]));
        let _job = guard().acquire(&s).await.unwrap();
        let err = guard().acquire(&s).await.unwrap_err();
        assert!(matches!(err, SessionError::Busy(_)));
        assert_eq!(s.status(), SessionStatus::Busy);
    }

    #[tokio::test]
    async fn test_waiter_gets_session_after_release() {
        let s = Arc::new(Session::new(image_data(), vec![]));
        let job = guard().acquire(&s).await.unwrap();

        let waiter = {
            let s = Arc::clone(&s);
            tokio::spawn(async move {
                ExecutionGuard::new(Duration::from_secs(5), 3)
                    .acquire(&s)
                    .await
                    .map(|_| ())
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(job);
        waiter.await.unwrap().unwrap();
        assert_eq!(s.status(), SessionStatus::Active);
    }

    #[tokio::test]
    async fn test_double_release_is_noop() {
        let s = Arc::new(Session::new(image_data(), vec![]));
        let mut job = guard().acquire(&s).await.unwrap();
        job.release();
        job.release();
        drop(job);
        assert_eq!(s.status(), SessionStatus::Active);
        assert_eq!(s.gate().available_permits(), 1);

        // The session is still usable exactly once at a time.
        let _again = guard().acquire(&s).await.unwrap();
        assert!(guard().acquire(&s).await.is_err());
    }

    #[tokio::test]
    async fn test_drop_releases_on_error_path() {
        async fn failing_job(g: ExecutionGuard, s: &Arc<Session>) -> Result<(), SessionError> {
            let _job = g.acquire(s).await?;
            Err(SessionError::InvalidInput("boom".into()))
        }
        let s = Arc::new(Session::new(tabular_data(), vec![]));
        assert!(failing_job(guard(), &s).await.is_err());
        assert_eq!(s.status(), SessionStatus::Active);
    }

    #[tokio::test]
    async fn test_retry_budget_invalidates_and_blocks_access() {
        let s = Arc::new(Session::new(tabular_data(), vec![]));
        for attempt in 1..=3 {
            let job = guard().acquire(&s).await.unwrap();
            let outcome = job.record_outcome(false);
            if attempt < 3 {
                assert_eq!(outcome, RetryOutcome::Counted { failures: attempt });
            } else {
                assert_eq!(outcome, RetryOutcome::Exhausted { failures: 3 });
            }
        }
        assert_eq!(s.status(), SessionStatus::Invalidated);
        let err = guard().acquire(&s).await.unwrap_err();
        assert!(matches!(err, SessionError::TooManyRetries { budget: 3, .. }));
    }

    #[tokio::test]
    async fn test_waiters_woken_by_invalidation() {
        let s = Arc::new(Session::new(image_data(), vec![]));
        let _job = guard().acquire(&s).await.unwrap();
        let waiter = {
            let s = Arc::clone(&s);
            tokio::spawn(async move {
                ExecutionGuard::new(Duration::from_secs(5), 3)
                    .acquire(&s)
                    .await
                    .map(|_| ())
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        s.invalidate(InvalidationReason::Cleanup);
        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, SessionError::Invalidated(_)));
    }

    #[tokio::test]
    async fn test_release_after_invalidation_keeps_terminal_state() {
        let s = Arc::new(Session::new(image_data(), vec![]));
        let mut job = guard().acquire(&s).await.unwrap();
        s.invalidate(InvalidationReason::Cleanup);
        job.release();
        assert_eq!(s.status(), SessionStatus::Invalidated);
    }

    #[tokio::test]
    async fn test_concurrent_acquires_only_one_wins() {
        let s = Arc::new(Session::new(image_data(), vec![]));
        let g = ExecutionGuard::new(Duration::from_millis(10), 3);
        let mut handles = Vec::new();
        for _ in 0..16 {
            let s = Arc::clone(&s);
            handles.push(tokio::spawn(async move {
                match g.acquire(&s).await {
                    Ok(job) => {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        drop(job);
                        true
                    }
                    Err(_) => false,
                }
            }));
        }
        let mut winners = 0;
        for h in handles {
            if h.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(s.status(), SessionStatus::Active);
    }
}
