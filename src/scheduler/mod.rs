//! Concurrency kernel
//!
//! Backpressure (a global semaphore capping active sessions), per-session
//! serialization (operations against one session run one at a time while
//! different sessions proceed in parallel), cooperative cancellation, and
//! deadline enforcement for long-running operations.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

/// Errors raised by the scheduler.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// No session slot became available within the acquire timeout.
    #[error("session capacity saturated, waited {0:?}")]
    Saturated(Duration),

    /// The operation's cancellation token fired.
    #[error("operation canceled")]
    Canceled,

    /// The operation overran its deadline.
    #[error("operation deadline of {0:?} exceeded")]
    Timeout(Duration),
}

/// Holding one of these keeps a session slot occupied; dropping it frees
/// the slot for the next `create_session`.
#[derive(Debug)]
pub struct SessionSlot {
    _permit: OwnedSemaphorePermit,
}

/// Shared scheduler; clone-free, pass by `Arc`.
pub struct Scheduler {
    session_slots: Arc<Semaphore>,
    session_locks: DashMap<Uuid, Arc<Mutex<()>>>,
    context_locks: DashMap<(Uuid, String), Arc<Mutex<()>>>,
    max_sessions: usize,
}

impl Scheduler {
    #[must_use]
    pub fn new(max_sessions: usize) -> Self {
        Self {
            session_slots: Arc::new(Semaphore::new(max_sessions)),
            session_locks: DashMap::new(),
            context_locks: DashMap::new(),
            max_sessions,
        }
    }

    #[must_use]
    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    #[must_use]
    pub fn available_slots(&self) -> usize {
        self.session_slots.available_permits()
    }

    /// Acquire a session slot, waiting up to `timeout` under saturation.
    pub async fn acquire_session_slot(
        &self,
        timeout: Duration,
    ) -> Result<SessionSlot, SchedulerError> {
        let acquired =
            tokio::time::timeout(timeout, self.session_slots.clone().acquire_owned()).await;
        match acquired {
            Ok(Ok(permit)) => Ok(SessionSlot { _permit: permit }),
            Ok(Err(_)) => Err(SchedulerError::Canceled),
            Err(_) => {
                warn!(
                    max_sessions = self.max_sessions,
                    "session slot acquisition timed out"
                );
                Err(SchedulerError::Saturated(timeout))
            }
        }
    }

    /// Serialize an operation against one session. Operations on different
    /// sessions are unaffected; within one session, DOM-touching work never
    /// interleaves.
    pub async fn run_serialized<F, T>(&self, session_id: Uuid, op: F) -> T
    where
        F: Future<Output = T>,
    {
        let lock = self
            .session_locks
            .entry(session_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;
        op.await
    }

    /// Serialize an operation against one tab context. Resolutions on
    /// different contexts of the same session proceed in parallel; two on
    /// the same context never interleave.
    pub async fn run_context_serialized<F, T>(
        &self,
        session_id: Uuid,
        context_id: &str,
        op: F,
    ) -> T
    where
        F: Future<Output = T>,
    {
        let lock = self
            .context_locks
            .entry((session_id, context_id.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;
        op.await
    }

    /// Drop the serialization locks for a session that no longer exists.
    pub fn release_session(&self, session_id: Uuid) {
        self.session_locks.remove(&session_id);
        self.context_locks.retain(|(id, _), _| *id != session_id);
    }

    /// Run an operation under a deadline and a cancellation token.
    ///
    /// Cancellation and deadlines are cooperative: the future is dropped at
    /// its next suspension point, and callers perform their contextual
    /// cleanup (handle disposal, pipe closure) on the error path.
    pub async fn guarded<F, T>(
        &self,
        deadline: Duration,
        cancel: &CancellationToken,
        op: F,
    ) -> Result<T, SchedulerError>
    where
        F: Future<Output = T>,
    {
        tokio::select! {
            () = cancel.cancelled() => Err(SchedulerError::Canceled),
            outcome = tokio::time::timeout(deadline, op) => {
                outcome.map_err(|_| SchedulerError::Timeout(deadline))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn saturation_blocks_until_timeout() {
        let scheduler = Scheduler::new(1);
        let slot = scheduler
            .acquire_session_slot(Duration::from_millis(50))
            .await
            .expect("first slot");
        let denied = scheduler
            .acquire_session_slot(Duration::from_millis(50))
            .await;
        assert!(matches!(denied, Err(SchedulerError::Saturated(_))));
        drop(slot);
        assert!(
            scheduler
                .acquire_session_slot(Duration::from_millis(50))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn per_session_operations_serialize() {
        let scheduler = Arc::new(Scheduler::new(4));
        let session = Uuid::new_v4();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let scheduler = Arc::clone(&scheduler);
            let in_flight = Arc::clone(&in_flight);
            tasks.push(tokio::spawn(async move {
                scheduler
                    .run_serialized(session, async {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst);
                        assert_eq!(now, 0, "two ops overlapped on one session");
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await;
            }));
        }
        for task in tasks {
            task.await.expect("task");
        }
    }

    #[tokio::test]
    async fn guarded_honors_cancellation_and_deadline() {
        let scheduler = Scheduler::new(1);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let canceled = scheduler
            .guarded(Duration::from_secs(1), &cancel, async { 1 })
            .await;
        assert!(matches!(canceled, Err(SchedulerError::Canceled)));

        let cancel = CancellationToken::new();
        let timed_out = scheduler
            .guarded(Duration::from_millis(10), &cancel, async {
                tokio::time::sleep(Duration::from_secs(5)).await;
            })
            .await;
        assert!(matches!(timed_out, Err(SchedulerError::Timeout(_))));
    }
}
