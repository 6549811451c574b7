use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::OwnedMappedMutexGuard;
use tracing::debug;

use super::{SharedUnitOfWork, UnitOfWork, UnitOfWorkFactory};
use crate::error::{AppError, Result};
use crate::session::{DbSessionFactory, SessionFactory};

enum Slot<S: crate::session::Session> {
    NotStarted,
    /// `start` is waiting on the factory.
    Starting { id: u64 },
    Started {
        id: u64,
        unit_of_work: Weak<tokio::sync::Mutex<UnitOfWork<S>>>,
    },
}

struct SlotState<S: crate::session::Session> {
    slot: Slot<S>,
    next_id: u64,
}

/// Tracks the unit of work of one request context.
///
/// At most one unit of work is started at a time. The registry returns to
/// not-started as soon as that unit of work is disposed or dropped.
pub struct UnitOfWorkRegistry<F: SessionFactory = DbSessionFactory> {
    factory: Arc<UnitOfWorkFactory<F>>,
    state: Arc<Mutex<SlotState<F::Session>>>,
}

impl<F: SessionFactory> Clone for UnitOfWorkRegistry<F> {
    fn clone(&self) -> Self {
        Self {
            factory: self.factory.clone(),
            state: self.state.clone(),
        }
    }
}

impl<F: SessionFactory> UnitOfWorkRegistry<F> {
    pub fn new(factory: Arc<UnitOfWorkFactory<F>>) -> Self {
        Self {
            factory,
            state: Arc::new(Mutex::new(SlotState {
                slot: Slot::NotStarted,
                next_id: 1,
            })),
        }
    }

    pub fn factory(&self) -> &Arc<UnitOfWorkFactory<F>> {
        &self.factory
    }

    /// Creates the unit of work for this context. Fails with
    /// `UnitOfWorkAlreadyStarted` while another one is live.
    ///
    /// A failed or cancelled start leaves the registry not-started.
    pub async fn start(&self) -> Result<SharedUnitOfWork<F::Session>> {
        let id = {
            let mut state = self.lock();
            if !matches!(state.slot, Slot::NotStarted) {
                return Err(AppError::UnitOfWorkAlreadyStarted);
            }
            let id = state.next_id;
            state.next_id += 1;
            state.slot = Slot::Starting { id };
            id
        };
        let starting = StartingGuard {
            state: &self.state,
            id,
        };

        let mut unit_of_work = self.factory.create().await?;

        let state = Arc::downgrade(&self.state);
        unit_of_work.on_dispose(move || {
            if let Some(state) = state.upgrade() {
                let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
                release_slot(&mut state, id);
            }
        });

        let shared = unit_of_work.into_shared();
        self.lock().slot = Slot::Started {
            id,
            unit_of_work: Arc::downgrade(&shared),
        };
        starting.disarm();
        debug!(id, "Unit of work started");
        Ok(shared)
    }

    pub fn current(&self) -> Result<SharedUnitOfWork<F::Session>> {
        match &self.lock().slot {
            Slot::Started { unit_of_work, .. } => {
                unit_of_work.upgrade().ok_or(AppError::NotInUnitOfWork)
            }
            _ => Err(AppError::NotInUnitOfWork),
        }
    }

    /// Locks the current unit of work and hands out its session.
    pub async fn current_session(&self) -> Result<OwnedMappedMutexGuard<UnitOfWork<F::Session>, F::Session>> {
        let unit_of_work = self.current()?;
        let guard = unit_of_work.lock_owned().await;
        Ok(tokio::sync::OwnedMutexGuard::map(guard, |uow| uow.session_mut()))
    }

    pub fn is_started(&self) -> bool {
        matches!(self.lock().slot, Slot::Started { .. })
    }

    /// Ends the current transaction and disposes the unit of work.
    pub async fn finish(&self, success: bool) -> Result<()> {
        let unit_of_work = self.current()?;
        let mut unit_of_work = unit_of_work.lock().await;
        let finished = unit_of_work.finish_transaction(success).await;
        let disposed = unit_of_work.dispose().await;
        finished.and(disposed)
    }

    fn lock(&self) -> MutexGuard<'_, SlotState<F::Session>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Releases a `Starting` slot unless `start` got as far as `Started`.
struct StartingGuard<'a, S: crate::session::Session> {
    state: &'a Mutex<SlotState<S>>,
    id: u64,
}

impl<S: crate::session::Session> StartingGuard<'_, S> {
    fn disarm(self) {
        std::mem::forget(self);
    }
}

impl<S: crate::session::Session> Drop for StartingGuard<'_, S> {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        release_slot(&mut state, self.id);
    }
}

fn release_slot<S: crate::session::Session>(state: &mut SlotState<S>, id: u64) {
    let owned = match state.slot {
        Slot::Starting { id: current } | Slot::Started { id: current, .. } => current == id,
        Slot::NotStarted => false,
    };
    if owned {
        state.slot = Slot::NotStarted;
        debug!(id, "Unit of work released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::test_utils::{RecordingSessionFactory, SessionCall};
    use pretty_assertions::assert_eq;

    fn registry() -> (UnitOfWorkRegistry<RecordingSessionFactory>, RecordingSessionFactory) {
        let sessions = RecordingSessionFactory::default();
        let factory = UnitOfWorkFactory::with_session_factory(sessions.clone());
        (UnitOfWorkRegistry::new(Arc::new(factory)), sessions)
    }

    #[tokio::test]
    async fn test_current_before_start_fails() {
        let (registry, _) = registry();
        assert!(!registry.is_started());
        assert!(matches!(registry.current(), Err(AppError::NotInUnitOfWork)));
        assert!(matches!(
            registry.current_session().await,
            Err(AppError::NotInUnitOfWork)
        ));
    }

    #[tokio::test]
    async fn test_second_start_fails() {
        let (registry, sessions) = registry();
        let _uow = registry.start().await.unwrap();

        assert!(matches!(
            registry.start().await,
            Err(AppError::UnitOfWorkAlreadyStarted)
        ));
        assert_eq!(sessions.sessions_opened(), 1);
    }

    #[tokio::test]
    async fn test_current_returns_started_unit_of_work() {
        let (registry, _) = registry();
        let started = registry.start().await.unwrap();
        let current = registry.current().unwrap();
        assert!(Arc::ptr_eq(&started, &current));
    }

    #[tokio::test]
    async fn test_dispose_returns_to_not_started() {
        let (registry, _) = registry();
        let uow = registry.start().await.unwrap();
        assert!(registry.is_started());

        uow.lock().await.dispose().await.unwrap();
        assert!(!registry.is_started());

        let _next = registry.start().await.unwrap();
        assert!(registry.is_started());
    }

    #[tokio::test]
    async fn test_drop_returns_to_not_started() {
        let (registry, _) = registry();
        let uow = registry.start().await.unwrap();
        drop(uow);

        assert!(!registry.is_started());
        assert!(matches!(registry.current(), Err(AppError::NotInUnitOfWork)));
    }

    #[tokio::test]
    async fn test_stale_dispose_does_not_release_newer_unit_of_work() {
        let (registry, _) = registry();
        let first = registry.start().await.unwrap();
        first.lock().await.dispose().await.unwrap();

        let _second = registry.start().await.unwrap();
        drop(first);
        assert!(registry.is_started());
    }

    #[tokio::test]
    async fn test_finish_commits_and_disposes() {
        let (registry, sessions) = registry();
        let log = sessions.log();
        let uow = registry.start().await.unwrap();
        uow.lock().await.begin_transaction().await.unwrap();

        registry.finish(true).await.unwrap();
        assert!(!registry.is_started());
        assert_eq!(
            log.calls(),
            vec![SessionCall::Begin(None), SessionCall::Commit, SessionCall::Close]
        );
    }

    #[tokio::test]
    async fn test_failed_start_leaves_registry_not_started() {
        let factory = UnitOfWorkFactory::with_session_factory(RecordingSessionFactory::failing_open());
        let registry = UnitOfWorkRegistry::new(Arc::new(factory));

        assert!(matches!(registry.start().await, Err(AppError::Other(_))));
        assert!(!registry.is_started());
        // The slot is free again, so the next attempt reaches the factory.
        assert!(matches!(registry.start().await, Err(AppError::Other(_))));
    }

    #[tokio::test]
    async fn test_cancelled_start_leaves_registry_not_started() {
        let sessions = RecordingSessionFactory::slow_open(Duration::from_millis(200));
        let factory = UnitOfWorkFactory::with_session_factory(sessions.clone());
        let registry = UnitOfWorkRegistry::new(Arc::new(factory));

        let cancelled = tokio::time::timeout(Duration::from_millis(10), registry.start()).await;
        assert!(cancelled.is_err());
        assert!(!registry.is_started());

        let _uow = registry.start().await.unwrap();
        assert!(registry.is_started());
        assert_eq!(sessions.sessions_opened(), 1);
    }

    #[tokio::test]
    async fn test_start_in_progress_blocks_second_start() {
        let sessions = RecordingSessionFactory::slow_open(Duration::from_millis(50));
        let factory = UnitOfWorkFactory::with_session_factory(sessions);
        let registry = UnitOfWorkRegistry::new(Arc::new(factory));

        let (first, second) = tokio::join!(registry.start(), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            registry.start().await
        });
        assert!(first.is_ok());
        assert!(matches!(second, Err(AppError::UnitOfWorkAlreadyStarted)));
    }

    #[tokio::test]
    async fn test_current_session_locks_the_unit_of_work() {
        let (registry, _) = registry();
        let uow = registry.start().await.unwrap();

        let session = registry.current_session().await.unwrap();
        assert!(uow.try_lock().is_err());
        drop(session);
        assert!(uow.try_lock().is_ok());
    }
}
