//! Unit of work: one session, at most one transaction at a time.
//!
//! A [`UnitOfWork`] is created by the [`UnitOfWorkFactory`], usually through
//! a [`UnitOfWorkRegistry`] that tracks the unit of work of the current
//! request. Repositories share it as a [`SharedUnitOfWork`].

pub mod ambient;
pub mod factory;
pub mod registry;

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::Result;
use crate::session::{DbSession, Session, TransactionIsolation};

pub use factory::UnitOfWorkFactory;
pub use registry::UnitOfWorkRegistry;

/// A unit of work shared between the repositories of one request.
pub type SharedUnitOfWork<S = DbSession> = Arc<tokio::sync::Mutex<UnitOfWork<S>>>;

type DisposeHook = Box<dyn FnOnce() + Send>;

pub struct UnitOfWork<S: Session = DbSession> {
    session: S,
    default_isolation: Option<TransactionIsolation>,
    on_dispose: Option<DisposeHook>,
    disposed: bool,
}

impl<S: Session> UnitOfWork<S> {
    pub fn new(session: S) -> Self {
        Self {
            session,
            default_isolation: None,
            on_dispose: None,
            disposed: false,
        }
    }

    /// Isolation level used by [`UnitOfWork::begin_transaction`].
    pub fn with_isolation(mut self, isolation: Option<TransactionIsolation>) -> Self {
        self.default_isolation = isolation;
        self
    }

    /// Runs `hook` exactly once, when the unit of work is disposed or dropped.
    pub(crate) fn on_dispose(&mut self, hook: impl FnOnce() + Send + 'static) {
        self.on_dispose = Some(Box::new(hook));
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }

    pub fn default_isolation(&self) -> Option<TransactionIsolation> {
        self.default_isolation
    }

    pub fn is_in_active_transaction(&self) -> bool {
        self.session.is_transaction_active()
    }

    /// Begins a transaction unless one is already running. Returns whether a
    /// new transaction was started.
    pub async fn begin_transaction(&mut self) -> Result<bool> {
        self.begin(self.default_isolation).await
    }

    pub async fn begin_transaction_with(&mut self, isolation: TransactionIsolation) -> Result<bool> {
        self.begin(Some(isolation)).await
    }

    async fn begin(&mut self, isolation: Option<TransactionIsolation>) -> Result<bool> {
        if self.session.is_transaction_active() {
            debug!("Transaction already active, not starting another");
            return Ok(false);
        }
        self.session.begin_transaction(isolation).await?;
        Ok(true)
    }

    /// Commits on success, rolls back otherwise. Does nothing without an
    /// active transaction.
    pub async fn finish_transaction(&mut self, success: bool) -> Result<()> {
        if !self.session.is_transaction_active() {
            debug!(success, "No active transaction to finish");
            return Ok(());
        }
        if success {
            self.session.commit().await
        } else {
            self.session.rollback().await
        }
    }

    pub async fn commit(&mut self) -> Result<()> {
        self.finish_transaction(true).await
    }

    pub async fn rollback(&mut self) -> Result<()> {
        self.finish_transaction(false).await
    }

    /// Pushes queued writes and detaches everything the session tracks.
    /// Skipped outside a transaction.
    pub async fn flush_and_clear(&mut self) -> Result<()> {
        if !self.session.is_transaction_active() {
            debug!("Not in a transaction, skipping flush and clear");
            return Ok(());
        }
        self.session.flush().await?;
        self.session.clear();
        Ok(())
    }

    /// Flushes inside a short read-committed transaction of its own, or
    /// inside the running one if there is one.
    pub async fn transactional_flush(&mut self) -> Result<()> {
        self.transactional_flush_with(TransactionIsolation::ReadCommitted)
            .await
    }

    pub async fn transactional_flush_with(&mut self, isolation: TransactionIsolation) -> Result<()> {
        if self.session.is_transaction_active() {
            return self.session.flush().await;
        }

        self.session.begin_transaction(Some(isolation)).await?;
        if let Err(err) = self.session.commit().await {
            if self.session.is_transaction_active() {
                if let Err(rollback_err) = self.session.rollback().await {
                    warn!("Rollback after failed commit also failed: {}", rollback_err);
                }
            }
            return Err(err);
        }
        Ok(())
    }

    /// Closes the session and signals completion. Safe to call twice.
    pub async fn dispose(&mut self) -> Result<()> {
        if self.disposed {
            return Ok(());
        }
        self.disposed = true;
        let closed = self.session.close().await;
        self.fire_dispose_hook();
        debug!("Unit of work disposed");
        closed
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn into_shared(self) -> SharedUnitOfWork<S> {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    fn fire_dispose_hook(&mut self) {
        if let Some(hook) = self.on_dispose.take() {
            hook();
        }
    }
}

impl<S: Session> Drop for UnitOfWork<S> {
    fn drop(&mut self) {
        if self.disposed {
            return;
        }
        if self.session.is_transaction_active() {
            warn!("Unit of work dropped with an active transaction; it will be rolled back");
        }
        self.session.clear();
        self.fire_dispose_hook();
    }
}

impl<S: Session + fmt::Debug> fmt::Debug for UnitOfWork<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("session", &self.session)
            .field("default_isolation", &self.default_isolation)
            .field("disposed", &self.disposed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::test_utils::{RecordingSession, SessionCall};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_begin_transaction_is_idempotent() {
        let session = RecordingSession::new();
        let log = session.log();
        let mut uow = UnitOfWork::new(session);

        assert!(uow.begin_transaction().await.unwrap());
        assert!(!uow.begin_transaction().await.unwrap());
        assert!(uow.is_in_active_transaction());
        assert_eq!(log.calls(), vec![SessionCall::Begin(None)]);
    }

    #[tokio::test]
    async fn test_begin_uses_default_isolation() {
        let session = RecordingSession::new();
        let log = session.log();
        let mut uow = UnitOfWork::new(session).with_isolation(Some(TransactionIsolation::Serializable));

        uow.begin_transaction().await.unwrap();
        assert_eq!(
            log.calls(),
            vec![SessionCall::Begin(Some(TransactionIsolation::Serializable))]
        );
    }

    #[tokio::test]
    async fn test_finish_transaction_commits_or_rolls_back() {
        let session = RecordingSession::new();
        let log = session.log();
        let mut uow = UnitOfWork::new(session);

        uow.begin_transaction().await.unwrap();
        uow.finish_transaction(true).await.unwrap();
        assert!(!uow.is_in_active_transaction());

        uow.begin_transaction().await.unwrap();
        uow.finish_transaction(false).await.unwrap();

        assert_eq!(
            log.calls(),
            vec![
                SessionCall::Begin(None),
                SessionCall::Commit,
                SessionCall::Begin(None),
                SessionCall::Rollback,
            ]
        );
    }

    #[tokio::test]
    async fn test_finish_without_transaction_is_noop() {
        let session = RecordingSession::new();
        let log = session.log();
        let mut uow = UnitOfWork::new(session);

        uow.finish_transaction(true).await.unwrap();
        uow.rollback().await.unwrap();
        assert!(log.calls().is_empty());
    }

    #[tokio::test]
    async fn test_flush_and_clear_skipped_outside_transaction() {
        let session = RecordingSession::new();
        let log = session.log();
        let mut uow = UnitOfWork::new(session);

        uow.flush_and_clear().await.unwrap();
        assert!(log.calls().is_empty());

        uow.begin_transaction().await.unwrap();
        uow.flush_and_clear().await.unwrap();
        assert_eq!(
            log.calls(),
            vec![SessionCall::Begin(None), SessionCall::Flush, SessionCall::Clear]
        );
    }

    #[tokio::test]
    async fn test_transactional_flush_rolls_back_failed_commit() {
        let session = RecordingSession::failing_commit();
        let log = session.log();
        let mut uow = UnitOfWork::new(session);

        let err = uow.transactional_flush().await.unwrap_err();
        assert!(matches!(err, AppError::Other(_)));
        assert!(!uow.is_in_active_transaction());
        assert_eq!(
            log.calls(),
            vec![
                SessionCall::Begin(Some(TransactionIsolation::ReadCommitted)),
                SessionCall::Commit,
                SessionCall::Rollback,
            ]
        );
    }

    #[tokio::test]
    async fn test_transactional_flush_inside_running_transaction() {
        let session = RecordingSession::new();
        let log = session.log();
        let mut uow = UnitOfWork::new(session);

        uow.begin_transaction().await.unwrap();
        uow.transactional_flush().await.unwrap();
        assert!(uow.is_in_active_transaction());
        assert_eq!(log.calls(), vec![SessionCall::Begin(None), SessionCall::Flush]);
    }

    #[tokio::test]
    async fn test_dispose_fires_hook_once() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let session = RecordingSession::new();
        let log = session.log();
        let mut uow = UnitOfWork::new(session);
        uow.on_dispose(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        uow.dispose().await.unwrap();
        uow.dispose().await.unwrap();
        drop(uow);

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(log.calls(), vec![SessionCall::Close]);
    }

    #[tokio::test]
    async fn test_drop_fires_hook() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let mut uow = UnitOfWork::new(RecordingSession::new());
        uow.on_dispose(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        uow.begin_transaction().await.unwrap();

        drop(uow);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
