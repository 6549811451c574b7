use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::UnitOfWork;
use crate::config::{ConfigSource, Settings};
use crate::error::Result;
use crate::session::{DbSessionFactory, Session, SessionFactory};

/// Creates units of work against one lazily built session factory.
///
/// Configuration is loaded at most once and the session factory is built at
/// most once, even under concurrent first use.
pub struct UnitOfWorkFactory<F: SessionFactory = DbSessionFactory> {
    source: ConfigSource,
    settings: OnceCell<Settings>,
    session_factory: OnceCell<F>,
}

impl<F: SessionFactory> UnitOfWorkFactory<F> {
    pub fn new(source: ConfigSource) -> Self {
        Self {
            source,
            settings: OnceCell::new(),
            session_factory: OnceCell::new(),
        }
    }

    /// Uses `settings` as-is instead of reading a config file.
    pub fn from_settings(settings: Settings) -> Self {
        Self {
            source: ConfigSource::DefaultFile,
            settings: OnceCell::new_with(Some(settings)),
            session_factory: OnceCell::new(),
        }
    }

    /// Uses an already built session factory with default settings.
    pub fn with_session_factory(session_factory: F) -> Self {
        Self::with_parts(Settings::default(), session_factory)
    }

    pub fn with_parts(settings: Settings, session_factory: F) -> Self {
        Self {
            source: ConfigSource::DefaultFile,
            settings: OnceCell::new_with(Some(settings)),
            session_factory: OnceCell::new_with(Some(session_factory)),
        }
    }

    pub async fn configuration(&self) -> Result<&Settings> {
        self.settings
            .get_or_try_init(|| async { Settings::load(&self.source) })
            .await
    }

    pub async fn session_factory(&self) -> Result<&F> {
        self.session_factory
            .get_or_try_init(|| async {
                let settings = self.configuration().await?;
                info!("Building session factory");
                F::build(settings).await
            })
            .await
    }

    /// Opens a fresh session and wraps it. No transaction is started.
    pub async fn create(&self) -> Result<UnitOfWork<F::Session>> {
        let settings = self.configuration().await?;
        let mut session = self.session_factory().await?.open_session().await?;
        session.set_flush_mode(settings.session.flush_mode);
        debug!(flush_mode = ?settings.session.flush_mode, "Created unit of work");
        Ok(UnitOfWork::new(session).with_isolation(settings.session.isolation_level))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionSettings;
    use crate::session::{FlushMode, TransactionIsolation};
    use crate::test_utils::{RecordingSessionFactory, SessionCall};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_session_factory_is_built_once() {
        let factory: UnitOfWorkFactory<RecordingSessionFactory> =
            UnitOfWorkFactory::from_settings(Settings::default());

        let first = factory.session_factory().await.unwrap() as *const _;
        let second = factory.session_factory().await.unwrap() as *const _;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_create_applies_session_settings() {
        let settings = Settings {
            session: SessionSettings {
                flush_mode: FlushMode::Manual,
                isolation_level: Some(TransactionIsolation::RepeatableRead),
            },
            ..Settings::default()
        };
        let sessions = RecordingSessionFactory::default();
        let log = sessions.log();
        let factory = UnitOfWorkFactory::with_parts(settings, sessions);

        let mut uow = factory.create().await.unwrap();
        assert_eq!(uow.session().flush_mode(), FlushMode::Manual);
        assert!(!uow.is_in_active_transaction());

        uow.begin_transaction().await.unwrap();
        assert_eq!(
            log.calls(),
            vec![SessionCall::Begin(Some(TransactionIsolation::RepeatableRead))]
        );
    }

    #[tokio::test]
    async fn test_default_flush_mode_is_commit() {
        let factory = UnitOfWorkFactory::with_session_factory(RecordingSessionFactory::default());
        let uow = factory.create().await.unwrap();
        assert_eq!(uow.session().flush_mode(), FlushMode::Commit);
    }

    #[tokio::test]
    async fn test_each_create_opens_a_new_session() {
        let sessions = RecordingSessionFactory::default();
        let opened = sessions.clone();
        let factory = UnitOfWorkFactory::with_session_factory(sessions);

        let _first = factory.create().await.unwrap();
        let _second = factory.create().await.unwrap();
        assert_eq!(opened.sessions_opened(), 2);
    }
}
