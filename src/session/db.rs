use std::fmt;

use async_trait::async_trait;
use migration::MigratorTrait;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectOptions, Database, DatabaseConnection,
    DatabaseTransaction, EntityTrait, IntoActiveModel, PaginatorTrait, QueryFilter, Select,
    TransactionTrait,
};
use tracing::{debug, error, info, warn};

use super::pending::{self, PendingWrite, QueuedWrite, WriteKind};
use super::{EntityKey, FlushMode, IdentityMap, Session, SessionFactory, TransactionIsolation};
use crate::config::Settings;
use crate::db::Persistent;
use crate::error::{AppError, Result};

/// Session backed by a sea-orm connection pool.
///
/// Inserts of transient entities run immediately so the database can assign
/// the id. Updates and deletes are queued and reach the database on flush.
pub struct DbSession {
    connection: DatabaseConnection,
    transaction: Option<DatabaseTransaction>,
    flush_mode: FlushMode,
    identity_map: IdentityMap,
    pending: Vec<Box<dyn PendingWrite>>,
    open: bool,
}

impl DbSession {
    pub fn new(connection: DatabaseConnection) -> Self {
        Self {
            connection,
            transaction: None,
            flush_mode: FlushMode::default(),
            identity_map: IdentityMap::default(),
            pending: Vec::new(),
            open: true,
        }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.connection
    }

    pub fn pending_writes(&self) -> usize {
        self.pending.len()
    }

    pub fn tracked_entities(&self) -> usize {
        self.identity_map.len()
    }

    pub fn is_tracked<M: Persistent>(&self, id: i32) -> bool {
        self.identity_map.contains(&EntityKey::of::<M>(id))
    }

    /// Starts a query over `M`'s table; run it with [`DbSession::list`].
    pub fn query<M: Persistent>(&self) -> Select<M::Entity> {
        M::Entity::find()
    }

    /// Point lookup by primary key. `None` when the row does not exist or
    /// has a delete queued in this session.
    pub async fn get<M: Persistent>(&mut self, id: i32) -> Result<Option<M>> {
        self.ensure_open()?;
        let key = EntityKey::of::<M>(id);
        if self.is_pending_delete(&key) {
            return Ok(None);
        }
        if let Some(tracked) = self.identity_map.get::<M>(&key) {
            return Ok(Some(tracked));
        }

        self.auto_flush().await?;
        let select = M::Entity::find().filter(M::id_column().eq(id));
        let found = match &self.transaction {
            Some(txn) => select.one(txn).await?,
            None => select.one(&self.connection).await?,
        };
        if let Some(model) = &found {
            self.remember(model.clone());
        }
        Ok(found)
    }

    /// Runs `select` and reconciles the rows with the session: rows with a
    /// queued delete are dropped and already-tracked rows come back as the
    /// session's copy.
    pub async fn list<M: Persistent>(&mut self, select: Select<M::Entity>) -> Result<Vec<M>> {
        self.ensure_open()?;
        self.auto_flush().await?;
        let rows = match &self.transaction {
            Some(txn) => select.all(txn).await?,
            None => select.all(&self.connection).await?,
        };

        let mut models = Vec::with_capacity(rows.len());
        for row in rows {
            let key = EntityKey::of::<M>(row.id());
            if self.is_pending_delete(&key) {
                continue;
            }
            match self.identity_map.get::<M>(&key) {
                Some(tracked) => models.push(tracked),
                None => {
                    self.remember(row.clone());
                    models.push(row);
                }
            }
        }
        Ok(models)
    }

    /// Counts the rows of `M` in the database. Queued writes are only
    /// reflected once flushed.
    pub async fn count<M: Persistent>(&mut self) -> Result<u64> {
        self.ensure_open()?;
        self.auto_flush().await?;
        let select = M::Entity::find();
        let count = match &self.transaction {
            Some(txn) => PaginatorTrait::count(select, txn).await?,
            None => PaginatorTrait::count(select, &self.connection).await?,
        };
        Ok(count)
    }

    /// Insert-or-update keyed on identity. A transient entity is inserted
    /// right away and `entity` picks up the assigned id; a persisted one is
    /// queued for update.
    pub async fn save<M>(&mut self, entity: &mut M) -> Result<()>
    where
        M: Persistent + IntoActiveModel<M::ActiveModel>,
    {
        self.ensure_open()?;

        if entity.is_transient() {
            let mut active = entity.clone().into_active_model();
            active.not_set(M::id_column());
            let inserted = match &self.transaction {
                Some(txn) => active.insert(txn).await?,
                None => active.insert(&self.connection).await?,
            };
            debug!(id = inserted.id(), "Inserted entity");
            self.remember(inserted.clone());
            *entity = inserted;
            return Ok(());
        }

        let key = EntityKey::of::<M>(entity.id());
        self.pending.retain(|write| write.key() != key);
        let active = entity.clone().into_active_model().reset_all();
        self.pending.push(Box::new(QueuedWrite::update(key, active)));
        self.remember(entity.clone());
        Ok(())
    }

    /// Queues a delete. Deleting a transient entity does nothing.
    pub fn delete<M>(&mut self, entity: &M) -> Result<()>
    where
        M: Persistent + IntoActiveModel<M::ActiveModel>,
    {
        self.ensure_open()?;
        if entity.is_transient() {
            debug!("Ignoring delete of a transient entity");
            return Ok(());
        }

        let key = EntityKey::of::<M>(entity.id());
        self.identity_map.remove(&key);
        self.pending.retain(|write| write.key() != key);
        self.pending.push(Box::new(QueuedWrite::delete(
            key,
            entity.clone().into_active_model(),
        )));
        Ok(())
    }

    fn remember<M: Persistent>(&mut self, model: M) {
        let key = EntityKey::of::<M>(model.id());
        let owner = model.owner();
        self.identity_map.insert_owned(key, owner, model);
    }

    /// Rows the database removed along with a flushed delete are no longer
    /// readable from the map.
    fn evict_cascaded(&mut self, deleted: &[EntityKey]) {
        let evicted = self.identity_map.evict_owned_by(deleted);
        if evicted > 0 {
            debug!(evicted, "Evicted rows removed by cascading deletes");
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(AppError::SessionClosed)
        }
    }

    fn is_pending_delete(&self, key: &EntityKey) -> bool {
        self.pending
            .iter()
            .any(|write| write.key() == *key && write.kind() == WriteKind::Delete)
    }

    async fn auto_flush(&mut self) -> Result<()> {
        if self.flush_mode == FlushMode::Auto && !self.pending.is_empty() {
            self.flush().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Session for DbSession {
    fn flush_mode(&self) -> FlushMode {
        self.flush_mode
    }

    fn set_flush_mode(&mut self, mode: FlushMode) {
        self.flush_mode = mode;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn is_transaction_active(&self) -> bool {
        self.transaction.is_some()
    }

    async fn begin_transaction(&mut self, isolation: Option<TransactionIsolation>) -> Result<()> {
        self.ensure_open()?;
        if self.transaction.is_some() {
            return Err(AppError::TransactionAlreadyActive);
        }

        let txn = self
            .connection
            .begin_with_config(isolation.map(Into::into), None)
            .await?;
        self.transaction = Some(txn);
        debug!(?isolation, "Transaction started");
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;
        let txn = self.transaction.take().ok_or(AppError::NoActiveTransaction)?;

        if self.flush_mode != FlushMode::Manual {
            let writes = std::mem::take(&mut self.pending);
            let deleted = pending::deleted_keys(&writes);
            if let Err(err) = pending::apply_all(writes, &txn).await {
                self.identity_map.clear();
                if let Err(rollback_err) = txn.rollback().await {
                    error!("Rollback after failed flush also failed: {}", rollback_err);
                }
                return Err(err.into());
            }
            self.evict_cascaded(&deleted);
        }

        txn.commit().await?;
        debug!("Transaction committed");
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.ensure_open()?;
        let txn = self.transaction.take().ok_or(AppError::NoActiveTransaction)?;
        self.pending.clear();
        self.identity_map.clear();
        txn.rollback().await?;
        debug!("Transaction rolled back");
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.pending.is_empty() {
            return Ok(());
        }

        let writes = std::mem::take(&mut self.pending);
        let count = writes.len();
        let deleted = pending::deleted_keys(&writes);
        match &self.transaction {
            Some(txn) => pending::apply_all(writes, txn).await?,
            None => {
                let txn = self.connection.begin().await?;
                pending::apply_all(writes, &txn).await?;
                txn.commit().await?;
            }
        }
        self.evict_cascaded(&deleted);
        debug!(writes = count, "Session flushed");
        Ok(())
    }

    fn clear(&mut self) {
        self.pending.clear();
        self.identity_map.clear();
    }

    async fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.clear();
        if let Some(txn) = self.transaction.take() {
            warn!("Closing session with an active transaction; rolling back");
            txn.rollback().await?;
        }
        debug!("Session closed");
        Ok(())
    }
}

impl fmt::Debug for DbSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbSession")
            .field("open", &self.open)
            .field("flush_mode", &self.flush_mode)
            .field("in_transaction", &self.transaction.is_some())
            .field("identity_map", &self.identity_map)
            .field("pending_writes", &self.pending.len())
            .finish()
    }
}

/// Hands out [`DbSession`]s over one shared connection pool.
#[derive(Clone, Debug)]
pub struct DbSessionFactory {
    connection: DatabaseConnection,
}

impl DbSessionFactory {
    pub fn new(connection: DatabaseConnection) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.connection
    }
}

#[async_trait]
impl SessionFactory for DbSessionFactory {
    type Session = DbSession;

    async fn build(settings: &Settings) -> Result<Self> {
        let database = &settings.database;
        let mut options = ConnectOptions::new(database.url.clone());
        options
            .max_connections(database.max_connections)
            .connect_timeout(database.connect_timeout())
            .sqlx_logging(database.sqlx_logging);
        if database.is_in_memory() {
            options.max_connections(1).min_connections(1);
        }

        let connection = Database::connect(options).await?;
        info!("Connected to database");

        if database.run_migrations {
            migration::Migrator::up(&connection, None).await?;
            info!("Database migrations completed");
        }

        Ok(Self::new(connection))
    }

    async fn open_session(&self) -> Result<DbSession> {
        Ok(DbSession::new(self.connection.clone()))
    }
}
