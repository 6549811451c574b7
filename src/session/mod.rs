//! Session abstraction the unit of work is built on.
//!
//! A [`Session`] is a per-transaction handle to the database with its own
//! identity map and write queue. Sessions are not meant to be shared between
//! concurrent operations; a unit of work owns exactly one.

mod db;
mod identity_map;
mod pending;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::Settings;
use crate::error::Result;

pub use db::{DbSession, DbSessionFactory};
pub use identity_map::{EntityKey, IdentityMap};

/// When queued writes are pushed to the database.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushMode {
    /// Only on an explicit `flush`.
    Manual,
    /// On explicit `flush` and when the transaction commits. Reads never
    /// trigger a flush.
    Commit,
    /// Like `Commit`, and additionally before every query so reads observe
    /// queued writes.
    #[default]
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionIsolation {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl From<TransactionIsolation> for sea_orm::IsolationLevel {
    fn from(level: TransactionIsolation) -> Self {
        match level {
            TransactionIsolation::ReadUncommitted => Self::ReadUncommitted,
            TransactionIsolation::ReadCommitted => Self::ReadCommitted,
            TransactionIsolation::RepeatableRead => Self::RepeatableRead,
            TransactionIsolation::Serializable => Self::Serializable,
        }
    }
}

/// Transaction and lifecycle control over one database session.
#[async_trait]
pub trait Session: Send + 'static {
    fn flush_mode(&self) -> FlushMode;

    fn set_flush_mode(&mut self, mode: FlushMode);

    fn is_open(&self) -> bool;

    fn is_transaction_active(&self) -> bool;

    /// Fails with `TransactionAlreadyActive` when a transaction is running.
    async fn begin_transaction(&mut self, isolation: Option<TransactionIsolation>) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;

    /// Pushes queued writes to the database without ending the transaction.
    async fn flush(&mut self) -> Result<()>;

    /// Detaches every tracked entity and cancels queued writes.
    fn clear(&mut self);

    /// Releases the session. Any active transaction is rolled back.
    async fn close(&mut self) -> Result<()>;
}

/// Builds sessions against one configured database.
#[async_trait]
pub trait SessionFactory: Send + Sync + Sized + 'static {
    type Session: Session;

    async fn build(settings: &Settings) -> Result<Self>;

    async fn open_session(&self) -> Result<Self::Session>;
}
