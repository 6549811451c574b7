use async_trait::async_trait;
use sea_orm::{
    ActiveModelBehavior, ActiveModelTrait, DatabaseTransaction, DbErr, EntityTrait, IntoActiveModel,
};
use tracing::warn;

use super::EntityKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteKind {
    Update,
    Delete,
}

/// A write held back until the session flushes.
#[async_trait]
pub(crate) trait PendingWrite: Send + Sync {
    fn key(&self) -> EntityKey;

    fn kind(&self) -> WriteKind;

    async fn apply(self: Box<Self>, txn: &DatabaseTransaction) -> Result<(), DbErr>;
}

pub(crate) struct QueuedWrite<A> {
    key: EntityKey,
    kind: WriteKind,
    model: A,
}

impl<A> QueuedWrite<A> {
    pub(crate) fn update(key: EntityKey, model: A) -> Self {
        Self {
            key,
            kind: WriteKind::Update,
            model,
        }
    }

    pub(crate) fn delete(key: EntityKey, model: A) -> Self {
        Self {
            key,
            kind: WriteKind::Delete,
            model,
        }
    }
}

#[async_trait]
impl<A> PendingWrite for QueuedWrite<A>
where
    A: ActiveModelTrait + ActiveModelBehavior + Send + Sync + 'static,
    <A::Entity as EntityTrait>::Model: IntoActiveModel<A>,
{
    fn key(&self) -> EntityKey {
        self.key
    }

    fn kind(&self) -> WriteKind {
        self.kind
    }

    async fn apply(self: Box<Self>, txn: &DatabaseTransaction) -> Result<(), DbErr> {
        let QueuedWrite { key, kind, model } = *self;
        match kind {
            WriteKind::Update => {
                model.update(txn).await?;
            }
            WriteKind::Delete => {
                let result = model.delete(txn).await?;
                if result.rows_affected == 0 {
                    warn!(id = key.id(), "Queued delete matched no rows");
                }
            }
        }
        Ok(())
    }
}

pub(crate) fn deleted_keys(writes: &[Box<dyn PendingWrite>]) -> Vec<EntityKey> {
    writes
        .iter()
        .filter(|write| write.kind() == WriteKind::Delete)
        .map(|write| write.key())
        .collect()
}

/// Applies writes in the order they were queued.
pub(crate) async fn apply_all(
    writes: Vec<Box<dyn PendingWrite>>,
    txn: &DatabaseTransaction,
) -> Result<(), DbErr> {
    for write in writes {
        write.apply(txn).await?;
    }
    Ok(())
}
