use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

/// Identity of one row: the model type plus its primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityKey {
    entity: TypeId,
    id: i32,
}

impl EntityKey {
    pub fn of<M: 'static>(id: i32) -> Self {
        Self {
            entity: TypeId::of::<M>(),
            id,
        }
    }

    pub fn id(&self) -> i32 {
        self.id
    }
}

struct Entry {
    model: Box<dyn Any + Send + Sync>,
    owner: Option<EntityKey>,
}

/// One in-session copy per loaded row.
#[derive(Default)]
pub struct IdentityMap {
    entries: HashMap<EntityKey, Entry>,
}

impl IdentityMap {
    pub fn get<M: Clone + 'static>(&self, key: &EntityKey) -> Option<M> {
        self.entries
            .get(key)
            .and_then(|entry| entry.model.downcast_ref::<M>())
            .cloned()
    }

    pub fn insert<M: Send + Sync + 'static>(&mut self, key: EntityKey, model: M) {
        self.insert_owned(key, None, model);
    }

    /// Stores `model` as a row that goes away with `owner`.
    pub fn insert_owned<M: Send + Sync + 'static>(
        &mut self,
        key: EntityKey,
        owner: Option<EntityKey>,
        model: M,
    ) {
        let model = Box::new(model);
        self.entries.insert(key, Entry { model, owner });
    }

    /// Drops every entry owned, directly or through other entries, by one
    /// of `deleted`. Returns how many were dropped.
    pub fn evict_owned_by(&mut self, deleted: &[EntityKey]) -> usize {
        let mut pending: Vec<EntityKey> = deleted.to_vec();
        let mut evicted = 0;
        while let Some(owner) = pending.pop() {
            let owned: Vec<EntityKey> = self
                .entries
                .iter()
                .filter(|(_, entry)| entry.owner == Some(owner))
                .map(|(key, _)| *key)
                .collect();
            for key in owned {
                self.entries.remove(&key);
                pending.push(key);
                evicted += 1;
            }
        }
        evicted
    }

    pub fn remove(&mut self, key: &EntityKey) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn contains(&self, key: &EntityKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl fmt::Debug for IdentityMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityMap")
            .field("entries", &self.entries.len())
            .finish()
    }
}
