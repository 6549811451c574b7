use sea_orm::{ActiveModelBehavior, ActiveModelTrait, EntityTrait, FromQueryResult};

use crate::session::EntityKey;

/// A model the session can track by integer identity.
///
/// An id of `0` marks a transient entity that has never been saved; the
/// database assigns the real id on insert.
pub trait Persistent: Clone + FromQueryResult + Send + Sync + 'static {
    type Entity: EntityTrait<Model = Self>;
    type ActiveModel: ActiveModelTrait<Entity = Self::Entity> + ActiveModelBehavior + Send + Sync + 'static;

    fn id(&self) -> i32;

    fn id_column() -> <Self::Entity as EntityTrait>::Column;

    fn is_transient(&self) -> bool {
        self.id() == 0
    }

    /// The row whose delete cascades to this one, if any.
    fn owner(&self) -> Option<EntityKey> {
        None
    }
}

/// Implements [`Persistent`] for entity modules that follow the
/// `Model`/`ActiveModel`/`Column::Id` layout.
///
/// `child => parent.parent_id` marks rows removed by a cascading delete of
/// their parent.
#[macro_export]
macro_rules! persistent {
    ($($module:ident $(=> $owner:ident . $field:ident)?),+ $(,)?) => {
        $(
            impl $crate::db::Persistent for $module::Model {
                type Entity = $module::Entity;
                type ActiveModel = $module::ActiveModel;

                fn id(&self) -> i32 {
                    self.id
                }

                fn id_column() -> $module::Column {
                    $module::Column::Id
                }

                $(
                    fn owner(&self) -> Option<$crate::session::EntityKey> {
                        Some($crate::session::EntityKey::of::<$owner::Model>(self.$field))
                    }
                )?
            }
        )+
    };
}
