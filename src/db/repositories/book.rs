use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};

use super::BookRepository;
use crate::db::entities::book;
use crate::error::Result;

impl BookRepository {
    /// Books of one author, oldest first.
    pub async fn by_author(&self, author_id: i32) -> Result<Vec<book::Model>> {
        self.find(
            book::Entity::find()
                .filter(book::Column::AuthorId.eq(author_id))
                .order_by_asc(book::Column::Year)
                .order_by_asc(book::Column::Title),
        )
        .await
    }
}
