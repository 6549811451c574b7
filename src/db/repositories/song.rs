use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};

use super::SongRepository;
use crate::db::entities::song;
use crate::error::Result;

impl SongRepository {
    pub async fn by_artist(&self, artist_id: i32) -> Result<Vec<song::Model>> {
        self.find(
            song::Entity::find()
                .filter(song::Column::ArtistId.eq(artist_id))
                .order_by_asc(song::Column::Title),
        )
        .await
    }

    pub async fn by_genre(&self, genre_id: i32) -> Result<Vec<song::Model>> {
        self.find(
            song::Entity::find()
                .filter(song::Column::GenreId.eq(genre_id))
                .order_by_asc(song::Column::Title),
        )
        .await
    }
}
