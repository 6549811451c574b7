use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "albums")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub title: String,
    pub artist_id: i32,
    pub genre_id: i32,
    pub year: i32,
    pub label: Option<String>,
}

impl Model {
    pub fn new(title: impl Into<String>, artist_id: i32, genre_id: i32, year: i32) -> Self {
        Self {
            id: 0,
            title: title.into(),
            artist_id,
            genre_id,
            year,
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::artist::Entity",
        from = "Column::ArtistId",
        to = "super::artist::Column::Id",
        on_update = "NoAction",
        on_delete = "Restrict"
    )]
    Artist,
    #[sea_orm(
        belongs_to = "super::genre::Entity",
        from = "Column::GenreId",
        to = "super::genre::Column::Id",
        on_update = "NoAction",
        on_delete = "Restrict"
    )]
    Genre,
    #[sea_orm(has_many = "super::album_track::Entity")]
    AlbumTracks,
}

impl Related<super::artist::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Artist.def()
    }
}

impl Related<super::genre::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Genre.def()
    }
}

impl Related<super::album_track::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AlbumTracks.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
