use sea_orm_migration::prelude::*;

use super::m20240101_000003_create_songs_table::Songs;
use super::m20240101_000004_create_albums_table::Albums;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(AlbumTracks::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AlbumTracks::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(AlbumTracks::AlbumId)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AlbumTracks::AlbumTrackNumber)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AlbumTracks::SongId)
                            .integer()
                            .not_null(),
                    )
                    // Deleting an album takes its track listing with it.
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_album_tracks_album_id")
                            .from(AlbumTracks::Table, AlbumTracks::AlbumId)
                            .to(Albums::Table, Albums::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_album_tracks_song_id")
                            .from(AlbumTracks::Table, AlbumTracks::SongId)
                            .to(Songs::Table, Songs::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_album_tracks_album_id")
                    .table(AlbumTracks::Table)
                    .col(AlbumTracks::AlbumId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_album_tracks_song_id")
                    .table(AlbumTracks::Table)
                    .col(AlbumTracks::SongId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(AlbumTracks::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum AlbumTracks {
    Table,
    Id,
    AlbumId,
    AlbumTrackNumber,
    SongId,
}
