use std::collections::HashSet;

use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};

use super::{AlbumRepository, TrackEntry};
use crate::db::entities::{album, album_track, song};
use crate::error::{AppError, Result};

impl AlbumRepository {
    /// Saves the album and makes `tracks` its complete track list: each
    /// track is attached and saved, and stored tracks missing from the list
    /// are deleted.
    pub async fn save_with_tracks(
        &self,
        album: &mut album::Model,
        tracks: &mut [album_track::Model],
    ) -> Result<()> {
        let mut uow = self.unit_of_work.lock().await;
        let session = uow.session_mut();
        session.save(album).await?;

        let existing = session
            .list::<album_track::Model>(
                album_track::Entity::find().filter(album_track::Column::AlbumId.eq(album.id)),
            )
            .await?;
        let kept: HashSet<i32> = tracks.iter().map(|track| track.id).collect();
        for orphan in existing.iter().filter(|track| !kept.contains(&track.id)) {
            session.delete(orphan)?;
        }

        for track in tracks.iter_mut() {
            track.album_id = album.id;
            session.save(track).await?;
        }
        Ok(())
    }

    /// The album's tracks ordered by track number, each with its song.
    pub async fn tracks(&self, album_id: i32) -> Result<Vec<TrackEntry<album_track::Model>>> {
        let mut uow = self.unit_of_work.lock().await;
        let session = uow.session_mut();
        let tracks = session
            .list::<album_track::Model>(
                album_track::Entity::find()
                    .filter(album_track::Column::AlbumId.eq(album_id))
                    .order_by_asc(album_track::Column::AlbumTrackNumber)
                    .order_by_asc(album_track::Column::Id),
            )
            .await?;

        let mut entries = Vec::with_capacity(tracks.len());
        for track in tracks {
            let song = session
                .get::<song::Model>(track.song_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("song {}", track.song_id)))?;
            entries.push(TrackEntry { track, song });
        }
        Ok(entries)
    }

    pub async fn by_artist(&self, artist_id: i32) -> Result<Vec<album::Model>> {
        self.find(
            album::Entity::find()
                .filter(album::Column::ArtistId.eq(artist_id))
                .order_by_asc(album::Column::Year),
        )
        .await
    }
}
