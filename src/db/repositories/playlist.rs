use std::collections::HashSet;

use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};

use super::{PlaylistRepository, TrackEntry};
use crate::db::entities::{playlist, playlist_track, song};
use crate::error::{AppError, Result};

impl PlaylistRepository {
    /// Same contract as `AlbumRepository::save_with_tracks`.
    pub async fn save_with_tracks(
        &self,
        playlist: &mut playlist::Model,
        tracks: &mut [playlist_track::Model],
    ) -> Result<()> {
        let mut uow = self.unit_of_work.lock().await;
        let session = uow.session_mut();
        session.save(playlist).await?;

        let existing = session
            .list::<playlist_track::Model>(
                playlist_track::Entity::find()
                    .filter(playlist_track::Column::PlaylistId.eq(playlist.id)),
            )
            .await?;
        let kept: HashSet<i32> = tracks.iter().map(|track| track.id).collect();
        for orphan in existing.iter().filter(|track| !kept.contains(&track.id)) {
            session.delete(orphan)?;
        }

        for track in tracks.iter_mut() {
            track.playlist_id = playlist.id;
            session.save(track).await?;
        }
        Ok(())
    }

    pub async fn tracks(&self, playlist_id: i32) -> Result<Vec<TrackEntry<playlist_track::Model>>> {
        let mut uow = self.unit_of_work.lock().await;
        let session = uow.session_mut();
        let tracks = session
            .list::<playlist_track::Model>(
                playlist_track::Entity::find()
                    .filter(playlist_track::Column::PlaylistId.eq(playlist_id))
                    .order_by_asc(playlist_track::Column::PlaylistTrackNumber)
                    .order_by_asc(playlist_track::Column::Id),
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
}
