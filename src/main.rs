use std::env;
use std::sync::Arc;

use anyhow::Result;
use dotenvy::dotenv;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tracky::config::ConfigSource;
use tracky::db::entities::artist;
use tracky::db::repositories::{
    AlbumRepository, ArtistRepository, AuthorRepository, BookRepository, GenreRepository,
    PlaylistRepository, SongRepository,
};
use tracky::uow::{SharedUnitOfWork, UnitOfWorkFactory, UnitOfWorkRegistry};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tracky=debug,sea_orm=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Tracky...");

    let source = match env::var("TRACKY_CONFIG") {
        Ok(path) => ConfigSource::File(path.into()),
        Err(_) => ConfigSource::DefaultFile,
    };
    let factory: UnitOfWorkFactory = UnitOfWorkFactory::new(source);
    let registry = UnitOfWorkRegistry::new(Arc::new(factory));

    let unit_of_work = registry.start().await?;
    unit_of_work.lock().await.begin_transaction().await?;

    let summary = summarize(&unit_of_work).await;
    if let Err(err) = &summary {
        tracing::error!(lifecycle = err.is_lifecycle(), "Library summary failed: {}", err);
    }
    registry.finish(summary.is_ok()).await?;
    summary?;

    tracing::info!("Done");
    Ok(())
}

async fn summarize(unit_of_work: &SharedUnitOfWork) -> tracky::error::Result<()> {
    let artists = ArtistRepository::new(unit_of_work.clone());
    let albums = AlbumRepository::new(unit_of_work.clone());

    let artist_count = artists.count().await?;
    let genre_count = GenreRepository::new(unit_of_work.clone()).count().await?;
    let song_count = SongRepository::new(unit_of_work.clone()).count().await?;
    let album_count = albums.count().await?;
    let playlist_count = PlaylistRepository::new(unit_of_work.clone()).count().await?;
    let author_count = AuthorRepository::new(unit_of_work.clone()).count().await?;
    let book_count = BookRepository::new(unit_of_work.clone()).count().await?;
    tracing::info!(
        artists = artist_count,
        genres = genre_count,
        songs = song_count,
        albums = album_count,
        playlists = playlist_count,
        authors = author_count,
        books = book_count,
        "Library contents"
    );

    let mut all: Vec<artist::Model> = artists.get_all().await?;
    all.sort_by(|a, b| a.name.cmp(&b.name));
    for artist in &all {
        tracing::info!(id = artist.id, "{}", artist.name);
    }

    for album in albums.get_all().await? {
        for entry in albums.tracks(album.id).await? {
            tracing::debug!(
                album = %album.title,
                number = entry.track.album_track_number,
                "{}",
                entry.song.title
            );
        }
    }
    Ok(())
}
