pub mod artist;
pub mod genre;
pub mod song;
pub mod album;
pub mod album_track;
pub mod playlist;
pub mod playlist_track;
pub mod author;
pub mod book;

pub use artist::Entity as Artist;
pub use genre::Entity as Genre;
pub use song::Entity as Song;
pub use album::Entity as Album;
pub use album_track::Entity as AlbumTrack;
pub use playlist::Entity as Playlist;
pub use playlist_track::Entity as PlaylistTrack;
pub use author::Entity as Author;
pub use book::Entity as Book;

crate::persistent!(
    artist,
    genre,
    song,
    album,
    album_track => album.album_id,
    playlist,
    playlist_track => playlist.playlist_id,
    author,
    book => author.author_id,
);
