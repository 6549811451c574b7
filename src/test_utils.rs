//! Test utilities for Tracky
//!
//! Provides helpers for creating isolated test environments with:
//! - In-memory SQLite databases (one per test)
//! - Unit-of-work factories and started units of work over them
//! - The sample music and book library
//! - A recording session for exercising the unit of work without a database

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};

use crate::{
    config::{DatabaseSettings, Settings},
    db::entities::{album, album_track, artist, author, book, genre, playlist, playlist_track, song},
    error::{AppError, Result},
    session::{
        DbSessionFactory, FlushMode, Session, SessionFactory, TransactionIsolation,
    },
    uow::{SharedUnitOfWork, UnitOfWorkFactory},
};

/// Settings for a fresh in-memory SQLite database with migrations applied
pub fn test_settings() -> Settings {
    Settings {
        database: DatabaseSettings {
            url: "sqlite::memory:".to_string(),
            ..DatabaseSettings::default()
        },
        ..Settings::default()
    }
}

/// Setup a unit-of-work factory over its own in-memory database
///
/// Each call creates a fresh, isolated database perfect for parallel testing.
/// The pool holds a single connection, so only one transaction can be open
/// at a time per factory.
pub async fn setup_test_factory() -> Arc<UnitOfWorkFactory> {
    let settings = test_settings();
    let sessions = DbSessionFactory::build(&settings)
        .await
        .expect("Failed to create in-memory database");
    Arc::new(UnitOfWorkFactory::with_parts(settings, sessions))
}

/// Setup a unit-of-work factory whose database holds the sample library
pub async fn setup_seeded_factory() -> Arc<UnitOfWorkFactory> {
    let factory = setup_test_factory().await;
    let sessions = factory
        .session_factory()
        .await
        .expect("Session factory should be built");
    seed_library(sessions.connection()).await;
    factory
}

/// Setup an in-memory SQLite database with all migrations applied
pub async fn setup_test_db() -> DatabaseConnection {
    let factory = setup_test_factory().await;
    factory
        .session_factory()
        .await
        .expect("Session factory should be built")
        .connection()
        .clone()
}

/// A shared unit of work with its transaction already begun
pub async fn setup_test_unit_of_work(factory: &UnitOfWorkFactory) -> SharedUnitOfWork {
    let mut uow = factory.create().await.expect("Failed to create unit of work");
    uow.begin_transaction()
        .await
        .expect("Failed to begin transaction");
    uow.into_shared()
}

// ============================================================================
// Sample library
// ============================================================================

const AUTHORS: [&str; 4] = ["Jane Austen", "Charles Dickens", "Miguel de Cervantes", "Jack Kerouac"];

/// (title, year, author id, price in cents, genre)
const BOOKS: [(&str, i32, i32, i64, &str); 5] = [
    ("Pride and Prejudice", 1813, 1, 999, "Comedy of manners"),
    ("Northanger Abbey", 1817, 1, 1295, "Gothic parody"),
    ("David Copperfield", 1850, 2, 1500, "Bildungsroman"),
    ("Don Quixote", 1617, 3, 895, "Picaresque"),
    ("On The Road", 1957, 4, 17997, "Beat novel"),
];

pub const ARTISTS: [&str; 17] = [
    "Incredible Bongo Band",
    "Public Enemy",
    "Bad Religion",
    "Funkadelic",
    "Ministry",
    "New Edition",
    "Eric B. & Rakim",
    "Talking Heads",
    "Against Me!",
    "Rodney Dangerfield",
    "De La Soul",
    "Stetsasonic",
    "The Dead Milkmen",
    "M|A|R|R|S",
    "Beastie Boys",
    "Sesame Street",
    "Gregory Abbott",
];

const GENRES: [&str; 10] = [
    "Funk", "Hip-Hop", "Punk", "Rock", "Electronic", "Comedy", "Pop", "Children", "R&B", "Country",
];

/// (title, artist id, genre id)
const SONGS: [(&str, i32, i32); 19] = [
    ("Apache", 1, 1),
    ("Lost At Birth", 2, 2),
    ("Hooray For Me...", 3, 3),
    ("Get Off Your Ass And Jam", 4, 1),
    ("N.W.O.", 5, 5),
    ("Mr. Telephone Man", 6, 7),
    ("Eric B. Is President", 7, 2),
    ("Crosseyed & Painless", 8, 4),
    ("Dead Rats", 9, 3),
    ("Rappin' Rodney", 10, 6),
    ("The Magic Number", 11, 2),
    ("DBC Let The Music Play", 12, 2),
    ("Takin' Retards To The Zoo", 13, 3),
    ("Pump Up The Volume", 14, 5),
    ("Shake Your Rump", 15, 2),
    ("I Refuse To Sing Along", 16, 8),
    ("Shake You Down", 17, 9),
    ("333", 9, 3),
    ("Ghetto Thang", 11, 2),
];

/// (title, artist id, genre id, year, label)
const ALBUMS: [(&str, i32, i32, i32, &str); 17] = [
    ("Bongo Rock", 1, 1, 1973, "Pride"),
    ("Apocalypse 91...The Enemy Strikes Black", 2, 2, 1991, "Def Jam"),
    ("Stranger Than Fiction", 3, 3, 1994, "Epitaph"),
    ("Let's Take It To The Stage", 4, 1, 1975, "Westbound"),
    ("Psalm 69: The Way To Succeed And The Way To Suck Eggs", 5, 5, 1992, "Sire/Warner Bros."),
    ("New Edition", 6, 9, 1984, "MCA"),
    ("Paid In Full", 7, 2, 1987, "4th & Broadway"),
    ("Remain In Light", 8, 4, 1980, "Sire"),
    ("Shape Shift With Me", 9, 3, 2016, "Total Treble"),
    ("Rappin' Rodney", 10, 2, 1983, "RCA"),
    ("3 Feet High And Rising", 11, 2, 1989, "Tommy Boy"),
    ("In Full Gear", 12, 2, 1988, "Tommy Boy"),
    ("Big Lizard In My Back Yard", 13, 3, 1985, "Fever/Restless"),
    ("Pump Up The Volume [12\"]", 14, 5, 1987, "4AD"),
    ("Paul's Boutique", 15, 2, 1989, "Capitol"),
    ("Bert & Ernie Sing-Along", 16, 8, 1975, "Children's Television Workshop"),
    ("Shake You Down", 17, 9, 1986, "Columbia"),
];

/// (album id, track number, song id)
const ALBUM_TRACKS: [(i32, i32, i32); 19] = [
    (1, 2, 1),
    (2, 1, 2),
    (3, 10, 3),
    (4, 6, 4),
    (5, 1, 5),
    (6, 2, 6),
    (7, 9, 7),
    (8, 2, 8),
    (9, 8, 18),
    (10, 2, 10),
    (11, 2, 11),
    (12, 2, 12),
    (13, 15, 13),
    (14, 1, 14),
    (15, 2, 15),
    (16, 1, 16),
    (17, 3, 17),
    (9, 6, 9),
    (11, 7, 19),
];

const PLAYLISTS: [&str; 4] = [
    "Happy Happy Tracks",
    "Mellow Pimpin' Tracks",
    "Zelda Jams",
    "Luncheonette Soul Jazz",
];

/// (playlist id, track number, song id)
const PLAYLIST_TRACKS: [(i32, i32, i32); 17] = [
    (1, 1, 1),
    (1, 2, 2),
    (1, 3, 3),
    (1, 4, 4),
    (1, 5, 5),
    (1, 6, 7),
    (1, 7, 9),
    (1, 8, 8),
    (1, 9, 12),
    (1, 10, 10),
    (1, 11, 14),
    (1, 12, 11),
    (1, 13, 13),
    (1, 14, 15),
    (1, 15, 16),
    (2, 1, 6),
    (2, 2, 17),
];

/// Fill an empty database with the sample library
///
/// Rows are inserted in order, so ids match their position (1-based) in the
/// tables above.
pub async fn seed_library(db: &DatabaseConnection) {
    for name in AUTHORS {
        author::ActiveModel {
            name: Set(name.to_string()),
            ..Default::default()
        }
        .insert(db)
        .await
        .expect("Failed to insert author");
    }

    for (title, year, author_id, price_cents, genre) in BOOKS {
        book::ActiveModel {
            title: Set(title.to_string()),
            year: Set(year),
            price_cents: Set(price_cents),
            genre: Set(Some(genre.to_string())),
            author_id: Set(author_id),
            ..Default::default()
        }
        .insert(db)
        .await
        .expect("Failed to insert book");
    }

    for name in ARTISTS {
        artist::ActiveModel {
            name: Set(name.to_string()),
            ..Default::default()
        }
        .insert(db)
        .await
        .expect("Failed to insert artist");
    }

    for name in GENRES {
        genre::ActiveModel {
            name: Set(name.to_string()),
            ..Default::default()
        }
        .insert(db)
        .await
        .expect("Failed to insert genre");
    }

    for (title, artist_id, genre_id) in SONGS {
        song::ActiveModel {
            title: Set(title.to_string()),
            artist_id: Set(artist_id),
            genre_id: Set(genre_id),
            ..Default::default()
        }
        .insert(db)
        .await
        .expect("Failed to insert song");
    }

    for (title, artist_id, genre_id, year, label) in ALBUMS {
        album::ActiveModel {
            title: Set(title.to_string()),
            artist_id: Set(artist_id),
            genre_id: Set(genre_id),
            year: Set(year),
            label: Set(Some(label.to_string())),
            ..Default::default()
        }
        .insert(db)
        .await
        .expect("Failed to insert album");
    }

    for (album_id, number, song_id) in ALBUM_TRACKS {
        album_track::ActiveModel {
            album_id: Set(album_id),
            album_track_number: Set(number),
            song_id: Set(song_id),
            ..Default::default()
        }
        .insert(db)
        .await
        .expect("Failed to insert album track");
    }

    for name in PLAYLISTS {
        playlist::ActiveModel {
            name: Set(name.to_string()),
            ..Default::default()
        }
        .insert(db)
        .await
        .expect("Failed to insert playlist");
    }

    for (playlist_id, number, song_id) in PLAYLIST_TRACKS {
        playlist_track::ActiveModel {
            playlist_id: Set(playlist_id),
            playlist_track_number: Set(number),
            song_id: Set(song_id),
            ..Default::default()
        }
        .insert(db)
        .await
        .expect("Failed to insert playlist track");
    }
}

// ============================================================================
// Recording session
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCall {
    Begin(Option<TransactionIsolation>),
    Commit,
    Rollback,
    Flush,
    Clear,
    Close,
}

/// Calls made on recording sessions, shared with the test that owns it
#[derive(Debug, Clone, Default)]
pub struct SessionLog(Arc<Mutex<Vec<SessionCall>>>);

impl SessionLog {
    fn record(&self, call: SessionCall) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }

    pub fn calls(&self) -> Vec<SessionCall> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// In-memory [`Session`] that only tracks transaction state and logs calls
#[derive(Debug)]
pub struct RecordingSession {
    log: SessionLog,
    flush_mode: FlushMode,
    open: bool,
    active: bool,
    fail_commit: bool,
}

impl RecordingSession {
    pub fn new() -> Self {
        Self::with_log(SessionLog::default(), false)
    }

    /// A session whose commits fail and leave the transaction active
    pub fn failing_commit() -> Self {
        Self::with_log(SessionLog::default(), true)
    }

    pub fn with_log(log: SessionLog, fail_commit: bool) -> Self {
        Self {
            log,
            flush_mode: FlushMode::default(),
            open: true,
            active: false,
            fail_commit,
        }
    }

    pub fn log(&self) -> SessionLog {
        self.log.clone()
    }
}

impl Default for RecordingSession {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Session for RecordingSession {
    fn flush_mode(&self) -> FlushMode {
        self.flush_mode
    }

    fn set_flush_mode(&mut self, mode: FlushMode) {
        self.flush_mode = mode;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn is_transaction_active(&self) -> bool {
        self.active
    }

    async fn begin_transaction(&mut self, isolation: Option<TransactionIsolation>) -> Result<()> {
        if !self.open {
            return Err(AppError::SessionClosed);
        }
        if self.active {
            return Err(AppError::TransactionAlreadyActive);
        }
        self.log.record(SessionCall::Begin(isolation));
        self.active = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        if !self.active {
            return Err(AppError::NoActiveTransaction);
        }
        self.log.record(SessionCall::Commit);
        if self.fail_commit {
            return Err(anyhow::anyhow!("commit failed").into());
        }
        self.active = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        if !self.active {
            return Err(AppError::NoActiveTransaction);
        }
        self.log.record(SessionCall::Rollback);
        self.active = false;
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        self.log.record(SessionCall::Flush);
        Ok(())
    }

    fn clear(&mut self) {
        self.log.record(SessionCall::Clear);
    }

    async fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.active = false;
        self.log.record(SessionCall::Close);
        Ok(())
    }
}

/// Opens [`RecordingSession`]s that all write to one shared log
#[derive(Debug, Clone, Default)]
pub struct RecordingSessionFactory {
    log: SessionLog,
    opened: Arc<AtomicUsize>,
    fail_commit: bool,
    fail_open: bool,
    open_delay: Option<Duration>,
}

impl RecordingSessionFactory {
    pub fn failing_commit() -> Self {
        Self {
            fail_commit: true,
            ..Self::default()
        }
    }

    /// Every `open_session` fails.
    pub fn failing_open() -> Self {
        Self {
            fail_open: true,
            ..Self::default()
        }
    }

    /// Every `open_session` waits `delay` before handing out the session.
    pub fn slow_open(delay: Duration) -> Self {
        Self {
            open_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn log(&self) -> SessionLog {
        self.log.clone()
    }

    pub fn sessions_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionFactory for RecordingSessionFactory {
    type Session = RecordingSession;

    async fn build(_settings: &Settings) -> Result<Self> {
        Ok(Self::default())
    }

    async fn open_session(&self) -> Result<RecordingSession> {
        if let Some(delay) = self.open_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_open {
            return Err(anyhow::anyhow!("session factory unavailable").into());
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(RecordingSession::with_log(self.log.clone(), self.fail_commit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{EntityTrait, PaginatorTrait};

    #[tokio::test]
    async fn test_setup_test_db() {
        let db = setup_test_db().await;
        let artists = artist::Entity::find().all(&db).await.unwrap();
        assert_eq!(artists.len(), 0);
    }

    #[tokio::test]
    async fn test_seed_library() {
        let db = setup_test_db().await;
        seed_library(&db).await;

        assert_eq!(author::Entity::find().count(&db).await.unwrap(), 4);
        assert_eq!(book::Entity::find().count(&db).await.unwrap(), 5);
        assert_eq!(artist::Entity::find().count(&db).await.unwrap(), 17);
        assert_eq!(genre::Entity::find().count(&db).await.unwrap(), 10);
        assert_eq!(song::Entity::find().count(&db).await.unwrap(), 19);
        assert_eq!(album::Entity::find().count(&db).await.unwrap(), 17);
        assert_eq!(album_track::Entity::find().count(&db).await.unwrap(), 19);
        assert_eq!(playlist::Entity::find().count(&db).await.unwrap(), 4);
        assert_eq!(playlist_track::Entity::find().count(&db).await.unwrap(), 17);

        let against_me = artist::Entity::find_by_id(9).one(&db).await.unwrap().unwrap();
        assert_eq!(against_me.name, "Against Me!");
    }

    #[tokio::test]
    async fn test_parallel_databases() {
        let (db1, db2) = tokio::join!(setup_test_db(), setup_test_db());

        let first = artist::ActiveModel {
            name: Set("Artist 1".to_string()),
            ..Default::default()
        }
        .insert(&db1)
        .await
        .unwrap();
        let second = artist::ActiveModel {
            name: Set("Artist 2".to_string()),
            ..Default::default()
        }
        .insert(&db2)
        .await
        .unwrap();

        // Separate databases, so both get the first id
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 1);
        assert_eq!(artist::Entity::find().count(&db1).await.unwrap(), 1);
        assert_eq!(artist::Entity::find().count(&db2).await.unwrap(), 1);
    }
}
