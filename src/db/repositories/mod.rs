//! Typed access to entities through a unit of work.
//!
//! Every repository of a request shares the same [`SharedUnitOfWork`], so
//! reads and writes made through any of them land in one session.

mod album;
mod book;
mod playlist;
mod song;

use std::fmt;
use std::marker::PhantomData;

use sea_orm::{EntityTrait, IntoActiveModel, Select};

use crate::db::entities::{
    album as album_entity, album_track, artist, author, book as book_entity, genre,
    playlist as playlist_entity, playlist_track, song as song_entity,
};
use crate::db::Persistent;
use crate::error::Result;
use crate::uow::{ambient, SharedUnitOfWork, UnitOfWorkRegistry};

pub type ArtistRepository = Repository<artist::Model>;
pub type GenreRepository = Repository<genre::Model>;
pub type SongRepository = Repository<song_entity::Model>;
pub type AlbumRepository = Repository<album_entity::Model>;
pub type AlbumTrackRepository = Repository<album_track::Model>;
pub type PlaylistRepository = Repository<playlist_entity::Model>;
pub type PlaylistTrackRepository = Repository<playlist_track::Model>;
pub type AuthorRepository = Repository<author::Model>;
pub type BookRepository = Repository<book_entity::Model>;

/// A track row of an album or playlist together with its song.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackEntry<T> {
    pub track: T,
    pub song: song_entity::Model,
}

pub struct Repository<M> {
    unit_of_work: SharedUnitOfWork,
    _model: PhantomData<fn() -> M>,
}

impl<M> Clone for Repository<M> {
    fn clone(&self) -> Self {
        Self {
            unit_of_work: self.unit_of_work.clone(),
            _model: PhantomData,
        }
    }
}

impl<M> fmt::Debug for Repository<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("model", &std::any::type_name::<M>())
            .finish()
    }
}

impl<M> Repository<M>
where
    M: Persistent + IntoActiveModel<M::ActiveModel>,
{
    pub fn new(unit_of_work: SharedUnitOfWork) -> Self {
        Self {
            unit_of_work,
            _model: PhantomData,
        }
    }

    /// Binds to the unit of work currently started in `registry`.
    pub fn from_registry(registry: &UnitOfWorkRegistry) -> Result<Self> {
        Ok(Self::new(registry.current()?))
    }

    /// Binds to the unit of work of the ambient request scope.
    pub fn ambient() -> Result<Self> {
        Ok(Self::new(ambient::current()?))
    }

    pub fn unit_of_work(&self) -> &SharedUnitOfWork {
        &self.unit_of_work
    }

    pub async fn get(&self, id: i32) -> Result<Option<M>> {
        let mut uow = self.unit_of_work.lock().await;
        uow.session_mut().get::<M>(id).await
    }

    /// Inserts a transient entity (filling in its id) or queues an update.
    pub async fn save(&self, entity: &mut M) -> Result<()> {
        let mut uow = self.unit_of_work.lock().await;
        uow.session_mut().save(entity).await
    }

    pub async fn delete(&self, entity: &M) -> Result<()> {
        let mut uow = self.unit_of_work.lock().await;
        uow.session_mut().delete(entity)
    }

    /// Every row, in no particular order.
    pub async fn get_all(&self) -> Result<Vec<M>> {
        self.find(M::Entity::find()).await
    }

    pub async fn find(&self, select: Select<M::Entity>) -> Result<Vec<M>> {
        let mut uow = self.unit_of_work.lock().await;
        uow.session_mut().list(select).await
    }

    pub async fn count(&self) -> Result<u64> {
        let mut uow = self.unit_of_work.lock().await;
        uow.session_mut().count::<M>().await
    }
}
