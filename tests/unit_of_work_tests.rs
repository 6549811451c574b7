//! Unit-of-work integration tests
//!
//! Exercises transactions, flush modes and the registry against a real
//! in-memory SQLite database.

use std::sync::Arc;

use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};

use tracky::config::Settings;
use tracky::db::entities::artist;
use tracky::db::repositories::ArtistRepository;
use tracky::error::AppError;
use tracky::session::{DbSessionFactory, FlushMode, SessionFactory};
use tracky::test_utils::*;
use tracky::uow::{ambient, UnitOfWorkFactory, UnitOfWorkRegistry};

async fn factory_with_flush_mode(flush_mode: FlushMode) -> Arc<UnitOfWorkFactory> {
    let mut settings: Settings = test_settings();
    settings.session.flush_mode = flush_mode;
    let sessions = DbSessionFactory::build(&settings).await.unwrap();
    Arc::new(UnitOfWorkFactory::with_parts(settings, sessions))
}

async fn artist_count(factory: &UnitOfWorkFactory) -> u64 {
    let mut uow = factory.create().await.unwrap();
    let count = uow.session_mut().count::<artist::Model>().await.unwrap();
    uow.dispose().await.unwrap();
    count
}

#[tokio::test]
async fn test_rollback_leaves_database_unchanged() {
    let factory = setup_test_factory().await;

    let uow = setup_test_unit_of_work(&factory).await;
    ArtistRepository::new(uow.clone())
        .save(&mut artist::Model::new("Ministry"))
        .await
        .unwrap();
    {
        let mut uow = uow.lock().await;
        uow.finish_transaction(false).await.unwrap();
        uow.dispose().await.unwrap();
    }

    assert_eq!(artist_count(&factory).await, 0);
}

#[tokio::test]
async fn test_commit_persists_inserts_and_queued_updates() {
    let factory = setup_test_factory().await;

    let uow = setup_test_unit_of_work(&factory).await;
    let artists = ArtistRepository::new(uow.clone());
    let mut artist = artist::Model::new("Talking Head");
    artists.save(&mut artist).await.unwrap();
    artist.name = "Talking Heads".to_string();
    artists.save(&mut artist).await.unwrap();
    {
        let mut uow = uow.lock().await;
        uow.finish_transaction(true).await.unwrap();
        uow.dispose().await.unwrap();
    }

    let mut check = factory.create().await.unwrap();
    let from_db = check
        .session_mut()
        .get::<artist::Model>(artist.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(from_db.name, "Talking Heads");
}

#[tokio::test]
async fn test_manual_flush_mode_does_not_flush_on_commit() {
    let factory = factory_with_flush_mode(FlushMode::Manual).await;

    let mut uow = factory.create().await.unwrap();
    uow.begin_transaction().await.unwrap();
    let mut artist = artist::Model::new("Funkadelic");
    uow.session_mut().save(&mut artist).await.unwrap();
    artist.name = "Parliament".to_string();
    uow.session_mut().save(&mut artist).await.unwrap();
    uow.commit().await.unwrap();
    uow.dispose().await.unwrap();

    let mut check = factory.create().await.unwrap();
    let from_db = check
        .session_mut()
        .get::<artist::Model>(artist.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(from_db.name, "Funkadelic");
}

#[tokio::test]
async fn test_auto_flush_mode_flushes_before_queries() {
    for (flush_mode, expected) in [(FlushMode::Auto, 1), (FlushMode::Commit, 0)] {
        let factory = factory_with_flush_mode(flush_mode).await;
        let uow = setup_test_unit_of_work(&factory).await;
        let artists = ArtistRepository::new(uow.clone());

        let mut artist = artist::Model::new("Stetsasonic");
        artists.save(&mut artist).await.unwrap();
        artist.name = "Stetsa".to_string();
        artists.save(&mut artist).await.unwrap();

        let found = artists
            .find(artist::Entity::find().filter(artist::Column::Name.eq("Stetsa")))
            .await
            .unwrap();
        assert_eq!(found.len(), expected, "flush mode {:?}", flush_mode);
    }
}

#[tokio::test]
async fn test_flush_and_clear_outside_transaction_is_skipped() {
    let factory = setup_test_factory().await;
    let mut uow = factory.create().await.unwrap();

    let mut artist = artist::Model::new("Beastie Boys");
    uow.session_mut().save(&mut artist).await.unwrap();
    artist.name = "Beastie Boys!".to_string();
    uow.session_mut().save(&mut artist).await.unwrap();

    uow.flush_and_clear().await.unwrap();
    assert_eq!(uow.session().pending_writes(), 1);
    assert!(uow.session().is_tracked::<artist::Model>(artist.id));
}

#[tokio::test]
async fn test_transactional_flush_outside_transaction() {
    let factory = setup_test_factory().await;
    let mut uow = factory.create().await.unwrap();

    let mut artist = artist::Model::new("De La Soul");
    uow.session_mut().save(&mut artist).await.unwrap();
    artist.name = "De La Soul (Tommy Boy)".to_string();
    uow.session_mut().save(&mut artist).await.unwrap();

    uow.transactional_flush().await.unwrap();
    assert!(!uow.is_in_active_transaction());
    assert_eq!(uow.session().pending_writes(), 0);
    uow.dispose().await.unwrap();

    let mut check = factory.create().await.unwrap();
    let from_db = check
        .session_mut()
        .get::<artist::Model>(artist.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(from_db.name, "De La Soul (Tommy Boy)");
}

#[tokio::test]
async fn test_nested_begin_reports_false() {
    let factory = setup_test_factory().await;
    let mut uow = factory.create().await.unwrap();

    assert!(uow.begin_transaction().await.unwrap());
    assert!(!uow.begin_transaction().await.unwrap());
    uow.rollback().await.unwrap();
    assert!(!uow.is_in_active_transaction());
}

#[tokio::test]
async fn test_dropped_unit_of_work_rolls_back() {
    let factory = setup_test_factory().await;

    let uow = setup_test_unit_of_work(&factory).await;
    ArtistRepository::new(uow.clone())
        .save(&mut artist::Model::new("Gregory Abbott"))
        .await
        .unwrap();
    drop(uow);

    assert_eq!(artist_count(&factory).await, 0);
}

#[tokio::test]
async fn test_seeded_artists_sorted_by_name() {
    let factory = setup_seeded_factory().await;
    let uow = setup_test_unit_of_work(&factory).await;

    let mut artists = ArtistRepository::new(uow).get_all().await.unwrap();
    artists.sort_by(|a, b| a.name.cmp(&b.name));

    assert_eq!(artists.len(), 17);
    assert_eq!(artists.first().map(|a| a.name.as_str()), Some("Against Me!"));
    assert_eq!(artists.last().map(|a| a.name.as_str()), Some("The Dead Milkmen"));
}

#[tokio::test]
async fn test_registry_lifecycle_against_database() {
    let factory = setup_test_factory().await;
    let registry = UnitOfWorkRegistry::new(factory.clone());

    let uow = registry.start().await.unwrap();
    uow.lock().await.begin_transaction().await.unwrap();
    assert!(matches!(registry.start().await, Err(AppError::UnitOfWorkAlreadyStarted)));

    let artists = ArtistRepository::from_registry(&registry).unwrap();
    artists.save(&mut artist::Model::new("New Edition")).await.unwrap();

    // The registry only observes the unit of work; `uow` keeps it alive.
    registry.finish(true).await.unwrap();
    assert!(uow.lock().await.is_disposed());
    assert!(!registry.is_started());
    assert!(matches!(registry.current(), Err(AppError::NotInUnitOfWork)));

    let _second = registry.start().await.unwrap();
    let count = registry
        .current_session()
        .await
        .unwrap()
        .count::<artist::Model>()
        .await
        .unwrap();
    assert_eq!(count, 1);
    registry.finish(true).await.unwrap();
}

#[tokio::test]
async fn test_ambient_registry_scope() {
    let factory = setup_test_factory().await;
    let registry = UnitOfWorkRegistry::new(factory.clone());

    let saved = ambient::scope(registry.clone(), async {
        let uow = ambient::registry()?.start().await?;
        uow.lock().await.begin_transaction().await?;

        let mut artist = artist::Model::new("Rodney Dangerfield");
        ArtistRepository::ambient()?.save(&mut artist).await?;
        assert!(Arc::ptr_eq(&uow, &ambient::current()?));

        ambient::registry()?.finish(true).await?;
        Ok::<_, AppError>(artist)
    })
    .await
    .unwrap();

    assert!(saved.id > 0);
    assert!(!registry.is_started());
    assert!(matches!(ambient::current(), Err(AppError::NotInUnitOfWork)));
    assert_eq!(artist_count(&factory).await, 1);
}
