use kmdb_core::article::Stage;
use kmdb_core::entity::{EntityKind, EntityLabel, NewEntityLink};
use kmdb_core::error::AppError;
use kmdb_core::stage_queue::StageQueue;
use kmdb_db::{ArticleRepository, KeywordRepository};

use crate::integration::common::{LEASE, drive_to, seed_articles, setup_test_db};

fn link(kind: EntityKind, keyword_id: Option<i64>, surface: &str, offset: usize) -> NewEntityLink {
    NewEntityLink {
        kind,
        keyword_id,
        keyword_name: None,
        raw_surface: surface.into(),
        normalized_surface: surface.into(),
        char_offset: offset,
        score: 0.9,
        label: EntityLabel::Positive,
        detections: 1,
    }
}

async fn classified_article(repo: &ArticleRepository) -> i64 {
    let ids = seed_articles(repo, 1).await;
    drive_to(repo, ids[0], Stage::Classified).await;
    ids[0]
}

#[tokio::test]
async fn save_resolution_stores_links_and_advances() {
    let (pool, _container) = setup_test_db().await;
    let repo = ArticleRepository::new(pool.clone());
    let keywords = KeywordRepository::new(pool);
    let bandi = keywords
        .upsert_keyword(EntityKind::Person, "Kiss Bandi", 12)
        .await
        .unwrap();
    let id = classified_article(&repo).await;

    repo.claim_next(Stage::Classified, "res", LEASE).await.unwrap().unwrap();
    repo.save_resolution(
        id,
        "res",
        &[
            link(EntityKind::Person, Some(bandi.id), "Kiss Bandi", 0),
            link(EntityKind::Institution, None, "Example Kft.", 42),
        ],
    )
    .await
    .unwrap();

    let article = repo.get_article(id).await.unwrap().unwrap();
    assert_eq!(article.stage, Stage::Resolved);
    let links = repo.list_links(id).await.unwrap();
    assert_eq!(links.len(), 2);
    assert_eq!(links[0].keyword_id, Some(bandi.id));
    assert_eq!(links[1].kind, EntityKind::Institution);
    assert_eq!(links[1].keyword_id, None);
}

#[tokio::test]
async fn replayed_resolution_converges_to_the_same_links() {
    let (pool, _container) = setup_test_db().await;
    let repo = ArticleRepository::new(pool.clone());
    let id = classified_article(&repo).await;

    // First attempt stores links, then the worker crashes before the next
    // stage; simulate the replay by moving the article back with raw SQL.
    repo.claim_next(Stage::Classified, "res-1", LEASE).await.unwrap().unwrap();
    repo.save_resolution(
        id,
        "res-1",
        &[
            link(EntityKind::Place, None, "Szeged", 10),
            link(EntityKind::Place, None, "Kelenföld", 30),
        ],
    )
    .await
    .unwrap();
    sqlx::query("UPDATE articles SET stage = 'classified' WHERE id = $1")
        .bind(id)
        .execute(&pool)
        .await
        .unwrap();
    let first: Vec<i64> = repo.list_links(id).await.unwrap().iter().map(|l| l.id).collect();

    repo.claim_next(Stage::Classified, "res-2", LEASE).await.unwrap().unwrap();
    repo.save_resolution(
        id,
        "res-2",
        &[
            link(EntityKind::Place, None, "Szeged", 10),
            link(EntityKind::Place, None, "Budapest", 55),
        ],
    )
    .await
    .unwrap();

    let links = repo.list_links(id).await.unwrap();
    let offsets: Vec<usize> = links.iter().map(|l| l.char_offset).collect();
    assert_eq!(offsets, vec![10, 55]);
    // the surviving offset kept its row
    assert_eq!(links[0].id, first[0]);
}

#[tokio::test]
async fn lost_claim_leaves_no_links() {
    let (pool, _container) = setup_test_db().await;
    let repo = ArticleRepository::new(pool);
    let id = classified_article(&repo).await;

    repo.claim_next(Stage::Classified, "res-1", LEASE).await.unwrap().unwrap();
    let err = repo
        .save_resolution(id, "someone-else", &[link(EntityKind::Place, None, "Szeged", 10)])
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::ClaimLost { .. }));
    assert!(repo.list_links(id).await.unwrap().is_empty());
    assert_eq!(repo.get_article(id).await.unwrap().unwrap().stage, Stage::Classified);
}

#[tokio::test]
async fn duplicate_offsets_are_rejected_before_writing() {
    let (pool, _container) = setup_test_db().await;
    let repo = ArticleRepository::new(pool);
    let id = classified_article(&repo).await;

    repo.claim_next(Stage::Classified, "res", LEASE).await.unwrap().unwrap();
    let err = repo
        .save_resolution(
            id,
            "res",
            &[
                link(EntityKind::Place, None, "Szeged", 10),
                link(EntityKind::Institution, None, "Szegedi Egyetem", 10),
            ],
        )
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::InvariantViolation(_)));
    assert!(repo.list_links(id).await.unwrap().is_empty());
}
