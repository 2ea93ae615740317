use std::collections::HashSet;

use chrono::{TimeDelta, Utc};
use kmdb_core::article::{ArticleSource, NewArticle, SkipReason, Stage};
use kmdb_core::dedup::OutletId;
use kmdb_core::error::AppError;
use kmdb_core::stage_queue::{
    Classification, DownloadOutcome, DownloadedArticle, FailOutcome, StageQueue,
};
use kmdb_core::Category;
use kmdb_core::similarity::MinHash;
use kmdb_core::stage_queue::Grouping;
use kmdb_core::traits::SimilarityIndex;
use kmdb_db::ArticleRepository;

use crate::integration::common::{LEASE, drive_to, seed_articles, setup_test_db};

fn download() -> DownloadedArticle {
    DownloadedArticle {
        title: "Új tender a fővárosban".into(),
        description: "A közgyűlés döntött.".into(),
        text: "A fővárosi közgyűlés szerdán döntött.".into(),
        authors: "Kiss Anna".into(),
        pub_date: None,
        is_paywalled: false,
    }
}

#[tokio::test]
async fn create_article_sets_defaults() {
    let (pool, _container) = setup_test_db().await;
    let repo = ArticleRepository::new(pool);

    let article = repo
        .create_article(
            NewArticle::new("https://telex.hu/a?utm_source=facebook").with_newspaper(OutletId(4)),
        )
        .await
        .unwrap()
        .unwrap();

    assert_eq!(article.stage, Stage::New);
    assert_eq!(article.clean_url, "https://telex.hu/a");
    assert_eq!(article.newspaper_id, Some(OutletId(4)));
    assert_eq!(article.source, ArticleSource::Rss);
    assert_eq!(article.retry_count, 0);
    assert!(article.claimed_by.is_none());
}

#[tokio::test]
async fn duplicate_clean_url_is_ignored() {
    let (pool, _container) = setup_test_db().await;
    let repo = ArticleRepository::new(pool);

    repo.create_article(NewArticle::new("https://telex.hu/a")).await.unwrap();
    let again = repo
        .create_article(NewArticle::new("https://telex.hu/a?fbclid=x").manual())
        .await
        .unwrap();

    assert!(again.is_none());
    assert_eq!(repo.count_by_stage(Stage::New).await.unwrap(), 1);
}

#[tokio::test]
async fn concurrent_claims_never_share_an_article() {
    let (pool, _container) = setup_test_db().await;
    let repo = ArticleRepository::new(pool);
    seed_articles(&repo, 30).await;

    let mut handles = Vec::new();
    for w in 0..8 {
        let repo = repo.clone();
        handles.push(tokio::spawn(async move {
            let worker = format!("download-{w}");
            let mut claimed = Vec::new();
            while let Some(article) = repo.claim_next(Stage::New, &worker, LEASE).await.unwrap() {
                assert_eq!(article.claimed_by.as_deref(), Some(worker.as_str()));
                claimed.push(article.id);
            }
            claimed
        }));
    }

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.await.unwrap());
    }
    let unique: HashSet<i64> = all.iter().copied().collect();
    assert_eq!(all.len(), 30);
    assert_eq!(unique.len(), 30);
}

#[tokio::test]
async fn claimed_article_is_not_claimable_until_lease_expires() {
    let (pool, _container) = setup_test_db().await;
    let repo = ArticleRepository::new(pool);
    let ids = seed_articles(&repo, 1).await;

    repo.claim_next(Stage::New, "w1", LEASE).await.unwrap().unwrap();
    assert!(repo.claim_next(Stage::New, "w2", LEASE).await.unwrap().is_none());

    // A negative lease treats every existing claim as expired.
    let stolen = repo
        .claim_next(Stage::New, "w2", TimeDelta::seconds(-1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stolen.id, ids[0]);

    let err = repo
        .advance(ids[0], "w1", Stage::New, Stage::Downloaded)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ClaimLost { .. }));
    repo.advance(ids[0], "w2", Stage::New, Stage::Downloaded)
        .await
        .unwrap();
}

#[tokio::test]
async fn backward_and_skipping_transitions_are_rejected() {
    let (pool, _container) = setup_test_db().await;
    let repo = ArticleRepository::new(pool);
    let ids = seed_articles(&repo, 1).await;
    repo.claim_next(Stage::New, "w", LEASE).await.unwrap().unwrap();

    let err = repo
        .advance(ids[0], "w", Stage::New, Stage::Classified)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidTransition { .. }));

    let article = repo.get_article(ids[0]).await.unwrap().unwrap();
    assert_eq!(article.stage, Stage::New);
}

#[tokio::test]
async fn full_forward_path_to_ready() {
    let (pool, _container) = setup_test_db().await;
    let repo = ArticleRepository::new(pool);
    let ids = seed_articles(&repo, 1).await;
    let id = ids[0];

    repo.claim_next(Stage::New, "dl", LEASE).await.unwrap().unwrap();
    repo.save_download(id, "dl", &download(), DownloadOutcome::Downloaded)
        .await
        .unwrap();

    repo.claim_next(Stage::Downloaded, "cls", LEASE).await.unwrap().unwrap();
    repo.save_classification(
        id,
        "cls",
        &Classification {
            score: 0.87,
            label: true,
            category: Some(Category::Local),
            grouping: None,
        },
    )
    .await
    .unwrap();

    repo.claim_next(Stage::Classified, "res", LEASE).await.unwrap().unwrap();
    repo.save_resolution(id, "res", &[]).await.unwrap();

    repo.claim_next(Stage::Resolved, "kw", LEASE).await.unwrap().unwrap();
    repo.advance(id, "kw", Stage::Resolved, Stage::Ready).await.unwrap();

    let article = repo.get_article(id).await.unwrap().unwrap();
    assert_eq!(article.stage, Stage::Ready);
    assert_eq!(article.title, "Új tender a fővárosban");
    assert_eq!(article.classification_score, Some(0.87));
    assert_eq!(article.classification_label, Some(true));
    assert_eq!(article.category, Some(Category::Local));
    assert!(article.claimed_by.is_none());
}

#[tokio::test]
async fn duplicate_download_is_skipped_but_keeps_text() {
    let (pool, _container) = setup_test_db().await;
    let repo = ArticleRepository::new(pool);
    let ids = seed_articles(&repo, 1).await;

    repo.claim_next(Stage::New, "dl", LEASE).await.unwrap().unwrap();
    repo.save_download(ids[0], "dl", &download(), DownloadOutcome::Duplicate(OutletId(3)))
        .await
        .unwrap();

    let article = repo.get_article(ids[0]).await.unwrap().unwrap();
    assert_eq!(article.stage, Stage::Skipped);
    assert_eq!(article.skip_reason, Some(SkipReason::SameNews));
    assert_eq!(article.text, "A fővárosi közgyűlés szerdán döntött.");
}

#[tokio::test]
async fn fail_requeues_with_backoff_then_fails_past_ceiling() {
    let (pool, _container) = setup_test_db().await;
    let repo = ArticleRepository::new(pool);
    let ids = seed_articles(&repo, 1).await;
    let id = ids[0];

    for attempt in 1..=2 {
        repo.claim_next(Stage::New, "w", LEASE).await.unwrap().unwrap();
        // backoff already elapsed so the next loop iteration can claim it
        let outcome = repo
            .fail(id, "w", Stage::New, "timeout", Utc::now() - TimeDelta::seconds(1), 2)
            .await
            .unwrap();
        assert_eq!(outcome, FailOutcome::Requeued);
        let article = repo.get_article(id).await.unwrap().unwrap();
        assert_eq!(article.retry_count, attempt);
        assert_eq!(article.stage, Stage::New);
    }

    repo.claim_next(Stage::New, "w", LEASE).await.unwrap().unwrap();
    let outcome = repo
        .fail(id, "w", Stage::New, "timeout", Utc::now(), 2)
        .await
        .unwrap();
    assert_eq!(outcome, FailOutcome::Failed);

    let article = repo.get_article(id).await.unwrap().unwrap();
    assert_eq!(article.stage, Stage::Failed);
    assert_eq!(article.retry_count, 3);
    assert_eq!(article.last_error.as_deref(), Some("timeout"));
}

#[tokio::test]
async fn future_backoff_hides_article_from_claims() {
    let (pool, _container) = setup_test_db().await;
    let repo = ArticleRepository::new(pool);
    let ids = seed_articles(&repo, 1).await;

    repo.claim_next(Stage::New, "w", LEASE).await.unwrap().unwrap();
    repo.fail(ids[0], "w", Stage::New, "reset", Utc::now() + TimeDelta::minutes(5), 3)
        .await
        .unwrap();

    assert!(repo.claim_next(Stage::New, "w", LEASE).await.unwrap().is_none());
}

#[tokio::test]
async fn release_worker_claims_frees_articles() {
    let (pool, _container) = setup_test_db().await;
    let repo = ArticleRepository::new(pool);
    seed_articles(&repo, 3).await;

    repo.claim_next(Stage::New, "w1", LEASE).await.unwrap().unwrap();
    repo.claim_next(Stage::New, "w1", LEASE).await.unwrap().unwrap();
    repo.claim_next(Stage::New, "w2", LEASE).await.unwrap().unwrap();

    assert_eq!(repo.release_worker_claims("w1").await.unwrap(), 2);
    assert!(repo.claim_next(Stage::New, "w3", LEASE).await.unwrap().is_some());
}

#[tokio::test]
async fn download_errors_are_requeued_once() {
    let (pool, _container) = setup_test_db().await;
    let repo = ArticleRepository::new(pool.clone());
    let ids = seed_articles(&repo, 2).await;

    for _ in 0..2 {
        let article = repo.claim_next(Stage::New, "dl", LEASE).await.unwrap().unwrap();
        repo.skip(article.id, "dl", Stage::New, SkipReason::DownloadError, "HTTP 503")
            .await
            .unwrap();
    }
    sqlx::query("UPDATE articles SET created_at = NOW() - INTERVAL '10 days' WHERE id = $1")
        .bind(ids[1])
        .execute(&pool)
        .await
        .unwrap();

    assert_eq!(repo.requeue_download_errors(TimeDelta::days(3)).await.unwrap(), 1);
    let article = repo.get_article(ids[0]).await.unwrap().unwrap();
    assert_eq!(article.stage, Stage::New);
    assert_eq!(article.skip_reason, None);
    assert!(article.download_requeued);

    let again = repo.claim_next(Stage::New, "dl", LEASE).await.unwrap().unwrap();
    repo.skip(again.id, "dl", Stage::New, SkipReason::DownloadError, "HTTP 503")
        .await
        .unwrap();
    assert_eq!(repo.requeue_download_errors(TimeDelta::days(3)).await.unwrap(), 0);
}

#[tokio::test]
async fn list_by_stage_returns_newest_first() {
    let (pool, _container) = setup_test_db().await;
    let repo = ArticleRepository::new(pool);
    let ids = seed_articles(&repo, 3).await;

    let article = repo.claim_next(Stage::New, "dl", LEASE).await.unwrap().unwrap();
    repo.save_download(article.id, "dl", &download(), DownloadOutcome::Downloaded)
        .await
        .unwrap();

    let fresh: Vec<i64> = repo
        .list_by_stage(Stage::New, 10)
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.id)
        .collect();
    let mut expected: Vec<i64> = ids.iter().copied().filter(|&id| id != article.id).collect();
    expected.reverse();
    assert_eq!(fresh, expected);

    let downloaded = repo.list_by_stage(Stage::Downloaded, 10).await.unwrap();
    assert_eq!(downloaded.len(), 1);
    assert_eq!(downloaded[0].id, article.id);
    assert_eq!(repo.list_by_stage(Stage::New, 1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn similar_articles_share_the_founders_group() {
    let (pool, _container) = setup_test_db().await;
    let repo = ArticleRepository::new(pool);
    let ids = seed_articles(&repo, 4).await;
    for &id in &ids {
        drive_to(&repo, id, Stage::Downloaded).await;
    }
    let signature = MinHash::from_text("fővárosi közgyűlés villamosbeszerzés").unwrap();
    let similar_to = [None, Some(ids[0]), Some(ids[1])];

    for similar in similar_to {
        let article = repo.claim_next(Stage::Downloaded, "cls", LEASE).await.unwrap().unwrap();
        repo.save_classification(
            article.id,
            "cls",
            &Classification {
                score: 0.9,
                label: true,
                category: Some(Category::Local),
                grouping: Some(Grouping {
                    signature: signature.clone(),
                    similar_to: similar,
                }),
            },
        )
        .await
        .unwrap();
    }
    let irrelevant = repo.claim_next(Stage::Downloaded, "cls", LEASE).await.unwrap().unwrap();
    repo.save_classification(
        irrelevant.id,
        "cls",
        &Classification {
            score: 0.1,
            label: false,
            category: Some(Category::Local),
            grouping: None,
        },
    )
    .await
    .unwrap();

    for &id in &ids[..3] {
        let article = repo.get_article(id).await.unwrap().unwrap();
        assert_eq!(article.group_id, Some(ids[0]), "article {id}");
    }
    assert_eq!(repo.get_article(ids[3]).await.unwrap().unwrap().group_id, None);

    let recent = repo
        .recent_signatures(Utc::now() - TimeDelta::hours(1))
        .await
        .unwrap();
    assert_eq!(recent.iter().map(|a| a.article_id).collect::<Vec<_>>(), &ids[..3]);
    assert_eq!(recent[0].domain, "telex.hu");
    assert_eq!(recent[0].signature, signature);
    assert!(
        repo.recent_signatures(Utc::now() + TimeDelta::hours(1))
            .await
            .unwrap()
            .is_empty()
    );
}
