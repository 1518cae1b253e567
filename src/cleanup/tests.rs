//! End-to-end runs of the cleanup engine against real databases.

use std::sync::Arc;

use uuid::Uuid;

use super::{CleanupEngine, CleanupError, PageStage};
use crate::{
    config::{BatchSettings, CleanupConfig, CleanupSafety},
    db::{
        IntakeRepo, TokenCursor,
        tests::fixtures::{IntakeFixtures, days_ago, default_cutoff},
    },
};

pub struct EngineTestContext {
    pub repo: Arc<dyn IntakeRepo>,
    pub fixtures: Box<dyn IntakeFixtures>,
}

impl EngineTestContext {
    fn engine(&self, config: CleanupConfig) -> CleanupEngine {
        CleanupEngine::new(Arc::clone(&self.repo), config)
    }
}

fn test_config(page_size: u32) -> CleanupConfig {
    CleanupConfig {
        batch: BatchSettings {
            page_size,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            jitter: 0.0,
            ..Default::default()
        },
        ..Default::default()
    }
}

// ============================================================================
// Scenarios
// ============================================================================

pub async fn test_scenario_full_cascade(ctx: &EngineTestContext) {
    let f = ctx.fixtures.as_ref();
    let product = Uuid::new_v4();
    let entity = f.insert_entity().await;
    f.insert_token("T1", Some(entity), Some(product), days_ago(10), None)
        .await;
    let rel = f.insert_relationship(entity, product, "new").await;
    f.insert_corpus_item(entity).await;
    f.insert_corpus_item(entity).await;

    let summary = ctx
        .engine(test_config(100))
        .run(default_cutoff(), None)
        .await
        .expect("Run failed");

    assert_eq!(summary.batches, 1);
    assert_eq!(summary.tokens_deleted, 1);
    assert_eq!(summary.relationships_deleted, 1);
    assert_eq!(summary.corpus_items_deleted, 2);
    assert_eq!(summary.entities_deleted, 1);
    assert!(!f.token_exists("T1").await);
    assert!(!f.relationship_exists(rel).await);
    assert!(!f.entity_exists(entity).await);
    assert_eq!(f.corpus_count(entity).await, 0);
}

pub async fn test_scenario_token_without_entity(ctx: &EngineTestContext) {
    let f = ctx.fixtures.as_ref();
    let bystander = f.insert_entity().await;
    let product = Uuid::new_v4();
    f.insert_token("live", Some(bystander), Some(product), days_ago(1), None)
        .await;
    let rel = f.insert_relationship(bystander, product, "new").await;
    f.insert_corpus_item(bystander).await;
    f.insert_token("T2", None, None, days_ago(10), None).await;

    let summary = ctx
        .engine(test_config(100))
        .run(default_cutoff(), None)
        .await
        .expect("Run failed");

    assert_eq!(summary.tokens_deleted, 1);
    assert_eq!(summary.total_deleted(), 1);
    assert!(!f.token_exists("T2").await);
    assert!(f.entity_exists(bystander).await);
    assert!(f.relationship_exists(rel).await);
    assert_eq!(f.corpus_count(bystander).await, 1);
}

pub async fn test_scenario_completed_sibling_preserves_entity(ctx: &EngineTestContext) {
    let f = ctx.fixtures.as_ref();
    let product = Uuid::new_v4();
    let entity = f.insert_entity().await;
    f.insert_token("T3", Some(entity), Some(product), days_ago(10), None)
        .await;
    f.insert_token(
        "T4",
        Some(entity),
        Some(product),
        days_ago(2),
        Some(days_ago(1)),
    )
    .await;
    let in_progress = f.insert_relationship(entity, product, "new").await;
    let resolved = f
        .insert_relationship(entity, Uuid::new_v4(), "completed")
        .await;
    f.insert_corpus_item(entity).await;

    let summary = ctx
        .engine(test_config(100))
        .run(default_cutoff(), None)
        .await
        .expect("Run failed");

    assert_eq!(summary.tokens_deleted, 1);
    assert_eq!(summary.entities_deleted, 0);
    assert_eq!(summary.entities_preserved, 1);
    assert!(!f.token_exists("T3").await);
    assert!(f.token_exists("T4").await);
    assert!(f.entity_exists(entity).await);
    assert!(f.relationship_exists(in_progress).await);
    assert!(f.relationship_exists(resolved).await);
    assert_eq!(f.corpus_count(entity).await, 1);
}

pub async fn test_scenario_completed_sibling_for_other_product(ctx: &EngineTestContext) {
    let f = ctx.fixtures.as_ref();
    let product = Uuid::new_v4();
    let entity = f.insert_entity().await;
    f.insert_token("T3", Some(entity), Some(product), days_ago(10), None)
        .await;
    f.insert_token(
        "T4",
        Some(entity),
        Some(Uuid::new_v4()),
        days_ago(2),
        Some(days_ago(1)),
    )
    .await;
    let in_progress = f.insert_relationship(entity, product, "new").await;
    f.insert_corpus_item(entity).await;

    let summary = ctx
        .engine(test_config(100))
        .run(default_cutoff(), None)
        .await
        .expect("Run failed");

    assert_eq!(summary.tokens_deleted, 1);
    assert_eq!(summary.relationships_deleted, 0);
    assert_eq!(summary.entities_deleted, 0);
    assert!(!f.token_exists("T3").await);
    assert!(f.entity_exists(entity).await);
    assert!(f.relationship_exists(in_progress).await);
    assert_eq!(f.corpus_count(entity).await, 1);
}

pub async fn test_scenario_token_inside_window_untouched(ctx: &EngineTestContext) {
    let f = ctx.fixtures.as_ref();
    let entity = f.insert_entity().await;
    f.insert_token("T5", Some(entity), None, days_ago(3), None)
        .await;
    f.insert_corpus_item(entity).await;
    let before = f.total_rows().await;

    let summary = ctx
        .engine(test_config(100))
        .run(default_cutoff(), None)
        .await
        .expect("Run failed");

    assert_eq!(summary.batches, 0);
    assert_eq!(summary.total_deleted(), 0);
    assert_eq!(f.total_rows().await, before);
}

// ============================================================================
// Properties
// ============================================================================

pub async fn test_resolved_relationship_blocks_entity(ctx: &EngineTestContext) {
    let f = ctx.fixtures.as_ref();
    let product = Uuid::new_v4();
    let entity = f.insert_entity().await;
    f.insert_token("tok", Some(entity), Some(product), days_ago(10), None)
        .await;
    let withdrawn = f.insert_relationship(entity, product, "withdrawn").await;
    f.insert_corpus_item(entity).await;

    ctx.engine(test_config(100))
        .run(default_cutoff(), None)
        .await
        .expect("Run failed");

    assert!(!f.token_exists("tok").await);
    assert!(f.entity_exists(entity).await);
    assert!(f.relationship_exists(withdrawn).await);
    assert_eq!(f.corpus_count(entity).await, 1);
}

pub async fn test_second_run_deletes_nothing(ctx: &EngineTestContext) {
    let f = ctx.fixtures.as_ref();
    let product = Uuid::new_v4();
    for i in 0..4 {
        let entity = f.insert_entity().await;
        f.insert_token(&format!("tok-{i}"), Some(entity), Some(product), days_ago(10 + i), None)
            .await;
        f.insert_relationship(entity, product, "new").await;
        f.insert_corpus_item(entity).await;
    }
    let keeper = f.insert_entity().await;
    f.insert_token("keep", Some(keeper), Some(product), days_ago(1), None)
        .await;

    let engine = ctx.engine(test_config(3));
    let first = engine.run(default_cutoff(), None).await.expect("Run failed");
    assert_eq!(first.tokens_deleted, 4);
    let rows_after_first = f.total_rows().await;

    let second = engine.run(default_cutoff(), None).await.expect("Run failed");
    assert_eq!(second.total_deleted(), 0);
    assert_eq!(second.batches, 0);
    assert_eq!(f.total_rows().await, rows_after_first);
}

pub async fn test_entity_retired_with_last_expired_token(ctx: &EngineTestContext) {
    let f = ctx.fixtures.as_ref();
    let product = Uuid::new_v4();
    let entity = f.insert_entity().await;
    f.insert_token("sib-1", Some(entity), Some(product), days_ago(10), None)
        .await;
    f.insert_token("sib-2", Some(entity), Some(product), days_ago(9), None)
        .await;
    f.insert_relationship(entity, product, "new").await;
    f.insert_corpus_item(entity).await;

    // One token per page, so the entity is seen twice
    let summary = ctx
        .engine(test_config(1))
        .run(default_cutoff(), None)
        .await
        .expect("Run failed");

    assert_eq!(summary.batches, 2);
    assert_eq!(summary.tokens_deleted, 2);
    assert_eq!(summary.entities_deleted, 1);
    assert_eq!(summary.corpus_items_deleted, 1);
    assert_eq!(f.total_rows().await, 0);
}

pub async fn test_pages_through_all_candidates(ctx: &EngineTestContext) {
    let f = ctx.fixtures.as_ref();
    let shared = days_ago(10);
    for i in 0..7 {
        f.insert_token(&format!("tok-{i}"), None, None, shared, None)
            .await;
    }

    let summary = ctx
        .engine(test_config(3))
        .run(default_cutoff(), None)
        .await
        .expect("Run failed");

    assert_eq!(summary.pending_at_start, 7);
    assert_eq!(summary.batches, 3);
    assert_eq!(summary.tokens_deleted, 7);
    assert_eq!(summary.cursor.as_ref().map(|c| c.token.as_str()), Some("tok-6"));
    assert!(!summary.truncated);
}

pub async fn test_resume_continues_after_cursor(ctx: &EngineTestContext) {
    let f = ctx.fixtures.as_ref();
    for i in 0..5 {
        f.insert_token(&format!("tok-{i}"), None, None, days_ago(20 - i), None)
            .await;
    }

    let mut config = test_config(2);
    config.safety.max_deletes_per_run = 2;
    let first = ctx
        .engine(config)
        .run(default_cutoff(), None)
        .await
        .expect("Run failed");
    assert!(first.truncated);
    assert_eq!(first.tokens_deleted, 2);
    let cursor = first.cursor.clone().expect("cursor after first batch");
    assert_eq!(cursor.token, "tok-1");

    // Older than the cursor, so a resumed run must not reach it
    f.insert_token("backfill", None, None, days_ago(30), None)
        .await;

    let resumed = TokenCursor::decode(&cursor.encode()).unwrap();
    let second = ctx
        .engine(test_config(2))
        .run(default_cutoff(), Some(resumed))
        .await
        .expect("Run failed");

    assert_eq!(second.tokens_deleted, 3);
    assert!(f.token_exists("backfill").await);
    for i in 0..5 {
        assert!(!f.token_exists(&format!("tok-{i}")).await);
    }
}

pub async fn test_dry_run_changes_nothing(ctx: &EngineTestContext) {
    let f = ctx.fixtures.as_ref();
    let product = Uuid::new_v4();
    for i in 0..3 {
        let entity = f.insert_entity().await;
        f.insert_token(&format!("tok-{i}"), Some(entity), Some(product), days_ago(10), None)
            .await;
        f.insert_relationship(entity, product, "new").await;
        f.insert_corpus_item(entity).await;
    }
    let before = f.total_rows().await;

    let config = CleanupConfig {
        safety: CleanupSafety {
            dry_run: true,
            ..Default::default()
        },
        ..test_config(2)
    };
    let summary = ctx
        .engine(config)
        .run(default_cutoff(), None)
        .await
        .expect("Run failed");

    assert!(summary.dry_run);
    assert_eq!(summary.batches, 2);
    assert_eq!(summary.tokens_deleted, 3);
    assert_eq!(summary.entities_deleted, 3);
    assert_eq!(summary.relationships_deleted, 3);
    assert_eq!(summary.corpus_items_deleted, 3);
    assert_eq!(f.total_rows().await, before);
}

pub async fn test_cap_equal_to_candidates_is_not_truncated(ctx: &EngineTestContext) {
    let f = ctx.fixtures.as_ref();
    for i in 0..4 {
        f.insert_token(&format!("tok-{i}"), None, None, days_ago(20 - i), None)
            .await;
    }

    let mut config = test_config(2);
    config.safety.max_deletes_per_run = 4;
    let summary = ctx
        .engine(config)
        .run(default_cutoff(), None)
        .await
        .expect("Run failed");

    assert_eq!(summary.tokens_deleted, 4);
    assert!(!summary.truncated);
    assert_eq!(f.total_rows().await, 0);
}

pub async fn test_dry_run_reports_shared_entity_as_preserved(ctx: &EngineTestContext) {
    let f = ctx.fixtures.as_ref();
    let entity = f.insert_entity().await;
    f.insert_token("sib-1", Some(entity), None, days_ago(10), None)
        .await;
    f.insert_token("sib-2", Some(entity), None, days_ago(9), None)
        .await;
    f.insert_corpus_item(entity).await;
    let before = f.total_rows().await;

    let config = CleanupConfig {
        safety: CleanupSafety {
            dry_run: true,
            ..Default::default()
        },
        ..test_config(1)
    };
    let summary = ctx
        .engine(config)
        .run(default_cutoff(), None)
        .await
        .expect("Run failed");

    // Each page still sees the other sibling
    assert_eq!(summary.batches, 2);
    assert_eq!(summary.tokens_deleted, 2);
    assert_eq!(summary.entities_deleted, 0);
    assert_eq!(summary.corpus_items_deleted, 0);
    assert_eq!(summary.entities_preserved, 2);
    assert_eq!(f.total_rows().await, before);
}

// ============================================================================
// SQLite Tests
// ============================================================================

#[cfg(feature = "database-sqlite")]
mod sqlite_tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicU32, Ordering},
    };

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    use super::*;
    use crate::{
        cleanup::{DbJobStatusReporter, JobStatusReporter, run_job},
        db::{
            DbError, DbPool, DbResult, JobRepo,
            sqlite::SqliteIntakeRepo,
            tests::{fixtures::SqliteIntakeFixtures, harness::create_migrated_sqlite_pool},
        },
        models::{
            CandidateToken, DeletionPlan, EntityReferences, JobDescriptor, JobOutcome,
            PageDeletion, ProductEntityPair,
        },
    };

    macro_rules! sqlite_test {
        ($name:ident) => {
            #[tokio::test]
            async fn $name() {
                let pool = create_migrated_sqlite_pool().await;
                let ctx = EngineTestContext {
                    repo: Arc::new(SqliteIntakeRepo::new(pool.clone())),
                    fixtures: Box::new(SqliteIntakeFixtures::new(pool)),
                };
                super::$name(&ctx).await;
            }
        };
    }

    sqlite_test!(test_scenario_full_cascade);
    sqlite_test!(test_scenario_token_without_entity);
    sqlite_test!(test_scenario_completed_sibling_preserves_entity);
    sqlite_test!(test_scenario_completed_sibling_for_other_product);
    sqlite_test!(test_scenario_token_inside_window_untouched);
    sqlite_test!(test_resolved_relationship_blocks_entity);
    sqlite_test!(test_second_run_deletes_nothing);
    sqlite_test!(test_entity_retired_with_last_expired_token);
    sqlite_test!(test_pages_through_all_candidates);
    sqlite_test!(test_resume_continues_after_cursor);
    sqlite_test!(test_dry_run_changes_nothing);
    sqlite_test!(test_cap_equal_to_candidates_is_not_truncated);
    sqlite_test!(test_dry_run_reports_shared_entity_as_preserved);

    /// Fails selected calls before delegating to a real repository.
    struct FlakyRepo {
        inner: SqliteIntakeRepo,
        list_failures: AtomicU32,
        deletes_before_failing: AtomicU32,
        delete_failures: AtomicU32,
        delete_error: fn() -> DbError,
    }

    impl FlakyRepo {
        fn new(pool: sqlx::SqlitePool) -> Self {
            Self {
                inner: SqliteIntakeRepo::new(pool),
                list_failures: AtomicU32::new(0),
                deletes_before_failing: AtomicU32::new(0),
                delete_failures: AtomicU32::new(0),
                delete_error: || DbError::Sqlx(sqlx::Error::PoolTimedOut),
            }
        }

        fn take(counter: &AtomicU32) -> bool {
            counter
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }
    }

    #[async_trait]
    impl IntakeRepo for FlakyRepo {
        async fn list_expired_tokens(
            &self,
            cutoff: DateTime<Utc>,
            after: Option<&TokenCursor>,
            limit: u32,
        ) -> DbResult<Vec<CandidateToken>> {
            if Self::take(&self.list_failures) {
                return Err(DbError::Sqlx(sqlx::Error::PoolTimedOut));
            }
            self.inner.list_expired_tokens(cutoff, after, limit).await
        }

        async fn count_expired_tokens(&self, cutoff: DateTime<Utc>) -> DbResult<i64> {
            self.inner.count_expired_tokens(cutoff).await
        }

        async fn find_removable_relationships(
            &self,
            pairs: &[ProductEntityPair],
            cutoff: DateTime<Utc>,
        ) -> DbResult<Vec<Uuid>> {
            self.inner.find_removable_relationships(pairs, cutoff).await
        }

        async fn entity_references(
            &self,
            entity_ids: &[Uuid],
            page_tokens: &[String],
        ) -> DbResult<Vec<EntityReferences>> {
            self.inner.entity_references(entity_ids, page_tokens).await
        }

        async fn delete_page(
            &self,
            plan: &DeletionPlan,
            cutoff: DateTime<Utc>,
            commit: bool,
        ) -> DbResult<PageDeletion> {
            if !Self::take(&self.deletes_before_failing) && Self::take(&self.delete_failures) {
                return Err((self.delete_error)());
            }
            self.inner.delete_page(plan, cutoff, commit).await
        }
    }

    async fn seed_tokens(fixtures: &SqliteIntakeFixtures, count: i64) {
        for i in 0..count {
            fixtures
                .insert_token(&format!("tok-{i}"), None, None, days_ago(20 - i), None)
                .await;
        }
    }

    #[tokio::test]
    async fn test_transient_delete_errors_are_retried() {
        let pool = create_migrated_sqlite_pool().await;
        let fixtures = SqliteIntakeFixtures::new(pool.clone());
        seed_tokens(&fixtures, 3).await;

        let repo = FlakyRepo::new(pool);
        repo.delete_failures.store(2, Ordering::SeqCst);
        let engine = CleanupEngine::new(Arc::new(repo), test_config(10));

        let summary = engine.run(default_cutoff(), None).await.expect("Run failed");
        assert_eq!(summary.retries, 2);
        assert_eq!(summary.tokens_deleted, 3);
        assert_eq!(fixtures.total_rows().await, 0);
    }

    #[tokio::test]
    async fn test_transient_read_errors_are_retried() {
        let pool = create_migrated_sqlite_pool().await;
        let fixtures = SqliteIntakeFixtures::new(pool.clone());
        seed_tokens(&fixtures, 2).await;

        let repo = FlakyRepo::new(pool);
        repo.list_failures.store(1, Ordering::SeqCst);
        let engine = CleanupEngine::new(Arc::new(repo), test_config(10));

        let summary = engine.run(default_cutoff(), None).await.expect("Run failed");
        assert_eq!(summary.retries, 1);
        assert_eq!(summary.tokens_deleted, 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_abort_without_deleting() {
        let pool = create_migrated_sqlite_pool().await;
        let fixtures = SqliteIntakeFixtures::new(pool.clone());
        seed_tokens(&fixtures, 2).await;

        let repo = FlakyRepo::new(pool);
        repo.delete_failures.store(10, Ordering::SeqCst);
        let engine = CleanupEngine::new(Arc::new(repo), test_config(10));

        let err = engine.run(default_cutoff(), None).await.unwrap_err();
        match &err {
            CleanupError::Page {
                batch,
                stage,
                attempts,
                context,
                resume_from,
                source,
            } => {
                assert_eq!(*batch, 1);
                assert_eq!(*stage, PageStage::Deleting);
                assert_eq!(*attempts, 3);
                assert_eq!(context.size, 2);
                assert_eq!(context.first_token.as_deref(), Some("tok-0"));
                assert!(resume_from.is_none());
                assert!(source.is_transient());
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(fixtures.total_rows().await, 2);
    }

    #[tokio::test]
    async fn test_permanent_error_aborts_with_last_committed_cursor() {
        let pool = create_migrated_sqlite_pool().await;
        let fixtures = SqliteIntakeFixtures::new(pool.clone());
        seed_tokens(&fixtures, 3).await;

        let mut repo = FlakyRepo::new(pool);
        repo.deletes_before_failing.store(1, Ordering::SeqCst);
        repo.delete_failures.store(1, Ordering::SeqCst);
        repo.delete_error = || DbError::Internal("constraint violated".into());
        let engine = CleanupEngine::new(Arc::new(repo), test_config(1));

        let err = engine.run(default_cutoff(), None).await.unwrap_err();
        match &err {
            CleanupError::Page {
                batch, attempts, ..
            } => {
                assert_eq!(*batch, 2);
                assert_eq!(*attempts, 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.resume_from().map(|c| c.token.as_str()), Some("tok-0"));
        assert!(!fixtures.token_exists("tok-0").await);
        assert!(fixtures.token_exists("tok-1").await);
    }

    #[tokio::test]
    async fn test_failure_mid_transaction_rolls_back_whole_page() {
        let pool = create_migrated_sqlite_pool().await;
        let fixtures = SqliteIntakeFixtures::new(pool.clone());
        let product = Uuid::new_v4();
        let entity = fixtures.insert_entity().await;
        fixtures
            .insert_token("tok", Some(entity), Some(product), days_ago(10), None)
            .await;
        fixtures.insert_relationship(entity, product, "new").await;
        fixtures.insert_corpus_item(entity).await;
        fixtures.insert_token("lone", None, None, days_ago(11), None).await;
        let before = fixtures.total_rows().await;

        // Entities are deleted last, after every other statement of the page
        sqlx::query(
            r#"
            CREATE TRIGGER fail_entity_delete BEFORE DELETE ON entities
            BEGIN
                SELECT RAISE(ABORT, 'injected failure');
            END
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();

        let engine = CleanupEngine::new(
            Arc::new(SqliteIntakeRepo::new(pool.clone())),
            test_config(10),
        );
        let err = engine.run(default_cutoff(), None).await.unwrap_err();
        assert!(matches!(
            err,
            CleanupError::Page {
                stage: PageStage::Deleting,
                attempts: 1,
                ..
            }
        ));
        assert_eq!(fixtures.total_rows().await, before);

        sqlx::query("DROP TRIGGER fail_entity_delete")
            .execute(&pool)
            .await
            .unwrap();
        let summary = engine.run(default_cutoff(), None).await.expect("Run failed");
        assert_eq!(summary.tokens_deleted, 2);
        assert_eq!(fixtures.total_rows().await, 0);
    }

    struct RecordingReporter {
        outcomes: Mutex<Vec<JobOutcome>>,
        fail_on: Option<JobOutcome>,
    }

    impl RecordingReporter {
        fn new(fail_on: Option<JobOutcome>) -> Self {
            Self {
                outcomes: Mutex::new(Vec::new()),
                fail_on,
            }
        }

        fn outcomes(&self) -> Vec<JobOutcome> {
            self.outcomes.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl JobStatusReporter for RecordingReporter {
        async fn report(&self, _job_id: Uuid, outcome: JobOutcome) -> DbResult<()> {
            self.outcomes.lock().unwrap().push(outcome);
            if self.fail_on == Some(outcome) {
                return Err(DbError::Internal("reporter down".into()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_run_job_reports_completion_once() {
        let pool = create_migrated_sqlite_pool().await;
        let fixtures = SqliteIntakeFixtures::new(pool.clone());
        seed_tokens(&fixtures, 2).await;

        let engine = CleanupEngine::new(Arc::new(SqliteIntakeRepo::new(pool)), test_config(10));
        let reporter = RecordingReporter::new(None);

        let summary = run_job(&engine, &reporter, &JobDescriptor::now(), None)
            .await
            .expect("Job failed");

        assert_eq!(summary.tokens_deleted, 2);
        assert_eq!(
            reporter.outcomes(),
            vec![JobOutcome::InProgress, JobOutcome::Completed]
        );
    }

    #[tokio::test]
    async fn test_run_job_reports_failure_and_returns_error() {
        let pool = create_migrated_sqlite_pool().await;
        let fixtures = SqliteIntakeFixtures::new(pool.clone());
        seed_tokens(&fixtures, 1).await;

        let repo = FlakyRepo::new(pool);
        repo.delete_failures.store(1, Ordering::SeqCst);
        let mut config = test_config(10);
        config.batch.max_attempts = 1;
        let engine = CleanupEngine::new(Arc::new(repo), config);
        let reporter = RecordingReporter::new(None);

        let err = run_job(&engine, &reporter, &JobDescriptor::now(), None)
            .await
            .unwrap_err();

        assert!(matches!(err, CleanupError::Page { .. }));
        assert_eq!(
            reporter.outcomes(),
            vec![JobOutcome::InProgress, JobOutcome::Failed]
        );
    }

    #[tokio::test]
    async fn test_run_job_surfaces_completion_report_failure() {
        let pool = create_migrated_sqlite_pool().await;
        let engine = CleanupEngine::new(Arc::new(SqliteIntakeRepo::new(pool)), test_config(10));
        let reporter = RecordingReporter::new(Some(JobOutcome::Completed));

        let err = run_job(&engine, &reporter, &JobDescriptor::now(), None)
            .await
            .unwrap_err();

        assert!(matches!(err, CleanupError::Report(_)));
        assert_eq!(
            reporter.outcomes(),
            vec![JobOutcome::InProgress, JobOutcome::Completed]
        );
    }

    #[tokio::test]
    async fn test_db_reporter_records_job_status() {
        let pool = create_migrated_sqlite_pool().await;
        let db = DbPool::from_sqlite(pool);
        let engine = CleanupEngine::new(db.intake(), test_config(10));
        let reporter = DbJobStatusReporter::new(db.jobs());
        let job = JobDescriptor::now();

        run_job(&engine, &reporter, &job, None)
            .await
            .expect("Job failed");

        let record = db.jobs().get(job.id).await.unwrap().expect("job row");
        assert_eq!(record.status, JobOutcome::Completed);
    }
}

// ============================================================================
// PostgreSQL Tests - Require Docker, run with `cargo test -- --ignored`
// ============================================================================

#[cfg(feature = "database-postgres")]
mod postgres_tests {
    use super::*;
    use crate::db::{
        postgres::PostgresIntakeRepo,
        tests::{
            fixtures::PostgresIntakeFixtures,
            harness::postgres::{create_isolated_postgres_pool, run_postgres_migrations},
        },
    };

    macro_rules! postgres_test {
        ($name:ident) => {
            #[tokio::test]
            #[ignore = "Requires Docker - run with `cargo test -- --ignored`"]
            async fn $name() {
                let pool = create_isolated_postgres_pool().await;
                run_postgres_migrations(&pool).await;
                let ctx = EngineTestContext {
                    repo: Arc::new(PostgresIntakeRepo::new(pool.clone())),
                    fixtures: Box::new(PostgresIntakeFixtures::new(pool)),
                };
                super::$name(&ctx).await;
            }
        };
    }

    postgres_test!(test_scenario_full_cascade);
    postgres_test!(test_scenario_token_without_entity);
    postgres_test!(test_scenario_completed_sibling_preserves_entity);
    postgres_test!(test_scenario_completed_sibling_for_other_product);
    postgres_test!(test_scenario_token_inside_window_untouched);
    postgres_test!(test_resolved_relationship_blocks_entity);
    postgres_test!(test_second_run_deletes_nothing);
    postgres_test!(test_entity_retired_with_last_expired_token);
    postgres_test!(test_pages_through_all_candidates);
    postgres_test!(test_resume_continues_after_cursor);
    postgres_test!(test_dry_run_changes_nothing);
    postgres_test!(test_cap_equal_to_candidates_is_not_truncated);
    postgres_test!(test_dry_run_reports_shared_entity_as_preserved);
}
