//! Batch driver for the intake cleanup.
//!
//! A run moves through `fetching → classifying → deleting → advancing` once
//! per page until a fetch comes back empty (`done`) or a page fails for good
//! (`aborted`, surfaced as [`CleanupError::Page`]). Reaching
//! `max_deletes_per_run` ends the run after one look for a remaining
//! candidate. The cursor only moves in
//! `advancing`, after the page's transaction has finished, so a run that
//! stops at any point can be restarted from [`RunSummary::cursor`] or
//! [`CleanupError::resume_from`] without skipping or repeating work.

use std::{collections::BTreeSet, sync::Arc, time::Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use super::{CandidateLocator, CascadeDeleter, Classification, LivenessClassifier};
use crate::{
    config::CleanupConfig,
    db::{DbError, IntakeRepo, TokenCursor},
    models::{CandidateToken, PageDeletion},
    observability::metrics,
};

/// The step a page was in when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStage {
    Fetching,
    Classifying,
    Deleting,
}

impl PageStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageStage::Fetching => "fetching",
            PageStage::Classifying => "classifying",
            PageStage::Deleting => "deleting",
        }
    }
}

impl std::fmt::Display for PageStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies the rows a failed page was working on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageContext {
    pub size: usize,
    pub first_token: Option<String>,
    pub last_token: Option<String>,
    pub entity_ids: Vec<Uuid>,
}

impl PageContext {
    fn new(page: &[CandidateToken]) -> Self {
        Self {
            size: page.len(),
            first_token: page.first().map(|c| c.token.clone()),
            last_token: page.last().map(|c| c.token.clone()),
            entity_ids: page
                .iter()
                .filter_map(|c| c.entity_id)
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CleanupError {
    /// The store could not be used at all; no page was attempted.
    #[error("Cleanup setup failed: {0}")]
    Setup(#[source] DbError),

    /// A page failed permanently or ran out of attempts.
    #[error("Batch {batch} failed while {stage} after {attempts} attempt(s): {source}")]
    Page {
        batch: u64,
        stage: PageStage,
        attempts: u32,
        context: PageContext,
        /// Position after the last finished page.
        resume_from: Option<TokenCursor>,
        #[source]
        source: DbError,
    },

    /// The run finished but its terminal status could not be recorded.
    #[error("Failed to report job status: {0}")]
    Report(#[source] DbError),
}

impl CleanupError {
    /// Cursor to pass to the next run to continue where this one stopped.
    pub fn resume_from(&self) -> Option<&TokenCursor> {
        match self {
            CleanupError::Page { resume_from, .. } => resume_from.as_ref(),
            _ => None,
        }
    }
}

/// Totals for one run.
///
/// In dry-run mode the counts are what each page would have deleted on its
/// own. Pages are rolled back, so an entity shared by expired tokens on
/// different pages is never freed by an earlier page and is reported under
/// `entities_preserved` rather than `entities_deleted`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub batches: u64,
    pub tokens_deleted: u64,
    pub entities_deleted: u64,
    pub relationships_deleted: u64,
    pub corpus_items_deleted: u64,
    /// Referenced entities kept because something still uses them.
    pub entities_preserved: u64,
    pub retries: u64,
    /// Candidates waiting when the run started.
    pub pending_at_start: i64,
    /// Position after the last finished page.
    pub cursor: Option<TokenCursor>,
    /// The run stopped at `max_deletes_per_run` with candidates left.
    pub truncated: bool,
    pub dry_run: bool,
    pub duration_ms: u64,
}

impl RunSummary {
    fn absorb(&mut self, deletion: &PageDeletion, classification: &Classification) {
        self.batches += 1;
        self.tokens_deleted += deletion.tokens;
        self.entities_deleted += deletion.entities;
        self.relationships_deleted += deletion.relationships;
        self.corpus_items_deleted += deletion.corpus_items;
        self.entities_preserved += classification
            .preserved_entities
            .union(&deletion.preserved_entities)
            .count() as u64;
    }

    pub fn total_deleted(&self) -> u64 {
        self.tokens_deleted
            + self.entities_deleted
            + self.relationships_deleted
            + self.corpus_items_deleted
    }
}

enum DriverState {
    Fetching,
    Classifying(Vec<CandidateToken>),
    Deleting {
        page: Vec<CandidateToken>,
        classification: Classification,
    },
    Advancing {
        page: Vec<CandidateToken>,
        classification: Classification,
        deletion: PageDeletion,
    },
    /// The delete cap was reached; look for one more candidate.
    CheckingRemaining,
    Done,
}

/// Runs the locator, classifier and deleter over every candidate page.
pub struct CleanupEngine {
    locator: CandidateLocator,
    classifier: LivenessClassifier,
    deleter: CascadeDeleter,
    config: CleanupConfig,
}

impl CleanupEngine {
    pub fn new(repo: Arc<dyn IntakeRepo>, config: CleanupConfig) -> Self {
        Self {
            locator: CandidateLocator::new(Arc::clone(&repo)),
            classifier: LivenessClassifier::new(Arc::clone(&repo)),
            deleter: CascadeDeleter::new(repo, config.safety.dry_run),
            config,
        }
    }

    pub fn config(&self) -> &CleanupConfig {
        &self.config
    }

    /// Process every candidate older than `cutoff`, starting after
    /// `resume_from` when given.
    pub async fn run(
        &self,
        cutoff: DateTime<Utc>,
        resume_from: Option<TokenCursor>,
    ) -> Result<RunSummary, CleanupError> {
        let started = Instant::now();
        let dry_run = self.config.safety.dry_run;
        let max_deletes = self.config.max_deletes();
        let dry_run_msg = if dry_run { " (DRY RUN)" } else { "" };

        let pending = self
            .locator
            .pending(cutoff)
            .await
            .map_err(CleanupError::Setup)?;

        let resume = resume_from.as_ref().map(TokenCursor::encode);
        tracing::info!(
            cutoff = %cutoff,
            pending,
            resume_from = resume.as_deref(),
            page_size = self.config.batch.page_size,
            dry_run,
            "Starting intake cleanup{}",
            dry_run_msg
        );

        let mut summary = RunSummary {
            pending_at_start: pending,
            cursor: resume_from,
            dry_run,
            ..Default::default()
        };
        let mut failures = 0u32;
        let mut state = DriverState::Fetching;

        loop {
            state = match state {
                DriverState::Fetching => {
                    let remaining = max_deletes.saturating_sub(summary.tokens_deleted);
                    let limit = u64::from(self.config.batch.page_size).min(remaining) as u32;
                    match self
                        .locator
                        .next_page(cutoff, summary.cursor.as_ref(), limit)
                        .await
                    {
                        Ok(page) if page.is_empty() => DriverState::Done,
                        Ok(page) => DriverState::Classifying(page),
                        Err(e) => {
                            self.retry_or_abort(
                                PageStage::Fetching,
                                e,
                                &[],
                                &mut failures,
                                &mut summary,
                            )
                            .await?;
                            DriverState::Fetching
                        }
                    }
                }
                DriverState::Classifying(page) => {
                    match self.classifier.classify(&page, cutoff).await {
                        Ok(classification) => DriverState::Deleting {
                            page,
                            classification,
                        },
                        Err(e) => {
                            self.retry_or_abort(
                                PageStage::Classifying,
                                e,
                                &page,
                                &mut failures,
                                &mut summary,
                            )
                            .await?;
                            DriverState::Classifying(page)
                        }
                    }
                }
                DriverState::Deleting {
                    page,
                    classification,
                } => match self.deleter.delete(&page, &classification, cutoff).await {
                    Ok(deletion) => DriverState::Advancing {
                        page,
                        classification,
                        deletion,
                    },
                    Err(e) => {
                        self.retry_or_abort(
                            PageStage::Deleting,
                            e,
                            &page,
                            &mut failures,
                            &mut summary,
                        )
                        .await?;
                        DriverState::Deleting {
                            page,
                            classification,
                        }
                    }
                },
                DriverState::Advancing {
                    page,
                    classification,
                    deletion,
                } => {
                    summary.absorb(&deletion, &classification);
                    failures = 0;
                    if let Some(last) = page.last() {
                        summary.cursor = Some(TokenCursor::after(last));
                    }
                    let cursor = summary.cursor.as_ref().map(TokenCursor::encode);

                    tracing::info!(
                        batch = summary.batches,
                        total = deletion.total(),
                        tokens = deletion.tokens,
                        entities = deletion.entities,
                        relationships = deletion.relationships,
                        corpus_items = deletion.corpus_items,
                        preserved = deletion.preserved_entities.len()
                            + classification.preserved_entities.len(),
                        cursor = cursor.as_deref(),
                        "Cleanup batch {}{}",
                        if deletion.rolled_back { "rolled back" } else { "committed" },
                        dry_run_msg
                    );

                    if summary.tokens_deleted >= max_deletes {
                        DriverState::CheckingRemaining
                    } else {
                        DriverState::Fetching
                    }
                }
                DriverState::CheckingRemaining => {
                    match self
                        .locator
                        .next_page(cutoff, summary.cursor.as_ref(), 1)
                        .await
                    {
                        Ok(rest) => {
                            if !rest.is_empty() {
                                summary.truncated = true;
                                let cursor = summary.cursor.as_ref().map(TokenCursor::encode);
                                tracing::warn!(
                                    max_deletes_per_run = max_deletes,
                                    cursor = cursor.as_deref(),
                                    "Delete limit reached, stopping run early"
                                );
                            }
                            DriverState::Done
                        }
                        Err(e) => {
                            self.retry_or_abort(
                                PageStage::Fetching,
                                e,
                                &[],
                                &mut failures,
                                &mut summary,
                            )
                            .await?;
                            DriverState::CheckingRemaining
                        }
                    }
                }
                DriverState::Done => break,
            };
        }

        summary.duration_ms = started.elapsed().as_millis() as u64;

        tracing::info!(
            batches = summary.batches,
            tokens = summary.tokens_deleted,
            entities = summary.entities_deleted,
            relationships = summary.relationships_deleted,
            corpus_items = summary.corpus_items_deleted,
            preserved = summary.entities_preserved,
            retries = summary.retries,
            truncated = summary.truncated,
            duration_ms = summary.duration_ms,
            "Intake cleanup finished{}",
            dry_run_msg
        );

        Ok(summary)
    }

    /// Count a failed attempt and either back off or give up on the page.
    async fn retry_or_abort(
        &self,
        stage: PageStage,
        error: DbError,
        page: &[CandidateToken],
        failures: &mut u32,
        summary: &mut RunSummary,
    ) -> Result<(), CleanupError> {
        *failures += 1;
        let batch = summary.batches + 1;
        let max_attempts = self.config.batch.max_attempts;
        let cursor = summary.cursor.as_ref().map(TokenCursor::encode);

        if error.is_transient() && *failures < max_attempts {
            let delay = self.config.batch.delay_for_attempt(*failures - 1);
            tracing::warn!(
                batch,
                stage = %stage,
                attempt = *failures,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                cursor = cursor.as_deref(),
                error = %error,
                "Transient store error, retrying page"
            );
            metrics::record_page_retry(stage.as_str());
            summary.retries += 1;
            tokio::time::sleep(delay).await;
            return Ok(());
        }

        let context = PageContext::new(page);
        tracing::error!(
            batch,
            stage = %stage,
            attempts = *failures,
            transient = error.is_transient(),
            cursor = cursor.as_deref(),
            first_token = context.first_token.as_deref(),
            last_token = context.last_token.as_deref(),
            entities = ?context.entity_ids,
            error = %error,
            "Cleanup page failed, aborting run"
        );

        Err(CleanupError::Page {
            batch,
            stage,
            attempts: *failures,
            context,
            resume_from: summary.cursor.clone(),
            source: error,
        })
    }
}
