//! Cleanup of expired public intake tokens.
//!
//! A token that was never completed within the retention window is garbage,
//! along with the entity it created and everything hanging off that entity,
//! unless something live still points at the entity. Each run:
//!
//! 1. [`CandidateLocator`] pages through expired, uncompleted tokens.
//! 2. [`LivenessClassifier`] decides which entities and `new` relationships
//!    of the page are no longer referenced.
//! 3. [`CascadeDeleter`] removes corpus items, relationships, tokens and
//!    entities of the page in one transaction, re-checking entities first.
//! 4. [`CleanupEngine`] advances the cursor past the page and repeats,
//!    retrying transient store errors.
//!
//! [`run_job`] wraps a run with job status reporting;
//! [`start_cleanup_worker`] repeats it on an interval.

mod classifier;
mod deleter;
mod driver;
mod job;
mod locator;
mod reporter;
mod worker;

#[cfg(all(test, any(feature = "database-sqlite", feature = "database-postgres")))]
mod tests;

pub use classifier::{Classification, LivenessClassifier};
pub use deleter::CascadeDeleter;
pub use driver::{CleanupEngine, CleanupError, PageContext, PageStage, RunSummary};
pub use job::run_job;
pub use locator::CandidateLocator;
pub use reporter::{DbJobStatusReporter, JobStatusReporter, LogReporter};
pub use worker::start_cleanup_worker;
