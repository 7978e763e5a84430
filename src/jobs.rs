//! Background family jobs.
//!
//! Every structural change to a family is followed by a recompute that the
//! HTTP response does not wait for. Each job is a detached tokio task. Jobs
//! for overlapping families are not serialized or deduplicated, so the last
//! writer wins. Counters and [`FamilyJobs::wait_idle`] make the convergence
//! window observable.

use crate::{
    core::family::{
        DiscountReport, rerank_by_birth_date, reset_family_order_for_orphans,
        update_family_discounts,
    },
    errors::{Error, Result},
};
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Work to run after a family-affecting request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FamilyJob {
    /// Recompute ranks and discounts for the families of these students
    Recompute(Vec<i64>),
    /// Birth date changed: re-rank the family by birth order, then recompute.
    ///
    /// The re-rank replaces any order set by hand through
    /// [`crate::core::family::set_family_order`].
    BirthDateChanged(i64),
    /// A link was removed: recompute the old family, then check both ends for orphaning
    LinkRemoved {
        /// Family before the link was severed
        family_before: Vec<i64>,
        /// Both ends of the removed link
        endpoints: [i64; 2],
    },
    /// A student was deleted: recompute who is left and orphan-check them
    StudentRemoved {
        /// Former family members of the deleted student
        remaining: Vec<i64>,
    },
}

/// What a finished job did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOutcome {
    /// Discount propagation summary
    pub report: DiscountReport,
    /// Ranks rewritten by a birth-date re-rank
    pub reranked: usize,
    /// Students reset to the singleton rank
    pub orphans_reset: Vec<i64>,
}

/// Snapshot of the dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStats {
    /// Jobs dispatched but not finished
    pub in_flight: usize,
    /// Jobs that finished successfully
    pub completed: u64,
    /// Jobs that returned an error or panicked
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    completed: AtomicU64,
    failed: AtomicU64,
}

/// Dispatches [`FamilyJob`]s onto the tokio runtime.
#[derive(Clone)]
pub struct FamilyJobs {
    db: DatabaseConnection,
    in_flight: Arc<watch::Sender<usize>>,
    counters: Arc<Counters>,
}

/// Decrements the in-flight count when the task ends, panics included.
struct InFlightGuard {
    in_flight: Arc<watch::Sender<usize>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Handle to one dispatched job. Dropping it detaches the job.
pub struct JobHandle(JoinHandle<Result<JobOutcome>>);

impl JobHandle {
    /// Waits for the job to finish.
    pub async fn wait(self) -> Result<JobOutcome> {
        self.0.await.map_err(|e| Error::Job {
            message: e.to_string(),
        })?
    }
}

impl FamilyJobs {
    /// Creates a dispatcher that runs jobs against `db`.
    #[must_use]
    pub fn new(db: DatabaseConnection) -> Self {
        let (in_flight, _) = watch::channel(0);
        Self {
            db,
            in_flight: Arc::new(in_flight),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Starts `job` in the background and returns immediately.
    pub fn dispatch(&self, job: FamilyJob) -> JobHandle {
        self.in_flight.send_modify(|n| *n += 1);
        let guard = InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        };
        let db = self.db.clone();
        let counters = Arc::clone(&self.counters);

        JobHandle(tokio::spawn(async move {
            let _guard = guard;
            let result = run_job(&db, &job).await;
            match &result {
                Ok(outcome) => {
                    counters.completed.fetch_add(1, Ordering::Relaxed);
                    info!(
                        job = ?job,
                        contracts_updated = outcome.report.contracts_updated,
                        ranks_updated = outcome.report.ranks_updated,
                        failures = outcome.report.failures,
                        "Family job finished"
                    );
                }
                Err(e) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    error!(job = ?job, error = %e, "Family job failed");
                }
            }
            result
        }))
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> JobStats {
        JobStats {
            in_flight: *self.in_flight.borrow(),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Resolves once no job is running.
    pub async fn wait_idle(&self) {
        let mut rx = self.in_flight.subscribe();
        rx.wait_for(|n| *n == 0).await.ok();
    }
}

async fn run_job(db: &DatabaseConnection, job: &FamilyJob) -> Result<JobOutcome> {
    let mut outcome = JobOutcome::default();

    match job {
        FamilyJob::Recompute(seeds) => {
            outcome.report = update_family_discounts(db, seeds).await?;
        }
        FamilyJob::BirthDateChanged(student_id) => {
            outcome.reranked = rerank_by_birth_date(db, *student_id).await?;
            outcome.report = update_family_discounts(db, &[*student_id]).await?;
        }
        FamilyJob::LinkRemoved {
            family_before,
            endpoints,
        } => {
            let recompute = update_family_discounts(db, family_before).await;
            let (reset, reset_failures) = reset_orphans(db, endpoints).await;
            outcome.orphans_reset = reset;
            outcome.report = recompute?;
            outcome.report.failures += reset_failures;
        }
        FamilyJob::StudentRemoved { remaining } => {
            let recompute = update_family_discounts(db, remaining).await;
            let (reset, reset_failures) = reset_orphans(db, remaining).await;
            outcome.orphans_reset = reset;
            outcome.report = recompute?;
            outcome.report.failures += reset_failures;
        }
    }

    Ok(outcome)
}

/// Orphan-checks every id, returning those reset and how many checks failed.
async fn reset_orphans(db: &DatabaseConnection, ids: &[i64]) -> (Vec<i64>, usize) {
    let mut reset = Vec::new();
    let mut failures = 0;
    for &id in ids {
        match reset_family_order_for_orphans(db, id).await {
            Ok(true) => reset.push(id),
            Ok(false) => {}
            Err(e) => {
                error!(student_id = id, error = %e, "Failed to reset family order for orphan");
                failures += 1;
            }
        }
    }
    (reset, failures)
}
