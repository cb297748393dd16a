//! Admission-controlled backlog of repositories.
//!
//! The head of the backlog is admitted only when its estimated size fits the
//! [`AdmissionBudget`]; otherwise the loop sleeps for the backoff interval and
//! polls again. Admission is strictly FIFO: a smaller item behind a blocked
//! head waits too. Admitted pipelines run as concurrent tasks and release
//! their reservation when they finish.

use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info, warn};

use crate::budget::{as_gib, Admission, AdmissionBudget};
use crate::contract::{MetadataClient, ModelStatus, RepoId, ResourceProbe, TransferClient};
use crate::ledger::Ledger;
use crate::pipeline::Pipeline;
use crate::report::StatusReport;

/// How long each loop iteration waits for an in-flight task to finish before moving on.
const REAP_TIMEOUT: Duration = Duration::from_millis(100);

type Ticket = u64;

/// Reservation held against the budget while a pipeline runs.
#[derive(Debug)]
struct InFlight {
    repo: RepoId,
    reserved: u64,
}

pub struct AdmissionQueue<M, T, P> {
    pipeline: Pipeline<M, T>,
    probe: Arc<P>,
    budget: AdmissionBudget,
    ledger: Option<Ledger>,
}

impl<M, T, P> AdmissionQueue<M, T, P>
where
    M: MetadataClient + 'static,
    T: TransferClient + 'static,
    P: ResourceProbe,
{
    pub fn new(pipeline: Pipeline<M, T>, probe: Arc<P>, budget: AdmissionBudget) -> Self {
        Self {
            pipeline,
            probe,
            budget,
            ledger: None,
        }
    }

    /// Skip repositories the ledger records as mirrored, and record new outcomes in it.
    pub fn with_ledger(mut self, ledger: Ledger) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Processes the whole backlog and waits for every admitted pipeline to finish.
    pub async fn run(mut self, backlog: Vec<RepoId>) -> StatusReport {
        let mut report = StatusReport::with_order(backlog.iter().cloned());
        let mut backlog = dedupe(backlog);
        let mut tasks: JoinSet<(Ticket, ModelStatus)> = JoinSet::new();
        let mut in_flight: HashMap<Ticket, InFlight> = HashMap::new();
        let mut next_ticket: Ticket = 0;

        info!(
            repositories = backlog.len(),
            total_space_gb = as_gib(self.budget.total_space()),
            min_free_space_gb = as_gib(self.budget.min_free_space()),
            "Starting model queue"
        );

        while let Some(repo) = backlog.front().cloned() {
            if self.ledger.as_ref().is_some_and(|l| l.is_mirrored(&repo)) {
                info!(repo = %repo, "Skipping repository, already mirrored by an earlier run");
                backlog.pop_front();
                report.record(&repo, ModelStatus::AlreadyExists);
                continue;
            }

            let size = match self.pipeline.metadata().repo_size(&repo).await {
                Ok(size) => size,
                Err(e) => {
                    error!(repo = %repo, error = %e, "Skipping model due to failed size query");
                    backlog.pop_front();
                    report.record(&repo, ModelStatus::SizeQueryFailed);
                    continue;
                }
            };
            if !self.budget.can_ever_fit(size) {
                error!(
                    repo = %repo,
                    size_gb = as_gib(size),
                    total_space_gb = as_gib(self.budget.total_space()),
                    "Model is larger than the total space budget, skipping"
                );
                backlog.pop_front();
                report.record(&repo, ModelStatus::Failed);
                continue;
            }

            let reserved: u64 = in_flight.values().map(|t| t.reserved).sum();
            let decision = match self.probe.free_space() {
                Ok(free) => Some((free, self.budget.check(free, reserved, size))),
                Err(e) => {
                    error!(error = %e, "Failed to read free space");
                    None
                }
            };

            match decision {
                Some((free, Admission::Admit)) => {
                    backlog.pop_front();
                    let telemetry = self.probe.telemetry();
                    info!(
                        repo = %repo,
                        size_gb = as_gib(size),
                        free_space_gb = as_gib(free),
                        reserved_gb = as_gib(reserved + size),
                        cpu_percent = telemetry.cpu_percent,
                        available_memory_gb = as_gib(telemetry.available_memory),
                        total_memory_gb = as_gib(telemetry.total_memory),
                        "Starting download"
                    );
                    report.record_admission(&repo);

                    let ticket = next_ticket;
                    next_ticket += 1;
                    in_flight.insert(
                        ticket,
                        InFlight {
                            repo: repo.clone(),
                            reserved: size,
                        },
                    );
                    let pipeline = self.pipeline.clone();
                    tasks.spawn(async move {
                        let status = AssertUnwindSafe(pipeline.process(&repo))
                            .catch_unwind()
                            .await
                            .unwrap_or_else(|_| {
                                error!(repo = %repo, "Pipeline panicked");
                                ModelStatus::Failed
                            });
                        (ticket, status)
                    });
                }
                other => {
                    let (free, reason) = match other {
                        Some((free, reason)) => (Some(free), Some(reason)),
                        None => (None, None),
                    };
                    info!(
                        repo = %repo,
                        free_space_gb = free.map(as_gib),
                        required_gb = as_gib(size),
                        reserved_gb = as_gib(reserved),
                        reason = ?reason,
                        in_flight = in_flight.len(),
                        "Waiting for space..."
                    );
                    tokio::time::sleep(self.budget.backoff()).await;
                }
            }

            self.reap(&mut tasks, &mut in_flight, &mut report).await;
        }

        if !tasks.is_empty() {
            info!(in_flight = tasks.len(), "Waiting for all active downloads to complete...");
        }
        while let Some(joined) = tasks.join_next().await {
            self.complete(joined, &mut in_flight, &mut report);
        }

        info!(
            uploaded = report.count(ModelStatus::UploadedSuccess),
            already_exists = report.count(ModelStatus::AlreadyExists),
            "Model queue drained"
        );
        report
    }

    /// Collects finished pipelines, waiting briefly for the first one.
    async fn reap(
        &mut self,
        tasks: &mut JoinSet<(Ticket, ModelStatus)>,
        in_flight: &mut HashMap<Ticket, InFlight>,
        report: &mut StatusReport,
    ) {
        if tasks.is_empty() {
            return;
        }
        let mut next = tokio::time::timeout(REAP_TIMEOUT, tasks.join_next())
            .await
            .ok()
            .flatten();
        while let Some(joined) = next {
            self.complete(joined, in_flight, report);
            next = tasks.join_next().now_or_never().flatten();
        }
    }

    fn complete(
        &mut self,
        joined: Result<(Ticket, ModelStatus), JoinError>,
        in_flight: &mut HashMap<Ticket, InFlight>,
        report: &mut StatusReport,
    ) {
        let (ticket, status) = match joined {
            Ok(done) => done,
            Err(e) => {
                error!(error = %e, "Pipeline task did not complete");
                return;
            }
        };
        let Some(task) = in_flight.remove(&ticket) else {
            warn!(ticket, "Completed task had no reservation");
            return;
        };
        info!(
            repo = %task.repo,
            %status,
            released_gb = as_gib(task.reserved),
            "Released reservation"
        );
        report.record(&task.repo, status);

        if let Some(ledger) = self.ledger.as_mut() {
            ledger.record(&task.repo, status);
            if let Err(e) = ledger.save() {
                error!(path = %ledger.path().display(), error = %e, "Failed to save completion ledger");
            }
        }
    }
}

/// Drops repeated identifiers, keeping the first occurrence.
fn dedupe(backlog: Vec<RepoId>) -> VecDeque<RepoId> {
    let mut seen = HashSet::new();
    backlog
        .into_iter()
        .filter(|repo| {
            let first = seen.insert(repo.clone());
            if !first {
                warn!(repo = %repo, "Duplicate repository in backlog, ignoring");
            }
            first
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedupe_keeps_first_occurrence_order() {
        let ids: Vec<RepoId> = ["a/x", "b/y", "a/x", "c/z"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        let out: Vec<String> = dedupe(ids).into_iter().map(|r| r.to_string()).collect();
        assert_eq!(out, vec!["a/x", "b/y", "c/z"]);
    }
}
