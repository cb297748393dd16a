//! Per-repository terminal statuses, reported in backlog order.

use std::collections::HashMap;
use std::fmt;

use tracing::{info, warn};

use crate::contract::{ModelStatus, RepoId};

/// Write-once status per repository, iterated in declaration order.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct StatusReport {
    order: Vec<RepoId>,
    statuses: HashMap<RepoId, ModelStatus>,
    admitted: Vec<RepoId>,
}

impl StatusReport {
    /// A report whose rows follow `order`. Repositories never recorded show as pending.
    pub fn with_order<I>(order: I) -> Self
    where
        I: IntoIterator<Item = RepoId>,
    {
        let mut report = Self::default();
        for repo in order {
            if !report.order.contains(&repo) {
                report.order.push(repo);
            }
        }
        report
    }

    /// Records the terminal status. A second write for the same repository is ignored.
    pub fn record(&mut self, repo: &RepoId, status: ModelStatus) -> bool {
        if let Some(existing) = self.statuses.get(repo) {
            warn!(repo = %repo, %existing, ignored = %status, "Status already recorded");
            return false;
        }
        info!(repo = %repo, %status, "Recorded terminal status");
        if !self.order.contains(repo) {
            self.order.push(repo.clone());
        }
        self.statuses.insert(repo.clone(), status);
        true
    }

    pub(crate) fn record_admission(&mut self, repo: &RepoId) {
        self.admitted.push(repo.clone());
    }

    pub fn status(&self, repo: &RepoId) -> Option<ModelStatus> {
        self.statuses.get(repo).copied()
    }

    /// Repositories in the order the queue admitted them.
    pub fn admission_order(&self) -> &[RepoId] {
        &self.admitted
    }

    /// Rows in declaration order, `None` for repositories that never reached a terminal status.
    pub fn rows(&self) -> impl Iterator<Item = (&RepoId, Option<ModelStatus>)> + '_ {
        self.order.iter().map(|repo| (repo, self.status(repo)))
    }

    pub fn count(&self, status: ModelStatus) -> usize {
        self.statuses.values().filter(|s| **s == status).count()
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .order
            .iter()
            .map(|r| r.to_string().len())
            .max()
            .unwrap_or(0)
            .max("REPOSITORY".len());
        writeln!(f, "{:<width$}  STATUS", "REPOSITORY")?;
        for (repo, status) in self.rows() {
            let status = status.map_or("pending", |s| s.as_str());
            writeln!(f, "{:<width$}  {status}", repo.to_string())?;
        }
        Ok(())
    }
}
