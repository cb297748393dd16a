use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

use crate::budget::{AdmissionBudget, GIB};
use crate::contract::{ConfigError, RepoId};
use crate::license::LicensePolicy;

/// Static run configuration (no secrets), as read from the YAML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// Parent directory for per-repository downloads.
    #[serde(default = "default_local_dir")]
    pub local_dir: PathBuf,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub repositories: Vec<RepoId>,
    /// Overrides the built-in permissive license allow-list.
    #[serde(default)]
    pub allowed_licenses: Option<Vec<String>>,
    /// Completion ledger location; no ledger is kept when absent.
    #[serde(default)]
    pub ledger: Option<PathBuf>,
    /// Create destination repositories as private.
    #[serde(default)]
    pub private: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BudgetConfig {
    #[serde(default = "default_total_space_gb")]
    pub total_space_gb: f64,
    #[serde(default = "default_min_free_space_gb")]
    pub min_free_space_gb: f64,
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u64,
}

fn default_local_dir() -> PathBuf {
    PathBuf::from("models")
}

fn default_total_space_gb() -> f64 {
    900.0
}

fn default_min_free_space_gb() -> f64 {
    100.0
}

fn default_backoff_secs() -> u64 {
    10
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            total_space_gb: default_total_space_gb(),
            min_free_space_gb: default_min_free_space_gb(),
            backoff_secs: default_backoff_secs(),
        }
    }
}

impl BudgetConfig {
    /// Converts to bytes and validates `min_free_space < total_space`.
    pub fn to_budget(&self) -> Result<AdmissionBudget, ConfigError> {
        AdmissionBudget::new(
            gib_to_bytes(self.total_space_gb),
            gib_to_bytes(self.min_free_space_gb),
            Duration::from_secs(self.backoff_secs),
        )
    }
}

fn gib_to_bytes(gib: f64) -> u64 {
    if gib.is_finite() && gib > 0.0 {
        (gib * GIB as f64) as u64
    } else {
        0
    }
}

impl MirrorConfig {
    pub fn license_policy(&self) -> LicensePolicy {
        match &self.allowed_licenses {
            Some(allowed) => LicensePolicy::new(allowed),
            None => LicensePolicy::default(),
        }
    }

    pub fn trace_loaded(&self) {
        info!(
            local_dir = %self.local_dir.display(),
            repositories = self.repositories.len(),
            total_space_gb = self.budget.total_space_gb,
            min_free_space_gb = self.budget.min_free_space_gb,
            ledger = ?self.ledger,
            "Loaded MirrorConfig"
        );
        debug!(?self, "MirrorConfig loaded (full debug)");
    }
}
