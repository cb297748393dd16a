//! # contract: shared types and collaborator interfaces
//!
//! Everything the queue and pipeline need from the outside world goes through
//! the three traits in this module:
//! - [`MetadataClient`]: size, license and file listing of a remote repository
//! - [`TransferClient`]: bulk download/upload and destination create/delete
//! - [`ResourceProbe`]: free local space and host telemetry
//!
//! The traits are annotated for `mockall`, so consumers get `MockMetadataClient`,
//! `MockTransferClient` and `MockResourceProbe` under the `test-export-mocks` feature.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use mockall::automock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A `namespace/name` repository identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepoId {
    namespace: String,
    name: String,
}

impl RepoId {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The repository name without its namespace, e.g. `opt-125m` for `facebook/opt-125m`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The same repository name placed under another namespace (the mirror destination).
    pub fn in_namespace(&self, namespace: &str) -> RepoId {
        RepoId {
            namespace: namespace.to_string(),
            name: self.name.clone(),
        }
    }
}

impl FromStr for RepoId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.split_once('/') {
            Some((namespace, name))
                if !namespace.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(RepoId {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                })
            }
            _ => Err(ConfigError::InvalidRepoId(s.to_string())),
        }
    }
}

impl TryFrom<String> for RepoId {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RepoId> for String {
    fn from(value: RepoId) -> Self {
        value.to_string()
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// One file in a remote repository listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    /// Path relative to the repository root, `/`-separated.
    pub path: String,
    /// Size in bytes (the LFS object size for LFS-tracked files).
    pub size: u64,
}

/// Terminal outcome recorded once per repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelStatus {
    UploadedSuccess,
    LicenseBlocked,
    AlreadyExists,
    SizeQueryFailed,
    #[serde(rename = "upload-failed-and-rolled-back")]
    UploadFailedRolledBack,
    #[serde(rename = "generic-failure")]
    Failed,
}

impl ModelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelStatus::UploadedSuccess => "uploaded-success",
            ModelStatus::LicenseBlocked => "license-blocked",
            ModelStatus::AlreadyExists => "already-exists",
            ModelStatus::SizeQueryFailed => "size-query-failed",
            ModelStatus::UploadFailedRolledBack => "upload-failed-and-rolled-back",
            ModelStatus::Failed => "generic-failure",
        }
    }

    /// Whether the destination holds a full copy after this outcome.
    pub fn is_mirrored(&self) -> bool {
        matches!(self, ModelStatus::UploadedSuccess | ModelStatus::AlreadyExists)
    }
}

impl fmt::Display for ModelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by the hub collaborators.
#[derive(Debug, Error)]
pub enum HubError {
    /// The remote repository (or the requested metadata) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Network failure, rate limit, missing access or server error.
    #[error("hub unavailable (status {status:?}): {message}")]
    Unavailable { status: Option<u16>, message: String },

    /// The remote already holds conflicting content.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An external command (git, git lfs) failed.
    #[error("`{command}` failed: {message}")]
    Command { command: String, message: String },

    #[error("unexpected failure: {0}")]
    Unknown(String),
}

impl HubError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, HubError::NotFound(_))
    }
}

/// Configuration problems detected before any work starts.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid repository id {0:?}, expected `namespace/name`")]
    InvalidRepoId(String),

    #[error(
        "minimum free space ({floor} bytes) must be below the total space ceiling ({ceiling} bytes)"
    )]
    FloorNotBelowCeiling { floor: u64, ceiling: u64 },
}

/// Coarse host telemetry, logged alongside admission decisions.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HostTelemetry {
    pub cpu_percent: f32,
    pub total_memory: u64,
    pub available_memory: u64,
}

/// Read access to remote repository metadata.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait MetadataClient: Send + Sync {
    /// Total byte size of all files in the repository.
    async fn repo_size(&self, repo: &RepoId) -> Result<u64, HubError>;

    /// The license tag declared by the repository, if any.
    async fn license(&self, repo: &RepoId) -> Result<Option<String>, HubError>;

    /// All files in the repository. Fails with [`HubError::NotFound`] if the repository is absent.
    async fn list_files(&self, repo: &RepoId) -> Result<Vec<RemoteFile>, HubError>;
}

/// Bulk transfer and destination management.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait TransferClient: Send + Sync {
    /// Fetch `files` of the repository into `dest`, keeping their relative paths.
    async fn download(
        &self,
        repo: &RepoId,
        dest: &Path,
        files: &[RemoteFile],
    ) -> Result<(), HubError>;

    /// Create the repository. Returns `true` if it was newly created, `false` if it already existed.
    async fn create_repo(&self, repo: &RepoId) -> Result<bool, HubError>;

    /// Upload the whole of `source` (recursively) into `repo`.
    async fn upload(&self, source: &Path, repo: &RepoId) -> Result<(), HubError>;

    async fn delete_repo(&self, repo: &RepoId) -> Result<(), HubError>;
}

/// Local resource readings.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait ResourceProbe: Send + Sync {
    /// Bytes available on the volume holding the working directories.
    fn free_space(&self) -> std::io::Result<u64>;

    fn telemetry(&self) -> HostTelemetry;
}
