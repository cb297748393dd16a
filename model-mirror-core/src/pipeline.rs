//! Per-repository pipeline: eligibility, download, upload and cleanup.
//!
//! [`Pipeline::process`] always terminates with a [`ModelStatus`]. Every
//! collaborator error is logged and turned into a status here, so nothing
//! escapes to the queue. The local working directory is owned by a
//! [`WorkDir`] guard and removed on every exit path except a license block,
//! where nothing is fetched and the directory is left as found.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, info_span, warn, Instrument};

use crate::contract::{HubError, MetadataClient, ModelStatus, RemoteFile, RepoId, TransferClient};
use crate::filter::FileFilter;
use crate::license::{manual_acceptance_url, LicensePolicy};
use crate::workdir::WorkDir;

/// Where and how repositories are mirrored.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Parent of the per-repository working directories (`<local_root>/<namespace>/<name>`).
    pub local_root: PathBuf,
    /// Destination namespace (organisation or account).
    pub org_name: String,
    pub license_policy: LicensePolicy,
    /// Base URL used to point operators at repositories needing manual license acceptance.
    pub hub_endpoint: String,
}

pub struct Pipeline<M, T> {
    metadata: Arc<M>,
    transfer: Arc<T>,
    settings: Arc<PipelineSettings>,
}

impl<M, T> Clone for Pipeline<M, T> {
    fn clone(&self) -> Self {
        Self {
            metadata: Arc::clone(&self.metadata),
            transfer: Arc::clone(&self.transfer),
            settings: Arc::clone(&self.settings),
        }
    }
}

impl<M, T> Pipeline<M, T>
where
    M: MetadataClient,
    T: TransferClient,
{
    pub fn new(metadata: Arc<M>, transfer: Arc<T>, settings: PipelineSettings) -> Self {
        Self {
            metadata,
            transfer,
            settings: Arc::new(settings),
        }
    }

    pub(crate) fn metadata(&self) -> &M {
        &self.metadata
    }

    /// Local working directory for `repo`.
    pub fn local_dir(&self, repo: &RepoId) -> PathBuf {
        self.settings
            .local_root
            .join(repo.namespace())
            .join(repo.name())
    }

    /// Mirrors one repository into the destination namespace.
    pub async fn process(&self, repo: &RepoId) -> ModelStatus {
        let span = info_span!("pipeline", repo = %repo);
        async {
            let status = self.run(repo).await;
            info!(%status, "Finished processing repository");
            status
        }
        .instrument(span)
        .await
    }

    async fn run(&self, repo: &RepoId) -> ModelStatus {
        let work = WorkDir::new(self.local_dir(repo));

        match self.metadata.license(repo).await {
            Ok(license) if self.settings.license_policy.permits(license.as_deref()) => {
                info!(license = license.as_deref().unwrap_or("none"), "License permits mirroring");
            }
            Ok(license) => {
                warn!(
                    license = license.as_deref().unwrap_or("none"),
                    accept_at = %manual_acceptance_url(&self.settings.hub_endpoint, repo),
                    "License is not on the allow-list; review and accept it manually"
                );
                work.keep();
                return ModelStatus::LicenseBlocked;
            }
            Err(e) => {
                error!(error = %e, "Failed to query license");
                return ModelStatus::Failed;
            }
        }

        let listing = match self.metadata.list_files(repo).await {
            Ok(listing) => listing,
            Err(e) => {
                error!(error = %e, "Failed to list source repository");
                return ModelStatus::Failed;
            }
        };
        let filter = FileFilter::for_listing(&listing);
        let selected: Vec<RemoteFile> = filter.select(&listing).into_iter().cloned().collect();
        if selected.is_empty() {
            warn!(
                listed = listing.len(),
                filter = ?filter.kind(),
                "No files left after filtering; only repository metadata will be mirrored"
            );
        }

        let dest = repo.in_namespace(&self.settings.org_name);

        match self.destination_complete(&work, &selected, &dest).await {
            Ok(true) => {
                info!(destination = %dest, "Destination already holds every file, skipping transfer");
                return ModelStatus::AlreadyExists;
            }
            Ok(false) => {}
            Err(e) => {
                error!(destination = %dest, error = %e, "Failed to inspect destination repository");
                return ModelStatus::Failed;
            }
        }

        if work.exists() && !work.is_partial() {
            warn!(path = %work.path().display(), "Model directory already exists. Skipping download.");
        } else {
            if work.is_partial() {
                warn!(path = %work.path().display(), "Resuming interrupted download");
            }
            info!(
                path = %work.path().display(),
                filter = ?filter.kind(),
                files = selected.len(),
                skipped = listing.len() - selected.len(),
                "Starting download"
            );
            if let Err(e) = self.transfer.download(repo, work.path(), &selected).await {
                error!(error = %e, "Download failed");
                return ModelStatus::Failed;
            }
            info!("Successfully downloaded model");
        }

        self.upload(&work, &dest).await
    }

    /// True when `dest` exists and already contains every file this run would upload.
    async fn destination_complete(
        &self,
        work: &WorkDir,
        selected: &[RemoteFile],
        dest: &RepoId,
    ) -> Result<bool, HubError> {
        let dest_files = match self.metadata.list_files(dest).await {
            Ok(files) => files,
            Err(e) if e.is_not_found() => return Ok(false),
            Err(e) => return Err(e),
        };
        let present: HashSet<&str> = dest_files.iter().map(|f| f.path.as_str()).collect();

        let expected: Vec<String> = if work.exists() && !work.is_partial() {
            work.files()?.into_iter().map(|f| f.path).collect()
        } else {
            selected.iter().map(|f| f.path.clone()).collect()
        };
        if expected.is_empty() {
            warn!(destination = %dest, "Nothing to compare against; an existing destination counts as complete");
        }
        let missing = expected
            .iter()
            .filter(|path| !present.contains(path.as_str()))
            .count();
        info!(destination = %dest, expected = expected.len(), missing, "Compared destination contents");
        Ok(missing == 0)
    }

    async fn upload(&self, work: &WorkDir, dest: &RepoId) -> ModelStatus {
        let created = match self.transfer.create_repo(dest).await {
            Ok(created) => created,
            Err(e) => {
                error!(destination = %dest, error = %e, "Failed to create destination repository");
                return ModelStatus::Failed;
            }
        };

        match self.transfer.upload(work.path(), dest).await {
            Ok(()) => {
                info!(destination = %dest, "Successfully uploaded model");
                ModelStatus::UploadedSuccess
            }
            Err(e) if created => {
                error!(destination = %dest, error = %e, "Upload failed, rolling back new destination");
                if let Err(rollback) = self.transfer.delete_repo(dest).await {
                    error!(destination = %dest, error = %rollback, "Rollback of destination repository failed");
                }
                ModelStatus::UploadFailedRolledBack
            }
            Err(e) => {
                error!(
                    destination = %dest,
                    error = %e,
                    "Upload failed; destination existed before this run and is left untouched"
                );
                ModelStatus::Failed
            }
        }
    }
}
