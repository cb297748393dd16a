use std::fs;
use std::path::Path;
use std::sync::Arc;

use model_mirror_core::contract::{
    HubError, MockMetadataClient, MockTransferClient, ModelStatus, RemoteFile, RepoId,
};
use model_mirror_core::license::LicensePolicy;
use model_mirror_core::pipeline::{Pipeline, PipelineSettings};
use model_mirror_core::workdir::DOWNLOAD_MARKER;
use tempfile::tempdir;

const ORG: &str = "mirror-org";

fn source() -> RepoId {
    "facebook/opt-125m".parse().unwrap()
}

fn settings(root: &Path) -> PipelineSettings {
    PipelineSettings {
        local_root: root.to_path_buf(),
        org_name: ORG.to_string(),
        license_policy: LicensePolicy::default(),
        hub_endpoint: "https://huggingface.co".to_string(),
    }
}

fn file(path: &str, size: u64) -> RemoteFile {
    RemoteFile {
        path: path.to_string(),
        size,
    }
}

fn source_listing() -> Vec<RemoteFile> {
    vec![
        file("config.json", 2),
        file("pytorch_model.bin", 4),
        file("flax_model.msgpack", 4),
    ]
}

/// Metadata mock with a permissive license and the given destination listing.
fn metadata_with_destination(dest: Result<Vec<RemoteFile>, ()>) -> MockMetadataClient {
    let mut metadata = MockMetadataClient::new();
    metadata
        .expect_license()
        .returning(|_| Ok(Some("apache-2.0".to_string())));
    metadata
        .expect_list_files()
        .withf(|repo| repo.namespace() == "facebook")
        .returning(|_| Ok(source_listing()));
    metadata
        .expect_list_files()
        .withf(|repo| repo.namespace() == ORG)
        .returning(move |repo| match &dest {
            Ok(files) => Ok(files.clone()),
            Err(()) => Err(HubError::NotFound(repo.to_string())),
        });
    metadata
}

fn writes_download(transfer: &mut MockTransferClient) {
    transfer.expect_download().times(1).returning(|_, dest, _| {
        fs::create_dir_all(dest)?;
        fs::write(dest.join("config.json"), b"{}")?;
        fs::write(dest.join("pytorch_model.bin"), b"0000")?;
        Ok(())
    });
}

fn pipeline(
    root: &Path,
    metadata: MockMetadataClient,
    transfer: MockTransferClient,
) -> Pipeline<MockMetadataClient, MockTransferClient> {
    Pipeline::new(Arc::new(metadata), Arc::new(transfer), settings(root))
}

#[tokio::test]
async fn copyleft_license_blocks_before_any_transfer() {
    let root = tempdir().unwrap();
    let mut metadata = MockMetadataClient::new();
    metadata
        .expect_license()
        .returning(|_| Ok(Some("gpl-3.0".to_string())));
    metadata.expect_list_files().times(0);

    let mut transfer = MockTransferClient::new();
    transfer.expect_download().times(0);
    transfer.expect_create_repo().times(0);
    transfer.expect_upload().times(0);

    let pipeline = pipeline(root.path(), metadata, transfer);
    let local_dir = pipeline.local_dir(&source());
    let status = pipeline.process(&source()).await;

    assert_eq!(status, ModelStatus::LicenseBlocked);
    assert!(!local_dir.exists(), "nothing should be fetched for a blocked license");
}

#[tokio::test]
async fn license_query_failure_is_a_generic_failure() {
    let root = tempdir().unwrap();
    let mut metadata = MockMetadataClient::new();
    metadata.expect_license().returning(|_| {
        Err(HubError::Unavailable {
            status: Some(503),
            message: "maintenance".into(),
        })
    });
    let mut transfer = MockTransferClient::new();
    transfer.expect_download().times(0);

    let status = pipeline(root.path(), metadata, transfer)
        .process(&source())
        .await;
    assert_eq!(status, ModelStatus::Failed);
}

#[tokio::test]
async fn destination_with_superset_of_files_skips_download() {
    let root = tempdir().unwrap();
    let metadata = metadata_with_destination(Ok(vec![
        file(".gitattributes", 1),
        file("README.md", 1),
        file("config.json", 2),
        file("pytorch_model.bin", 4),
    ]));
    let mut transfer = MockTransferClient::new();
    transfer.expect_download().times(0);
    transfer.expect_create_repo().times(0);
    transfer.expect_upload().times(0);

    let status = pipeline(root.path(), metadata, transfer)
        .process(&source())
        .await;
    assert_eq!(status, ModelStatus::AlreadyExists);
}

#[tokio::test]
async fn partial_destination_is_uploaded_again() {
    let root = tempdir().unwrap();
    let metadata = metadata_with_destination(Ok(vec![file("config.json", 2)]));
    let mut transfer = MockTransferClient::new();
    writes_download(&mut transfer);
    transfer.expect_create_repo().times(1).returning(|_| Ok(false));
    transfer.expect_upload().times(1).returning(|_, _| Ok(()));

    let pipeline = pipeline(root.path(), metadata, transfer);
    let local_dir = pipeline.local_dir(&source());
    let status = pipeline.process(&source()).await;

    assert_eq!(status, ModelStatus::UploadedSuccess);
    assert!(!local_dir.exists());
}

#[tokio::test]
async fn existing_local_directory_is_not_downloaded_again() {
    let root = tempdir().unwrap();
    let metadata = metadata_with_destination(Err(()));
    let mut transfer = MockTransferClient::new();
    transfer.expect_download().times(0);
    transfer.expect_create_repo().times(1).returning(|_| Ok(true));
    transfer
        .expect_upload()
        .times(1)
        .withf(|dir, dest| dir.join("pytorch_model.bin").exists() && dest.to_string() == "mirror-org/opt-125m")
        .returning(|_, _| Ok(()));

    let pipeline = pipeline(root.path(), metadata, transfer);
    let local_dir = pipeline.local_dir(&source());
    fs::create_dir_all(&local_dir).unwrap();
    fs::write(local_dir.join("pytorch_model.bin"), b"0000").unwrap();

    let status = pipeline.process(&source()).await;
    assert_eq!(status, ModelStatus::UploadedSuccess);
    assert!(!local_dir.exists());
}

#[tokio::test]
async fn interrupted_download_is_resumed() {
    let root = tempdir().unwrap();
    let metadata = metadata_with_destination(Err(()));
    let mut transfer = MockTransferClient::new();
    writes_download(&mut transfer);
    transfer.expect_create_repo().returning(|_| Ok(true));
    transfer.expect_upload().returning(|_, _| Ok(()));

    let pipeline = pipeline(root.path(), metadata, transfer);
    let local_dir = pipeline.local_dir(&source());
    fs::create_dir_all(&local_dir).unwrap();
    fs::write(local_dir.join(DOWNLOAD_MARKER), b"").unwrap();

    assert_eq!(
        pipeline.process(&source()).await,
        ModelStatus::UploadedSuccess
    );
}

#[tokio::test]
async fn only_selected_legacy_weights_are_downloaded() {
    let root = tempdir().unwrap();
    let metadata = metadata_with_destination(Err(()));
    let mut transfer = MockTransferClient::new();
    transfer
        .expect_download()
        .times(1)
        .withf(|_, _, files| {
            files.iter().map(|f| f.path.as_str()).collect::<Vec<_>>()
                == ["config.json", "pytorch_model.bin"]
        })
        .returning(|_, dest, _| {
            fs::create_dir_all(dest)?;
            Ok(())
        });
    transfer.expect_create_repo().returning(|_| Ok(true));
    transfer.expect_upload().returning(|_, _| Ok(()));

    let status = pipeline(root.path(), metadata, transfer)
        .process(&source())
        .await;
    assert_eq!(status, ModelStatus::UploadedSuccess);
}

#[tokio::test]
async fn upload_failure_rolls_back_new_destination_once() {
    let root = tempdir().unwrap();
    let metadata = metadata_with_destination(Err(()));
    let mut transfer = MockTransferClient::new();
    writes_download(&mut transfer);
    transfer.expect_create_repo().times(1).returning(|_| Ok(true));
    transfer
        .expect_upload()
        .times(1)
        .returning(|_, _| Err(HubError::Conflict("rejected".into())));
    transfer
        .expect_delete_repo()
        .times(1)
        .withf(|repo| repo.to_string() == "mirror-org/opt-125m")
        .returning(|_| Ok(()));

    let pipeline = pipeline(root.path(), metadata, transfer);
    let local_dir = pipeline.local_dir(&source());
    let status = pipeline.process(&source()).await;

    assert_eq!(status, ModelStatus::UploadFailedRolledBack);
    assert!(!local_dir.exists(), "working directory must be removed after a failed upload");
}

#[tokio::test]
async fn failed_rollback_still_reports_the_upload_failure() {
    let root = tempdir().unwrap();
    let metadata = metadata_with_destination(Err(()));
    let mut transfer = MockTransferClient::new();
    writes_download(&mut transfer);
    transfer.expect_create_repo().returning(|_| Ok(true));
    transfer.expect_upload().returning(|_, _| {
        Err(HubError::Unavailable {
            status: None,
            message: "connection reset".into(),
        })
    });
    transfer.expect_delete_repo().times(1).returning(|_| {
        Err(HubError::Unavailable {
            status: Some(500),
            message: "boom".into(),
        })
    });

    let pipeline = pipeline(root.path(), metadata, transfer);
    let local_dir = pipeline.local_dir(&source());
    assert_eq!(
        pipeline.process(&source()).await,
        ModelStatus::UploadFailedRolledBack
    );
    assert!(!local_dir.exists());
}

#[tokio::test]
async fn pre_existing_destination_is_never_deleted() {
    let root = tempdir().unwrap();
    let metadata = metadata_with_destination(Ok(vec![file("README.md", 1)]));
    let mut transfer = MockTransferClient::new();
    writes_download(&mut transfer);
    transfer.expect_create_repo().returning(|_| Ok(false));
    transfer
        .expect_upload()
        .returning(|_, _| Err(HubError::Conflict("rejected".into())));
    transfer.expect_delete_repo().times(0);

    assert_eq!(
        pipeline(root.path(), metadata, transfer)
            .process(&source())
            .await,
        ModelStatus::Failed
    );
}

#[tokio::test]
async fn download_failure_cleans_partial_directory() {
    let root = tempdir().unwrap();
    let metadata = metadata_with_destination(Err(()));
    let mut transfer = MockTransferClient::new();
    transfer.expect_download().times(1).returning(|_, dest, _| {
        fs::create_dir_all(dest)?;
        fs::write(dest.join(DOWNLOAD_MARKER), b"")?;
        Err(HubError::NotFound("pytorch_model.bin".into()))
    });
    transfer.expect_create_repo().times(0);
    transfer.expect_upload().times(0);

    let pipeline = pipeline(root.path(), metadata, transfer);
    let local_dir = pipeline.local_dir(&source());
    assert_eq!(pipeline.process(&source()).await, ModelStatus::Failed);
    assert!(!local_dir.exists());
}

/// Local directory left over from an earlier, interrupted run.
fn stale_local_dir(pipeline: &Pipeline<MockMetadataClient, MockTransferClient>) -> std::path::PathBuf {
    let local_dir = pipeline.local_dir(&source());
    fs::create_dir_all(&local_dir).unwrap();
    fs::write(local_dir.join("pytorch_model.bin"), b"0000").unwrap();
    local_dir
}

#[tokio::test]
async fn license_query_failure_still_removes_stale_directory() {
    let root = tempdir().unwrap();
    let mut metadata = MockMetadataClient::new();
    metadata.expect_license().returning(|_| {
        Err(HubError::Unavailable {
            status: Some(503),
            message: "maintenance".into(),
        })
    });
    let mut transfer = MockTransferClient::new();
    transfer.expect_download().times(0);

    let pipeline = pipeline(root.path(), metadata, transfer);
    let local_dir = stale_local_dir(&pipeline);

    assert_eq!(pipeline.process(&source()).await, ModelStatus::Failed);
    assert!(!local_dir.exists());
}

#[tokio::test]
async fn listing_failure_still_removes_stale_directory() {
    let root = tempdir().unwrap();
    let mut metadata = MockMetadataClient::new();
    metadata
        .expect_license()
        .returning(|_| Ok(Some("mit".to_string())));
    metadata.expect_list_files().returning(|_| {
        Err(HubError::Unavailable {
            status: Some(429),
            message: "rate limited".into(),
        })
    });
    let mut transfer = MockTransferClient::new();
    transfer.expect_download().times(0);

    let pipeline = pipeline(root.path(), metadata, transfer);
    let local_dir = stale_local_dir(&pipeline);

    assert_eq!(pipeline.process(&source()).await, ModelStatus::Failed);
    assert!(!local_dir.exists());
}

#[tokio::test]
async fn already_mirrored_repository_removes_local_copy() {
    let root = tempdir().unwrap();
    let metadata = metadata_with_destination(Ok(vec![
        file("README.md", 1),
        file("pytorch_model.bin", 4),
    ]));
    let mut transfer = MockTransferClient::new();
    transfer.expect_download().times(0);
    transfer.expect_upload().times(0);

    let pipeline = pipeline(root.path(), metadata, transfer);
    let local_dir = stale_local_dir(&pipeline);

    assert_eq!(
        pipeline.process(&source()).await,
        ModelStatus::AlreadyExists
    );
    assert!(!local_dir.exists());
}

#[tokio::test]
async fn license_block_leaves_existing_directory_as_found() {
    let root = tempdir().unwrap();
    let mut metadata = MockMetadataClient::new();
    metadata
        .expect_license()
        .returning(|_| Ok(Some("cc-by-nc-4.0".to_string())));
    let mut transfer = MockTransferClient::new();
    transfer.expect_download().times(0);

    let pipeline = pipeline(root.path(), metadata, transfer);
    let local_dir = stale_local_dir(&pipeline);

    assert_eq!(
        pipeline.process(&source()).await,
        ModelStatus::LicenseBlocked
    );
    assert!(local_dir.join("pytorch_model.bin").exists());
}

#[tokio::test]
async fn repository_without_selectable_weights_is_not_downloaded_again() {
    let root = tempdir().unwrap();
    let mut metadata = MockMetadataClient::new();
    metadata
        .expect_license()
        .returning(|_| Ok(Some("apache-2.0".to_string())));
    metadata
        .expect_list_files()
        .withf(|repo| repo.namespace() == "facebook")
        .returning(|_| Ok(vec![file("flax_model.msgpack", 8), file("model.onnx", 8)]));
    metadata
        .expect_list_files()
        .withf(|repo| repo.namespace() == ORG)
        .returning(|_| Ok(vec![file(".gitattributes", 1)]));
    let mut transfer = MockTransferClient::new();
    transfer.expect_download().times(0);
    transfer.expect_create_repo().times(0);

    let status = pipeline(root.path(), metadata, transfer)
        .process(&source())
        .await;
    assert_eq!(status, ModelStatus::AlreadyExists);
}
