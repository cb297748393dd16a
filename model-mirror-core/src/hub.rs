//! # hub: HTTP + git implementation of the collaborator contracts
//!
//! [`HubClient`] talks to a Hugging Face compatible hub:
//! - metadata and listings through the JSON API (`/api/models/...`)
//! - downloads through `/{repo}/resolve/main/{path}`, streamed to disk
//! - repository create/delete through `/api/repos/...`
//! - uploads by pushing the working directory with `git` and `git lfs`
//!
//! The access token is held by the client value and passed explicitly; it is
//! never written to logs or error messages.

use std::path::Path;
use std::process::Output;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

use crate::contract::{HubError, MetadataClient, RemoteFile, RepoId, TransferClient};
use crate::workdir::{list_local_files, DOWNLOAD_MARKER, PARTIAL_SUFFIX};

pub const DEFAULT_ENDPOINT: &str = "https://huggingface.co";

/// Weight formats always stored through git LFS on upload.
const LFS_PATTERNS: &[&str] = &[
    "*.bin",
    "*.pt",
    "*.pth",
    "*.ckpt",
    "*.safetensors",
    "*.gguf",
    "*.h5",
    "*.onnx",
    "*.model",
];

/// Files above this size are tracked by LFS even if no pattern covers them.
const LFS_SIZE_THRESHOLD: u64 = 10 * 1024 * 1024;

const GIT_USER_NAME: &str = "model-mirror";
const GIT_USER_EMAIL: &str = "model-mirror@users.noreply.huggingface.co";

impl From<reqwest::Error> for HubError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => error_for_status(status, e.to_string()),
            None => HubError::Unavailable {
                status: None,
                message: e.to_string(),
            },
        }
    }
}

fn error_for_status(status: StatusCode, message: String) -> HubError {
    match status {
        StatusCode::NOT_FOUND => HubError::NotFound(message),
        StatusCode::CONFLICT => HubError::Conflict(message),
        _ => HubError::Unavailable {
            status: Some(status.as_u16()),
            message,
        },
    }
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    #[serde(rename = "type")]
    kind: String,
    path: String,
    #[serde(default)]
    size: u64,
    lfs: Option<LfsPointer>,
}

#[derive(Debug, Deserialize)]
struct LfsPointer {
    size: u64,
}

#[derive(Debug, Deserialize)]
struct ModelInfo {
    #[serde(rename = "cardData")]
    card_data: Option<serde_json::Value>,
    #[serde(default)]
    tags: Vec<String>,
}

impl ModelInfo {
    fn license(&self) -> Option<String> {
        let from_card = self
            .card_data
            .as_ref()
            .and_then(|card| card.get("license"))
            .and_then(|license| match license {
                serde_json::Value::String(s) => Some(s.clone()),
                serde_json::Value::Array(items) => {
                    items.iter().find_map(|v| v.as_str().map(str::to_string))
                }
                _ => None,
            });
        from_card.or_else(|| {
            self.tags
                .iter()
                .find_map(|tag| tag.strip_prefix("license:").map(str::to_string))
        })
    }
}

/// Extracts the `rel="next"` target from a `Link` response header.
fn next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        if !params.contains("rel=\"next\"") {
            return None;
        }
        let target = target.trim();
        Some(target.strip_prefix('<')?.strip_suffix('>')?.to_string())
    })
}

/// Client for one hub endpoint, authenticated with one token.
pub struct HubClient {
    http: reqwest::Client,
    endpoint: Url,
    token: String,
    private: bool,
}

impl HubClient {
    pub fn new(endpoint: &str, token: impl Into<String>) -> Result<Self, HubError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| HubError::Unknown(format!("invalid hub endpoint {endpoint:?}: {e}")))?;
        let http = reqwest::Client::builder()
            .user_agent(concat!("model-mirror/", env!("CARGO_PKG_VERSION")))
            .build()?;
        info!(endpoint = %endpoint, "Initialised hub client");
        Ok(Self {
            http,
            endpoint,
            token: token.into(),
            private: false,
        })
    }

    /// Create destination repositories as private.
    pub fn with_private_repos(mut self, private: bool) -> Self {
        self.private = private;
        self
    }

    pub fn endpoint(&self) -> &str {
        self.endpoint.as_str().trim_end_matches('/')
    }

    fn url(&self, segments: &[&str]) -> Result<Url, HubError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| HubError::Unknown(format!("hub endpoint {} cannot be a base", self.endpoint)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn repo_segments(repo: &RepoId) -> [&str; 2] {
        [repo.namespace(), repo.name()]
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: Url) -> Result<(T, Option<String>), HubError> {
        debug!(url = %url, "GET");
        let resp = self.http.get(url.clone()).bearer_auth(&self.token).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(error_for_status(status, format!("GET {url}: {status} {body}")));
        }
        let next = resp
            .headers()
            .get(reqwest::header::LINK)
            .and_then(|v| v.to_str().ok())
            .and_then(next_link);
        Ok((resp.json::<T>().await?, next))
    }

    async fn tree(&self, repo: &RepoId) -> Result<Vec<RemoteFile>, HubError> {
        let [namespace, name] = Self::repo_segments(repo);
        let mut url = self.url(&["api", "models", namespace, name, "tree", "main"])?;
        url.query_pairs_mut().append_pair("recursive", "true");

        let mut files = Vec::new();
        let mut next = Some(url.to_string());
        while let Some(page) = next.take() {
            let page = Url::parse(&page)
                .map_err(|e| HubError::Unknown(format!("invalid pagination link {page:?}: {e}")))?;
            let (entries, link): (Vec<TreeEntry>, _) = self.get_json(page).await?;
            files.extend(entries.into_iter().filter(|e| e.kind == "file").map(|e| RemoteFile {
                size: e.lfs.map_or(e.size, |lfs| lfs.size),
                path: e.path,
            }));
            next = link;
        }
        debug!(repo = %repo, files = files.len(), "Listed repository tree");
        Ok(files)
    }

    async fn download_file(&self, repo: &RepoId, file: &RemoteFile, dest: &Path) -> Result<(), HubError> {
        let target = dest.join(&file.path);
        if let Ok(meta) = tokio::fs::metadata(&target).await {
            if meta.len() == file.size {
                debug!(path = %target.display(), "Already downloaded, skipping");
                return Ok(());
            }
        }
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let [namespace, name] = Self::repo_segments(repo);
        let mut segments = vec![namespace, name, "resolve", "main"];
        segments.extend(file.path.split('/'));
        let url = self.url(&segments)?;

        let mut resp = self.http.get(url.clone()).bearer_auth(&self.token).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(error_for_status(status, format!("GET {url}: {status}")));
        }

        let partial = dest.join(format!("{}{PARTIAL_SUFFIX}", file.path));
        let mut out = tokio::fs::File::create(&partial).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = resp.chunk().await? {
            out.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        out.flush().await?;
        drop(out);
        tokio::fs::rename(&partial, &target).await?;
        debug!(path = %target.display(), bytes = written, "Downloaded file");
        Ok(())
    }

    /// Runs git in `dir` and returns its output whatever the exit status.
    async fn git_output(&self, dir: &Path, args: &[&str]) -> Result<Output, HubError> {
        tokio::process::Command::new("git")
            .arg("-C")
            .arg(dir)
            .args(args)
            .output()
            .await
            .map_err(|e| HubError::Command {
                command: "git".into(),
                message: format!("failed to launch git: {e}"),
            })
    }

    async fn git(&self, dir: &Path, args: &[&str]) -> Result<Output, HubError> {
        let output = self.git_output(dir, args).await?;
        if output.status.success() {
            return Ok(output);
        }
        Err(self.git_error(args, &output))
    }

    fn git_error(&self, args: &[&str], output: &Output) -> HubError {
        let stderr = self.redact(&String::from_utf8_lossy(&output.stderr));
        let command = self.redact(&format!("git {}", args.join(" ")));
        error!(%command, status = %output.status, stderr = %stderr, "Git exited with non-zero code");
        if stderr.contains("rejected") || stderr.contains("non-fast-forward") {
            return HubError::Conflict(stderr);
        }
        HubError::Command {
            command,
            message: stderr,
        }
    }

    async fn init_repo(&self, dir: &Path) -> Result<(), HubError> {
        self.git(dir, &["init", "--quiet"]).await?;
        self.git(dir, &["symbolic-ref", "HEAD", "refs/heads/main"]).await?;
        Ok(())
    }

    /// Points local `main` at the destination's `main` so the next commit adds to it.
    ///
    /// Only the index is reset; the working tree keeps the downloaded files.
    /// Returns `false` when the destination has no `main` yet.
    async fn base_on_remote(&self, dir: &Path, remote: &str) -> Result<bool, HubError> {
        let args = ["fetch", "--quiet", remote, "main"];
        let fetched = self.git_output(dir, &args).await?;
        if !fetched.status.success() {
            let stderr = String::from_utf8_lossy(&fetched.stderr);
            if stderr.contains("couldn't find remote ref") {
                debug!(path = %dir.display(), "Destination has no main branch yet");
                return Ok(false);
            }
            return Err(self.git_error(&args, &fetched));
        }
        self.git(dir, &["update-ref", "refs/heads/main", "FETCH_HEAD"]).await?;
        self.git(dir, &["read-tree", "HEAD"]).await?;

        // Keep the destination's LFS rules instead of starting a fresh .gitattributes.
        let has_attributes = self
            .git_output(dir, &["cat-file", "-e", "HEAD:.gitattributes"])
            .await?
            .status
            .success();
        if has_attributes && !dir.join(".gitattributes").exists() {
            self.git(dir, &["checkout", "HEAD", "--", ".gitattributes"]).await?;
        }
        info!(path = %dir.display(), "Based upload on existing destination history");
        Ok(true)
    }

    async fn track_large_files(&self, dir: &Path) -> Result<(), HubError> {
        self.git(dir, &["lfs", "install", "--local"]).await?;
        let mut track: Vec<String> = LFS_PATTERNS.iter().map(|p| p.to_string()).collect();
        track.extend(
            list_local_files(dir)?
                .into_iter()
                .filter(|f| f.size > LFS_SIZE_THRESHOLD)
                .map(|f| f.path),
        );
        let mut args = vec!["lfs", "track"];
        args.extend(track.iter().map(String::as_str));
        self.git(dir, &args).await?;
        Ok(())
    }

    /// Stages new and changed files (never removals) and fast-forwards the destination.
    async fn commit_and_push(&self, dir: &Path, remote: &str, message: &str) -> Result<(), HubError> {
        self.git(dir, &["add", "--ignore-removal", "."]).await?;
        let user = format!("user.name={GIT_USER_NAME}");
        let email = format!("user.email={GIT_USER_EMAIL}");
        self.git(
            dir,
            &["-c", &user, "-c", &email, "commit", "--quiet", "--allow-empty", "-m", message],
        )
        .await?;
        self.git(dir, &["push", "--quiet", remote, "HEAD:main"]).await?;
        Ok(())
    }

    fn redact(&self, text: &str) -> String {
        if self.token.is_empty() {
            text.to_string()
        } else {
            text.replace(&self.token, "***")
        }
    }

    fn push_url(&self, repo: &RepoId) -> Result<Url, HubError> {
        let mut url = self.url(&Self::repo_segments(repo))?;
        url.set_username("user")
            .and_then(|_| url.set_password(Some(&self.token)))
            .map_err(|_| HubError::Unknown("hub endpoint does not accept credentials".into()))?;
        Ok(url)
    }
}

#[async_trait]
impl MetadataClient for HubClient {
    async fn repo_size(&self, repo: &RepoId) -> Result<u64, HubError> {
        let files = self.tree(repo).await?;
        Ok(files.iter().map(|f| f.size).sum())
    }

    async fn license(&self, repo: &RepoId) -> Result<Option<String>, HubError> {
        let [namespace, name] = Self::repo_segments(repo);
        let url = self.url(&["api", "models", namespace, name])?;
        let (info, _): (ModelInfo, _) = self.get_json(url).await?;
        Ok(info.license())
    }

    async fn list_files(&self, repo: &RepoId) -> Result<Vec<RemoteFile>, HubError> {
        self.tree(repo).await
    }
}

#[async_trait]
impl TransferClient for HubClient {
    async fn download(&self, repo: &RepoId, dest: &Path, files: &[RemoteFile]) -> Result<(), HubError> {
        info!(
            repo = %repo,
            files = files.len(),
            bytes = files.iter().map(|f| f.size).sum::<u64>(),
            "Beginning download"
        );

        tokio::fs::create_dir_all(dest).await?;
        let marker = dest.join(DOWNLOAD_MARKER);
        tokio::fs::write(&marker, b"").await?;
        for file in files {
            self.download_file(repo, file, dest).await?;
        }
        tokio::fs::remove_file(&marker).await?;
        info!(repo = %repo, path = %dest.display(), "Download complete");
        Ok(())
    }

    async fn create_repo(&self, repo: &RepoId) -> Result<bool, HubError> {
        let url = self.url(&["api", "repos", "create"])?;
        let body = json!({
            "type": "model",
            "name": repo.name(),
            "organization": repo.namespace(),
            "private": self.private,
        });
        let resp = self.http.post(url).bearer_auth(&self.token).json(&body).send().await?;
        match resp.status() {
            s if s.is_success() => {
                info!(repo = %repo, "Created destination repository");
                Ok(true)
            }
            StatusCode::CONFLICT => {
                info!(repo = %repo, "Destination repository already exists");
                Ok(false)
            }
            s => {
                let body = resp.text().await.unwrap_or_default();
                Err(error_for_status(s, format!("create {repo}: {s} {body}")))
            }
        }
    }

    async fn upload(&self, source: &Path, repo: &RepoId) -> Result<(), HubError> {
        info!(repo = %repo, path = %source.display(), "Uploading folder");
        let remote = self.push_url(repo)?;
        self.init_repo(source).await?;
        self.base_on_remote(source, remote.as_str()).await?;
        self.track_large_files(source).await?;
        self.commit_and_push(source, remote.as_str(), &format!("Mirror into {repo}"))
            .await?;
        info!(repo = %repo, "Upload complete");
        Ok(())
    }

    async fn delete_repo(&self, repo: &RepoId) -> Result<(), HubError> {
        let url = self.url(&["api", "repos", "delete"])?;
        let body = json!({
            "type": "model",
            "name": repo.name(),
            "organization": repo.namespace(),
        });
        let resp = self.http.delete(url).bearer_auth(&self.token).json(&body).send().await?;
        let status = resp.status();
        if status.is_success() {
            warn!(repo = %repo, "Deleted destination repository");
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(error_for_status(status, format!("delete {repo}: {status} {body}")))
    }
}
