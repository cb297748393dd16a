//! Chooses which files of a model repository are worth mirroring.
//!
//! Repositories often ship the same weights in several formats. We keep one:
//! legacy PyTorch checkpoints (`.bin`/`.pt`/`.pth`) when they exist, otherwise
//! safetensors. Auxiliary framework exports (msgpack, h5, tflite, onnx, coreml,
//! gguf) are always skipped. Sharded checkpoints are recognised by their
//! `*.index.json` files, and only the format that has an index is considered.

use regex::Regex;
use tracing::{debug, warn};

use crate::contract::RemoteFile;

/// Ignored when only safetensors weights are available.
const SAFETENSORS_ONLY_IGNORE: &[&str] = &[
    "*.msgpack",
    "*.h5",
    "coreml/**/*",
    "*.tflite",
    "*.onnx",
    "*.bin",
    "*.pt",
    "*.pth",
    "*.gguf",
];

/// Ignored when legacy PyTorch weights are available (safetensors copies are dropped).
const PREFER_LEGACY_IGNORE: &[&str] = &[
    "*.msgpack",
    "*.h5",
    "*.safetensors",
    "coreml/**/*",
    "*safetensors*",
    "*.ot",
    "*.tflite",
    "*.onnx",
    "*.gguf",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    SafetensorsOnly,
    PreferLegacy,
}

/// Exactly one ignore-pattern set, compiled for matching.
#[derive(Debug, Clone)]
pub struct FileFilter {
    kind: FilterKind,
    ignore: Vec<Regex>,
}

impl PartialEq for FileFilter {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl FileFilter {
    pub fn new(kind: FilterKind) -> Self {
        let ignore = kind
            .ignore_patterns()
            .iter()
            .filter_map(|pattern| match glob_to_regex(pattern) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!(pattern, error = %e, "Skipping unusable ignore pattern");
                    None
                }
            })
            .collect();
        Self { kind, ignore }
    }

    /// Picks the filter for a repository based on which weight formats it lists.
    pub fn for_listing(files: &[RemoteFile]) -> Self {
        let index_files: Vec<&str> = files
            .iter()
            .map(|f| f.path.as_str())
            .filter(|p| p.ends_with(".index.json"))
            .collect();

        let (has_torch, has_safetensors) = if !index_files.is_empty() {
            debug!(?index_files, "Sharded checkpoint detected");
            (
                index_files.iter().any(|p| {
                    p.ends_with("bin.index.json")
                        || p.ends_with("pt.index.json")
                        || p.ends_with("pth.index.json")
                }),
                index_files
                    .iter()
                    .any(|p| p.ends_with("safetensors.index.json")),
            )
        } else {
            (
                files.iter().any(|f| {
                    f.path.ends_with(".bin") || f.path.ends_with(".pt") || f.path.ends_with(".pth")
                }),
                files.iter().any(|f| f.path.ends_with(".safetensors")),
            )
        };

        let kind = if has_safetensors && !has_torch {
            FilterKind::SafetensorsOnly
        } else {
            FilterKind::PreferLegacy
        };
        debug!(has_torch, has_safetensors, ?kind, "Selected file filter");
        Self::new(kind)
    }

    pub fn kind(&self) -> FilterKind {
        self.kind
    }

    pub fn is_ignored(&self, path: &str) -> bool {
        self.ignore.iter().any(|re| re.is_match(path))
    }

    /// The files of `listing` that a download with this filter would fetch.
    pub fn select<'a>(&self, listing: &'a [RemoteFile]) -> Vec<&'a RemoteFile> {
        listing.iter().filter(|f| !self.is_ignored(&f.path)).collect()
    }
}

impl FilterKind {
    pub fn ignore_patterns(&self) -> &'static [&'static str] {
        match self {
            FilterKind::SafetensorsOnly => SAFETENSORS_ONLY_IGNORE,
            FilterKind::PreferLegacy => PREFER_LEGACY_IGNORE,
        }
    }
}

/// fnmatch-style glob: `*` matches any run of characters including `/`, `?` one character.
fn glob_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push('^');
    for c in pattern.chars() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re)
}
