//! License allow-list applied before any transfer.

use tracing::debug;

use crate::contract::RepoId;

/// License tags (as hub cards declare them) that permit redistribution without manual review.
pub const DEFAULT_ALLOWED_LICENSES: &[&str] = &[
    "apache-2.0",
    "mit",
    "bsd",
    "bsd-2-clause",
    "bsd-3-clause",
    "bsd-3-clause-clear",
    "isc",
    "zlib",
    "unlicense",
    "cc0-1.0",
    "cc-by-4.0",
    "cc-by-3.0",
    "artistic-2.0",
    "openrail",
    "bigscience-openrail-m",
    "creativeml-openrail-m",
    "openrail++",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicensePolicy {
    allowed: Vec<String>,
}

impl Default for LicensePolicy {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOWED_LICENSES.iter().copied())
    }
}

impl LicensePolicy {
    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allowed: allowed
                .into_iter()
                .map(|s| s.as_ref().trim().to_ascii_lowercase())
                .collect(),
        }
    }

    /// A repository without a declared license is not permitted.
    pub fn permits(&self, license: Option<&str>) -> bool {
        let permitted = license
            .map(|tag| tag.trim().to_ascii_lowercase())
            .is_some_and(|tag| self.allowed.iter().any(|a| *a == tag));
        debug!(license, permitted, "Checked license against allow-list");
        permitted
    }
}

/// Where an operator reviews and accepts the license of a blocked repository by hand.
pub fn manual_acceptance_url(endpoint: &str, repo: &RepoId) -> String {
    format!("{}/{}", endpoint.trim_end_matches('/'), repo)
}
