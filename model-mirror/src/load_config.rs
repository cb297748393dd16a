//! Loads the static YAML run configuration and the hub credentials from the environment.
//!
//! The YAML file carries no secrets. The access token and destination
//! organisation come from `HF_TOKEN` and `ORG_NAME` (usually via `.env`), and
//! both are required before any work starts.

use anyhow::Result;
use model_mirror_core::config::MirrorConfig;
use model_mirror_core::hub::DEFAULT_ENDPOINT;
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::{error, info};

pub const TOKEN_VAR: &str = "HF_TOKEN";
pub const ORG_VAR: &str = "ORG_NAME";
pub const ENDPOINT_VAR: &str = "HF_ENDPOINT";

/// Loads a static YAML config file (no secrets).
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<MirrorConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => {
            info!(config_path = ?path_ref, "Config file read successfully");
            content
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    let config: MirrorConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    config.trace_loaded();
    Ok(config)
}

/// Hub credentials and destination, read from the environment.
#[derive(Clone)]
pub struct HubEnv {
    pub token: String,
    pub org_name: String,
    pub endpoint: String,
}

impl fmt::Debug for HubEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubEnv")
            .field("token", &"***")
            .field("org_name", &self.org_name)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl HubEnv {
    pub fn from_env() -> Result<Self> {
        let token = required(TOKEN_VAR)?;
        let org_name = required(ORG_VAR)?;
        let endpoint = env::var(ENDPOINT_VAR)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        info!(org_name = %org_name, endpoint = %endpoint, "Loaded hub settings from environment");
        Ok(Self {
            token,
            org_name,
            endpoint,
        })
    }
}

fn required(name: &str) -> Result<String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => {
            error!(variable = name, "Required environment variable is missing");
            Err(anyhow::anyhow!(
                "Environment variable {name} must be set (e.g. in .env)"
            ))
        }
    }
}
