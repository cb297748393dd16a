use std::path::PathBuf;
use std::sync::Mutex;

use sysinfo::System;
use tracing::debug;

use crate::contract::{HostTelemetry, ResourceProbe};

/// Reads free space of the volume holding `root`, plus CPU and memory for logging.
pub struct DiskProbe {
    root: PathBuf,
    system: Mutex<System>,
}

impl DiskProbe {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            system: Mutex::new(System::new()),
        }
    }
}

impl ResourceProbe for DiskProbe {
    fn free_space(&self) -> std::io::Result<u64> {
        if !self.root.exists() {
            std::fs::create_dir_all(&self.root)?;
        }
        let free = fs2::available_space(&self.root)?;
        debug!(root = %self.root.display(), free, "Read available space");
        Ok(free)
    }

    fn telemetry(&self) -> HostTelemetry {
        let Ok(mut system) = self.system.lock() else {
            return HostTelemetry::default();
        };
        system.refresh_cpu();
        system.refresh_memory();
        HostTelemetry {
            cpu_percent: system.global_cpu_info().cpu_usage(),
            total_memory: system.total_memory(),
            available_memory: system.available_memory(),
        }
    }
}
