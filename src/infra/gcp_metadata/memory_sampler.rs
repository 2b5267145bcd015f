use std::sync::Mutex;

use sysinfo::System;

use crate::core::metadata::{MemorySampler, MemorySnapshot};

/// Host memory via `sysinfo`. Only memory is refreshed, never processes or disks.
pub struct SysinfoMemorySampler {
    system: Mutex<System>,
}

impl SysinfoMemorySampler {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoMemorySampler {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySampler for SysinfoMemorySampler {
    fn snapshot(&self) -> MemorySnapshot {
        let mut system = self
            .system
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        system.refresh_memory();

        MemorySnapshot {
            total_bytes: system.total_memory(),
            used_bytes: system.used_memory(),
        }
    }
}
