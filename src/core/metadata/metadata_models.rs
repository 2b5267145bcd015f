use serde::Serialize;

/// The hosting platform, decided once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    GaeStandard,
    CloudRun,
    Unknown,
}

impl AppEnv {
    /// Classifies the platform from `GAE_ENV` and `K_SERVICE` as returned by `lookup`.
    pub fn detect(lookup: impl Fn(&str) -> Option<String>) -> Self {
        if lookup("GAE_ENV").as_deref() == Some("standard") {
            AppEnv::GaeStandard
        } else if lookup("K_SERVICE").is_some() {
            AppEnv::CloudRun
        } else {
            tracing::warn!("Unknown App Environment");
            AppEnv::Unknown
        }
    }

    pub fn from_env() -> Self {
        Self::detect(|key| std::env::var(key).ok())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AppEnv::GaeStandard => "gae_standard",
            AppEnv::CloudRun => "cloud_run",
            AppEnv::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for AppEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Platform environment variables captured once, used when the metadata server
/// can't answer (first-generation App Engine has none).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlatformEnv {
    pub gae_application: Option<String>,
    pub gae_instance: Option<String>,
    pub gae_service: Option<String>,
    pub gae_version: Option<String>,
    pub k_service: Option<String>,
    pub k_revision: Option<String>,
}

impl PlatformEnv {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            gae_application: lookup("GAE_APPLICATION"),
            gae_instance: lookup("GAE_INSTANCE"),
            gae_service: lookup("GAE_SERVICE"),
            gae_version: lookup("GAE_VERSION"),
            k_service: lookup("K_SERVICE"),
            k_revision: lookup("K_REVISION"),
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// `GAE_APPLICATION` without its `<partition>~` prefix.
    pub fn project_from_application(&self) -> Option<String> {
        self.gae_application.as_deref().map(|app| match app.rsplit_once('~') {
            Some((_, project)) => project.to_string(),
            None => app.to_string(),
        })
    }

    pub fn service_name(&self) -> Option<String> {
        self.k_service.clone().or_else(|| self.gae_service.clone())
    }

    /// Gen1 App Engine reports `major:minor`; only the part after the colon is the
    /// version the admin API knows.
    pub fn version_id(&self) -> Option<String> {
        self.k_revision
            .as_deref()
            .or(self.gae_version.as_deref())
            .map(|version| match version.rsplit_once(':') {
                Some((_, minor)) => minor.to_string(),
                None => version.to_string(),
            })
    }
}

/// Who and where this instance is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceIdentity {
    pub project_id: String,
    pub instance_id: String,
    pub service_name: Option<String>,
    pub version_id: Option<String>,
}

/// Admin API URLs describing this deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminQueries {
    pub service: String,
    pub version: String,
    /// Cloud Run exposes no per-instance resource.
    pub instance: Option<String>,
}

/// One `MEMORY:` log line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryReport {
    pub id: String,
    pub source: String,
    pub memory_used_by: i64,
}

/// A point-in-time reading of host memory, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySnapshot {
    pub total_bytes: u64,
    pub used_bytes: u64,
}

/// Bytes to megabytes (decimal).
pub fn memory_convert(memory_bytes: f64) -> f64 {
    memory_bytes / 1_000_000.0
}

/// Logs a `MEMORY:` line and returns what was logged.
pub fn log_memory(id: &str, source: &str, memory_used: f64) -> MemoryReport {
    let report = MemoryReport {
        id: id.to_string(),
        source: source.to_string(),
        memory_used_by: memory_used.round() as i64,
    };
    match serde_json::to_string(&report) {
        Ok(json) => tracing::info!("MEMORY: {}", json),
        Err(e) => tracing::warn!("Could not serialize memory report: {}", e),
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn detects_platform() {
        assert_eq!(
            AppEnv::detect(lookup(&[("GAE_ENV", "standard")])),
            AppEnv::GaeStandard
        );
        assert_eq!(
            AppEnv::detect(lookup(&[("K_SERVICE", "api")])),
            AppEnv::CloudRun
        );
        assert_eq!(
            AppEnv::detect(lookup(&[("GAE_ENV", "flex")])),
            AppEnv::Unknown
        );
        assert_eq!(AppEnv::detect(lookup(&[])), AppEnv::Unknown);
    }

    #[test]
    fn gae_standard_wins_over_cloud_run() {
        let env = lookup(&[("GAE_ENV", "standard"), ("K_SERVICE", "api")]);
        assert_eq!(AppEnv::detect(env), AppEnv::GaeStandard);
    }

    #[test]
    fn platform_env_strips_partition_and_major_version() {
        let env = PlatformEnv::from_lookup(lookup(&[
            ("GAE_APPLICATION", "s~my-project"),
            ("GAE_SERVICE", "default"),
            ("GAE_VERSION", "20240101t120000:123456789"),
        ]));

        assert_eq!(env.project_from_application().as_deref(), Some("my-project"));
        assert_eq!(env.service_name().as_deref(), Some("default"));
        assert_eq!(env.version_id().as_deref(), Some("123456789"));
    }

    #[test]
    fn cloud_run_names_take_precedence() {
        let env = PlatformEnv::from_lookup(lookup(&[
            ("K_SERVICE", "api"),
            ("K_REVISION", "api-00042-abc"),
            ("GAE_SERVICE", "default"),
        ]));

        assert_eq!(env.service_name().as_deref(), Some("api"));
        assert_eq!(env.version_id().as_deref(), Some("api-00042-abc"));
    }

    #[test]
    fn converts_bytes_to_megabytes() {
        assert_eq!(memory_convert(256_000_000.0), 256.0);
    }

    #[test]
    fn memory_report_rounds_and_serializes() {
        let report = log_memory("instance-1", "admin_api", 127.6);
        assert_eq!(report.memory_used_by, 128);
        assert_eq!(
            serde_json::to_value(&report).unwrap(),
            serde_json::json!({"id": "instance-1", "source": "admin_api", "memory_used_by": 128})
        );
    }
}
