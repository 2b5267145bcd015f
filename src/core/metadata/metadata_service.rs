use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use super::metadata_models::{
    log_memory, memory_convert, AdminQueries, AppEnv, InstanceIdentity, MemoryReport,
    MemorySnapshot, PlatformEnv,
};

pub const PROJECT_ID_PATH: &str = "/computeMetadata/v1/project/project-id";
pub const INSTANCE_ID_PATH: &str = "/computeMetadata/v1/instance/id";
pub const REGION_PATH: &str = "/computeMetadata/v1/instance/region";
pub const SERVICE_ACCOUNT_TOKEN_PATH: &str =
    "/computeMetadata/v1/instance/service-accounts/default/token";

const APP_ENGINE_ADMIN_BASE: &str = "https://appengine.googleapis.com/v1/apps";
const CLOUD_RUN_ADMIN_BASE: &str = "https://run.googleapis.com/v2";

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Request to {url} failed{}: {message}", status_suffix(.status))]
    Request {
        url: String,
        status: Option<u16>,
        message: String,
    },
    #[error("Could not parse response: {0}")]
    Parse(String),
    #[error("Response is missing '{0}'")]
    MissingField(&'static str),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({})", s)).unwrap_or_default()
}

/// Raw HTTP access to the metadata server and the admin APIs.
#[async_trait]
pub trait MetadataClient: Send + Sync {
    /// GETs a metadata server path such as `/computeMetadata/v1/instance/id`.
    async fn metadata(&self, path: &str) -> Result<String, MetadataError>;
    /// GETs an absolute URL with a bearer token.
    async fn get_authorized(&self, url: &str, token: &str) -> Result<String, MetadataError>;
}

/// Reads host memory usage.
pub trait MemorySampler: Send + Sync {
    fn snapshot(&self) -> MemorySnapshot;
}

/// Instance metadata and memory logging for App Engine and Cloud Run.
pub struct MetadataService<C: MetadataClient, M: MemorySampler> {
    client: C,
    sampler: M,
    app_env: AppEnv,
    platform: PlatformEnv,
}

impl<C, M> MetadataService<C, M>
where
    C: MetadataClient,
    M: MemorySampler,
{
    pub fn new(client: C, sampler: M, app_env: AppEnv, platform: PlatformEnv) -> Self {
        Self {
            client,
            sampler,
            app_env,
            platform,
        }
    }

    pub fn app_env(&self) -> AppEnv {
        self.app_env
    }

    pub async fn get_metadata(&self, path: &str) -> Result<String, MetadataError> {
        self.client.metadata(path).await
    }

    /// Calls an admin API with the instance's default service-account token.
    pub async fn get_admin_api(&self, url: &str) -> Result<String, MetadataError> {
        let raw = self.get_metadata(SERVICE_ACCOUNT_TOKEN_PATH).await?;
        let token: Value =
            serde_json::from_str(&raw).map_err(|e| MetadataError::Parse(e.to_string()))?;
        let access_token = token
            .get("access_token")
            .and_then(Value::as_str)
            .ok_or(MetadataError::MissingField("access_token"))?;

        self.client.get_authorized(url, access_token).await
    }

    pub async fn get_service(
        &self,
        service_query: &str,
    ) -> Result<Map<String, Value>, MetadataError> {
        self.get_admin_object(service_query).await
    }

    pub async fn get_version(
        &self,
        version_query: &str,
    ) -> Result<Map<String, Value>, MetadataError> {
        self.get_admin_object(version_query).await
    }

    pub async fn get_instance(
        &self,
        instance_query: &str,
    ) -> Result<Map<String, Value>, MetadataError> {
        self.get_admin_object(instance_query).await
    }

    async fn get_admin_object(&self, url: &str) -> Result<Map<String, Value>, MetadataError> {
        let raw = self.get_admin_api(url).await?;
        match serde_json::from_str(&raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(MetadataError::Parse(format!("{} did not return an object", url))),
            Err(e) => Err(MetadataError::Parse(e.to_string())),
        }
    }

    /// Instance memory usage in MB as reported by the App Engine admin API.
    /// Other platforms report 0.
    pub async fn get_memory(&self, instance_query: &str) -> Result<f64, MetadataError> {
        if self.app_env != AppEnv::GaeStandard {
            return Ok(0.0);
        }

        let instance = self.get_instance(instance_query).await?;
        // int64 fields arrive as JSON strings
        let bytes = match instance.get("memoryUsage") {
            Some(Value::String(s)) => s
                .parse::<f64>()
                .map_err(|e| MetadataError::Parse(format!("memoryUsage: {}", e)))?,
            Some(Value::Number(n)) => n
                .as_f64()
                .ok_or(MetadataError::MissingField("memoryUsage"))?,
            _ => return Err(MetadataError::MissingField("memoryUsage")),
        };

        Ok(memory_convert(bytes))
    }

    /// Project and instance ids from the metadata server, falling back to the
    /// App Engine environment variables when the server can't be reached.
    pub async fn instance_identity(&self) -> Result<InstanceIdentity, MetadataError> {
        let from_server = async {
            let project_id = self.get_metadata(PROJECT_ID_PATH).await?;
            let instance_id = self.get_metadata(INSTANCE_ID_PATH).await?;
            Ok::<_, MetadataError>((project_id, instance_id))
        }
        .await;

        let (project_id, instance_id) = match from_server {
            Ok(ids) => ids,
            Err(e) => {
                tracing::debug!("Metadata server unavailable ({}), using environment", e);
                let project = self.platform.project_from_application();
                let instance = self.platform.gae_instance.clone();
                match (project, instance) {
                    (Some(project), Some(instance)) => (project, instance),
                    _ => return Err(e),
                }
            }
        };

        Ok(InstanceIdentity {
            project_id: project_id.trim().to_string(),
            instance_id: instance_id.trim().to_string(),
            service_name: self.platform.service_name(),
            version_id: self.platform.version_id(),
        })
    }

    /// Admin API resource URLs for this deployment; `None` off-platform.
    pub async fn admin_queries(
        &self,
        identity: &InstanceIdentity,
    ) -> Result<Option<AdminQueries>, MetadataError> {
        if self.app_env == AppEnv::Unknown {
            return Ok(None);
        }

        let service_name = identity
            .service_name
            .as_deref()
            .ok_or(MetadataError::MissingField("service_name"))?;
        let version_id = identity
            .version_id
            .as_deref()
            .ok_or(MetadataError::MissingField("version_id"))?;

        let queries = match self.app_env {
            AppEnv::GaeStandard => {
                let service = format!(
                    "{}/{}/services/{}",
                    APP_ENGINE_ADMIN_BASE, identity.project_id, service_name
                );
                let version = format!("{}/versions/{}", service, version_id);
                let instance = format!("{}/instances/{}", version, identity.instance_id);
                AdminQueries {
                    service,
                    version,
                    instance: Some(instance),
                }
            }
            AppEnv::CloudRun => {
                // projects/<number>/regions/<region>
                let region = self.get_metadata(REGION_PATH).await?;
                let base = format!("{}/{}", CLOUD_RUN_ADMIN_BASE, region.trim())
                    .replace("/regions/", "/locations/");
                let service = format!("{}/services/{}", base, service_name);
                let version = format!("{}/revisions/{}", service, version_id);
                AdminQueries {
                    service,
                    version,
                    instance: None,
                }
            }
            AppEnv::Unknown => return Ok(None),
        };

        tracing::debug!("Service query: {}", queries.service);
        tracing::debug!("Version query: {}", queries.version);
        Ok(Some(queries))
    }

    /// Logs total host memory and a `MEMORY:` line for current usage.
    pub fn log_process_memory(&self, id: &str) -> MemoryReport {
        let snapshot = self.sampler.snapshot();
        tracing::info!(
            "Total (sysinfo): {}MB",
            memory_convert(snapshot.total_bytes as f64).round()
        );
        log_memory(id, "sysinfo", memory_convert(snapshot.used_bytes as f64))
    }

    async fn admin_memory(
        &self,
        identity: &InstanceIdentity,
    ) -> Result<Option<f64>, MetadataError> {
        let instance_query = self
            .admin_queries(identity)
            .await?
            .and_then(|queries| queries.instance);
        match instance_query {
            Some(query) => Ok(Some(self.get_memory(&query).await?)),
            None => Ok(None),
        }
    }

    /// Logs every memory figure available on this platform. Cloud Run has no
    /// per-instance admin resource, so only the local figure is reported there.
    /// If the admin API fails, the local figure is still logged before the
    /// error is returned.
    pub async fn report_memory(&self) -> Result<Vec<MemoryReport>, MetadataError> {
        let identity = self.instance_identity().await?;
        tracing::info!(
            app_env = %self.app_env,
            service = identity.service_name.as_deref().unwrap_or("-"),
            version = identity.version_id.as_deref().unwrap_or("-"),
            instance = %identity.instance_id,
            "Reporting memory"
        );

        let mut reports = Vec::new();
        // Only App Engine exposes a per-instance admin resource.
        if self.app_env == AppEnv::GaeStandard {
            match self.admin_memory(&identity).await {
                Ok(Some(used)) => {
                    reports.push(log_memory(&identity.instance_id, "admin_api", used))
                }
                Ok(None) => {}
                Err(e) => {
                    self.log_process_memory(&identity.instance_id);
                    return Err(e);
                }
            }
        }
        reports.push(self.log_process_memory(&identity.instance_id));

        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeClient {
        responses: HashMap<String, String>,
        authorized: Mutex<Vec<(String, String)>>,
    }

    impl FakeClient {
        fn with(mut self, key: &str, body: &str) -> Self {
            self.responses.insert(key.to_string(), body.to_string());
            self
        }

        fn lookup(&self, key: &str) -> Result<String, MetadataError> {
            self.responses
                .get(key)
                .cloned()
                .ok_or_else(|| MetadataError::Request {
                    url: key.to_string(),
                    status: None,
                    message: "connection refused".to_string(),
                })
        }
    }

    #[async_trait]
    impl MetadataClient for FakeClient {
        async fn metadata(&self, path: &str) -> Result<String, MetadataError> {
            self.lookup(path)
        }

        async fn get_authorized(&self, url: &str, token: &str) -> Result<String, MetadataError> {
            self.authorized
                .lock()
                .unwrap()
                .push((url.to_string(), token.to_string()));
            self.lookup(url)
        }
    }

    struct FixedSampler;

    impl MemorySampler for FixedSampler {
        fn snapshot(&self) -> MemorySnapshot {
            MemorySnapshot {
                total_bytes: 2_000_000_000,
                used_bytes: 512_400_000,
            }
        }
    }

    const TOKEN: &str = r#"{"access_token":"ya29.meta","expires_in":3599,"token_type":"Bearer"}"#;

    fn gae_platform() -> PlatformEnv {
        PlatformEnv {
            gae_application: Some("s~demo-project".into()),
            gae_instance: Some("00c61b117c".into()),
            gae_service: Some("default".into()),
            gae_version: Some("v1:4567".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn admin_api_uses_metadata_token() {
        let client = FakeClient::default()
            .with(SERVICE_ACCOUNT_TOKEN_PATH, TOKEN)
            .with("https://admin.test/thing", r#"{"name":"thing"}"#);
        let service =
            MetadataService::new(client, FixedSampler, AppEnv::CloudRun, PlatformEnv::default());

        let body = service.get_service("https://admin.test/thing").await.unwrap();

        assert_eq!(body.get("name").and_then(Value::as_str), Some("thing"));
        let calls = service.client.authorized.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![("https://admin.test/thing".to_string(), "ya29.meta".to_string())]
        );
    }

    #[tokio::test]
    async fn memory_is_zero_off_app_engine() {
        let service = MetadataService::new(
            FakeClient::default(),
            FixedSampler,
            AppEnv::CloudRun,
            PlatformEnv::default(),
        );

        assert_eq!(service.get_memory("https://admin.test/i").await.unwrap(), 0.0);
        assert!(service.client.authorized.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn app_engine_memory_is_read_from_instance() {
        let client = FakeClient::default()
            .with(SERVICE_ACCOUNT_TOKEN_PATH, TOKEN)
            .with("https://admin.test/i", r#"{"id":"i","memoryUsage":"134217728"}"#);
        let service =
            MetadataService::new(client, FixedSampler, AppEnv::GaeStandard, gae_platform());

        let used = service.get_memory("https://admin.test/i").await.unwrap();
        assert!((used - 134.217728).abs() < 1e-9);
    }

    #[tokio::test]
    async fn identity_falls_back_to_environment() {
        let service = MetadataService::new(
            FakeClient::default(),
            FixedSampler,
            AppEnv::GaeStandard,
            gae_platform(),
        );

        let identity = service.instance_identity().await.unwrap();

        assert_eq!(identity.project_id, "demo-project");
        assert_eq!(identity.instance_id, "00c61b117c");
        assert_eq!(identity.version_id.as_deref(), Some("4567"));
    }

    #[tokio::test]
    async fn identity_without_server_or_env_fails() {
        let service = MetadataService::new(
            FakeClient::default(),
            FixedSampler,
            AppEnv::Unknown,
            PlatformEnv::default(),
        );

        assert!(matches!(
            service.instance_identity().await,
            Err(MetadataError::Request { .. })
        ));
    }

    #[tokio::test]
    async fn builds_app_engine_queries() {
        let service = MetadataService::new(
            FakeClient::default(),
            FixedSampler,
            AppEnv::GaeStandard,
            gae_platform(),
        );
        let identity = service.instance_identity().await.unwrap();

        let queries = service.admin_queries(&identity).await.unwrap().unwrap();

        assert_eq!(
            queries.instance.as_deref(),
            Some("https://appengine.googleapis.com/v1/apps/demo-project/services/default/versions/4567/instances/00c61b117c")
        );
    }

    #[tokio::test]
    async fn builds_cloud_run_queries_with_locations() {
        let client = FakeClient::default().with(REGION_PATH, "projects/123/regions/us-central1\n");
        let platform = PlatformEnv {
            k_service: Some("api".into()),
            k_revision: Some("api-00042-abc".into()),
            ..Default::default()
        };
        let service = MetadataService::new(client, FixedSampler, AppEnv::CloudRun, platform.clone());
        let identity = InstanceIdentity {
            project_id: "demo".into(),
            instance_id: "abc".into(),
            service_name: platform.service_name(),
            version_id: platform.version_id(),
        };

        let queries = service.admin_queries(&identity).await.unwrap().unwrap();

        assert_eq!(
            queries.version,
            "https://run.googleapis.com/v2/projects/123/locations/us-central1/services/api/revisions/api-00042-abc"
        );
        assert_eq!(queries.instance, None);
    }

    #[tokio::test]
    async fn cloud_run_report_skips_admin_api() {
        // No region stub and no K_REVISION: the admin queries could not be built.
        let client = FakeClient::default()
            .with(PROJECT_ID_PATH, "demo")
            .with(INSTANCE_ID_PATH, "run-instance-1");
        let platform = PlatformEnv {
            k_service: Some("api".into()),
            ..Default::default()
        };
        let service = MetadataService::new(client, FixedSampler, AppEnv::CloudRun, platform);

        let reports = service.report_memory().await.unwrap();

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].source, "sysinfo");
        assert_eq!(reports[0].id, "run-instance-1");
        assert!(service.client.authorized.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn report_memory_logs_admin_and_local_figures() {
        let instance_url = "https://appengine.googleapis.com/v1/apps/demo-project/services/default/versions/4567/instances/00c61b117c";
        let client = FakeClient::default()
            .with(SERVICE_ACCOUNT_TOKEN_PATH, TOKEN)
            .with(instance_url, r#"{"memoryUsage":"100000000"}"#);
        let service =
            MetadataService::new(client, FixedSampler, AppEnv::GaeStandard, gae_platform());

        let reports = service.report_memory().await.unwrap();

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].source, "admin_api");
        assert_eq!(reports[0].memory_used_by, 100);
        assert_eq!(reports[1].source, "sysinfo");
        assert_eq!(reports[1].memory_used_by, 512);
        assert_eq!(reports[1].id, "00c61b117c");
    }
}
