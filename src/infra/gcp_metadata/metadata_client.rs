use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};

use crate::core::metadata::{MetadataClient, MetadataError};

pub const METADATA_BASE: &str = "http://metadata.google.internal";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// reqwest client for the GCE metadata server and the admin APIs.
#[derive(Debug, Clone)]
pub struct GcpMetadataClient {
    client: Client,
    metadata_base: String,
}

impl GcpMetadataClient {
    pub fn new() -> Self {
        Self::with_base(METADATA_BASE)
    }

    pub fn with_base(metadata_base: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            metadata_base: metadata_base.into().trim_end_matches('/').to_string(),
        }
    }

    /// Honours `GCE_METADATA_HOST` the way the Google client libraries do.
    pub fn from_env() -> Self {
        match std::env::var("GCE_METADATA_HOST") {
            Ok(host) if !host.is_empty() => Self::with_base(format!("http://{}", host)),
            _ => Self::new(),
        }
    }

    async fn fetch_text(url: &str, request: RequestBuilder) -> Result<String, MetadataError> {
        let response = request.send().await.map_err(|e| MetadataError::Request {
            url: url.to_string(),
            status: None,
            message: e.to_string(),
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| MetadataError::Request {
            url: url.to_string(),
            status: Some(status.as_u16()),
            message: e.to_string(),
        })?;

        if !status.is_success() {
            return Err(MetadataError::Request {
                url: url.to_string(),
                status: Some(status.as_u16()),
                message: text,
            });
        }
        Ok(text)
    }
}

impl Default for GcpMetadataClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetadataClient for GcpMetadataClient {
    async fn metadata(&self, path: &str) -> Result<String, MetadataError> {
        let url = format!("{}{}", self.metadata_base, path);
        let request = self.client.get(&url).header("Metadata-Flavor", "Google");
        Self::fetch_text(&url, request).await
    }

    async fn get_authorized(&self, url: &str, token: &str) -> Result<String, MetadataError> {
        let request = self.client.get(url).bearer_auth(token);
        Self::fetch_text(url, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::metadata::{
        AppEnv, MetadataService, PlatformEnv, INSTANCE_ID_PATH, PROJECT_ID_PATH,
        SERVICE_ACCOUNT_TOKEN_PATH,
    };
    use crate::infra::gcp_metadata::SysinfoMemorySampler;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn metadata_requests_carry_flavor_header() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(PROJECT_ID_PATH))
            .and(header("Metadata-Flavor", "Google"))
            .respond_with(ResponseTemplate::new(200).set_body_string("my-project"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = GcpMetadataClient::with_base(mock_server.uri());
        assert_eq!(client.metadata(PROJECT_ID_PATH).await.unwrap(), "my-project");
    }

    #[tokio::test]
    async fn non_success_is_a_request_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(INSTANCE_ID_PATH))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&mock_server)
            .await;

        let client = GcpMetadataClient::with_base(mock_server.uri());
        let err = client.metadata(INSTANCE_ID_PATH).await.unwrap_err();

        match err {
            MetadataError::Request { status, message, .. } => {
                assert_eq!(status, Some(503));
                assert_eq!(message, "unavailable");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn admin_api_uses_metadata_token() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(SERVICE_ACCOUNT_TOKEN_PATH))
            .and(header("Metadata-Flavor", "Google"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ya29.sa",
                "expires_in": 3599,
                "token_type": "Bearer"
            })))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/apps/p/services/default"))
            .and(header("authorization", "Bearer ya29.sa"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "default"})),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let service = MetadataService::new(
            GcpMetadataClient::with_base(mock_server.uri()),
            SysinfoMemorySampler::new(),
            AppEnv::GaeStandard,
            PlatformEnv::default(),
        );

        let url = format!("{}/v1/apps/p/services/default", mock_server.uri());
        let service_info = service.get_service(&url).await.unwrap();
        assert_eq!(service_info.get("id").and_then(|v| v.as_str()), Some("default"));
    }
}
