// Demonstration binary.
//
// This file's job is to:
// 1. Load configuration
// 2. Initialize services (dependency injection)
// 3. Write to a document twice (create, then append)
// 4. Log memory usage for the current platform

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use gcp_doc_tools::config::ToolsConfig;
use gcp_doc_tools::core::auth::CredentialResolver;
use gcp_doc_tools::core::docs::DocumentUpsertService;
use gcp_doc_tools::core::metadata::{AppEnv, MetadataService, PlatformEnv};
use gcp_doc_tools::infra::gcp_metadata::{GcpMetadataClient, SysinfoMemorySampler};
use gcp_doc_tools::infra::google_auth::{
    ApplicationDefaultCredentials, GoogleOAuthClient, InstalledAppFlow, TokenFileStore,
};
use gcp_doc_tools::infra::google_docs::GoogleDocsClient;

const INITIAL_CONTENT: &str = "This is the initial content written by gcp_doc_tools.";
const APPENDED_CONTENT: &str =
    "This is additional content appended in a subsequent call. It should appear on a new line.";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    // Initialize logging so we can see what's happening
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        tracing::error!("{:#}", e);
        return Err(e);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    let config = ToolsConfig::from_env();

    // Read once; everything downstream gets these values passed in.
    let app_env = AppEnv::from_env();
    let platform = PlatformEnv::from_env();

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================

    let oauth = GoogleOAuthClient::new();
    let resolver = CredentialResolver::new(
        TokenFileStore::new(),
        oauth.clone(),
        ApplicationDefaultCredentials::from_env(oauth.clone()),
        InstalledAppFlow::new(oauth),
    );
    let docs = DocumentUpsertService::new(GoogleDocsClient::new(), resolver, config.docs.clone());

    let metadata = MetadataService::new(
        GcpMetadataClient::from_env(),
        SysinfoMemorySampler::new(),
        app_env,
        platform,
    );

    // ========================================================================
    // DEMO
    // ========================================================================

    let created = docs
        .upsert_document(&config.doc_name, INITIAL_CONTENT)
        .await
        .with_context(|| format!("Failed to write to '{}'", config.doc_name))?;
    tracing::info!(outcome = ?created.outcome, "First write done: {}", created.url);

    let appended = docs
        .upsert_document(&config.doc_name, APPENDED_CONTENT)
        .await
        .with_context(|| format!("Failed to append to '{}'", config.doc_name))?;
    tracing::info!(outcome = ?appended.outcome, "Second write done: {}", appended.url);

    match metadata.report_memory().await {
        Ok(reports) => tracing::debug!("Logged {} memory reports", reports.len()),
        Err(e) => {
            tracing::warn!("Instance metadata unavailable: {}", e);
            metadata.log_process_memory("local");
        }
    }

    Ok(())
}
