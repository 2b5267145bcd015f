pub mod metadata_models;
pub mod metadata_service;

pub use metadata_models::{
    log_memory, memory_convert, AdminQueries, AppEnv, InstanceIdentity, MemoryReport,
    MemorySnapshot, PlatformEnv,
};
pub use metadata_service::{
    MemorySampler, MetadataClient, MetadataError, MetadataService, INSTANCE_ID_PATH,
    PROJECT_ID_PATH, REGION_PATH, SERVICE_ACCOUNT_TOKEN_PATH,
};
