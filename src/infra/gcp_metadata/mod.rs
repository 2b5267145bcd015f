pub mod memory_sampler;
pub mod metadata_client;

pub use memory_sampler::SysinfoMemorySampler;
pub use metadata_client::GcpMetadataClient;
