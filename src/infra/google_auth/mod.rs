pub mod ambient;
pub mod installed_flow;
pub mod oauth_client;
pub mod token_file_store;

pub use ambient::ApplicationDefaultCredentials;
pub use installed_flow::InstalledAppFlow;
pub use oauth_client::GoogleOAuthClient;
pub use token_file_store::TokenFileStore;
