pub mod auth;
pub mod llm;
pub mod paths;
pub mod server;

pub use auth::AuthConfig;
pub use llm::LlmConfig;
pub use paths::ConfigPaths;
pub use server::{Readiness, ServerConfig};
