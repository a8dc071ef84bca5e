pub mod chat;
pub mod config;
pub mod errors;
pub mod export;
pub mod metrics;
pub mod middleware;
pub mod pricing;
pub mod protocol;
pub mod providers;
pub mod server;
pub mod store;
pub mod streaming;
pub mod usage;

// Re-export commonly used types for easier access
pub use config::{load_config, Config};
pub use errors::{AppError, AppResult};
pub use pricing::PricingTable;
pub use protocol::{resolve, StructuredResponse};
pub use server::{create_app, start_server, AppState};
pub use usage::UsageMetrics;
