pub mod config;
pub mod error;
pub mod models;
pub mod proxy;
pub mod server;
pub mod translate;

pub use config::{FeatureFlags, ProxyConfig};
pub use error::{ProxyError, Result};
pub use models::ModelResolver;
pub use server::{build_router, AppState};
