pub mod config;
pub mod error;
pub mod routes;

pub use config::ApiConfig;
pub use error::ApiError;
pub use routes::{create_router, AppState};
