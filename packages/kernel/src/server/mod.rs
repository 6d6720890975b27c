//! HTTP surface: a thin translation layer over the kernel.

pub mod app;
pub mod error;
pub mod middleware;
pub mod routes;

pub use app::{build_app, build_state, AppState};
pub use error::{ApiError, ApiResult};
