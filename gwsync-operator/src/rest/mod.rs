//! REST API over the resource store.

pub mod handlers;
mod routes;

pub use handlers::{ApiError, AppState};
pub use routes::{ApiDoc, create_router};
