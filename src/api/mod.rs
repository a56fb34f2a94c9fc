//! HTTP status API: health, readiness and scheduler counters.

pub mod handlers;
pub mod routes;

pub use handlers::{StatusBoard, StatusCounters};
pub use routes::create_router;
