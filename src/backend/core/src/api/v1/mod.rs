//! V1 API: job submission, queries, cancellation, results and events.

pub mod routes;

pub use routes::{v1_router, V1_PREFIX};
