//! API layer - HTTP endpoint handlers organized by concern.

mod events;
mod health;
mod metrics;
mod routes;

pub use events::{publish_event, PublishResponse};
pub use health::{health, stats};
pub use metrics::prometheus_metrics;
pub use routes::api_routes;
