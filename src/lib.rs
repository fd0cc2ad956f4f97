// Shared infrastructure
pub mod config;
pub mod error;
pub mod metrics;
pub mod telemetry;

// Event distribution core
pub mod auth;
pub mod broker;
pub mod events;
pub mod hub;
pub mod hub_manager;
pub mod membership;
pub mod session;
pub mod visibility;

// Application layer
pub mod api;
pub mod server;
pub mod websocket;

// Supporting modules
pub mod shutdown;
