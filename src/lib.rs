//! Adaptive HTTP request router library.
//!
//! Selects one backend from a dynamic pool using pluggable strategies
//! (round-robin, weighted round-robin, least-connections, random, and a
//! predictive strategy backed by a remote scorer), probes backend liveness,
//! and records per-backend telemetry that feeds back into selection.

pub mod config;
pub mod dispatch;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod registry;
pub mod resilience;
pub mod scorer;
pub mod store;
pub mod strategy;
pub mod telemetry;

pub use config::schema::RouterConfig;
pub use dispatch::Dispatcher;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use registry::Registry;
pub use telemetry::Collector;
