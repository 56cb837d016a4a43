//! HTTP API handlers for chanvault-ingest

pub mod channels;
pub mod health;
pub mod ingest;
pub mod records;
pub mod rules;
pub mod search;
pub mod stats;

pub use channels::channel_routes;
pub use health::health_routes;
pub use ingest::ingest_routes;
pub use records::record_routes;
pub use rules::rule_routes;
pub use search::search_routes;
pub use stats::stats_routes;
