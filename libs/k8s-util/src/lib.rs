pub mod client;
pub mod error;
pub mod events;
pub mod metrics;
pub mod types;
