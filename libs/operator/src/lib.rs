pub mod controller;
pub mod error;
pub mod labels;
pub mod metrics;
pub mod telemetry;
