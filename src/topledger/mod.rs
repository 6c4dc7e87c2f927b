pub mod client;
pub mod handler;
pub mod metrics;
