pub mod handler;
pub mod store;
pub mod types;
