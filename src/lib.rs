pub mod auth;
pub mod blog;
pub mod cache;
pub mod charts;
pub mod config;
pub mod counters;
pub mod error;
pub mod newsletter;
pub mod routes;
pub mod state;
pub mod storage;
pub mod tables;
pub mod topledger;
pub mod types;
pub mod updater;
