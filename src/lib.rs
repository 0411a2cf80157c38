// src/lib.rs
pub mod types;
pub mod config;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod providers;
pub mod subfetch;
pub mod collector;
pub mod ranking;
pub mod pipeline;
pub mod cache;
pub mod server;
pub mod report;
