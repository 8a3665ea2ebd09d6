//! Kraken-backed last-traded-price service: streaming ingestion with
//! REST fallback, a TTL price cache, a staleness watchdog, and the
//! cache-only HTTP read surface in front of them.

pub mod api;
pub mod cache;
pub mod config;
pub mod errors;
pub mod exchange;
pub mod models;
pub mod pairs;
pub mod service;
pub mod watchdog;
