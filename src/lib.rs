//! Batch Product Image Processor
//!
//! This library provides the core functionality for the batch-image-processor
//! service: CSV manifests of products are turned into batch jobs, a worker
//! recompresses every product image and records per-image results, and a
//! webhook is notified once the job reaches a terminal state.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
pub mod shutdown;
