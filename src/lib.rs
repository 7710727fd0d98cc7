//! LP email intelligence pipeline for venture fund CRMs.

pub mod classifier;
pub mod config;
pub mod error;
pub mod http;
pub mod ingest;
pub mod model;
pub mod pipeline;
pub mod store;
