//! dmarc-digest Library
//!
//! This library provides the core functionality for dmarc-digest: configuration, error
//! handling, data models, report decoding and parsing, hostname resolution, aggregation
//! into a run-wide summary, ranking and recommendations, rendering, and webhook delivery.

pub mod aggregator;
pub mod config;
pub mod error;
pub mod file_handlers;
pub mod models;
pub mod pipeline;
pub mod ranking;
pub mod recommendations;
pub mod render;
pub mod resolver;
pub mod webhook;
pub mod xml_parser;

pub use aggregator::{Aggregate, Aggregator};
pub use config::Config;
pub use file_handlers::FileHandler;
pub use pipeline::{run, RunOutcome};
pub use xml_parser::parse_report;
