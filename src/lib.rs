//! dbmetrics library - periodic metric collection from SQL database engines.
//!
//! Each collection cycle opens one connection, picks the query that fits
//! the engine version, scans a result set whose columns are only known at
//! runtime, and maps every row through a declarative schema into a typed
//! event.
//!
//! # Modules
//!
//! - [`version`] - Dotted version range matching
//! - [`cell`] - Normalization of dynamically typed cells
//! - [`scan`] - Result-set scanning into normalized rows
//! - [`schema`] - Field mapping from rows to events
//! - [`collector`] - The per-cycle orchestrator
//! - [`driver`] - Database seam and the DuckDB engine
//! - [`config`] - JSON module configuration
//! - [`runner`] - Periodic scheduling and event sinks
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use dbmetrics::collector::{MetricCollector, QuerySource};
//! use dbmetrics::driver::DuckDbConnector;
//! use dbmetrics::schema::{Rule, Schema, TargetKind};
//!
//! let schema = Schema::new()
//!     .with("block_size", Rule::field("BLOCK_SIZE", TargetKind::Integer))
//!     .with("status", Rule::field("STATUS", TargetKind::String));
//! let collector = MetricCollector::new(
//!     "tablespace",
//!     Arc::new(DuckDbConnector::default()),
//!     QuerySource::Fixed("SELECT 'ONLINE' AS status, 8192 AS block_size".to_string()),
//!     schema,
//! );
//!
//! let result = collector.fetch("./warehouse.duckdb");
//! for event in &result.events {
//!     println!("{}", event.to_json());
//! }
//! ```

pub mod cell;
pub mod collector;
pub mod config;
pub mod driver;
pub mod error;
pub mod runner;
pub mod scan;
pub mod schema;
pub mod version;

pub use collector::{CycleResult, CycleState, MetricCollector, QuerySource, QueryVariant};
pub use config::ModuleConfig;
pub use error::{Error, Result};
pub use scan::NormalizedRow;
pub use schema::{Event, FieldValue, Schema};
