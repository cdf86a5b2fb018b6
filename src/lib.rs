//! Battery cycling analytics pipeline.
//!
//! Query client → cell metadata table → selection → per-cell cycle
//! aggregation → figure. The selection logic is a pure reducer; the
//! [`dashboard::Dashboard`] driver executes what it asks for.

pub mod config;
pub mod cycles;
pub mod dashboard;
pub mod logging;
pub mod metadata;
pub mod plot;
pub mod query;
pub mod schema;
pub mod search;
pub mod selection;
pub mod table;
