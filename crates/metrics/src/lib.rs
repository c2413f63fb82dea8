//! Metrics collection and export for runbox.
//!
//! Library crates record through the `metrics` facade macros re-exported here,
//! using the names in [`pool`], [`executor`] and [`http`]. Nothing is kept
//! unless a recorder is installed with [`init_metrics`]; with the
//! `prometheus` feature that recorder renders the `/metrics` endpoint.
//!
//! ```rust,ignore
//! use runbox_metrics::{counter, labels, pool};
//!
//! counter!(pool::CONTAINERS_CREATED_TOTAL, labels::LANGUAGE => "python3").increment(1);
//! ```

mod definitions;
mod recorder;

pub use {
    definitions::*,
    recorder::{MetricsHandle, MetricsRecorderConfig, init_metrics},
};

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};
