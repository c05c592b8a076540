//! Utils module - logging setup and engine metrics

pub mod logging;
pub mod metrics;
