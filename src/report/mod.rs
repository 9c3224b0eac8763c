//! Run reporting.
//!
//! Reporters consume the finalized [`RunSummary`] after all instances have
//! completed. Multiple reporters can be configured; they run in order and a
//! failure in one does not stop the others.

pub mod console;
pub mod json;

use crate::error::{ConfigError, ReportError};
use crate::model::RunSummary;

pub use console::ConsoleReporter;
pub use json::JsonReporter;

/// A sink for the finalized run summary.
pub trait Reporter: Send + Sync {
    /// Registered reporter name.
    fn name(&self) -> &str;

    /// Emits the summary.
    fn report(&self, summary: &RunSummary) -> Result<(), ReportError>;
}

/// Instantiates the reporters named in the configuration, in order.
pub fn create_reporters(
    names: &[String],
    results_dir: &str,
) -> Result<Vec<Box<dyn Reporter>>, ConfigError> {
    names
        .iter()
        .map(|name| match name.as_str() {
            "console" => Ok(Box::new(ConsoleReporter) as Box<dyn Reporter>),
            "json" => Ok(Box::new(JsonReporter::new(results_dir)) as Box<dyn Reporter>),
            other => Err(ConfigError::UnknownReporter(other.to_string())),
        })
        .collect()
}
