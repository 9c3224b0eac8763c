//! JSON artifact written under the results directory.
//!
//! Each run gets its own directory named by run id, holding `results.json`
//! with the flattened summary record. That record's schema is the durable
//! contract for downstream tooling.

use std::path::PathBuf;

use tracing::info;

use crate::error::ReportError;
use crate::model::RunSummary;

use super::Reporter;

pub struct JsonReporter {
    results_dir: PathBuf,
}

impl JsonReporter {
    pub fn new(results_dir: impl Into<PathBuf>) -> Self {
        Self {
            results_dir: results_dir.into(),
        }
    }
}

impl Reporter for JsonReporter {
    fn name(&self) -> &str {
        "json"
    }

    fn report(&self, summary: &RunSummary) -> Result<(), ReportError> {
        let run_dir = self.results_dir.join(&summary.run_id);
        std::fs::create_dir_all(&run_dir)?;

        let path = run_dir.join("results.json");
        let record = serde_json::to_string_pretty(&summary.to_record())?;
        std::fs::write(&path, record)?;

        info!(path = %path.display(), "Wrote results");
        Ok(())
    }
}
