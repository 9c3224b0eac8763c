//! Dataset sources.
//!
//! A [`Dataset`] yields the immutable instance records for a run. Sources are
//! selected from a static registration table keyed by name; the only built-in
//! source reads instances from a local JSON or YAML file.

pub mod file;

use crate::config::DatasetSettings;
use crate::error::{ConfigError, DatasetError};
use crate::model::EvalInstance;

pub use file::FileDataset;

/// A source of evaluation instances.
pub trait Dataset: Send + Sync {
    /// Registered dataset name.
    fn name(&self) -> &str;

    /// Loads all instances, truncated to the configured limit. Instance id
    /// filtering is the runner's concern so excluded instances still appear
    /// in the summary as skipped.
    fn load(&self, settings: &DatasetSettings) -> Result<Vec<EvalInstance>, DatasetError>;
}

type DatasetCtor = fn() -> Box<dyn Dataset>;

/// Static registration table: name to constructor.
static DATASETS: &[(&str, DatasetCtor)] = &[("file", || Box::new(FileDataset))];

/// Instantiates the dataset source registered under `settings.name`.
pub fn create_dataset(settings: &DatasetSettings) -> Result<Box<dyn Dataset>, ConfigError> {
    DATASETS
        .iter()
        .find(|(name, _)| *name == settings.name)
        .map(|(_, ctor)| ctor())
        .ok_or_else(|| ConfigError::UnknownDataset(settings.name.clone()))
}
