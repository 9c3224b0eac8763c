//! File-backed dataset.
//!
//! Reads instance records from a local JSON or YAML file holding a list of
//! instances. The file extension picks the parser.

use std::path::Path;

use tracing::info;

use crate::config::DatasetSettings;
use crate::error::DatasetError;
use crate::model::EvalInstance;

use super::Dataset;

pub struct FileDataset;

impl Dataset for FileDataset {
    fn name(&self) -> &str {
        "file"
    }

    fn load(&self, settings: &DatasetSettings) -> Result<Vec<EvalInstance>, DatasetError> {
        let path = Path::new(&settings.path);
        if !path.is_file() {
            return Err(DatasetError::NotFound(settings.path.clone()));
        }
        let content = std::fs::read_to_string(path)?;

        let parse_err = |message: String| DatasetError::Parse {
            path: settings.path.clone(),
            message,
        };

        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let mut instances: Vec<EvalInstance> = match extension {
            "json" => serde_json::from_str(&content).map_err(|e| parse_err(e.to_string()))?,
            "yaml" | "yml" => serde_yaml::from_str(&content).map_err(|e| parse_err(e.to_string()))?,
            other => {
                return Err(parse_err(format!(
                    "unsupported extension '{other}' (expected json, yaml, or yml)"
                )));
            }
        };

        // Stamp the source onto records that do not carry one.
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("file")
            .to_string();
        for instance in &mut instances {
            if instance.dataset_name.is_empty() {
                instance.dataset_name = stem.clone();
            }
        }

        if let Some(limit) = settings.limit {
            instances.truncate(limit);
        }

        info!(path = %settings.path, count = instances.len(), "Loaded dataset");
        Ok(instances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(suffix: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    const JSON_DATA: &str = r#"[
        {"instance_id": "a-1", "repo": "o/r", "problem_statement": "p1"},
        {"instance_id": "a-2", "repo": "o/r", "problem_statement": "p2"}
    ]"#;

    #[test]
    fn test_load_json() {
        let file = write_file(".json", JSON_DATA);
        let settings = DatasetSettings {
            path: file.path().display().to_string(),
            ..Default::default()
        };

        let instances = FileDataset.load(&settings).unwrap();
        assert_eq!(instances.len(), 2);
        assert_eq!(instances[0].instance_id, "a-1");
        // Omitted fields default.
        assert!(instances[0].test_patch.is_empty());
        assert!(instances[0].fail_to_pass.is_empty());
        // Source stamped from the file stem.
        assert!(!instances[0].dataset_name.is_empty());
    }

    #[test]
    fn test_load_yaml() {
        let file = write_file(
            ".yaml",
            "- instance_id: y-1\n  repo: o/r\n  problem_statement: p\n  fail_to_pass:\n    - tests/test_x.py::test_a\n",
        );
        let settings = DatasetSettings {
            path: file.path().display().to_string(),
            ..Default::default()
        };

        let instances = FileDataset.load(&settings).unwrap();
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].fail_to_pass, vec!["tests/test_x.py::test_a"]);
    }

    #[test]
    fn test_limit_truncates() {
        let file = write_file(".json", JSON_DATA);
        let settings = DatasetSettings {
            path: file.path().display().to_string(),
            limit: Some(1),
            ..Default::default()
        };

        let instances = FileDataset.load(&settings).unwrap();
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].instance_id, "a-1");
    }

    #[test]
    fn test_missing_file() {
        let settings = DatasetSettings {
            path: "/nonexistent/data.json".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            FileDataset.load(&settings),
            Err(DatasetError::NotFound(_))
        ));
    }

    #[test]
    fn test_unsupported_extension() {
        let file = write_file(".csv", "a,b\n");
        let settings = DatasetSettings {
            path: file.path().display().to_string(),
            ..Default::default()
        };
        assert!(matches!(
            FileDataset.load(&settings),
            Err(DatasetError::Parse { .. })
        ));
    }

    #[test]
    fn test_malformed_json() {
        let file = write_file(".json", "{not a list");
        let settings = DatasetSettings {
            path: file.path().display().to_string(),
            ..Default::default()
        };
        assert!(matches!(
            FileDataset.load(&settings),
            Err(DatasetError::Parse { .. })
        ));
    }
}
