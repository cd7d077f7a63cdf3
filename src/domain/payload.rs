//! The shared configuration payload threaded through every stage.
//!
//! A blueprint config is one nested JSON object keyed by stage section
//! (`automl-config`, `bias-analysis-config`, ...). Stages read their
//! section, never mutate another stage's keys, and only add results
//! under a `job-results` key. Missing keys are configuration errors,
//! not defaults.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Well-known section names
pub mod sections {
    pub const DATA: &str = "data-config";
    pub const DATAPREP: &str = "dataprep-config";
    pub const SECURITY: &str = "security-config";
    pub const AUTOML: &str = "automl-config";
    pub const MODEL: &str = "model-config";
    pub const BIAS: &str = "bias-analysis-config";
    pub const XAI: &str = "xai-config";
    pub const ERROR_ANALYSIS: &str = "error-analysis-config";
    pub const WORKSPACE: &str = "workspace-config";
}

/// Key under which each stage writes its outcome
pub const JOB_RESULTS_KEY: &str = "job-results";

/// Configuration errors: always name the offending key and where it was
/// expected. There is no partial or default fallback.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("missing section '{section}' in blueprint config")]
    MissingSection { section: String },

    #[error("missing key '{key}' in section '{section}'")]
    MissingKey { section: String, key: String },

    #[error("key '{key}' in section '{section}' has the wrong type (expected {expected})")]
    WrongType {
        section: String,
        key: String,
        expected: &'static str,
    },
}

/// The stage-keyed blueprint payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StagePayload(Map<String, Value>);

impl StagePayload {
    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Parse from a raw JSON value; the top level must be an object
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            _ => Err(ConfigError::MissingSection {
                section: "<root object>".to_string(),
            }),
        }
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Section lookup; absent sections are configuration errors
    pub fn section(&self, section: &str) -> Result<&Map<String, Value>, ConfigError> {
        self.0
            .get(section)
            .and_then(Value::as_object)
            .ok_or_else(|| ConfigError::MissingSection {
                section: section.to_string(),
            })
    }

    fn section_mut(&mut self, section: &str) -> &mut Map<String, Value> {
        let entry = self
            .0
            .entry(section.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        match entry {
            Value::Object(map) => map,
            // entry was replaced with an object just above
            _ => unreachable!(),
        }
    }

    /// Required string key within a section
    pub fn require_str(&self, section: &str, key: &str) -> Result<&str, ConfigError> {
        let value = self.require(section, key)?;
        value.as_str().ok_or_else(|| ConfigError::WrongType {
            section: section.to_string(),
            key: key.to_string(),
            expected: "string",
        })
    }

    /// Required integer key within a section. Numeric strings are accepted
    /// because hand-written blueprint configs quote counts.
    pub fn require_u64(&self, section: &str, key: &str) -> Result<u64, ConfigError> {
        let value = self.require(section, key)?;
        value
            .as_u64()
            .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
            .ok_or_else(|| ConfigError::WrongType {
                section: section.to_string(),
                key: key.to_string(),
                expected: "unsigned integer",
            })
    }

    pub fn require_f64(&self, section: &str, key: &str) -> Result<f64, ConfigError> {
        let value = self.require(section, key)?;
        value
            .as_f64()
            .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
            .ok_or_else(|| ConfigError::WrongType {
                section: section.to_string(),
                key: key.to_string(),
                expected: "number",
            })
    }

    /// Required key of any type
    pub fn require(&self, section: &str, key: &str) -> Result<&Value, ConfigError> {
        self.section(section)?
            .get(key)
            .ok_or_else(|| ConfigError::MissingKey {
                section: section.to_string(),
                key: key.to_string(),
            })
    }

    /// Optional key lookup (section must still exist)
    pub fn get(&self, section: &str, key: &str) -> Option<&Value> {
        self.0.get(section).and_then(Value::as_object)?.get(key)
    }

    pub fn get_str(&self, section: &str, key: &str) -> Option<&str> {
        self.get(section, key).and_then(Value::as_str)
    }

    /// Set a key within a section, creating the section if needed
    pub fn set(&mut self, section: &str, key: &str, value: Value) {
        self.section_mut(section).insert(key.to_string(), value);
    }

    /// Record a stage's outcome under its section's `job-results` key
    pub fn set_job_results(&mut self, section: &str, results: Value) {
        self.set(section, JOB_RESULTS_KEY, results);
    }

    pub fn job_results(&self, section: &str) -> Option<&Value> {
        self.get(section, JOB_RESULTS_KEY)
    }
}
