//! Core data models for the gateway
//!
//! `FunctionStatus` mirrors the provider's function listing record. The
//! provider owns every field except the metric ones (`invocationCount`,
//! `invocationAvgTime`, `usage`), which this crate fills in.
//!
//! `VectorQueryResponse` is the instant-vector shape returned by the
//! Prometheus HTTP API for `/api/v1/query`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

/// Resource requests or limits declared for a function
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionResources {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub memory: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cpu: String,
}

/// Live resource usage across all replicas of a function
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionUsage {
    /// CPU seconds (or percentage, depending on the query)
    #[serde(default)]
    pub cpu: f64,
    /// Working set memory in bytes
    #[serde(default)]
    pub total_memory_bytes: f64,
}

/// A deployed function as reported by the provider, plus live metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionStatus {
    pub name: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub env_process: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_vars: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secrets: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<FunctionResources>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<FunctionResources>,
    #[serde(default)]
    pub read_only_root_filesystem: bool,
    #[serde(default)]
    pub invocation_count: f64,
    #[serde(default)]
    pub invocation_avg_time: f64,
    #[serde(default)]
    pub replicas: u64,
    #[serde(default)]
    pub available_replicas: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<FunctionUsage>,
}

impl FunctionStatus {
    /// Build a new record carrying every provider-owned field of `self`
    /// and freshly zeroed metric fields.
    pub fn with_zeroed_metrics(&self) -> Self {
        Self {
            invocation_count: 0.0,
            invocation_avg_time: 0.0,
            usage: Some(FunctionUsage::default()),
            ..self.clone()
        }
    }

    /// Key used by the gateway's `function_name` label: `name.namespace`
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.name, self.namespace)
    }

    /// Series key for exporter gauges; bare name when no namespace is set
    pub fn service_key(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            self.qualified_name()
        }
    }

    /// Mutable usage, allocated on first access
    pub fn usage_mut(&mut self) -> &mut FunctionUsage {
        self.usage.get_or_insert_with(FunctionUsage::default)
    }
}

/// Labels attached to a single sample
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleLabels {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub function_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub container: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(flatten)]
    pub other: HashMap<String, String>,
}

/// One time series sample of an instant vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorQueryResult {
    pub metric: SampleLabels,
    /// `[timestamp, "value"]`
    pub value: (serde_json::Value, serde_json::Value),
}

impl VectorQueryResult {
    pub fn new(metric: SampleLabels, value: impl Into<String>) -> Self {
        Self {
            metric,
            value: (serde_json::Value::from(0), serde_json::Value::String(value.into())),
        }
    }

    /// Parse the sample value.
    ///
    /// Returns `None` for non-string values and for strings that are not
    /// finite floats; the latter are logged. `NaN` and `±Inf` cannot be
    /// written as JSON numbers.
    pub fn parsed_value(&self) -> Option<f64> {
        let raw = self.value.1.as_str()?;
        match raw.parse::<f64>() {
            Ok(v) if v.is_finite() => Some(v),
            Ok(_) => {
                warn!(value = %raw, "Skipping non-finite sample value");
                None
            }
            Err(e) => {
                warn!(value = %raw, error = %e, "Unable to convert sample value");
                None
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorQueryData {
    #[serde(default)]
    pub result_type: String,
    #[serde(default)]
    pub result: Vec<VectorQueryResult>,
}

/// Response body of an instant query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorQueryResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub data: VectorQueryData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VectorQueryResponse {
    /// Successful vector response holding `samples`
    pub fn from_samples(samples: Vec<VectorQueryResult>) -> Self {
        Self {
            status: "success".to_string(),
            data: VectorQueryData {
                result_type: "vector".to_string(),
                result: samples,
            },
            error_type: None,
            error: None,
        }
    }

    pub fn samples(&self) -> &[VectorQueryResult] {
        &self.data.result
    }

    pub fn is_empty(&self) -> bool {
        self.data.result.is_empty()
    }
}
