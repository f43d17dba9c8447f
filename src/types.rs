//! Flag value and evaluation result types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Declared type of a flag, carried alongside the value so that typed
/// getters can refuse a value whose shape changed server-side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagType {
    Boolean,
    String,
    Number,
    Json,
}

impl FlagType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlagType::Boolean => "boolean",
            FlagType::String => "string",
            FlagType::Number => "number",
            FlagType::Json => "json",
        }
    }
}

impl std::fmt::Display for FlagType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an evaluation produced the value it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationReason {
    /// Fresh value from the local cache.
    Cached,
    /// Expired value served because nothing fresher was available.
    StaleCache,
    /// Seed value supplied by the consumer.
    Bootstrap,
    /// Value returned directly by the server.
    Server,
    /// Caller-supplied default.
    Default,
    FlagNotFound,
    TypeMismatch,
    Disabled,
    Offline,
    Error,
}

/// A dynamically typed flag value.
///
/// Variant order matters for deserialization: `Null` must precede `Json` so
/// a JSON `null` does not get absorbed as `Json(Value::Null)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlagValue {
    Bool(bool),
    String(String),
    Number(f64),
    Null,
    Json(serde_json::Value),
}

impl FlagValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FlagValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FlagValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            FlagValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            FlagValue::Number(n) => Some(*n as i64),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            FlagValue::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FlagValue::Null)
    }

    /// Type implied by the value's own shape, used when the server omits
    /// an explicit `flagType`.
    pub fn inferred_type(&self) -> FlagType {
        match self {
            FlagValue::Bool(_) => FlagType::Boolean,
            FlagValue::String(_) => FlagType::String,
            FlagValue::Number(_) => FlagType::Number,
            FlagValue::Json(_) | FlagValue::Null => FlagType::Json,
        }
    }
}

impl From<bool> for FlagValue {
    fn from(value: bool) -> Self {
        FlagValue::Bool(value)
    }
}

impl From<&str> for FlagValue {
    fn from(value: &str) -> Self {
        FlagValue::String(value.to_string())
    }
}

impl From<String> for FlagValue {
    fn from(value: String) -> Self {
        FlagValue::String(value)
    }
}

impl From<f64> for FlagValue {
    fn from(value: f64) -> Self {
        FlagValue::Number(value)
    }
}

impl From<i64> for FlagValue {
    fn from(value: i64) -> Self {
        FlagValue::Number(value as f64)
    }
}

impl From<i32> for FlagValue {
    fn from(value: i32) -> Self {
        FlagValue::Number(value as f64)
    }
}

impl From<serde_json::Value> for FlagValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Bool(b) => FlagValue::Bool(b),
            serde_json::Value::String(s) => FlagValue::String(s),
            serde_json::Value::Number(n) => FlagValue::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::Null => FlagValue::Null,
            other => FlagValue::Json(other),
        }
    }
}

/// A single flag as delivered by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagState {
    pub key: String,
    pub value: FlagValue,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub version: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag_type: Option<FlagType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl FlagState {
    pub fn new(key: impl Into<String>, value: FlagValue) -> Self {
        Self {
            key: key.into(),
            value,
            enabled: true,
            version: 0,
            flag_type: None,
            last_modified: None,
        }
    }

    /// The declared type, or the type inferred from the value if absent.
    pub fn effective_flag_type(&self) -> FlagType {
        self.flag_type.unwrap_or_else(|| self.value.inferred_type())
    }
}

/// The outcome of a flag lookup. Immutable once built.
#[derive(Debug, Clone)]
pub struct EvaluationResult {
    pub flag_key: String,
    pub value: FlagValue,
    pub enabled: bool,
    pub reason: EvaluationReason,
    pub version: i64,
    pub timestamp: DateTime<Utc>,
}

impl EvaluationResult {
    /// A result carrying a caller-supplied (or absent) value rather than a
    /// flag from the store.
    pub fn default_result(
        key: impl Into<String>,
        value: FlagValue,
        reason: EvaluationReason,
    ) -> Self {
        Self {
            flag_key: key.into(),
            value,
            enabled: false,
            reason,
            version: 0,
            timestamp: Utc::now(),
        }
    }

    /// A result backed by a stored flag.
    pub fn from_flag(flag: &FlagState, reason: EvaluationReason) -> Self {
        Self {
            flag_key: flag.key.clone(),
            value: flag.value.clone(),
            enabled: flag.enabled,
            reason,
            version: flag.version,
            timestamp: Utc::now(),
        }
    }

    pub fn bool_value(&self) -> bool {
        self.value.as_bool().unwrap_or(false)
    }

    pub fn string_value(&self) -> Option<&str> {
        self.value.as_str()
    }

    pub fn number_value(&self) -> f64 {
        self.value.as_number().unwrap_or(0.0)
    }

    pub fn int_value(&self) -> i64 {
        self.value.as_int().unwrap_or(0)
    }

    pub fn json_value(&self) -> Option<&serde_json::Value> {
        self.value.as_json()
    }
}
