//! Job descriptors: the opaque unit of remote work.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{DomainError, DomainResult};

/// A scalar setting value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<bool> for SettingValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for SettingValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for SettingValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for SettingValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl core::fmt::Display for SettingValue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SettingValue::Bool(v) => write!(f, "{v}"),
            SettingValue::Int(v) => write!(f, "{v}"),
            SettingValue::Float(v) => write!(f, "{v}"),
            SettingValue::Text(v) => f.write_str(v),
        }
    }
}

/// Decoded settings mapping (keys sorted for stable encoding).
pub type SettingsMap = BTreeMap<String, SettingValue>;

/// Settings attached to a descriptor.
///
/// `Raw` keeps the original text of a settings cell that could not be
/// decoded; such descriptors are flagged but never dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Settings {
    Decoded(SettingsMap),
    Raw(String),
}

impl Settings {
    /// Decode a serialized settings cell (a JSON object of scalars).
    pub fn decode(cell: &str) -> DomainResult<SettingsMap> {
        let value: Value = serde_json::from_str(cell.trim())
            .map_err(|e| DomainError::invalid_settings(e.to_string()))?;
        if !value.is_object() {
            return Err(DomainError::invalid_settings("expected a JSON object"));
        }
        serde_json::from_value(value).map_err(|e| DomainError::invalid_settings(e.to_string()))
    }

    /// Decode a cell, falling back to the raw text on failure.
    pub fn from_cell(cell: &str) -> (Self, Option<DomainError>) {
        match Self::decode(cell) {
            Ok(map) => (Self::Decoded(map), None),
            Err(err) => (Self::Raw(cell.to_string()), Some(err)),
        }
    }

    /// Serialized form written back to queue and ledger files.
    pub fn to_cell(&self) -> String {
        match self {
            Settings::Decoded(map) => {
                serde_json::to_string(map).unwrap_or_else(|_| "{}".to_string())
            }
            Settings::Raw(raw) => raw.clone(),
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, Settings::Raw(_))
    }

    fn to_json(&self) -> Value {
        match self {
            Settings::Decoded(map) => json!(map),
            Settings::Raw(raw) => Value::String(raw.clone()),
        }
    }
}

/// Immutable description of one unit of remote computation.
///
/// Identity is the payload string under its kind and settings: one payload
/// queued with several settings variants is several jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    kind: String,
    settings: Settings,
    payload: String,
}

impl JobDescriptor {
    pub fn new(kind: impl Into<String>, settings: SettingsMap, payload: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            settings: Settings::Decoded(settings),
            payload: payload.into(),
        }
    }

    /// Build a descriptor from a stored row whose settings may not decode.
    pub fn from_parts(kind: impl Into<String>, settings: Settings, payload: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            settings,
            payload: payload.into(),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// True when both descriptors run the same payload with the same
    /// settings. Used for dedup and resume matching.
    pub fn same_job(&self, other: &JobDescriptor) -> bool {
        self.payload == other.payload
            && self.kind == other.kind
            && self.settings.to_cell() == other.settings.to_cell()
    }

    /// True when the settings cell could not be decoded.
    pub fn is_flagged(&self) -> bool {
        self.settings.is_raw()
    }

    /// Request body sent to the remote service.
    pub fn request_body(&self) -> Value {
        json!({
            "type": self.kind,
            "settings": self.settings.to_json(),
            "regular": self.payload,
        })
    }
}
