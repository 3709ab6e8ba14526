//! Self-describing configuration tree.
//!
//! The managed configuration is modelled as a tree of [`SettingValue`] nodes: structured sections
//! hold named children, everything else is a leaf. Only four leaf kinds can be changed through an
//! authorization request (see [`LeafKind`]); other leaf kinds are listed but rejected at
//! submission time.

pub mod resolver;
pub mod store;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub use resolver::{apply, coerce, enumerate_leaf_paths, resolve, LeafDescriptor, LeafPath, PathError};
pub use store::{ConfigurationManager, InMemorySettingsStore, SettingsStoreError};

/// Separator used when a field path is shown to people.
pub const PATH_DISPLAY_SEPARATOR: &str = "->";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SettingValue {
    Section(BTreeMap<String, SettingValue>),
    String(String),
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float(f64),
    List(Vec<SettingValue>),
}

impl SettingValue {
    pub fn section<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, SettingValue)>,
        K: Into<String>,
    {
        Self::Section(fields.into_iter().map(|(name, value)| (name.into(), value)).collect())
    }

    pub fn empty_section() -> Self {
        Self::Section(BTreeMap::new())
    }

    pub fn kind(&self) -> SettingKind {
        match self {
            Self::Section(_) => SettingKind::Section,
            Self::String(_) => SettingKind::String,
            Self::Bool(_) => SettingKind::Bool,
            Self::Int32(_) => SettingKind::Int32,
            Self::Int64(_) => SettingKind::Int64,
            Self::Float(_) => SettingKind::Float,
            Self::List(_) => SettingKind::List,
        }
    }

    pub fn is_section(&self) -> bool {
        matches!(self, Self::Section(_))
    }

    /// Case-insensitive child lookup. Returns the canonical field name with the child.
    pub fn field(&self, name: &str) -> Option<(&str, &SettingValue)> {
        let Self::Section(fields) = self else {
            return None;
        };
        fields
            .iter()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name.trim()))
            .map(|(candidate, value)| (candidate.as_str(), value))
    }

    pub(crate) fn field_mut(&mut self, name: &str) -> Option<(String, &mut SettingValue)> {
        let Self::Section(fields) = self else {
            return None;
        };
        fields
            .iter_mut()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name.trim()))
            .map(|(candidate, value)| (candidate.clone(), value))
    }

    /// Canonical string form of a leaf. Sections render as a list of their field names.
    pub fn render(&self) -> String {
        match self {
            Self::Section(fields) => {
                let names: Vec<&str> = fields.keys().map(String::as_str).collect();
                format!("{{{}}}", names.join(", "))
            }
            Self::String(value) => value.clone(),
            Self::Bool(value) => value.to_string(),
            Self::Int32(value) => value.to_string(),
            Self::Int64(value) => value.to_string(),
            Self::Float(value) => value.to_string(),
            Self::List(items) => {
                let rendered: Vec<String> = items.iter().map(SettingValue::render).collect();
                format!("[{}]", rendered.join(", "))
            }
        }
    }

    /// Builds a tree from untyped JSON, as found in seed files. Integers that fit in 32 bits
    /// become `Int32`, larger ones `Int64`; `null` becomes an empty string.
    pub fn from_plain_json(value: &serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::Object(fields) => Self::Section(
                fields
                    .iter()
                    .map(|(name, child)| (name.clone(), Self::from_plain_json(child)))
                    .collect(),
            ),
            Value::Array(items) => Self::List(items.iter().map(Self::from_plain_json).collect()),
            Value::String(text) => Self::String(text.clone()),
            Value::Bool(flag) => Self::Bool(*flag),
            Value::Number(number) => match number.as_i64() {
                Some(int) => match i32::try_from(int) {
                    Ok(small) => Self::Int32(small),
                    Err(_) => Self::Int64(int),
                },
                None => Self::Float(number.as_f64().unwrap_or_default()),
            },
            Value::Null => Self::String(String::new()),
        }
    }
}

impl Default for SettingValue {
    fn default() -> Self {
        Self::empty_section()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingKind {
    Section,
    String,
    Bool,
    Int32,
    Int64,
    Float,
    List,
}

impl SettingKind {
    pub fn leaf_kind(self) -> Option<LeafKind> {
        match self {
            Self::String => Some(LeafKind::String),
            Self::Bool => Some(LeafKind::Bool),
            Self::Int32 => Some(LeafKind::Int32),
            Self::Int64 => Some(LeafKind::Int64),
            Self::Section | Self::Float | Self::List => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Section => "section",
            Self::String => "string",
            Self::Bool => "bool",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Float => "float64",
            Self::List => "list",
        }
    }
}

impl fmt::Display for SettingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Leaf kinds that an authorization request may modify.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeafKind {
    String,
    Bool,
    Int32,
    Int64,
}

impl LeafKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Bool => "bool",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
        }
    }
}

impl fmt::Display for LeafKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A coerced value for one of the supported leaf kinds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum LeafValue {
    String(String),
    Bool(bool),
    Int32(i32),
    Int64(i64),
}

impl LeafValue {
    pub fn kind(&self) -> LeafKind {
        match self {
            Self::String(_) => LeafKind::String,
            Self::Bool(_) => LeafKind::Bool,
            Self::Int32(_) => LeafKind::Int32,
            Self::Int64(_) => LeafKind::Int64,
        }
    }

    pub fn render(&self) -> String {
        match self {
            Self::String(value) => value.clone(),
            Self::Bool(value) => value.to_string(),
            Self::Int32(value) => value.to_string(),
            Self::Int64(value) => value.to_string(),
        }
    }

    pub fn into_setting(self) -> SettingValue {
        match self {
            Self::String(value) => SettingValue::String(value),
            Self::Bool(value) => SettingValue::Bool(value),
            Self::Int32(value) => SettingValue::Int32(value),
            Self::Int64(value) => SettingValue::Int64(value),
        }
    }
}

/// Ordered field names from the configuration root to a node.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldPath(pub Vec<String>);

impl FieldPath {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("configuration");
        }
        f.write_str(&self.0.join(PATH_DISPLAY_SEPARATOR))
    }
}
