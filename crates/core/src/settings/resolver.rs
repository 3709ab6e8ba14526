//! Path resolution over the configuration tree.
//!
//! Field names match case-insensitively; the canonical (stored) names are reported back so that
//! records and messages always show the real path.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{FieldPath, LeafKind, LeafValue, SettingKind, SettingValue};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("field path is empty")]
    EmptyPath,
    #[error("{parent} has no field {segment}")]
    PathNotFound { parent: FieldPath, segment: String },
    #[error("{0} is not a leaf config value")]
    NotALeaf(FieldPath),
    #[error("type {kind} of {path} is not supported")]
    UnsupportedType { path: FieldPath, kind: SettingKind },
    #[error("`{value}` is not a valid {kind} value")]
    InvalidValue { kind: LeafKind, value: String },
    #[error("{path} holds a {found} value, not {expected}")]
    KindMismatch { path: FieldPath, expected: LeafKind, found: SettingKind },
}

/// What a resolved leaf looks like right now.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LeafDescriptor {
    pub path: FieldPath,
    pub kind: SettingKind,
    pub current: String,
}

impl LeafDescriptor {
    /// The modifiable kind of this leaf, or `UnsupportedType`.
    pub fn leaf_kind(&self) -> Result<LeafKind, PathError> {
        self.kind
            .leaf_kind()
            .ok_or_else(|| PathError::UnsupportedType { path: self.path.clone(), kind: self.kind })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafPath {
    pub path: FieldPath,
    pub kind: SettingKind,
}

impl LeafPath {
    pub fn kind_description(&self) -> String {
        match self.kind.leaf_kind() {
            Some(kind) => kind.to_string(),
            None => format!("{} (not supported)", self.kind),
        }
    }
}

pub fn resolve(root: &SettingValue, path: &[String]) -> Result<LeafDescriptor, PathError> {
    let (canonical, node) = walk(root, path)?;
    if node.is_section() {
        return Err(PathError::NotALeaf(canonical));
    }
    Ok(LeafDescriptor { path: canonical, kind: node.kind(), current: node.render() })
}

pub fn coerce(kind: LeafKind, raw: &str) -> Result<LeafValue, PathError> {
    let invalid = || PathError::InvalidValue { kind, value: raw.to_string() };
    match kind {
        LeafKind::String => Ok(LeafValue::String(raw.to_string())),
        LeafKind::Bool => match raw {
            "true" => Ok(LeafValue::Bool(true)),
            "false" => Ok(LeafValue::Bool(false)),
            _ => Err(invalid()),
        },
        LeafKind::Int32 => parse_decimal::<i32>(raw).map(LeafValue::Int32).ok_or_else(invalid),
        LeafKind::Int64 => parse_decimal::<i64>(raw).map(LeafValue::Int64).ok_or_else(invalid),
    }
}

/// Writes `value` into the leaf at `path`. Callers pass a private copy of the tree; nothing is
/// written unless the whole path resolves and the leaf kind matches.
pub fn apply(root: &mut SettingValue, path: &[String], value: &LeafValue) -> Result<(), PathError> {
    if path.is_empty() {
        return Err(PathError::EmptyPath);
    }

    let mut canonical = FieldPath::default();
    let mut node = root;
    for segment in path {
        let Some((name, child)) = node.field_mut(segment) else {
            return Err(PathError::PathNotFound { parent: canonical, segment: segment.clone() });
        };
        canonical = canonical.child(name);
        node = child;
    }

    let found = node.kind();
    match found.leaf_kind() {
        Some(expected) if expected == value.kind() => {
            *node = value.clone().into_setting();
            Ok(())
        }
        Some(_) => Err(PathError::KindMismatch { path: canonical, expected: value.kind(), found }),
        None if found == SettingKind::Section => Err(PathError::NotALeaf(canonical)),
        None => Err(PathError::UnsupportedType { path: canonical, kind: found }),
    }
}

pub fn enumerate_leaf_paths(root: &SettingValue) -> Vec<LeafPath> {
    let mut leaves = Vec::new();
    collect_leaves(root, &FieldPath::default(), &mut leaves);
    leaves
}

fn collect_leaves(node: &SettingValue, prefix: &FieldPath, leaves: &mut Vec<LeafPath>) {
    match node {
        SettingValue::Section(fields) => {
            for (name, child) in fields {
                collect_leaves(child, &prefix.child(name.as_str()), leaves);
            }
        }
        other if !prefix.is_empty() => {
            leaves.push(LeafPath { path: prefix.clone(), kind: other.kind() });
        }
        _ => {}
    }
}

fn walk<'a>(
    root: &'a SettingValue,
    path: &[String],
) -> Result<(FieldPath, &'a SettingValue), PathError> {
    if path.is_empty() {
        return Err(PathError::EmptyPath);
    }

    let mut canonical = FieldPath::default();
    let mut node = root;
    for segment in path {
        let Some((name, child)) = node.field(segment) else {
            return Err(PathError::PathNotFound { parent: canonical, segment: segment.clone() });
        };
        canonical = canonical.child(name);
        node = child;
    }
    Ok((canonical, node))
}

// Base-10 only: an optional leading `-` or `+` followed by ASCII digits.
fn parse_decimal<T: std::str::FromStr>(raw: &str) -> Option<T> {
    let digits = raw.strip_prefix(['-', '+']).unwrap_or(raw);
    if digits.is_empty() || !digits.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    raw.parse::<T>().ok()
}
