//! Batch validation ahead of any network work.
//!
//! The linter checks each resource's shape, the uniqueness of effective
//! names, and that every declared dependency resolves within the batch.
//! The first failure aborts with a message carrying 1-based document
//! indices, so authors can find the offending YAML document. Cycle
//! detection is left to the engine's ordering pass; the linter does not
//! consult state.

use std::collections::HashMap;

use serde_yaml::Value as YamlValue;
use thiserror::Error;

use crate::resource::Resource;

/// Errors from batch validation. Indices are 1-based document positions
/// in loader order.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum LintError {
    /// A resource is missing its `path`.
    #[error("resource at document {index}: missing 'path'")]
    MissingPath {
        /// Document index.
        index: usize,
    },

    /// A resource is missing its `data`.
    #[error("resource at document {index} (path {path:?}): missing 'data'")]
    MissingData {
        /// Document index.
        index: usize,
        /// The resource's path.
        path: String,
    },

    /// `data` decoded to something other than a mapping.
    #[error("resource at document {index} (path {path:?}): 'data' must be an object")]
    DataNotObject {
        /// Document index.
        index: usize,
        /// The resource's path.
        path: String,
    },

    /// `revision` is negative.
    #[error("resource at document {index} (path {path:?}): revision must be non-negative")]
    NegativeRevision {
        /// Document index.
        index: usize,
        /// The resource's path.
        path: String,
    },

    /// `method` is neither empty nor `GET`/`POST`.
    #[error("resource at document {index} (path {path:?}): method must be GET or POST (got {method:?})")]
    InvalidMethod {
        /// Document index.
        index: usize,
        /// The resource's path.
        path: String,
        /// The rejected method string.
        method: String,
    },

    /// Two documents share an effective name.
    #[error("duplicate name {name:?}: resources at documents {first} and {second}")]
    DuplicateName {
        /// The shared effective name.
        name: String,
        /// Document index of the first occurrence.
        first: usize,
        /// Document index of the second occurrence.
        second: usize,
    },

    /// A dependency entry is the empty string.
    #[error("resource {path:?} (document {index}): dependency {position} must be non-empty")]
    EmptyDependency {
        /// The resource's path.
        path: String,
        /// Document index.
        index: usize,
        /// 1-based position in the dependency list.
        position: usize,
    },

    /// A dependency does not name any resource in the batch.
    #[error("resource {path:?} (document {index}): dependency {name:?} not found")]
    UnknownDependency {
        /// The resource's path.
        path: String,
        /// Document index.
        index: usize,
        /// The unresolved dependency name.
        name: String,
    },
}

/// Validates a batch. Stops at the first failure.
///
/// # Errors
///
/// Returns the first [`LintError`] in document order.
pub fn lint(resources: &[Resource]) -> Result<(), LintError> {
    let mut by_effective_name: HashMap<String, usize> = HashMap::new();

    for (i, r) in resources.iter().enumerate() {
        let index = i + 1;
        if r.path.is_empty() {
            return Err(LintError::MissingPath { index });
        }
        match &r.data {
            YamlValue::Null => {
                return Err(LintError::MissingData {
                    index,
                    path: r.path.clone(),
                });
            },
            YamlValue::Mapping(_) => {},
            _ => {
                return Err(LintError::DataNotObject {
                    index,
                    path: r.path.clone(),
                });
            },
        }
        if r.revision < 0 {
            return Err(LintError::NegativeRevision {
                index,
                path: r.path.clone(),
            });
        }
        let method = r.method.trim().to_uppercase();
        if !method.is_empty() && method != "GET" && method != "POST" {
            return Err(LintError::InvalidMethod {
                index,
                path: r.path.clone(),
                method: r.method.clone(),
            });
        }

        let effective = r.effective_name();
        if let Some(&first) = by_effective_name.get(&effective) {
            return Err(LintError::DuplicateName {
                name: effective,
                first,
                second: index,
            });
        }
        by_effective_name.insert(effective, index);
    }

    for (i, r) in resources.iter().enumerate() {
        for (j, dep) in r.dependencies.iter().enumerate() {
            if dep.is_empty() {
                return Err(LintError::EmptyDependency {
                    path: r.path.clone(),
                    index: i + 1,
                    position: j + 1,
                });
            }
            if !by_effective_name.contains_key(dep) {
                return Err(LintError::UnknownDependency {
                    path: r.path.clone(),
                    index: i + 1,
                    name: dep.clone(),
                });
            }
        }
    }

    Ok(())
}
