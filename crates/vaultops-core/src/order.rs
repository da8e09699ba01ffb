//! Dependency ordering for the apply pass and the delete sweep.
//!
//! Both orders come from Kahn's algorithm over effective names. Apply
//! visits dependencies before dependents and treats a cycle as fatal.
//! The delete sweep walks the stored dependency edges among removed keys
//! and visits dependents first, so nothing on the target is left pointing
//! at an already-deleted dependency.

use std::collections::{HashMap, VecDeque};

use thiserror::Error;
use tracing::warn;

use crate::resource::{Resource, State};

/// A dependency cycle among batch resources.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("cycle in dependencies among resources {names:?}")]
pub struct CycleError {
    /// Effective names of the resources on the cycle (and anything
    /// downstream of it).
    pub names: Vec<String>,
}

/// Computes the apply order as indices into `resources`.
///
/// Edges run from each dependency to its dependent; dependency names
/// that do not match any effective name in the batch are ignored (the
/// linter has already rejected them). Ties break in input order.
///
/// # Errors
///
/// Returns [`CycleError`] if the dependency graph is cyclic.
pub fn apply_order(resources: &[Resource]) -> Result<Vec<usize>, CycleError> {
    let mut by_name: HashMap<String, usize> = HashMap::with_capacity(resources.len());
    for (i, r) in resources.iter().enumerate() {
        by_name.insert(r.effective_name(), i);
    }

    let mut in_degree = vec![0usize; resources.len()];
    let mut adj: Vec<Vec<usize>> = vec![Vec::new(); resources.len()];
    for (i, r) in resources.iter().enumerate() {
        for dep in &r.dependencies {
            let Some(&dep_idx) = by_name.get(dep) else {
                continue;
            };
            adj[dep_idx].push(i);
            in_degree[i] += 1;
        }
    }

    let mut queue: VecDeque<usize> = (0..resources.len())
        .filter(|&i| in_degree[i] == 0)
        .collect();
    let mut order = Vec::with_capacity(resources.len());
    while let Some(u) = queue.pop_front() {
        order.push(u);
        for &v in &adj[u] {
            in_degree[v] -= 1;
            if in_degree[v] == 0 {
                queue.push_back(v);
            }
        }
    }

    if order.len() != resources.len() {
        let mut names: Vec<String> = (0..resources.len())
            .filter(|i| !order.contains(i))
            .map(|i| resources[i].effective_name())
            .collect();
        names.sort();
        return Err(CycleError { names });
    }
    Ok(order)
}

/// Orders removed state keys for the delete sweep: dependents first.
///
/// `keys` must be entries of `state.resources`; edges come from their
/// stored `dependencies`, restricted to the removed set. If those stored
/// edges encode a cycle, the keys Kahn's algorithm cannot order are
/// appended at the end in sorted order and a warning names them, so the
/// sweep still covers every removed key.
#[must_use]
pub fn delete_order(state: &State, keys: &[String]) -> Vec<String> {
    let mut in_degree: HashMap<&str, usize> = keys.iter().map(|k| (k.as_str(), 0)).collect();
    let mut adj: HashMap<&str, Vec<&str>> = keys.iter().map(|k| (k.as_str(), Vec::new())).collect();

    for key in keys {
        let Some(entry) = state.resources.get(key) else {
            continue;
        };
        for dep in &entry.dependencies {
            if !in_degree.contains_key(dep.as_str()) {
                continue;
            }
            adj.entry(dep.as_str()).or_default().push(key.as_str());
            *in_degree.entry(key.as_str()).or_default() += 1;
        }
    }

    let mut queue: VecDeque<&str> = keys
        .iter()
        .map(String::as_str)
        .filter(|k| in_degree.get(k) == Some(&0))
        .collect();
    let mut order: Vec<&str> = Vec::with_capacity(keys.len());
    while let Some(u) = queue.pop_front() {
        order.push(u);
        if let Some(successors) = adj.get(u) {
            for &v in successors {
                if let Some(d) = in_degree.get_mut(v) {
                    *d -= 1;
                    if *d == 0 {
                        queue.push_back(v);
                    }
                }
            }
        }
    }

    // Dependencies-first from Kahn; the sweep wants dependents first.
    order.reverse();

    if order.len() != keys.len() {
        let mut remaining: Vec<&str> = keys
            .iter()
            .map(String::as_str)
            .filter(|k| !order.contains(k))
            .collect();
        remaining.sort_unstable();
        warn!(
            keys = ?remaining,
            "stored dependencies among removed resources form a cycle; deleting them last"
        );
        order.extend(remaining);
    }

    order.into_iter().map(ToString::to_string).collect()
}
