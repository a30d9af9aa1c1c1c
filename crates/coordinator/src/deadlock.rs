//! Deadlock diagnostics
//!
//! When an attempt fails with a deadlock, the coordinator asks the database
//! for its current lock waits and looks for cycles in the wait-for graph. The
//! analysis is diagnostic: it is logged and attached to metrics but never
//! changes the retry decision.

use hasivu_database::{Database, LockWait};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Suggested reaction to a deadlock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recommendation {
    /// The database already picked a victim; retrying is safe
    Retry,
    /// Lock state could not be inspected
    Abort,
}

/// Outcome of inspecting the lock-wait graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadlockAnalysis {
    pub waits: Vec<LockWait>,

    /// Each cycle lists the participating session IDs in wait order
    pub cycles: Vec<Vec<u64>>,

    pub recommendation: Recommendation,

    /// Why the analysis could not run, if it failed
    pub error: Option<String>,
}

impl DeadlockAnalysis {
    fn failed(error: String) -> Self {
        Self {
            waits: Vec::new(),
            cycles: Vec::new(),
            recommendation: Recommendation::Abort,
            error: Some(error),
        }
    }
}

/// Inspects the database's lock waits after a deadlock
pub struct DeadlockAnalyzer;

impl DeadlockAnalyzer {
    /// Analyze current lock waits. Never fails: an inspection error yields an
    /// `Abort` recommendation.
    pub async fn analyze<D: Database>(database: &D) -> DeadlockAnalysis {
        match database.lock_waits().await {
            Ok(waits) => {
                let cycles = find_cycles(&waits);
                tracing::debug!(
                    waits = waits.len(),
                    cycles = cycles.len(),
                    "Deadlock analysis completed"
                );
                DeadlockAnalysis {
                    waits,
                    cycles,
                    recommendation: Recommendation::Retry,
                    error: None,
                }
            }
            Err(e) => {
                tracing::warn!("Deadlock analysis failed, recommending abort: {}", e);
                DeadlockAnalysis::failed(e.to_string())
            }
        }
    }
}

/// Find cycles in the wait-for graph described by `waits`.
///
/// Traversal order is deterministic (ascending session IDs).
pub fn find_cycles(waits: &[LockWait]) -> Vec<Vec<u64>> {
    let mut graph: BTreeMap<u64, BTreeSet<u64>> = BTreeMap::new();
    for wait in waits {
        graph.entry(wait.waiting).or_default().insert(wait.blocking);
        graph.entry(wait.blocking).or_default();
    }

    let mut cycles = Vec::new();
    let mut visited = HashSet::new();
    let mut on_stack = HashSet::new();
    let mut path = Vec::new();

    for &node in graph.keys() {
        if !visited.contains(&node) {
            visit(&graph, node, &mut visited, &mut on_stack, &mut path, &mut cycles);
        }
    }

    cycles
}

fn visit(
    graph: &BTreeMap<u64, BTreeSet<u64>>,
    node: u64,
    visited: &mut HashSet<u64>,
    on_stack: &mut HashSet<u64>,
    path: &mut Vec<u64>,
    cycles: &mut Vec<Vec<u64>>,
) {
    visited.insert(node);
    on_stack.insert(node);
    path.push(node);

    if let Some(neighbors) = graph.get(&node) {
        for &next in neighbors {
            if on_stack.contains(&next) {
                if let Some(start) = path.iter().position(|&n| n == next) {
                    cycles.push(path[start..].to_vec());
                }
            } else if !visited.contains(&next) {
                visit(graph, next, visited, on_stack, path, cycles);
            }
        }
    }

    path.pop();
    on_stack.remove(&node);
}
