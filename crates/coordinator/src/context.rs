//! Per-invocation transaction contexts and the registry that tracks them

use dashmap::DashMap;
use hasivu_common::{IsolationLevel, Timestamp, TransactionId};
use hasivu_lock::DistributedLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Diagnostic marker appended to a context's operation log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationMarker {
    pub attempt: u32,
    pub name: String,
    pub at: Timestamp,
}

/// State of one `execute_transaction` call, alive only while the call runs
#[derive(Debug, Clone)]
pub struct TransactionContext {
    pub transaction_id: TransactionId,
    pub isolation_level: IsolationLevel,
    pub start_time: Timestamp,
    pub operations: Vec<OperationMarker>,
    pub locks: Vec<DistributedLock>,
    /// Reserved for nested transactions; always empty
    pub savepoints: Vec<String>,
}

impl TransactionContext {
    pub fn new(transaction_id: TransactionId, isolation_level: IsolationLevel) -> Self {
        Self {
            transaction_id,
            isolation_level,
            start_time: Timestamp::now(),
            operations: Vec::new(),
            locks: Vec::new(),
            savepoints: Vec::new(),
        }
    }
}

/// Snapshot of an in-flight transaction for introspection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSummary {
    pub transaction_id: TransactionId,
    pub isolation_level: IsolationLevel,
    pub start_time: Timestamp,
    pub operation_count: usize,
    pub lock_keys: Vec<String>,
}

/// Map of live transaction contexts keyed by transaction ID.
///
/// Concurrent calls only ever touch their own key.
#[derive(Debug, Default)]
pub struct ContextRegistry {
    contexts: DashMap<TransactionId, TransactionContext>,
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a context. It is removed when the returned guard is
    /// deregistered or dropped, whichever happens first.
    pub fn register(self: &Arc<Self>, context: TransactionContext) -> ContextGuard {
        let transaction_id = context.transaction_id;
        self.contexts.insert(transaction_id, context);

        ContextGuard {
            registry: self.clone(),
            transaction_id,
        }
    }

    /// Append an operation marker
    pub fn record(&self, transaction_id: TransactionId, attempt: u32, name: impl Into<String>) {
        if let Some(mut context) = self.contexts.get_mut(&transaction_id) {
            context.operations.push(OperationMarker {
                attempt,
                name: name.into(),
                at: Timestamp::now(),
            });
        }
    }

    pub fn add_lock(&self, transaction_id: TransactionId, lock: DistributedLock) {
        if let Some(mut context) = self.contexts.get_mut(&transaction_id) {
            context.locks.push(lock);
        }
    }

    pub fn get(&self, transaction_id: &TransactionId) -> Option<TransactionContext> {
        self.contexts.get(transaction_id).map(|c| c.value().clone())
    }

    pub fn contains(&self, transaction_id: &TransactionId) -> bool {
        self.contexts.contains_key(transaction_id)
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Summaries of every live context, oldest first
    pub fn summaries(&self) -> Vec<TransactionSummary> {
        let mut summaries: Vec<_> = self
            .contexts
            .iter()
            .map(|entry| {
                let context = entry.value();
                TransactionSummary {
                    transaction_id: context.transaction_id,
                    isolation_level: context.isolation_level,
                    start_time: context.start_time,
                    operation_count: context.operations.len(),
                    lock_keys: context.locks.iter().map(|l| l.key.clone()).collect(),
                }
            })
            .collect();
        summaries.sort_by_key(|s| s.transaction_id);
        summaries
    }

    fn remove(&self, transaction_id: &TransactionId) -> Option<TransactionContext> {
        self.contexts.remove(transaction_id).map(|(_, context)| context)
    }
}

/// Removes its context from the registry on deregistration or drop
pub struct ContextGuard {
    registry: Arc<ContextRegistry>,
    transaction_id: TransactionId,
}

impl ContextGuard {
    /// Remove the context now, returning its final state
    pub fn deregister(self) -> Option<TransactionContext> {
        self.registry.remove(&self.transaction_id)
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.transaction_id);
    }
}
