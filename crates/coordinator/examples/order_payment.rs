//! Example: paying for an order from an RFID card balance
//!
//! Two requests race to pay the same order. The distributed lock serializes
//! them, the first commit marks the order paid, and the second sees that and
//! rejects the duplicate. A transient failure on the first commit shows the
//! retry path.
//!
//! Run with: RUST_LOG=info cargo run --example order_payment

use hasivu_coordinator::DatabaseTransaction;
use futures::future::join_all;
use hasivu_coordinator::{
    CoordinatorConfig, DatabaseError, IsolationLevel, LockStore, MemoryLockStore,
    TransactionCoordinator,
};
use hasivu_database::{MemoryDatabase, MemoryTransaction};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, fmt};

async fn pay_order(
    tx: &mut MemoryTransaction,
    order_id: &str,
    card_id: &str,
) -> hasivu_database::Result<i64> {
    let status_key = format!("order:{order_id}:status");
    let balance_key = format!("rfid:{card_id}:balance");

    if tx.get(&status_key) == Some(json!("paid")) {
        return Err(DatabaseError::other(format!("Order {order_id} already paid")));
    }

    let amount = tx
        .get(&format!("order:{order_id}:amount"))
        .and_then(|v| v.as_i64())
        .ok_or_else(|| DatabaseError::other(format!("Order {order_id} not found")))?;
    let balance = tx.get(&balance_key).and_then(|v| v.as_i64()).unwrap_or(0);

    if balance < amount {
        return Err(DatabaseError::other(format!(
            "Insufficient balance on card {card_id}"
        )));
    }

    tx.execute(&format!(
        "UPDATE rfid_cards SET balance = {} WHERE id = '{card_id}'",
        balance - amount
    ))
    .await?;
    tx.put(balance_key, json!(balance - amount));
    tx.put(status_key, json!("paid"));

    Ok(balance - amount)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let database = MemoryDatabase::new();
    database.insert("order:1001:amount", json!(120));
    database.insert("rfid:card-7:balance", json!(500));
    database.push_commit_failure(DatabaseError::from_driver(
        Some("08006"),
        "connection reset by peer",
    ));

    let store: Arc<dyn LockStore> = Arc::new(MemoryLockStore::new());
    let config = CoordinatorConfig::from_env()?;
    let coordinator = Arc::new(TransactionCoordinator::with_config(
        database.clone(),
        store,
        config,
    ));
    coordinator.start_lock_sweeper();

    let requests = (1..=2).map(|request| {
        let coordinator = coordinator.clone();
        async move {
            let options = coordinator
                .options()
                .with_isolation_level(IsolationLevel::Serializable)
                .with_distributed_lock(
                    coordinator
                        .lock_options("order:1001:payment")
                        .with_ttl(Duration::from_secs(10)),
                )
                .with_metrics(true);

            let outcome = coordinator
                .execute_transaction(options, |tx| {
                    Box::pin(async move { pay_order(tx, "1001", "card-7").await })
                })
                .await;
            (request, outcome)
        }
    });

    for (request, outcome) in join_all(requests).await {
        match outcome {
            Ok(result) => println!(
                "request {request}: paid, remaining balance {} (txn {}, {} attempts, {:?})",
                result.data,
                result.transaction_id,
                result.attempts(),
                result.duration
            ),
            Err(e) => println!(
                "request {request}: rejected after {} attempts: {}",
                e.attempts(),
                e
            ),
        }
    }

    println!("final balance: {:?}", database.get("rfid:card-7:balance"));
    println!("stats: {}", serde_json::to_string(&coordinator.stats())?);

    coordinator.shutdown().await;
    Ok(())
}
