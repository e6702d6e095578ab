//! Postgres store tests.
//!
//! Need a disposable database:
//!
//! ```text
//! DATABASE_URL=postgres://localhost/gumjabi_test cargo test -- --ignored
//! ```

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use chrono::Utc;
use gumjabi::{
    db,
    models::work_item::WorkItem,
    store::{
        KeyStore, StoreError, WorkQueue,
        postgres::{PgKeyStore, PgWorkQueue},
    },
};
use uuid::Uuid;

async fn pool() -> db::DbPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = db::create_pool(&url, 5).await.expect("database connection");
    db::run_migrations(&pool).await.expect("migrations");
    pool
}

fn item(key_id: &str, email: &str) -> WorkItem {
    WorkItem {
        key_id: key_id.to_string(),
        email: email.to_string(),
        first_name: "Friendly".to_string(),
        last_name: "Human".to_string(),
        external_link: "intro-course".to_string(),
        integration_id: "offer-42".to_string(),
        requested_at: Utc::now(),
        extra: BTreeMap::from([("price".to_string(), "2900".to_string())]),
    }
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn usage_is_counted_atomically() {
    let pool = pool().await;
    let key_id = format!("pg-test-{}", Uuid::new_v4());
    sqlx::query("INSERT INTO api_keys (id, integration_links) VALUES ($1, '{\"intro-course\": \"offer-42\"}')")
        .bind(&key_id)
        .execute(&pool)
        .await
        .unwrap();
    let keys = Arc::new(PgKeyStore::new(pool.clone()));

    let mut handles = Vec::new();
    for _ in 0..10 {
        let keys = keys.clone();
        let key_id = key_id.clone();
        handles.push(tokio::spawn(async move {
            keys.record_usage(&key_id, Some("10.0.0.1"), Utc::now()).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let record = keys.find_by_id(&key_id).await.unwrap().unwrap();
    assert_eq!(record.usage.times_used, 10);
    assert_eq!(record.usage.last_host.as_deref(), Some("10.0.0.1"));
    assert_eq!(record.integration_for("intro-course"), Some("offer-42"));

    let missing = keys.record_usage("no-such-key", None, Utc::now()).await;
    assert!(matches!(missing, Err(StoreError::NotFound(_))));

    sqlx::query("DELETE FROM api_keys WHERE id = $1")
        .bind(&key_id)
        .execute(&pool)
        .await
        .unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn queue_round_trip_with_exclusive_claims() {
    let pool = pool().await;
    let queue = Arc::new(PgWorkQueue::new(pool.clone()));
    db::prepare_queue(queue.as_ref()).await.unwrap();

    let key_id = format!("pg-test-{}", Uuid::new_v4());
    let id = queue.append(&item(&key_id, "ada@example.com")).await.unwrap();
    let lease = Duration::from_secs(300);

    // Drain until our item shows up; other items in a shared database are released
    let mut ours = None;
    let mut others = Vec::new();
    while let Some(claimed) = queue.claim_next(lease).await.unwrap() {
        if claimed.id == id {
            ours = Some(claimed);
            break;
        }
        others.push(claimed);
    }
    for other in &others {
        queue.release(other).await.unwrap();
    }
    let claimed = ours.expect("appended item is claimable");

    assert_eq!(claimed.item.email, "ada@example.com");
    assert_eq!(claimed.item.extra["price"], "2900");
    assert_eq!(claimed.attempts, 1);

    let (a, b) = tokio::join!(queue.claim_next(lease), queue.claim_next(lease));
    for claim in [a.unwrap(), b.unwrap()].into_iter().flatten() {
        assert_ne!(claim.id, id, "claimed item must stay exclusive");
        queue.release(&claim).await.unwrap();
    }

    assert!(queue.complete(&claimed).await.unwrap());
    assert!(!queue.complete(&claimed).await.unwrap());
}
