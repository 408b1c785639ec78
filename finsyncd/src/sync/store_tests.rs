use super::*;
use finsync_core::{Budget, BudgetPeriod, Expense, SavingsGoal};
use tempfile::tempdir;

async fn make_store() -> LocalStore {
    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    let store = LocalStore::from_pool(pool);
    store.init().await.unwrap();
    store
}

fn budget(id: &str, amount: f64) -> Budget {
    Budget {
        id: id.into(),
        user_id: Some("user-1".into()),
        category: "Groceries".into(),
        amount,
        spent: 0.0,
        period: BudgetPeriod::Monthly,
        start_date: "2024-04-01".into(),
        created_at: None,
    }
}

fn expense(id: &str) -> Expense {
    Expense {
        id: id.into(),
        user_id: None,
        category: "Coffee".into(),
        amount: 4.5,
        description: Some("flat white".into()),
        date: "2024-04-02T08:15:00Z".into(),
        budget_id: None,
        created_at: None,
    }
}

#[tokio::test]
async fn missing_collection_loads_empty() {
    let store = make_store().await;
    assert!(store.load::<Budget>().await.unwrap().is_empty());
    assert!(store.load::<SavingsGoal>().await.unwrap().is_empty());
}

#[tokio::test]
async fn save_and_load_collection() {
    let store = make_store().await;
    store
        .save(&[budget("a", 100.0), budget("b", 250.0)])
        .await
        .unwrap();

    let loaded = store.load::<Budget>().await.unwrap();
    assert_eq!(loaded, vec![budget("a", 100.0), budget("b", 250.0)]);
}

#[tokio::test]
async fn malformed_json_loads_as_empty_collection() {
    let store = make_store().await;
    store
        .set_raw(EntityKind::Expense.collection_key(), "{not json")
        .await
        .unwrap();

    assert!(store.load::<Expense>().await.unwrap().is_empty());
}

#[tokio::test]
async fn invalid_and_duplicate_records_are_dropped_on_load() {
    let store = make_store().await;
    let raw = serde_json::json!([
        { "id": "a", "category": "Rent", "amount": 800.0, "start_date": "2024-04-01" },
        { "id": "huge", "category": "Rent", "amount": 7.5e12, "start_date": "2024-04-01" },
        { "id": "a", "category": "Rent", "amount": 1.0, "start_date": "2024-04-01" },
        { "unexpected": true }
    ]);
    store
        .set_raw(EntityKind::Budget.collection_key(), &raw.to_string())
        .await
        .unwrap();

    let loaded = store.load::<Budget>().await.unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].id, "a");
    assert_eq!(loaded[0].amount, 800.0);
}

#[tokio::test]
async fn save_rejects_invalid_amounts_and_duplicate_ids() {
    let store = make_store().await;

    let err = store.save(&[budget("a", 2.0e9)]).await.unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));

    let err = store
        .save(&[budget("a", 1.0), budget("a", 2.0)])
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::DuplicateId { id, .. } if id == "a"));

    assert!(store.load::<Budget>().await.unwrap().is_empty());
}

#[tokio::test]
async fn upsert_and_remove_record() {
    let store = make_store().await;
    assert!(!store.upsert_record(expense("e-1")).await.unwrap());

    let mut changed = expense("e-1");
    changed.amount = 6.0;
    assert!(store.upsert_record(changed).await.unwrap());

    let loaded = store.load::<Expense>().await.unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].amount, 6.0);

    assert!(store.remove_record::<Expense>("e-1").await.unwrap());
    assert!(!store.remove_record::<Expense>("e-1").await.unwrap());
    assert!(store.load::<Expense>().await.unwrap().is_empty());
}

#[tokio::test]
async fn pending_queue_is_fifo() {
    let store = make_store().await;
    let first = PendingSyncItem::create(&budget("a", 1.0)).unwrap();
    let second = PendingSyncItem::delete(EntityKind::Expense, "e-9");
    let third = PendingSyncItem::update(&budget("a", 2.0)).unwrap();
    for item in [&first, &second, &third] {
        store.add_to_pending_sync(item).await.unwrap();
    }

    let pending = store.get_pending_sync().await.unwrap();
    assert_eq!(pending, vec![first, second, third]);
}

#[tokio::test]
async fn local_change_writes_cache_and_queue_together() {
    let store = make_store().await;
    let item = PendingSyncItem::create(&budget("a", 10.0)).unwrap();
    store
        .commit_local_change(&[budget("a", 10.0)], &item)
        .await
        .unwrap();
    assert_eq!(store.load::<Budget>().await.unwrap(), vec![budget("a", 10.0)]);
    assert_eq!(store.get_pending_sync().await.unwrap(), vec![item.clone()]);

    // Reusing the queue id fails the insert, so the cache write rolls back.
    let err = store
        .commit_local_change(&[budget("a", 10.0), budget("b", 20.0)], &item)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Sqlx(_)));
    assert_eq!(store.load::<Budget>().await.unwrap(), vec![budget("a", 10.0)]);
    assert_eq!(store.pending_counts().await.unwrap(), (1, 0));

    let next = PendingSyncItem::create(&budget("c", 1.0)).unwrap();
    let err = store
        .commit_local_change(&[budget("c", -1.0)], &next)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
    assert_eq!(store.pending_counts().await.unwrap(), (1, 0));
}

#[tokio::test]
async fn pending_lookup_is_per_record() {
    let store = make_store().await;
    let item = PendingSyncItem::update(&budget("a", 1.0)).unwrap();
    store.add_to_pending_sync(&item).await.unwrap();

    assert!(store.has_pending_for(EntityKind::Budget, "a").await.unwrap());
    assert!(!store.has_pending_for(EntityKind::Budget, "b").await.unwrap());
    assert!(!store.has_pending_for(EntityKind::Expense, "a").await.unwrap());

    store.remove_pending(&item.id).await.unwrap();
    assert!(!store.has_pending_for(EntityKind::Budget, "a").await.unwrap());
}

#[tokio::test]
async fn mark_failed_and_reset() {
    let store = make_store().await;
    let item = PendingSyncItem::create(&budget("a", 1.0)).unwrap();
    store.add_to_pending_sync(&item).await.unwrap();

    store.mark_pending_failed(&item.id, "timeout").await.unwrap();
    store.mark_pending_failed(&item.id, "503").await.unwrap();
    let pending = store.get_pending_sync().await.unwrap();
    assert!(pending[0].failed);
    assert_eq!(pending[0].attempts, 2);
    assert_eq!(pending[0].last_error.as_deref(), Some("503"));
    assert_eq!(store.pending_counts().await.unwrap(), (1, 1));

    assert_eq!(store.reset_failed_pending().await.unwrap(), 1);
    let pending = store.get_pending_sync().await.unwrap();
    assert!(!pending[0].failed);
    assert_eq!(pending[0].attempts, 0);
    assert!(pending[0].last_error.is_none());
    assert_eq!(store.pending_counts().await.unwrap(), (1, 0));
}

#[tokio::test]
async fn remove_pending_reports_whether_it_existed() {
    let store = make_store().await;
    let item = PendingSyncItem::delete(EntityKind::Budget, "a");
    store.add_to_pending_sync(&item).await.unwrap();

    assert!(store.remove_pending(&item.id).await.unwrap());
    assert!(!store.remove_pending(&item.id).await.unwrap());
    assert_eq!(store.pending_counts().await.unwrap(), (0, 0));
}

#[tokio::test]
async fn malformed_payload_reads_as_missing_data() {
    let store = make_store().await;
    let item = PendingSyncItem::create(&budget("a", 1.0)).unwrap();
    store.add_to_pending_sync(&item).await.unwrap();
    sqlx::query("UPDATE pending_sync SET data = '{broken' WHERE id = ?1")
        .bind(&item.id)
        .execute(&store.pool)
        .await
        .unwrap();

    let pending = store.get_pending_sync().await.unwrap();
    assert!(pending[0].data.is_none());
}

#[tokio::test]
async fn last_sync_never_moves_backwards() {
    let store = make_store().await;
    assert_eq!(store.get_last_sync().await.unwrap(), None);

    assert_eq!(store.set_last_sync(2_000).await.unwrap(), 2_000);
    assert_eq!(store.set_last_sync(1_000).await.unwrap(), 2_000);
    assert_eq!(store.set_last_sync(3_000).await.unwrap(), 3_000);
    assert_eq!(store.get_last_sync().await.unwrap(), Some(3_000));
}

#[tokio::test]
async fn online_flag_defaults_to_true() {
    let store = make_store().await;
    assert!(store.is_online().await.unwrap());
    store.set_online(false).await.unwrap();
    assert!(!store.is_online().await.unwrap());
}

#[tokio::test]
async fn clear_all_offline_data_empties_everything() {
    let store = make_store().await;
    store.save(&[budget("a", 1.0)]).await.unwrap();
    store.save(&[expense("e")]).await.unwrap();
    store
        .add_to_pending_sync(&PendingSyncItem::create(&budget("a", 1.0)).unwrap())
        .await
        .unwrap();
    store.set_last_sync(42).await.unwrap();

    store.clear_all_offline_data().await.unwrap();

    assert!(store.get_pending_sync().await.unwrap().is_empty());
    assert!(store.load::<Budget>().await.unwrap().is_empty());
    assert!(store.load::<Expense>().await.unwrap().is_empty());
    assert_eq!(store.get_last_sync().await.unwrap(), None);
}

#[tokio::test]
async fn remove_data_deletes_single_key() {
    let store = make_store().await;
    store.save(&[budget("a", 1.0)]).await.unwrap();
    store
        .remove_data(EntityKind::Budget.collection_key())
        .await
        .unwrap();
    assert!(store.load::<Budget>().await.unwrap().is_empty());
}

#[tokio::test]
async fn file_backed_store_persists_across_reopen() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("nested").join("offline.db");

    let store = LocalStore::open(&db_path).await.unwrap();
    store.save(&[budget("a", 10.0)]).await.unwrap();
    store.set_last_sync(77).await.unwrap();
    drop(store);

    let reopened = LocalStore::open(&db_path).await.unwrap();
    assert_eq!(reopened.load::<Budget>().await.unwrap().len(), 1);
    assert_eq!(reopened.get_last_sync().await.unwrap(), Some(77));
}
