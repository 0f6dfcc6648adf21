use std::sync::Arc;

use sagastore::{Error, InMemoryEngine, Saga, SagaId, SagaStore};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct OrderSaga {
    id: SagaId,
    status: String,
    total: i64,
}

impl Saga for OrderSaga {
    const COLLECTION: &'static str = "order_sagas";

    fn id(&self) -> SagaId {
        self.id
    }
}

/// Saga type with no registered collection, for configuration-error tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct UnmappedSaga {
    id: SagaId,
}

impl Saga for UnmappedSaga {
    const COLLECTION: &'static str = "unmapped_sagas";

    fn id(&self) -> SagaId {
        self.id
    }
}

/// Helper: store over a fresh in-memory engine with the order collection
/// configured. The Arc lets tests keep their own engine handle for
/// inspecting operation counts.
fn test_store() -> (SagaStore<Arc<InMemoryEngine>>, Arc<InMemoryEngine>) {
    let engine = Arc::new(InMemoryEngine::new().with_collection(OrderSaga::COLLECTION));
    (SagaStore::new(Arc::clone(&engine)), engine)
}

fn open_order(total: i64) -> OrderSaga {
    OrderSaga {
        id: SagaId::new(),
        status: "Open".to_string(),
        total,
    }
}

#[tokio::test]
async fn save_then_get_roundtrips() {
    let (mut store, _) = test_store();
    let saga = open_order(100);

    store.save(&saga).await.unwrap();
    let loaded: OrderSaga = store.get(saga.id).await.unwrap().expect("saved saga found");

    assert_eq!(loaded, saga);
}

#[tokio::test]
async fn get_unknown_id_returns_none() {
    let (mut store, _) = test_store();
    let loaded: Option<OrderSaga> = store.get(SagaId::new()).await.unwrap();
    assert!(loaded.is_none(), "absence is not an error");
}

#[tokio::test]
async fn get_nil_id_is_an_argument_error() {
    let (mut store, _) = test_store();
    let err = store.get::<OrderSaga>(SagaId::nil()).await.unwrap_err();
    assert!(matches!(err, Error::Argument(_)), "got {err:?}");
}

#[tokio::test]
async fn save_nil_id_is_an_argument_error() {
    let (mut store, _) = test_store();
    let saga = OrderSaga {
        id: SagaId::nil(),
        status: "Open".to_string(),
        total: 0,
    };
    let err = store.save(&saga).await.unwrap_err();
    assert!(matches!(err, Error::Argument(_)), "got {err:?}");
}

#[tokio::test]
async fn duplicate_save_is_rejected() {
    let (mut store, _) = test_store();
    let saga = open_order(1);
    store.save(&saga).await.unwrap();
    assert!(store.save(&saga).await.is_err(), "id uniqueness is enforced");
}

#[tokio::test]
async fn every_operation_requires_a_configured_collection() {
    let (mut store, _) = test_store();
    let mut saga = UnmappedSaga { id: SagaId::new() };

    let err = store.save(&saga).await.unwrap_err();
    assert!(matches!(err, Error::MissingCollection(_)), "save: {err:?}");

    let err = store.get::<UnmappedSaga>(saga.id).await.unwrap_err();
    assert!(matches!(err, Error::MissingCollection(_)), "get: {err:?}");

    let err = store
        .get_by::<UnmappedSaga>("id", &json!(saga.id))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MissingCollection(_)), "get_by: {err:?}");

    let err = store.update(&mut saga).await.unwrap_err();
    assert!(matches!(err, Error::MissingCollection(_)), "update: {err:?}");

    let err = store.complete(&saga).await.unwrap_err();
    assert!(
        matches!(err, Error::MissingCollection(_)),
        "complete: {err:?}"
    );
}

#[tokio::test]
async fn get_by_matches_any_declared_field() {
    let (mut store, _) = test_store();
    let saga = open_order(250);
    store.save(&saga).await.unwrap();

    let by_status: OrderSaga = store
        .get_by("status", &json!("Open"))
        .await
        .unwrap()
        .expect("match on status");
    assert_eq!(by_status.id, saga.id);

    let by_total: OrderSaga = store
        .get_by("total", &json!(250))
        .await
        .unwrap()
        .expect("match on total");
    assert_eq!(by_total.id, saga.id);

    let no_match: Option<OrderSaga> = store.get_by("total", &json!(999)).await.unwrap();
    assert!(no_match.is_none());
}

#[tokio::test]
async fn get_by_empty_field_name_is_an_argument_error() {
    let (mut store, _) = test_store();
    let err = store
        .get_by::<OrderSaga>("", &json!("Open"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Argument(_)), "got {err:?}");
}

#[tokio::test]
async fn update_of_detached_record_never_reaches_the_engine() {
    let (mut store, engine) = test_store();
    // Constructed directly, never loaded through the store.
    let mut saga = open_order(10);

    let err = store.update(&mut saga).await.unwrap_err();
    assert!(matches!(err, Error::DetachedUpdate(_)), "got {err:?}");
    assert_eq!(engine.commit_count(), 0, "no commit for detached update");
}

#[tokio::test]
async fn update_without_pending_changes_skips_the_commit() {
    let (mut store, engine) = test_store();
    let mut saga = open_order(10);
    store.save(&saga).await.unwrap();
    assert_eq!(engine.commit_count(), 1); // the insert

    store.update(&mut saga).await.unwrap();
    assert_eq!(engine.commit_count(), 1, "unmodified update must not commit");
}

#[tokio::test]
async fn update_persists_pending_changes() {
    let (mut store, engine) = test_store();
    let mut saga = open_order(10);
    store.save(&saga).await.unwrap();

    saga.status = "Closed".to_string();
    store.update(&mut saga).await.unwrap();

    // A second session sees the committed change.
    let mut other = SagaStore::new(Arc::clone(&engine));
    let loaded: OrderSaga = other.get(saga.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, "Closed");
    assert_eq!(loaded.total, 10);
}

#[tokio::test]
async fn complete_reloads_before_marking_deleted() {
    let (mut store, engine) = test_store();
    let saga = open_order(10);
    store.save(&saga).await.unwrap();

    store.complete(&saga).await.unwrap();

    let ops = engine.ops();
    let reload_at = ops
        .iter()
        .position(|op| op.starts_with("reload"))
        .expect("complete reloads persisted state");
    let delete_at = ops
        .iter()
        .position(|op| op.starts_with("mark_deleted"))
        .expect("complete marks deleted");
    assert!(reload_at < delete_at, "reload must precede delete-mark: {ops:?}");

    let gone: Option<OrderSaga> = store.get(saga.id).await.unwrap();
    assert!(gone.is_none(), "completed saga is no longer loadable");
}

#[tokio::test]
async fn complete_of_detached_record_never_reaches_the_engine() {
    let (mut store, engine) = test_store();
    let saga = open_order(10);

    let before = engine.ops().len();
    let err = store.complete(&saga).await.unwrap_err();
    assert!(matches!(err, Error::DetachedComplete(_)), "got {err:?}");
    assert_eq!(engine.ops().len(), before, "no reload, no delete, no commit");
}

#[tokio::test]
async fn record_loaded_by_one_store_is_detached_in_another() {
    let engine = Arc::new(InMemoryEngine::new().with_collection(OrderSaga::COLLECTION));
    let mut store_a = SagaStore::new(Arc::clone(&engine));
    let mut store_b = SagaStore::new(Arc::clone(&engine));

    let saga = open_order(10);
    store_a.save(&saga).await.unwrap();

    let mut loaded: OrderSaga = store_a.get(saga.id).await.unwrap().unwrap();
    assert!(store_a.is_attached(&loaded));
    assert!(!store_b.is_attached(&loaded));

    loaded.total = 11;
    let err = store_b.update(&mut loaded).await.unwrap_err();
    assert!(matches!(err, Error::DetachedUpdate(_)), "got {err:?}");
}

/// The concrete end-to-end scenario: handler A closes the order while a
/// concurrent writer revises the total; both changes must survive.
#[tokio::test]
async fn concurrent_writers_on_disjoint_fields_both_win() {
    let engine = Arc::new(InMemoryEngine::new().with_collection(OrderSaga::COLLECTION));
    let mut store = SagaStore::new(Arc::clone(&engine));

    let id = SagaId(Uuid::from_u128(1));
    let mut saga = OrderSaga {
        id,
        status: "Open".to_string(),
        total: 100,
    };
    store.save(&saga).await.unwrap();

    // Another handler commits total = 150 behind this store's back.
    let mut theirs = sagastore::FieldMap::new();
    theirs.insert("id".into(), json!(id));
    theirs.insert("status".into(), json!("Open"));
    theirs.insert("total".into(), json!(150));
    engine.commit_raw(OrderSaga::COLLECTION, id, theirs);

    // This handler only touched status; the update loses the race and is
    // reconciled field by field.
    saga.status = "Closed".to_string();
    store.update(&mut saga).await.unwrap();

    assert_eq!(saga.status, "Closed", "this handler's change survives");
    assert_eq!(saga.total, 150, "concurrent writer's change survives");

    let mut other = SagaStore::new(Arc::clone(&engine));
    let persisted: OrderSaga = other.get(id).await.unwrap().unwrap();
    assert_eq!(persisted.status, "Closed");
    assert_eq!(persisted.total, 150);
}
