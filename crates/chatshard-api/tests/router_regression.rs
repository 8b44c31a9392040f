//! Router regression tests.
//!
//! Drive the full router over an in-memory store and a null container
//! engine: status codes per endpoint, shadow gating, and the migration
//! pipeline's visible effects.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use chatshard_api::{build_router, ApiState};
use chatshard_control::{Reconciler, ReconcilerConfig, Scheduler};
use chatshard_launcher::{run_dispatcher, Launcher, NullEngine};
use chatshard_store::{BackoffKind, ControlStore, DbInstance, MemStore, RetryPolicy};

struct Harness {
    store: MemStore,
    engine: Arc<NullEngine>,
    state: ApiState<MemStore>,
}

fn harness(engine: NullEngine) -> Harness {
    let store = MemStore::new();
    let engine = Arc::new(engine);
    let retry = RetryPolicy::new(3, Duration::from_millis(1), BackoffKind::Linear);

    let (launcher, rx) = Launcher::channel();
    tokio::spawn(run_dispatcher(Arc::clone(&engine), rx));

    let scheduler = Scheduler::new(store.clone(), retry.clone(), launcher)
        .with_spawn_deadline(Duration::from_millis(500));
    let reconciler = Reconciler::new(store.clone(), retry, ReconcilerConfig::default());

    let state = ApiState {
        scheduler: Arc::new(scheduler),
        reconciler: Arc::new(reconciler),
        shadow: Arc::new(AtomicBool::new(false)),
    };
    Harness {
        store,
        engine,
        state,
    }
}

fn instance(url: &str) -> DbInstance {
    DbInstance {
        url: url.to_string(),
        max_space: 100,
        occupied_space: Some(25),
        collection_count: Some(2),
        last_queried: None,
    }
}

fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn health_is_ok_with_reachable_store() {
    let h = harness(NullEngine::new());
    let router = build_router(h.state);

    let resp = router.oneshot(get("/health")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn startup_mapping_creates_rows() {
    let h = harness(NullEngine::new());
    h.store.seed_db_instance(instance("postgres://u1"));
    h.store.seed_db_instance(instance("postgres://u2"));
    let router = build_router(h.state);

    let resp = router.oneshot(post("/mapping/startup")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(h.store.mappings().len(), 2);
}

#[tokio::test]
async fn startup_mapping_with_no_databases_is_a_500() {
    let h = harness(NullEngine::new());
    let router = build_router(h.state);

    let resp = router.oneshot(post("/mapping/startup")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn migrate_happy_path_returns_204() {
    let h = harness(NullEngine::new());
    h.store.seed_db_instance(instance("postgres://u1"));
    h.store.seed_db_instance(instance("postgres://u2"));
    h.store.create_mapping("postgres://u1", "a").await.unwrap();
    let router = build_router(h.state);

    let resp = router
        .oneshot(post("/migrate?from=a&to=m&goal_url=postgres://u2"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    assert_eq!(h.store.migration_workers().len(), 1);
    assert_eq!(h.store.migrations().len(), 1);
    assert_eq!(h.store.worker_jobs().len(), 1);
    assert_eq!(h.engine.calls(), 1);
}

#[tokio::test]
async fn migrate_with_missing_parameter_is_a_400() {
    let h = harness(NullEngine::new());
    let router = build_router(h.state);

    for uri in [
        "/migrate",
        "/migrate?from=a",
        "/migrate?from=a&to=m",
        "/migrate?to=m&goal_url=postgres://u2",
        "/migrate?from=&to=m&goal_url=postgres://u2",
    ] {
        let resp = router.clone().oneshot(post(uri)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "uri: {uri}");
    }
}

#[tokio::test]
async fn migrate_without_a_mapping_is_a_500() {
    let h = harness(NullEngine::new());
    h.store.seed_db_instance(instance("postgres://u2"));
    let router = build_router(h.state);

    let resp = router
        .oneshot(post("/migrate?from=a&to=m&goal_url=postgres://u2"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn migrate_spawn_failure_is_a_500_and_leaves_nothing() {
    let h = harness(NullEngine::failing());
    h.store.seed_db_instance(instance("postgres://u1"));
    h.store.seed_db_instance(instance("postgres://u2"));
    h.store.create_mapping("postgres://u1", "a").await.unwrap();
    let router = build_router(h.state);

    let resp = router
        .oneshot(post("/migrate?from=a&to=m&goal_url=postgres://u2"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(h.store.migration_workers().is_empty());
    assert!(h.store.migrations().is_empty());
}

#[tokio::test]
async fn state_returns_the_join() {
    let h = harness(NullEngine::new());
    h.store.seed_db_instance(instance("postgres://u1"));
    h.store.create_mapping("postgres://u1", "a").await.unwrap();
    let router = build_router(h.state);

    let resp = router.oneshot(get("/state")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn shadow_rejects_mutations_but_answers_health() {
    let h = harness(NullEngine::new());
    h.state.shadow.store(true, Ordering::Relaxed);
    let router = build_router(h.state.clone());

    for req in [
        post("/mapping/startup"),
        post("/migrate?from=a&to=m&goal_url=postgres://u2"),
        get("/state"),
    ] {
        let resp = router.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    let resp = router.oneshot(get("/health")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn promotion_flips_the_gate() {
    let h = harness(NullEngine::new());
    h.store.seed_db_instance(instance("postgres://u1"));
    h.store.seed_db_instance(instance("postgres://u2"));
    h.store.create_mapping("postgres://u1", "a").await.unwrap();
    h.state.shadow.store(true, Ordering::Relaxed);
    let router = build_router(h.state.clone());

    let resp = router
        .clone()
        .oneshot(post("/migrate?from=a&to=m&goal_url=postgres://u2"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    // The shell does exactly this on takeover.
    h.state.shadow.store(false, Ordering::Relaxed);

    let resp = router
        .oneshot(post("/migrate?from=a&to=m&goal_url=postgres://u2"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
}
