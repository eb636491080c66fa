use axum::extract::Query;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post, MethodRouter};
use axum::{Json, Router};
use grid_worker::{BackendError, GridBackend, HttpGridBackend};
use gridcore::MultiGridInfo;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[derive(Deserialize)]
struct Pick {
    feature_dir: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct Body {
    levels: Vec<u8>,
    global_ids: Vec<u32>,
}

fn encode(levels: Vec<u8>, ids: Vec<u32>) -> Vec<u8> {
    MultiGridInfo::new(levels, ids).unwrap().to_bytes().unwrap()
}

async fn listen(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

/// Request seen by the recording store: route, content type, JSON body.
type Seen = Arc<Mutex<Vec<(&'static str, String, Body)>>>;

fn recording(seen: &Seen, route: &'static str, reply: fn(&Body) -> Vec<u8>) -> MethodRouter {
    let seen = seen.clone();
    post(move |headers: HeaderMap, Json(b): Json<Body>| {
        let seen = seen.clone();
        async move {
            let content_type = headers
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            let out = reply(&b);
            seen.lock().push((route, content_type, b));
            out
        }
    })
}

/// Store that records every population POST and answers like the topo API.
async fn serve_recording() -> (String, Seen) {
    let seen = Seen::default();
    let app = Router::new()
        .route(
            "/api/topo/subdivide",
            recording(&seen, "subdivide", |b| {
                let n = b.levels.len() * 4;
                encode(vec![b.levels[0] + 1; n], (0..n as u32).collect())
            }),
        )
        .route(
            "/api/topo/merge",
            recording(&seen, "merge", |b| encode(vec![b.levels[0] - 1], vec![b.global_ids[0] / 4])),
        )
        .route("/api/topo/delete", recording(&seen, "delete", |_| Vec::new()))
        .route("/api/topo/recover", recording(&seen, "recover", |_| Vec::new()));
    (listen(app).await, seen)
}

async fn serve() -> String {
    let app = Router::new()
        .route("/api/topo/activate-info", get(|| async { encode(vec![0], vec![0]) }))
        .route("/api/topo/deleted-info", get(|| async { Vec::<u8>::new() }))
        .route(
            "/api/topo/subdivide",
            post(|Json(b): Json<Body>| async move {
                let levels = b.levels.iter().map(|l| l + 1).collect();
                encode(levels, b.global_ids)
            }),
        )
        .route("/api/topo/delete", post(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
        .route(
            "/api/topo/pick",
            get(|Query(q): Query<Pick>| async move { encode(vec![q.feature_dir.len() as u8], vec![7]) }),
        )
        .route(
            "/api/topo/save",
            get(|| async { Json(json!({ "success": true, "message": "ok" })) }),
        )
        .route(
            "/api/grid/echo",
            post(|Json(b): Json<Body>| async move { encode(b.levels, b.global_ids) }),
        );
    listen(app).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn speaks_the_topo_endpoints() {
    let base = serve().await;
    let backend = HttpGridBackend::new(&base, Duration::from_secs(5)).unwrap();

    let active = backend.activate_info().await.unwrap();
    assert_eq!(active, MultiGridInfo::new(vec![0], vec![0]).unwrap());

    // Empty body decodes as an empty population.
    assert!(backend.deleted_info().await.unwrap().is_empty());

    let cells = MultiGridInfo::new(vec![1, 2, 2], vec![4, 5, 6]).unwrap();
    let out = backend.subdivide(&cells).await.unwrap();
    assert_eq!(out.levels, vec![2, 3, 3]);
    assert_eq!(out.global_ids, vec![4, 5, 6]);

    let picked = backend.pick("a/b c").await.unwrap();
    assert_eq!(picked.levels, vec![5]);

    let saved = backend.save().await.unwrap();
    assert!(saved.success);
    assert_eq!(saved.message, "ok");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failures_surface_as_backend_errors() {
    let base = serve().await;
    let backend = HttpGridBackend::new(&base, Duration::from_secs(5)).unwrap();
    let cells = MultiGridInfo::new(vec![1], vec![0]).unwrap();

    match backend.delete(&cells).await {
        Err(BackendError::Status { status, .. }) => assert_eq!(status, 500),
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(backend.merge(&cells).await, Err(BackendError::Status { status: 404, .. })));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn post_url_sends_json_population() {
    let base = serve().await;
    let backend = HttpGridBackend::new(&base, Duration::from_secs(5)).unwrap();
    let body = json!({ "levels": [3, 4], "global_ids": [10, 11] });
    let out = backend
        .from_post_url(&format!("{base}/api/grid/echo"), &body)
        .await
        .unwrap();
    assert_eq!(out, MultiGridInfo::new(vec![3, 4], vec![10, 11]).unwrap());
}

fn body(levels: Vec<u8>, global_ids: Vec<u32>) -> Body {
    Body { levels, global_ids }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn topo_posts_carry_json_populations() {
    let (base, seen) = serve_recording().await;
    let backend = HttpGridBackend::new(&base, Duration::from_secs(5)).unwrap();

    let cells = MultiGridInfo::new(vec![1], vec![3]).unwrap();
    let children = backend.subdivide(&cells).await.unwrap();
    assert_eq!(children.levels, vec![2; 4]);
    assert_eq!(children.global_ids, vec![0, 1, 2, 3]);

    let cells = MultiGridInfo::new(vec![2, 2], vec![8, 9]).unwrap();
    let parents = backend.merge(&cells).await.unwrap();
    assert_eq!(parents, MultiGridInfo::new(vec![1], vec![2]).unwrap());

    let cells = MultiGridInfo::new(vec![1, 3], vec![0, 17]).unwrap();
    backend.delete(&cells).await.unwrap();
    backend.recover(&cells).await.unwrap();

    let seen = seen.lock().clone();
    let routes: Vec<_> = seen.iter().map(|(route, _, _)| *route).collect();
    assert_eq!(routes, vec!["subdivide", "merge", "delete", "recover"]);
    for (route, content_type, _) in &seen {
        assert_eq!(content_type, "application/json", "{route}");
    }
    assert_eq!(seen[0].2, body(vec![1], vec![3]));
    assert_eq!(seen[1].2, body(vec![2, 2], vec![8, 9]));
    assert_eq!(seen[2].2, body(vec![1, 3], vec![0, 17]));
    assert_eq!(seen[3].2, body(vec![1, 3], vec![0, 17]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn delete_and_recover_ignore_reply_body() {
    let app = Router::new()
        .route("/api/topo/delete", post(|Json(_): Json<Body>| async { "ok" }))
        .route(
            "/api/topo/recover",
            post(|Json(_): Json<Body>| async { Json(json!({ "success": true })) }),
        );
    let base = listen(app).await;
    let backend = HttpGridBackend::new(&base, Duration::from_secs(5)).unwrap();

    let cells = MultiGridInfo::new(vec![1], vec![0]).unwrap();
    backend.delete(&cells).await.unwrap();
    backend.recover(&cells).await.unwrap();
}
