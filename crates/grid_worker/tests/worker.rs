use grid_actor::{ActorError, Payload};
use grid_worker::wire::{self, TopologyInfo};
use grid_worker::{spawn_grid_worker, GridContext, GridSaveInfo, MemoryGridBackend, Operation};
use gridcore::{BoundingBox2D, EdgeCode, GridLayout, MultiGridInfo, DELETED_FLAG, UNDELETED_FLAG};
use serde_json::json;
use std::sync::Arc;

const RULES: [[u32; 2]; 3] = [[2, 1], [2, 2], [1, 1]];

fn context() -> GridContext {
    GridContext {
        src_cs: "EPSG:4326".into(),
        target_cs: "EPSG:4326".into(),
        bbox: BoundingBox2D::new(114.0, 22.0, 115.0, 23.0),
        rules: RULES.to_vec(),
    }
}

fn cells(levels: &[u8], ids: &[u32]) -> MultiGridInfo {
    MultiGridInfo::new(levels.to_vec(), ids.to_vec()).unwrap()
}

fn memory_backend() -> Arc<MemoryGridBackend> {
    Arc::new(MemoryGridBackend::new(GridLayout::new(&RULES).unwrap()))
}

#[tokio::test]
async fn operations_require_a_grid_manager() {
    let worker = spawn_grid_worker("grid-uninit", memory_backend()).unwrap();
    worker.ready().await.unwrap();

    let err = worker
        .actor()
        .request(Operation::GetGridInfo.as_str(), Payload::empty())
        .await
        .unwrap_err();
    assert!(matches!(err, ActorError::Handler(_)));
}

#[tokio::test]
async fn subdivide_delete_and_reload() {
    let backend = memory_backend();
    let worker = spawn_grid_worker("grid-e2e", backend.clone()).unwrap();
    let actor = worker.actor();

    actor
        .request(Operation::SetGridManager.as_str(), wire::context_payload(&context()).unwrap())
        .await
        .unwrap();

    let root = wire::population_payload(&cells(&[0], &[0])).unwrap();
    let reply = actor.request(Operation::SubdivideGrids.as_str(), root).await.unwrap();
    let info = wire::render_info_from(&reply).unwrap();
    assert_eq!(info.levels, vec![1, 1]);
    assert_eq!(info.global_ids, vec![0, 1]);
    assert_eq!(info.vertices.len(), 16);
    assert_eq!(info.deleted, vec![UNDELETED_FLAG; 2]);

    let left = wire::population_payload(&cells(&[1], &[0])).unwrap();
    actor.request(Operation::RemoveGrids.as_str(), left).await.unwrap();

    let reply = actor.request(Operation::GetGridInfo.as_str(), Payload::empty()).await.unwrap();
    let info = wire::render_info_from(&reply).unwrap();
    assert_eq!(info.global_ids, vec![1, 0]);
    assert_eq!(info.deleted, vec![UNDELETED_FLAG, DELETED_FLAG]);

    let saved: GridSaveInfo = actor
        .request(Operation::SaveGrids.as_str(), Payload::empty())
        .await
        .unwrap()
        .decode()
        .unwrap();
    assert!(saved.success);
    assert_eq!(backend.active_count(), 1);
}

#[tokio::test]
async fn topology_and_edge_vertices() {
    let worker = spawn_grid_worker("grid-topo", memory_backend()).unwrap();
    let actor = worker.actor();
    actor
        .request(Operation::SetGridManager.as_str(), wire::context_payload(&context()).unwrap())
        .await
        .unwrap();

    let pop = wire::population_payload(&cells(&[1, 1], &[0, 1])).unwrap();
    let topo: TopologyInfo = actor
        .request(Operation::ParseTopology.as_str(), pop)
        .await
        .unwrap()
        .decode()
        .unwrap();
    assert_eq!(topo.edge_keys.len(), 7);
    assert_eq!(topo.neighbours[0][EdgeCode::East.index()], vec![1]);
    assert_eq!(topo.neighbours[1][EdgeCode::West.index()], vec![0]);

    let req = Payload::new(json!({ "index": 3, "keys": topo.edge_keys }));
    let reply = actor.request(Operation::CalcEdgeRenderInfos.as_str(), req).await.unwrap();
    let edges = wire::edge_render_from(&reply).unwrap();
    assert_eq!(edges.index, 3);
    assert_eq!(edges.vertices.len(), 7 * 4);
    assert_eq!(edges.vertices_low.len(), 7 * 4);
}

#[tokio::test]
async fn pick_by_feature_returns_population() {
    let backend = memory_backend();
    backend.insert_feature("features/river.geojson", cells(&[2, 2], &[6, 7]));
    let worker = spawn_grid_worker("grid-pick", backend).unwrap();

    let reply = worker
        .actor()
        .request(Operation::GetGridInfoByFeature.as_str(), Payload::new(json!("features/river.geojson")))
        .await
        .unwrap();
    assert_eq!(wire::population_from(&reply).unwrap(), cells(&[2, 2], &[6, 7]));

    let missing = worker
        .actor()
        .request(Operation::GetGridInfoByFeature.as_str(), Payload::new(json!("nope")))
        .await;
    assert!(matches!(missing, Err(ActorError::Handler(_))));
}
