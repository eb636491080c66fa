//! The named operations a grid worker answers.

use crate::backend::GridBackend;
use crate::manager::{GridContext, GridManager};
use crate::wire::{self, EdgeRenderInfo, EdgeRenderRequest, TopologyInfo};
use grid_actor::{ActorError, Payload, Registry};
use gridcore::UNDELETED_FLAG;
use parking_lot::Mutex;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CheckIfReady,
    SetGridManager,
    UpdateGridContext,
    GetGridInfo,
    SubdivideGrids,
    MergeGrids,
    RemoveGrids,
    RecoverGrids,
    GetGridInfoByFeature,
    SaveGrids,
    GetMultiGridRenderVertices,
    ParseTopology,
    CalcEdgeRenderInfos,
}

impl Operation {
    pub const ALL: [Operation; 13] = [
        Operation::CheckIfReady,
        Operation::SetGridManager,
        Operation::UpdateGridContext,
        Operation::GetGridInfo,
        Operation::SubdivideGrids,
        Operation::MergeGrids,
        Operation::RemoveGrids,
        Operation::RecoverGrids,
        Operation::GetGridInfoByFeature,
        Operation::SaveGrids,
        Operation::GetMultiGridRenderVertices,
        Operation::ParseTopology,
        Operation::CalcEdgeRenderInfos,
    ];

    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::CheckIfReady => grid_actor::READY_CHECK,
            Operation::SetGridManager => "setGridManager",
            Operation::UpdateGridContext => "updateGridContext",
            Operation::GetGridInfo => "getGridInfo",
            Operation::SubdivideGrids => "subdivideGrids",
            Operation::MergeGrids => "mergeGrids",
            Operation::RemoveGrids => "removeGrids",
            Operation::RecoverGrids => "recoverGrids",
            Operation::GetGridInfoByFeature => "getGridInfoByFeature",
            Operation::SaveGrids => "saveGrids",
            Operation::GetMultiGridRenderVertices => "getMultiGridRenderVertices",
            Operation::ParseTopology => "parseTopology",
            Operation::CalcEdgeRenderInfos => "calcEdgeRenderInfos",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = ActorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| ActorError::HandlerNotFound(s.to_string()))
    }
}

/// State shared by the handlers of one worker context.
struct WorkerState {
    backend: Arc<dyn GridBackend>,
    manager: Mutex<Option<Arc<GridManager>>>,
}

impl WorkerState {
    fn manager(&self) -> Result<Arc<GridManager>, ActorError> {
        self.manager
            .lock()
            .clone()
            .ok_or_else(|| ActorError::Handler("grid manager not initialised, send setGridManager first".into()))
    }

    fn install(&self, payload: &Payload) -> Result<(), ActorError> {
        let context: GridContext = payload.decode()?;
        let manager = GridManager::new(context).map_err(|e| ActorError::Handler(e.to_string()))?;
        *self.manager.lock() = Some(Arc::new(manager));
        Ok(())
    }
}

fn handler_err(e: impl fmt::Display) -> ActorError {
    ActorError::Handler(e.to_string())
}

async fn run(op: Operation, state: Arc<WorkerState>, payload: Payload) -> Result<Payload, ActorError> {
    match op {
        Operation::CheckIfReady => Ok(Payload::empty()),

        Operation::SetGridManager | Operation::UpdateGridContext => {
            state.install(&payload)?;
            tracing::info!(op = %op, "grid context installed");
            Ok(Payload::empty())
        }

        Operation::GetGridInfo => {
            let manager = state.manager()?;
            let active = state.backend.activate_info().await?;
            let deleted = state.backend.deleted_info().await?;
            tracing::debug!(active = active.len(), deleted = deleted.len(), "grid info loaded");
            let info = manager.combined_render_info(active, deleted).map_err(handler_err)?;
            wire::render_info_payload(&info)
        }

        Operation::SubdivideGrids | Operation::MergeGrids => {
            let manager = state.manager()?;
            let cells = wire::population_from(&payload)?;
            let result = if op == Operation::SubdivideGrids {
                state.backend.subdivide(&cells).await?
            } else {
                state.backend.merge(&cells).await?
            };
            tracing::debug!(op = %op, input = cells.len(), output = result.len(), "grid operation applied");
            let info = manager.render_info(result, UNDELETED_FLAG).map_err(handler_err)?;
            wire::render_info_payload(&info)
        }

        Operation::RemoveGrids => {
            let cells = wire::population_from(&payload)?;
            state.backend.delete(&cells).await?;
            Ok(Payload::empty())
        }

        Operation::RecoverGrids => {
            let cells = wire::population_from(&payload)?;
            state.backend.recover(&cells).await?;
            Ok(Payload::empty())
        }

        Operation::GetGridInfoByFeature => {
            let feature_dir: String = payload.decode()?;
            let cells = state.backend.pick(&feature_dir).await?;
            wire::population_payload(&cells)
        }

        Operation::SaveGrids => {
            let info = state.backend.save().await?;
            Payload::from_serialize(&info)
        }

        Operation::GetMultiGridRenderVertices => {
            let manager = state.manager()?;
            let cells = wire::population_from(&payload)?;
            let info = manager.render_info(cells, UNDELETED_FLAG).map_err(handler_err)?;
            wire::render_info_payload(&info)
        }

        Operation::ParseTopology => {
            let manager = state.manager()?;
            let cells = wire::population_from(&payload)?;
            let topology = manager.topology(&cells).map_err(handler_err)?;
            tracing::debug!(cells = cells.len(), edges = topology.edges.len(), "topology parsed");
            Payload::from_serialize(&TopologyInfo::from(&topology))
        }

        Operation::CalcEdgeRenderInfos => {
            let manager = state.manager()?;
            let req: EdgeRenderRequest = payload.decode()?;
            let (vertices, vertices_low) = manager.edge_vertices(&req.keys).map_err(handler_err)?;
            wire::edge_render_payload(&EdgeRenderInfo {
                index: req.index,
                vertices,
                vertices_low,
            })
        }
    }
}

/// Builds the dispatch table of a grid worker. Call it inside the worker
/// context so the state lives there.
pub fn build_registry(backend: Arc<dyn GridBackend>) -> Registry {
    let state = Arc::new(WorkerState {
        backend,
        manager: Mutex::new(None),
    });

    Operation::ALL
        .into_iter()
        .fold(Registry::builder(), |builder, op| {
            let state = state.clone();
            builder.route(op.as_str(), move |payload| run(op, state.clone(), payload))
        })
        .build()
}
