//! Coordinator-side record of the grid population.
//!
//! Every cell the worker reports gets a dense storage id. Removing cells
//! compacts the id space by moving the last cells into the freed slots, so
//! storage ids always cover `0..grid_num()`. The worker and its store stay
//! authoritative; the record is rebuilt from them by [`GridRecord::init`].

use crate::metrics::Metrics;
use futures::future::try_join_all;
use grid_actor::{ActorError, Dispatcher, Payload};
use grid_worker::wire::{self, EdgeRenderRequest, TopologyInfo};
use grid_worker::{GridContext, GridSaveInfo, Operation};
use gridcore::{
    converter_for, GridError, GridLayout, MultiGridInfo, MultiGridRenderInfo, RenderVertexBuilder, DELETED_FLAG,
    UNDELETED_FLAG,
};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error(transparent)]
    Actor(#[from] ActorError),

    #[error(transparent)]
    Grid(#[from] GridError),

    #[error("storage id {0} is not in the record")]
    UnknownStorageId(u32),

    #[error("record would hold {requested} cells, capacity is {capacity}")]
    Full { requested: usize, capacity: usize },
}

/// What the record knows about one storage slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridInfo {
    pub storage_id: u32,
    pub level: u8,
    pub global_id: u32,
    pub local_id: u32,
    pub deleted: bool,
}

/// Cells moved into the slots freed by a local delete.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplacedGrids {
    pub storage_ids: Vec<u32>,
    pub levels: Vec<u8>,
    pub global_ids: Vec<u32>,
    pub deleted: Vec<u8>,
    pub vertices: Vec<f32>,
    pub vertices_low: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Subdivided {
    /// Storage id of the first new child; the rest follow contiguously.
    pub from_storage_id: u32,
    pub children: MultiGridRenderInfo,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Merged {
    /// Slots of recorded children of the returned parents.
    pub child_storage_ids: Vec<u32>,
    pub parents: MultiGridRenderInfo,
}

pub struct GridRecord {
    dispatcher: Dispatcher,
    context: GridContext,
    vertices: RenderVertexBuilder,
    metrics: Arc<Metrics>,
    capacity: usize,

    levels: Vec<u8>,
    global_ids: Vec<u32>,
    deleted: Vec<u8>,
    storage_ids: HashMap<(u8, u32), u32>,
}

impl GridRecord {
    /// Installs `context` in the worker and loads the current population.
    ///
    /// Returns the record together with the render info of every loaded
    /// cell, in storage-id order starting at 0.
    pub async fn init(
        dispatcher: Dispatcher,
        context: GridContext,
        metrics: Arc<Metrics>,
        capacity: usize,
    ) -> Result<(Self, MultiGridRenderInfo), RecordError> {
        let layout = GridLayout::new(&context.rules)?;
        let converter = converter_for(&context.src_cs, &context.target_cs)?;
        let vertices = RenderVertexBuilder::new(layout, context.bbox, converter);

        let mut record = Self {
            dispatcher,
            context,
            vertices,
            metrics,
            capacity,
            levels: Vec::new(),
            global_ids: Vec::new(),
            deleted: Vec::new(),
            storage_ids: HashMap::new(),
        };

        record
            .call(Operation::SetGridManager, wire::context_payload(&record.context)?)
            .await?;
        let reply = record.call(Operation::GetGridInfo, Payload::empty()).await?;
        let info = wire::render_info_from(&reply)?;
        record.append(&info.levels, &info.global_ids, &info.deleted)?;

        tracing::info!(cells = record.grid_num(), "grid record loaded");
        Ok((record, info))
    }

    pub fn context(&self) -> &GridContext {
        &self.context
    }

    pub fn layout(&self) -> &GridLayout {
        self.vertices.layout()
    }

    pub fn max_level(&self) -> u8 {
        self.layout().max_level()
    }

    /// Number of recorded cells; also the next free storage id.
    pub fn grid_num(&self) -> usize {
        self.levels.len()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// `(level, global_id)` held in `storage_id`.
    pub fn grid_info(&self, storage_id: u32) -> Option<(u8, u32)> {
        let i = storage_id as usize;
        Some((*self.levels.get(i)?, self.global_ids[i]))
    }

    pub fn storage_id_of(&self, level: u8, global_id: u32) -> Option<u32> {
        self.storage_ids.get(&(level, global_id)).copied()
    }

    pub fn is_deleted(&self, storage_id: u32) -> bool {
        self.deleted.get(storage_id as usize) == Some(&DELETED_FLAG)
    }

    pub fn children(&self, level: u8, global_id: u32) -> Option<Vec<u32>> {
        self.layout().children(level, global_id)
    }

    pub fn parent_global_id(&self, level: u8, global_id: u32) -> Result<u32, GridError> {
        self.layout().parent_global_id(level, global_id)
    }

    pub fn local_id(&self, level: u8, global_id: u32) -> Result<u32, GridError> {
        self.layout().local_id(level, global_id)
    }

    pub fn check_grid(&self, storage_id: u32) -> Result<GridInfo, RecordError> {
        let (level, global_id) = self
            .grid_info(storage_id)
            .ok_or(RecordError::UnknownStorageId(storage_id))?;
        Ok(GridInfo {
            storage_id,
            level,
            global_id,
            local_id: self.local_id(level, global_id)?,
            deleted: self.is_deleted(storage_id),
        })
    }

    /// Appends cells at the end of the storage range and returns the storage
    /// id of the first one.
    pub fn add_grids(&mut self, cells: &MultiGridInfo, deleted: &[u8]) -> Result<u32, RecordError> {
        if deleted.len() != cells.len() {
            return Err(GridError::LengthMismatch {
                levels: cells.len(),
                global_ids: deleted.len(),
            }
            .into());
        }
        self.append(&cells.levels, &cells.global_ids, deleted)
    }

    fn append(&mut self, levels: &[u8], global_ids: &[u32], deleted: &[u8]) -> Result<u32, RecordError> {
        let from = self.grid_num();
        let requested = from + levels.len();
        if requested > self.capacity {
            return Err(RecordError::Full {
                requested,
                capacity: self.capacity,
            });
        }
        for (&level, &global_id) in levels.iter().zip(global_ids) {
            self.layout().level_info(level)?;
            if !self.layout().contains(level, global_id) {
                return Err(GridError::GlobalIdOutOfRange { level, global_id }.into());
            }
        }

        for (i, (&level, &global_id)) in levels.iter().zip(global_ids).enumerate() {
            self.storage_ids.insert((level, global_id), (from + i) as u32);
        }
        self.levels.extend_from_slice(levels);
        self.global_ids.extend_from_slice(global_ids);
        self.deleted.extend_from_slice(deleted);
        self.metrics.cells_in_record.set(self.grid_num() as i64);
        Ok(from as u32)
    }

    pub fn delete_grid_locally(&mut self, storage_id: u32) -> Result<ReplacedGrids, RecordError> {
        self.delete_grids_locally(&[storage_id])
    }

    /// Drops cells from the record without telling the worker.
    ///
    /// Freed slots below the new `grid_num()` are refilled from the end of
    /// the range, highest storage id first. The returned set describes every
    /// cell that changed slot so callers can patch their own per-slot buffers.
    pub fn delete_grids_locally(&mut self, storage_ids: &[u32]) -> Result<ReplacedGrids, RecordError> {
        let mut removed = storage_ids.to_vec();
        removed.sort_unstable();
        removed.dedup();
        if let Some(&unknown) = removed.iter().find(|&&id| id as usize >= self.grid_num()) {
            return Err(RecordError::UnknownStorageId(unknown));
        }

        let total = self.grid_num();
        let keep = total - removed.len();
        let holes = removed.iter().copied().take_while(|&id| (id as usize) < keep);
        let movers = (keep..total)
            .rev()
            .map(|id| id as u32)
            .filter(|id| removed.binary_search(id).is_err());
        let moves: Vec<(u32, u32)> = holes.zip(movers).collect();

        let mut out = ReplacedGrids::default();
        for &(hole, from) in &moves {
            let from = from as usize;
            let (hi, lo) = self.vertices.node_vertices(self.levels[from], self.global_ids[from])?;
            out.storage_ids.push(hole);
            out.levels.push(self.levels[from]);
            out.global_ids.push(self.global_ids[from]);
            out.deleted.push(self.deleted[from]);
            out.vertices.extend_from_slice(&hi);
            out.vertices_low.extend_from_slice(&lo);
        }

        for &id in &removed {
            let key = (self.levels[id as usize], self.global_ids[id as usize]);
            self.storage_ids.remove(&key);
        }
        for (i, &hole) in out.storage_ids.iter().enumerate() {
            let slot = hole as usize;
            self.levels[slot] = out.levels[i];
            self.global_ids[slot] = out.global_ids[i];
            self.deleted[slot] = out.deleted[i];
            self.storage_ids.insert((out.levels[i], out.global_ids[i]), hole);
        }
        self.levels.truncate(keep);
        self.global_ids.truncate(keep);
        self.deleted.truncate(keep);
        self.metrics.cells_in_record.set(keep as i64);

        tracing::debug!(removed = removed.len(), moved = moves.len(), cells = keep, "cells removed from record");
        Ok(out)
    }

    /// Flags cells as deleted and asks the worker to do the same. Deleted
    /// cells keep their slot so they can still be picked and recovered.
    pub async fn mark_as_deleted(&mut self, storage_ids: &[u32]) -> Result<(), RecordError> {
        self.flag_and_forward(storage_ids, DELETED_FLAG, Operation::RemoveGrids).await
    }

    pub async fn recover(&mut self, storage_ids: &[u32]) -> Result<(), RecordError> {
        self.flag_and_forward(storage_ids, UNDELETED_FLAG, Operation::RecoverGrids).await
    }

    /// Sets the deleted flag of `storage_ids` and forwards them to the
    /// worker. The previous flags come back if the worker call fails.
    async fn flag_and_forward(&mut self, storage_ids: &[u32], flag: u8, op: Operation) -> Result<(), RecordError> {
        let cells = self.population_of(storage_ids)?;
        let payload = wire::population_payload(&cells)?;
        let previous: Vec<u8> = storage_ids
            .iter()
            .map(|&id| std::mem::replace(&mut self.deleted[id as usize], flag))
            .collect();

        if let Err(e) = self.call(op, payload).await {
            for (&id, &was) in storage_ids.iter().zip(&previous).rev() {
                self.deleted[id as usize] = was;
            }
            tracing::warn!(op = %op, cells = storage_ids.len(), error = %e, "worker rejected flag change, restored");
            return Err(e);
        }
        Ok(())
    }

    /// Subdivides the given cells and records the children at the end of the
    /// storage range. The parents stay recorded until deleted locally.
    ///
    /// Takes cells rather than storage ids since slots may have been refilled
    /// by an earlier local delete.
    pub async fn subdivide(&mut self, cells: &MultiGridInfo) -> Result<Subdivided, RecordError> {
        let reply = self.call(Operation::SubdivideGrids, wire::population_payload(cells)?).await?;
        let children = wire::render_info_from(&reply)?;
        let from_storage_id = self.append(&children.levels, &children.global_ids, &children.deleted)?;
        Ok(Subdivided {
            from_storage_id,
            children,
        })
    }

    /// Merges the given cells into their parents. The record is left
    /// unchanged; callers drop `child_storage_ids` and add the parents.
    pub async fn merge(&self, storage_ids: &[u32]) -> Result<Merged, RecordError> {
        let cells = self.population_of(storage_ids)?;
        let reply = self.call(Operation::MergeGrids, wire::population_payload(&cells)?).await?;
        let parents = wire::render_info_from(&reply)?;

        let child_storage_ids = parents
            .levels
            .iter()
            .zip(&parents.global_ids)
            .flat_map(|(&level, &global_id)| {
                self.children(level, global_id)
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(move |child| self.storage_id_of(level + 1, child))
            })
            .collect();

        Ok(Merged {
            child_storage_ids,
            parents,
        })
    }

    /// Storage ids of the cells a feature covers; `None` for cells not in the
    /// record.
    pub async fn storage_ids_by_feature(&self, feature_dir: &str) -> Result<Vec<Option<u32>>, RecordError> {
        let reply = self
            .call(Operation::GetGridInfoByFeature, Payload::from_serialize(&feature_dir)?)
            .await?;
        let cells = wire::population_from(&reply)?;
        Ok(cells
            .iter()
            .map(|(level, global_id)| self.storage_id_of(level, global_id))
            .collect())
    }

    pub async fn save(&self) -> Result<GridSaveInfo, RecordError> {
        let reply = self.call(Operation::SaveGrids, Payload::empty()).await?;
        Ok(reply.decode()?)
    }

    /// Edges and adjacency of every recorded cell, deleted ones included.
    pub async fn parse_topology(&self) -> Result<TopologyInfo, RecordError> {
        let cells = MultiGridInfo::new(self.levels.clone(), self.global_ids.clone())?;
        let reply = self.call(Operation::ParseTopology, wire::population_payload(&cells)?).await?;
        Ok(reply.decode()?)
    }

    /// Render vertices of `keys`, computed as `chunks` concurrent requests
    /// and reassembled in key order.
    pub async fn edge_render_infos(&self, keys: &[String], chunks: usize) -> Result<(Vec<f32>, Vec<f32>), RecordError> {
        if keys.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }
        let chunk = keys.len().div_ceil(chunks.max(1));
        let requests = keys.chunks(chunk).enumerate().map(|(index, keys)| async move {
            let request = EdgeRenderRequest {
                index: index as u32,
                keys: keys.to_vec(),
            };
            let reply = self
                .call(Operation::CalcEdgeRenderInfos, Payload::from_serialize(&request)?)
                .await?;
            Ok::<_, RecordError>(wire::edge_render_from(&reply)?)
        });

        let mut parts = try_join_all(requests).await?;
        parts.sort_by_key(|p| p.index);
        let mut vertices = Vec::with_capacity(keys.len() * 4);
        let mut vertices_low = Vec::with_capacity(keys.len() * 4);
        for part in parts {
            vertices.extend(part.vertices);
            vertices_low.extend(part.vertices_low);
        }
        Ok((vertices, vertices_low))
    }

    fn population_of(&self, storage_ids: &[u32]) -> Result<MultiGridInfo, RecordError> {
        let mut cells = MultiGridInfo::with_capacity(storage_ids.len());
        for &id in storage_ids {
            let (level, global_id) = self.grid_info(id).ok_or(RecordError::UnknownStorageId(id))?;
            cells.push(level, global_id);
        }
        Ok(cells)
    }

    async fn call(&self, op: Operation, payload: Payload) -> Result<Payload, RecordError> {
        self.metrics.requests_sent_total.inc();
        let result = self.dispatcher.actor().request(op.as_str(), payload).await;
        match &result {
            Ok(_) => self.metrics.responses_total.inc(),
            Err(ActorError::Canceled) => self.metrics.cancels_total.inc(),
            Err(e) => {
                self.metrics.responses_total.inc();
                self.metrics.handler_errors_total.inc();
                tracing::warn!(op = %op, error = %e, "grid operation failed");
            }
        }
        Ok(result?)
    }
}
