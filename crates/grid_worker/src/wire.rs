//! How grid values ride in an actor [`Payload`].
//!
//! Populations travel as one buffer in the multi-grid binary layout. Render
//! info adds the two vertex arrays and the deleted flags as further buffers,
//! all little-endian.

use crate::manager::GridContext;
use bytes::Bytes;
use grid_actor::{ActorError, Payload};
use gridcore::{GridTopology, MultiGridInfo, MultiGridRenderInfo};
use serde::{Deserialize, Serialize};

fn payload_err(e: impl std::fmt::Display) -> ActorError {
    ActorError::Payload(e.to_string())
}

fn f32_bytes(v: &[f32]) -> Bytes {
    Bytes::copy_from_slice(bytemuck::cast_slice(v))
}

fn f32_vec(b: &[u8]) -> Result<Vec<f32>, ActorError> {
    if b.len() % 4 != 0 {
        return Err(payload_err("f32 buffer length is not a multiple of 4"));
    }
    Ok(bytemuck::pod_collect_to_vec(b))
}

pub fn population_payload(cells: &MultiGridInfo) -> Result<Payload, ActorError> {
    let bytes = cells.to_bytes().map_err(payload_err)?;
    Ok(Payload::empty().with_buffer(bytes))
}

/// A payload without buffers is an empty population.
pub fn population_from(payload: &Payload) -> Result<MultiGridInfo, ActorError> {
    match payload.buffers.first() {
        Some(buf) => MultiGridInfo::from_buffer(buf).map_err(payload_err),
        None => Ok(MultiGridInfo::default()),
    }
}

pub fn render_info_payload(info: &MultiGridRenderInfo) -> Result<Payload, ActorError> {
    let cells = MultiGridInfo::new(info.levels.clone(), info.global_ids.clone()).map_err(payload_err)?;
    Ok(population_payload(&cells)?
        .with_buffer(f32_bytes(&info.vertices))
        .with_buffer(f32_bytes(&info.vertices_low))
        .with_buffer(Bytes::copy_from_slice(&info.deleted)))
}

pub fn render_info_from(payload: &Payload) -> Result<MultiGridRenderInfo, ActorError> {
    let MultiGridInfo { levels, global_ids } = population_from(payload)?;
    let info = MultiGridRenderInfo {
        vertices: f32_vec(payload.buffer(1)?)?,
        vertices_low: f32_vec(payload.buffer(2)?)?,
        deleted: payload.buffer(3)?.to_vec(),
        levels,
        global_ids,
    };
    let n = info.levels.len();
    if info.vertices.len() != n * 8 || info.vertices_low.len() != n * 8 || info.deleted.len() != n {
        return Err(payload_err(format!("render buffers do not match {n} cells")));
    }
    Ok(info)
}

pub fn context_payload(context: &GridContext) -> Result<Payload, ActorError> {
    Payload::from_serialize(context)
}

/// Topology in transferable form: edge keys plus per-cell side lists in
/// N, W, S, E order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopologyInfo {
    pub edge_keys: Vec<String>,
    pub edges: Vec<[Vec<u32>; 4]>,
    pub neighbours: Vec<[Vec<u32>; 4]>,
}

impl From<&GridTopology> for TopologyInfo {
    fn from(t: &GridTopology) -> Self {
        Self {
            edge_keys: t.edge_keys(),
            edges: t.node_edges(),
            neighbours: t
                .nodes
                .iter()
                .map(|n| gridcore::EdgeCode::ALL.map(|c| n.neighbours[c.index()].as_slice().to_vec()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRenderRequest {
    pub index: u32,
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EdgeRenderInfo {
    pub index: u32,
    pub vertices: Vec<f32>,
    pub vertices_low: Vec<f32>,
}

pub fn edge_render_payload(info: &EdgeRenderInfo) -> Result<Payload, ActorError> {
    Ok(Payload::from_serialize(&info.index)?
        .with_buffer(f32_bytes(&info.vertices))
        .with_buffer(f32_bytes(&info.vertices_low)))
}

pub fn edge_render_from(payload: &Payload) -> Result<EdgeRenderInfo, ActorError> {
    Ok(EdgeRenderInfo {
        index: payload.decode()?,
        vertices: f32_vec(payload.buffer(0)?)?,
        vertices_low: f32_vec(payload.buffer(1)?)?,
    })
}
