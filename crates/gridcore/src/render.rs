//! Bounding boxes, the coordinate-conversion boundary and render buffers.

use crate::error::GridError;
use crate::fraction::lerp;
use crate::layout::GridLayout;
use crate::mercator;
use crate::node::GridNode;
use crate::topology::GridEdge;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

pub const DELETED_FLAG: u8 = 1;
pub const UNDELETED_FLAG: u8 = 0;

/// Axis-aligned box in the source coordinate system.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox2D {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

impl BoundingBox2D {
    pub fn new(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Self {
        Self { x_min, y_min, x_max, y_max }
    }

    pub fn center(&self) -> [f64; 2] {
        [(self.x_min + self.x_max) / 2.0, (self.y_min + self.y_max) / 2.0]
    }

    /// Maps a parametric `(u, v)` in `[0, 1]²` into this box.
    #[inline]
    pub fn lerp(&self, u: f64, v: f64) -> [f64; 2] {
        [lerp(self.x_min, self.x_max, u), lerp(self.y_min, self.y_max, v)]
    }
}

/// Converts a point from the grid's source coordinate system to lon/lat.
///
/// Implementations live outside this crate (CRS registries); the built-ins
/// cover the identity case and EPSG:3857 sources.
pub trait CoordinateConverter: Send + Sync {
    fn forward(&self, xy: [f64; 2]) -> [f64; 2];
}

impl<F> CoordinateConverter for F
where
    F: Fn([f64; 2]) -> [f64; 2] + Send + Sync,
{
    fn forward(&self, xy: [f64; 2]) -> [f64; 2] {
        self(xy)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl CoordinateConverter for Identity {
    fn forward(&self, xy: [f64; 2]) -> [f64; 2] {
        xy
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WebMercatorToLonLat;

impl CoordinateConverter for WebMercatorToLonLat {
    fn forward(&self, xy: [f64; 2]) -> [f64; 2] {
        mercator::web_mercator_meters_to_lon_lat(xy)
    }
}

fn normalize_crs(code: &str) -> String {
    let code = code.trim().to_ascii_uppercase();
    match code.strip_prefix("EPSG:") {
        Some(rest) => rest.to_string(),
        None => code,
    }
}

/// Built-in converters for the coordinate systems this crate knows about.
pub fn converter_for(src: &str, target: &str) -> Result<Box<dyn CoordinateConverter>, GridError> {
    match (normalize_crs(src).as_str(), normalize_crs(target).as_str()) {
        (s, t) if s == t => Ok(Box::new(Identity)),
        ("3857", "4326") => Ok(Box::new(WebMercatorToLonLat)),
        _ => Err(GridError::UnsupportedConversion {
            src: src.to_string(),
            target: target.to_string(),
        }),
    }
}

/// Splits a double into a high f32 and the f32 residual.
#[inline]
pub fn split_f64_to_f32_pair(v: f64) -> (f32, f32) {
    let hi = v as f32;
    let lo = (v - hi as f64) as f32;
    (hi, lo)
}

/// Render handoff for a population: 8 high and 8 low floats per cell
/// (`[TL, TR, BL, BR]`, relative to the bounding-box center).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MultiGridRenderInfo {
    pub levels: Vec<u8>,
    pub global_ids: Vec<u32>,
    pub vertices: Vec<f32>,
    pub vertices_low: Vec<f32>,
    pub deleted: Vec<u8>,
}

impl MultiGridRenderInfo {
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

/// Turns cells into camera-relative Mercator vertices.
///
/// Positions are split into high/low f32 pairs around the bounding-box
/// center so that the renderer keeps double precision on the GPU.
pub struct RenderVertexBuilder {
    layout: GridLayout,
    bbox: BoundingBox2D,
    converter: Box<dyn CoordinateConverter>,
    center_hi: [f32; 2],
    center_lo: [f32; 2],
}

impl RenderVertexBuilder {
    pub fn new(layout: GridLayout, bbox: BoundingBox2D, converter: Box<dyn CoordinateConverter>) -> Self {
        let center = mercator::from_lon_lat(converter.forward(bbox.center()));
        let (cx_hi, cx_lo) = split_f64_to_f32_pair(center[0]);
        let (cy_hi, cy_lo) = split_f64_to_f32_pair(center[1]);
        Self {
            layout,
            bbox,
            converter,
            center_hi: [cx_hi, cy_hi],
            center_lo: [cx_lo, cy_lo],
        }
    }

    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    pub fn bbox(&self) -> &BoundingBox2D {
        &self.bbox
    }

    pub fn converter(&self) -> &dyn CoordinateConverter {
        self.converter.as_ref()
    }

    /// High and low parts of the bounding-box center, `[x_hi, x_lo, y_hi, y_lo]`.
    pub fn center_f32(&self) -> [f32; 4] {
        [self.center_hi[0], self.center_lo[0], self.center_hi[1], self.center_lo[1]]
    }

    /// Projects a parametric point into center-relative `(hi, lo)` pairs.
    #[inline]
    pub fn project(&self, u: f64, v: f64) -> ([f32; 2], [f32; 2]) {
        let lon_lat = self.converter.forward(self.bbox.lerp(u, v));
        let m = mercator::from_lon_lat(lon_lat);
        let (x_hi, x_lo) = split_f64_to_f32_pair(m[0]);
        let (y_hi, y_lo) = split_f64_to_f32_pair(m[1]);
        (
            [x_hi - self.center_hi[0], y_hi - self.center_hi[1]],
            [x_lo - self.center_lo[0], y_lo - self.center_lo[1]],
        )
    }

    /// Vertices of one cell. Fails if the cell is not addressable in the layout.
    pub fn node_vertices(&self, level: u8, global_id: u32) -> Result<([f32; 8], [f32; 8]), GridError> {
        let node = self.layout.node(level, global_id, 0)?;
        Ok(self.vertices_of(&node))
    }

    pub fn vertices_of(&self, node: &GridNode) -> ([f32; 8], [f32; 8]) {
        let (x0, x1, y0, y1) = (node.x_min(), node.x_max(), node.y_min(), node.y_max());
        let corners = [(x0, y1), (x1, y1), (x0, y0), (x1, y0)];
        let mut hi = [0f32; 8];
        let mut lo = [0f32; 8];
        for (i, (u, v)) in corners.into_iter().enumerate() {
            let (h, l) = self.project(u, v);
            hi[i * 2..i * 2 + 2].copy_from_slice(&h);
            lo[i * 2..i * 2 + 2].copy_from_slice(&l);
        }
        (hi, lo)
    }

    /// Vertices for a whole population, computed in parallel.
    pub fn multi_vertices(&self, levels: &[u8], global_ids: &[u32]) -> Result<(Vec<f32>, Vec<f32>), GridError> {
        if levels.len() != global_ids.len() {
            return Err(GridError::LengthMismatch {
                levels: levels.len(),
                global_ids: global_ids.len(),
            });
        }

        let per_cell: Vec<([f32; 8], [f32; 8])> = levels
            .par_iter()
            .zip(global_ids.par_iter())
            .map(|(&level, &global_id)| self.node_vertices(level, global_id))
            .collect::<Result<_, _>>()?;

        let mut vertices = Vec::with_capacity(per_cell.len() * 8);
        let mut vertices_low = Vec::with_capacity(per_cell.len() * 8);
        for (hi, lo) in per_cell {
            vertices.extend_from_slice(&hi);
            vertices_low.extend_from_slice(&lo);
        }
        Ok((vertices, vertices_low))
    }

    /// Line vertices for edge keys, `[x0, y0, x1, y1]` per edge.
    pub fn edge_vertices<S: AsRef<str> + Sync>(&self, keys: &[S]) -> Result<(Vec<f32>, Vec<f32>), GridError> {
        let per_edge: Vec<([f32; 4], [f32; 4])> = keys
            .par_iter()
            .map(|key| -> Result<([f32; 4], [f32; 4]), GridError> {
                let edge = GridEdge::from_key(key.as_ref())?;
                let [(u0, v0), (u1, v1)] = edge.endpoints();
                let (h0, l0) = self.project(u0, v0);
                let (h1, l1) = self.project(u1, v1);
                Ok(([h0[0], h0[1], h1[0], h1[1]], [l0[0], l0[1], l1[0], l1[1]]))
            })
            .collect::<Result<_, _>>()?;

        let mut hi = Vec::with_capacity(per_edge.len() * 4);
        let mut lo = Vec::with_capacity(per_edge.len() * 4);
        for (h, l) in per_edge {
            hi.extend_from_slice(&h);
            lo.extend_from_slice(&l);
        }
        Ok((hi, lo))
    }

    /// Builds the render tuple for a population with uniform deleted flags.
    pub fn render_info(&self, levels: Vec<u8>, global_ids: Vec<u32>, deleted_flag: u8) -> Result<MultiGridRenderInfo, GridError> {
        let (vertices, vertices_low) = self.multi_vertices(&levels, &global_ids)?;
        let deleted = vec![deleted_flag; levels.len()];
        Ok(MultiGridRenderInfo {
            levels,
            global_ids,
            vertices,
            vertices_low,
            deleted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> RenderVertexBuilder {
        let layout = GridLayout::new(&[[2, 2], [2, 2], [1, 1]]).unwrap();
        RenderVertexBuilder::new(layout, BoundingBox2D::new(-10.0, -10.0, 10.0, 10.0), Box::new(Identity))
    }

    #[test]
    fn split_keeps_residual() {
        let v = 0.123_456_789_012_345_f64;
        let (hi, lo) = split_f64_to_f32_pair(v);
        assert!(((hi as f64 + lo as f64) - v).abs() < 1e-14);
    }

    #[test]
    fn root_vertices_are_symmetric_about_center() {
        let b = builder();
        let (hi, _) = b.node_vertices(0, 0).unwrap();
        // TL x == BL x, TR x == BR x, TL y == TR y.
        assert_eq!(hi[0], hi[4]);
        assert_eq!(hi[2], hi[6]);
        assert_eq!(hi[1], hi[3]);
        assert!(hi[0] < 0.0 && hi[2] > 0.0);
        // Mercator y grows south: top edge has the smaller y.
        assert!(hi[1] < hi[5]);
    }

    #[test]
    fn multi_vertices_checks_lengths() {
        let b = builder();
        assert!(b.multi_vertices(&[0, 1], &[0]).is_err());
        let (v, l) = b.multi_vertices(&[1, 1], &[0, 3]).unwrap();
        assert_eq!((v.len(), l.len()), (16, 16));
    }

    #[test]
    fn edge_vertices_follow_keys() {
        let b = builder();
        let (hi, lo) = b.edge_vertices(&["h0-1-1-1-1-2", "v1-2-1-1-1-2"]).unwrap();
        assert_eq!((hi.len(), lo.len()), (8, 8));
        // Both edges pass through the bbox center.
        assert!(hi[1].abs() < 1e-6);
        assert!(hi[4].abs() < 1e-6);
        assert!(b.edge_vertices(&["bogus"]).is_err());
    }

    #[test]
    fn converter_lookup() {
        assert!(converter_for("EPSG:4326", "epsg:4326").is_ok());
        assert!(converter_for("EPSG:3857", "EPSG:4326").is_ok());
        assert!(matches!(
            converter_for("EPSG:2326", "EPSG:4326"),
            Err(GridError::UnsupportedConversion { .. })
        ));
    }
}
