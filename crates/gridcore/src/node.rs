//! One cell of the recursive subdivision and its side/adjacency sets.

use crate::fraction::{cell_extent, lerp, Fraction};
use crate::mercator;
use crate::render::{BoundingBox2D, CoordinateConverter};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Two-bit side code shared by nodes and edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EdgeCode {
    North = 0b00,
    West = 0b01,
    South = 0b10,
    East = 0b11,
}

impl EdgeCode {
    /// Iteration order of [`GridNode::edge_keys`].
    pub const ALL: [EdgeCode; 4] = [EdgeCode::North, EdgeCode::West, EdgeCode::South, EdgeCode::East];

    #[inline]
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0b00 => Some(EdgeCode::North),
            0b01 => Some(EdgeCode::West),
            0b10 => Some(EdgeCode::South),
            0b11 => Some(EdgeCode::East),
            _ => None,
        }
    }

    #[inline]
    pub fn opposite(self) -> Self {
        match self {
            EdgeCode::North => EdgeCode::South,
            EdgeCode::South => EdgeCode::North,
            EdgeCode::West => EdgeCode::East,
            EdgeCode::East => EdgeCode::West,
        }
    }

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Insertion-ordered set of ids; sides rarely hold more than a handful.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeSet(SmallVec<[u32; 4]>);

impl EdgeSet {
    /// Returns false if `id` was already present.
    pub fn insert(&mut self, id: u32) -> bool {
        if self.0.contains(&id) {
            return false;
        }
        self.0.push(id);
        true
    }

    pub fn contains(&self, id: u32) -> bool {
        self.0.contains(&id)
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.iter().copied()
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.0
    }
}

/// Sentinel written into `level`, `global_id` and `storage_id` by [`GridNode::release`].
pub const RELEASED: i64 = -1;

/// A cell of the hierarchy with an exact parametric extent.
///
/// Identity is `(level, global_id)`; the storage id and the side sets do not
/// take part in equality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridNode {
    pub level: i32,
    pub global_id: i64,
    pub storage_id: i64,
    pub x_min_frac: Fraction,
    pub x_max_frac: Fraction,
    pub y_min_frac: Fraction,
    pub y_max_frac: Fraction,
    pub edges: [EdgeSet; 4],
    pub neighbours: [EdgeSet; 4],
}

impl GridNode {
    /// Node covering the whole `[0, 1]²` domain.
    pub fn new(level: u8, global_id: u32, storage_id: i64) -> Self {
        Self {
            level: level as i32,
            global_id: global_id as i64,
            storage_id,
            x_min_frac: Fraction::ZERO,
            x_max_frac: Fraction::ONE,
            y_min_frac: Fraction::ZERO,
            y_max_frac: Fraction::ONE,
            edges: Default::default(),
            neighbours: Default::default(),
        }
    }

    /// Node whose extent is cell `global_id` of a `[width, height]` level grid.
    /// `None` if the grid is empty.
    pub fn with_global_range(level: u8, global_id: u32, storage_id: i64, global_range: [u32; 2]) -> Option<Self> {
        let [w, h] = global_range;
        let (x0, x1, y0, y1) = cell_extent(global_id as u64, w as u64, h as u64)?;
        Some(Self {
            x_min_frac: x0,
            x_max_frac: x1,
            y_min_frac: y0,
            y_max_frac: y1,
            ..Self::new(level, global_id, storage_id)
        })
    }

    /// Child of `parent` one level down, addressed in the child level's grid.
    pub fn child_of(parent: &GridNode, global_id: u32, storage_id: i64, global_range: [u32; 2]) -> Option<Self> {
        let level = (parent.level + 1).clamp(0, u8::MAX as i32) as u8;
        Self::with_global_range(level, global_id, storage_id, global_range)
    }

    pub fn uu_id(&self) -> String {
        format!("{}-{}", self.level, self.global_id)
    }

    /// `(level, global_id)` for a live node, `None` once released.
    pub fn key(&self) -> Option<(u8, u32)> {
        let level = u8::try_from(self.level).ok()?;
        let global_id = u32::try_from(self.global_id).ok()?;
        Some((level, global_id))
    }

    #[inline]
    pub fn x_min(&self) -> f64 {
        self.x_min_frac.to_f64()
    }

    #[inline]
    pub fn x_max(&self) -> f64 {
        self.x_max_frac.to_f64()
    }

    #[inline]
    pub fn y_min(&self) -> f64 {
        self.y_min_frac.to_f64()
    }

    #[inline]
    pub fn y_max(&self) -> f64 {
        self.y_max_frac.to_f64()
    }

    pub fn reset_edges(&mut self) {
        self.edges.iter_mut().for_each(EdgeSet::clear);
        self.neighbours.iter_mut().for_each(EdgeSet::clear);
    }

    pub fn add_edge(&mut self, edge_index: u32, edge_code: EdgeCode) {
        self.edges[edge_code.index()].insert(edge_index);
    }

    pub fn add_neighbour(&mut self, neighbour: u32, edge_code: EdgeCode) {
        self.neighbours[edge_code.index()].insert(neighbour);
    }

    /// All edge ids, sides in N, W, S, E order, insertion order within a side.
    pub fn edge_keys(&self) -> Vec<u32> {
        EdgeCode::ALL
            .iter()
            .flat_map(|code| self.edges[code.index()].iter())
            .collect()
    }

    /// Inclusive point test in the bounding box's coordinate system.
    pub fn within(&self, bbox: &BoundingBox2D, lon: f64, lat: f64) -> bool {
        let x0 = lerp(bbox.x_min, bbox.x_max, self.x_min());
        let x1 = lerp(bbox.x_min, bbox.x_max, self.x_max());
        let y0 = lerp(bbox.y_min, bbox.y_max, self.y_min());
        let y1 = lerp(bbox.y_min, bbox.y_max, self.y_max());
        lon >= x0 && lon <= x1 && lat >= y0 && lat <= y1
    }

    /// Corners `[TL, TR, BL, BR]` in render space.
    pub fn get_vertices(&self, converter: &dyn CoordinateConverter, bbox: &BoundingBox2D) -> [f32; 8] {
        let (x0, x1, y0, y1) = (self.x_min(), self.x_max(), self.y_min(), self.y_max());
        let corners = [(x0, y1), (x1, y1), (x0, y0), (x1, y0)];

        let mut out = [0f32; 8];
        for (i, (u, v)) in corners.into_iter().enumerate() {
            let [x, y] = mercator::from_lon_lat(converter.forward(bbox.lerp(u, v)));
            out[i * 2] = x as f32;
            out[i * 2 + 1] = y as f32;
        }
        out
    }

    /// Invalidates the node for reuse in pooled storage.
    pub fn release(&mut self) {
        self.level = RELEASED as i32;
        self.global_id = RELEASED;
        self.storage_id = RELEASED;
        self.x_min_frac = Fraction::ZERO;
        self.x_max_frac = Fraction::ZERO;
        self.y_min_frac = Fraction::ZERO;
        self.y_max_frac = Fraction::ZERO;
        self.reset_edges();
    }

    pub fn is_released(&self) -> bool {
        self.level < 0 || self.global_id < 0
    }

    /// The four extent fractions, `[x_min, x_max, y_min, y_max]`.
    pub fn serialization(&self) -> [Fraction; 4] {
        [self.x_min_frac, self.x_max_frac, self.y_min_frac, self.y_max_frac]
    }
}

impl PartialEq for GridNode {
    fn eq(&self, other: &Self) -> bool {
        self.level == other.level && self.global_id == other.global_id
    }
}

impl Eq for GridNode {}

impl Hash for GridNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.level.hash(state);
        self.global_id.hash(state);
    }
}

impl fmt::Display for GridNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uu_id())
    }
}
