//! Hierarchical grid model with exact fractional addressing.
//!
//! A grid is described by one subdivision rule `[width, height]` per level.
//! Level 0 is a single root cell covering the parametric unit square; every
//! further level multiplies the previous level's shape by its rule. A cell is
//! addressed by `(level, global_id)` where `global_id` is row-major within
//! its level, and its extent is kept as exact fractions of the unit square.
//!
//! - [`fraction`]: exact extents and `lerp` into real coordinates.
//! - [`node`]: one cell, its side codes and edge/neighbour sets.
//! - [`layout`]: level shapes plus parent/child/local-id arithmetic.
//! - [`codec`]: binary layout of `(levels, global_ids)` populations.
//! - [`topology`]: shared edges and adjacency of a mixed-level population.
//! - [`render`], [`mercator`]: projection into renderer-ready f32 buffers.

pub mod codec;
pub mod error;
pub mod fraction;
pub mod layout;
pub mod mercator;
pub mod node;
pub mod render;
pub mod topology;

pub use codec::{aligned_offset, encoded_len, MultiGridInfo};
pub use error::GridError;
pub use fraction::{lerp, simplify_fraction, Fraction};
pub use layout::{GridLayout, LevelInfo};
pub use node::{EdgeCode, EdgeSet, GridNode};
pub use render::{
    converter_for, BoundingBox2D, CoordinateConverter, MultiGridRenderInfo, RenderVertexBuilder, DELETED_FLAG,
    UNDELETED_FLAG,
};
pub use topology::{parse_topology, EdgeDirection, GridEdge, GridTopology};
