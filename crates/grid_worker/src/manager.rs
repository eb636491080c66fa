//! Worker-side grid state: the context a worker was initialised with and the
//! render math derived from it.

use gridcore::{
    converter_for, parse_topology, BoundingBox2D, GridError, GridLayout, GridTopology, MultiGridInfo,
    MultiGridRenderInfo, RenderVertexBuilder, UNDELETED_FLAG,
};
use serde::{Deserialize, Serialize};

/// Everything a worker needs to turn populations into geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridContext {
    pub src_cs: String,
    pub target_cs: String,
    pub bbox: BoundingBox2D,
    pub rules: Vec<[u32; 2]>,
}

pub struct GridManager {
    context: GridContext,
    vertices: RenderVertexBuilder,
}

impl GridManager {
    pub fn new(context: GridContext) -> Result<Self, GridError> {
        let layout = GridLayout::new(&context.rules)?;
        let converter = converter_for(&context.src_cs, &context.target_cs)?;
        let vertices = RenderVertexBuilder::new(layout, context.bbox, converter);
        Ok(Self { context, vertices })
    }

    pub fn context(&self) -> &GridContext {
        &self.context
    }

    pub fn layout(&self) -> &GridLayout {
        self.vertices.layout()
    }

    /// `[x_hi, x_lo, y_hi, y_lo]` of the bounding-box center in render space.
    pub fn center(&self) -> [f32; 4] {
        self.vertices.center_f32()
    }

    pub fn render_info(&self, cells: MultiGridInfo, deleted_flag: u8) -> Result<MultiGridRenderInfo, GridError> {
        let MultiGridInfo { levels, global_ids } = cells;
        self.vertices.render_info(levels, global_ids, deleted_flag)
    }

    /// Active cells followed by deleted ones, flags set accordingly.
    pub fn combined_render_info(
        &self,
        active: MultiGridInfo,
        deleted: MultiGridInfo,
    ) -> Result<MultiGridRenderInfo, GridError> {
        let mut out = self.render_info(active, UNDELETED_FLAG)?;
        let gone = self.render_info(deleted, gridcore::DELETED_FLAG)?;
        out.levels.extend(gone.levels);
        out.global_ids.extend(gone.global_ids);
        out.vertices.extend(gone.vertices);
        out.vertices_low.extend(gone.vertices_low);
        out.deleted.extend(gone.deleted);
        Ok(out)
    }

    pub fn topology(&self, cells: &MultiGridInfo) -> Result<GridTopology, GridError> {
        parse_topology(self.layout(), cells)
    }

    pub fn edge_vertices(&self, keys: &[String]) -> Result<(Vec<f32>, Vec<f32>), GridError> {
        self.vertices.edge_vertices(keys)
    }
}
