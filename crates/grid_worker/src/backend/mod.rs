//! The grid store that owns authoritative cell state.
//!
//! Workers never mutate cells themselves; they ask the store to subdivide,
//! merge, delete or recover and render whatever population comes back.

mod http;
mod memory;

pub use http::HttpGridBackend;
pub use memory::MemoryGridBackend;

use crate::error::BackendError;
use async_trait::async_trait;
use gridcore::MultiGridInfo;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridSaveInfo {
    pub success: bool,
    pub message: String,
}

#[async_trait]
pub trait GridBackend: Send + Sync + 'static {
    /// Cells currently active.
    async fn activate_info(&self) -> Result<MultiGridInfo, BackendError>;

    /// Cells marked deleted but still recoverable.
    async fn deleted_info(&self) -> Result<MultiGridInfo, BackendError>;

    /// Replaces each cell by its children; returns the new children.
    async fn subdivide(&self, cells: &MultiGridInfo) -> Result<MultiGridInfo, BackendError>;

    /// Replaces each cell's sibling group by its parent; returns the parents.
    async fn merge(&self, cells: &MultiGridInfo) -> Result<MultiGridInfo, BackendError>;

    async fn delete(&self, cells: &MultiGridInfo) -> Result<(), BackendError>;

    async fn recover(&self, cells: &MultiGridInfo) -> Result<(), BackendError>;

    /// Cells covered by the feature stored at `feature_dir`.
    async fn pick(&self, feature_dir: &str) -> Result<MultiGridInfo, BackendError>;

    async fn save(&self) -> Result<GridSaveInfo, BackendError>;
}
