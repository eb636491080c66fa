use super::{GridBackend, GridSaveInfo};
use crate::error::BackendError;
use async_trait::async_trait;
use gridcore::{GridLayout, MultiGridInfo};
use parking_lot::Mutex;
use roaring::RoaringBitmap;
use std::collections::{HashMap, HashSet};

struct CellSets {
    active: Vec<RoaringBitmap>,
    deleted: Vec<RoaringBitmap>,
    features: HashMap<String, MultiGridInfo>,
    saves: u64,
}

fn collect(sets: &[RoaringBitmap]) -> MultiGridInfo {
    let total = sets.iter().map(|s| s.len() as usize).sum();
    let mut out = MultiGridInfo::with_capacity(total);
    for (level, set) in sets.iter().enumerate() {
        for id in set {
            out.push(level as u8, id);
        }
    }
    out
}

/// In-process grid store with one active and one deleted bitmap per level.
///
/// Starts with the root cell active.
pub struct MemoryGridBackend {
    layout: GridLayout,
    cells: Mutex<CellSets>,
}

impl MemoryGridBackend {
    pub fn new(layout: GridLayout) -> Self {
        let levels = layout.max_level() as usize + 1;
        let mut active = vec![RoaringBitmap::new(); levels];
        active[0].insert(0);
        Self {
            layout,
            cells: Mutex::new(CellSets {
                active,
                deleted: vec![RoaringBitmap::new(); levels],
                features: HashMap::new(),
                saves: 0,
            }),
        }
    }

    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    /// Records the population that `pick(feature_dir)` returns.
    pub fn insert_feature(&self, feature_dir: impl Into<String>, cells: MultiGridInfo) {
        self.cells.lock().features.insert(feature_dir.into(), cells);
    }

    pub fn active_count(&self) -> u64 {
        self.cells.lock().active.iter().map(RoaringBitmap::len).sum()
    }

    fn check(&self, level: u8, global_id: u32) -> Result<(), BackendError> {
        self.layout.level_info(level)?;
        if !self.layout.contains(level, global_id) {
            return Err(gridcore::GridError::GlobalIdOutOfRange { level, global_id }.into());
        }
        Ok(())
    }
}

#[async_trait]
impl GridBackend for MemoryGridBackend {
    async fn activate_info(&self) -> Result<MultiGridInfo, BackendError> {
        Ok(collect(&self.cells.lock().active))
    }

    async fn deleted_info(&self) -> Result<MultiGridInfo, BackendError> {
        Ok(collect(&self.cells.lock().deleted))
    }

    async fn subdivide(&self, cells: &MultiGridInfo) -> Result<MultiGridInfo, BackendError> {
        let mut sets = self.cells.lock();
        let mut out = MultiGridInfo::default();
        for (level, global_id) in cells.iter() {
            self.check(level, global_id)?;
            let Some(children) = self.layout.children(level, global_id) else {
                continue;
            };
            if !sets.active[level as usize].remove(global_id) {
                continue;
            }
            let child_level = level + 1;
            for child in children {
                sets.active[child_level as usize].insert(child);
                sets.deleted[child_level as usize].remove(child);
                out.push(child_level, child);
            }
        }
        Ok(out)
    }

    async fn merge(&self, cells: &MultiGridInfo) -> Result<MultiGridInfo, BackendError> {
        let mut sets = self.cells.lock();
        let mut out = MultiGridInfo::default();
        let mut seen = HashSet::new();

        for (level, global_id) in cells.iter() {
            self.check(level, global_id)?;
            if level == 0 {
                continue;
            }
            let parent_level = level - 1;
            let parent = self.layout.parent_global_id(level, global_id)?;
            if !seen.insert((parent_level, parent)) {
                continue;
            }

            for sibling in self.layout.children(parent_level, parent).unwrap_or_default() {
                sets.active[level as usize].remove(sibling);
                sets.deleted[level as usize].remove(sibling);
            }
            sets.active[parent_level as usize].insert(parent);
            sets.deleted[parent_level as usize].remove(parent);
            out.push(parent_level, parent);
        }
        Ok(out)
    }

    async fn delete(&self, cells: &MultiGridInfo) -> Result<(), BackendError> {
        let mut sets = self.cells.lock();
        for (level, global_id) in cells.iter() {
            self.check(level, global_id)?;
            if sets.active[level as usize].remove(global_id) {
                sets.deleted[level as usize].insert(global_id);
            }
        }
        Ok(())
    }

    async fn recover(&self, cells: &MultiGridInfo) -> Result<(), BackendError> {
        let mut sets = self.cells.lock();
        for (level, global_id) in cells.iter() {
            self.check(level, global_id)?;
            if sets.deleted[level as usize].remove(global_id) {
                sets.active[level as usize].insert(global_id);
            }
        }
        Ok(())
    }

    async fn pick(&self, feature_dir: &str) -> Result<MultiGridInfo, BackendError> {
        self.cells
            .lock()
            .features
            .get(feature_dir)
            .cloned()
            .ok_or_else(|| BackendError::UnknownFeature(feature_dir.to_string()))
    }

    async fn save(&self) -> Result<GridSaveInfo, BackendError> {
        let mut sets = self.cells.lock();
        sets.saves += 1;
        let active: u64 = sets.active.iter().map(RoaringBitmap::len).sum();
        Ok(GridSaveInfo {
            success: true,
            message: format!("saved {active} active cells (save #{})", sets.saves),
        })
    }
}
