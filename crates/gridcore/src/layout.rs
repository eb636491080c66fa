//! Per-level grid shapes and the parent/child/local-id arithmetic between them.

use crate::error::GridError;
use crate::node::GridNode;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelInfo {
    pub width: u32,
    pub height: u32,
}

impl LevelInfo {
    #[inline]
    pub fn cell_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Level table derived from subdivision rules.
///
/// Level 0 is a single `1x1` root; level `l` multiplies level `l - 1` by
/// `rules[l - 1]`. One rule per level, so the last rule only describes how the
/// finest level would split and is never used to build a level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridLayout {
    rules: Vec<[u32; 2]>,
    levels: Vec<LevelInfo>,
}

impl GridLayout {
    pub fn new(rules: &[[u32; 2]]) -> Result<Self, GridError> {
        if rules.is_empty() {
            return Err(GridError::EmptyRules);
        }
        if rules.len() > u8::MAX as usize + 1 {
            return Err(GridError::LevelOverflow { level: rules.len() - 1 });
        }

        let mut levels = Vec::with_capacity(rules.len());
        levels.push(LevelInfo { width: 1, height: 1 });

        for (level, &[w, h]) in rules.iter().enumerate() {
            if w == 0 || h == 0 {
                return Err(GridError::InvalidRule { level, width: w, height: h });
            }
            if level + 1 == rules.len() {
                break;
            }
            let prev = levels[level];
            let width = prev.width.checked_mul(w);
            let height = prev.height.checked_mul(h);
            let info = match (width, height) {
                (Some(width), Some(height)) if (width as u64 * height as u64) <= u32::MAX as u64 + 1 => {
                    LevelInfo { width, height }
                }
                _ => return Err(GridError::LevelOverflow { level: level + 1 }),
            };
            levels.push(info);
        }

        Ok(Self { rules: rules.to_vec(), levels })
    }

    pub fn rules(&self) -> &[[u32; 2]] {
        &self.rules
    }

    pub fn levels(&self) -> &[LevelInfo] {
        &self.levels
    }

    #[inline]
    pub fn max_level(&self) -> u8 {
        (self.levels.len() - 1) as u8
    }

    pub fn level_info(&self, level: u8) -> Result<LevelInfo, GridError> {
        self.levels
            .get(level as usize)
            .copied()
            .ok_or(GridError::LevelOutOfRange { level, max_level: self.max_level() })
    }

    pub fn cell_count(&self, level: u8) -> Result<u64, GridError> {
        Ok(self.level_info(level)?.cell_count())
    }

    /// True if `(level, global_id)` addresses a cell of this layout.
    pub fn contains(&self, level: u8, global_id: u32) -> bool {
        self.levels
            .get(level as usize)
            .is_some_and(|info| (global_id as u64) < info.cell_count())
    }

    fn check(&self, level: u8, global_id: u32) -> Result<LevelInfo, GridError> {
        let info = self.level_info(level)?;
        if global_id as u64 >= info.cell_count() {
            return Err(GridError::GlobalIdOutOfRange { level, global_id });
        }
        Ok(info)
    }

    /// Global ids of the children of a cell in row-major local order.
    ///
    /// `None` for the finest level or an unknown cell.
    pub fn children(&self, level: u8, global_id: u32) -> Option<Vec<u32>> {
        if level >= self.max_level() {
            return None;
        }
        let info = self.check(level, global_id).ok()?;
        let [sub_w, sub_h] = self.rules[level as usize];

        let u = global_id % info.width;
        let v = global_id / info.width;
        let child_width = info.width * sub_w;

        let mut out = Vec::with_capacity((sub_w * sub_h) as usize);
        for local in 0..sub_w * sub_h {
            let cu = u * sub_w + local % sub_w;
            let cv = v * sub_h + local / sub_w;
            out.push(cv * child_width + cu);
        }
        Some(out)
    }

    /// Parent of a cell; the root is its own parent.
    pub fn parent_global_id(&self, level: u8, global_id: u32) -> Result<u32, GridError> {
        let info = self.check(level, global_id)?;
        if level == 0 {
            return Ok(0);
        }
        let [sub_w, sub_h] = self.rules[level as usize - 1];
        let parent = self.levels[level as usize - 1];
        let u = global_id % info.width;
        let v = global_id / info.width;
        Ok((v / sub_h) * parent.width + u / sub_w)
    }

    /// Row-major index of a cell among its siblings.
    pub fn local_id(&self, level: u8, global_id: u32) -> Result<u32, GridError> {
        let info = self.check(level, global_id)?;
        if level == 0 {
            return Ok(0);
        }
        let [sub_w, sub_h] = self.rules[level as usize - 1];
        let u = global_id % info.width;
        let v = global_id / info.width;
        Ok((v % sub_h) * sub_w + u % sub_w)
    }

    /// Builds the node for a cell with its exact extent.
    pub fn node(&self, level: u8, global_id: u32, storage_id: i64) -> Result<GridNode, GridError> {
        let info = self.check(level, global_id)?;
        GridNode::with_global_range(level, global_id, storage_id, [info.width, info.height])
            .ok_or(GridError::GlobalIdOutOfRange { level, global_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> GridLayout {
        GridLayout::new(&[[2, 1], [3, 2], [2, 2]]).unwrap()
    }

    #[test]
    fn level_shapes_accumulate() {
        let l = layout();
        assert_eq!(l.max_level(), 2);
        assert_eq!(l.level_info(0).unwrap(), LevelInfo { width: 1, height: 1 });
        assert_eq!(l.level_info(1).unwrap(), LevelInfo { width: 2, height: 1 });
        assert_eq!(l.level_info(2).unwrap(), LevelInfo { width: 6, height: 2 });
        assert!(l.level_info(3).is_err());
    }

    #[test]
    fn children_and_parents_agree() {
        let l = layout();
        assert_eq!(l.children(0, 0), Some(vec![0, 1]));
        let kids = l.children(1, 1).unwrap();
        assert_eq!(kids, vec![3, 4, 5, 9, 10, 11]);
        for (local, &kid) in kids.iter().enumerate() {
            assert_eq!(l.parent_global_id(2, kid).unwrap(), 1);
            assert_eq!(l.local_id(2, kid).unwrap(), local as u32);
        }
        assert_eq!(l.children(2, 0), None);
    }

    #[test]
    fn rejects_bad_rules() {
        assert_eq!(GridLayout::new(&[]), Err(GridError::EmptyRules));
        assert!(matches!(
            GridLayout::new(&[[2, 0], [1, 1]]),
            Err(GridError::InvalidRule { level: 0, .. })
        ));
        assert!(matches!(
            GridLayout::new(&[[65536, 65536], [2, 1], [1, 1]]),
            Err(GridError::LevelOverflow { .. })
        ));
    }

    #[test]
    fn node_extent_matches_level_grid() {
        let l = layout();
        let n = l.node(2, 11, 7).unwrap();
        assert_eq!(n.x_min(), 5.0 / 6.0);
        assert_eq!(n.y_min(), 0.5);
        assert!(l.node(2, 12, 0).is_err());
        assert!(l.contains(2, 11));
        assert!(!l.contains(2, 12));
    }
}
