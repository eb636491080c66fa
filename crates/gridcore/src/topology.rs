//! Edge extraction and adjacency for a mixed-level population.
//!
//! Every cell side lies on a horizontal or vertical line of the unit domain.
//! Sides on the same line are cut at every cell corner on that line; each
//! elementary interval is owned by at most one cell on either side, and
//! consecutive intervals with the same owners collapse into one edge.

use crate::codec::MultiGridInfo;
use crate::error::GridError;
use crate::fraction::Fraction;
use crate::layout::GridLayout;
use crate::node::{EdgeCode, GridNode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeDirection {
    Horizontal,
    Vertical,
}

impl EdgeDirection {
    fn prefix(self) -> char {
        match self {
            EdgeDirection::Horizontal => 'h',
            EdgeDirection::Vertical => 'v',
        }
    }
}

/// A shared side segment between up to two cells.
///
/// `adjacent` holds population indices: `[above, below]` for horizontal
/// edges (above = larger y), `[left, right]` for vertical ones. `None` marks
/// the domain boundary or a hole in the population.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridEdge {
    pub direction: EdgeDirection,
    pub position: Fraction,
    pub from: Fraction,
    pub to: Fraction,
    pub adjacent: [Option<u32>; 2],
}

impl GridEdge {
    /// `"{h|v}{from}-{to}-{position}"` with every fraction as `n-d` in lowest terms.
    pub fn key(&self) -> String {
        self.to_string()
    }

    pub fn from_key(key: &str) -> Result<Self, GridError> {
        key.parse()
    }

    /// Parametric endpoints `[(x, y), (x, y)]`.
    pub fn endpoints(&self) -> [(f64, f64); 2] {
        let p = self.position.to_f64();
        let (a, b) = (self.from.to_f64(), self.to.to_f64());
        match self.direction {
            EdgeDirection::Horizontal => [(a, p), (b, p)],
            EdgeDirection::Vertical => [(p, a), (p, b)],
        }
    }
}

impl fmt::Display for GridEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (a, b, p) = (self.from.simplified(), self.to.simplified(), self.position.simplified());
        write!(
            f,
            "{}{}-{}-{}-{}-{}-{}",
            self.direction.prefix(),
            a.numerator,
            a.denominator,
            b.numerator,
            b.denominator,
            p.numerator,
            p.denominator
        )
    }
}

impl FromStr for GridEdge {
    type Err = GridError;

    fn from_str(key: &str) -> Result<Self, Self::Err> {
        let malformed = || GridError::MalformedEdgeKey(key.to_string());

        let mut chars = key.chars();
        let direction = match chars.next() {
            Some('h') => EdgeDirection::Horizontal,
            Some('v') => EdgeDirection::Vertical,
            _ => return Err(malformed()),
        };

        let nums = chars
            .as_str()
            .split('-')
            .map(str::parse::<u64>)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| malformed())?;
        let [an, ad, bn, bd, pn, pd] = nums[..] else {
            return Err(malformed());
        };

        let frac = |n, d| Fraction::new(n, d).ok_or_else(malformed);
        Ok(GridEdge {
            direction,
            from: frac(an, ad)?,
            to: frac(bn, bd)?,
            position: frac(pn, pd)?,
            adjacent: [None, None],
        })
    }
}

/// Result of a topology pass.
///
/// `nodes[i]` is the cell at population index `i`, with edge ids indexing
/// `edges` and neighbour ids being population indices.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GridTopology {
    pub edges: Vec<GridEdge>,
    pub nodes: Vec<GridNode>,
}

impl GridTopology {
    pub fn edge_keys(&self) -> Vec<String> {
        self.edges.iter().map(GridEdge::key).collect()
    }

    /// Per cell, the edge ids of each side in N, W, S, E order.
    pub fn node_edges(&self) -> Vec<[Vec<u32>; 4]> {
        self.nodes
            .iter()
            .map(|n| EdgeCode::ALL.map(|c| n.edges[c.index()].as_slice().to_vec()))
            .collect()
    }
}

/// Sides of cells lying on one line, `(start, end, cell)`.
#[derive(Default)]
struct LineSides {
    low: Vec<(Fraction, Fraction, u32)>,
    high: Vec<(Fraction, Fraction, u32)>,
}

fn covering(sides: &[(Fraction, Fraction, u32)], start: Fraction) -> Option<u32> {
    let i = sides.partition_point(|&(s, _, _)| s <= start);
    let &(s, e, cell) = sides.get(i.checked_sub(1)?)?;
    (s <= start && start < e).then_some(cell)
}

fn sweep(
    lines: BTreeMap<Fraction, LineSides>,
    direction: EdgeDirection,
    edges: &mut Vec<GridEdge>,
    nodes: &mut [GridNode],
) {
    let (low_side, high_side) = match direction {
        // Line is the North side of the cell below it and the South side above.
        EdgeDirection::Horizontal => (EdgeCode::North, EdgeCode::South),
        // Line is the East side of the cell to its left and the West side to its right.
        EdgeDirection::Vertical => (EdgeCode::East, EdgeCode::West),
    };

    for (position, mut line) in lines {
        line.low.sort_by(|a, b| a.0.cmp(&b.0));
        line.high.sort_by(|a, b| a.0.cmp(&b.0));

        let mut cuts: Vec<Fraction> = line
            .low
            .iter()
            .chain(line.high.iter())
            .flat_map(|&(s, e, _)| [s, e])
            .collect();
        cuts.sort();
        cuts.dedup();

        let mut open: Option<GridEdge> = None;
        for w in cuts.windows(2) {
            let (a, b) = (w[0], w[1]);
            let low = covering(&line.low, a);
            let high = covering(&line.high, a);
            let adjacent = match direction {
                EdgeDirection::Horizontal => [high, low],
                EdgeDirection::Vertical => [low, high],
            };

            match open.as_mut() {
                Some(edge) if edge.adjacent == adjacent && edge.to == a => edge.to = b,
                _ => {
                    if let Some(done) = open.take() {
                        commit(done, low_side, high_side, edges, nodes);
                    }
                    if low.is_some() || high.is_some() {
                        open = Some(GridEdge { direction, position, from: a, to: b, adjacent });
                    }
                }
            }
        }
        if let Some(done) = open.take() {
            commit(done, low_side, high_side, edges, nodes);
        }
    }
}

fn commit(edge: GridEdge, low_side: EdgeCode, high_side: EdgeCode, edges: &mut Vec<GridEdge>, nodes: &mut [GridNode]) {
    let id = edges.len() as u32;
    let (low, high) = match edge.direction {
        EdgeDirection::Horizontal => (edge.adjacent[1], edge.adjacent[0]),
        EdgeDirection::Vertical => (edge.adjacent[0], edge.adjacent[1]),
    };

    if let Some(l) = low {
        nodes[l as usize].add_edge(id, low_side);
        if let Some(h) = high {
            nodes[l as usize].add_neighbour(h, low_side);
        }
    }
    if let Some(h) = high {
        nodes[h as usize].add_edge(id, high_side);
        if let Some(l) = low {
            nodes[h as usize].add_neighbour(l, high_side);
        }
    }
    edges.push(edge);
}

/// Computes edges and adjacency for `population`.
///
/// Edges are numbered horizontal lines first (ascending y), then vertical
/// lines (ascending x), each line from low to high coordinate. Cells are
/// expected not to overlap.
pub fn parse_topology(layout: &GridLayout, population: &MultiGridInfo) -> Result<GridTopology, GridError> {
    let mut nodes = population
        .iter()
        .enumerate()
        .map(|(storage_id, (level, global_id))| layout.node(level, global_id, storage_id as i64))
        .collect::<Result<Vec<_>, _>>()?;

    let mut horizontal: BTreeMap<Fraction, LineSides> = BTreeMap::new();
    let mut vertical: BTreeMap<Fraction, LineSides> = BTreeMap::new();

    for (i, n) in nodes.iter().enumerate() {
        let i = i as u32;
        horizontal.entry(n.y_max_frac).or_default().low.push((n.x_min_frac, n.x_max_frac, i));
        horizontal.entry(n.y_min_frac).or_default().high.push((n.x_min_frac, n.x_max_frac, i));
        vertical.entry(n.x_max_frac).or_default().low.push((n.y_min_frac, n.y_max_frac, i));
        vertical.entry(n.x_min_frac).or_default().high.push((n.y_min_frac, n.y_max_frac, i));
    }

    let mut edges = Vec::new();
    sweep(horizontal, EdgeDirection::Horizontal, &mut edges, &mut nodes);
    sweep(vertical, EdgeDirection::Vertical, &mut edges, &mut nodes);

    Ok(GridTopology { edges, nodes })
}
