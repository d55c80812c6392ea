//! Local bipartite re-linking around a mother cell.
//!
//! The linking problem is posed as a square Linear Assignment Problem in
//! the Jaqaman layout, so every source and every target may also stay
//! unassigned at the alternative cost:
//!
//! ```text
//!            targets (m)      no-link (n)
//!          ┌──────────────┬──────────────┐
//!  sources │  link costs  │  alt on diag │
//!    (n)   ├──────────────┼──────────────┤
//!  no-link │  alt on diag │  min cost ᵀ  │
//!    (m)   └──────────────┴──────────────┘
//! ```
//!
//! Sources are the mother's family followed by competitors: predecessors
//! that already claim a candidate through a context edge. Competitors only
//! take part so a candidate held by its own track is not handed to the
//! mother; their links are never reported.
//!
//! The square problem is solved with the O(n³) Kuhn-Munkres algorithm using
//! row and column potentials.

use nalgebra::DMatrix;
use serde::Serialize;
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::debug;

use crate::cost::LinkingCostModel;
use crate::graph::{Edge, LineageGraph, NodeId, SpotStore};
use crate::region::{candidate_region, RegionQuery};

// ============================================================================
// LOCAL SUBGRAPH
// ============================================================================

/// Sources, targets and context edges around one mother.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalSubgraph {
    pub mother: NodeId,

    /// Mother and its descendants inside the window
    pub sources: Vec<NodeId>,

    /// Candidate daughters in frames `f+1 .. f+Δt−1`, excluding sources
    pub targets: Vec<NodeId>,

    /// Existing edges around the mother and the candidates
    pub context: Vec<Edge>,

    /// Predecessors of candidates along context edges, outside the family
    pub competitors: Vec<NodeId>,
}

impl LocalSubgraph {
    /// Collects the local problem for `mother` in frame `frame`.
    ///
    /// `original` is the tracker's graph, `correction` the graph being
    /// corrected in this pass.
    pub fn build(
        original: &LineageGraph,
        correction: &LineageGraph,
        spots: &SpotStore,
        mother: NodeId,
        frame: usize,
        delta_t: usize,
        query: &RegionQuery,
    ) -> Self {
        // Δt below 2 leaves no target frame
        let window_end = frame + delta_t.saturating_sub(1);

        // Mother edges the correction graph already dropped
        let mut context: Vec<Edge> = original
            .edges_of(mother)
            .into_iter()
            .filter(|e| !correction.has_edge(e.source, e.target))
            .collect();

        let mut sources = vec![mother];
        let mut frontier = vec![mother];
        while let Some(node) = frontier.pop() {
            for child in correction.successors(node) {
                let in_window = correction.frame_of(child).map_or(false, |f| f <= window_end);
                if in_window && !sources.contains(&child) {
                    sources.push(child);
                    frontier.push(child);
                }
            }
        }

        let mut targets = Vec::new();
        for target_frame in (frame + 1)..=window_end {
            for candidate in candidate_region(spots, mother, target_frame, query) {
                // Existing continuations of the mother do not compete
                if !sources.contains(&candidate) && !targets.contains(&candidate) {
                    targets.push(candidate);
                }
            }
        }

        let candidates: BTreeSet<NodeId> = targets.iter().copied().collect();
        for edge in correction.edges() {
            let source_frame = correction.frame_of(edge.source).unwrap_or(usize::MAX);
            let searched = (frame..=window_end).contains(&source_frame);
            if searched && (candidates.contains(&edge.source) || candidates.contains(&edge.target)) {
                context.push(edge);
            }
        }

        let mut competitors = Vec::new();
        for edge in &context {
            let claimed = candidates.contains(&edge.target);
            if claimed && !sources.contains(&edge.source) && !competitors.contains(&edge.source) {
                competitors.push(edge.source);
            }
        }

        Self { mother, sources, targets, context, competitors }
    }
}

// ============================================================================
// COST MATRIX
// ============================================================================

/// Row × target link costs; blocked links are `+∞`.
///
/// Rows are the family sources followed by the competitors.
#[derive(Debug, Clone, PartialEq)]
pub struct CostMatrix {
    pub sources: Vec<NodeId>,
    pub competitors: Vec<NodeId>,
    pub targets: Vec<NodeId>,
    pub costs: DMatrix<f64>,
}

impl CostMatrix {
    pub fn new(sources: Vec<NodeId>, targets: Vec<NodeId>, costs: DMatrix<f64>) -> Result<Self, AssignmentError> {
        Self::with_competitors(sources, Vec::new(), targets, costs)
    }

    pub fn with_competitors(
        sources: Vec<NodeId>,
        competitors: Vec<NodeId>,
        targets: Vec<NodeId>,
        costs: DMatrix<f64>,
    ) -> Result<Self, AssignmentError> {
        let matrix = Self { sources, competitors, targets, costs };
        matrix.check_shape()?;
        Ok(matrix)
    }

    /// Evaluates the cost model on every row/target pair.
    pub fn build(subgraph: &LocalSubgraph, spots: &SpotStore, model: &LinkingCostModel) -> Self {
        let rows: Vec<NodeId> = subgraph.sources.iter().chain(&subgraph.competitors).copied().collect();
        let costs = DMatrix::from_fn(rows.len(), subgraph.targets.len(), |r, c| {
            match (spots.get(rows[r]), spots.get(subgraph.targets[c])) {
                (Some(s), Some(t)) => model.link_cost(s, t).unwrap_or(f64::INFINITY),
                _ => f64::INFINITY,
            }
        });
        Self {
            sources: subgraph.sources.clone(),
            competitors: subgraph.competitors.clone(),
            targets: subgraph.targets.clone(),
            costs,
        }
    }

    fn n_rows(&self) -> usize {
        self.sources.len() + self.competitors.len()
    }

    /// Costs of the links that are not blocked, over every row.
    pub fn real_costs(&self) -> Vec<f64> {
        self.costs.iter().copied().filter(|c| c.is_finite()).collect()
    }

    /// Costs of the family rows that are not blocked.
    pub fn family_costs(&self) -> Vec<f64> {
        self.costs
            .rows(0, self.sources.len())
            .iter()
            .copied()
            .filter(|c| c.is_finite())
            .collect()
    }

    fn row_costs(&self, row: usize) -> Vec<f64> {
        self.costs.row(row).iter().copied().filter(|c| c.is_finite()).collect()
    }

    fn check_shape(&self) -> Result<(), AssignmentError> {
        if self.costs.nrows() != self.n_rows() || self.costs.ncols() != self.targets.len() {
            return Err(AssignmentError::ShapeMismatch {
                expected: (self.n_rows(), self.targets.len()),
                got: (self.costs.nrows(), self.costs.ncols()),
            });
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), AssignmentError> {
        self.check_shape()?;
        for r in 0..self.costs.nrows() {
            for c in 0..self.costs.ncols() {
                let value = self.costs[(r, c)];
                if value.is_nan() {
                    return Err(AssignmentError::NotANumber { row: r, col: c });
                }
                if value < 0.0 {
                    return Err(AssignmentError::NegativeCost { row: r, col: c, value });
                }
            }
        }
        Ok(())
    }
}

/// One accepted link.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Assignment {
    pub source: NodeId,
    pub target: NodeId,
    pub cost: f64,
}

// ============================================================================
// SOLVER
// ============================================================================

/// Solves the local problem, returning the family links chosen.
///
/// Family rows and every target share one alternative cost, derived from
/// the family's real costs. Each competitor row gets its own, derived from
/// its own real costs.
pub fn solve_local(matrix: &CostMatrix, model: &LinkingCostModel) -> Result<Vec<Assignment>, AssignmentError> {
    matrix.validate()?;
    let Some(alternative) = model.alternative_cost(&matrix.family_costs()) else {
        return Ok(Vec::new());
    };
    let real = matrix.real_costs();

    let family = matrix.sources.len();
    let n = matrix.n_rows();
    let m = matrix.targets.len();
    let row_alternatives: Vec<f64> = (0..n)
        .map(|r| {
            if r < family {
                alternative
            } else {
                model.alternative_cost(&matrix.row_costs(r)).unwrap_or(alternative)
            }
        })
        .collect();

    let max_real = real.iter().chain(&row_alternatives).copied().fold(alternative, f64::max);
    let min_real = real.iter().copied().fold(f64::INFINITY, f64::min);
    // Finite stand-in for blocked cells, larger than any feasible total
    let blocked = (max_real + 1.0) * ((n + m) as f64 + 1.0) * 10.0;

    let size = n + m;
    let mut square = DMatrix::from_element(size, size, blocked);
    for r in 0..n {
        for c in 0..m {
            let cost = matrix.costs[(r, c)];
            if cost.is_finite() {
                square[(r, c)] = cost;
                square[(n + c, m + r)] = min_real;
            }
        }
        square[(r, m + r)] = row_alternatives[r];
    }
    for c in 0..m {
        square[(n + c, c)] = alternative;
    }

    let rows = hungarian(&square);
    let assignments: Vec<Assignment> = rows
        .iter()
        .take(family)
        .enumerate()
        .filter_map(|(r, &col)| {
            let c = col?;
            let cost = matrix.costs[(r, c)];
            (c < m && cost.is_finite()).then(|| Assignment {
                source: matrix.sources[r],
                target: matrix.targets[c],
                cost,
            })
        })
        .collect();

    debug!(
        "local assignment {}(+{})x{}: {} links (alternative cost {:.3})",
        family,
        n - family,
        m,
        assignments.len(),
        alternative
    );
    Ok(assignments)
}

/// Minimum-cost perfect matching on a square matrix; row -> column.
fn hungarian(cost: &DMatrix<f64>) -> Vec<Option<usize>> {
    let n = cost.nrows();
    if n == 0 {
        return Vec::new();
    }
    let inf = f64::MAX / 2.0;

    // 1-indexed potentials; column 0 is the dummy source
    let mut u = vec![0.0_f64; n + 1];
    let mut v = vec![0.0_f64; n + 1];
    // p[j]: row matched to column j (0 = free)
    let mut p = vec![0_usize; n + 1];
    let mut way = vec![0_usize; n + 1];

    for i in 1..=n {
        p[0] = i;
        let mut j0 = 0_usize;
        let mut min_val = vec![inf; n + 1];
        let mut used = vec![false; n + 1];

        loop {
            used[j0] = true;
            let i0 = p[j0];
            let mut delta = inf;
            let mut j1 = 0_usize;

            for j in 1..=n {
                if !used[j] {
                    let val = cost[(i0 - 1, j - 1)] - u[i0] - v[j];
                    if val < min_val[j] {
                        min_val[j] = val;
                        way[j] = j0;
                    }
                    if min_val[j] < delta {
                        delta = min_val[j];
                        j1 = j;
                    }
                }
            }

            for j in 0..=n {
                if used[j] {
                    u[p[j]] += delta;
                    v[j] -= delta;
                } else {
                    min_val[j] -= delta;
                }
            }

            j0 = j1;
            if p[j0] == 0 {
                break;
            }
        }

        // Augment along the path
        loop {
            p[j0] = p[way[j0]];
            j0 = way[j0];
            if j0 == 0 {
                break;
            }
        }
    }

    let mut rows = vec![None; n];
    for j in 1..=n {
        if p[j] != 0 {
            rows[p[j] - 1] = Some(j - 1);
        }
    }
    rows
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AssignmentError {
    #[error("Cost matrix shape {got:?} does not match {expected:?}")]
    ShapeMismatch { expected: (usize, usize), got: (usize, usize) },

    #[error("Cost at ({row}, {col}) is NaN")]
    NotANumber { row: usize, col: usize },

    #[error("Cost at ({row}, {col}) is negative: {value}")]
    NegativeCost { row: usize, col: usize, value: f64 },
}

// ============================================================================
// TESTS
// ============================================================================
