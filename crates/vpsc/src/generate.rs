//! Separation constraints from axis-aligned rectangles.
//!
//! Overlap removal runs one axis at a time: for the X pass every pair of rectangles that
//! overlaps vertically must be pushed apart horizontally by the sum of their half widths, and
//! symmetrically for the Y pass.

use crate::EPSILON;
use crate::model::{Problem, VarId};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rectangle {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl Rectangle {
    pub fn new(min_x: f64, max_x: f64, min_y: f64, max_y: f64) -> Self {
        Self {
            min_x,
            max_x,
            min_y,
            max_y,
        }
    }

    /// Rectangle of the given size centred on `(cx, cy)`.
    pub fn from_center(cx: f64, cy: f64, width: f64, height: f64) -> Self {
        Self::new(
            cx - width / 2.0,
            cx + width / 2.0,
            cy - height / 2.0,
            cy + height / 2.0,
        )
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn center_x(&self) -> f64 {
        (self.min_x + self.max_x) / 2.0
    }

    pub fn center_y(&self) -> f64 {
        (self.min_y + self.max_y) / 2.0
    }

    pub fn center(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.center_x(),
            Axis::Y => self.center_y(),
        }
    }

    pub fn extent(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.width(),
            Axis::Y => self.height(),
        }
    }

    /// Length of the overlap of the two projections onto `axis` (negative when disjoint).
    pub fn overlap(&self, other: &Rectangle, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.max_x.min(other.max_x) - self.min_x.max(other.min_x),
            Axis::Y => self.max_y.min(other.max_y) - self.min_y.max(other.min_y),
        }
    }

    /// Returns a copy moved so that its centre along `axis` is `center`.
    pub fn moved_to(&self, axis: Axis, center: f64) -> Rectangle {
        let d = center - self.center(axis);
        match axis {
            Axis::X => Rectangle::new(self.min_x + d, self.max_x + d, self.min_y, self.max_y),
            Axis::Y => Rectangle::new(self.min_x, self.max_x, self.min_y + d, self.max_y + d),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    #[default]
    X,
    Y,
}

impl Axis {
    pub fn other(self) -> Axis {
        match self {
            Axis::X => Axis::Y,
            Axis::Y => Axis::X,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Drop constraints implied by a chain of two others.
    pub transitive_reduction: bool,
}

/// `rects[right].center - rects[left].center >= gap` along the generating axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Separation {
    pub left: usize,
    pub right: usize,
    pub gap: f64,
}

/// Separation constraints keeping every pair of rectangles that overlaps on the other axis
/// apart along `axis`. Output is ordered by `(left, right)` index.
pub fn separation_constraints(
    rects: &[Rectangle],
    axis: Axis,
    options: &GenerateOptions,
) -> Vec<Separation> {
    let mut out = Vec::new();
    for i in 0..rects.len() {
        for j in (i + 1)..rects.len() {
            let (a, b) = (&rects[i], &rects[j]);
            if a.overlap(b, axis.other()) <= EPSILON {
                continue;
            }
            let gap = (a.extent(axis) + b.extent(axis)) / 2.0;
            let (left, right) = if b.center(axis) < a.center(axis) {
                (j, i)
            } else {
                (i, j)
            };
            out.push(Separation { left, right, gap });
        }
    }

    if options.transitive_reduction {
        out = transitive_reduction(out);
    }
    out.sort_by_key(|s| (s.left, s.right));
    out
}

/// Removes `a -> c` whenever some `a -> b -> c` forces at least the same separation.
///
/// Every edge goes from a smaller to a larger `(center, index)` key, so an edge is only ever
/// dropped in favour of two edges spanning strictly less of that order. By induction each
/// dropped edge stays implied by the kept ones.
fn transitive_reduction(seps: Vec<Separation>) -> Vec<Separation> {
    let gaps: FxHashMap<(usize, usize), f64> =
        seps.iter().map(|s| ((s.left, s.right), s.gap)).collect();
    let mut succ: FxHashMap<usize, Vec<usize>> = FxHashMap::default();
    for s in &seps {
        succ.entry(s.left).or_default().push(s.right);
    }

    let mut implied: FxHashSet<(usize, usize)> = FxHashSet::default();
    for s in &seps {
        let Some(mids) = succ.get(&s.left) else {
            continue;
        };
        for &b in mids {
            if b == s.right {
                continue;
            }
            let (Some(ab), Some(bc)) = (gaps.get(&(s.left, b)), gaps.get(&(b, s.right))) else {
                continue;
            };
            if ab + bc >= s.gap {
                implied.insert((s.left, s.right));
                break;
            }
        }
    }

    if !implied.is_empty() {
        tracing::debug!(dropped = implied.len(), "transitive reduction");
    }
    seps.into_iter()
        .filter(|s| !implied.contains(&(s.left, s.right)))
        .collect()
}

impl Problem {
    /// One unit-weight variable per rectangle (variable `i` has caller id `i` and handle
    /// `VarId::new(i)`) desiring its current centre along `axis`, plus the separation
    /// constraints for that axis.
    pub fn from_rectangles(rects: &[Rectangle], axis: Axis, options: &GenerateOptions) -> Self {
        let mut problem = Problem::new();
        let vars: Vec<VarId> = rects
            .iter()
            .enumerate()
            .map(|(ix, r)| problem.add_variable(ix, r.center(axis), 1.0))
            .collect();
        for s in separation_constraints(rects, axis, options) {
            problem.add_constraint(vars[s.left], vars[s.right], s.gap);
        }
        problem
    }
}
