//! Rigid groups of variables.
//!
//! A block holds variables at fixed offsets from a shared reference position. The active
//! constraints inside a block always form a spanning tree over its members, which is what the
//! Lagrange multiplier computation and the split routines walk.

use crate::model::{ConstraintId, Problem, VarId};
use rustc_hash::FxHashSet;

/// Handle of a block inside a [`crate::BlockSet`]. Handles are never reused; deleted blocks stay
/// tombstoned in the arena.
#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct BlockId(usize);

impl BlockId {
    pub fn index(self) -> usize {
        self.0
    }

    pub(crate) fn new(ix: usize) -> Self {
        Self(ix)
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "b{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Block {
    pub(crate) id: BlockId,
    pub(crate) vars: Vec<VarId>,
    pub(crate) weight: f64,
    pub(crate) weighted_position: f64,
    pub(crate) position: f64,
    pub(crate) deleted: bool,
    /// Constraints entering the block from another block, built on demand. Entries may go stale
    /// (both ends inside the block after a merge); readers filter them.
    pub(crate) in_cache: Option<Vec<ConstraintId>>,
    pub(crate) out_cache: Option<Vec<ConstraintId>>,
}

/// One node of the active-constraint tree of a block, in discovery order.
#[derive(Debug, Clone, Copy)]
struct TreeNode {
    var: VarId,
    parent: Option<usize>,
    via: Option<ConstraintId>,
    /// `via` is traversed left -> right when walking from the parent to this node.
    forward: bool,
}

impl Block {
    pub(crate) fn new(id: BlockId) -> Self {
        Self {
            id,
            vars: Vec::new(),
            weight: 0.0,
            weighted_position: 0.0,
            position: 0.0,
            deleted: false,
            in_cache: None,
            out_cache: None,
        }
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn vars(&self) -> &[VarId] {
        &self.vars
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn weighted_position(&self) -> f64 {
        self.weighted_position
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Adds `v` keeping its current offset and points its back-reference at this block. The
    /// block position is left untouched; callers place the block afterwards.
    pub(crate) fn add_variable(&mut self, problem: &mut Problem, v: VarId) {
        let var = &mut problem.variables[v.index()];
        var.block = self.id;
        self.weight += var.weight;
        self.vars.push(v);
    }

    /// Weighted position the block would take if none of its boundary constraints applied.
    pub fn desired_weighted_position(&self, problem: &Problem) -> f64 {
        self.vars
            .iter()
            .map(|v| {
                let var = &problem.variables[v.index()];
                (var.desired_position - var.offset) * var.weight
            })
            .sum()
    }

    pub(crate) fn move_to(&mut self, position: f64) {
        self.position = position;
        self.weighted_position = position * self.weight;
    }

    pub(crate) fn move_to_desired(&mut self, problem: &Problem) {
        self.weighted_position = self.desired_weighted_position(problem);
        self.position = self.weighted_position / self.weight;
    }

    pub(crate) fn set_up_in_constraints(&mut self, problem: &Problem) {
        let mut cache = Vec::new();
        for v in &self.vars {
            for &c in &problem.variables[v.index()].ins {
                let left = problem.constraints[c.index()].left;
                if problem.variables[left.index()].block != self.id {
                    cache.push(c);
                }
            }
        }
        self.in_cache = Some(cache);
    }

    pub(crate) fn set_up_out_constraints(&mut self, problem: &Problem) {
        let mut cache = Vec::new();
        for v in &self.vars {
            for &c in &problem.variables[v.index()].outs {
                let right = problem.constraints[c.index()].right;
                if problem.variables[right.index()].block != self.id {
                    cache.push(c);
                }
            }
        }
        self.out_cache = Some(cache);
    }

    /// Walks the active constraints inside the block starting at `root`.
    fn active_tree(&self, problem: &Problem, root: VarId) -> Vec<TreeNode> {
        let mut nodes = vec![TreeNode {
            var: root,
            parent: None,
            via: None,
            forward: false,
        }];
        let mut seen: FxHashSet<VarId> = FxHashSet::default();
        seen.insert(root);

        let mut stack = vec![0usize];
        while let Some(ix) = stack.pop() {
            let var = &problem.variables[nodes[ix].var.index()];
            let outs = var.outs.iter().map(|&c| (c, true));
            let ins = var.ins.iter().map(|&c| (c, false));
            for (c, forward) in outs.chain(ins) {
                let con = &problem.constraints[c.index()];
                if !con.active {
                    continue;
                }
                let next = if forward { con.right } else { con.left };
                if problem.variables[next.index()].block != self.id || !seen.insert(next) {
                    continue;
                }
                nodes.push(TreeNode {
                    var: next,
                    parent: Some(ix),
                    via: Some(c),
                    forward,
                });
                stack.push(nodes.len() - 1);
            }
        }
        nodes
    }

    /// Recomputes the Lagrange multiplier of every active constraint in the block and returns
    /// the non-equality one with the smallest multiplier.
    pub(crate) fn find_min_lm(&self, problem: &mut Problem) -> Option<ConstraintId> {
        let root = *self.vars.first()?;
        let tree = self.active_tree(problem, root);

        // d(cost)/dv accumulated bottom-up over the tree.
        let mut dfdv: Vec<f64> = tree
            .iter()
            .map(|n| {
                let var = &problem.variables[n.var.index()];
                2.0 * var.weight * (self.position + var.offset - var.desired_position)
            })
            .collect();

        let mut min_lm: Option<(ConstraintId, f64)> = None;
        for ix in (1..tree.len()).rev() {
            let node = tree[ix];
            let (Some(parent), Some(c)) = (node.parent, node.via) else {
                continue;
            };
            let lm = if node.forward { dfdv[ix] } else { -dfdv[ix] };
            dfdv[parent] += dfdv[ix];

            let con = &mut problem.constraints[c.index()];
            con.lm = lm;
            if !con.equality && min_lm.is_none_or(|(_, m)| lm < m) {
                min_lm = Some((c, lm));
            }
        }
        min_lm.map(|(c, _)| c)
    }

    /// Picks the constraint to release when a constraint from `lv` to `rv` is violated although
    /// both are in this block: the non-equality active constraint with the smallest multiplier
    /// among those crossed left -> right on the tree path from `lv` to `rv`.
    pub(crate) fn find_min_lm_between(
        &self,
        problem: &mut Problem,
        lv: VarId,
        rv: VarId,
    ) -> Option<ConstraintId> {
        self.find_min_lm(problem);

        let tree = self.active_tree(problem, lv);
        let mut ix = tree.iter().position(|n| n.var == rv)?;

        let mut min_lm: Option<(ConstraintId, f64)> = None;
        while let (Some(parent), Some(c)) = (tree[ix].parent, tree[ix].via) {
            let con = &problem.constraints[c.index()];
            if tree[ix].forward && !con.equality && min_lm.is_none_or(|(_, m)| con.lm < m) {
                min_lm = Some((c, con.lm));
            }
            ix = parent;
        }
        min_lm.map(|(c, _)| c)
    }
}
