//! Caller-owned problem data: variables, separation constraints and the arena that holds them.
//!
//! Variables and constraints are addressed by stable integer handles. A `Problem` outlives any
//! solver built over it; the solver borrows it mutably for its whole lifetime and only rewrites
//! the bookkeeping fields (block membership, offsets, activity, multipliers, solved positions).

use crate::block::BlockId;
use std::fmt;

/// Handle of a variable inside a [`Problem`].
#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct VarId(usize);

impl VarId {
    pub fn new(ix: usize) -> Self {
        Self(ix)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

impl From<usize> for VarId {
    fn from(ix: usize) -> Self {
        Self(ix)
    }
}

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Handle of a constraint inside a [`Problem`].
#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ConstraintId(usize);

impl ConstraintId {
    pub fn new(ix: usize) -> Self {
        Self(ix)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

impl From<usize> for ConstraintId {
    fn from(ix: usize) -> Self {
        Self(ix)
    }
}

impl fmt::Display for ConstraintId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// A scalar unknown with a preferred value.
#[derive(Debug, Clone)]
pub struct Variable {
    /// Caller-chosen label, reported back in errors and trace output.
    pub id: usize,
    pub desired_position: f64,
    /// Strictly positive.
    pub weight: f64,
    pub(crate) position: f64,
    /// Offset from the owning block's reference position. Fixed while the variable stays in
    /// the block.
    pub(crate) offset: f64,
    pub(crate) block: BlockId,
    pub(crate) ins: Vec<ConstraintId>,
    pub(crate) outs: Vec<ConstraintId>,
}

impl Variable {
    fn new(id: usize, desired_position: f64, weight: f64) -> Self {
        Self {
            id,
            desired_position,
            weight,
            position: desired_position,
            offset: 0.0,
            block: BlockId::default(),
            ins: Vec::new(),
            outs: Vec::new(),
        }
    }

    /// The most recently solved position (the desired position before any solve).
    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn offset_in_block(&self) -> f64 {
        self.offset
    }

    /// Constraints that have this variable on their right-hand side.
    pub fn in_constraints(&self) -> &[ConstraintId] {
        &self.ins
    }

    /// Constraints that have this variable on their left-hand side.
    pub fn out_constraints(&self) -> &[ConstraintId] {
        &self.outs
    }
}

/// `right - left >= gap`, or `right - left == gap` for equality constraints.
#[derive(Debug, Clone)]
pub struct Constraint {
    pub(crate) left: VarId,
    pub(crate) right: VarId,
    pub(crate) gap: f64,
    pub(crate) equality: bool,
    pub(crate) active: bool,
    pub(crate) lm: f64,
}

impl Constraint {
    pub fn left(&self) -> VarId {
        self.left
    }

    pub fn right(&self) -> VarId {
        self.right
    }

    pub fn gap(&self) -> f64 {
        self.gap
    }

    pub fn is_equality(&self) -> bool {
        self.equality
    }

    /// True while the constraint is internal to a block and held tight.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Only meaningful while the constraint is active.
    pub fn lagrange_multiplier(&self) -> f64 {
        self.lm
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = if self.equality { "==" } else { "<=" };
        write!(f, "{}+{}{}{}", self.left, self.gap, op, self.right)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Problem {
    pub(crate) variables: Vec<Variable>,
    pub(crate) constraints: Vec<Constraint>,
}

impl Problem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_variable(&mut self, id: usize, desired_position: f64, weight: f64) -> VarId {
        debug_assert!(weight > 0.0, "variable weight must be positive");
        self.variables
            .push(Variable::new(id, desired_position, weight));
        VarId(self.variables.len() - 1)
    }

    /// Adds `right >= left + gap`.
    pub fn add_constraint(&mut self, left: VarId, right: VarId, gap: f64) -> ConstraintId {
        self.push_constraint(left, right, gap, false)
    }

    /// Adds `right == left + gap`.
    pub fn add_equality(&mut self, left: VarId, right: VarId, gap: f64) -> ConstraintId {
        self.push_constraint(left, right, gap, true)
    }

    fn push_constraint(
        &mut self,
        left: VarId,
        right: VarId,
        gap: f64,
        equality: bool,
    ) -> ConstraintId {
        let c = ConstraintId(self.constraints.len());
        self.constraints.push(Constraint {
            left,
            right,
            gap,
            equality,
            active: false,
            lm: 0.0,
        });
        self.variables[left.0].outs.push(c);
        self.variables[right.0].ins.push(c);
        c
    }

    pub fn num_variables(&self) -> usize {
        self.variables.len()
    }

    pub fn num_constraints(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn variable(&self, v: VarId) -> &Variable {
        &self.variables[v.0]
    }

    pub fn constraint(&self, c: ConstraintId) -> &Constraint {
        &self.constraints[c.0]
    }

    pub fn var_ids(&self) -> impl Iterator<Item = VarId> + use<> {
        (0..self.variables.len()).map(VarId)
    }

    pub fn constraint_ids(&self) -> impl Iterator<Item = ConstraintId> + use<> {
        (0..self.constraints.len()).map(ConstraintId)
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn desired_position(&self, v: VarId) -> f64 {
        self.variables[v.0].desired_position
    }

    pub fn set_desired_position(&mut self, v: VarId, desired_position: f64) {
        self.variables[v.0].desired_position = desired_position;
    }

    pub fn position(&self, v: VarId) -> f64 {
        self.variables[v.0].position
    }

    /// Solved positions in variable order.
    pub fn positions(&self) -> Vec<f64> {
        self.variables.iter().map(|v| v.position).collect()
    }

    pub fn gap(&self, c: ConstraintId) -> f64 {
        self.constraints[c.0].gap
    }

    pub fn set_gap(&mut self, c: ConstraintId, gap: f64) {
        self.constraints[c.0].gap = gap;
    }

    /// Caller id of the left endpoint.
    pub fn left_id(&self, c: ConstraintId) -> usize {
        self.variables[self.constraints[c.0].left.0].id
    }

    /// Caller id of the right endpoint.
    pub fn right_id(&self, c: ConstraintId) -> usize {
        self.variables[self.constraints[c.0].right.0].id
    }

    /// Slack against the last solved positions.
    pub fn slack(&self, c: ConstraintId) -> f64 {
        let c = &self.constraints[c.0];
        self.variables[c.right.0].position - self.variables[c.left.0].position - c.gap
    }

    /// Sum of `weight * (position - desired)^2` over the last solved positions.
    pub fn cost(&self) -> f64 {
        self.variables
            .iter()
            .map(|v| {
                let d = v.position - v.desired_position;
                v.weight * d * d
            })
            .sum()
    }

    /// Redirects every constraint ending at `u` so that it ends at `v` instead, shifting each gap
    /// by `dgap`.
    ///
    /// Used when two variables are coalesced before solving: constraints are moved onto the
    /// survivor and the offset between the two is folded into the gaps.
    pub fn remap_in_constraints(&mut self, u: VarId, v: VarId, dgap: f64) {
        let moved = std::mem::take(&mut self.variables[u.0].ins);
        for &c in &moved {
            let con = &mut self.constraints[c.0];
            con.right = v;
            con.gap += dgap;
        }
        self.variables[v.0].ins.extend(moved);
    }

    /// Redirects every constraint starting at `u` so that it starts at `v` instead, shifting each
    /// gap by `dgap`.
    pub fn remap_out_constraints(&mut self, u: VarId, v: VarId, dgap: f64) {
        let moved = std::mem::take(&mut self.variables[u.0].outs);
        for &c in &moved {
            let con = &mut self.constraints[c.0];
            con.left = v;
            con.gap += dgap;
        }
        self.variables[v.0].outs.extend(moved);
    }

    /// True if the directed left -> right constraint graph has a cycle. The solvers require an
    /// acyclic graph.
    pub fn constraint_graph_is_cyclic(&self) -> bool {
        let mut in_degree: Vec<usize> = self.variables.iter().map(|v| v.ins.len()).collect();
        let mut ready: Vec<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(ix, _)| ix)
            .collect();

        let mut removed = 0usize;
        while let Some(ix) = ready.pop() {
            removed += 1;
            for c in &self.variables[ix].outs {
                let r = self.constraints[c.0].right.0;
                in_degree[r] -= 1;
                if in_degree[r] == 0 {
                    ready.push(r);
                }
            }
        }
        removed != self.variables.len()
    }
}
