//! The live set of blocks and the operations that move variables between them.

use crate::block::{Block, BlockId};
use crate::model::{Constraint, ConstraintId, Problem, VarId};
use crate::trace::{TraceEvent, Tracer};
use rustc_hash::FxHashMap;

/// Arena of blocks. Merged-away and split blocks are tombstoned in place and dropped from the
/// live list by [`BlockSet::cleanup`]; their handles are never reused.
#[derive(Debug, Clone, Default)]
pub struct BlockSet {
    arena: Vec<Block>,
    live: Vec<BlockId>,
}

impl BlockSet {
    /// One block per variable, each at its variable's desired position. Resets every
    /// constraint to inactive.
    pub fn new(problem: &mut Problem) -> Self {
        let mut set = Self {
            arena: Vec::with_capacity(problem.variables.len()),
            live: Vec::with_capacity(problem.variables.len()),
        };
        for v in problem.var_ids() {
            problem.variables[v.index()].offset = 0.0;
            let id = set.alloc();
            let block = &mut set.arena[id.index()];
            block.add_variable(problem, v);
            block.move_to_desired(problem);
        }
        for c in &mut problem.constraints {
            c.active = false;
            c.lm = 0.0;
        }
        set
    }

    fn alloc(&mut self) -> BlockId {
        let id = BlockId::new(self.arena.len());
        self.arena.push(Block::new(id));
        self.live.push(id);
        id
    }

    /// Number of live blocks. Blocks merged away or split since the last
    /// [`BlockSet::cleanup`] are still counted; every solver pass cleans up before returning.
    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Block> {
        self.live
            .iter()
            .map(|b| &self.arena[b.index()])
            .filter(|b| !b.deleted)
    }

    /// Snapshot of the live handles, for passes that add or delete blocks while iterating.
    pub fn ids(&self) -> Vec<BlockId> {
        self.iter().map(|b| b.id).collect()
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.arena[id.index()]
    }

    pub(crate) fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.arena[id.index()]
    }

    pub fn position(&self, problem: &Problem, v: VarId) -> f64 {
        let var = &problem.variables[v.index()];
        self.arena[var.block.index()].position + var.offset
    }

    pub fn slack(&self, problem: &Problem, c: ConstraintId) -> f64 {
        let con = &problem.constraints[c.index()];
        self.position(problem, con.right) - self.position(problem, con.left) - con.gap
    }

    /// Weighted squared deviation of every variable from its desired position.
    pub fn cost(&self, problem: &Problem) -> f64 {
        problem
            .var_ids()
            .map(|v| {
                let var = &problem.variables[v.index()];
                let d = self.position(problem, v) - var.desired_position;
                var.weight * d * d
            })
            .sum()
    }

    /// Copies the block-derived positions into the variables.
    pub(crate) fn write_positions(&self, problem: &mut Problem) {
        for v in problem.var_ids() {
            let pos = self.position(problem, v);
            problem.variables[v.index()].position = pos;
        }
    }

    pub fn cleanup(&mut self) {
        let arena = &self.arena;
        self.live.retain(|b| !arena[b.index()].deleted);
    }

    /// Variables in an order consistent with the constraint DAG (reverse post-order of a DFS
    /// started from every variable without incoming constraints).
    pub fn total_order(&self, problem: &Problem) -> Vec<VarId> {
        let n = problem.variables.len();
        let mut visited = vec![false; n];
        let mut order: Vec<VarId> = Vec::with_capacity(n);

        // Sources first; anything left unvisited afterwards sits on a cycle and is appended so
        // that verification can report it.
        let sources = problem
            .var_ids()
            .filter(|v| problem.variables[v.index()].ins.is_empty());
        let roots: Vec<VarId> = sources.chain(problem.var_ids()).collect();

        let mut stack: Vec<(VarId, usize)> = Vec::new();
        for root in roots {
            if visited[root.index()] {
                continue;
            }
            visited[root.index()] = true;
            stack.push((root, 0));

            while let Some(frame) = stack.last_mut() {
                let v = frame.0;
                match problem.variables[v.index()].outs.get(frame.1) {
                    Some(&c) => {
                        frame.1 += 1;
                        let r = problem.constraints[c.index()].right;
                        if !visited[r.index()] {
                            visited[r.index()] = true;
                            stack.push((r, 0));
                        }
                    }
                    None => {
                        order.push(v);
                        stack.pop();
                    }
                }
            }
        }

        order.reverse();
        order
    }

    /// Merges the blocks on either side of `c` so that `c` becomes active and exactly tight.
    /// The block with more variables absorbs the other. Returns the surviving block.
    pub(crate) fn merge(&mut self, problem: &mut Problem, c: ConstraintId) -> BlockId {
        let (lv, rv, gap) = {
            let con = &problem.constraints[c.index()];
            (con.left, con.right, con.gap)
        };
        let lb = problem.variables[lv.index()].block;
        let rb = problem.variables[rv.index()].block;
        debug_assert_ne!(lb, rb, "merge across a constraint internal to a block");

        let left_offset = problem.variables[lv.index()].offset;
        let right_offset = problem.variables[rv.index()].offset;
        let (survivor, absorbed, shift) =
            if self.arena[lb.index()].vars.len() < self.arena[rb.index()].vars.len() {
                (rb, lb, right_offset - gap - left_offset)
            } else {
                (lb, rb, left_offset + gap - right_offset)
            };

        problem.constraints[c.index()].active = true;

        let (vars, in_cache, out_cache, weight, weighted_position) = {
            let b = &mut self.arena[absorbed.index()];
            b.deleted = true;
            (
                std::mem::take(&mut b.vars),
                b.in_cache.take(),
                b.out_cache.take(),
                b.weight,
                b.weighted_position,
            )
        };

        for &v in &vars {
            let var = &mut problem.variables[v.index()];
            var.offset += shift;
            var.block = survivor;
        }

        let s = &mut self.arena[survivor.index()];
        s.weighted_position += weighted_position - shift * weight;
        s.weight += weight;
        s.position = s.weighted_position / s.weight;
        s.vars.extend(vars);
        s.in_cache = match (s.in_cache.take(), in_cache) {
            (Some(mut a), Some(b)) => {
                a.extend(b);
                Some(a)
            }
            _ => None,
        };
        s.out_cache = match (s.out_cache.take(), out_cache) {
            (Some(mut a), Some(b)) => {
                a.extend(b);
                Some(a)
            }
            _ => None,
        };
        survivor
    }

    /// Picks the incoming boundary constraint to resolve next: the first equality found, else
    /// the one with the least slack.
    fn find_min_in_constraint(&mut self, problem: &Problem, b: BlockId) -> Option<ConstraintId> {
        if self.arena[b.index()].in_cache.is_none() {
            self.arena[b.index()].set_up_in_constraints(problem);
        }
        let cache = self.arena[b.index()].in_cache.as_deref().unwrap_or_default();
        self.pick_boundary(problem, cache, |con| con.left, b)
    }

    fn find_min_out_constraint(&mut self, problem: &Problem, b: BlockId) -> Option<ConstraintId> {
        if self.arena[b.index()].out_cache.is_none() {
            self.arena[b.index()].set_up_out_constraints(problem);
        }
        let cache = self.arena[b.index()].out_cache.as_deref().unwrap_or_default();
        self.pick_boundary(problem, cache, |con| con.right, b)
    }

    fn pick_boundary(
        &self,
        problem: &Problem,
        cache: &[ConstraintId],
        far_end: impl Fn(&Constraint) -> VarId,
        b: BlockId,
    ) -> Option<ConstraintId> {
        let mut best: Option<(ConstraintId, f64)> = None;
        for &c in cache {
            let con = &problem.constraints[c.index()];
            if problem.variables[far_end(con).index()].block == b {
                continue;
            }
            if con.equality {
                return Some(c);
            }
            let slack = self.slack(problem, c);
            if best.is_none_or(|(_, s)| slack < s) {
                best = Some((c, slack));
            }
        }
        best.map(|(c, _)| c)
    }

    fn needs_merge(&self, problem: &Problem, c: ConstraintId) -> bool {
        problem.constraints[c.index()].equality || self.slack(problem, c) < 0.0
    }

    /// Repeatedly absorbs the block across the most violated incoming constraint until every
    /// incoming constraint of `b` holds.
    pub(crate) fn merge_left(&mut self, problem: &mut Problem, b: BlockId, tracer: &mut Tracer<'_>) {
        let mut r = b;
        self.arena[r.index()].set_up_in_constraints(problem);
        while let Some(c) = self.find_min_in_constraint(problem, r) {
            if !self.needs_merge(problem, c) {
                break;
            }
            let l = problem.variables[problem.constraints[c.index()].left.index()].block;
            if self.arena[l.index()].in_cache.is_none() {
                self.arena[l.index()].set_up_in_constraints(problem);
            }
            let survivor = self.merge(problem, c);
            let absorbed = if survivor == r { l } else { r };
            tracer.emit(TraceEvent::Merged {
                constraint: c,
                survivor,
                absorbed,
            });
            r = survivor;
        }
    }

    /// Mirror of [`BlockSet::merge_left`] over outgoing constraints.
    pub(crate) fn merge_right(&mut self, problem: &mut Problem, b: BlockId, tracer: &mut Tracer<'_>) {
        let mut l = b;
        self.arena[l.index()].set_up_out_constraints(problem);
        while let Some(c) = self.find_min_out_constraint(problem, l) {
            if !self.needs_merge(problem, c) {
                break;
            }
            let r = problem.variables[problem.constraints[c.index()].right.index()].block;
            if self.arena[r.index()].out_cache.is_none() {
                self.arena[r.index()].set_up_out_constraints(problem);
            }
            let survivor = self.merge(problem, c);
            let absorbed = if survivor == l { r } else { l };
            tracer.emit(TraceEvent::Merged {
                constraint: c,
                survivor,
                absorbed,
            });
            l = survivor;
        }
    }

    /// Splits the block containing the active constraint `c` into the part reachable from
    /// `c.left` and the part reachable from `c.right` over the remaining active constraints.
    /// Both halves keep the old block position, so no variable moves.
    pub(crate) fn split(&mut self, problem: &mut Problem, c: ConstraintId) -> (BlockId, BlockId) {
        let (lv, rv) = {
            let con = &mut problem.constraints[c.index()];
            con.active = false;
            (con.left, con.right)
        };
        let old = problem.variables[lv.index()].block;
        debug_assert_eq!(old, problem.variables[rv.index()].block);

        let position = self.arena[old.index()].position;
        let l = self.populate_split_block(problem, old, lv, position);
        let r = self.populate_split_block(problem, old, rv, position);
        self.arena[old.index()].deleted = true;
        (l, r)
    }

    fn populate_split_block(
        &mut self,
        problem: &mut Problem,
        old: BlockId,
        start: VarId,
        position: f64,
    ) -> BlockId {
        let id = self.alloc();
        let block = &mut self.arena[id.index()];
        block.add_variable(problem, start);

        let mut stack = vec![start];
        while let Some(v) = stack.pop() {
            let var = &problem.variables[v.index()];
            let neighbours: Vec<VarId> = var
                .outs
                .iter()
                .chain(var.ins.iter())
                .filter_map(|c| {
                    let con = &problem.constraints[c.index()];
                    if !con.active {
                        return None;
                    }
                    let u = if con.left == v { con.right } else { con.left };
                    (problem.variables[u.index()].block == old).then_some(u)
                })
                .collect();
            for u in neighbours {
                // Re-check: `u` may have been reached through another neighbour already.
                if problem.variables[u.index()].block == old {
                    block.add_variable(problem, u);
                    stack.push(u);
                }
            }
        }
        block.move_to(position);
        id
    }

    /// Batch refinement split: splits on `c`, then lets the left half relax towards its desired
    /// position while merging leftwards, and the right half likewise rightwards.
    pub(crate) fn split_and_rebalance(
        &mut self,
        problem: &mut Problem,
        c: ConstraintId,
        tracer: &mut Tracer<'_>,
    ) {
        let lm = problem.constraints[c.index()].lm;
        let (l, r) = self.split(problem, c);
        tracer.emit(TraceEvent::Split {
            constraint: c,
            lm,
            left: l,
            right: r,
        });

        self.arena[l.index()].move_to_desired(problem);
        self.merge_left(problem, l, tracer);

        // The right half may have been absorbed by the left merges.
        let rv = problem.constraints[c.index()].right;
        let r = problem.variables[rv.index()].block;
        self.arena[r.index()].move_to_desired(problem);
        self.merge_right(problem, r, tracer);
    }

    /// Splits the block holding both `lv` and `rv` on an active constraint of the path between
    /// them. Returns the released constraint and the two halves, or `None` when no constraint on
    /// the path may be released.
    pub(crate) fn split_between(
        &mut self,
        problem: &mut Problem,
        lv: VarId,
        rv: VarId,
    ) -> Option<(ConstraintId, BlockId, BlockId)> {
        let b = problem.variables[lv.index()].block;
        let c = self.arena[b.index()].find_min_lm_between(problem, lv, rv)?;
        let (l, r) = self.split(problem, c);
        Some((c, l, r))
    }

    pub(crate) fn find_min_lm(&self, problem: &mut Problem, b: BlockId) -> Option<ConstraintId> {
        self.arena[b.index()].find_min_lm(problem)
    }

    /// True if the graph of live blocks, with an edge for every constraint crossing between two
    /// blocks, has a cycle.
    pub fn block_graph_is_cyclic(&self, problem: &Problem) -> bool {
        let ids = self.ids();
        let node_of: FxHashMap<BlockId, usize> =
            ids.iter().enumerate().map(|(ix, b)| (*b, ix)).collect();

        let mut succ: Vec<Vec<usize>> = vec![Vec::new(); ids.len()];
        let mut in_degree = vec![0usize; ids.len()];
        for con in &problem.constraints {
            let lb = problem.variables[con.left.index()].block;
            let rb = problem.variables[con.right.index()].block;
            if lb == rb {
                continue;
            }
            let (Some(&l), Some(&r)) = (node_of.get(&lb), node_of.get(&rb)) else {
                continue;
            };
            succ[l].push(r);
            in_degree[r] += 1;
        }

        let mut ready: Vec<usize> = (0..ids.len()).filter(|&ix| in_degree[ix] == 0).collect();
        let mut removed = 0usize;
        while let Some(ix) = ready.pop() {
            removed += 1;
            for &r in &succ[ix] {
                in_degree[r] -= 1;
                if in_degree[r] == 0 {
                    ready.push(r);
                }
            }
        }
        removed != ids.len()
    }
}
