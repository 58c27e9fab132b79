//! Batch and incremental drivers over a shared [`BlockSet`].
//!
//! Both modes start from one block per variable. Batch mode builds a feasible placement by
//! merging blocks in constraint order and then refines it by splitting on negative Lagrange
//! multipliers until none are left. Incremental mode keeps its blocks and an explicit list of
//! inactive constraints between `solve` calls, so an outer layout loop can move desired
//! positions and re-solve from the previous block structure.

use crate::EPSILON;
use crate::blocks::BlockSet;
use crate::error::{Error, Result};
use crate::model::{ConstraintId, Problem, VarId};
use crate::trace::{TraceEvent, TraceSink, Tracer};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// One-shot `satisfy` + `refine`.
    #[default]
    Batch,
    /// Warm-startable satisfy/split loop converging on the cost delta.
    Incremental,
}

#[derive(Debug, Clone)]
pub struct SolverOptions {
    /// Upper bound on same-block splits during one incremental `satisfy`. Exceeding it means
    /// the constraint set is cyclic or contradictory.
    pub max_same_block_splits: usize,
    /// Incremental `solve` stops once the cost changes by no more than this between rounds.
    pub cost_tolerance: f64,
    /// Optional cap on incremental rounds. `None` runs until the cost settles.
    pub max_iterations: Option<usize>,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_same_block_splits: 10_000,
            cost_tolerance: 1e-4,
            max_iterations: None,
        }
    }
}

pub struct Solver<'a> {
    problem: &'a mut Problem,
    blocks: BlockSet,
    mode: Mode,
    options: SolverOptions,
    /// Constraints not currently held tight inside a block. Unordered.
    inactive: Vec<ConstraintId>,
    split_count: usize,
    tracer: Tracer<'a>,
}

impl<'a> Solver<'a> {
    pub fn new(problem: &'a mut Problem, mode: Mode) -> Self {
        let blocks = BlockSet::new(problem);
        let inactive = problem.constraint_ids().collect();
        Self {
            problem,
            blocks,
            mode,
            options: SolverOptions::default(),
            inactive,
            split_count: 0,
            tracer: Tracer::default(),
        }
    }

    pub fn batch(problem: &'a mut Problem) -> Self {
        Self::new(problem, Mode::Batch)
    }

    pub fn incremental(problem: &'a mut Problem) -> Self {
        Self::new(problem, Mode::Incremental)
    }

    pub fn with_options(mut self, options: SolverOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_trace(mut self, sink: &'a mut dyn TraceSink) -> Self {
        self.tracer = Tracer::new(Some(sink));
        self
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn options(&self) -> &SolverOptions {
        &self.options
    }

    pub fn problem(&self) -> &Problem {
        self.problem
    }

    pub fn blocks(&self) -> &BlockSet {
        &self.blocks
    }

    pub fn inactive(&self) -> &[ConstraintId] {
        &self.inactive
    }

    /// Number of blocks split by the most recent [`Solver::split_blocks`] pass.
    pub fn split_count(&self) -> usize {
        self.split_count
    }

    /// Updates a desired position between incremental solves. Takes effect at the next block
    /// move.
    pub fn set_desired_position(&mut self, v: VarId, desired_position: f64) {
        self.problem.set_desired_position(v, desired_position);
    }

    /// Adjusts a constraint's gap between incremental solves. An active constraint is released
    /// from its block, positions unchanged, so the next pass re-merges it at the new gap.
    pub fn set_gap(&mut self, c: ConstraintId, gap: f64) {
        self.problem.set_gap(c, gap);
        if !self.problem.constraints[c.index()].active {
            return;
        }
        let lm = self.problem.constraints[c.index()].lm;
        let (left, right) = self.blocks.split(self.problem, c);
        self.tracer.emit(TraceEvent::Split {
            constraint: c,
            lm,
            left,
            right,
        });
        self.blocks.cleanup();
        self.inactive.push(c);
    }

    /// Current position as implied by the block structure.
    pub fn position(&self, v: VarId) -> f64 {
        self.blocks.position(self.problem, v)
    }

    pub fn cost(&self) -> f64 {
        self.blocks.cost(self.problem)
    }

    pub fn solve(&mut self) -> Result<()> {
        match self.mode {
            Mode::Batch => {
                tracing::debug!(
                    variables = self.problem.num_variables(),
                    constraints = self.problem.num_constraints(),
                    "batch solve"
                );
                self.satisfy()?;
                self.refine()
            }
            Mode::Incremental => self.solve_incremental(),
        }
    }

    /// Produces a feasible placement. In batch mode this merges blocks left to right in
    /// constraint order; in incremental mode it first splits, then repeatedly merges across the
    /// most violated inactive constraint.
    pub fn satisfy(&mut self) -> Result<()> {
        match self.mode {
            Mode::Batch => self.satisfy_batch(),
            Mode::Incremental => self.satisfy_incremental(),
        }
    }

    fn satisfy_batch(&mut self) -> Result<()> {
        let order = self.blocks.total_order(self.problem);
        for v in order {
            let b = self.problem.variables[v.index()].block;
            if !self.blocks.block(b).is_deleted() {
                self.blocks.merge_left(self.problem, b, &mut self.tracer);
            }
        }
        self.blocks.cleanup();
        // Forced equality merges can push an already placed block past one of its outgoing
        // constraints.
        self.collect_inactive();
        self.resolve_violations()?;
        self.blocks.write_positions(self.problem);
        self.verify()
    }

    /// Splits blocks on negative multipliers until every active constraint has a non-negative
    /// one, which makes the feasible placement optimal.
    pub fn refine(&mut self) -> Result<()> {
        'restart: loop {
            let ids = self.blocks.ids();
            for &b in &ids {
                let block = self.blocks.block_mut(b);
                block.set_up_in_constraints(self.problem);
                block.set_up_out_constraints(self.problem);
            }
            for &b in &ids {
                let Some(c) = self.blocks.find_min_lm(self.problem, b) else {
                    continue;
                };
                if self.problem.constraints[c.index()].lm < -EPSILON {
                    self.blocks
                        .split_and_rebalance(self.problem, c, &mut self.tracer);
                    self.blocks.cleanup();
                    self.collect_inactive();
                    self.resolve_violations()?;
                    // The block set changed under us.
                    continue 'restart;
                }
            }
            break;
        }
        self.blocks.write_positions(self.problem);
        self.verify()
    }

    /// Rebuilds the inactive list from the constraint flags.
    fn collect_inactive(&mut self) {
        let problem = &*self.problem;
        self.inactive = problem
            .constraint_ids()
            .filter(|&c| !problem.constraints[c.index()].active)
            .collect();
    }

    fn solve_incremental(&mut self) -> Result<()> {
        // Costs are compared at the feasible placement each round ends on.
        let mut last_cost = f64::INFINITY;
        let mut iteration = 0usize;
        loop {
            self.satisfy_incremental()?;
            let cost = self.cost();
            iteration += 1;
            self.tracer.emit(TraceEvent::Iteration { iteration, cost });

            if (last_cost - cost).abs() <= self.options.cost_tolerance {
                break;
            }
            if self.options.max_iterations.is_some_and(|max| iteration >= max) {
                tracing::debug!(iteration, cost, "incremental solve hit the iteration cap");
                break;
            }
            self.split_blocks();
            last_cost = cost;
        }
        self.blocks.write_positions(self.problem);
        Ok(())
    }

    fn satisfy_incremental(&mut self) -> Result<()> {
        self.split_blocks();
        self.resolve_violations()?;
        self.blocks.write_positions(self.problem);
        self.verify()
    }

    /// Merges across the most violated inactive constraint until none is left. A violation
    /// between two members of one block first splits that block on the path between them.
    ///
    /// When nothing on that path may be released the constraint cannot be met: incremental mode
    /// reports the cycle, batch mode leaves it for verification to report.
    fn resolve_violations(&mut self) -> Result<()> {
        let mut same_block_splits = 0usize;
        while let Some((c, slack)) = most_violated(&mut self.inactive, self.problem, &self.blocks)
        {
            self.tracer.emit(TraceEvent::MostViolated {
                constraint: c,
                slack,
            });
            let (lv, rv, equality) = {
                let con = &self.problem.constraints[c.index()];
                (con.left, con.right, con.equality)
            };
            let lb = self.problem.variables[lv.index()].block;
            let rb = self.problem.variables[rv.index()].block;

            if lb != rb {
                let survivor = self.blocks.merge(self.problem, c);
                let absorbed = if survivor == lb { rb } else { lb };
                self.tracer.emit(TraceEvent::Merged {
                    constraint: c,
                    survivor,
                    absorbed,
                });
                continue;
            }

            same_block_splits += 1;
            if same_block_splits > self.options.max_same_block_splits {
                return Err(self.cycle_error(c, same_block_splits));
            }

            let Some((freed, l, r)) = self.blocks.split_between(self.problem, lv, rv) else {
                if equality && slack.abs() <= EPSILON {
                    // Already implied by the equalities holding the block together.
                    continue;
                }
                match self.mode {
                    Mode::Batch => continue,
                    Mode::Incremental => return Err(self.cycle_error(c, same_block_splits)),
                }
            };
            self.tracer.emit(TraceEvent::Split {
                constraint: freed,
                lm: self.problem.constraints[freed.index()].lm,
                left: l,
                right: r,
            });
            self.inactive.push(freed);

            let survivor = self.blocks.merge(self.problem, c);
            let absorbed = if survivor == l { r } else { l };
            self.tracer.emit(TraceEvent::Merged {
                constraint: c,
                survivor,
                absorbed,
            });
        }

        self.blocks.cleanup();
        Ok(())
    }

    /// Moves every block to the position its members' current desired positions imply.
    pub fn move_blocks(&mut self) {
        for b in self.blocks.ids() {
            self.blocks.block_mut(b).move_to_desired(self.problem);
        }
        self.blocks.write_positions(self.problem);
    }

    /// Moves the blocks, then splits each one whose smallest multiplier is negative. Both halves
    /// stay where the block was; the released constraint becomes inactive.
    pub fn split_blocks(&mut self) {
        self.move_blocks();
        self.split_count = 0;
        for b in self.blocks.ids() {
            let Some(c) = self.blocks.find_min_lm(self.problem, b) else {
                continue;
            };
            let lm = self.problem.constraints[c.index()].lm;
            if lm < -EPSILON {
                self.split_count += 1;
                let (left, right) = self.blocks.split(self.problem, c);
                self.tracer.emit(TraceEvent::Split {
                    constraint: c,
                    lm,
                    left,
                    right,
                });
                self.inactive.push(c);
            }
        }
        self.blocks.cleanup();
        self.blocks.write_positions(self.problem);
    }

    /// Checks every constraint against the current positions.
    fn verify(&mut self) -> Result<()> {
        for c in self.problem.constraint_ids() {
            let slack = self.blocks.slack(self.problem, c);
            let con = &self.problem.constraints[c.index()];
            if slack < -EPSILON || (con.equality && slack > EPSILON) {
                let err = Error::Infeasible {
                    constraint: c,
                    left: self.problem.left_id(c),
                    right: self.problem.right_id(c),
                    gap: con.gap,
                    slack,
                };
                self.tracer.emit(TraceEvent::Unsatisfied {
                    constraint: c,
                    slack,
                });
                tracing::warn!(%err, "solve failed verification");
                return Err(err);
            }
        }
        Ok(())
    }

    fn cycle_error(&self, c: ConstraintId, splits: usize) -> Error {
        Error::CycleGuardTripped {
            constraint: c,
            left: self.problem.left_id(c),
            right: self.problem.right_id(c),
            splits,
        }
    }
}

/// Removes and returns the next constraint to resolve from `list`: the first equality
/// constraint in scan order if there is one, otherwise the constraint with the least slack
/// provided that slack is below `-EPSILON`. Removal swaps the last element into the hole.
pub(crate) fn most_violated(
    list: &mut Vec<ConstraintId>,
    problem: &Problem,
    blocks: &BlockSet,
) -> Option<(ConstraintId, f64)> {
    let mut min_slack = f64::MAX;
    let mut chosen: Option<usize> = None;
    let mut equality = false;
    for (ix, &c) in list.iter().enumerate() {
        let slack = blocks.slack(problem, c);
        let is_equality = problem.constraints[c.index()].equality;
        if is_equality || slack < min_slack {
            min_slack = slack;
            chosen = Some(ix);
            if is_equality {
                equality = true;
                break;
            }
        }
    }

    let ix = chosen?;
    if !equality && min_slack >= -EPSILON {
        return None;
    }
    Some((list.swap_remove(ix), min_slack))
}
