#![forbid(unsafe_code)]

//! Variable placement with separation constraints.
//!
//! Solves `min Σ wᵢ (xᵢ - dᵢ)²` subject to `x_r - x_l >= gap` (or `== gap`) for a set of scalar
//! variables, one axis at a time. This is the overlap-removal core used by graph layout passes.
//!
//! ```
//! use vpsc::{Mode, Problem};
//!
//! let mut p = Problem::new();
//! let a = p.add_variable(0, 0.0, 1.0);
//! let b = p.add_variable(1, 0.0, 1.0);
//! p.add_constraint(a, b, 2.0);
//! vpsc::solve(&mut p, Mode::Batch).unwrap();
//! assert_eq!(p.positions(), vec![-1.0, 1.0]);
//! ```

pub mod block;
pub mod blocks;
pub mod error;
pub mod generate;
pub mod model;
pub mod solver;
pub mod trace;

pub use block::{Block, BlockId};
pub use blocks::BlockSet;
pub use error::{Error, Result};
pub use generate::{Axis, GenerateOptions, Rectangle, Separation};
pub use model::{Constraint, ConstraintId, Problem, VarId, Variable};
pub use solver::{Mode, Solver, SolverOptions};
pub use trace::{RecordingSink, TraceEvent, TraceSink, TracingSink};

/// Tolerance for slack and multiplier sign checks.
pub const EPSILON: f64 = 1e-7;

/// One-shot solve with default options. Positions are written back into `problem`.
pub fn solve(problem: &mut Problem, mode: Mode) -> Result<()> {
    Solver::new(problem, mode).solve()
}
