use crate::model::ConstraintId;

/// Fatal solver failures. Both are deterministic for a given input, so retrying the same call
/// cannot succeed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error(
        "unsatisfied constraint {constraint}: v{left} + {gap} <= v{right} (slack {slack})"
    )]
    Infeasible {
        constraint: ConstraintId,
        left: usize,
        right: usize,
        gap: f64,
        slack: f64,
    },

    #[error(
        "constraint cycle while resolving {constraint} between v{left} and v{right} (after {splits} same-block splits)"
    )]
    CycleGuardTripped {
        constraint: ConstraintId,
        left: usize,
        right: usize,
        splits: usize,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
