//! Optional, injected diagnostics for solver runs.
//!
//! Nothing here is global: a solver only reports to the sink it was handed via
//! [`crate::Solver::with_trace`].

use crate::block::BlockId;
use crate::model::ConstraintId;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TraceEvent {
    /// `absorbed` was merged into `survivor` across `constraint`, which is now active.
    Merged {
        constraint: ConstraintId,
        survivor: BlockId,
        absorbed: BlockId,
    },
    /// A block was split on `constraint`, which is now inactive.
    Split {
        constraint: ConstraintId,
        lm: f64,
        left: BlockId,
        right: BlockId,
    },
    /// The incremental scan picked `constraint` for resolution.
    MostViolated { constraint: ConstraintId, slack: f64 },
    /// One satisfy/split round of the incremental solve finished.
    Iteration { iteration: usize, cost: f64 },
    /// Post-solve verification found `constraint` violated.
    Unsatisfied { constraint: ConstraintId, slack: f64 },
}

pub trait TraceSink {
    fn event(&mut self, event: &TraceEvent);
}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TraceSink for TracingSink {
    fn event(&mut self, event: &TraceEvent) {
        match *event {
            TraceEvent::Merged {
                constraint,
                survivor,
                absorbed,
            } => tracing::trace!(%constraint, %survivor, %absorbed, "merge"),
            TraceEvent::Split {
                constraint,
                lm,
                left,
                right,
            } => tracing::trace!(%constraint, lm, %left, %right, "split"),
            TraceEvent::MostViolated { constraint, slack } => {
                tracing::trace!(%constraint, slack, "most violated")
            }
            TraceEvent::Iteration { iteration, cost } => {
                tracing::debug!(iteration, cost, "incremental iteration")
            }
            TraceEvent::Unsatisfied { constraint, slack } => {
                tracing::warn!(%constraint, slack, "unsatisfied constraint")
            }
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    pub events: Vec<TraceEvent>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Costs reported by the incremental solve, in order.
    pub fn iteration_costs(&self) -> Vec<f64> {
        self.events
            .iter()
            .filter_map(|e| match e {
                TraceEvent::Iteration { cost, .. } => Some(*cost),
                _ => None,
            })
            .collect()
    }

    pub fn count_splits(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, TraceEvent::Split { .. }))
            .count()
    }

    pub fn count_merges(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, TraceEvent::Merged { .. }))
            .count()
    }
}

impl TraceSink for RecordingSink {
    fn event(&mut self, event: &TraceEvent) {
        self.events.push(*event);
    }
}

/// The solver-side handle to an optional sink.
#[derive(Default)]
pub(crate) struct Tracer<'a> {
    sink: Option<&'a mut dyn TraceSink>,
}

impl<'a> Tracer<'a> {
    pub(crate) fn new(sink: Option<&'a mut dyn TraceSink>) -> Self {
        Self { sink }
    }

    pub(crate) fn emit(&mut self, event: TraceEvent) {
        if let Some(sink) = self.sink.as_deref_mut() {
            sink.event(&event);
        }
    }
}
