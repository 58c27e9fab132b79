#![allow(dead_code)]

use nalgebra::{DMatrix, DVector};
use vpsc::{ConstraintId, Problem, VarId};

pub const TOL: f64 = 1e-6;

pub fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() <= TOL,
        "expected {expected}, got {actual}"
    );
}

pub fn assert_positions(problem: &Problem, expected: &[f64]) {
    let got = problem.positions();
    assert_eq!(got.len(), expected.len());
    for (g, e) in got.iter().zip(expected) {
        assert!((g - e).abs() <= TOL, "expected {expected:?}, got {got:?}");
    }
}

pub fn assert_feasible(problem: &Problem) {
    for c in problem.constraint_ids() {
        let slack = problem.slack(c);
        let con = problem.constraint(c);
        assert!(slack >= -vpsc::EPSILON * 10.0, "{con} violated: slack {slack}");
        if con.is_equality() {
            assert!(slack.abs() <= vpsc::EPSILON * 10.0, "{con} not tight: slack {slack}");
        }
    }
}

/// Deterministic xorshift64* stream for reproducible instances.
pub struct XorShift64Star {
    state: u64,
}

impl XorShift64Star {
    pub fn new(seed: u64) -> Self {
        Self { state: seed.max(1) }
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545F4914F6CDD1D_u64)
    }

    /// Uniform in `[0, 1)`.
    pub fn next_f64_unit(&mut self) -> f64 {
        let u = self.next_u64() >> 11;
        (u as f64) / ((1u64 << 53) as f64)
    }

    pub fn range(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.next_f64_unit()
    }

    pub fn next_usize(&mut self, upper: usize) -> usize {
        if upper <= 1 {
            return 0;
        }
        (self.next_u64() % upper as u64) as usize
    }
}

/// Random acyclic inequality-only instance: every constraint points from a lower to a higher
/// variable index.
pub fn random_dag(rng: &mut XorShift64Star, n: usize, density: f64) -> Problem {
    let mut p = Problem::new();
    let vars: Vec<VarId> = (0..n)
        .map(|i| p.add_variable(i, rng.range(-10.0, 10.0), rng.range(0.5, 3.0)))
        .collect();
    for i in 0..n {
        for j in (i + 1)..n {
            if rng.next_f64_unit() < density {
                p.add_constraint(vars[i], vars[j], rng.range(-1.0, 4.0));
            }
        }
    }
    p
}

/// Like [`random_dag`], but each constraint is an equality with probability `equality`. Such
/// instances may be infeasible; [`brute_force_optimum`] tells which.
pub fn random_mixed(rng: &mut XorShift64Star, n: usize, density: f64, equality: f64) -> Problem {
    let mut p = Problem::new();
    let vars: Vec<VarId> = (0..n)
        .map(|i| p.add_variable(i, rng.range(-10.0, 10.0), rng.range(0.5, 3.0)))
        .collect();
    for i in 0..n {
        for j in (i + 1)..n {
            if rng.next_f64_unit() >= density {
                continue;
            }
            let gap = rng.range(-1.0, 4.0);
            if rng.next_f64_unit() < equality {
                p.add_equality(vars[i], vars[j], gap);
            } else {
                p.add_constraint(vars[i], vars[j], gap);
            }
        }
    }
    p
}

/// Moves every desired position by up to `spread` in either direction.
pub fn jitter_desired(rng: &mut XorShift64Star, desired: &[f64], spread: f64) -> Vec<f64> {
    desired
        .iter()
        .map(|d| d + rng.range(-spread, spread))
        .collect()
}

pub fn assert_optimal(problem: &Problem, best: f64, context: &str) {
    let cost = problem.cost();
    assert!(
        (cost - best).abs() <= 1e-4 * (1.0 + best),
        "{context}: solver cost {cost}, optimum {best}"
    );
}

/// Global optimum by exhaustive active-set search.
///
/// Every subset of the inequality constraints (equalities are always included) is treated as
/// tight and the resulting equality-constrained least squares problem is solved through its KKT
/// system. The cheapest candidate that satisfies all constraints is the optimum, since the true
/// optimum is the solution for its own active set.
pub fn brute_force_optimum(problem: &Problem) -> Option<(Vec<f64>, f64)> {
    let n = problem.num_variables();
    let ids: Vec<ConstraintId> = problem.constraint_ids().collect();
    let (equalities, inequalities): (Vec<ConstraintId>, Vec<ConstraintId>) = ids
        .iter()
        .copied()
        .partition(|&c| problem.constraint(c).is_equality());
    assert!(inequalities.len() <= 16, "instance too large for brute force");

    let mut best: Option<(Vec<f64>, f64)> = None;
    for mask in 0u32..(1u32 << inequalities.len()) {
        let mut active = equalities.clone();
        for (bit, &c) in inequalities.iter().enumerate() {
            if mask & (1 << bit) != 0 {
                active.push(c);
            }
        }

        let k = n + active.len();
        let mut kkt = DMatrix::<f64>::zeros(k, k);
        let mut rhs = DVector::<f64>::zeros(k);
        for (i, v) in problem.variables().iter().enumerate() {
            kkt[(i, i)] = 2.0 * v.weight;
            rhs[i] = 2.0 * v.weight * v.desired_position;
        }
        for (row, &c) in active.iter().enumerate() {
            let con = problem.constraint(c);
            let (l, r) = (con.left().index(), con.right().index());
            kkt[(n + row, l)] = -1.0;
            kkt[(n + row, r)] = 1.0;
            kkt[(l, n + row)] = -1.0;
            kkt[(r, n + row)] = 1.0;
            rhs[n + row] = con.gap();
        }

        let Some(sol) = kkt.lu().solve(&rhs) else {
            continue;
        };
        let x: Vec<f64> = (0..n).map(|i| sol[i]).collect();
        if x.iter().any(|v| !v.is_finite()) {
            continue;
        }
        let feasible = problem.constraint_ids().all(|c| {
            let con = problem.constraint(c);
            let slack = x[con.right().index()] - x[con.left().index()] - con.gap();
            slack >= -TOL && (!con.is_equality() || slack.abs() <= TOL)
        });
        if !feasible {
            continue;
        }
        let cost: f64 = problem
            .variables()
            .iter()
            .zip(&x)
            .map(|(v, p)| v.weight * (p - v.desired_position).powi(2))
            .sum();
        if best.as_ref().is_none_or(|(_, c)| cost < *c) {
            best = Some((x, cost));
        }
    }
    best
}
