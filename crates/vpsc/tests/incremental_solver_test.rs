mod common;

use common::{XorShift64Star, assert_close, assert_feasible, assert_optimal, assert_positions};
use vpsc::{Error, Mode, Problem, RecordingSink, Solver, SolverOptions, TraceEvent};

fn chain_with_shortcut() -> (Problem, [vpsc::ConstraintId; 3]) {
    let mut p = Problem::new();
    let a = p.add_variable(0, 0.0, 1.0);
    let b = p.add_variable(1, 0.0, 1.0);
    let c = p.add_variable(2, 0.0, 1.0);
    let ab = p.add_constraint(a, b, 1.0);
    let bc = p.add_constraint(b, c, 1.0);
    let ac = p.add_constraint(a, c, 1.0);
    (p, [ab, bc, ac])
}

#[test]
fn incremental_pushes_two_overlapping_variables_apart_symmetrically() {
    let mut p = Problem::new();
    let a = p.add_variable(0, 0.0, 1.0);
    let b = p.add_variable(1, 0.0, 1.0);
    p.add_constraint(a, b, 2.0);

    vpsc::solve(&mut p, Mode::Incremental).unwrap();
    assert_positions(&p, &[-1.0, 1.0]);
}

#[test]
fn incremental_leaves_satisfied_input_untouched() {
    let mut p = Problem::new();
    let v0 = p.add_variable(0, 0.0, 1.0);
    let v1 = p.add_variable(1, 10.0, 1.0);
    let v2 = p.add_variable(2, 20.0, 1.0);
    p.add_constraint(v0, v1, 1.0);
    p.add_constraint(v1, v2, 1.0);

    vpsc::solve(&mut p, Mode::Incremental).unwrap();
    assert_eq!(p.positions(), vec![0.0, 10.0, 20.0]);
}

#[test]
fn incremental_resolves_violation_inside_a_single_block() {
    let (mut p, [_, bc, ac]) = chain_with_shortcut();

    let mut sink = RecordingSink::new();
    let mut solver = Solver::incremental(&mut p).with_trace(&mut sink);
    solver.solve().unwrap();
    // a, b and c end up in one block with both chain constraints tight.
    assert_eq!(solver.blocks().len(), 1);
    assert_eq!(solver.inactive(), &[ac]);
    assert_close(solver.position(vpsc::VarId::new(0)), -1.0);
    assert_close(solver.position(vpsc::VarId::new(2)), 1.0);

    // Widening the shortcut beyond the chain makes it violated between two members of the
    // same block.
    solver.set_gap(ac, 3.0);
    solver.solve().unwrap();
    drop(solver);

    assert_feasible(&p);
    assert_positions(&p, &[-1.5, 0.0, 1.5]);
    assert!(
        sink.events
            .iter()
            .any(|e| matches!(e, TraceEvent::Split { constraint, .. } if *constraint == bc)),
        "expected the chain to be split at b->c"
    );
}

#[test]
fn incremental_cost_is_non_increasing_within_a_solve() {
    let (mut p, [_, _, ac]) = chain_with_shortcut();

    let mut sink = RecordingSink::new();
    let mut solver = Solver::incremental(&mut p).with_trace(&mut sink);
    solver.solve().unwrap();
    solver.set_gap(ac, 3.0);
    solver.solve().unwrap();
    drop(solver);

    let costs = sink.iteration_costs();
    // First solve: two rounds at cost 2. Second solve starts afterwards.
    assert_eq!(costs.len(), 5, "{costs:?}");
    assert_close(costs[0], 2.0);
    assert_close(costs[1], 2.0);
    let second = &costs[2..];
    for w in second.windows(2) {
        assert!(w[1] <= w[0] + 1e-9, "cost went up: {second:?}");
    }
    assert_close(*second.last().unwrap(), 4.5);
}

/// Iteration costs grouped by the `solve` call that reported them.
fn costs_per_solve(sink: &RecordingSink) -> Vec<Vec<f64>> {
    let mut runs: Vec<Vec<f64>> = Vec::new();
    for event in &sink.events {
        if let TraceEvent::Iteration { iteration, cost } = *event {
            if iteration == 1 {
                runs.push(Vec::new());
            }
            if let Some(run) = runs.last_mut() {
                run.push(cost);
            }
        }
    }
    runs
}

#[test]
fn incremental_cost_is_non_increasing_on_random_warm_starts() {
    let mut rng = XorShift64Star::new(0x5EED_0003);
    for round in 0..60 {
        let n = 3 + rng.next_usize(6);
        let mut p = common::random_dag(&mut rng, n, 0.5);
        let desired: Vec<f64> = p.variables().iter().map(|v| v.desired_position).collect();
        let moved = common::jitter_desired(&mut rng, &desired, 4.0);
        let vars: Vec<_> = p.var_ids().collect();

        let mut sink = RecordingSink::new();
        let mut solver = Solver::incremental(&mut p).with_trace(&mut sink);
        solver.solve().unwrap();
        for (v, d) in vars.iter().zip(&moved) {
            solver.set_desired_position(*v, *d);
        }
        solver.solve().unwrap();
        drop(solver);
        assert_feasible(&p);

        let runs = costs_per_solve(&sink);
        assert_eq!(runs.len(), 2);
        for run in &runs {
            for w in run.windows(2) {
                assert!(
                    w[1] <= w[0] + 1e-7 * (1.0 + w[0].abs()),
                    "round {round}: cost went up: {run:?}"
                );
            }
        }
    }
}

#[test]
fn incremental_set_gap_releases_an_active_constraint() {
    let mut p = Problem::new();
    let a = p.add_variable(0, 0.0, 1.0);
    let b = p.add_variable(1, 0.0, 1.0);
    let ab = p.add_constraint(a, b, 2.0);

    let mut solver = Solver::incremental(&mut p);
    solver.solve().unwrap();
    assert!(solver.problem().constraint(ab).is_active());

    // Widening: the block is split in place and re-merged at the new gap.
    solver.set_gap(ab, 4.0);
    assert!(!solver.problem().constraint(ab).is_active());
    assert!(solver.inactive().contains(&ab));
    assert_eq!(solver.blocks().len(), 2);
    assert_close(solver.position(a), -1.0);
    assert_close(solver.position(b), 1.0);
    solver.solve().unwrap();
    assert_close(solver.position(a), -2.0);
    assert_close(solver.position(b), 2.0);

    // Narrowing.
    solver.set_gap(ab, 1.0);
    solver.solve().unwrap();
    drop(solver);
    assert_feasible(&p);
    assert_positions(&p, &[-0.5, 0.5]);
}

#[test]
fn incremental_warm_start_follows_moved_desired_positions() {
    let mut p = Problem::new();
    let a = p.add_variable(0, 0.0, 1.0);
    let b = p.add_variable(1, 0.0, 1.0);
    p.add_constraint(a, b, 2.0);

    let mut solver = Solver::incremental(&mut p);
    solver.solve().unwrap();
    assert_close(solver.position(a), -1.0);
    assert_close(solver.position(b), 1.0);

    // Pull them apart: the block must split and both variables reach their targets.
    solver.set_desired_position(a, -5.0);
    solver.set_desired_position(b, 5.0);
    solver.solve().unwrap();
    assert_close(solver.position(a), -5.0);
    assert_close(solver.position(b), 5.0);
    assert_eq!(solver.blocks().len(), 2);

    // Push them together again.
    solver.set_desired_position(a, 3.0);
    solver.set_desired_position(b, 3.0);
    solver.solve().unwrap();
    drop(solver);
    assert_positions(&p, &[2.0, 4.0]);
}

#[test]
fn incremental_split_blocks_counts_splits_and_keeps_positions() {
    let mut p = Problem::new();
    let a = p.add_variable(0, 0.0, 1.0);
    let b = p.add_variable(1, 0.0, 1.0);
    let ab = p.add_constraint(a, b, 2.0);

    let mut solver = Solver::incremental(&mut p);
    solver.satisfy().unwrap();
    assert!(solver.problem().constraint(ab).is_active());

    solver.set_desired_position(a, -10.0);
    solver.set_desired_position(b, 10.0);
    solver.split_blocks();
    assert_eq!(solver.split_count(), 1);
    assert!(!solver.problem().constraint(ab).is_active());
    assert!(solver.inactive().contains(&ab));
    // The pre-split block was moved to its desired weighted position (0) and both halves stay
    // there.
    assert_close(solver.position(a), -1.0);
    assert_close(solver.position(b), 1.0);

    solver.split_blocks();
    assert_eq!(solver.split_count(), 0);
}

#[test]
fn incremental_move_blocks_follows_desired_positions() {
    let mut p = Problem::new();
    let a = p.add_variable(0, 0.0, 1.0);
    let b = p.add_variable(1, 0.0, 1.0);
    p.add_constraint(a, b, 2.0);

    let mut solver = Solver::incremental(&mut p);
    solver.satisfy().unwrap();
    solver.set_desired_position(a, 4.0);
    solver.set_desired_position(b, 4.0);
    solver.move_blocks();
    assert_close(solver.position(a), 3.0);
    assert_close(solver.position(b), 5.0);
}

#[test]
fn incremental_equality_is_forced_first_and_held() {
    let mut p = Problem::new();
    let a = p.add_variable(0, 0.0, 1.0);
    let b = p.add_variable(1, 10.0, 1.0);
    let c = p.add_variable(2, 0.0, 1.0);
    let eq = p.add_equality(a, b, 2.0);
    p.add_constraint(b, c, 1.0);

    let mut sink = RecordingSink::new();
    Solver::incremental(&mut p)
        .with_trace(&mut sink)
        .solve()
        .unwrap();
    assert_feasible(&p);
    assert_close(p.slack(eq), 0.0);
    let first = sink
        .events
        .iter()
        .find_map(|e| match e {
            TraceEvent::MostViolated { constraint, .. } => Some(*constraint),
            _ => None,
        })
        .unwrap();
    assert_eq!(first, eq);
}

#[test]
fn incremental_reports_contradiction_inside_a_block_as_cycle() {
    let mut p = Problem::new();
    let a = p.add_variable(7, 0.0, 1.0);
    let b = p.add_variable(8, 0.0, 1.0);
    p.add_equality(a, b, 2.0);
    let wide = p.add_constraint(a, b, 5.0);

    let err = vpsc::solve(&mut p, Mode::Incremental).unwrap_err();
    assert_eq!(
        err,
        Error::CycleGuardTripped {
            constraint: wide,
            left: 7,
            right: 8,
            splits: 1,
        }
    );
}

#[test]
fn incremental_reports_constraint_cycle() {
    let mut p = Problem::new();
    let a = p.add_variable(0, 0.0, 1.0);
    let b = p.add_variable(1, 0.0, 1.0);
    p.add_constraint(a, b, 1.0);
    p.add_constraint(b, a, 1.0);

    let err = vpsc::solve(&mut p, Mode::Incremental).unwrap_err();
    assert!(matches!(err, Error::CycleGuardTripped { .. }), "{err}");
}

#[test]
fn incremental_guard_bound_is_configurable() {
    let (mut p, [_, _, ac]) = chain_with_shortcut();
    let mut solver = Solver::incremental(&mut p).with_options(SolverOptions {
        max_same_block_splits: 0,
        ..SolverOptions::default()
    });
    solver.solve().unwrap();
    solver.set_gap(ac, 3.0);
    let err = solver.solve().unwrap_err();
    assert!(
        matches!(err, Error::CycleGuardTripped { constraint, splits: 1, .. } if constraint == ac),
        "{err}"
    );
}

#[test]
fn incremental_iteration_cap_still_returns_feasible_positions() {
    let mut rng = XorShift64Star::new(9);
    let mut p = common::random_dag(&mut rng, 8, 0.5);
    let mut solver = Solver::incremental(&mut p).with_options(SolverOptions {
        max_iterations: Some(1),
        ..SolverOptions::default()
    });
    solver.solve().unwrap();
    drop(solver);
    assert_feasible(&p);
}

#[test]
fn incremental_is_feasible_on_random_instances() {
    let mut rng = XorShift64Star::new(7);
    for _ in 0..40 {
        let n = 2 + rng.next_usize(8);
        let mut p = common::random_dag(&mut rng, n, 0.5);
        vpsc::solve(&mut p, Mode::Incremental).unwrap();
        assert_feasible(&p);
    }
}

#[test]
fn incremental_matches_brute_force_optimum_cold_and_warm() {
    let mut rng = XorShift64Star::new(0xC01D_3A63);
    for round in 0..50 {
        let n = 2 + rng.next_usize(4);
        let mut p = common::random_dag(&mut rng, n, 0.6);
        let (_, cold) = common::brute_force_optimum(&p).expect("acyclic instances are feasible");
        let desired: Vec<f64> = p.variables().iter().map(|v| v.desired_position).collect();
        let moved = common::jitter_desired(&mut rng, &desired, 4.0);
        let vars: Vec<_> = p.var_ids().collect();

        let mut solver = Solver::incremental(&mut p);
        solver.solve().unwrap();
        let cost = solver.cost();
        assert!(
            (cost - cold).abs() <= 1e-4 * (1.0 + cold),
            "round {round}: cold cost {cost}, optimum {cold}"
        );

        for (v, d) in vars.iter().zip(&moved) {
            solver.set_desired_position(*v, *d);
        }
        solver.solve().unwrap();
        drop(solver);

        let (_, warm) = common::brute_force_optimum(&p).expect("acyclic instances are feasible");
        assert_feasible(&p);
        assert_optimal(&p, warm, &format!("round {round} warm"));
    }
}

#[test]
fn incremental_matches_brute_force_optimum_with_equalities() {
    let mut rng = XorShift64Star::new(0xE0_0A12);
    let mut checked = 0;
    for round in 0..120 {
        let n = 2 + rng.next_usize(4);
        let mut p = common::random_mixed(&mut rng, n, 0.6, 0.3);
        let Some((_, best)) = common::brute_force_optimum(&p) else {
            continue;
        };
        checked += 1;

        if let Err(err) = vpsc::solve(&mut p, Mode::Incremental) {
            panic!("round {round}: feasible instance rejected: {err}");
        }
        assert_feasible(&p);
        assert_optimal(&p, best, &format!("round {round}"));
    }
    assert!(checked > 30, "only {checked} feasible instances");
}

#[test]
fn incremental_matches_batch_on_scenarios_with_a_unique_block_structure() {
    let mut batch = Problem::new();
    let vars: Vec<_> = (0..5).map(|i| batch.add_variable(i, 0.0, 1.0)).collect();
    for w in vars.windows(2) {
        batch.add_constraint(w[0], w[1], 1.0);
    }
    let mut incremental = batch.clone();

    vpsc::solve(&mut batch, Mode::Batch).unwrap();
    vpsc::solve(&mut incremental, Mode::Incremental).unwrap();
    for (x, y) in batch.positions().iter().zip(incremental.positions()) {
        assert_close(*x, y);
    }
    assert_positions(&batch, &[-2.0, -1.0, 0.0, 1.0, 2.0]);
}
