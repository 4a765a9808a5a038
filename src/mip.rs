//! Glue around the MIP backend. Solver stages build their own `good_lp`
//! models; this module pins the backend options that keep runs reproducible
//! and maps backend failures onto the planning error taxonomy.
//!
//! A solve that stops on its time limit with a feasible incumbent comes back
//! from the backend as an ordinary solution, so both proven-optimal and
//! time-limited runs flow through the success path. Only an explicit
//! infeasible or unbounded status aborts a stage.

use crate::error::{PlanError, Stage};
use good_lp::ResolutionError;
use good_lp::solvers::highs::HighsProblem;

const SOLVER_THREADS: i32 = 1;
const SOLVER_SEED: i32 = 1234;

/// Applies the shared backend options: single-threaded, fixed seed, quiet
/// console, optional wall-clock cutoff in seconds.
pub fn configure(model: HighsProblem, time_limit: Option<f64>) -> HighsProblem {
    let mut model = model
        .set_option("threads", SOLVER_THREADS)
        .set_option("random_seed", SOLVER_SEED)
        .set_option("log_to_console", "false");
    if let Some(limit) = time_limit {
        model = model.set_option("time_limit", limit);
    }
    model
}

/// Maps a backend failure to the stage's planning error. Infeasible and
/// unbounded statuses both mean the stage's hard constraints cannot be met.
pub fn solve_failure(stage: Stage, err: ResolutionError) -> PlanError {
    match err {
        ResolutionError::Infeasible | ResolutionError::Unbounded => {
            PlanError::Infeasible { stage }
        }
        other => PlanError::Solver(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infeasible_and_unbounded_map_to_stage_error() {
        let err = solve_failure(Stage::Timetabling, ResolutionError::Infeasible);
        assert!(matches!(err, PlanError::Infeasible { stage: Stage::Timetabling }));
        let err = solve_failure(Stage::AssistantAssignment, ResolutionError::Unbounded);
        assert!(matches!(
            err,
            PlanError::Infeasible { stage: Stage::AssistantAssignment }
        ));
    }

    #[test]
    fn other_backend_errors_are_not_infeasibility() {
        let err = solve_failure(
            Stage::ClassroomAllocation,
            ResolutionError::Other("backend exploded"),
        );
        assert!(matches!(err, PlanError::Solver(_)));
    }
}
