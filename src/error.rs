use crate::domain::ExamId;
use std::fmt;
use thiserror::Error;

/// Which solver stage raised the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Timetabling,
    ClassroomAllocation,
    AssistantAssignment,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Timetabling => "timetabling",
            Stage::ClassroomAllocation => "classroom allocation",
            Stage::AssistantAssignment => "assistant assignment",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by the planning stages. All of them abort the run that
/// raised them before any output row is written.
#[derive(Debug, Error)]
pub enum PlanError {
    /// The stage's MIP has no feasible solution under its hard constraints.
    #[error("{stage} problem is infeasible")]
    Infeasible { stage: Stage },

    /// Total capacity of the classrooms chosen for an exam falls short of
    /// its enrollment.
    #[error("classroom capacity is not enough for exam {exam}: {capacity} seats for {students} students")]
    InsufficientCapacity {
        exam: ExamId,
        capacity: u32,
        students: u32,
    },

    /// A write would contradict a declared exception, e.g. scheduling a
    /// session for a (course, period) covered by a NoExamException.
    #[error("validation conflict: {0}")]
    ValidationConflict(String),

    /// A referenced record does not exist in the store.
    #[error("unknown {0}")]
    NotFound(String),

    /// The solver backend failed for a reason other than infeasibility.
    #[error("solver error: {0}")]
    Solver(String),
}
