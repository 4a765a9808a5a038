//! Exam-to-timeslot timetabling.
//!
//! One joint solve places every course of the midterm/final roster on a
//! 10-day, 4-session grid; a second solve places the same roster on the
//! 5-day, 5-session resit grid. Courses, not sections, are the scheduling
//! unit: the output phase fans the chosen slot out to every exam instance of
//! the course in each target period.

use crate::domain::{CourseId, ExamId, PeriodId, PeriodKind, SlotId, StudentId, YearId, long_code, short_code};
use crate::error::{PlanError, Stage};
use crate::mip;
use crate::store::Store;
use good_lp::{
    Expression, ProblemVariables, Solution, SolverModel, constraint, default_solver, variable,
};
use itertools::Itertools;
use log::{info, trace};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Enrollment above which a course needs a grid cell mostly to itself.
pub const LARGE_COURSE_THRESHOLD: u32 = 400;
/// Small courses allowed to share a cell with a large one (none) or with
/// each other (at most this many).
const SMALL_COURSES_PER_CELL: f64 = 20.0;
const HARD_PENALTY_WEIGHT: f64 = 100.0;
const REGULAR_TIME_LIMIT: f64 = 10_000.0;
const RESIT_TIME_LIMIT: f64 = 3_600.0;

/// Shape and policy of one timetabling run.
#[derive(Debug, Clone, Copy)]
pub struct GridConfig {
    pub days: u16,
    pub sessions: u16,
    /// Exams a student sits in one day before penalty variables start paying.
    pub daily_floor: f64,
    /// Whether the large-course cell rules apply (joint run only).
    pub large_course_rules: bool,
    /// Enrollment above which a course counts as large for the cell rules.
    pub large_course_threshold: u32,
    pub time_limit: Option<f64>,
}

pub const REGULAR_GRID: GridConfig = GridConfig {
    days: 10,
    sessions: 4,
    daily_floor: 1.0,
    large_course_rules: true,
    large_course_threshold: LARGE_COURSE_THRESHOLD,
    time_limit: Some(REGULAR_TIME_LIMIT),
};

pub const RESIT_GRID: GridConfig = GridConfig {
    days: 5,
    sessions: 5,
    daily_floor: 2.0,
    large_course_rules: false,
    large_course_threshold: LARGE_COURSE_THRESHOLD,
    time_limit: Some(RESIT_TIME_LIMIT),
};

/// Per-course enrollment figures and the student-sharing structure driving
/// the clash constraints. Course indices address the MIP variable space.
pub struct Roster {
    pub courses: Vec<CourseId>,
    pub sizes: Vec<u32>,
    pub students: Vec<StudentId>,
    /// Course indices each student is enrolled in, keyed by student index.
    pub student_courses: Vec<Vec<usize>>,
    /// Deduplicated unordered course pairs sharing at least one student.
    pub conflicts: Vec<(usize, usize)>,
    pub max_size: u32,
}

/// One selected (course, day, session) cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub course: CourseId,
    pub day: u16,
    pub session: u16,
}

#[derive(Debug)]
struct GridSolution {
    placements: Vec<Placement>,
    soft_penalties: f64,
    hard_penalties: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimetableSummary {
    pub courses: usize,
    pub regular_sessions: usize,
    pub resit_sessions: usize,
    pub regular_penalty: f64,
    pub resit_penalty: f64,
}

/// Builds the roster from the enrollments of `roster_period`, skipping the
/// courses in `excluded`.
pub fn build_roster(store: &Store, roster_period: PeriodId, excluded: &HashSet<CourseId>) -> Roster {
    let mut pairs: Vec<(StudentId, CourseId)> = Vec::new();
    for enrollment in &store.enrollments {
        let Ok(exam) = store.exam(enrollment.exam_id) else { continue };
        if exam.period_id != roster_period {
            continue;
        }
        let Ok(course_id) = store.course_of_exam(exam.id) else { continue };
        if excluded.contains(&course_id) {
            continue;
        }
        pairs.push((enrollment.student_id, course_id));
    }

    let mut courses: Vec<CourseId> = pairs.iter().map(|(_, c)| *c).unique().collect();
    courses.sort_unstable();
    let course_index: HashMap<CourseId, usize> =
        courses.iter().enumerate().map(|(i, c)| (*c, i)).collect();

    let mut sizes = vec![0u32; courses.len()];
    for (_, course_id) in &pairs {
        sizes[course_index[course_id]] += 1;
    }
    let max_size = sizes.iter().copied().max().unwrap_or(0);

    let by_student: HashMap<StudentId, Vec<usize>> = pairs
        .iter()
        .map(|(s, c)| (*s, course_index[c]))
        .into_group_map();
    let mut students: Vec<StudentId> = by_student.keys().copied().collect();
    students.sort_unstable();

    let mut conflict_set: HashSet<(usize, usize)> = HashSet::new();
    let mut student_courses = Vec::with_capacity(students.len());
    for student in &students {
        let mut indices: Vec<usize> = by_student[student].iter().copied().unique().collect();
        indices.sort_unstable();
        for (a, b) in indices.iter().copied().tuple_combinations() {
            conflict_set.insert((a, b));
        }
        student_courses.push(indices);
    }
    let mut conflicts: Vec<(usize, usize)> = conflict_set.into_iter().collect();
    conflicts.sort_unstable();

    Roster {
        courses,
        sizes,
        students,
        student_courses,
        conflicts,
        max_size,
    }
}

/// Solves one grid. Every course lands on exactly one cell; the objective
/// pays 1 per crowded student-day and 100 per badly crowded one.
fn solve_grid(roster: &Roster, grid: &GridConfig) -> Result<GridSolution, PlanError> {
    if roster.courses.is_empty() {
        return Ok(GridSolution {
            placements: Vec::new(),
            soft_penalties: 0.0,
            hard_penalties: 0.0,
        });
    }
    let n_courses = roster.courses.len();
    let n_students = roster.students.len();
    let days = grid.days as usize;
    let sessions = grid.sessions as usize;

    info!(
        "Setting up timetabling model: {} courses, {} students, {}x{} grid, {} conflict pairs",
        n_courses,
        n_students,
        grid.days,
        grid.sessions,
        roster.conflicts.len()
    );

    let mut problem = ProblemVariables::new();
    // x_cds = 1 if course c sits at (day d, session s)
    let slot_vars = problem.add_vector(variable().binary(), n_courses * days * sessions);
    let cell = |c: usize, d: usize, s: usize| slot_vars[(c * days + d) * sessions + s];
    let soft_vars = problem.add_vector(variable().binary(), n_students * days);
    let hard_vars = problem.add_vector(variable().binary(), n_students * days);
    let pen = |st: usize, d: usize| st * days + d;

    let soft_total: Expression = soft_vars.iter().map(|v| *v).sum();
    let hard_total: Expression = hard_vars.iter().map(|v| *v).sum();
    let objective = soft_total + HARD_PENALTY_WEIGHT * hard_total;

    let model = problem.minimise(objective).using(default_solver);
    let mut model = mip::configure(model, grid.time_limit);

    // each course occupies exactly one cell
    for c in 0..n_courses {
        let placed: Expression = (0..days)
            .flat_map(|d| (0..sessions).map(move |s| (d, s)))
            .map(|(d, s)| cell(c, d, s))
            .sum();
        model.add_constraint(constraint!(placed == 1));
    }

    // no student has two simultaneous exams
    for &(a, b) in &roster.conflicts {
        for d in 0..days {
            for s in 0..sessions {
                model.add_constraint(constraint!(cell(a, d, s) + cell(b, d, s) <= 1));
            }
        }
    }

    // crowded student-days are paid for in the objective
    for (st, indices) in roster.student_courses.iter().enumerate() {
        for d in 0..days {
            let sat_that_day: Expression = indices
                .iter()
                .flat_map(|&c| (0..sessions).map(move |s| cell(c, d, s)))
                .sum();
            let slack = soft_vars[pen(st, d)] + hard_vars[pen(st, d)];
            model.add_constraint(constraint!(sat_that_day - slack <= grid.daily_floor));
        }
    }

    // per-cell headcount never exceeds the largest single course
    let ceiling = roster.max_size as f64;
    for d in 0..days {
        for s in 0..sessions {
            let headcount: Expression = (0..n_courses)
                .map(|c| roster.sizes[c] as f64 * Expression::from(cell(c, d, s)))
                .sum();
            model.add_constraint(constraint!(headcount <= ceiling));
        }
    }

    if grid.large_course_rules {
        let large: Vec<usize> = (0..n_courses)
            .filter(|&c| roster.sizes[c] > grid.large_course_threshold)
            .collect();
        let small: Vec<usize> = (0..n_courses)
            .filter(|&c| roster.sizes[c] <= grid.large_course_threshold)
            .collect();
        trace!("{} large courses over threshold {}", large.len(), grid.large_course_threshold);
        for d in 0..days {
            for s in 0..sessions {
                // a cell hosting a large course takes no small ones; a cell
                // without one takes at most SMALL_COURSES_PER_CELL of them
                for &lc in &large {
                    let small_count: Expression = small.iter().map(|&c| cell(c, d, s)).sum();
                    model.add_constraint(constraint!(
                        small_count + SMALL_COURSES_PER_CELL * Expression::from(cell(lc, d, s))
                            <= SMALL_COURSES_PER_CELL
                    ));
                }
                let small_headcount: Expression = small
                    .iter()
                    .map(|&c| roster.sizes[c] as f64 * Expression::from(cell(c, d, s)))
                    .sum();
                model.add_constraint(constraint!(small_headcount <= ceiling));
            }
        }
    }

    info!("Starting timetabling solve...");
    let solution = model
        .solve()
        .map_err(|e| mip::solve_failure(Stage::Timetabling, e))?;

    let mut placements = Vec::with_capacity(n_courses);
    for c in 0..n_courses {
        for d in 0..days {
            for s in 0..sessions {
                if solution.value(cell(c, d, s)) > 0.9 {
                    placements.push(Placement {
                        course: roster.courses[c],
                        day: d as u16,
                        session: s as u16,
                    });
                }
            }
        }
    }
    let soft_penalties: f64 = soft_vars.iter().map(|v| solution.value(*v)).sum();
    let hard_penalties: f64 = hard_vars.iter().map(|v| solution.value(*v)).sum();
    info!(
        "Timetabling solve done: {} placements, {} soft / {} hard penalties",
        placements.len(),
        soft_penalties,
        hard_penalties
    );
    Ok(GridSolution {
        placements,
        soft_penalties,
        hard_penalties,
    })
}

/// Materializes one run's placements into the given periods: get-or-create
/// the slot per period, then fan the slot out to every exam instance of the
/// course in that period. Courses suppressed by a NoExamException in a
/// period are skipped there, so these writes never hit the store's
/// validation. Returns the number of sessions written.
fn write_sessions(
    store: &mut Store,
    periods: &[PeriodId],
    placements: &[Placement],
    grid: &GridConfig,
) -> Result<usize, PlanError> {
    let mut total = 0;
    for &period_id in periods {
        let suppressed = store.no_exam_courses(period_id);
        let mut rows: Vec<(ExamId, SlotId)> = Vec::new();
        for p in placements {
            if suppressed.contains(&p.course) {
                continue;
            }
            let exam_ids: Vec<ExamId> = store
                .exams
                .iter()
                .filter(|e| e.period_id == period_id)
                .filter(|e| {
                    store
                        .offerings
                        .iter()
                        .any(|o| o.id == e.offering_id && o.course_id == p.course)
                })
                .map(|e| e.id)
                .collect();
            if exam_ids.is_empty() {
                continue;
            }
            let slot_id = store.get_or_create_slot(
                period_id,
                short_code(p.day, p.session, grid.sessions),
                long_code(p.day, p.session),
            );
            rows.extend(exam_ids.into_iter().map(|e| (e, slot_id)));
        }
        total += store.insert_sessions(rows)?;
    }
    Ok(total)
}

/// Runs the joint midterm/final solve and the resit solve for one academic
/// year, replacing every scheduled session of that year. Prior sessions are
/// only deleted once a feasible solution is in hand.
pub fn schedule_exams(store: &mut Store, year_id: YearId) -> Result<TimetableSummary, PlanError> {
    store.year(year_id)?;
    let midterm = store.period_of(year_id, PeriodKind::Midterm)?.id;
    let final_pr = store.period_of(year_id, PeriodKind::Final)?.id;
    let resit = store.period_of(year_id, PeriodKind::Resit)?.id;

    // only courses exempt from both the midterm and the final drop out of
    // the roster entirely
    let no_midterm = store.no_exam_courses(midterm);
    let no_final = store.no_exam_courses(final_pr);
    let excluded: HashSet<CourseId> = no_midterm.intersection(&no_final).copied().collect();
    let roster = build_roster(store, midterm, &excluded);

    let regular = solve_grid(&roster, &REGULAR_GRID)?;
    store.delete_sessions_for_year(year_id);
    let regular_sessions = write_sessions(store, &[midterm, final_pr], &regular.placements, &REGULAR_GRID)?;
    info!("Midterm & final timetable written: {} sessions", regular_sessions);

    let resit_solution = solve_grid(&roster, &RESIT_GRID)?;
    store.delete_sessions_for_period(resit);
    let resit_sessions = write_sessions(store, &[resit], &resit_solution.placements, &RESIT_GRID)?;
    info!("Resit timetable written: {} sessions", resit_sessions);

    Ok(TimetableSummary {
        courses: roster.courses.len(),
        regular_sessions,
        resit_sessions,
        regular_penalty: regular.soft_penalties + HARD_PENALTY_WEIGHT * regular.hard_penalties,
        resit_penalty: resit_solution.soft_penalties
            + HARD_PENALTY_WEIGHT * resit_solution.hard_penalties,
    })
}
