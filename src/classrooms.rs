//! Classroom and seat allocation.
//!
//! Stage A picks classrooms per occupied slot with one small MIP per slot
//! (the slots share no variables, so the problems are independent). Stage B
//! deterministically splits each exam's students across its classrooms so
//! spare capacity spreads evenly. Stage C seats everyone on a fixed-seed
//! shuffle of each classroom's first chairs, so reruns reproduce the chart.

use crate::domain::{ChairId, ClassroomId, ExamId, LayoutId, PeriodId, SittingId, SlotId, StudentId};
use crate::error::{PlanError, Stage};
use crate::mip;
use crate::store::Store;
use good_lp::{Expression, ProblemVariables, Solution, SolverModel, constraint, default_solver, variable};
use log::info;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;

/// Seed of the seat shuffle. Fixed so a rerun over unchanged layouts yields
/// the same seating chart.
const SEAT_SHUFFLE_SEED: u64 = 27;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationSummary {
    pub slots: usize,
    pub sittings: usize,
    pub layouts: usize,
    pub seated: usize,
}

/// Reproducible pseudo-random ordering token for a student. Stands in for
/// the opaque per-account field the legacy system sorted by; carries no
/// security property. splitmix64 finaliser.
fn placement_key(student: StudentId) -> u64 {
    let mut x = student as u64 ^ 0x9e37_79b9_7f4a_7c15;
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

/// Stage A for one slot: minimal set of (classroom, exam) assignments such
/// that no classroom hosts two exams and every exam gets enough capacity.
fn select_classrooms_for_slot(
    store: &Store,
    slot_id: SlotId,
    exams: &[(ExamId, u32)],
) -> Result<Vec<(ExamId, ClassroomId)>, PlanError> {
    let classrooms: Vec<(ClassroomId, u32)> = store
        .classrooms
        .iter()
        .map(|c| (c.id, c.capacity))
        .collect();
    info!(
        "Selecting classrooms for slot {}: {} exams, {} rooms",
        slot_id,
        exams.len(),
        classrooms.len()
    );

    let mut problem = ProblemVariables::new();
    // use_re = 1 if room r hosts exam e in this slot
    let vars = problem.add_vector(variable().binary(), classrooms.len() * exams.len());
    let used = |r: usize, e: usize| vars[r * exams.len() + e];

    let rooms_used: Expression = vars.iter().map(|v| *v).sum();
    let model = problem.minimise(rooms_used).using(default_solver);
    let mut model = mip::configure(model, None);

    for r in 0..classrooms.len() {
        let occupied: Expression = (0..exams.len()).map(|e| used(r, e)).sum();
        model.add_constraint(constraint!(occupied <= 1));
    }
    for (e, (_, enrolled)) in exams.iter().enumerate() {
        let capacity: Expression = classrooms
            .iter()
            .enumerate()
            .map(|(r, (_, cap))| *cap as f64 * Expression::from(used(r, e)))
            .sum();
        model.add_constraint(constraint!(capacity >= *enrolled as f64));
    }

    let solution = model
        .solve()
        .map_err(|err| mip::solve_failure(Stage::ClassroomAllocation, err))?;

    let mut chosen = Vec::new();
    for (r, (classroom_id, _)) in classrooms.iter().enumerate() {
        for (e, (exam_id, _)) in exams.iter().enumerate() {
            if solution.value(used(r, e)) > 0.9 {
                chosen.push((*exam_id, *classroom_id));
            }
        }
    }
    Ok(chosen)
}

/// Stage B: fills each exam's sittings with contiguous blocks of its
/// students, sittings in ascending capacity, spare capacity spread so no two
/// sittings of an exam differ by more than one seat of slack.
fn distribute_students(store: &mut Store, period_id: PeriodId) -> Result<usize, PlanError> {
    let exam_ids: Vec<ExamId> = store
        .exams_in_period(period_id)
        .map(|e| e.id)
        .filter(|&e| store.slot_of_exam(e).is_some())
        .collect();

    let mut rows: Vec<(StudentId, SittingId)> = Vec::new();
    for exam_id in exam_ids {
        let mut sittings: Vec<(SittingId, u32)> = Vec::new();
        for sitting in store.sittings_of_exam(exam_id) {
            let capacity = store.classroom(sitting.classroom_id)?.capacity;
            sittings.push((sitting.id, capacity));
        }
        if sittings.is_empty() {
            continue;
        }
        sittings.sort_by_key(|&(id, capacity)| (capacity, id));

        let mut students = store.students_of_exam(exam_id);
        students.sort_by_key(|&s| (placement_key(s), s));

        let total_capacity: u32 = sittings.iter().map(|&(_, c)| c).sum();
        let n_students = students.len() as u32;
        if total_capacity < n_students {
            return Err(PlanError::InsufficientCapacity {
                exam: exam_id,
                capacity: total_capacity,
                students: n_students,
            });
        }
        let slack = total_capacity - n_students;
        let n_sittings = sittings.len() as u32;
        let per_sitting = slack / n_sittings;
        let remainder = slack - per_sitting * n_sittings;

        let mut start = 0usize;
        for (idx, &(sitting_id, capacity)) in sittings.iter().enumerate() {
            let mut fill = capacity - per_sitting;
            if (idx as u32) < remainder {
                fill -= 1;
            }
            for &student in &students[start..start + fill as usize] {
                rows.push((student, sitting_id));
            }
            start += fill as usize;
        }
    }
    Ok(store.insert_layouts(rows))
}

/// Stage C: per sitting, shuffle the first `count` chairs by assign order
/// and pair them with the sitting's layouts in store order.
fn assign_seats(store: &mut Store, period_id: PeriodId) -> Result<usize, PlanError> {
    let mut rng = StdRng::seed_from_u64(SEAT_SHUFFLE_SEED);
    let mut sittings: Vec<(SittingId, ClassroomId)> = store
        .sittings_in_period(period_id)
        .iter()
        .map(|s| (s.id, s.classroom_id))
        .collect();
    sittings.sort_unstable();

    let mut seated = 0;
    for (sitting_id, classroom_id) in sittings {
        let layout_ids: Vec<LayoutId> =
            store.layouts_in_sitting(sitting_id).iter().map(|l| l.id).collect();
        let count = layout_ids.len();
        let mut chairs: Vec<ChairId> = store
            .chairs_of_classroom(classroom_id)
            .iter()
            .filter(|c| (c.assign_order as usize) < count + 1)
            .map(|c| c.id)
            .collect();
        chairs.shuffle(&mut rng);
        for (layout_id, chair_id) in layout_ids.into_iter().zip(chairs) {
            store.set_layout_chair(layout_id, chair_id)?;
            seated += 1;
        }
    }
    Ok(seated)
}

/// Runs all three stages for one period, replacing its sittings, layouts and
/// seat assignments. Nothing is deleted until every slot's selection MIP has
/// solved, so an infeasible slot leaves prior output untouched.
pub fn assign_classrooms(store: &mut Store, period_id: PeriodId) -> Result<AllocationSummary, PlanError> {
    store.period(period_id)?;
    let slot_ids: Vec<SlotId> = store.slots_in_period(period_id).iter().map(|s| s.id).collect();

    let mut chosen: Vec<(ExamId, ClassroomId)> = Vec::new();
    let mut occupied_slots = 0;
    for slot_id in &slot_ids {
        let exams: Vec<(ExamId, u32)> = store
            .sessions
            .iter()
            .filter(|s| s.slot_id == *slot_id)
            .map(|s| (s.exam_id, store.enrollment_count(s.exam_id)))
            .collect();
        if exams.is_empty() {
            continue;
        }
        occupied_slots += 1;
        chosen.extend(select_classrooms_for_slot(store, *slot_id, &exams)?);
    }

    store.delete_sittings_for_period(period_id);
    let sittings = store.insert_sittings(chosen);
    info!("Classrooms assigned: {} sittings across {} slots", sittings, occupied_slots);
    let layouts = distribute_students(store, period_id)?;
    info!("Students distributed: {} layouts", layouts);
    let seated = assign_seats(store, period_id)?;
    info!("Seats assigned: {} students seated", seated);

    Ok(AllocationSummary {
        slots: occupied_slots,
        sittings,
        layouts,
        seated,
    })
}
