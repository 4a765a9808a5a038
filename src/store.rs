//! In-memory record store backing the planning stages.
//!
//! Solver output tables (sessions, sittings, layouts, assistant assignments)
//! follow delete-then-bulk-insert semantics per scope; there is no
//! incremental patching. Deleting a sitting cascades its layouts and
//! assistant assignments.

use crate::domain::{
    AcademicPeriod, AcademicYear, Assistant, AssistantAssignment, AssistantId, AssistedCourse,
    Chair, ChairId, Classroom, ClassroomId, ClassroomSitting, Course, CourseId, CourseOffering,
    Department, Enrollment, ExamId, ExamInstance, LayoutId, NoExamException, OfferingId, PeriodId,
    PeriodKind, ScheduledSession, SeatLayout, SittingId, SlotId, StudentId, TimeSlot, YearId,
};
use crate::error::PlanError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Store {
    pub years: Vec<AcademicYear>,
    pub periods: Vec<AcademicPeriod>,
    pub courses: Vec<Course>,
    pub departments: Vec<Department>,
    pub offerings: Vec<CourseOffering>,
    pub exams: Vec<ExamInstance>,
    pub enrollments: Vec<Enrollment>,
    pub no_exam: Vec<NoExamException>,
    pub classrooms: Vec<Classroom>,
    pub chairs: Vec<Chair>,
    pub slots: Vec<TimeSlot>,
    pub sessions: Vec<ScheduledSession>,
    pub sittings: Vec<ClassroomSitting>,
    pub layouts: Vec<SeatLayout>,
    pub assistants: Vec<Assistant>,
    pub assisted_courses: Vec<AssistedCourse>,
    pub assignments: Vec<AssistantAssignment>,
}

fn next_id(ids: impl Iterator<Item = u32>) -> u32 {
    ids.max().unwrap_or(0) + 1
}

impl Store {
    // lookups

    pub fn year(&self, id: YearId) -> Result<&AcademicYear, PlanError> {
        self.years
            .iter()
            .find(|y| y.id == id)
            .ok_or_else(|| PlanError::NotFound(format!("academic year {id}")))
    }

    pub fn period(&self, id: PeriodId) -> Result<&AcademicPeriod, PlanError> {
        self.periods
            .iter()
            .find(|p| p.id == id)
            .ok_or_else(|| PlanError::NotFound(format!("period {id}")))
    }

    pub fn period_of(&self, year_id: YearId, kind: PeriodKind) -> Result<&AcademicPeriod, PlanError> {
        self.periods
            .iter()
            .find(|p| p.year_id == year_id && p.kind == kind)
            .ok_or_else(|| PlanError::NotFound(format!("{kind:?} period of year {year_id}")))
    }

    pub fn offering(&self, id: OfferingId) -> Result<&CourseOffering, PlanError> {
        self.offerings
            .iter()
            .find(|o| o.id == id)
            .ok_or_else(|| PlanError::NotFound(format!("offering {id}")))
    }

    pub fn exam(&self, id: ExamId) -> Result<&ExamInstance, PlanError> {
        self.exams
            .iter()
            .find(|e| e.id == id)
            .ok_or_else(|| PlanError::NotFound(format!("exam {id}")))
    }

    pub fn classroom(&self, id: ClassroomId) -> Result<&Classroom, PlanError> {
        self.classrooms
            .iter()
            .find(|c| c.id == id)
            .ok_or_else(|| PlanError::NotFound(format!("classroom {id}")))
    }

    pub fn sitting(&self, id: SittingId) -> Result<&ClassroomSitting, PlanError> {
        self.sittings
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| PlanError::NotFound(format!("sitting {id}")))
    }

    pub fn course_of_exam(&self, exam_id: ExamId) -> Result<CourseId, PlanError> {
        let exam = self.exam(exam_id)?;
        Ok(self.offering(exam.offering_id)?.course_id)
    }

    pub fn exams_in_period(&self, period_id: PeriodId) -> impl Iterator<Item = &ExamInstance> {
        self.exams.iter().filter(move |e| e.period_id == period_id)
    }

    pub fn enrollment_count(&self, exam_id: ExamId) -> u32 {
        self.enrollments.iter().filter(|e| e.exam_id == exam_id).count() as u32
    }

    pub fn students_of_exam(&self, exam_id: ExamId) -> Vec<StudentId> {
        self.enrollments
            .iter()
            .filter(|e| e.exam_id == exam_id)
            .map(|e| e.student_id)
            .collect()
    }

    /// Course ids suppressed by a NoExamException in the given period.
    pub fn no_exam_courses(&self, period_id: PeriodId) -> HashSet<CourseId> {
        self.no_exam
            .iter()
            .filter(|n| n.period_id == period_id)
            .map(|n| n.course_id)
            .collect()
    }

    pub fn slots_in_period(&self, period_id: PeriodId) -> Vec<&TimeSlot> {
        self.slots.iter().filter(|s| s.period_id == period_id).collect()
    }

    pub fn sessions_in_period(&self, period_id: PeriodId) -> Vec<&ScheduledSession> {
        self.sessions
            .iter()
            .filter(|s| {
                self.exams
                    .iter()
                    .any(|e| e.id == s.exam_id && e.period_id == period_id)
            })
            .collect()
    }

    pub fn slot_of_exam(&self, exam_id: ExamId) -> Option<&TimeSlot> {
        let session = self.sessions.iter().find(|s| s.exam_id == exam_id)?;
        self.slots.iter().find(|s| s.id == session.slot_id)
    }

    pub fn sittings_in_period(&self, period_id: PeriodId) -> Vec<&ClassroomSitting> {
        self.sittings
            .iter()
            .filter(|s| {
                self.exams
                    .iter()
                    .any(|e| e.id == s.exam_id && e.period_id == period_id)
            })
            .collect()
    }

    pub fn sittings_of_exam(&self, exam_id: ExamId) -> Vec<&ClassroomSitting> {
        self.sittings.iter().filter(|s| s.exam_id == exam_id).collect()
    }

    pub fn layouts_in_sitting(&self, sitting_id: SittingId) -> Vec<&SeatLayout> {
        self.layouts.iter().filter(|l| l.sitting_id == sitting_id).collect()
    }

    pub fn layout_count(&self, sitting_id: SittingId) -> u32 {
        self.layouts.iter().filter(|l| l.sitting_id == sitting_id).count() as u32
    }

    /// Chairs of a classroom in ascending `assign_order`.
    pub fn chairs_of_classroom(&self, classroom_id: ClassroomId) -> Vec<&Chair> {
        let mut chairs: Vec<&Chair> = self
            .chairs
            .iter()
            .filter(|c| c.classroom_id == classroom_id)
            .collect();
        chairs.sort_by_key(|c| c.assign_order);
        chairs
    }

    pub fn active_assistants(&self) -> Vec<&Assistant> {
        self.assistants.iter().filter(|a| a.active).collect()
    }

    /// Checks the uniqueness rules an imported snapshot must satisfy before
    /// it replaces the store. Solver writes respect these by construction;
    /// data loaded over HTTP may not.
    pub fn validate(&self) -> Result<(), PlanError> {
        let mut sittings = HashSet::new();
        for s in &self.sittings {
            if !sittings.insert((s.exam_id, s.classroom_id)) {
                return Err(PlanError::ValidationConflict(format!(
                    "duplicate sitting for exam {} in classroom {}",
                    s.exam_id, s.classroom_id
                )));
            }
        }
        let mut placements = HashSet::new();
        let mut chairs = HashSet::new();
        for l in &self.layouts {
            if !placements.insert((l.student_id, l.sitting_id)) {
                return Err(PlanError::ValidationConflict(format!(
                    "student {} placed twice in sitting {}",
                    l.student_id, l.sitting_id
                )));
            }
            if let Some(chair_id) = l.chair_id {
                if !chairs.insert((l.sitting_id, chair_id)) {
                    return Err(PlanError::ValidationConflict(format!(
                        "chair {chair_id} used twice in sitting {}",
                        l.sitting_id
                    )));
                }
            }
        }
        if self.periods.iter().filter(|p| p.active).count() > 1 {
            return Err(PlanError::ValidationConflict(
                "more than one active period".into(),
            ));
        }
        if self.years.iter().filter(|y| y.active).count() > 1 {
            return Err(PlanError::ValidationConflict(
                "more than one active academic year".into(),
            ));
        }
        Ok(())
    }

    // mutations

    /// Marks one period active, deactivating every other period and every
    /// year except the owning one. Keeps the at-most-one-active invariant.
    pub fn activate_period(&mut self, period_id: PeriodId) -> Result<(), PlanError> {
        let year_id = self.period(period_id)?.year_id;
        for p in &mut self.periods {
            p.active = p.id == period_id;
        }
        for y in &mut self.years {
            y.active = y.id == year_id;
        }
        Ok(())
    }

    /// Returns the slot with the given codes in the period, creating it if
    /// absent. The (short, long, period) key is what makes reruns reuse the
    /// slots they created before.
    pub fn get_or_create_slot(
        &mut self,
        period_id: PeriodId,
        short_code: u16,
        long_code: u16,
    ) -> SlotId {
        if let Some(slot) = self.slots.iter().find(|s| {
            s.period_id == period_id && s.short_code == short_code && s.long_code == long_code
        }) {
            return slot.id;
        }
        let id = next_id(self.slots.iter().map(|s| s.id));
        self.slots.push(TimeSlot {
            id,
            period_id,
            short_code,
            long_code,
            time: None,
        });
        id
    }

    /// Deletes every scheduled session of every period in the year.
    pub fn delete_sessions_for_year(&mut self, year_id: YearId) {
        let exam_ids: HashSet<ExamId> = self
            .exams
            .iter()
            .filter(|e| {
                self.offerings
                    .iter()
                    .any(|o| o.id == e.offering_id && o.year_id == year_id)
            })
            .map(|e| e.id)
            .collect();
        self.sessions.retain(|s| !exam_ids.contains(&s.exam_id));
    }

    pub fn delete_sessions_for_period(&mut self, period_id: PeriodId) {
        let exam_ids: HashSet<ExamId> = self
            .exams
            .iter()
            .filter(|e| e.period_id == period_id)
            .map(|e| e.id)
            .collect();
        self.sessions.retain(|s| !exam_ids.contains(&s.exam_id));
    }

    /// Bulk insert of scheduled sessions. Rejects the whole batch with
    /// `ValidationConflict` if any row targets a (course, period) covered by
    /// a NoExamException.
    pub fn insert_sessions(&mut self, rows: Vec<(ExamId, SlotId)>) -> Result<usize, PlanError> {
        for (exam_id, _) in &rows {
            let exam = self.exam(*exam_id)?;
            let period_id = exam.period_id;
            let course_id = self.offering(exam.offering_id)?.course_id;
            if self
                .no_exam
                .iter()
                .any(|n| n.course_id == course_id && n.period_id == period_id)
            {
                return Err(PlanError::ValidationConflict(format!(
                    "NoExam record exists for course {course_id} in period {period_id}"
                )));
            }
        }
        let mut id = next_id(self.sessions.iter().map(|s| s.id));
        let count = rows.len();
        for (exam_id, slot_id) in rows {
            self.sessions.push(ScheduledSession { id, exam_id, slot_id });
            id += 1;
        }
        Ok(count)
    }

    /// Deletes the period's sittings and cascades their layouts and
    /// assistant assignments.
    pub fn delete_sittings_for_period(&mut self, period_id: PeriodId) {
        let sitting_ids: HashSet<SittingId> = self
            .sittings_in_period(period_id)
            .iter()
            .map(|s| s.id)
            .collect();
        self.layouts.retain(|l| !sitting_ids.contains(&l.sitting_id));
        self.assignments.retain(|a| !sitting_ids.contains(&a.sitting_id));
        self.sittings.retain(|s| !sitting_ids.contains(&s.id));
    }

    pub fn insert_sittings(&mut self, rows: Vec<(ExamId, ClassroomId)>) -> usize {
        let mut id = next_id(self.sittings.iter().map(|s| s.id));
        let count = rows.len();
        for (exam_id, classroom_id) in rows {
            self.sittings.push(ClassroomSitting { id, exam_id, classroom_id });
            id += 1;
        }
        count
    }

    pub fn insert_layouts(&mut self, rows: Vec<(StudentId, SittingId)>) -> usize {
        let mut id = next_id(self.layouts.iter().map(|l| l.id));
        let count = rows.len();
        for (student_id, sitting_id) in rows {
            self.layouts.push(SeatLayout {
                id,
                student_id,
                sitting_id,
                chair_id: None,
            });
            id += 1;
        }
        count
    }

    /// Binds a layout to a chair. The chair must belong to the classroom of
    /// the layout's sitting.
    pub fn set_layout_chair(&mut self, layout_id: LayoutId, chair_id: ChairId) -> Result<(), PlanError> {
        let idx = self
            .layouts
            .iter()
            .position(|l| l.id == layout_id)
            .ok_or_else(|| PlanError::NotFound(format!("layout {layout_id}")))?;
        let sitting_classroom = self.sitting(self.layouts[idx].sitting_id)?.classroom_id;
        let chair_classroom = self
            .chairs
            .iter()
            .find(|c| c.id == chair_id)
            .ok_or_else(|| PlanError::NotFound(format!("chair {chair_id}")))?
            .classroom_id;
        if chair_classroom != sitting_classroom {
            return Err(PlanError::ValidationConflict(format!(
                "chair {chair_id} is not in classroom {sitting_classroom}"
            )));
        }
        self.layouts[idx].chair_id = Some(chair_id);
        Ok(())
    }

    pub fn delete_assignments_for_period(&mut self, period_id: PeriodId) {
        let sitting_ids: HashSet<SittingId> = self
            .sittings_in_period(period_id)
            .iter()
            .map(|s| s.id)
            .collect();
        self.assignments.retain(|a| !sitting_ids.contains(&a.sitting_id));
    }

    pub fn insert_assignments(&mut self, rows: Vec<(AssistantId, SittingId)>) -> usize {
        let mut id = next_id(self.assignments.iter().map(|a| a.id));
        let count = rows.len();
        for (assistant_id, sitting_id) in rows {
            self.assignments.push(AssistantAssignment {
                id,
                assistant_id,
                sitting_id,
                active: true,
            });
            id += 1;
        }
        count
    }
}


#[cfg(test)]
mod tests {
    use super::testutil::*;
    use super::*;
    use crate::domain::long_code;

    #[test]
    fn activating_a_period_deactivates_the_rest() {
        let mut store = Store::default();
        let (_, _, fn_pr, _) = term(&mut store);
        store.years.push(AcademicYear {
            id: 2,
            year: 2026,
            semester: crate::domain::Semester::Spring,
            active: false,
        });
        store.activate_period(fn_pr).unwrap();
        assert_eq!(store.periods.iter().filter(|p| p.active).count(), 1);
        assert!(store.period(fn_pr).unwrap().active);
        assert_eq!(store.years.iter().filter(|y| y.active).count(), 1);
        assert!(store.year(1).unwrap().active);
    }

    #[test]
    fn slot_get_or_create_is_idempotent() {
        let mut store = Store::default();
        let (_, mt, _, _) = term(&mut store);
        let a = store.get_or_create_slot(mt, 3, long_code(0, 3));
        let b = store.get_or_create_slot(mt, 3, long_code(0, 3));
        assert_eq!(a, b);
        assert_eq!(store.slots.len(), 1);
        let c = store.get_or_create_slot(mt, 4, long_code(1, 0));
        assert_ne!(a, c);
    }

    #[test]
    fn session_insert_rejects_no_exam_courses() {
        let mut store = Store::default();
        let (year, mt, _, _) = term(&mut store);
        department(&mut store, 1, "ECO");
        let c = course(&mut store, 1, "ECO101");
        let off = offering(&mut store, 1, c, 1, 1, year);
        let ex = exam(&mut store, 1, off, mt);
        store.no_exam.push(NoExamException { course_id: c, period_id: mt });
        let slot = store.get_or_create_slot(mt, 0, long_code(0, 0));
        let err = store.insert_sessions(vec![(ex, slot)]).unwrap_err();
        assert!(matches!(err, PlanError::ValidationConflict(_)));
        assert!(store.sessions.is_empty());
    }

    #[test]
    fn deleting_sittings_cascades_layouts_and_assignments() {
        let mut store = Store::default();
        let (year, mt, _, _) = term(&mut store);
        department(&mut store, 1, "ECO");
        let c = course(&mut store, 1, "ECO101");
        let off = offering(&mut store, 1, c, 1, 1, year);
        let ex = exam(&mut store, 1, off, mt);
        let room = classroom(&mut store, 1, "C101", 10);
        store.insert_sittings(vec![(ex, room)]);
        let sitting_id = store.sittings[0].id;
        store.insert_layouts(vec![(7, sitting_id), (8, sitting_id)]);
        let ast = assistant(&mut store, 1, 1);
        store.insert_assignments(vec![(ast, sitting_id)]);
        store.delete_sittings_for_period(mt);
        assert!(store.sittings.is_empty());
        assert!(store.layouts.is_empty());
        assert!(store.assignments.is_empty());
    }

    #[test]
    fn chair_must_match_sitting_classroom() {
        let mut store = Store::default();
        let (year, mt, _, _) = term(&mut store);
        department(&mut store, 1, "ECO");
        let c = course(&mut store, 1, "ECO101");
        let off = offering(&mut store, 1, c, 1, 1, year);
        let ex = exam(&mut store, 1, off, mt);
        let room_a = classroom(&mut store, 1, "C101", 4);
        let room_b = classroom(&mut store, 2, "C102", 4);
        store.insert_sittings(vec![(ex, room_a)]);
        let sitting_id = store.sittings[0].id;
        store.insert_layouts(vec![(7, sitting_id)]);
        let layout_id = store.layouts[0].id;
        let foreign_chair = store.chairs_of_classroom(room_b)[0].id;
        let err = store.set_layout_chair(layout_id, foreign_chair).unwrap_err();
        assert!(matches!(err, PlanError::ValidationConflict(_)));
        let own_chair = store.chairs_of_classroom(room_a)[0].id;
        store.set_layout_chair(layout_id, own_chair).unwrap();
        assert_eq!(store.layouts[0].chair_id, Some(own_chair));
    }

    #[test]
    fn snapshot_validation_catches_duplicate_rows() {
        let mut store = Store::default();
        let (year, mt, _, _) = term(&mut store);
        department(&mut store, 1, "ECO");
        let c = course(&mut store, 1, "ECO101");
        let off = offering(&mut store, 1, c, 1, 1, year);
        let ex = exam(&mut store, 1, off, mt);
        let room = classroom(&mut store, 1, "C101", 4);
        store.insert_sittings(vec![(ex, room)]);
        let sitting_id = store.sittings[0].id;
        store.insert_layouts(vec![(7, sitting_id)]);
        store.validate().unwrap();

        let mut dup = store.clone();
        dup.insert_sittings(vec![(ex, room)]);
        assert!(matches!(dup.validate(), Err(PlanError::ValidationConflict(_))));

        let mut dup = store.clone();
        dup.insert_layouts(vec![(7, sitting_id)]);
        assert!(matches!(dup.validate(), Err(PlanError::ValidationConflict(_))));

        let mut dup = store.clone();
        dup.insert_layouts(vec![(8, sitting_id)]);
        let chair = dup.chairs_of_classroom(room)[0].id;
        for layout_id in [dup.layouts[0].id, dup.layouts[1].id] {
            dup.set_layout_chair(layout_id, chair).unwrap();
        }
        assert!(matches!(dup.validate(), Err(PlanError::ValidationConflict(_))));
    }

    #[test]
    fn snapshot_validation_rejects_two_active_periods() {
        let mut store = Store::default();
        term(&mut store);
        store.validate().unwrap();
        store.periods[1].active = true;
        assert!(matches!(
            store.validate(),
            Err(PlanError::ValidationConflict(_))
        ));
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let mut store = Store::default();
        let (year, mt, _, _) = term(&mut store);
        department(&mut store, 1, "ECO");
        let c = course(&mut store, 1, "ECO101");
        let off = offering(&mut store, 1, c, 1, 1, year);
        exam(&mut store, 1, off, mt);
        classroom(&mut store, 1, "C101", 3);
        let json = serde_json::to_string(&store).unwrap();
        let back: Store = serde_json::from_str(&json).unwrap();
        assert_eq!(back.courses.len(), 1);
        assert_eq!(back.chairs.len(), 3);
        assert_eq!(back.periods.len(), 3);
    }
}
