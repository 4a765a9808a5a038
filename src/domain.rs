use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// Type aliases for clarity
pub type YearId = u32;
pub type PeriodId = u32;
pub type CourseId = u32;
pub type DepartmentId = u32;
pub type OfferingId = u32;
pub type ExamId = u32;
pub type StudentId = u32;
pub type InstructorId = u32;
pub type ClassroomId = u32;
pub type ChairId = u32;
pub type SlotId = u32;
pub type SessionId = u32;
pub type SittingId = u32;
pub type LayoutId = u32;
pub type AssistantId = u32;
pub type AssignmentId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Semester {
    Fall,
    Spring,
    Summer,
}

/// Exam period within a semester.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodKind {
    Midterm,
    Final,
    Resit,
    Makeup,
}

/// An academic year-semester pair, e.g. 2025-2026 Fall.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcademicYear {
    pub id: YearId,
    pub year: u16,
    pub semester: Semester,
    pub active: bool,
}

/// One exam period of an academic year. At most one period is active
/// system-wide; activation goes through the store so the invariant holds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcademicPeriod {
    pub id: PeriodId,
    pub year_id: YearId,
    pub kind: PeriodKind,
    pub active: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: CourseId,
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Department {
    pub id: DepartmentId,
    pub code: String,
}

/// A course taught by a department in a numbered section for one year.
/// Unique per (course, department, section, year).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseOffering {
    pub id: OfferingId,
    pub course_id: CourseId,
    pub department_id: DepartmentId,
    pub section: u8,
    pub year_id: YearId,
    pub instructor_in_charge: InstructorId,
    #[serde(default)]
    pub co_instructors: Vec<InstructorId>,
}

/// One offering examined in one period; at most one per pair.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamInstance {
    pub id: ExamId,
    pub offering_id: OfferingId,
    pub period_id: PeriodId,
}

/// Suppresses the (course, period) pair from timetabling and allocation.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NoExamException {
    pub course_id: CourseId,
    pub period_id: PeriodId,
}

/// A (day, session) cell of a period's exam grid.
///
/// The long code packs week/day/session digits; the short code is the dense
/// row-major cell index. Unique per period on short code, long code and time.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSlot {
    pub id: SlotId,
    pub period_id: PeriodId,
    pub short_code: u16,
    pub long_code: u16,
    pub time: Option<NaiveDateTime>,
}

/// Binds an exam instance to exactly one time slot.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledSession {
    pub id: SessionId,
    pub exam_id: ExamId,
    pub slot_id: SlotId,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Classroom {
    pub id: ClassroomId,
    pub name: String,
    pub block: String,
    pub capacity: u32,
    /// Reduced seat count for spaced seating plans. Carried in the dataset
    /// for occupancy reporting; the allocation stages plan on `capacity`.
    pub soft_capacity: u32,
}

/// A physical seat, ranked by `assign_order` within its classroom so the
/// first N seats can be picked when a sitting is under-filled.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Chair {
    pub id: ChairId,
    pub classroom_id: ClassroomId,
    pub column: char,
    pub row: u8,
    pub assign_order: u16,
}

/// One classroom hosting one exam instance; unique per (exam, classroom).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassroomSitting {
    pub id: SittingId,
    pub exam_id: ExamId,
    pub classroom_id: ClassroomId,
}

/// One student placed at one sitting, optionally on a specific chair.
/// If a chair is set its classroom equals the sitting's classroom.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatLayout {
    pub id: LayoutId,
    pub student_id: StudentId,
    pub sitting_id: SittingId,
    pub chair_id: Option<ChairId>,
}

/// An invigilator bound to a department.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Assistant {
    pub id: AssistantId,
    pub department_id: DepartmentId,
    pub active: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantAssignment {
    pub id: AssignmentId,
    pub assistant_id: AssistantId,
    pub sitting_id: SittingId,
    pub active: bool,
}

/// Declared affinity between an assistant and an offering, used as a soft
/// preference when assigning invigilators.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistedCourse {
    pub assistant_id: AssistantId,
    pub offering_id: OfferingId,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    pub student_id: StudentId,
    pub exam_id: ExamId,
}

/// Long code for a grid cell: week digit, day-of-week digit, session digit.
/// Days are numbered across weeks of five exam days each.
pub fn long_code(day: u16, session: u16) -> u16 {
    (day / 5 + 1) * 100 + (day % 5 + 1) * 10 + session + 1
}

/// Dense row-major cell index within a grid.
pub fn short_code(day: u16, session: u16, sessions_per_day: u16) -> u16 {
    sessions_per_day * day + session
}

/// Day key of a long code, shared by all sessions of the same exam day.
pub fn day_key(long_code: u16) -> u16 {
    long_code / 10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_code_packs_week_day_session() {
        // day 0..4 -> week 1, day 5..9 -> week 2
        assert_eq!(long_code(0, 0), 111);
        assert_eq!(long_code(0, 3), 114);
        assert_eq!(long_code(4, 0), 151);
        assert_eq!(long_code(5, 0), 211);
        assert_eq!(long_code(9, 3), 254);
    }

    #[test]
    fn short_code_is_row_major() {
        assert_eq!(short_code(0, 0, 4), 0);
        assert_eq!(short_code(2, 3, 4), 11);
        assert_eq!(short_code(3, 4, 5), 19);
    }

    #[test]
    fn day_key_ignores_session() {
        assert_eq!(day_key(long_code(6, 0)), day_key(long_code(6, 3)));
        assert_ne!(day_key(long_code(5, 0)), day_key(long_code(6, 0)));
    }
}
