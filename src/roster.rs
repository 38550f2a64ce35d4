use tracing::{debug, info};

use crate::error::{FeedbackError, Result};
use crate::models::{ClassKey, Student, Teacher};
use crate::store::RecordStore;

/// Creates or updates a student. A student with a complete cohort and no class
/// teacher picks up the cohort's class teacher, if one is designated.
pub fn save_student<S: RecordStore>(store: &mut S, mut student: Student) -> Result<Student> {
    if student.prn.trim().is_empty() {
        return Err(FeedbackError::Validation("PRN is required".to_string()));
    }
    if student.class_teacher_id.is_none() {
        if let Some(class) = student.class_key() {
            if let Some(teacher) = store.class_teacher_for(&class) {
                debug!(prn = %student.prn, teacher = %teacher.employee_id, "auto-assigned class teacher");
                student.class_teacher_id = Some(teacher.id);
            }
        }
    }
    store.put_student(student.clone())?;
    Ok(student)
}

/// Makes `employee_id` the class teacher of `class` and points every student
/// of the cohort at them. Students of a class the teacher held before are
/// released. Returns the number of students updated.
pub fn designate_class_teacher<S: RecordStore>(
    store: &mut S,
    employee_id: &str,
    class: ClassKey,
) -> Result<usize> {
    let mut teacher = store
        .teacher_by_employee_id(employee_id)
        .ok_or_else(|| FeedbackError::not_found("teacher", employee_id))?;

    if let Some(holder) = store.class_teacher_for(&class) {
        if holder.id != teacher.id {
            return Err(FeedbackError::Conflict(format!(
                "{} is already class teacher of {}",
                holder.employee_id, class
            )));
        }
    }

    let students = store.students_in_class(&class);
    teacher.class_assignment = Some(class.clone());
    let teacher_id = teacher.id;
    store.put_teacher(teacher)?;

    // Students of a previously held class no longer belong to this teacher.
    for mut former in store.students_with_class_teacher(teacher_id) {
        if former.class_key().as_ref() != Some(&class) {
            debug!(prn = %former.prn, "released from previous class teacher");
            former.class_teacher_id = None;
            store.put_student(former)?;
        }
    }

    for mut student in students.iter().cloned() {
        student.class_teacher_id = Some(teacher_id);
        store.put_student(student)?;
    }

    info!(teacher = employee_id, class = %class, students = students.len(), "designated class teacher");
    Ok(students.len())
}

/// Students whose class teacher is `teacher`; falls back to the cohort match
/// for data that predates automatic assignment.
pub fn class_roster<S: RecordStore>(store: &S, teacher: &Teacher) -> Vec<Student> {
    let students = store.students_with_class_teacher(teacher.id);
    if !students.is_empty() {
        return students;
    }
    match &teacher.class_assignment {
        Some(class) => store.students_in_class(class),
        None => Vec::new(),
    }
}
