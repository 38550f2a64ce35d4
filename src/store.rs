use std::collections::HashSet;

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::error::{FeedbackError, Result};
use crate::models::{
    ClassKey, FeedbackDraft, FeedbackKey, FeedbackRecord, SentimentResult, Student, Subject,
    Teacher, TeacherSubject,
};

/// Query shapes the aggregation code needs from the record store.
///
/// Reads return owned values so implementations are free to materialize rows
/// on demand.
pub trait RecordStore {
    fn students(&self) -> Vec<Student>;
    fn teachers(&self) -> Vec<Teacher>;
    fn subjects(&self) -> Vec<Subject>;

    fn student(&self, id: Uuid) -> Option<Student>;
    fn student_by_prn(&self, prn: &str) -> Option<Student>;
    fn teacher(&self, id: Uuid) -> Option<Teacher>;
    fn teacher_by_employee_id(&self, employee_id: &str) -> Option<Teacher>;
    fn subject(&self, id: Uuid) -> Option<Subject>;

    /// Subjects of a branch/semester whose division matches or is unset.
    fn subjects_for_class(&self, branch: &str, semester: i32, division: Option<&str>)
        -> Vec<Subject>;
    /// Teachers from the explicit assignment table, newest assignment first.
    fn teachers_for_subject(&self, subject_id: Uuid) -> Vec<Teacher>;
    fn assignment_count(&self, teacher_id: Uuid) -> usize;

    fn students_with_class_teacher(&self, teacher_id: Uuid) -> Vec<Student>;
    fn students_in_class(&self, class: &ClassKey) -> Vec<Student>;
    fn class_teacher_for(&self, class: &ClassKey) -> Option<Teacher>;

    fn feedback_by_student(&self, student_id: Uuid) -> Vec<FeedbackRecord>;
    fn feedback_by_teacher(&self, teacher_id: Uuid) -> Vec<FeedbackRecord>;
    /// Newest first.
    fn all_feedback(&self) -> Vec<FeedbackRecord>;
    fn feedback_exists(&self, key: &FeedbackKey) -> bool;

    /// Atomic check-then-insert; a duplicate key is a `Conflict`.
    fn insert_feedback(&mut self, draft: FeedbackDraft) -> Result<FeedbackRecord>;
    fn update_sentiment(
        &mut self,
        feedback_id: Uuid,
        comment: SentimentResult,
        suggestion: SentimentResult,
    ) -> Result<()>;
    fn put_student(&mut self, student: Student) -> Result<()>;
    fn put_teacher(&mut self, teacher: Teacher) -> Result<()>;
}

/// In-memory record store, also used as the snapshot that database reads are
/// loaded into.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    students: Vec<Student>,
    teachers: Vec<Teacher>,
    subjects: Vec<Subject>,
    assignments: Vec<TeacherSubject>,
    feedback: Vec<FeedbackRecord>,
    feedback_keys: HashSet<FeedbackKey>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_subject(&mut self, subject: Subject) -> Result<()> {
        let duplicate = self.subjects.iter().any(|existing| {
            existing.id != subject.id
                && existing.code == subject.code
                && existing.branch == subject.branch
                && existing.semester == subject.semester
                && existing.division == subject.division
        });
        if duplicate {
            return Err(FeedbackError::Conflict(format!(
                "subject {} already exists for {} semester {}",
                subject.code, subject.branch, subject.semester
            )));
        }
        self.subjects.retain(|existing| existing.id != subject.id);
        self.subjects.push(subject);
        Ok(())
    }

    pub fn assign_subject(&mut self, assignment: TeacherSubject) -> Result<()> {
        if self.teacher(assignment.teacher_id).is_none() {
            return Err(FeedbackError::not_found(
                "teacher",
                assignment.teacher_id.to_string(),
            ));
        }
        if self.subject(assignment.subject_id).is_none() {
            return Err(FeedbackError::not_found(
                "subject",
                assignment.subject_id.to_string(),
            ));
        }
        if self.assignments.iter().any(|existing| {
            existing.teacher_id == assignment.teacher_id
                && existing.subject_id == assignment.subject_id
        }) {
            return Err(FeedbackError::Conflict(
                "subject is already assigned to this teacher".to_string(),
            ));
        }
        self.assignments.push(assignment);
        Ok(())
    }

    /// Refused while any feedback references the subject.
    pub fn remove_subject(&mut self, subject_id: Uuid) -> Result<()> {
        if self.subject(subject_id).is_none() {
            return Err(FeedbackError::not_found("subject", subject_id.to_string()));
        }
        let feedback_count = self
            .feedback
            .iter()
            .filter(|record| record.subject_id == subject_id)
            .count();
        if feedback_count > 0 {
            return Err(FeedbackError::Conflict(format!(
                "subject has {feedback_count} feedback records and cannot be deleted"
            )));
        }
        self.assignments
            .retain(|assignment| assignment.subject_id != subject_id);
        self.subjects.retain(|subject| subject.id != subject_id);
        Ok(())
    }

    pub fn assignments(&self) -> &[TeacherSubject] {
        &self.assignments
    }

    /// Loads an already-stored record, e.g. from a database snapshot.
    pub fn restore_feedback(&mut self, record: FeedbackRecord) -> Result<()> {
        if !self.feedback_keys.insert(record.key()) {
            return Err(FeedbackError::Conflict(format!(
                "duplicate feedback record {}",
                record.id
            )));
        }
        self.feedback.push(record);
        Ok(())
    }

    fn sorted_students(&self, predicate: impl Fn(&Student) -> bool) -> Vec<Student> {
        let mut students: Vec<Student> = self
            .students
            .iter()
            .filter(|student| predicate(student))
            .cloned()
            .collect();
        students.sort_by(|a, b| a.prn.cmp(&b.prn));
        students
    }

    fn sorted_feedback(&self, predicate: impl Fn(&FeedbackRecord) -> bool) -> Vec<FeedbackRecord> {
        let mut records: Vec<FeedbackRecord> = self
            .feedback
            .iter()
            .filter(|record| predicate(record))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }
}

impl RecordStore for MemoryStore {
    fn students(&self) -> Vec<Student> {
        self.sorted_students(|_| true)
    }

    fn teachers(&self) -> Vec<Teacher> {
        let mut teachers = self.teachers.clone();
        teachers.sort_by(|a, b| a.employee_id.cmp(&b.employee_id));
        teachers
    }

    fn subjects(&self) -> Vec<Subject> {
        let mut subjects = self.subjects.clone();
        subjects.sort_by(|a, b| a.code.cmp(&b.code));
        subjects
    }

    fn student(&self, id: Uuid) -> Option<Student> {
        self.students.iter().find(|s| s.id == id).cloned()
    }

    fn student_by_prn(&self, prn: &str) -> Option<Student> {
        self.students.iter().find(|s| s.prn == prn).cloned()
    }

    fn teacher(&self, id: Uuid) -> Option<Teacher> {
        self.teachers.iter().find(|t| t.id == id).cloned()
    }

    fn teacher_by_employee_id(&self, employee_id: &str) -> Option<Teacher> {
        self.teachers
            .iter()
            .find(|t| t.employee_id == employee_id)
            .cloned()
    }

    fn subject(&self, id: Uuid) -> Option<Subject> {
        self.subjects.iter().find(|s| s.id == id).cloned()
    }

    fn subjects_for_class(
        &self,
        branch: &str,
        semester: i32,
        division: Option<&str>,
    ) -> Vec<Subject> {
        let mut subjects: Vec<Subject> = self
            .subjects
            .iter()
            .filter(|subject| subject.branch == branch && subject.semester == semester)
            .filter(|subject| match subject.division.as_deref() {
                None => true,
                Some(own) => Some(own) == division,
            })
            .cloned()
            .collect();
        subjects.sort_by(|a, b| a.code.cmp(&b.code));
        subjects
    }

    fn teachers_for_subject(&self, subject_id: Uuid) -> Vec<Teacher> {
        let mut assignments: Vec<&TeacherSubject> = self
            .assignments
            .iter()
            .filter(|assignment| assignment.subject_id == subject_id)
            .collect();
        assignments.sort_by(|a, b| b.assigned_at.cmp(&a.assigned_at));
        assignments
            .into_iter()
            .filter_map(|assignment| self.teacher(assignment.teacher_id))
            .collect()
    }

    fn assignment_count(&self, teacher_id: Uuid) -> usize {
        self.assignments
            .iter()
            .filter(|assignment| assignment.teacher_id == teacher_id)
            .count()
    }

    fn students_with_class_teacher(&self, teacher_id: Uuid) -> Vec<Student> {
        self.sorted_students(|student| student.class_teacher_id == Some(teacher_id))
    }

    fn students_in_class(&self, class: &ClassKey) -> Vec<Student> {
        self.sorted_students(|student| student.class_key().as_ref() == Some(class))
    }

    fn class_teacher_for(&self, class: &ClassKey) -> Option<Teacher> {
        self.teachers
            .iter()
            .find(|teacher| teacher.class_assignment.as_ref() == Some(class))
            .cloned()
    }

    fn feedback_by_student(&self, student_id: Uuid) -> Vec<FeedbackRecord> {
        self.sorted_feedback(|record| record.student_id == student_id)
    }

    fn feedback_by_teacher(&self, teacher_id: Uuid) -> Vec<FeedbackRecord> {
        self.sorted_feedback(|record| record.teacher_id == teacher_id)
    }

    fn all_feedback(&self) -> Vec<FeedbackRecord> {
        self.sorted_feedback(|_| true)
    }

    fn feedback_exists(&self, key: &FeedbackKey) -> bool {
        self.feedback_keys.contains(key)
    }

    fn insert_feedback(&mut self, draft: FeedbackDraft) -> Result<FeedbackRecord> {
        if !self.feedback_keys.insert(draft.key) {
            return Err(FeedbackError::Conflict(
                "feedback already submitted for this subject and teacher".to_string(),
            ));
        }
        let record = draft.into_record(Uuid::new_v4(), Utc::now());
        debug!(feedback_id = %record.id, "stored feedback record");
        self.feedback.push(record.clone());
        Ok(record)
    }

    fn update_sentiment(
        &mut self,
        feedback_id: Uuid,
        comment: SentimentResult,
        suggestion: SentimentResult,
    ) -> Result<()> {
        let record = self
            .feedback
            .iter_mut()
            .find(|record| record.id == feedback_id)
            .ok_or_else(|| FeedbackError::not_found("feedback", feedback_id.to_string()))?;
        record.comment_sentiment = comment;
        record.suggestion_sentiment = suggestion;
        Ok(())
    }

    fn put_student(&mut self, student: Student) -> Result<()> {
        if self
            .students
            .iter()
            .any(|existing| existing.prn == student.prn && existing.id != student.id)
        {
            return Err(FeedbackError::Conflict(format!(
                "PRN {} is already registered",
                student.prn
            )));
        }
        match self.students.iter_mut().find(|existing| existing.id == student.id) {
            Some(existing) => *existing = student,
            None => self.students.push(student),
        }
        Ok(())
    }

    fn put_teacher(&mut self, teacher: Teacher) -> Result<()> {
        if self.teachers.iter().any(|existing| {
            existing.employee_id == teacher.employee_id && existing.id != teacher.id
        }) {
            return Err(FeedbackError::Conflict(format!(
                "employee ID {} is already registered",
                teacher.employee_id
            )));
        }
        match self.teachers.iter_mut().find(|existing| existing.id == teacher.id) {
            Some(existing) => *existing = teacher,
            None => self.teachers.push(teacher),
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::{Ratings, SentimentResult};

    fn draft(student: &Student, teacher: &Teacher, subject: &Subject) -> FeedbackDraft {
        FeedbackDraft {
            key: FeedbackKey {
                student_id: student.id,
                teacher_id: teacher.id,
                subject_id: subject.id,
                semester: student.semester,
            },
            ratings: Ratings {
                teaching_effectiveness: 4,
                course_content: 4,
                interaction_quality: 4,
                assignment_feedback: 4,
                overall_satisfaction: 4,
            },
            comments: String::new(),
            suggestions: String::new(),
            comment_sentiment: SentimentResult::none(),
            suggestion_sentiment: SentimentResult::none(),
            is_anonymous: true,
        }
    }

    #[test]
    fn subjects_for_class_includes_common_subjects() {
        let mut store = MemoryStore::new();
        store.add_subject(subject("DSA", Some("A"))).unwrap();
        store.add_subject(subject("OOP", Some("B"))).unwrap();
        store.add_subject(subject("MATH", None)).unwrap();

        let codes: Vec<String> = store
            .subjects_for_class("COMP", 3, Some("A"))
            .into_iter()
            .map(|s| s.code)
            .collect();
        assert_eq!(codes, vec!["DSA", "MATH"]);

        let codes: Vec<String> = store
            .subjects_for_class("COMP", 3, None)
            .into_iter()
            .map(|s| s.code)
            .collect();
        assert_eq!(codes, vec!["MATH"]);
        assert!(store.subjects_for_class("MECH", 3, Some("A")).is_empty());
    }

    #[test]
    fn duplicate_feedback_key_is_a_conflict() {
        let mut store = MemoryStore::new();
        let s = student("PRN001", Some("A"));
        let t = teacher("EMP01");
        let subj = subject("MATH", None);

        store.insert_feedback(draft(&s, &t, &subj)).unwrap();
        let err = store.insert_feedback(draft(&s, &t, &subj)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(store.all_feedback().len(), 1);
    }

    #[test]
    fn subject_with_feedback_cannot_be_removed() {
        let mut store = MemoryStore::new();
        let s = student("PRN001", Some("A"));
        let t = teacher("EMP01");
        let subj = subject("MATH", None);
        let unused = subject("ART", None);
        store.add_subject(subj.clone()).unwrap();
        store.add_subject(unused.clone()).unwrap();
        store.insert_feedback(draft(&s, &t, &subj)).unwrap();

        assert_eq!(
            store.remove_subject(subj.id).unwrap_err().kind(),
            ErrorKind::Conflict
        );
        store.remove_subject(unused.id).unwrap();
        assert_eq!(store.subjects().len(), 1);
    }

    #[test]
    fn unique_identifiers_are_enforced() {
        let mut store = MemoryStore::new();
        store.put_student(student("PRN001", Some("A"))).unwrap();
        let err = store.put_student(student("PRN001", Some("B"))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        store.put_teacher(teacher("EMP01")).unwrap();
        assert!(store.put_teacher(teacher("EMP01")).is_err());
    }

    #[test]
    fn assignments_require_known_rows_and_are_unique() {
        let mut store = MemoryStore::new();
        let t = teacher("EMP01");
        let subj = subject("MATH", None);
        assert_eq!(
            store.assign_subject(assignment(&t, &subj, 0)).unwrap_err().kind(),
            ErrorKind::NotFound
        );
        store.put_teacher(t.clone()).unwrap();
        store.add_subject(subj.clone()).unwrap();
        store.assign_subject(assignment(&t, &subj, 0)).unwrap();
        assert!(store.assign_subject(assignment(&t, &subj, 1)).is_err());
        assert_eq!(store.assignment_count(t.id), 1);
    }

    #[test]
    fn teachers_for_subject_lists_newest_assignment_first() {
        let mut store = MemoryStore::new();
        let older = teacher("EMP01");
        let newer = teacher("EMP02");
        let subj = subject("MATH", None);
        store.put_teacher(older.clone()).unwrap();
        store.put_teacher(newer.clone()).unwrap();
        store.add_subject(subj.clone()).unwrap();
        store.assign_subject(assignment(&older, &subj, 10)).unwrap();
        store.assign_subject(assignment(&newer, &subj, 1)).unwrap();

        let ids: Vec<String> = store
            .teachers_for_subject(subj.id)
            .into_iter()
            .map(|t| t.employee_id)
            .collect();
        assert_eq!(ids, vec!["EMP02", "EMP01"]);
    }
}
