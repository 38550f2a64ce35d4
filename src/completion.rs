//! Feedback completion tracking and rating aggregation.

use std::collections::{BTreeMap, HashMap, HashSet};

use uuid::Uuid;

use crate::error::{FeedbackError, Result};
use crate::models::{
    ClassCompletion, ClassSummary, CompletionState, CompletionStatus, DistributionEntry,
    FeedbackKey, FeedbackObligation, FeedbackRecord, HistogramBucket, InstitutionOverview,
    OverallAverages, RatingAverages, RecentFeedback, SentimentDistribution, Student,
    StudentContact, StudentObligations, SubjectBreakdown, SubjectRef, Teacher, TeacherAggregate,
};
use crate::report::{ANONYMOUS, DATE_FORMAT};
use crate::roster;
use crate::store::RecordStore;

const RECENT_FEEDBACK_LIMIT: usize = 10;

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    round2(part as f64 / whole as f64 * 100.0)
}

fn average(values: impl Iterator<Item = i32>) -> f64 {
    let (sum, count) = values.fold((0i64, 0usize), |(sum, count), value| {
        (sum + value as i64, count + 1)
    });
    if count == 0 {
        return 0.0;
    }
    round2(sum as f64 / count as f64)
}

/// One obligation per (applicable subject, assigned teacher). Subjects without
/// a teacher are listed separately and create no obligation.
pub fn student_obligations<S: RecordStore>(store: &S, student: &Student) -> StudentObligations {
    let mut obligations = Vec::new();
    let mut unassigned_subjects = Vec::new();

    for subject in store.subjects_for_class(
        &student.branch,
        student.semester,
        student.division.as_deref(),
    ) {
        let teachers = store.teachers_for_subject(subject.id);
        if teachers.is_empty() {
            unassigned_subjects.push(SubjectRef::from(&subject));
            continue;
        }
        for teacher in teachers {
            let key = FeedbackKey {
                student_id: student.id,
                teacher_id: teacher.id,
                subject_id: subject.id,
                semester: student.semester,
            };
            obligations.push(FeedbackObligation {
                student_id: student.id,
                subject: SubjectRef::from(&subject),
                teacher: teacher.to_ref(),
                semester: student.semester,
                completed: store.feedback_exists(&key),
            });
        }
    }

    StudentObligations {
        student_id: student.id,
        semester: student.semester,
        obligations,
        unassigned_subjects,
    }
}

/// Completion of one student against a fixed per-class denominator.
pub fn completion_status<S: RecordStore>(
    store: &S,
    student: &Student,
    total_possible_feedbacks: usize,
) -> CompletionStatus {
    let obligations = student_obligations(store, student);
    let submitted = obligations.submitted();
    let (completed, pending): (Vec<FeedbackObligation>, Vec<FeedbackObligation>) = obligations
        .obligations
        .into_iter()
        .partition(|obligation| obligation.completed);

    CompletionStatus {
        student_id: student.id,
        prn: student.prn.clone(),
        name: student.full_name.clone(),
        email: student.email.clone(),
        division: student.division.clone().unwrap_or_else(|| "N/A".to_string()),
        submitted,
        pending: pending.len(),
        completion_percentage: percentage(submitted, total_possible_feedbacks),
        completed_labels: completed.iter().map(FeedbackObligation::label).collect(),
        status: if pending.is_empty() {
            CompletionState::Complete
        } else {
            CompletionState::Pending
        },
        pending_obligations: pending,
    }
}

pub fn class_completion<S: RecordStore>(store: &S, teacher: &Teacher) -> Result<ClassCompletion> {
    let Some(class) = teacher.class_assignment.as_ref() else {
        return Err(FeedbackError::Validation(format!(
            "{} is not a class teacher",
            teacher.employee_id
        )));
    };

    let students = roster::class_roster(store, teacher);
    let subjects = store.subjects_for_class(&class.branch, class.semester, Some(&class.division));
    let distinct_teachers: HashSet<Uuid> = subjects
        .iter()
        .flat_map(|subject| store.teachers_for_subject(subject.id))
        .map(|t| t.id)
        .collect();
    let total_possible_feedbacks = subjects.len() * distinct_teachers.len();

    let mut statuses = Vec::with_capacity(students.len());
    let mut not_started = Vec::new();
    let mut total_feedback_received = 0;

    for student in &students {
        let given = store.feedback_by_student(student.id).len();
        total_feedback_received += given;
        if given == 0 {
            not_started.push(StudentContact {
                prn: student.prn.clone(),
                name: student.full_name.clone(),
                email: student.email.clone(),
            });
        }
        statuses.push(completion_status(store, student, total_possible_feedbacks));
    }

    let completed_students = statuses
        .iter()
        .filter(|status| status.status == CompletionState::Complete)
        .count();
    let students_with_submissions = students.len() - not_started.len();

    let summary = ClassSummary {
        total_students: students.len(),
        total_subjects: subjects.len(),
        total_possible_feedbacks,
        completed_students,
        pending_students: statuses.len() - completed_students,
        students_with_submissions,
        students_without_submissions: not_started.len(),
        submission_rate: percentage(students_with_submissions, students.len()),
        total_feedback_received,
    };

    Ok(ClassCompletion {
        class_teacher: teacher.to_ref(),
        class: Some(class.clone()),
        students: statuses,
        not_started,
        summary,
    })
}

pub fn sentiment_distribution(records: &[FeedbackRecord]) -> SentimentDistribution {
    let mut distribution = SentimentDistribution::default();
    for record in records {
        distribution.record(record.comment_sentiment.label);
        distribution.record(record.suggestion_sentiment.label);
    }
    distribution
}

/// Always five buckets, ratings 1 through 5.
pub fn rating_histogram(records: &[FeedbackRecord]) -> Vec<HistogramBucket> {
    (1..=5)
        .map(|rating| HistogramBucket {
            rating,
            count: records
                .iter()
                .filter(|record| record.ratings.overall_satisfaction == rating)
                .count(),
        })
        .collect()
}

pub fn rating_averages(records: &[FeedbackRecord]) -> RatingAverages {
    RatingAverages {
        teaching_effectiveness: average(records.iter().map(|r| r.ratings.teaching_effectiveness)),
        course_content: average(records.iter().map(|r| r.ratings.course_content)),
        interaction_quality: average(records.iter().map(|r| r.ratings.interaction_quality)),
        assignment_feedback: average(records.iter().map(|r| r.ratings.assignment_feedback)),
        overall_satisfaction: average(records.iter().map(|r| r.ratings.overall_satisfaction)),
    }
}

pub fn teacher_aggregate<S: RecordStore>(store: &S, teacher: &Teacher) -> TeacherAggregate {
    let records = store.feedback_by_teacher(teacher.id);

    let mut by_subject: HashMap<Uuid, Vec<i32>> = HashMap::new();
    for record in &records {
        by_subject
            .entry(record.subject_id)
            .or_default()
            .push(record.ratings.overall_satisfaction);
    }

    let mut subject_breakdown: Vec<SubjectBreakdown> = by_subject
        .into_iter()
        .map(|(subject_id, ratings)| {
            let (subject_code, subject_name) = match store.subject(subject_id) {
                Some(subject) => (subject.code, subject.name),
                None => (subject_id.to_string(), String::new()),
            };
            SubjectBreakdown {
                subject_code,
                subject_name,
                feedback_count: ratings.len(),
                avg_rating: average(ratings.into_iter()),
            }
        })
        .collect();
    subject_breakdown.sort_by(|a, b| {
        b.feedback_count
            .cmp(&a.feedback_count)
            .then_with(|| a.subject_code.cmp(&b.subject_code))
    });

    TeacherAggregate {
        teacher: teacher.to_ref(),
        total_feedback: records.len(),
        subjects_taught: store.assignment_count(teacher.id),
        average_ratings: rating_averages(&records),
        sentiment_distribution: sentiment_distribution(&records),
        rating_histogram: rating_histogram(&records),
        subject_breakdown,
    }
}

fn distribution(labels: impl Iterator<Item = String>) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for label in labels {
        *counts.entry(label).or_insert(0) += 1;
    }
    counts
}

pub fn institution_overview<S: RecordStore>(store: &S) -> InstitutionOverview {
    let students = store.students();
    let feedback = store.all_feedback();

    let mut branch_distribution: Vec<DistributionEntry> =
        distribution(students.iter().map(|s| s.branch.clone()))
            .into_iter()
            .map(|(label, count)| DistributionEntry { label, count })
            .collect();
    branch_distribution.sort_by(|a, b| b.count.cmp(&a.count));

    let year_distribution = distribution(students.iter().map(|s| s.year.clone()))
        .into_iter()
        .map(|(label, count)| DistributionEntry { label, count })
        .collect();

    let recent_feedback = feedback
        .iter()
        .take(RECENT_FEEDBACK_LIMIT)
        .map(|record| RecentFeedback {
            id: record.id,
            student: if record.is_anonymous {
                ANONYMOUS.to_string()
            } else {
                store
                    .student(record.student_id)
                    .map(|s| s.full_name)
                    .unwrap_or_default()
            },
            teacher: store
                .teacher(record.teacher_id)
                .map(|t| t.full_name)
                .unwrap_or_default(),
            subject: store
                .subject(record.subject_id)
                .map(|s| s.name)
                .unwrap_or_default(),
            rating: record.ratings.overall_satisfaction,
            date: record.created_at.format(DATE_FORMAT).to_string(),
        })
        .collect();

    InstitutionOverview {
        total_students: students.len(),
        total_teachers: store.teachers().len(),
        total_subjects: store.subjects().len(),
        total_feedback: feedback.len(),
        average_ratings: OverallAverages {
            overall: average(feedback.iter().map(|r| r.ratings.overall_satisfaction)),
            teaching: average(feedback.iter().map(|r| r.ratings.teaching_effectiveness)),
            content: average(feedback.iter().map(|r| r.ratings.course_content)),
        },
        branch_distribution,
        year_distribution,
        recent_feedback,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use proptest::prelude::*;

    use super::*;
    use crate::feedback::tests::{campus, submission};
    use crate::feedback::{submit, FeedbackSubmission};
    use crate::models::{FeedbackDraft, Ratings, SentimentLabel, SentimentResult};
    use crate::roster::save_student;
    use crate::sentiment::{SentimentClassifier, SentimentPolicy};
    use crate::store::fixtures::{assignment, class, student, subject, teacher};
    use crate::store::MemoryStore;

    fn classifier() -> SentimentClassifier {
        SentimentClassifier::new(SentimentPolicy::Standard)
    }

    fn uniform(value: i32) -> Ratings {
        Ratings {
            teaching_effectiveness: value,
            course_content: value,
            interaction_quality: value,
            assignment_feedback: value,
            overall_satisfaction: value,
        }
    }

    #[test]
    fn obligation_flips_to_completed_after_submission() {
        let mut c = campus();
        let before = student_obligations(&c.store, &c.student);
        assert_eq!(before.obligations.len(), 1);
        let obligation = &before.obligations[0];
        assert_eq!(obligation.subject.code, "MATH101");
        assert_eq!(obligation.teacher.employee_id, "EMP01");
        assert!(!obligation.completed);

        let sub = submission(&c, "Excellent teacher, very clear explanations");
        let record = submit(&mut c.store, sub, &classifier()).unwrap();
        assert_eq!(record.comment_sentiment.label, SentimentLabel::Positive);

        let after = student_obligations(&c.store, &c.student);
        assert!(after.obligations[0].completed);
        assert_eq!(after.submitted(), 1);
        assert_eq!(after.pending(), 0);
        let again = submission(&c, "again");
        assert!(submit(&mut c.store, again, &classifier()).is_err());
    }

    #[test]
    fn subjects_without_teachers_are_surfaced_not_obligated() {
        let mut c = campus();
        c.store.add_subject(subject("LAB", None)).unwrap();
        c.store.add_subject(subject("ELEC-B", Some("B"))).unwrap();

        let obligations = student_obligations(&c.store, &c.student);
        assert_eq!(obligations.obligations.len(), 1);
        assert_eq!(obligations.unassigned_subjects.len(), 1);
        assert_eq!(obligations.unassigned_subjects[0].code, "LAB");
        assert_eq!(obligations.unassigned_subjects[0].division, "Common");
    }

    #[test]
    fn each_assigned_teacher_is_a_separate_obligation() {
        let mut c = campus();
        let co_teacher = teacher("EMP02");
        c.store.put_teacher(co_teacher.clone()).unwrap();
        c.store
            .assign_subject(assignment(&co_teacher, &c.subject, 3))
            .unwrap();

        let obligations = student_obligations(&c.store, &c.student);
        let labels: Vec<String> = obligations.obligations.iter().map(|o| o.label()).collect();
        assert_eq!(labels, vec!["MATH101 (EMP01)", "MATH101 (EMP02)"]);
    }

    #[test]
    fn feedback_from_another_semester_does_not_complete_obligation() {
        let mut c = campus();
        let draft = FeedbackDraft {
            key: FeedbackKey {
                student_id: c.student.id,
                teacher_id: c.teacher.id,
                subject_id: c.subject.id,
                semester: 2,
            },
            ratings: uniform(3),
            comments: String::new(),
            suggestions: String::new(),
            comment_sentiment: SentimentResult::none(),
            suggestion_sentiment: SentimentResult::none(),
            is_anonymous: false,
        };
        c.store.insert_feedback(draft).unwrap();
        assert!(!student_obligations(&c.store, &c.student).obligations[0].completed);
    }

    fn class_fixture() -> (MemoryStore, Teacher, Vec<Student>, Vec<Teacher>, Vec<crate::models::Subject>) {
        let mut store = MemoryStore::new();
        let mut ct = teacher("CT01");
        ct.class_assignment = Some(class("A"));
        store.put_teacher(ct.clone()).unwrap();

        let t1 = teacher("EMP01");
        let t2 = teacher("EMP02");
        store.put_teacher(t1.clone()).unwrap();
        store.put_teacher(t2.clone()).unwrap();

        let math = subject("MATH", None);
        let dsa = subject("DSA", Some("A"));
        store.add_subject(math.clone()).unwrap();
        store.add_subject(dsa.clone()).unwrap();
        store.assign_subject(assignment(&t1, &math, 2)).unwrap();
        store.assign_subject(assignment(&t2, &dsa, 1)).unwrap();

        let s1 = save_student(&mut store, student("PRN001", Some("A"))).unwrap();
        let s2 = save_student(&mut store, student("PRN002", Some("A"))).unwrap();
        save_student(&mut store, student("PRN003", Some("B"))).unwrap();

        (store, ct, vec![s1, s2], vec![t1, t2], vec![math, dsa])
    }

    fn give(store: &mut MemoryStore, student: &Student, teacher: &Teacher, subject_id: Uuid) {
        submit(
            store,
            FeedbackSubmission {
                student_id: student.id,
                teacher_id: teacher.id,
                subject_id,
                ratings: uniform(4),
                comments: "Good".to_string(),
                suggestions: String::new(),
                is_anonymous: false,
            },
            &classifier(),
        )
        .unwrap();
    }

    #[test]
    fn class_completion_uses_fixed_denominator() {
        let (mut store, ct, students, teachers, subjects) = class_fixture();
        give(&mut store, &students[0], &teachers[0], subjects[0].id);
        give(&mut store, &students[0], &teachers[1], subjects[1].id);
        give(&mut store, &students[1], &teachers[0], subjects[0].id);

        let completion = class_completion(&store, &ct).unwrap();
        // 2 subjects x 2 distinct teachers.
        assert_eq!(completion.summary.total_possible_feedbacks, 4);
        assert_eq!(completion.summary.total_students, 2);
        assert_eq!(completion.summary.total_subjects, 2);

        let first = &completion.students[0];
        assert_eq!(first.prn, "PRN001");
        assert_eq!(first.submitted, 2);
        assert_eq!(first.pending, 0);
        assert_eq!(first.completion_percentage, 50.0);
        assert_eq!(first.status, CompletionState::Complete);

        let second = &completion.students[1];
        assert_eq!(second.submitted, 1);
        assert_eq!(second.pending, 1);
        assert_eq!(second.completion_percentage, 25.0);
        assert_eq!(second.status, CompletionState::Pending);
        assert_eq!(second.pending_obligations[0].label(), "DSA (EMP02)");

        assert_eq!(completion.summary.completed_students, 1);
        assert_eq!(completion.summary.pending_students, 1);
        assert_eq!(completion.summary.students_with_submissions, 2);
        assert_eq!(completion.summary.submission_rate, 100.0);
        assert_eq!(completion.summary.total_feedback_received, 3);
        assert!(completion.not_started.is_empty());
    }

    #[test]
    fn class_completion_reports_students_without_submissions() {
        let (store, ct, _, _, _) = class_fixture();
        let completion = class_completion(&store, &ct).unwrap();
        assert_eq!(completion.not_started.len(), 2);
        assert_eq!(completion.summary.submission_rate, 0.0);
        assert!(completion
            .students
            .iter()
            .all(|s| s.completion_percentage == 0.0 && s.status == CompletionState::Pending));
    }

    #[test]
    fn class_completion_requires_class_teacher() {
        let (store, ct, _, teachers, _) = class_fixture();
        let err = class_completion(&store, &teachers[0]).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);

        let completion = class_completion(&store, &ct).unwrap();
        assert_eq!(completion.class, ct.class_assignment);
    }

    #[test]
    fn empty_class_has_zero_percentages() {
        let mut store = MemoryStore::new();
        let mut ct = teacher("CT01");
        ct.class_assignment = Some(class("Z"));
        store.put_teacher(ct.clone()).unwrap();
        let completion = class_completion(&store, &ct).unwrap();
        assert_eq!(completion.summary.total_students, 0);
        assert_eq!(completion.summary.total_possible_feedbacks, 0);
        assert_eq!(completion.summary.submission_rate, 0.0);
    }

    #[test]
    fn teacher_aggregate_averages_and_counts() {
        let mut c = campus();
        let second = student("PRN002", Some("A"));
        c.store.put_student(second.clone()).unwrap();

        let mut first_sub = submission(&c, "Excellent teacher, very clear explanations");
        first_sub.suggestions = "Boring slides".to_string();
        first_sub.ratings = uniform(5);
        submit(&mut c.store, first_sub, &classifier()).unwrap();

        let mut second_sub = submission(&c, "");
        second_sub.student_id = second.id;
        second_sub.ratings = uniform(2);
        submit(&mut c.store, second_sub, &classifier()).unwrap();

        let aggregate = teacher_aggregate(&c.store, &c.teacher);
        assert_eq!(aggregate.total_feedback, 2);
        assert_eq!(aggregate.subjects_taught, 1);
        assert_eq!(aggregate.average_ratings.overall_satisfaction, 3.5);
        assert_eq!(aggregate.average_ratings.teaching_effectiveness, 3.5);
        assert_eq!(
            aggregate.sentiment_distribution,
            SentimentDistribution {
                positive: 1,
                negative: 1,
                neutral: 0
            }
        );
        let counts: Vec<usize> = aggregate.rating_histogram.iter().map(|b| b.count).collect();
        assert_eq!(counts, vec![0, 1, 0, 0, 1]);
        assert_eq!(aggregate.subject_breakdown.len(), 1);
        assert_eq!(aggregate.subject_breakdown[0].feedback_count, 2);
        assert_eq!(aggregate.subject_breakdown[0].avg_rating, 3.5);
    }

    #[test]
    fn teacher_without_feedback_has_zeroed_aggregate() {
        let c = campus();
        let aggregate = teacher_aggregate(&c.store, &c.teacher);
        assert_eq!(aggregate.total_feedback, 0);
        assert_eq!(aggregate.average_ratings, RatingAverages::default());
        assert_eq!(aggregate.rating_histogram.len(), 5);
        assert!(aggregate.rating_histogram.iter().all(|b| b.count == 0));
    }

    #[test]
    fn overview_redacts_anonymous_students() {
        let mut c = campus();
        let sub = submission(&c, "Good");
        submit(&mut c.store, sub, &classifier()).unwrap();

        let overview = institution_overview(&c.store);
        assert_eq!(overview.total_students, 1);
        assert_eq!(overview.total_feedback, 1);
        assert_eq!(overview.recent_feedback[0].student, ANONYMOUS);
        assert_eq!(
            overview.recent_feedback[0].date,
            crate::report::all_feedback_rows(&c.store)[0].date
        );
        assert_eq!(overview.average_ratings.overall, 5.0);
        assert_eq!(overview.branch_distribution[0].label, "COMP");
        assert_eq!(overview.year_distribution[0].count, 1);
    }

    #[test]
    fn rounding_is_two_decimals() {
        assert_eq!(round2(66.666_666), 66.67);
        assert_eq!(percentage(1, 3), 33.33);
        assert_eq!(percentage(5, 0), 0.0);
    }

    fn record_with(overall: i32, comment: SentimentLabel) -> FeedbackRecord {
        let mut ratings = uniform(3);
        ratings.overall_satisfaction = overall;
        FeedbackRecord {
            id: Uuid::new_v4(),
            student_id: Uuid::new_v4(),
            teacher_id: Uuid::new_v4(),
            subject_id: Uuid::new_v4(),
            semester: 3,
            ratings,
            comments: String::new(),
            suggestions: String::new(),
            comment_sentiment: SentimentResult {
                label: comment,
                score: 0.0,
            },
            suggestion_sentiment: SentimentResult::none(),
            is_anonymous: true,
            created_at: Utc::now(),
        }
    }

    fn label_strategy() -> impl Strategy<Value = SentimentLabel> {
        prop_oneof![
            Just(SentimentLabel::Positive),
            Just(SentimentLabel::Negative),
            Just(SentimentLabel::Neutral),
            Just(SentimentLabel::None),
        ]
    }

    proptest! {
        #[test]
        fn histogram_is_total(entries in prop::collection::vec((1..=5i32, label_strategy()), 0..40)) {
            let records: Vec<FeedbackRecord> = entries
                .iter()
                .map(|(overall, label)| record_with(*overall, *label))
                .collect();
            let histogram = rating_histogram(&records);
            prop_assert_eq!(histogram.len(), 5);
            prop_assert_eq!(histogram.iter().map(|b| b.count).sum::<usize>(), records.len());
            let labelled = entries.iter().filter(|(_, l)| *l != SentimentLabel::None).count();
            prop_assert_eq!(sentiment_distribution(&records).total(), labelled);
        }

        #[test]
        fn pending_plus_submitted_covers_obligations(
            teachers_per_subject in prop::collection::vec(0..3usize, 1..5),
            submit_mask in prop::collection::vec(any::<bool>(), 12),
        ) {
            let mut store = MemoryStore::new();
            let s = student("PRN001", Some("A"));
            store.put_student(s.clone()).unwrap();

            let mut pairs = Vec::new();
            for (index, count) in teachers_per_subject.iter().enumerate() {
                let subj = subject(&format!("SUB{index}"), None);
                store.add_subject(subj.clone()).unwrap();
                for n in 0..*count {
                    let t = teacher(&format!("EMP{index}{n}"));
                    store.put_teacher(t.clone()).unwrap();
                    store.assign_subject(assignment(&t, &subj, n as i64)).unwrap();
                    pairs.push((t, subj.clone()));
                }
            }
            for ((t, subj), give_it) in pairs.iter().zip(submit_mask.iter()) {
                if *give_it {
                    give(&mut store, &s, t, subj.id);
                }
            }

            let obligations = student_obligations(&store, &s);
            prop_assert_eq!(obligations.obligations.len(), pairs.len());
            prop_assert_eq!(obligations.pending() + obligations.submitted(), obligations.obligations.len());
        }
    }
}
