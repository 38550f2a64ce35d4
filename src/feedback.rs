use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{FeedbackError, Result};
use crate::models::{
    FeedbackDraft, FeedbackKey, FeedbackRecord, Ratings, SentimentLabel, Student, Subject,
    Teacher,
};
use crate::sentiment::{PolarityEstimator, SentimentClassifier};
use crate::store::RecordStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackSubmission {
    pub student_id: Uuid,
    pub teacher_id: Uuid,
    pub subject_id: Uuid,
    pub ratings: Ratings,
    #[serde(default)]
    pub comments: String,
    #[serde(default)]
    pub suggestions: String,
    #[serde(default = "default_anonymous")]
    pub is_anonymous: bool,
}

fn default_anonymous() -> bool {
    true
}

/// Resolves the natural keys used on forms and imports. The subject code is
/// looked up among the subjects that apply to the student's class.
pub fn resolve_participants<S: RecordStore>(
    store: &S,
    prn: &str,
    employee_id: &str,
    subject_code: &str,
) -> Result<(Student, Teacher, Subject)> {
    let student = store
        .student_by_prn(prn)
        .ok_or_else(|| FeedbackError::not_found("student", prn))?;
    let teacher = store
        .teacher_by_employee_id(employee_id)
        .ok_or_else(|| FeedbackError::not_found("teacher", employee_id))?;
    let subject = store
        .subjects_for_class(&student.branch, student.semester, student.division.as_deref())
        .into_iter()
        .find(|subject| subject.code.eq_ignore_ascii_case(subject_code))
        .ok_or_else(|| FeedbackError::not_found("subject", subject_code))?;
    Ok((student, teacher, subject))
}

/// Validates and classifies a submission without storing it.
pub fn prepare<S, E>(
    store: &S,
    submission: FeedbackSubmission,
    classifier: &SentimentClassifier<E>,
) -> Result<FeedbackDraft>
where
    S: RecordStore,
    E: PolarityEstimator,
{
    submission.ratings.validate()?;

    let student = store
        .student(submission.student_id)
        .ok_or_else(|| FeedbackError::not_found("student", submission.student_id.to_string()))?;
    let teacher = store
        .teacher(submission.teacher_id)
        .ok_or_else(|| FeedbackError::not_found("teacher", submission.teacher_id.to_string()))?;
    let subject = store
        .subject(submission.subject_id)
        .ok_or_else(|| FeedbackError::not_found("subject", submission.subject_id.to_string()))?;

    let assigned = store
        .teachers_for_subject(subject.id)
        .iter()
        .any(|candidate| candidate.id == teacher.id);
    if !assigned {
        return Err(FeedbackError::Validation(format!(
            "{} is not assigned to {}",
            teacher.employee_id, subject.code
        )));
    }

    let key = FeedbackKey {
        student_id: student.id,
        teacher_id: teacher.id,
        subject_id: subject.id,
        semester: student.semester,
    };
    if store.feedback_exists(&key) {
        return Err(FeedbackError::Conflict(
            "feedback already submitted for this subject and teacher".to_string(),
        ));
    }

    let comments = submission.comments.trim().to_string();
    let suggestions = submission.suggestions.trim().to_string();

    Ok(FeedbackDraft {
        key,
        ratings: submission.ratings,
        comment_sentiment: classifier.classify(&comments),
        suggestion_sentiment: classifier.classify(&suggestions),
        comments,
        suggestions,
        is_anonymous: submission.is_anonymous,
    })
}

pub fn submit<S, E>(
    store: &mut S,
    submission: FeedbackSubmission,
    classifier: &SentimentClassifier<E>,
) -> Result<FeedbackRecord>
where
    S: RecordStore,
    E: PolarityEstimator,
{
    let draft = prepare(store, submission, classifier)?;
    match store.insert_feedback(draft) {
        Ok(record) => {
            info!(
                feedback_id = %record.id,
                comment = %record.comment_sentiment.label,
                suggestion = %record.suggestion_sentiment.label,
                "feedback submitted"
            );
            Ok(record)
        }
        Err(err) => {
            warn!(error = %err, "feedback submission rejected");
            Err(err)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ReanalyzeSummary {
    pub total: usize,
    pub updated: usize,
}

/// True when non-empty text has no stored label.
pub fn needs_analysis(record: &FeedbackRecord) -> bool {
    let missing = |text: &str, label: SentimentLabel| {
        !text.trim().is_empty() && label == SentimentLabel::None
    };
    missing(&record.comments, record.comment_sentiment.label)
        || missing(&record.suggestions, record.suggestion_sentiment.label)
}

/// Recomputes stored sentiment. Each record is updated on its own, so a
/// partial run can simply be repeated.
pub fn reanalyze<S, E>(
    store: &mut S,
    classifier: &SentimentClassifier<E>,
    only_missing: bool,
) -> Result<ReanalyzeSummary>
where
    S: RecordStore,
    E: PolarityEstimator,
{
    let records = store.all_feedback();
    let mut summary = ReanalyzeSummary {
        total: records.len(),
        updated: 0,
    };
    info!(total = summary.total, "re-analyzing feedback sentiment");

    for record in records {
        if only_missing && !needs_analysis(&record) {
            continue;
        }
        store.update_sentiment(
            record.id,
            classifier.classify(&record.comments),
            classifier.classify(&record.suggestions),
        )?;
        summary.updated += 1;
        if summary.updated % 10 == 0 {
            info!("processed {}/{}", summary.updated, summary.total);
        }
    }

    Ok(summary)
}
