use std::fmt::Write;
use std::io;

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::Result;
use crate::models::{
    ClassCompletion, CompletionState, FeedbackRecord, SentimentLabel, SentimentResult, Teacher,
    TeacherAggregate,
};
use crate::store::RecordStore;

pub const ANONYMOUS: &str = "Anonymous";
pub const NOT_AVAILABLE: &str = "N/A";
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M";

/// One exported feedback record. Student identity is redacted for anonymous
/// records.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackRow {
    #[serde(rename = "Feedback ID")]
    pub feedback_id: String,
    #[serde(rename = "Date")]
    pub date: String,
    #[serde(rename = "Student PRN")]
    pub student_prn: String,
    #[serde(rename = "Student Name")]
    pub student_name: String,
    #[serde(rename = "Year")]
    pub year: String,
    #[serde(rename = "Branch")]
    pub branch: String,
    #[serde(rename = "Division")]
    pub division: String,
    #[serde(rename = "Teacher ID")]
    pub teacher_id: String,
    #[serde(rename = "Teacher Name")]
    pub teacher_name: String,
    #[serde(rename = "Subject Code")]
    pub subject_code: String,
    #[serde(rename = "Subject Name")]
    pub subject_name: String,
    #[serde(rename = "Semester")]
    pub semester: String,
    #[serde(rename = "Teaching")]
    pub teaching: i32,
    #[serde(rename = "Content")]
    pub content: i32,
    #[serde(rename = "Interaction")]
    pub interaction: i32,
    #[serde(rename = "Assignment")]
    pub assignment: i32,
    #[serde(rename = "Overall")]
    pub overall: i32,
    #[serde(rename = "Comments")]
    pub comments: String,
    #[serde(rename = "Comment Sentiment")]
    pub comment_sentiment: String,
    #[serde(rename = "Comment Score")]
    pub comment_score: String,
    #[serde(rename = "Suggestions")]
    pub suggestions: String,
    #[serde(rename = "Suggestion Sentiment")]
    pub suggestion_sentiment: String,
    #[serde(rename = "Suggestion Score")]
    pub suggestion_score: String,
    #[serde(rename = "Anonymous")]
    pub anonymous: String,
    /// False when the student left the comment box empty.
    #[serde(skip)]
    pub has_comments: bool,
}

fn sentiment_cell(result: &SentimentResult) -> String {
    match result.label {
        SentimentLabel::None => "Not analyzed".to_string(),
        label => label.to_string(),
    }
}

fn text_or(text: &str, fallback: &str) -> String {
    if text.trim().is_empty() {
        fallback.to_string()
    } else {
        text.to_string()
    }
}

impl FeedbackRow {
    pub fn project<S: RecordStore>(store: &S, record: &FeedbackRecord) -> Self {
        let student = store.student(record.student_id);
        let teacher = store.teacher(record.teacher_id);
        let subject = store.subject(record.subject_id);

        let identity = |field: fn(&crate::models::Student) -> String, placeholder: &str| {
            match (&student, record.is_anonymous) {
                (Some(student), false) => field(student),
                _ => placeholder.to_string(),
            }
        };

        FeedbackRow {
            feedback_id: record.id.to_string(),
            date: record.created_at.format(DATE_FORMAT).to_string(),
            student_prn: identity(|s| s.prn.clone(), ANONYMOUS),
            student_name: identity(|s| s.full_name.clone(), ANONYMOUS),
            year: identity(|s| s.year.clone(), NOT_AVAILABLE),
            branch: identity(|s| s.branch.clone(), NOT_AVAILABLE),
            division: identity(
                |s| s.division.clone().unwrap_or_else(|| NOT_AVAILABLE.to_string()),
                NOT_AVAILABLE,
            ),
            teacher_id: teacher
                .as_ref()
                .map(|t| t.employee_id.clone())
                .unwrap_or_default(),
            teacher_name: teacher.map(|t| t.full_name).unwrap_or_default(),
            subject_code: subject
                .as_ref()
                .map(|s| s.code.clone())
                .unwrap_or_default(),
            subject_name: subject.map(|s| s.name).unwrap_or_default(),
            semester: format!("Sem-{}", record.semester),
            teaching: record.ratings.teaching_effectiveness,
            content: record.ratings.course_content,
            interaction: record.ratings.interaction_quality,
            assignment: record.ratings.assignment_feedback,
            overall: record.ratings.overall_satisfaction,
            comments: text_or(&record.comments, "No comments"),
            comment_sentiment: sentiment_cell(&record.comment_sentiment),
            comment_score: format!("{:.2}", record.comment_sentiment.score),
            suggestions: text_or(&record.suggestions, "No suggestions"),
            suggestion_sentiment: sentiment_cell(&record.suggestion_sentiment),
            suggestion_score: format!("{:.2}", record.suggestion_sentiment.score),
            anonymous: if record.is_anonymous { "Yes" } else { "No" }.to_string(),
            has_comments: !record.comments.trim().is_empty(),
        }
    }
}

pub fn all_feedback_rows<S: RecordStore>(store: &S) -> Vec<FeedbackRow> {
    store
        .all_feedback()
        .iter()
        .map(|record| FeedbackRow::project(store, record))
        .collect()
}

pub fn teacher_feedback_rows<S: RecordStore>(store: &S, teacher: &Teacher) -> Vec<FeedbackRow> {
    store
        .feedback_by_teacher(teacher.id)
        .iter()
        .map(|record| FeedbackRow::project(store, record))
        .collect()
}

pub fn write_feedback_csv<W: io::Write>(writer: W, rows: &[FeedbackRow]) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for row in rows {
        csv_writer.serialize(row)?;
    }
    csv_writer.flush()?;
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
struct ClassTrackingRow<'a> {
    #[serde(rename = "Sr.No")]
    sr_no: usize,
    #[serde(rename = "PRN")]
    prn: &'a str,
    #[serde(rename = "Student Name")]
    name: &'a str,
    #[serde(rename = "Email")]
    email: &'a str,
    #[serde(rename = "Division")]
    division: &'a str,
    #[serde(rename = "Submitted")]
    submitted: usize,
    #[serde(rename = "Pending")]
    pending: usize,
    #[serde(rename = "Completion %")]
    completion_percentage: f64,
    #[serde(rename = "Status")]
    status: &'static str,
    #[serde(rename = "Pending Subjects")]
    pending_subjects: String,
}

fn state_label(state: CompletionState) -> &'static str {
    match state {
        CompletionState::Complete => "Complete",
        CompletionState::Pending => "Pending",
    }
}

pub fn write_class_tracking_csv<W: io::Write>(writer: W, completion: &ClassCompletion) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for (index, status) in completion.students.iter().enumerate() {
        csv_writer.serialize(ClassTrackingRow {
            sr_no: index + 1,
            prn: &status.prn,
            name: &status.name,
            email: &status.email,
            division: &status.division,
            submitted: status.submitted,
            pending: status.pending,
            completion_percentage: status.completion_percentage,
            status: state_label(status.status),
            pending_subjects: status
                .pending_obligations
                .iter()
                .map(|o| o.label())
                .collect::<Vec<_>>()
                .join("; "),
        })?;
    }
    csv_writer.flush()?;
    Ok(())
}

pub fn build_class_report(completion: &ClassCompletion, generated_on: NaiveDate) -> String {
    let mut output = String::new();
    let summary = &completion.summary;
    let class_label = completion
        .class
        .as_ref()
        .map(|class| class.to_string())
        .unwrap_or_else(|| NOT_AVAILABLE.to_string());

    let _ = writeln!(output, "# Class Feedback Tracking Report");
    let _ = writeln!(
        output,
        "Class teacher {} ({}) for {} (generated {})",
        completion.class_teacher.name, completion.class_teacher.employee_id, class_label, generated_on
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Statistics");
    let _ = writeln!(output, "- Total students: {}", summary.total_students);
    let _ = writeln!(output, "- Applicable subjects: {}", summary.total_subjects);
    let _ = writeln!(
        output,
        "- Students submitted feedback: {}",
        summary.students_with_submissions
    );
    let _ = writeln!(
        output,
        "- Students pending: {}",
        summary.students_without_submissions
    );
    let _ = writeln!(
        output,
        "- Total feedbacks received: {}",
        summary.total_feedback_received
    );
    let _ = writeln!(output, "- Completion rate: {:.2}%", summary.submission_rate);
    let _ = writeln!(
        output,
        "- Fully complete students: {} of {}",
        summary.completed_students, summary.total_students
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Student Progress");
    if completion.students.is_empty() {
        let _ = writeln!(output, "No students found for this class.");
    } else {
        for status in &completion.students {
            let _ = writeln!(
                output,
                "- {} {} ({}): {} submitted, {} pending, {:.2}%",
                status.prn,
                status.name,
                state_label(status.status),
                status.submitted,
                status.pending,
                status.completion_percentage
            );
            if !status.pending_obligations.is_empty() {
                let labels: Vec<String> =
                    status.pending_obligations.iter().map(|o| o.label()).collect();
                let _ = writeln!(output, "  - pending: {}", labels.join(", "));
            }
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Not Started");
    if completion.not_started.is_empty() {
        let _ = writeln!(output, "Every student has submitted at least one feedback.");
    } else {
        for contact in &completion.not_started {
            let _ = writeln!(output, "- {} {} <{}>", contact.prn, contact.name, contact.email);
        }
    }

    output
}

pub fn build_teacher_report(
    aggregate: &TeacherAggregate,
    rows: &[FeedbackRow],
    generated_on: NaiveDate,
) -> String {
    let mut output = String::new();
    let averages = &aggregate.average_ratings;
    let sentiment = &aggregate.sentiment_distribution;

    let _ = writeln!(output, "# Teacher Feedback Report");
    let _ = writeln!(
        output,
        "{} ({}), {} feedback across {} assigned subjects (generated {})",
        aggregate.teacher.name,
        aggregate.teacher.employee_id,
        aggregate.total_feedback,
        aggregate.subjects_taught,
        generated_on
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Average Ratings");
    let _ = writeln!(output, "- Teaching effectiveness: {:.2}", averages.teaching_effectiveness);
    let _ = writeln!(output, "- Course content: {:.2}", averages.course_content);
    let _ = writeln!(output, "- Interaction quality: {:.2}", averages.interaction_quality);
    let _ = writeln!(output, "- Assignment feedback: {:.2}", averages.assignment_feedback);
    let _ = writeln!(output, "- Overall satisfaction: {:.2}", averages.overall_satisfaction);

    let _ = writeln!(output);
    let _ = writeln!(output, "## Sentiment");
    let _ = writeln!(
        output,
        "- positive {}, negative {}, neutral {}; labelled texts: {}",
        sentiment.positive,
        sentiment.negative,
        sentiment.neutral,
        sentiment.total()
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Rating Distribution");
    for bucket in &aggregate.rating_histogram {
        let _ = writeln!(output, "- {}: {}", bucket.rating, bucket.count);
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Subjects");
    if aggregate.subject_breakdown.is_empty() {
        let _ = writeln!(output, "No feedback recorded yet.");
    } else {
        for subject in &aggregate.subject_breakdown {
            let _ = writeln!(
                output,
                "- {} {}: {} feedback (avg {:.2})",
                subject.subject_code, subject.subject_name, subject.feedback_count, subject.avg_rating
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Comments");
    let commented: Vec<&FeedbackRow> = rows
        .iter()
        .filter(|row| row.has_comments)
        .take(5)
        .collect();
    if commented.is_empty() {
        let _ = writeln!(output, "No comments recorded.");
    } else {
        for row in commented {
            let _ = writeln!(
                output,
                "- {} ({}, {}) on {}: {}",
                row.student_name, row.subject_code, row.comment_sentiment, row.date, row.comments
            );
        }
    }

    output
}
