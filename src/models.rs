use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{FeedbackError, Result};

/// A (year, branch, semester, division) cohort.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClassKey {
    pub year: String,
    pub branch: String,
    pub semester: i32,
    pub division: String,
}

impl fmt::Display for ClassKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {} - Semester {} - Division {}",
            self.year, self.branch, self.semester, self.division
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub id: Uuid,
    pub prn: String,
    pub full_name: String,
    pub email: String,
    pub year: String,
    pub branch: String,
    pub semester: i32,
    pub division: Option<String>,
    pub class_teacher_id: Option<Uuid>,
}

impl Student {
    /// Only students with a division belong to a class cohort.
    pub fn class_key(&self) -> Option<ClassKey> {
        let division = self.division.as_ref()?;
        if self.year.is_empty() || self.branch.is_empty() {
            return None;
        }
        Some(ClassKey {
            year: self.year.clone(),
            branch: self.branch.clone(),
            semester: self.semester,
            division: division.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Teacher {
    pub id: Uuid,
    pub employee_id: String,
    pub full_name: String,
    pub email: String,
    pub department: Option<String>,
    pub class_assignment: Option<ClassKey>,
}

impl Teacher {
    pub fn is_class_teacher(&self) -> bool {
        self.class_assignment.is_some()
    }

    pub fn to_ref(&self) -> TeacherRef {
        TeacherRef {
            id: self.id,
            employee_id: self.employee_id.clone(),
            name: self.full_name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub branch: String,
    pub semester: i32,
    /// `None` marks a common subject taught to every division.
    pub division: Option<String>,
    pub credits: i32,
}

impl Subject {
    pub fn division_label(&self) -> &str {
        self.division.as_deref().unwrap_or("Common")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeacherSubject {
    pub teacher_id: Uuid,
    pub subject_id: Uuid,
    pub assigned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    Negative,
    Neutral,
    None,
}

impl SentimentLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SentimentLabel::Positive => "positive",
            SentimentLabel::Negative => "negative",
            SentimentLabel::Neutral => "neutral",
            SentimentLabel::None => "none",
        }
    }
}

impl fmt::Display for SentimentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SentimentLabel {
    type Err = FeedbackError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "positive" => Ok(SentimentLabel::Positive),
            "negative" => Ok(SentimentLabel::Negative),
            "neutral" => Ok(SentimentLabel::Neutral),
            "none" | "" => Ok(SentimentLabel::None),
            other => Err(FeedbackError::Validation(format!(
                "unknown sentiment label '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SentimentResult {
    pub label: SentimentLabel,
    pub score: f64,
}

impl SentimentResult {
    pub fn none() -> Self {
        SentimentResult {
            label: SentimentLabel::None,
            score: 0.0,
        }
    }
}

/// The five 1-5 rating dimensions of a feedback form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ratings {
    pub teaching_effectiveness: i32,
    pub course_content: i32,
    pub interaction_quality: i32,
    pub assignment_feedback: i32,
    pub overall_satisfaction: i32,
}

impl Ratings {
    pub const DIMENSIONS: [&'static str; 5] = [
        "teaching_effectiveness",
        "course_content",
        "interaction_quality",
        "assignment_feedback",
        "overall_satisfaction",
    ];

    pub fn values(&self) -> [i32; 5] {
        [
            self.teaching_effectiveness,
            self.course_content,
            self.interaction_quality,
            self.assignment_feedback,
            self.overall_satisfaction,
        ]
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in Self::DIMENSIONS.iter().zip(self.values()) {
            if !(1..=5).contains(&value) {
                return Err(FeedbackError::Validation(format!(
                    "{name} must be between 1 and 5, got {value}"
                )));
            }
        }
        Ok(())
    }
}

impl FromStr for Ratings {
    type Err = FeedbackError;

    /// Parses `"5,4,5,4,5"` in dimension order.
    fn from_str(value: &str) -> Result<Self> {
        let parsed = value
            .split(',')
            .map(|part| {
                part.trim().parse::<i32>().map_err(|_| {
                    FeedbackError::Validation(format!("rating '{}' is not a number", part.trim()))
                })
            })
            .collect::<Result<Vec<i32>>>()?;

        let [teaching_effectiveness, course_content, interaction_quality, assignment_feedback, overall_satisfaction] =
            parsed[..]
        else {
            return Err(FeedbackError::Validation(format!(
                "expected 5 ratings, got {}",
                parsed.len()
            )));
        };

        let ratings = Ratings {
            teaching_effectiveness,
            course_content,
            interaction_quality,
            assignment_feedback,
            overall_satisfaction,
        };
        ratings.validate()?;
        Ok(ratings)
    }
}

/// Identity of a feedback record; at most one record exists per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeedbackKey {
    pub student_id: Uuid,
    pub teacher_id: Uuid,
    pub subject_id: Uuid,
    pub semester: i32,
}

/// A validated, classified submission that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackDraft {
    pub key: FeedbackKey,
    pub ratings: Ratings,
    pub comments: String,
    pub suggestions: String,
    pub comment_sentiment: SentimentResult,
    pub suggestion_sentiment: SentimentResult,
    pub is_anonymous: bool,
}

impl FeedbackDraft {
    pub fn into_record(self, id: Uuid, created_at: DateTime<Utc>) -> FeedbackRecord {
        FeedbackRecord {
            id,
            student_id: self.key.student_id,
            teacher_id: self.key.teacher_id,
            subject_id: self.key.subject_id,
            semester: self.key.semester,
            ratings: self.ratings,
            comments: self.comments,
            suggestions: self.suggestions,
            comment_sentiment: self.comment_sentiment,
            suggestion_sentiment: self.suggestion_sentiment,
            is_anonymous: self.is_anonymous,
            created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub id: Uuid,
    pub student_id: Uuid,
    pub teacher_id: Uuid,
    pub subject_id: Uuid,
    pub semester: i32,
    pub ratings: Ratings,
    pub comments: String,
    pub suggestions: String,
    pub comment_sentiment: SentimentResult,
    pub suggestion_sentiment: SentimentResult,
    pub is_anonymous: bool,
    pub created_at: DateTime<Utc>,
}

impl FeedbackRecord {
    pub fn key(&self) -> FeedbackKey {
        FeedbackKey {
            student_id: self.student_id,
            teacher_id: self.teacher_id,
            subject_id: self.subject_id,
            semester: self.semester,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeacherRef {
    pub id: Uuid,
    pub employee_id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubjectRef {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub credits: i32,
    pub division: String,
}

impl From<&Subject> for SubjectRef {
    fn from(subject: &Subject) -> Self {
        SubjectRef {
            id: subject.id,
            code: subject.code.clone(),
            name: subject.name.clone(),
            credits: subject.credits,
            division: subject.division_label().to_string(),
        }
    }
}

/// An expected (student, subject, teacher) feedback pairing for a semester.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackObligation {
    pub student_id: Uuid,
    pub subject: SubjectRef,
    pub teacher: TeacherRef,
    pub semester: i32,
    pub completed: bool,
}

impl FeedbackObligation {
    /// `"MATH101 (EMP-01)"`, as listed on tracking sheets.
    pub fn label(&self) -> String {
        format!("{} ({})", self.subject.code, self.teacher.employee_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentObligations {
    pub student_id: Uuid,
    pub semester: i32,
    pub obligations: Vec<FeedbackObligation>,
    /// Applicable subjects with no teacher assigned yet.
    pub unassigned_subjects: Vec<SubjectRef>,
}

impl StudentObligations {
    pub fn submitted(&self) -> usize {
        self.obligations.iter().filter(|o| o.completed).count()
    }

    pub fn pending(&self) -> usize {
        self.obligations.iter().filter(|o| !o.completed).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CompletionState {
    Complete,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionStatus {
    pub student_id: Uuid,
    pub prn: String,
    pub name: String,
    pub email: String,
    pub division: String,
    pub submitted: usize,
    pub pending: usize,
    pub completion_percentage: f64,
    pub completed_labels: Vec<String>,
    pub pending_obligations: Vec<FeedbackObligation>,
    pub status: CompletionState,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentContact {
    pub prn: String,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassSummary {
    pub total_students: usize,
    pub total_subjects: usize,
    pub total_possible_feedbacks: usize,
    pub completed_students: usize,
    pub pending_students: usize,
    pub students_with_submissions: usize,
    pub students_without_submissions: usize,
    pub submission_rate: f64,
    pub total_feedback_received: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassCompletion {
    pub class_teacher: TeacherRef,
    pub class: Option<ClassKey>,
    pub students: Vec<CompletionStatus>,
    pub not_started: Vec<StudentContact>,
    pub summary: ClassSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct RatingAverages {
    pub teaching_effectiveness: f64,
    pub course_content: f64,
    pub interaction_quality: f64,
    pub assignment_feedback: f64,
    pub overall_satisfaction: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SentimentDistribution {
    pub positive: usize,
    pub negative: usize,
    pub neutral: usize,
}

impl SentimentDistribution {
    pub fn record(&mut self, label: SentimentLabel) {
        match label {
            SentimentLabel::Positive => self.positive += 1,
            SentimentLabel::Negative => self.negative += 1,
            SentimentLabel::Neutral => self.neutral += 1,
            SentimentLabel::None => {}
        }
    }

    pub fn total(&self) -> usize {
        self.positive + self.negative + self.neutral
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HistogramBucket {
    pub rating: i32,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubjectBreakdown {
    pub subject_code: String,
    pub subject_name: String,
    pub feedback_count: usize,
    pub avg_rating: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeacherAggregate {
    pub teacher: TeacherRef,
    pub total_feedback: usize,
    pub subjects_taught: usize,
    pub average_ratings: RatingAverages,
    pub sentiment_distribution: SentimentDistribution,
    pub rating_histogram: Vec<HistogramBucket>,
    pub subject_breakdown: Vec<SubjectBreakdown>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistributionEntry {
    pub label: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecentFeedback {
    pub id: Uuid,
    pub student: String,
    pub teacher: String,
    pub subject: String,
    pub rating: i32,
    pub date: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverallAverages {
    pub overall: f64,
    pub teaching: f64,
    pub content: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstitutionOverview {
    pub total_students: usize,
    pub total_teachers: usize,
    pub total_subjects: usize,
    pub total_feedback: usize,
    pub average_ratings: OverallAverages,
    pub branch_distribution: Vec<DistributionEntry>,
    pub year_distribution: Vec<DistributionEntry>,
    pub recent_feedback: Vec<RecentFeedback>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ratings_in_dimension_order() {
        let ratings: Ratings = "5, 4,5,4,3".parse().unwrap();
        assert_eq!(ratings.teaching_effectiveness, 5);
        assert_eq!(ratings.course_content, 4);
        assert_eq!(ratings.overall_satisfaction, 3);
    }

    #[test]
    fn rejects_out_of_range_and_short_ratings() {
        let err = "5,4,6,4,5".parse::<Ratings>().unwrap_err();
        assert!(err.to_string().contains("interaction_quality"));
        assert!("5,4,5".parse::<Ratings>().is_err());
        assert!("5,4,x,4,5".parse::<Ratings>().is_err());
        assert!("0,4,5,4,5".parse::<Ratings>().is_err());
    }

    #[test]
    fn class_key_requires_division() {
        let mut student = Student {
            id: Uuid::new_v4(),
            prn: "PRN001".into(),
            full_name: "Avery Lee".into(),
            email: "avery@example.com".into(),
            year: "SE".into(),
            branch: "COMP".into(),
            semester: 3,
            division: None,
            class_teacher_id: None,
        };
        assert!(student.class_key().is_none());
        student.division = Some("A".into());
        assert_eq!(student.class_key().unwrap().to_string(), "SE - COMP - Semester 3 - Division A");
    }

    #[test]
    fn sentiment_labels_round_trip_through_text() {
        for label in [
            SentimentLabel::Positive,
            SentimentLabel::Negative,
            SentimentLabel::Neutral,
            SentimentLabel::None,
        ] {
            assert_eq!(label.as_str().parse::<SentimentLabel>().unwrap(), label);
        }
        assert!("ecstatic".parse::<SentimentLabel>().is_err());
    }
}
