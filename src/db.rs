use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{is_unique_violation, ErrorKind, FeedbackError, Result};
use crate::feedback::{self, FeedbackSubmission};
use crate::models::{
    ClassKey, FeedbackDraft, FeedbackRecord, Ratings, SentimentLabel, SentimentResult, Student,
    Subject, Teacher, TeacherSubject,
};
use crate::roster;
use crate::sentiment::{PolarityEstimator, SentimentClassifier};
use crate::store::{MemoryStore, RecordStore};

pub async fn init_db(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|err| FeedbackError::Database(err.into()))?;
    Ok(())
}

fn label_column(result: &SentimentResult) -> Option<&'static str> {
    match result.label {
        SentimentLabel::None => None,
        label => Some(label.as_str()),
    }
}

fn sentiment_from_columns(label: Option<String>, score: Option<f64>) -> Result<SentimentResult> {
    let label = match label {
        Some(value) => value.parse::<SentimentLabel>()?,
        None => SentimentLabel::None,
    };
    Ok(SentimentResult {
        label,
        score: score.unwrap_or(0.0),
    })
}

fn student_from_row(row: &PgRow) -> Result<Student> {
    Ok(Student {
        id: row.try_get("id")?,
        prn: row.try_get("prn")?,
        full_name: row.try_get("full_name")?,
        email: row.try_get("email")?,
        year: row.try_get("year")?,
        branch: row.try_get("branch")?,
        semester: row.try_get("semester")?,
        division: row.try_get("division")?,
        class_teacher_id: row.try_get("class_teacher_id")?,
    })
}

fn teacher_from_row(row: &PgRow) -> Result<Teacher> {
    let class_year: Option<String> = row.try_get("class_year")?;
    let class_branch: Option<String> = row.try_get("class_branch")?;
    let class_semester: Option<i32> = row.try_get("class_semester")?;
    let class_division: Option<String> = row.try_get("class_division")?;

    let class_assignment = match (class_year, class_branch, class_semester, class_division) {
        (Some(year), Some(branch), Some(semester), Some(division)) => Some(ClassKey {
            year,
            branch,
            semester,
            division,
        }),
        _ => None,
    };

    Ok(Teacher {
        id: row.try_get("id")?,
        employee_id: row.try_get("employee_id")?,
        full_name: row.try_get("full_name")?,
        email: row.try_get("email")?,
        department: row.try_get("department")?,
        class_assignment,
    })
}

fn subject_from_row(row: &PgRow) -> Result<Subject> {
    Ok(Subject {
        id: row.try_get("id")?,
        code: row.try_get("code")?,
        name: row.try_get("name")?,
        branch: row.try_get("branch")?,
        semester: row.try_get("semester")?,
        division: row.try_get("division")?,
        credits: row.try_get("credits")?,
    })
}

fn feedback_from_row(row: &PgRow) -> Result<FeedbackRecord> {
    Ok(FeedbackRecord {
        id: row.try_get("id")?,
        student_id: row.try_get("student_id")?,
        teacher_id: row.try_get("teacher_id")?,
        subject_id: row.try_get("subject_id")?,
        semester: row.try_get("semester")?,
        ratings: Ratings {
            teaching_effectiveness: row.try_get("teaching_effectiveness")?,
            course_content: row.try_get("course_content")?,
            interaction_quality: row.try_get("interaction_quality")?,
            assignment_feedback: row.try_get("assignment_feedback")?,
            overall_satisfaction: row.try_get("overall_satisfaction")?,
        },
        comments: row.try_get("comments")?,
        suggestions: row.try_get("suggestions")?,
        comment_sentiment: sentiment_from_columns(
            row.try_get("comment_sentiment")?,
            row.try_get("comment_sentiment_score")?,
        )?,
        suggestion_sentiment: sentiment_from_columns(
            row.try_get("suggestion_sentiment")?,
            row.try_get("suggestion_sentiment_score")?,
        )?,
        is_anonymous: row.try_get("is_anonymous")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Reads every table inside one repeatable-read transaction so the snapshot
/// is consistent.
pub async fn load_store(pool: &PgPool) -> Result<MemoryStore> {
    let mut tx = pool.begin().await?;
    sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
        .execute(&mut *tx)
        .await?;

    let mut store = MemoryStore::new();

    for row in sqlx::query(
        "SELECT id, employee_id, full_name, email, department, \
         class_year, class_branch, class_semester, class_division \
         FROM feedback_tracker.teachers",
    )
    .fetch_all(&mut *tx)
    .await?
    {
        store.put_teacher(teacher_from_row(&row)?)?;
    }

    for row in sqlx::query(
        "SELECT id, prn, full_name, email, year, branch, semester, division, class_teacher_id \
         FROM feedback_tracker.students",
    )
    .fetch_all(&mut *tx)
    .await?
    {
        store.put_student(student_from_row(&row)?)?;
    }

    for row in sqlx::query(
        "SELECT id, code, name, branch, semester, division, credits FROM feedback_tracker.subjects",
    )
    .fetch_all(&mut *tx)
    .await?
    {
        store.add_subject(subject_from_row(&row)?)?;
    }

    for row in sqlx::query(
        "SELECT teacher_id, subject_id, assigned_at FROM feedback_tracker.teacher_subjects",
    )
    .fetch_all(&mut *tx)
    .await?
    {
        store.assign_subject(TeacherSubject {
            teacher_id: row.try_get("teacher_id")?,
            subject_id: row.try_get("subject_id")?,
            assigned_at: row.try_get("assigned_at")?,
        })?;
    }

    for row in sqlx::query(
        "SELECT id, student_id, teacher_id, subject_id, semester, \
         teaching_effectiveness, course_content, interaction_quality, assignment_feedback, \
         overall_satisfaction, comments, suggestions, comment_sentiment, comment_sentiment_score, \
         suggestion_sentiment, suggestion_sentiment_score, is_anonymous, created_at \
         FROM feedback_tracker.feedback",
    )
    .fetch_all(&mut *tx)
    .await?
    {
        store.restore_feedback(feedback_from_row(&row)?)?;
    }

    tx.commit().await?;
    debug!(
        students = store.students().len(),
        feedback = store.all_feedback().len(),
        "loaded record snapshot"
    );
    Ok(store)
}

async fn insert_feedback_in(
    tx: &mut Transaction<'_, Postgres>,
    draft: &FeedbackDraft,
    id: Uuid,
    created_at: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO feedback_tracker.feedback
        (id, student_id, teacher_id, subject_id, semester,
         teaching_effectiveness, course_content, interaction_quality, assignment_feedback,
         overall_satisfaction, comments, suggestions, comment_sentiment, comment_sentiment_score,
         suggestion_sentiment, suggestion_sentiment_score, is_anonymous, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $18)
        ON CONFLICT (student_id, teacher_id, subject_id, semester) DO NOTHING
        "#,
    )
    .bind(id)
    .bind(draft.key.student_id)
    .bind(draft.key.teacher_id)
    .bind(draft.key.subject_id)
    .bind(draft.key.semester)
    .bind(draft.ratings.teaching_effectiveness)
    .bind(draft.ratings.course_content)
    .bind(draft.ratings.interaction_quality)
    .bind(draft.ratings.assignment_feedback)
    .bind(draft.ratings.overall_satisfaction)
    .bind(&draft.comments)
    .bind(&draft.suggestions)
    .bind(label_column(&draft.comment_sentiment))
    .bind(draft.comment_sentiment.score)
    .bind(label_column(&draft.suggestion_sentiment))
    .bind(draft.suggestion_sentiment.score)
    .bind(draft.is_anonymous)
    .bind(created_at)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Inserts a prepared submission. The unique constraint decides races: the
/// losing writer gets `Conflict`.
pub async fn insert_feedback(pool: &PgPool, draft: FeedbackDraft) -> Result<FeedbackRecord> {
    let mut tx = pool.begin().await?;
    let id = Uuid::new_v4();
    let created_at = Utc::now();
    if !insert_feedback_in(&mut tx, &draft, id, created_at).await? {
        return Err(FeedbackError::Conflict(
            "feedback already submitted for this subject and teacher".to_string(),
        ));
    }
    tx.commit().await?;
    Ok(draft.into_record(id, created_at))
}

/// Writes back sentiment columns. Each record is its own statement, so an
/// interrupted run leaves only fully updated rows behind.
pub async fn save_sentiments(pool: &PgPool, records: &[FeedbackRecord]) -> Result<u64> {
    let mut updated = 0;
    for record in records {
        let result = sqlx::query(
            r#"
            UPDATE feedback_tracker.feedback
            SET comment_sentiment = $2, comment_sentiment_score = $3,
                suggestion_sentiment = $4, suggestion_sentiment_score = $5,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(record.id)
        .bind(label_column(&record.comment_sentiment))
        .bind(record.comment_sentiment.score)
        .bind(label_column(&record.suggestion_sentiment))
        .bind(record.suggestion_sentiment.score)
        .execute(pool)
        .await?;
        updated += result.rows_affected();
    }
    Ok(updated)
}

/// Designates a class teacher and repoints the cohort's students, atomically.
pub async fn designate_class_teacher(
    pool: &PgPool,
    employee_id: &str,
    class: &ClassKey,
) -> Result<u64> {
    let mut tx = pool.begin().await?;

    let teacher_id: Uuid = sqlx::query("SELECT id FROM feedback_tracker.teachers WHERE employee_id = $1")
        .bind(employee_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| FeedbackError::not_found("teacher", employee_id))?
        .try_get("id")?;

    let holder: Option<String> = sqlx::query(
        r#"
        SELECT employee_id FROM feedback_tracker.teachers
        WHERE class_year = $1 AND class_branch = $2 AND class_semester = $3
          AND class_division = $4 AND id <> $5
        "#,
    )
    .bind(&class.year)
    .bind(&class.branch)
    .bind(class.semester)
    .bind(&class.division)
    .bind(teacher_id)
    .fetch_optional(&mut *tx)
    .await?
    .map(|row| row.try_get("employee_id"))
    .transpose()?;

    if let Some(holder) = holder {
        return Err(FeedbackError::Conflict(format!(
            "{holder} is already class teacher of {class}"
        )));
    }

    sqlx::query(
        r#"
        UPDATE feedback_tracker.teachers
        SET class_year = $2, class_branch = $3, class_semester = $4, class_division = $5
        WHERE id = $1
        "#,
    )
    .bind(teacher_id)
    .bind(&class.year)
    .bind(&class.branch)
    .bind(class.semester)
    .bind(&class.division)
    .execute(&mut *tx)
    .await
    .map_err(|err| {
        if is_unique_violation(&err) {
            FeedbackError::Conflict(format!("{class} already has a class teacher"))
        } else {
            FeedbackError::Database(err)
        }
    })?;

    let released = sqlx::query(
        r#"
        UPDATE feedback_tracker.students SET class_teacher_id = NULL
        WHERE class_teacher_id = $1
          AND (year, branch, semester, COALESCE(division, '')) <> ($2, $3, $4, $5)
        "#,
    )
    .bind(teacher_id)
    .bind(&class.year)
    .bind(&class.branch)
    .bind(class.semester)
    .bind(&class.division)
    .execute(&mut *tx)
    .await?
    .rows_affected();
    debug!(released, "cleared students of the previous class");

    let students = sqlx::query(
        r#"
        UPDATE feedback_tracker.students SET class_teacher_id = $1
        WHERE year = $2 AND branch = $3 AND semester = $4 AND division = $5
        "#,
    )
    .bind(teacher_id)
    .bind(&class.year)
    .bind(&class.branch)
    .bind(class.semester)
    .bind(&class.division)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    tx.commit().await?;
    info!(teacher = employee_id, class = %class, students, "designated class teacher");
    Ok(students)
}

/// Refused while feedback references the subject.
pub async fn delete_subject(pool: &PgPool, subject_id: Uuid) -> Result<()> {
    let mut tx = pool.begin().await?;
    let feedback_count: i64 = sqlx::query(
        "SELECT COUNT(*) AS count FROM feedback_tracker.feedback WHERE subject_id = $1",
    )
    .bind(subject_id)
    .fetch_one(&mut *tx)
    .await?
    .try_get("count")?;

    if feedback_count > 0 {
        return Err(FeedbackError::Conflict(format!(
            "subject has {feedback_count} feedback records and cannot be deleted"
        )));
    }

    let deleted = sqlx::query("DELETE FROM feedback_tracker.subjects WHERE id = $1")
        .bind(subject_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    if deleted == 0 {
        return Err(FeedbackError::not_found("subject", subject_id.to_string()));
    }
    tx.commit().await?;
    Ok(())
}

async fn upsert_store(tx: &mut Transaction<'_, Postgres>, store: &MemoryStore) -> Result<()> {
    for teacher in store.teachers() {
        let class = teacher.class_assignment.as_ref();
        sqlx::query(
            r#"
            INSERT INTO feedback_tracker.teachers
            (id, employee_id, full_name, email, department,
             class_year, class_branch, class_semester, class_division)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (employee_id) DO UPDATE
            SET full_name = EXCLUDED.full_name, email = EXCLUDED.email,
                department = EXCLUDED.department
            "#,
        )
        .bind(teacher.id)
        .bind(&teacher.employee_id)
        .bind(&teacher.full_name)
        .bind(&teacher.email)
        .bind(&teacher.department)
        .bind(class.map(|c| c.year.clone()))
        .bind(class.map(|c| c.branch.clone()))
        .bind(class.map(|c| c.semester))
        .bind(class.map(|c| c.division.clone()))
        .execute(&mut **tx)
        .await?;
    }

    for student in store.students() {
        sqlx::query(
            r#"
            INSERT INTO feedback_tracker.students
            (id, prn, full_name, email, year, branch, semester, division, class_teacher_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (prn) DO UPDATE
            SET full_name = EXCLUDED.full_name, email = EXCLUDED.email
            "#,
        )
        .bind(student.id)
        .bind(&student.prn)
        .bind(&student.full_name)
        .bind(&student.email)
        .bind(&student.year)
        .bind(&student.branch)
        .bind(student.semester)
        .bind(&student.division)
        .bind(student.class_teacher_id)
        .execute(&mut **tx)
        .await?;
    }

    for subject in store.subjects() {
        sqlx::query(
            r#"
            INSERT INTO feedback_tracker.subjects
            (id, code, name, branch, semester, division, credits)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(subject.id)
        .bind(&subject.code)
        .bind(&subject.name)
        .bind(&subject.branch)
        .bind(subject.semester)
        .bind(&subject.division)
        .bind(subject.credits)
        .execute(&mut **tx)
        .await?;
    }

    for assignment in store.assignments() {
        sqlx::query(
            r#"
            INSERT INTO feedback_tracker.teacher_subjects (teacher_id, subject_id, assigned_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (teacher_id, subject_id) DO NOTHING
            "#,
        )
        .bind(assignment.teacher_id)
        .bind(assignment.subject_id)
        .bind(assignment.assigned_at)
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}

const SEED_MARKER: &str = "EMP001";

fn seed_store<E: PolarityEstimator>(classifier: &SentimentClassifier<E>) -> Result<MemoryStore> {
    let mut store = MemoryStore::new();
    let class_a = ClassKey {
        year: "SE".to_string(),
        branch: "COMP".to_string(),
        semester: 3,
        division: "A".to_string(),
    };

    let teachers = [
        ("6f0d7c43-1b2a-4f5e-9a7d-2c1e8b3f4a01", SEED_MARKER, "Priya Deshmukh"),
        ("6f0d7c43-1b2a-4f5e-9a7d-2c1e8b3f4a02", "EMP002", "Rahul Kulkarni"),
        ("6f0d7c43-1b2a-4f5e-9a7d-2c1e8b3f4a03", "EMP003", "Anita Joshi"),
    ];
    let mut teacher_ids = Vec::new();
    for (id, employee_id, name) in teachers {
        let id = Uuid::parse_str(id).map_err(|err| FeedbackError::Validation(err.to_string()))?;
        teacher_ids.push(id);
        store.put_teacher(Teacher {
            id,
            employee_id: employee_id.to_string(),
            full_name: name.to_string(),
            email: format!("{}@college.edu", employee_id.to_lowercase()),
            department: Some("COMP".to_string()),
            class_assignment: None,
        })?;
    }
    roster::designate_class_teacher(&mut store, SEED_MARKER, class_a)?;

    let subjects = [
        ("DSA301", "Data Structures", Some("A"), Some(0)),
        ("OOP302", "Object Oriented Programming", None, Some(1)),
        ("DBMS303", "Database Management Systems", None, Some(2)),
        ("MATH301", "Engineering Mathematics III", None, None),
    ];
    let mut subject_ids = Vec::new();
    for (code, name, division, teacher_index) in subjects {
        let subject = Subject {
            id: Uuid::new_v4(),
            code: code.to_string(),
            name: name.to_string(),
            branch: "COMP".to_string(),
            semester: 3,
            division: division.map(str::to_string),
            credits: 4,
        };
        subject_ids.push(subject.id);
        store.add_subject(subject.clone())?;
        if let Some(index) = teacher_index {
            store.assign_subject(TeacherSubject {
                teacher_id: teacher_ids[index],
                subject_id: subject.id,
                assigned_at: Utc::now(),
            })?;
        }
    }

    let students = [
        ("PRN2301", "Avery Patil", "A"),
        ("PRN2302", "Jules Moreno", "A"),
        ("PRN2303", "Kiara Patel", "A"),
        ("PRN2304", "Dev Shah", "B"),
    ];
    let mut student_ids = Vec::new();
    for (prn, name, division) in students {
        let saved = roster::save_student(
            &mut store,
            Student {
                id: Uuid::new_v4(),
                prn: prn.to_string(),
                full_name: name.to_string(),
                email: format!("{}@college.edu", prn.to_lowercase()),
                year: "SE".to_string(),
                branch: "COMP".to_string(),
                semester: 3,
                division: Some(division.to_string()),
                class_teacher_id: None,
            },
        )?;
        student_ids.push(saved.id);
    }

    let forms = [
        (0, 0, 0, "5,4,5,4,5", "Excellent teacher, very clear explanations", "More practice problems"),
        (0, 1, 1, "3,3,2,3,3", "Concepts are not explained clearly enough", ""),
        (1, 0, 0, "4,4,4,5,4", "Helpful and patient", "Share notes earlier"),
        (3, 1, 1, "2,2,3,2,2", "Boring lectures and often late", "Use more examples"),
    ];
    for (student, subject, teacher, ratings, comments, suggestions) in forms {
        feedback::submit(
            &mut store,
            FeedbackSubmission {
                student_id: student_ids[student],
                teacher_id: teacher_ids[teacher],
                subject_id: subject_ids[subject],
                ratings: ratings.parse()?,
                comments: comments.to_string(),
                suggestions: suggestions.to_string(),
                is_anonymous: student != 1,
            },
            classifier,
        )?;
    }

    Ok(store)
}

pub async fn seed<E: PolarityEstimator>(
    pool: &PgPool,
    classifier: &SentimentClassifier<E>,
) -> Result<usize> {
    let store = seed_store(classifier)?;
    let mut tx = pool.begin().await?;

    let seeded: i64 = sqlx::query(
        "SELECT COUNT(*) AS count FROM feedback_tracker.teachers WHERE employee_id = $1",
    )
    .bind(SEED_MARKER)
    .fetch_one(&mut *tx)
    .await?
    .try_get("count")?;
    if seeded > 0 {
        info!("seed data already present");
        return Ok(0);
    }

    upsert_store(&mut tx, &store).await?;

    let mut inserted = 0;
    for record in store.all_feedback() {
        let draft = FeedbackDraft {
            key: record.key(),
            ratings: record.ratings,
            comments: record.comments.clone(),
            suggestions: record.suggestions.clone(),
            comment_sentiment: record.comment_sentiment,
            suggestion_sentiment: record.suggestion_sentiment,
            is_anonymous: record.is_anonymous,
        };
        if insert_feedback_in(&mut tx, &draft, record.id, record.created_at).await? {
            inserted += 1;
        }
    }
    tx.commit().await?;
    info!(feedback = inserted, "seed data inserted");
    Ok(inserted)
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    prn: String,
    employee_id: String,
    subject_code: String,
    teaching_effectiveness: i32,
    course_content: i32,
    interaction_quality: i32,
    assignment_feedback: i32,
    overall_satisfaction: i32,
    #[serde(default)]
    comments: String,
    #[serde(default)]
    suggestions: String,
    is_anonymous: Option<bool>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub inserted: usize,
    pub skipped: usize,
}

/// Imports feedback rows through the submission path. Duplicates are skipped;
/// any other bad row aborts the whole import.
pub async fn import_csv<E: PolarityEstimator>(
    pool: &PgPool,
    csv_path: &Path,
    classifier: &SentimentClassifier<E>,
) -> Result<ImportSummary> {
    let mut store = load_store(pool).await?;
    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut tx = pool.begin().await?;
    let mut summary = ImportSummary::default();

    for (index, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result?;
        let line = index + 2;
        let (student, teacher, subject) =
            feedback::resolve_participants(&store, &row.prn, &row.employee_id, &row.subject_code)?;

        let submission = FeedbackSubmission {
            student_id: student.id,
            teacher_id: teacher.id,
            subject_id: subject.id,
            ratings: Ratings {
                teaching_effectiveness: row.teaching_effectiveness,
                course_content: row.course_content,
                interaction_quality: row.interaction_quality,
                assignment_feedback: row.assignment_feedback,
                overall_satisfaction: row.overall_satisfaction,
            },
            comments: row.comments,
            suggestions: row.suggestions,
            is_anonymous: row.is_anonymous.unwrap_or(true),
        };

        let draft = match feedback::prepare(&store, submission, classifier) {
            Ok(draft) => draft,
            Err(err) if err.kind() == ErrorKind::Conflict => {
                warn!(line, prn = %row.prn, "skipping duplicate feedback");
                summary.skipped += 1;
                continue;
            }
            Err(err) => {
                warn!(line, error = %err, "rejecting import");
                return Err(err);
            }
        };

        let record = store.insert_feedback(draft.clone())?;
        if insert_feedback_in(&mut tx, &draft, record.id, record.created_at).await? {
            summary.inserted += 1;
        } else {
            summary.skipped += 1;
        }
    }

    tx.commit().await?;
    info!(inserted = summary.inserted, skipped = summary.skipped, "import finished");
    Ok(summary)
}
