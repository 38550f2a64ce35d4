use std::fs::File;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use sqlx::PgPool;
use tracing::{error, info, warn};

mod completion;
mod config;
mod db;
mod error;
mod feedback;
mod models;
mod report;
mod roster;
mod sentiment;
mod store;

use crate::config::Settings;
use crate::error::{ErrorKind, FeedbackError};
use crate::feedback::FeedbackSubmission;
use crate::models::{ClassKey, Ratings, SentimentResult, Teacher};
use crate::sentiment::SentimentPolicy;
use crate::store::{MemoryStore, RecordStore};

#[derive(Parser)]
#[command(name = "feedback-tracker")]
#[command(about = "Student feedback collection, sentiment and completion tracking", long_about = None)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a demo class with teachers, subjects and feedback
    Seed,
    /// Classify a piece of text without touching the database
    Classify { text: String },
    /// Submit one feedback form
    Submit {
        #[arg(long)]
        prn: String,
        #[arg(long)]
        employee_id: String,
        #[arg(long)]
        subject_code: String,
        /// Five 1-5 ratings in form order, e.g. `5,4,5,4,5`
        #[arg(long)]
        ratings: Ratings,
        #[arg(long, default_value = "")]
        comments: String,
        #[arg(long, default_value = "")]
        suggestions: String,
        /// Show the student's identity on exports
        #[arg(long)]
        named: bool,
    },
    /// Import feedback forms from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Recompute stored comment and suggestion sentiment
    Reanalyze {
        #[arg(long)]
        only_missing: bool,
    },
    /// List a student's submitted and pending feedback
    Obligations {
        #[arg(long)]
        prn: String,
        #[arg(long)]
        json: bool,
    },
    /// Completion tracking for a class teacher's students
    ClassTracking {
        #[arg(long)]
        employee_id: String,
        #[arg(long)]
        json: bool,
        /// Also write the tracking sheet as CSV
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Rating and sentiment statistics for one teacher
    TeacherStats {
        #[arg(long)]
        employee_id: String,
        #[arg(long)]
        json: bool,
    },
    /// Institution-wide statistics
    Overview {
        #[arg(long)]
        json: bool,
    },
    /// Make a teacher the class teacher of a cohort
    DesignateClassTeacher {
        #[arg(long)]
        employee_id: String,
        #[arg(long)]
        year: String,
        #[arg(long)]
        branch: String,
        #[arg(long)]
        semester: i32,
        #[arg(long)]
        division: String,
    },
    /// Delete a subject that has no feedback
    DeleteSubject {
        #[arg(long)]
        code: String,
        #[arg(long)]
        branch: String,
        #[arg(long)]
        semester: i32,
        /// Omit for a common subject
        #[arg(long)]
        division: Option<String>,
    },
    /// Export feedback as CSV, all records or one teacher's
    Export {
        #[arg(long)]
        employee_id: Option<String>,
        #[arg(long, default_value = "feedback.csv")]
        out: PathBuf,
    },
    /// Generate a markdown report for a teacher or class teacher
    Report {
        #[arg(long)]
        employee_id: String,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn find_teacher(store: &MemoryStore, employee_id: &str) -> anyhow::Result<Teacher> {
    store
        .teacher_by_employee_id(employee_id)
        .with_context(|| format!("no teacher with employee ID {employee_id}"))
}

async fn snapshot(pool: &PgPool) -> anyhow::Result<MemoryStore> {
    db::load_store(pool)
        .await
        .context("failed to load records from Postgres")
}

#[derive(Serialize)]
struct Classification {
    policy: SentimentPolicy,
    #[serde(flatten)]
    result: SentimentResult,
}

/// Looks through any added context for the underlying `FeedbackError`.
fn failure_kind(err: &anyhow::Error) -> ErrorKind {
    err.downcast_ref::<FeedbackError>()
        .map(FeedbackError::kind)
        .unwrap_or(ErrorKind::Internal)
}

/// Rejections are expected outcomes and log at warn; anything else is an
/// internal failure.
fn log_failure(err: &anyhow::Error) {
    match failure_kind(err) {
        ErrorKind::Internal => error!(error = %format!("{err:#}"), "command failed"),
        kind => warn!(?kind, error = %err, "command rejected"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    cli.settings.init_tracing()?;
    let result = run(cli).await;
    if let Err(err) = &result {
        log_failure(err);
    }
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = cli.settings;
    let classifier = settings.classifier();

    if let Commands::Classify { text } = &cli.command {
        return print_json(&Classification {
            policy: classifier.policy(),
            result: classifier.classify(text),
        });
    }

    let pool = settings.connect().await?;

    match cli.command {
        Commands::Classify { .. } => {}
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let inserted = db::seed(&pool, &classifier).await?;
            println!("Seed data inserted ({inserted} feedback records).");
        }
        Commands::Submit {
            prn,
            employee_id,
            subject_code,
            ratings,
            comments,
            suggestions,
            named,
        } => {
            let store = snapshot(&pool).await?;
            let (student, teacher, subject) =
                feedback::resolve_participants(&store, &prn, &employee_id, &subject_code)?;
            let submission = FeedbackSubmission {
                student_id: student.id,
                teacher_id: teacher.id,
                subject_id: subject.id,
                ratings,
                comments,
                suggestions,
                is_anonymous: !named,
            };
            let draft = feedback::prepare(&store, submission, &classifier)
                .inspect_err(|err| {
                    warn!(prn = %prn, subject = %subject.code, error = %err, "feedback submission rejected")
                })?;
            let record = db::insert_feedback(&pool, draft)
                .await
                .inspect_err(|err| {
                    warn!(prn = %prn, subject = %subject.code, error = %err, "feedback submission rejected")
                })?;
            info!(feedback_id = %record.id, prn = %prn, subject = %subject.code, "feedback submitted");
            println!(
                "Feedback {} recorded (comments {}, suggestions {}).",
                record.id, record.comment_sentiment.label, record.suggestion_sentiment.label
            );
        }
        Commands::Import { csv } => {
            let summary = db::import_csv(&pool, &csv, &classifier)
                .await
                .inspect_err(|err| warn!(csv = %csv.display(), error = %err, "import rolled back"))?;
            println!(
                "Inserted {} feedback records from {} ({} duplicates skipped).",
                summary.inserted,
                csv.display(),
                summary.skipped
            );
        }
        Commands::Reanalyze { only_missing } => {
            let mut store = snapshot(&pool).await?;
            let targets: Vec<_> = store
                .all_feedback()
                .into_iter()
                .filter(|record| !only_missing || feedback::needs_analysis(record))
                .map(|record| record.id)
                .collect();
            let summary = feedback::reanalyze(&mut store, &classifier, only_missing)?;
            let changed: Vec<_> = store
                .all_feedback()
                .into_iter()
                .filter(|record| targets.contains(&record.id))
                .collect();
            let saved = db::save_sentiments(&pool, &changed).await?;
            println!(
                "Re-analyzed {} of {} feedback records ({saved} rows saved).",
                summary.updated, summary.total
            );
        }
        Commands::Obligations { prn, json } => {
            let store = snapshot(&pool).await?;
            let student = store
                .student_by_prn(&prn)
                .with_context(|| format!("no student with PRN {prn}"))?;
            let obligations = completion::student_obligations(&store, &student);
            if json {
                return print_json(&obligations);
            }
            println!(
                "{} {}: {} submitted, {} pending",
                student.prn,
                student.full_name,
                obligations.submitted(),
                obligations.pending()
            );
            for obligation in &obligations.obligations {
                let state = if obligation.completed { "done" } else { "pending" };
                println!(
                    "- {} {} by {} [{state}]",
                    obligation.subject.code, obligation.subject.name, obligation.teacher.name
                );
            }
            for subject in &obligations.unassigned_subjects {
                println!("- {} {} (no teacher assigned)", subject.code, subject.name);
            }
        }
        Commands::ClassTracking {
            employee_id,
            json,
            csv,
        } => {
            let store = snapshot(&pool).await?;
            let teacher = find_teacher(&store, &employee_id)?;
            let tracking = completion::class_completion(&store, &teacher)?;
            if let Some(path) = csv {
                let file = File::create(&path)
                    .with_context(|| format!("failed to create {}", path.display()))?;
                report::write_class_tracking_csv(file, &tracking)?;
                println!("Tracking sheet written to {}.", path.display());
            }
            if json {
                return print_json(&tracking);
            }
            let summary = &tracking.summary;
            println!(
                "{} students, {} submitted, {} pending, completion {:.2}%",
                summary.total_students,
                summary.students_with_submissions,
                summary.students_without_submissions,
                summary.submission_rate
            );
            for status in &tracking.students {
                println!(
                    "- {} {}: {}/{} ({:.2}%)",
                    status.prn,
                    status.name,
                    status.submitted,
                    status.submitted + status.pending,
                    status.completion_percentage
                );
            }
        }
        Commands::TeacherStats { employee_id, json } => {
            let store = snapshot(&pool).await?;
            let teacher = find_teacher(&store, &employee_id)?;
            let aggregate = completion::teacher_aggregate(&store, &teacher);
            if json {
                return print_json(&aggregate);
            }
            let sentiment = &aggregate.sentiment_distribution;
            println!(
                "{} ({}): {} feedback, overall {:.2}, positive {} / negative {} / neutral {}",
                aggregate.teacher.name,
                aggregate.teacher.employee_id,
                aggregate.total_feedback,
                aggregate.average_ratings.overall_satisfaction,
                sentiment.positive,
                sentiment.negative,
                sentiment.neutral
            );
        }
        Commands::Overview { json } => {
            let store = snapshot(&pool).await?;
            let overview = completion::institution_overview(&store);
            if json {
                return print_json(&overview);
            }
            println!(
                "{} students, {} teachers, {} subjects, {} feedback (overall {:.2})",
                overview.total_students,
                overview.total_teachers,
                overview.total_subjects,
                overview.total_feedback,
                overview.average_ratings.overall
            );
            for entry in &overview.branch_distribution {
                println!("- {}: {}", entry.label, entry.count);
            }
        }
        Commands::DesignateClassTeacher {
            employee_id,
            year,
            branch,
            semester,
            division,
        } => {
            let class = ClassKey {
                year,
                branch,
                semester,
                division,
            };
            let students = db::designate_class_teacher(&pool, &employee_id, &class).await?;
            println!("{employee_id} is class teacher of {class} ({students} students).");
        }
        Commands::DeleteSubject {
            code,
            branch,
            semester,
            division,
        } => {
            let mut store = snapshot(&pool).await?;
            let subject = store
                .subjects()
                .into_iter()
                .find(|s| {
                    s.code == code
                        && s.branch == branch
                        && s.semester == semester
                        && s.division == division
                })
                .with_context(|| format!("no subject {code} for {branch} semester {semester}"))?;
            store.remove_subject(subject.id)?;
            db::delete_subject(&pool, subject.id).await?;
            println!("Deleted subject {} ({}).", subject.code, subject.division_label());
        }
        Commands::Export { employee_id, out } => {
            let store = snapshot(&pool).await?;
            let rows = match employee_id {
                Some(employee_id) => {
                    let teacher = find_teacher(&store, &employee_id)?;
                    report::teacher_feedback_rows(&store, &teacher)
                }
                None => report::all_feedback_rows(&store),
            };
            let file = File::create(&out)
                .with_context(|| format!("failed to create {}", out.display()))?;
            report::write_feedback_csv(file, &rows)?;
            println!("Exported {} feedback records to {}.", rows.len(), out.display());
        }
        Commands::Report { employee_id, out } => {
            let store = snapshot(&pool).await?;
            let teacher = find_teacher(&store, &employee_id)?;
            let today = chrono::Utc::now().date_naive();
            let report = if teacher.is_class_teacher() {
                let tracking = completion::class_completion(&store, &teacher)?;
                report::build_class_report(&tracking, today)
            } else {
                let aggregate = completion::teacher_aggregate(&store, &teacher);
                let rows = report::teacher_feedback_rows(&store, &teacher);
                report::build_teacher_report(&aggregate, &rows, today)
            };
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_kind_sees_through_context() {
        let conflict = anyhow::Error::from(FeedbackError::Conflict("already submitted".into()))
            .context("submit failed");
        assert_eq!(failure_kind(&conflict), ErrorKind::Conflict);

        let missing = anyhow::Error::from(FeedbackError::not_found("student", "PRN404"));
        assert_eq!(failure_kind(&missing), ErrorKind::NotFound);

        let io = anyhow::Error::from(FeedbackError::Io(std::io::Error::other("disk full")));
        assert_eq!(failure_kind(&io), ErrorKind::Internal);

        assert_eq!(failure_kind(&anyhow::anyhow!("no teacher")), ErrorKind::Internal);
    }

    #[test]
    fn classification_output_names_the_policy() {
        let classifier = sentiment::SentimentClassifier::new(SentimentPolicy::Bulk);
        let output = Classification {
            policy: classifier.policy(),
            result: classifier.classify("Excellent teacher, very clear explanations"),
        };
        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json["policy"], "bulk");
        assert_eq!(json["label"], "positive");
        assert!(json["score"].as_f64().unwrap() > 0.1);
    }

    #[test]
    fn submit_command_parses_ratings() {
        let cli = Cli::try_parse_from([
            "feedback-tracker",
            "submit",
            "--prn",
            "PRN001",
            "--employee-id",
            "EMP01",
            "--subject-code",
            "MATH101",
            "--ratings",
            "5,4,5,4,5",
        ])
        .unwrap();
        match cli.command {
            Commands::Submit { ratings, named, .. } => {
                assert_eq!(ratings.values(), [5, 4, 5, 4, 5]);
                assert!(!named);
            }
            _ => panic!("expected submit"),
        }
        let out_of_range = Cli::try_parse_from([
            "feedback-tracker",
            "submit",
            "--prn",
            "PRN001",
            "--employee-id",
            "EMP01",
            "--subject-code",
            "MATH101",
            "--ratings",
            "9,4,5,4,5",
        ]);
        assert!(out_of_range.is_err());
    }
}
