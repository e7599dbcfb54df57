use sqlx::{PgPool, Postgres, QueryBuilder};
use time::PrimitiveDateTime;

use crate::db::models::Attempt;
use crate::db::types::AttemptStatus;

pub(crate) const COLUMNS: &str = "\
    id, exam_id, student_id, attempt_number, question_seed, started_at, submitted_at, \
    status, score, max_score, time_taken_seconds, ip_address, graded_at, reviewed_at, \
    created_at, updated_at";

pub(crate) struct CreateAttempt<'a> {
    pub(crate) id: &'a str,
    pub(crate) exam_id: &'a str,
    pub(crate) student_id: &'a str,
    pub(crate) attempt_number: i32,
    pub(crate) question_seed: i64,
    pub(crate) max_score: f64,
    pub(crate) ip_address: Option<&'a str>,
    pub(crate) started_at: PrimitiveDateTime,
}

/// Attempt row joined with the exam title, for a student's own history.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct StudentAttemptRow {
    pub(crate) id: String,
    pub(crate) exam_id: String,
    pub(crate) exam_title: String,
    pub(crate) attempt_number: i32,
    pub(crate) status: AttemptStatus,
    pub(crate) started_at: PrimitiveDateTime,
    pub(crate) submitted_at: Option<PrimitiveDateTime>,
    pub(crate) score: f64,
    pub(crate) max_score: f64,
    pub(crate) show_results: bool,
    pub(crate) passing_score: f64,
}

/// Attempt row joined with the student, for the staff view of one exam.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ExamAttemptRow {
    pub(crate) id: String,
    pub(crate) student_id: String,
    pub(crate) student_username: String,
    pub(crate) attempt_number: i32,
    pub(crate) status: AttemptStatus,
    pub(crate) started_at: PrimitiveDateTime,
    pub(crate) submitted_at: Option<PrimitiveDateTime>,
    pub(crate) score: f64,
    pub(crate) max_score: f64,
    pub(crate) time_taken_seconds: Option<i64>,
    pub(crate) pending_answers: i64,
}

/// Bounds how long the current transaction waits on row and advisory locks.
pub(crate) async fn set_lock_timeout(
    executor: impl sqlx::PgExecutor<'_>,
    timeout_ms: u64,
) -> Result<(), sqlx::Error> {
    sqlx::query(&format!("SET LOCAL lock_timeout = '{timeout_ms}ms'"))
        .execute(executor)
        .await?;
    Ok(())
}

/// Transaction-scoped lock serialising attempt lifecycle changes for one student on one exam.
pub(crate) async fn acquire_student_exam_lock(
    executor: impl sqlx::PgExecutor<'_>,
    exam_id: &str,
    student_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1 || ':' || $2, 0))")
        .bind(exam_id)
        .bind(student_id)
        .execute(executor)
        .await?;
    Ok(())
}

pub(crate) async fn find_by_id(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
) -> Result<Option<Attempt>, sqlx::Error> {
    sqlx::query_as::<_, Attempt>(&format!("SELECT {COLUMNS} FROM attempts WHERE id = $1"))
        .bind(id)
        .fetch_optional(executor)
        .await
}

pub(crate) async fn lock_for_update(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
) -> Result<Option<Attempt>, sqlx::Error> {
    sqlx::query_as::<_, Attempt>(&format!(
        "SELECT {COLUMNS} FROM attempts WHERE id = $1 FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(executor)
    .await
}

pub(crate) async fn find_in_progress(
    executor: impl sqlx::PgExecutor<'_>,
    exam_id: &str,
    student_id: &str,
) -> Result<Option<Attempt>, sqlx::Error> {
    sqlx::query_as::<_, Attempt>(&format!(
        "SELECT {COLUMNS} FROM attempts \
         WHERE exam_id = $1 AND student_id = $2 AND status = $3 \
         ORDER BY attempt_number DESC LIMIT 1"
    ))
    .bind(exam_id)
    .bind(student_id)
    .bind(AttemptStatus::InProgress)
    .fetch_optional(executor)
    .await
}

pub(crate) async fn count_by_exam_and_student(
    executor: impl sqlx::PgExecutor<'_>,
    exam_id: &str,
    student_id: &str,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM attempts WHERE exam_id = $1 AND student_id = $2")
        .bind(exam_id)
        .bind(student_id)
        .fetch_one(executor)
        .await
}

pub(crate) async fn create(
    executor: impl sqlx::PgExecutor<'_>,
    params: CreateAttempt<'_>,
) -> Result<Attempt, sqlx::Error> {
    sqlx::query_as::<_, Attempt>(&format!(
        "INSERT INTO attempts (
            id, exam_id, student_id, attempt_number, question_seed, started_at,
            status, score, max_score, ip_address, created_at, updated_at
        ) VALUES ($1,$2,$3,$4,$5,$6,$7,0,$8,$9,$6,$6)
        RETURNING {COLUMNS}",
    ))
    .bind(params.id)
    .bind(params.exam_id)
    .bind(params.student_id)
    .bind(params.attempt_number)
    .bind(params.question_seed)
    .bind(params.started_at)
    .bind(AttemptStatus::InProgress)
    .bind(params.max_score)
    .bind(params.ip_address)
    .fetch_one(executor)
    .await
}

pub(crate) async fn mark_submitted(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
    submitted_at: PrimitiveDateTime,
    time_taken_seconds: i64,
) -> Result<Attempt, sqlx::Error> {
    sqlx::query_as::<_, Attempt>(&format!(
        "UPDATE attempts
         SET status = $1, submitted_at = $2, time_taken_seconds = $3, updated_at = $2
         WHERE id = $4
         RETURNING {COLUMNS}",
    ))
    .bind(AttemptStatus::Submitted)
    .bind(submitted_at)
    .bind(time_taken_seconds)
    .bind(id)
    .fetch_one(executor)
    .await
}

pub(crate) struct GradingUpdate {
    pub(crate) score: f64,
    pub(crate) max_score: f64,
    pub(crate) status: AttemptStatus,
    pub(crate) graded_at: Option<PrimitiveDateTime>,
    pub(crate) updated_at: PrimitiveDateTime,
}

pub(crate) async fn update_grading(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
    params: GradingUpdate,
) -> Result<Attempt, sqlx::Error> {
    sqlx::query_as::<_, Attempt>(&format!(
        "UPDATE attempts
         SET score = $1, max_score = $2, status = $3, graded_at = $4, updated_at = $5
         WHERE id = $6
         RETURNING {COLUMNS}",
    ))
    .bind(params.score)
    .bind(params.max_score)
    .bind(params.status)
    .bind(params.graded_at)
    .bind(params.updated_at)
    .bind(id)
    .fetch_one(executor)
    .await
}

pub(crate) async fn mark_reviewed(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
    now: PrimitiveDateTime,
) -> Result<Attempt, sqlx::Error> {
    sqlx::query_as::<_, Attempt>(&format!(
        "UPDATE attempts SET status = $1, reviewed_at = $2, updated_at = $2
         WHERE id = $3
         RETURNING {COLUMNS}",
    ))
    .bind(AttemptStatus::Reviewed)
    .bind(now)
    .bind(id)
    .fetch_one(executor)
    .await
}

pub(crate) async fn list_by_student(
    pool: &PgPool,
    student_id: &str,
    status: Option<AttemptStatus>,
    skip: i64,
    limit: i64,
) -> Result<Vec<StudentAttemptRow>, sqlx::Error> {
    let mut builder = QueryBuilder::<Postgres>::new(
        "SELECT a.id, a.exam_id, e.title AS exam_title, a.attempt_number, a.status,
                a.started_at, a.submitted_at, a.score, a.max_score,
                e.show_results, e.passing_score
         FROM attempts a
         JOIN exams e ON e.id = a.exam_id
         WHERE a.student_id = ",
    );
    builder.push_bind(student_id);
    if let Some(status) = status {
        builder.push(" AND a.status = ");
        builder.push_bind(status);
    }
    builder.push(" ORDER BY a.started_at DESC OFFSET ");
    builder.push_bind(skip.max(0));
    builder.push(" LIMIT ");
    builder.push_bind(limit);

    builder.build_query_as::<StudentAttemptRow>().fetch_all(pool).await
}

pub(crate) async fn count_by_student(
    pool: &PgPool,
    student_id: &str,
    status: Option<AttemptStatus>,
) -> Result<i64, sqlx::Error> {
    let mut builder =
        QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM attempts WHERE student_id = ");
    builder.push_bind(student_id);
    if let Some(status) = status {
        builder.push(" AND status = ");
        builder.push_bind(status);
    }
    builder.build_query_scalar::<i64>().fetch_one(pool).await
}

pub(crate) async fn list_by_exam(
    pool: &PgPool,
    exam_id: &str,
    status: Option<AttemptStatus>,
    skip: i64,
    limit: i64,
) -> Result<Vec<ExamAttemptRow>, sqlx::Error> {
    let mut builder = QueryBuilder::<Postgres>::new(
        "SELECT a.id, a.student_id, u.username AS student_username, a.attempt_number,
                a.status, a.started_at, a.submitted_at, a.score, a.max_score,
                a.time_taken_seconds,
                (SELECT COUNT(*) FROM answers ans
                  WHERE ans.attempt_id = a.id AND ans.graded_at IS NULL) AS pending_answers
         FROM attempts a
         JOIN users u ON u.id = a.student_id
         WHERE a.exam_id = ",
    );
    builder.push_bind(exam_id);
    if let Some(status) = status {
        builder.push(" AND a.status = ");
        builder.push_bind(status);
    }
    builder.push(" ORDER BY a.submitted_at DESC NULLS LAST, a.started_at DESC OFFSET ");
    builder.push_bind(skip.max(0));
    builder.push(" LIMIT ");
    builder.push_bind(limit);

    builder.build_query_as::<ExamAttemptRow>().fetch_all(pool).await
}

pub(crate) async fn count_by_exam(
    pool: &PgPool,
    exam_id: &str,
    status: Option<AttemptStatus>,
) -> Result<i64, sqlx::Error> {
    let mut builder =
        QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM attempts WHERE exam_id = ");
    builder.push_bind(exam_id);
    if let Some(status) = status {
        builder.push(" AND status = ");
        builder.push_bind(status);
    }
    builder.build_query_scalar::<i64>().fetch_one(pool).await
}
