use sqlx::{PgPool, Postgres, QueryBuilder};
use time::PrimitiveDateTime;

use crate::db::models::Exam;
use crate::db::types::ExamStatus;

pub(crate) const COLUMNS: &str = "\
    id, title, description, subject, instructions, instructor_id, time_limit_minutes, \
    total_points, total_points_stale, passing_score, max_attempts, status, \
    randomize_questions, randomize_options, show_results, allow_review, \
    availability_start, availability_end, created_at, updated_at";

pub(crate) struct CreateExam<'a> {
    pub(crate) id: &'a str,
    pub(crate) title: &'a str,
    pub(crate) description: Option<&'a str>,
    pub(crate) subject: Option<&'a str>,
    pub(crate) instructions: Option<&'a str>,
    pub(crate) instructor_id: &'a str,
    pub(crate) time_limit_minutes: Option<i32>,
    pub(crate) passing_score: f64,
    pub(crate) max_attempts: i32,
    pub(crate) randomize_questions: bool,
    pub(crate) randomize_options: bool,
    pub(crate) show_results: bool,
    pub(crate) allow_review: bool,
    pub(crate) availability_start: Option<PrimitiveDateTime>,
    pub(crate) availability_end: Option<PrimitiveDateTime>,
    pub(crate) created_at: PrimitiveDateTime,
}

/// Partial update; `None` keeps the stored value.
#[derive(Default)]
pub(crate) struct UpdateExam {
    pub(crate) title: Option<String>,
    pub(crate) description: Option<String>,
    pub(crate) subject: Option<String>,
    pub(crate) instructions: Option<String>,
    pub(crate) time_limit_minutes: Option<i32>,
    pub(crate) passing_score: Option<f64>,
    pub(crate) max_attempts: Option<i32>,
    pub(crate) randomize_questions: Option<bool>,
    pub(crate) randomize_options: Option<bool>,
    pub(crate) show_results: Option<bool>,
    pub(crate) allow_review: Option<bool>,
    pub(crate) availability_start: Option<PrimitiveDateTime>,
    pub(crate) availability_end: Option<PrimitiveDateTime>,
    /// Sets both window bounds to NULL, ignoring the two fields above.
    pub(crate) clear_availability: bool,
}

/// Which exams a listing may return.
pub(crate) struct ExamListFilter<'a> {
    pub(crate) status: Option<ExamStatus>,
    pub(crate) instructor_id: Option<&'a str>,
}

pub(crate) async fn find_by_id(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
) -> Result<Option<Exam>, sqlx::Error> {
    sqlx::query_as::<_, Exam>(&format!("SELECT {COLUMNS} FROM exams WHERE id = $1"))
        .bind(id)
        .fetch_optional(executor)
        .await
}

pub(crate) async fn create(pool: &PgPool, params: CreateExam<'_>) -> Result<Exam, sqlx::Error> {
    sqlx::query_as::<_, Exam>(&format!(
        "INSERT INTO exams (
            id, title, description, subject, instructions, instructor_id, time_limit_minutes,
            total_points, total_points_stale, passing_score, max_attempts, status,
            randomize_questions, randomize_options, show_results, allow_review,
            availability_start, availability_end, created_at, updated_at
        ) VALUES ($1,$2,$3,$4,$5,$6,$7,0,FALSE,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$17)
        RETURNING {COLUMNS}",
    ))
    .bind(params.id)
    .bind(params.title)
    .bind(params.description)
    .bind(params.subject)
    .bind(params.instructions)
    .bind(params.instructor_id)
    .bind(params.time_limit_minutes)
    .bind(params.passing_score)
    .bind(params.max_attempts)
    .bind(ExamStatus::Draft)
    .bind(params.randomize_questions)
    .bind(params.randomize_options)
    .bind(params.show_results)
    .bind(params.allow_review)
    .bind(params.availability_start)
    .bind(params.availability_end)
    .bind(params.created_at)
    .fetch_one(pool)
    .await
}

pub(crate) async fn update(
    pool: &PgPool,
    id: &str,
    params: UpdateExam,
    now: PrimitiveDateTime,
) -> Result<Option<Exam>, sqlx::Error> {
    sqlx::query_as::<_, Exam>(&format!(
        "UPDATE exams SET
            title = COALESCE($1, title),
            description = COALESCE($2, description),
            subject = COALESCE($3, subject),
            instructions = COALESCE($4, instructions),
            time_limit_minutes = COALESCE($5, time_limit_minutes),
            passing_score = COALESCE($6, passing_score),
            max_attempts = COALESCE($7, max_attempts),
            randomize_questions = COALESCE($8, randomize_questions),
            randomize_options = COALESCE($9, randomize_options),
            show_results = COALESCE($10, show_results),
            allow_review = COALESCE($11, allow_review),
            availability_start = CASE WHEN $16 THEN NULL ELSE COALESCE($12, availability_start) END,
            availability_end = CASE WHEN $16 THEN NULL ELSE COALESCE($13, availability_end) END,
            updated_at = $14
         WHERE id = $15
         RETURNING {COLUMNS}",
    ))
    .bind(params.title)
    .bind(params.description)
    .bind(params.subject)
    .bind(params.instructions)
    .bind(params.time_limit_minutes)
    .bind(params.passing_score)
    .bind(params.max_attempts)
    .bind(params.randomize_questions)
    .bind(params.randomize_options)
    .bind(params.show_results)
    .bind(params.allow_review)
    .bind(params.availability_start)
    .bind(params.availability_end)
    .bind(now)
    .bind(id)
    .bind(params.clear_availability)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn update_status(
    pool: &PgPool,
    id: &str,
    status: ExamStatus,
    now: PrimitiveDateTime,
) -> Result<Option<Exam>, sqlx::Error> {
    sqlx::query_as::<_, Exam>(&format!(
        "UPDATE exams SET status = $1, updated_at = $2 WHERE id = $3 RETURNING {COLUMNS}"
    ))
    .bind(status)
    .bind(now)
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn delete_by_id(pool: &PgPool, id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM exams WHERE id = $1").bind(id).execute(pool).await?;
    Ok(result.rows_affected() > 0)
}

pub(crate) async fn list(
    pool: &PgPool,
    filter: &ExamListFilter<'_>,
    skip: i64,
    limit: i64,
) -> Result<Vec<Exam>, sqlx::Error> {
    let mut builder = QueryBuilder::<Postgres>::new(format!("SELECT {COLUMNS} FROM exams"));
    push_filter(&mut builder, filter);
    builder.push(" ORDER BY created_at DESC OFFSET ");
    builder.push_bind(skip.max(0));
    builder.push(" LIMIT ");
    builder.push_bind(limit);

    builder.build_query_as::<Exam>().fetch_all(pool).await
}

pub(crate) async fn count(pool: &PgPool, filter: &ExamListFilter<'_>) -> Result<i64, sqlx::Error> {
    let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM exams");
    push_filter(&mut builder, filter);
    builder.build_query_scalar::<i64>().fetch_one(pool).await
}

fn push_filter<'a>(builder: &mut QueryBuilder<'a, Postgres>, filter: &ExamListFilter<'a>) {
    let mut separated = " WHERE ";
    if let Some(status) = filter.status {
        builder.push(separated);
        builder.push("status = ");
        builder.push_bind(status);
        separated = " AND ";
    }
    if let Some(instructor_id) = filter.instructor_id {
        builder.push(separated);
        builder.push("instructor_id = ");
        builder.push_bind(instructor_id);
    }
}

pub(crate) async fn mark_totals_stale(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE exams SET total_points_stale = TRUE WHERE id = $1")
        .bind(id)
        .execute(executor)
        .await?;
    Ok(())
}

/// Rewrites `total_points` from the current question set and clears the stale flag.
pub(crate) async fn recompute_totals(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
) -> Result<f64, sqlx::Error> {
    sqlx::query_scalar::<_, f64>(
        "UPDATE exams
         SET total_points = COALESCE((SELECT SUM(points) FROM questions WHERE exam_id = $1), 0),
             total_points_stale = FALSE
         WHERE id = $1
         RETURNING total_points",
    )
    .bind(id)
    .fetch_one(executor)
    .await
}
