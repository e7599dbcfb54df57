use time::PrimitiveDateTime;
use uuid::Uuid;

use crate::db::models::Answer;

pub(crate) const COLUMNS: &str = "\
    id, attempt_id, question_id, answer, score, max_score, is_correct, auto_graded, \
    graded_by, feedback, graded_at, created_at, updated_at";

pub(crate) async fn find_by_id(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
) -> Result<Option<Answer>, sqlx::Error> {
    sqlx::query_as::<_, Answer>(&format!("SELECT {COLUMNS} FROM answers WHERE id = $1"))
        .bind(id)
        .fetch_optional(executor)
        .await
}

pub(crate) async fn list_by_attempt(
    executor: impl sqlx::PgExecutor<'_>,
    attempt_id: &str,
) -> Result<Vec<Answer>, sqlx::Error> {
    sqlx::query_as::<_, Answer>(&format!(
        "SELECT {COLUMNS} FROM answers WHERE attempt_id = $1 ORDER BY created_at, id"
    ))
    .bind(attempt_id)
    .fetch_all(executor)
    .await
}

pub(crate) async fn lock_by_attempt_and_question(
    executor: impl sqlx::PgExecutor<'_>,
    attempt_id: &str,
    question_id: &str,
) -> Result<Option<Answer>, sqlx::Error> {
    sqlx::query_as::<_, Answer>(&format!(
        "SELECT {COLUMNS} FROM answers WHERE attempt_id = $1 AND question_id = $2 FOR UPDATE"
    ))
    .bind(attempt_id)
    .bind(question_id)
    .fetch_optional(executor)
    .await
}

/// Inserts or replaces the student's response. Grading fields are untouched.
pub(crate) async fn upsert_response(
    executor: impl sqlx::PgExecutor<'_>,
    attempt_id: &str,
    question_id: &str,
    answer: Option<&str>,
    now: PrimitiveDateTime,
) -> Result<Answer, sqlx::Error> {
    sqlx::query_as::<_, Answer>(&format!(
        "INSERT INTO answers (id, attempt_id, question_id, answer, created_at, updated_at)
         VALUES ($1,$2,$3,$4,$5,$5)
         ON CONFLICT (attempt_id, question_id)
         DO UPDATE SET answer = EXCLUDED.answer, updated_at = EXCLUDED.updated_at
         RETURNING {COLUMNS}",
    ))
    .bind(Uuid::new_v4().to_string())
    .bind(attempt_id)
    .bind(question_id)
    .bind(answer)
    .bind(now)
    .fetch_one(executor)
    .await
}

/// Creates empty answer records for every question of the exam the attempt has not answered.
pub(crate) async fn insert_missing(
    executor: impl sqlx::PgExecutor<'_>,
    attempt_id: &str,
    exam_id: &str,
    now: PrimitiveDateTime,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO answers (id, attempt_id, question_id, answer, created_at, updated_at)
         SELECT gen_random_uuid()::text, $1, q.id, NULL, $3, $3
         FROM questions q
         WHERE q.exam_id = $2
         ON CONFLICT (attempt_id, question_id) DO NOTHING",
    )
    .bind(attempt_id)
    .bind(exam_id)
    .bind(now)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

pub(crate) struct GradeUpdate<'a> {
    pub(crate) score: f64,
    pub(crate) max_score: Option<f64>,
    pub(crate) is_correct: bool,
    pub(crate) auto_graded: bool,
    pub(crate) graded_by: Option<&'a str>,
    pub(crate) feedback: Option<&'a str>,
    pub(crate) graded_at: Option<PrimitiveDateTime>,
    pub(crate) updated_at: PrimitiveDateTime,
}

pub(crate) async fn update_grade(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
    params: GradeUpdate<'_>,
) -> Result<Answer, sqlx::Error> {
    sqlx::query_as::<_, Answer>(&format!(
        "UPDATE answers SET
            score = $1,
            max_score = $2,
            is_correct = $3,
            auto_graded = $4,
            graded_by = $5,
            feedback = $6,
            graded_at = $7,
            updated_at = $8
         WHERE id = $9
         RETURNING {COLUMNS}",
    ))
    .bind(params.score)
    .bind(params.max_score)
    .bind(params.is_correct)
    .bind(params.auto_graded)
    .bind(params.graded_by)
    .bind(params.feedback)
    .bind(params.graded_at)
    .bind(params.updated_at)
    .bind(id)
    .fetch_one(executor)
    .await
}
