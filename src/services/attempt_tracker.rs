use sqlx::PgPool;
use time::PrimitiveDateTime;
use uuid::Uuid;

use crate::core::metrics::{ATTEMPTS_STARTED, ATTEMPTS_SUBMITTED};
use crate::core::security::Principal;
use crate::core::time::{elapsed_seconds, primitive_now_utc};
use crate::db::models::{Answer, Attempt, Exam, Question};
use crate::db::types::{AttemptStatus, ExamStatus, UserRole};
use crate::repositories;
use crate::services::access::can_manage_exam;
use crate::services::errors::LmsError;
use crate::services::{question_bank, randomization};

#[derive(Debug)]
pub(crate) struct StartedAttempt {
    pub(crate) attempt: Attempt,
    pub(crate) resumed: bool,
}

/// Rejects attempts on exams that are not active or outside their availability window.
pub(crate) fn check_exam_open(exam: &Exam, now: PrimitiveDateTime) -> Result<(), LmsError> {
    if exam.status != ExamStatus::Active {
        return Err(LmsError::ExamNotActive(format!("exam status is {}", exam.status.as_str())));
    }
    if let Some(start) = exam.availability_start {
        if now < start {
            return Err(LmsError::ExamNotActive("exam has not opened yet".to_string()));
        }
    }
    if let Some(end) = exam.availability_end {
        if now > end {
            return Err(LmsError::ExamNotActive("exam availability has ended".to_string()));
        }
    }
    Ok(())
}

/// Owner or exam staff may read an attempt.
pub(crate) fn can_view_attempt(principal: &Principal, attempt: &Attempt, exam: &Exam) -> bool {
    attempt.student_id == principal.id || can_manage_exam(principal, exam)
}

fn ensure_owner(principal: &Principal, attempt: &Attempt) -> Result<(), LmsError> {
    if attempt.student_id == principal.id {
        Ok(())
    } else {
        Err(LmsError::Forbidden("This attempt belongs to another student"))
    }
}

/// Loads an attempt with its exam, checking the caller may see it.
pub(crate) async fn load_visible(
    pool: &PgPool,
    principal: &Principal,
    attempt_id: &str,
) -> Result<(Attempt, Exam), LmsError> {
    let attempt = repositories::attempts::find_by_id(pool, attempt_id)
        .await?
        .ok_or(LmsError::NotFound("Attempt"))?;
    let exam = repositories::exams::find_by_id(pool, &attempt.exam_id)
        .await?
        .ok_or(LmsError::NotFound("Exam"))?;
    if !can_view_attempt(principal, &attempt, &exam) {
        return Err(LmsError::Forbidden("Not enough permissions for this attempt"));
    }
    Ok((attempt, exam))
}

pub(crate) async fn start_attempt(
    pool: &PgPool,
    principal: &Principal,
    exam_id: &str,
    ip_address: Option<&str>,
    lock_timeout_ms: u64,
) -> Result<StartedAttempt, LmsError> {
    if principal.role != UserRole::Student {
        return Err(LmsError::Forbidden("Only students can take exams"));
    }

    let exam = repositories::exams::find_by_id(pool, exam_id)
        .await?
        .ok_or(LmsError::NotFound("Exam"))?;
    let now = primitive_now_utc();
    check_exam_open(&exam, now)?;

    let mut tx = pool.begin().await?;
    repositories::attempts::set_lock_timeout(&mut *tx, lock_timeout_ms).await?;
    repositories::attempts::acquire_student_exam_lock(&mut *tx, &exam.id, &principal.id).await?;

    if let Some(attempt) =
        repositories::attempts::find_in_progress(&mut *tx, &exam.id, &principal.id).await?
    {
        tx.commit().await?;
        tracing::info!(attempt_id = %attempt.id, exam_id = %exam.id, "Resuming attempt");
        return Ok(StartedAttempt { attempt, resumed: true });
    }

    let previous =
        repositories::attempts::count_by_exam_and_student(&mut *tx, &exam.id, &principal.id)
            .await?;
    if previous >= i64::from(exam.max_attempts) {
        return Err(LmsError::DuplicateAttempt);
    }

    let max_score = question_bank::ensure_totals(&mut *tx, &exam).await?;
    let id = Uuid::new_v4().to_string();
    let attempt = repositories::attempts::create(
        &mut *tx,
        repositories::attempts::CreateAttempt {
            id: &id,
            exam_id: &exam.id,
            student_id: &principal.id,
            attempt_number: previous as i32 + 1,
            question_seed: randomization::new_seed(),
            max_score,
            ip_address,
            started_at: now,
        },
    )
    .await?;
    tx.commit().await?;

    metrics::counter!(ATTEMPTS_STARTED).increment(1);
    tracing::info!(
        attempt_id = %attempt.id,
        exam_id = %exam.id,
        student_id = %principal.id,
        attempt_number = attempt.attempt_number,
        "Attempt started"
    );
    Ok(StartedAttempt { attempt, resumed: false })
}

/// Questions as this attempt presents them, in its seeded order.
pub(crate) async fn attempt_questions(
    pool: &PgPool,
    principal: &Principal,
    attempt_id: &str,
) -> Result<(Attempt, Exam, Vec<Question>), LmsError> {
    let (attempt, exam) = load_visible(pool, principal, attempt_id).await?;
    let questions = question_bank::list_questions(pool, &exam.id).await?;
    let questions = randomization::arrange_for_attempt(&exam, attempt.question_seed, questions);
    Ok((attempt, exam, questions))
}

fn check_choice_answer(question: &Question, raw: Option<&str>) -> Result<(), LmsError> {
    let Some(raw) = raw.filter(|value| !value.is_empty()) else {
        return Ok(());
    };
    if question.question_type.is_auto_gradable()
        && !question.options.0.iter().any(|option| option.id == raw)
    {
        return Err(LmsError::validation("answer", "must be one of the question's option ids"));
    }
    Ok(())
}

/// Stores the student's latest answer for one question. Repeated calls overwrite.
pub(crate) async fn record_answer(
    pool: &PgPool,
    principal: &Principal,
    attempt_id: &str,
    question_id: &str,
    raw: Option<&str>,
    lock_timeout_ms: u64,
) -> Result<Answer, LmsError> {
    let mut tx = pool.begin().await?;
    repositories::attempts::set_lock_timeout(&mut *tx, lock_timeout_ms).await?;

    let attempt = repositories::attempts::lock_for_update(&mut *tx, attempt_id)
        .await?
        .ok_or(LmsError::NotFound("Attempt"))?;
    ensure_owner(principal, &attempt)?;
    if attempt.status != AttemptStatus::InProgress {
        return Err(LmsError::AttemptClosed);
    }

    let question = repositories::questions::find_by_id(&mut *tx, question_id)
        .await?
        .filter(|question| question.exam_id == attempt.exam_id)
        .ok_or(LmsError::NotFound("Question"))?;
    check_choice_answer(&question, raw)?;

    let answer = repositories::answers::upsert_response(
        &mut *tx,
        &attempt.id,
        &question.id,
        raw,
        primitive_now_utc(),
    )
    .await?;
    tx.commit().await?;

    tracing::debug!(attempt_id, question_id, "Answer recorded");
    Ok(answer)
}

pub(crate) async fn list_answers(
    pool: &PgPool,
    principal: &Principal,
    attempt_id: &str,
) -> Result<(Attempt, Exam, Vec<Answer>), LmsError> {
    let (attempt, exam) = load_visible(pool, principal, attempt_id).await?;
    let answers = repositories::answers::list_by_attempt(pool, &attempt.id).await?;
    Ok((attempt, exam, answers))
}

/// Closes an in-progress attempt. Scoring is left to the grading engine.
pub(crate) async fn submit_attempt(
    pool: &PgPool,
    principal: &Principal,
    attempt_id: &str,
    lock_timeout_ms: u64,
) -> Result<Attempt, LmsError> {
    let observed = repositories::attempts::find_by_id(pool, attempt_id)
        .await?
        .ok_or(LmsError::NotFound("Attempt"))?;
    ensure_owner(principal, &observed)?;
    if observed.status != AttemptStatus::InProgress {
        return Err(LmsError::AttemptClosed);
    }

    let mut tx = pool.begin().await?;
    repositories::attempts::set_lock_timeout(&mut *tx, lock_timeout_ms).await?;
    repositories::attempts::acquire_student_exam_lock(
        &mut *tx,
        &observed.exam_id,
        &observed.student_id,
    )
    .await?;

    let attempt = repositories::attempts::lock_for_update(&mut *tx, attempt_id)
        .await?
        .ok_or(LmsError::NotFound("Attempt"))?;
    if attempt.status != AttemptStatus::InProgress {
        // Another request closed it between our read and the lock.
        return Err(LmsError::ConcurrentModification);
    }

    let now = primitive_now_utc();
    let time_taken = elapsed_seconds(attempt.started_at, now);
    let attempt =
        repositories::attempts::mark_submitted(&mut *tx, &attempt.id, now, time_taken).await?;
    tx.commit().await?;

    metrics::counter!(ATTEMPTS_SUBMITTED).increment(1);
    tracing::info!(
        attempt_id = %attempt.id,
        exam_id = %attempt.exam_id,
        time_taken_seconds = time_taken,
        "Attempt submitted"
    );
    Ok(attempt)
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::db::types::QuestionType;
    use crate::services::access::fixtures::exam;
    use crate::services::question_bank::fixtures::question;

    #[test]
    fn draft_exam_rejects_attempts() {
        let exam = exam("t", ExamStatus::Draft);
        let err = check_exam_open(&exam, datetime!(2025-01-02 10:00)).unwrap_err();
        match err {
            LmsError::ExamNotActive(reason) => assert_eq!(reason, "exam status is draft"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn availability_window_must_contain_start_time() {
        let mut exam = exam("t", ExamStatus::Active);
        exam.availability_start = Some(datetime!(2025-01-02 09:00));
        exam.availability_end = Some(datetime!(2025-01-02 12:00));

        assert!(check_exam_open(&exam, datetime!(2025-01-02 10:00)).is_ok());
        assert!(matches!(
            check_exam_open(&exam, datetime!(2025-01-02 08:59)),
            Err(LmsError::ExamNotActive(_))
        ));
        assert!(matches!(
            check_exam_open(&exam, datetime!(2025-01-02 12:01)),
            Err(LmsError::ExamNotActive(_))
        ));
    }

    #[test]
    fn closed_and_archived_exams_reject_attempts() {
        for status in [ExamStatus::Closed, ExamStatus::Archived] {
            let exam = exam("t", status);
            assert!(check_exam_open(&exam, datetime!(2025-01-02 10:00)).is_err());
        }
    }

    #[test]
    fn choice_answers_must_name_an_option() {
        let mc = question("q1", QuestionType::MultipleChoice, Some("B"), 1.0);
        assert!(check_choice_answer(&mc, Some("C")).is_ok());
        assert!(check_choice_answer(&mc, None).is_ok());
        assert!(matches!(
            check_choice_answer(&mc, Some("Option C")),
            Err(LmsError::Validation { field: "answer", .. })
        ));

        let essay = question("q2", QuestionType::Essay, None, 1.0);
        assert!(check_choice_answer(&essay, Some("free text")).is_ok());
    }

    #[test]
    fn staff_and_owner_can_view_attempt() {
        let exam = exam("instructor-1", ExamStatus::Active);
        let now = datetime!(2025-01-02 10:00);
        let attempt = Attempt {
            id: "attempt-1".to_string(),
            exam_id: exam.id.clone(),
            student_id: "student-1".to_string(),
            attempt_number: 1,
            question_seed: 11,
            started_at: now,
            submitted_at: None,
            status: AttemptStatus::InProgress,
            score: 0.0,
            max_score: 0.0,
            time_taken_seconds: None,
            ip_address: None,
            graded_at: None,
            reviewed_at: None,
            created_at: now,
            updated_at: now,
        };
        let who = |id: &str, role| Principal { id: id.to_string(), role };

        assert!(can_view_attempt(&who("student-1", UserRole::Student), &attempt, &exam));
        assert!(can_view_attempt(&who("instructor-1", UserRole::Instructor), &attempt, &exam));
        assert!(!can_view_attempt(&who("student-2", UserRole::Student), &attempt, &exam));
        assert!(!can_view_attempt(&who("instructor-2", UserRole::Instructor), &attempt, &exam));
    }
}
