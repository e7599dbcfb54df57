use thiserror::Error;

/// Failures raised by the question bank, attempt tracker, grading engine and result reporter.
#[derive(Debug, Error)]
pub(crate) enum LmsError {
    #[error("{field}: {message}")]
    Validation { field: &'static str, message: String },
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Forbidden(&'static str),
    #[error("exam is not accepting attempts: {0}")]
    ExamNotActive(String),
    #[error("attempt is closed")]
    AttemptClosed,
    #[error("attempt has not been submitted yet")]
    AttemptNotSubmitted,
    #[error("attempt is not fully graded yet")]
    NotFullyGraded,
    #[error("no further attempts are allowed for this exam")]
    DuplicateAttempt,
    #[error("score {score} is outside the allowed range {}", score_range(.max))]
    ScoreOutOfRange { score: f64, max: Option<f64> },
    #[error("the record was modified concurrently; retry the request")]
    ConcurrentModification,
    #[error("storage failure")]
    Storage(#[source] sqlx::Error),
}

fn score_range(max: &Option<f64>) -> String {
    match max {
        Some(max) => format!("0..={max}"),
        None => "0..".to_string(),
    }
}

const LOCK_NOT_AVAILABLE: &str = "55P03";
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
const ATTEMPT_UNIQUE_CONSTRAINT: &str = "attempts_student_attempt_unique";

impl LmsError {
    pub(crate) fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation { field, message: message.into() }
    }

    /// Whether the caller may retry the same request unchanged.
    pub(crate) fn is_retryable(&self) -> bool {
        matches!(self, LmsError::ConcurrentModification)
    }
}

impl From<sqlx::Error> for LmsError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            let code = db_err.code();
            match code.as_deref() {
                Some(LOCK_NOT_AVAILABLE) => {
                    metrics::counter!(crate::core::metrics::LOCK_TIMEOUTS).increment(1);
                    return LmsError::ConcurrentModification;
                }
                Some(SERIALIZATION_FAILURE) | Some(DEADLOCK_DETECTED) => {
                    return LmsError::ConcurrentModification;
                }
                _ => {}
            }
            if db_err.is_unique_violation()
                && db_err.constraint() == Some(ATTEMPT_UNIQUE_CONSTRAINT)
            {
                return LmsError::DuplicateAttempt;
            }
        }
        LmsError::Storage(err)
    }
}
