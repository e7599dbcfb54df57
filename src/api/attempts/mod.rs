mod staff;
mod student;

use axum::{
    routing::{get, post, put},
    Router,
};

use crate::core::state::AppState;

pub(crate) use staff::list_exam_attempts;
pub(crate) use student::start_attempt;

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/mine", get(student::list_my_attempts))
        .route("/:attempt_id/questions", get(student::get_attempt_questions))
        .route("/:attempt_id/answers", get(student::list_attempt_answers))
        .route("/:attempt_id/answers/:question_id", put(student::record_answer))
        .route("/:attempt_id/submit", post(student::submit_attempt))
        .route("/:attempt_id/result", get(student::get_result))
        .route("/:attempt_id/grade", post(staff::regrade_attempt))
        .route("/:attempt_id/review", post(staff::review_attempt))
}

/// Grading endpoints addressed by answer id.
pub(crate) fn answers_router() -> Router<AppState> {
    Router::new().route("/:answer_id/grade", post(staff::grade_answer))
}

#[cfg(test)]
mod tests;
