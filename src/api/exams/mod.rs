mod handlers;

use axum::{routing::get, routing::post, Router};

use crate::api::{attempts, comments, questions};
use crate::core::state::AppState;

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(handlers::create_exam).get(handlers::list_exams))
        .route(
            "/:exam_id",
            get(handlers::get_exam).patch(handlers::update_exam).delete(handlers::delete_exam),
        )
        .route("/:exam_id/status", post(handlers::change_status))
        .route(
            "/:exam_id/questions",
            post(questions::create_question).get(questions::list_questions),
        )
        .route("/:exam_id/attempts", post(attempts::start_attempt).get(attempts::list_exam_attempts))
        .route("/:exam_id/comments", get(comments::list_comments).post(comments::create_comment))
}
