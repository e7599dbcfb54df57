use axum::http::{Method, StatusCode};
use serde_json::json;
use tower::ServiceExt;

use crate::db::types::{QuestionType, UserRole};
use crate::test_support;

#[tokio::test]
#[ignore = "requires PostgreSQL and Redis"]
async fn draft_exam_cannot_be_started() {
    let ctx = test_support::setup_test_context().await;
    let instructor =
        test_support::insert_user(ctx.state.db(), "teacher1", UserRole::Instructor).await;
    let student = test_support::insert_user(ctx.state.db(), "student1", UserRole::Student).await;
    let exam = test_support::insert_exam(ctx.state.db(), &instructor.id, "Draft quiz").await;

    let token = test_support::bearer_token(&student, ctx.state.settings());
    let response = ctx
        .app
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/exams/{}/attempts", exam.id),
            Some(&token),
            None,
        ))
        .await
        .expect("start attempt");

    let status = response.status();
    let body = test_support::read_json(response).await;
    assert_eq!(status, StatusCode::CONFLICT, "response: {body}");
    assert!(body["detail"].as_str().unwrap_or_default().contains("draft"));
}

#[tokio::test]
#[ignore = "requires PostgreSQL and Redis"]
async fn mixed_exam_is_finalised_after_manual_grade() {
    let ctx = test_support::setup_test_context().await;
    let db = ctx.state.db();
    let instructor = test_support::insert_user(db, "teacher1", UserRole::Instructor).await;
    let student = test_support::insert_user(db, "student1", UserRole::Student).await;

    let exam = test_support::insert_exam(db, &instructor.id, "Midterm").await;
    let choice = test_support::insert_question(
        db,
        &exam.id,
        QuestionType::MultipleChoice,
        &["A", "B", "C"],
        Some("B"),
        10.0,
    )
    .await;
    let essay =
        test_support::insert_question(db, &exam.id, QuestionType::Essay, &[], None, 10.0).await;
    test_support::activate_exam(db, &exam.id).await;

    let student_token = test_support::bearer_token(&student, ctx.state.settings());
    let staff_token = test_support::bearer_token(&instructor, ctx.state.settings());

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/exams/{}/attempts", exam.id),
            Some(&student_token),
            None,
        ))
        .await
        .expect("start attempt");
    let status = response.status();
    let started = test_support::read_json(response).await;
    assert_eq!(status, StatusCode::CREATED, "response: {started}");
    let attempt_id = started["id"].as_str().expect("attempt id").to_string();

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/exams/{}/attempts", exam.id),
            Some(&student_token),
            None,
        ))
        .await
        .expect("resume attempt");
    assert_eq!(response.status(), StatusCode::OK);
    let resumed = test_support::read_json(response).await;
    assert_eq!(resumed["id"], attempt_id);
    assert_eq!(resumed["resumed"], true);

    for (question_id, answer) in [(&choice.id, "B"), (&essay.id, "Mitosis splits the nucleus.")] {
        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(
                Method::PUT,
                &format!("/api/v1/attempts/{attempt_id}/answers/{question_id}"),
                Some(&student_token),
                Some(json!({ "answer": answer })),
            ))
            .await
            .expect("record answer");
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/attempts/{attempt_id}/submit"),
            Some(&student_token),
            None,
        ))
        .await
        .expect("submit attempt");
    let status = response.status();
    let submitted = test_support::read_json(response).await;
    assert_eq!(status, StatusCode::OK, "response: {submitted}");
    assert_eq!(submitted["status"], "submitted");
    assert!(submitted.get("score").is_none(), "score withheld until fully graded");

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::GET,
            &format!("/api/v1/attempts/{attempt_id}/answers"),
            Some(&staff_token),
            None,
        ))
        .await
        .expect("list answers");
    let answers = test_support::read_json(response).await;
    let essay_answer = answers
        .as_array()
        .expect("answers")
        .iter()
        .find(|answer| answer["question_id"] == essay.id.as_str())
        .expect("essay answer");
    let choice_answer = answers
        .as_array()
        .expect("answers")
        .iter()
        .find(|answer| answer["question_id"] == choice.id.as_str())
        .expect("choice answer");
    assert_eq!(choice_answer["grading"]["score"], 10.0);
    assert_eq!(choice_answer["grading"]["auto_graded"], true);
    let essay_answer_id = essay_answer["id"].as_str().expect("answer id").to_string();

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/answers/{essay_answer_id}/grade"),
            Some(&staff_token),
            Some(json!({ "score": 11.0 })),
        ))
        .await
        .expect("over-max grade");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/answers/{essay_answer_id}/grade"),
            Some(&staff_token),
            Some(json!({ "score": 7.0, "feedback": "Good, but incomplete." })),
        ))
        .await
        .expect("manual grade");
    let status = response.status();
    let graded = test_support::read_json(response).await;
    assert_eq!(status, StatusCode::OK, "response: {graded}");
    assert_eq!(graded["status"], "graded");
    assert_eq!(graded["score"], 17.0);
    assert_eq!(graded["max_score"], 20.0);
    assert_eq!(graded["pending_answers"], 0);

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::GET,
            &format!("/api/v1/attempts/{attempt_id}/result"),
            Some(&student_token),
            None,
        ))
        .await
        .expect("result");
    let result = test_support::read_json(response).await;
    assert_eq!(result["score"], 17.0);
    assert_eq!(result["percentage"], 85.0);
    assert_eq!(result["passed"], true);
    assert_eq!(result["review_available"], true);
    assert_eq!(result["questions"].as_array().map(Vec::len), Some(2));

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/attempts/{attempt_id}/review"),
            Some(&staff_token),
            None,
        ))
        .await
        .expect("review");
    let reviewed = test_support::read_json(response).await;
    assert_eq!(reviewed["status"], "reviewed");

    let response = ctx
        .app
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/exams/{}/attempts", exam.id),
            Some(&student_token),
            None,
        ))
        .await
        .expect("second attempt");
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
#[ignore = "requires PostgreSQL and Redis"]
async fn later_answer_overwrites_earlier_one_until_submit() {
    let ctx = test_support::setup_test_context().await;
    let db = ctx.state.db();
    let instructor = test_support::insert_user(db, "teacher1", UserRole::Instructor).await;
    let student = test_support::insert_user(db, "student1", UserRole::Student).await;

    let exam = test_support::insert_exam(db, &instructor.id, "Quiz").await;
    let choice = test_support::insert_question(
        db,
        &exam.id,
        QuestionType::MultipleChoice,
        &["A", "B", "C"],
        Some("C"),
        5.0,
    )
    .await;
    test_support::activate_exam(db, &exam.id).await;

    let token = test_support::bearer_token(&student, ctx.state.settings());
    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/exams/{}/attempts", exam.id),
            Some(&token),
            None,
        ))
        .await
        .expect("start attempt");
    let started = test_support::read_json(response).await;
    let attempt_id = started["id"].as_str().expect("attempt id").to_string();
    let answer_uri = format!("/api/v1/attempts/{attempt_id}/answers/{}", choice.id);

    for answer in ["A", "B"] {
        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(
                Method::PUT,
                &answer_uri,
                Some(&token),
                Some(json!({ "answer": answer })),
            ))
            .await
            .expect("record answer");
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::GET,
            &format!("/api/v1/attempts/{attempt_id}/answers"),
            Some(&token),
            None,
        ))
        .await
        .expect("list answers");
    assert_eq!(response.status(), StatusCode::OK);
    let answers = test_support::read_json(response).await;
    let recorded: Vec<_> = answers
        .as_array()
        .expect("answers")
        .iter()
        .filter(|answer| answer["question_id"] == choice.id.as_str())
        .collect();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0]["answer"], "B");

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/attempts/{attempt_id}/submit"),
            Some(&token),
            None,
        ))
        .await
        .expect("submit attempt");
    assert_eq!(response.status(), StatusCode::OK);

    let response = ctx
        .app
        .oneshot(test_support::json_request(
            Method::PUT,
            &answer_uri,
            Some(&token),
            Some(json!({ "answer": "C" })),
        ))
        .await
        .expect("answer after submit");
    let status = response.status();
    let body = test_support::read_json(response).await;
    assert_eq!(status, StatusCode::CONFLICT, "response: {body}");
    assert!(body["detail"].as_str().unwrap_or_default().contains("closed"));
}

#[tokio::test]
#[ignore = "requires PostgreSQL and Redis"]
async fn concurrent_submits_close_the_attempt_once() {
    let ctx = test_support::setup_test_context().await;
    let db = ctx.state.db();
    let instructor = test_support::insert_user(db, "teacher1", UserRole::Instructor).await;
    let student = test_support::insert_user(db, "student1", UserRole::Student).await;

    let exam = test_support::insert_exam(db, &instructor.id, "Quiz").await;
    test_support::insert_question(
        db,
        &exam.id,
        QuestionType::TrueFalse,
        &["true", "false"],
        Some("true"),
        5.0,
    )
    .await;
    test_support::activate_exam(db, &exam.id).await;

    let token = test_support::bearer_token(&student, ctx.state.settings());
    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/exams/{}/attempts", exam.id),
            Some(&token),
            None,
        ))
        .await
        .expect("start attempt");
    let started = test_support::read_json(response).await;
    let attempt_id = started["id"].as_str().expect("attempt id").to_string();

    let uri = format!("/api/v1/attempts/{attempt_id}/submit");
    let first = ctx.app.clone().oneshot(test_support::json_request(
        Method::POST,
        &uri,
        Some(&token),
        None,
    ));
    let second = ctx.app.clone().oneshot(test_support::json_request(
        Method::POST,
        &uri,
        Some(&token),
        None,
    ));
    let (first, second) = tokio::join!(first, second);

    let mut statuses = [first.expect("first").status(), second.expect("second").status()];
    statuses.sort();
    assert_eq!(statuses, [StatusCode::OK, StatusCode::CONFLICT]);

    let submitted: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM attempts WHERE id = $1 AND submitted_at IS NOT NULL")
            .bind(&attempt_id)
            .fetch_one(db)
            .await
            .expect("count");
    assert_eq!(submitted, 1);
}
