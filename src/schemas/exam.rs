use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use time::{
    format_description::well_known::Rfc3339, macros::format_description, OffsetDateTime,
    PrimitiveDateTime,
};
use validator::Validate;

use crate::core::time::format_primitive;
use crate::db::models::Exam;
use crate::db::types::ExamStatus;
use crate::schemas::question::{QuestionResponse, StudentQuestionResponse};

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct ExamCreate {
    #[validate(length(min = 1, max = 200, message = "title must be 1-200 characters"))]
    pub(crate) title: String,
    #[serde(default)]
    pub(crate) description: Option<String>,
    #[serde(default)]
    #[validate(length(max = 100))]
    pub(crate) subject: Option<String>,
    #[serde(default)]
    pub(crate) instructions: Option<String>,
    #[serde(default)]
    #[serde(alias = "timeLimit", alias = "time_limit")]
    #[validate(range(min = 1, message = "time_limit_minutes must be positive"))]
    pub(crate) time_limit_minutes: Option<i32>,
    #[serde(default)]
    #[serde(alias = "passingScore")]
    #[validate(range(min = 0.0, max = 100.0, message = "passing_score must be within 0-100"))]
    pub(crate) passing_score: Option<f64>,
    #[serde(default = "default_max_attempts")]
    #[serde(alias = "maxAttempts")]
    #[validate(range(min = 1, message = "max_attempts must be positive"))]
    pub(crate) max_attempts: i32,
    #[serde(default)]
    #[serde(alias = "randomizeQuestions")]
    pub(crate) randomize_questions: bool,
    #[serde(default)]
    #[serde(alias = "randomizeOptions")]
    pub(crate) randomize_options: bool,
    #[serde(default = "default_true")]
    #[serde(alias = "showResults")]
    pub(crate) show_results: bool,
    #[serde(default = "default_true")]
    #[serde(alias = "allowReview")]
    pub(crate) allow_review: bool,
    #[serde(
        default,
        alias = "availabilityStart",
        alias = "start_date",
        deserialize_with = "deserialize_option_offset_datetime_flexible"
    )]
    pub(crate) availability_start: Option<OffsetDateTime>,
    #[serde(
        default,
        alias = "availabilityEnd",
        alias = "end_date",
        deserialize_with = "deserialize_option_offset_datetime_flexible"
    )]
    pub(crate) availability_end: Option<OffsetDateTime>,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct ExamUpdate {
    #[serde(default)]
    #[validate(length(min = 1, max = 200, message = "title must be 1-200 characters"))]
    pub(crate) title: Option<String>,
    #[serde(default)]
    pub(crate) description: Option<String>,
    #[serde(default)]
    #[validate(length(max = 100))]
    pub(crate) subject: Option<String>,
    #[serde(default)]
    pub(crate) instructions: Option<String>,
    #[serde(default)]
    #[serde(alias = "timeLimit", alias = "time_limit")]
    #[validate(range(min = 1, message = "time_limit_minutes must be positive"))]
    pub(crate) time_limit_minutes: Option<i32>,
    #[serde(default)]
    #[serde(alias = "passingScore")]
    #[validate(range(min = 0.0, max = 100.0, message = "passing_score must be within 0-100"))]
    pub(crate) passing_score: Option<f64>,
    #[serde(default)]
    #[serde(alias = "maxAttempts")]
    #[validate(range(min = 1, message = "max_attempts must be positive"))]
    pub(crate) max_attempts: Option<i32>,
    #[serde(default)]
    #[serde(alias = "randomizeQuestions")]
    pub(crate) randomize_questions: Option<bool>,
    #[serde(default)]
    #[serde(alias = "randomizeOptions")]
    pub(crate) randomize_options: Option<bool>,
    #[serde(default)]
    #[serde(alias = "showResults")]
    pub(crate) show_results: Option<bool>,
    #[serde(default)]
    #[serde(alias = "allowReview")]
    pub(crate) allow_review: Option<bool>,
    #[serde(
        default,
        alias = "availabilityStart",
        deserialize_with = "deserialize_option_offset_datetime_flexible"
    )]
    pub(crate) availability_start: Option<OffsetDateTime>,
    #[serde(
        default,
        alias = "availabilityEnd",
        deserialize_with = "deserialize_option_offset_datetime_flexible"
    )]
    pub(crate) availability_end: Option<OffsetDateTime>,
    /// Removes both window bounds. Cannot be combined with new bounds.
    #[serde(default, alias = "clearAvailability")]
    pub(crate) clear_availability: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ExamStatusUpdate {
    pub(crate) status: ExamStatus,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ExamListQuery {
    #[serde(default)]
    pub(crate) skip: i64,
    #[serde(default)]
    pub(crate) limit: Option<i64>,
    #[serde(default)]
    pub(crate) status: Option<ExamStatus>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ExamResponse {
    pub(crate) id: String,
    pub(crate) title: String,
    pub(crate) description: Option<String>,
    pub(crate) subject: Option<String>,
    pub(crate) instructions: Option<String>,
    pub(crate) instructor_id: String,
    pub(crate) time_limit_minutes: Option<i32>,
    pub(crate) total_points: f64,
    pub(crate) passing_score: f64,
    pub(crate) max_attempts: i32,
    pub(crate) status: ExamStatus,
    pub(crate) randomize_questions: bool,
    pub(crate) randomize_options: bool,
    pub(crate) show_results: bool,
    pub(crate) allow_review: bool,
    pub(crate) availability_start: Option<String>,
    pub(crate) availability_end: Option<String>,
    pub(crate) created_at: String,
    pub(crate) updated_at: String,
}

impl From<Exam> for ExamResponse {
    fn from(exam: Exam) -> Self {
        Self {
            id: exam.id,
            title: exam.title,
            description: exam.description,
            subject: exam.subject,
            instructions: exam.instructions,
            instructor_id: exam.instructor_id,
            time_limit_minutes: exam.time_limit_minutes,
            total_points: exam.total_points,
            passing_score: exam.passing_score,
            max_attempts: exam.max_attempts,
            status: exam.status,
            randomize_questions: exam.randomize_questions,
            randomize_options: exam.randomize_options,
            show_results: exam.show_results,
            allow_review: exam.allow_review,
            availability_start: exam.availability_start.map(format_primitive),
            availability_end: exam.availability_end.map(format_primitive),
            created_at: format_primitive(exam.created_at),
            updated_at: format_primitive(exam.updated_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ExamDetailResponse {
    #[serde(flatten)]
    pub(crate) exam: ExamResponse,
    pub(crate) question_count: usize,
    pub(crate) questions: ExamQuestions,
}

/// Managers get the answer keys, everyone else the student view.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub(crate) enum ExamQuestions {
    Authoring(Vec<QuestionResponse>),
    Student(Vec<StudentQuestionResponse>),
}

fn default_max_attempts() -> i32 {
    1
}

fn default_true() -> bool {
    true
}

fn parse_offset_datetime_flexible(raw: &str) -> Option<OffsetDateTime> {
    if let Ok(value) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Some(value);
    }

    // datetime-local inputs arrive without an offset; treat them as UTC.
    if raw.len() == 19 && raw.as_bytes().get(10) == Some(&b'T') {
        if let Ok(value) = OffsetDateTime::parse(&format!("{raw}Z"), &Rfc3339) {
            return Some(value);
        }
    }

    if let Ok(value) =
        PrimitiveDateTime::parse(raw, &format_description!("[year]-[month]-[day]T[hour]:[minute]"))
    {
        return Some(value.assume_utc());
    }

    None
}

fn deserialize_option_offset_datetime_flexible<'de, D>(
    deserializer: D,
) -> Result<Option<OffsetDateTime>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw {
        Some(value) => parse_offset_datetime_flexible(&value)
            .ok_or_else(|| D::Error::custom(format!("invalid datetime: {value}")))
            .map(Some),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exam_create_defaults_match_display_policy() {
        let payload: ExamCreate = serde_json::from_value(serde_json::json!({
            "title": "Cell biology quiz"
        }))
        .unwrap();
        assert!(payload.show_results);
        assert!(payload.allow_review);
        assert_eq!(payload.max_attempts, 1);
        assert_eq!(payload.passing_score, None);
        assert!(payload.validate().is_ok());
    }

    #[test]
    fn accepts_datetime_without_offset() {
        let payload: ExamCreate = serde_json::from_value(serde_json::json!({
            "title": "Quiz",
            "availabilityStart": "2025-03-01T09:30",
            "availability_end": "2025-03-01T11:00:00Z"
        }))
        .unwrap();
        let start = payload.availability_start.unwrap();
        assert_eq!(start.hour(), 9);
        assert_eq!(start.minute(), 30);
        assert!(payload.availability_end.is_some());
    }

    #[test]
    fn exam_update_keeps_window_unless_cleared() {
        let payload: ExamUpdate =
            serde_json::from_value(serde_json::json!({ "title": "Quiz" })).unwrap();
        assert!(!payload.clear_availability);
        assert!(payload.availability_start.is_none());

        let payload: ExamUpdate =
            serde_json::from_value(serde_json::json!({ "clearAvailability": true })).unwrap();
        assert!(payload.clear_availability);
    }

    #[test]
    fn passing_score_out_of_range_is_invalid() {
        let payload: ExamCreate = serde_json::from_value(serde_json::json!({
            "title": "Quiz",
            "passing_score": 120.0
        }))
        .unwrap();
        assert!(payload.validate().is_err());
    }
}
