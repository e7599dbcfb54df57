use serde::{Deserialize, Serialize};
use sqlx::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "userrole", rename_all = "lowercase")]
pub(crate) enum UserRole {
    Admin,
    Instructor,
    Student,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "examstatus", rename_all = "lowercase")]
pub(crate) enum ExamStatus {
    Draft,
    Active,
    Closed,
    Archived,
}

impl ExamStatus {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            ExamStatus::Draft => "draft",
            ExamStatus::Active => "active",
            ExamStatus::Closed => "closed",
            ExamStatus::Archived => "archived",
        }
    }

    /// Allowed lifecycle moves. Archived is terminal.
    pub(crate) fn can_transition_to(self, next: ExamStatus) -> bool {
        use ExamStatus::*;
        matches!(
            (self, next),
            (Draft, Active) | (Draft, Archived) | (Active, Closed) | (Closed, Active) | (Closed, Archived)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "questiontype", rename_all = "snake_case")]
pub(crate) enum QuestionType {
    MultipleChoice,
    TrueFalse,
    ShortAnswer,
    Essay,
}

impl QuestionType {
    pub(crate) fn is_auto_gradable(self) -> bool {
        match self {
            QuestionType::MultipleChoice | QuestionType::TrueFalse => true,
            QuestionType::ShortAnswer | QuestionType::Essay => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "attemptstatus", rename_all = "snake_case")]
pub(crate) enum AttemptStatus {
    InProgress,
    Submitted,
    Graded,
    Reviewed,
}

impl AttemptStatus {
    fn rank(self) -> u8 {
        match self {
            AttemptStatus::InProgress => 0,
            AttemptStatus::Submitted => 1,
            AttemptStatus::Graded => 2,
            AttemptStatus::Reviewed => 3,
        }
    }

    /// Status only ever moves forward; staying put is allowed.
    pub(crate) fn can_advance_to(self, next: AttemptStatus) -> bool {
        next.rank() >= self.rank()
    }

    /// True once every answer has a final score.
    pub(crate) fn is_fully_graded(self) -> bool {
        matches!(self, AttemptStatus::Graded | AttemptStatus::Reviewed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exam_status_transitions() {
        assert!(ExamStatus::Draft.can_transition_to(ExamStatus::Active));
        assert!(ExamStatus::Closed.can_transition_to(ExamStatus::Active));
        assert!(!ExamStatus::Active.can_transition_to(ExamStatus::Draft));
        assert!(!ExamStatus::Archived.can_transition_to(ExamStatus::Active));
        assert!(!ExamStatus::Active.can_transition_to(ExamStatus::Active));
    }

    #[test]
    fn attempt_status_only_moves_forward() {
        assert!(AttemptStatus::InProgress.can_advance_to(AttemptStatus::Submitted));
        assert!(AttemptStatus::Submitted.can_advance_to(AttemptStatus::Graded));
        assert!(AttemptStatus::Graded.can_advance_to(AttemptStatus::Graded));
        assert!(!AttemptStatus::Graded.can_advance_to(AttemptStatus::Submitted));
        assert!(!AttemptStatus::Reviewed.can_advance_to(AttemptStatus::InProgress));
    }

    #[test]
    fn question_type_serialises_snake_case() {
        let value = serde_json::to_value(QuestionType::MultipleChoice).unwrap();
        assert_eq!(value, "multiple_choice");
        let parsed: QuestionType = serde_json::from_value("true_false".into()).unwrap();
        assert_eq!(parsed, QuestionType::TrueFalse);
        assert!(parsed.is_auto_gradable());
        assert!(!QuestionType::Essay.is_auto_gradable());
    }
}
