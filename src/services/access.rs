use crate::core::security::Principal;
use crate::db::models::Exam;
use crate::db::types::{ExamStatus, UserRole};
use crate::services::errors::LmsError;

/// Admins manage every exam; instructors only the ones they own.
pub(crate) fn can_manage_exam(principal: &Principal, exam: &Exam) -> bool {
    match principal.role {
        UserRole::Admin => true,
        UserRole::Instructor => exam.instructor_id == principal.id,
        UserRole::Student => false,
    }
}

pub(crate) fn ensure_exam_manager(principal: &Principal, exam: &Exam) -> Result<(), LmsError> {
    if can_manage_exam(principal, exam) {
        Ok(())
    } else {
        Err(LmsError::Forbidden("Not enough permissions for this exam"))
    }
}

/// Students only ever see active exams.
pub(crate) fn can_view_exam(principal: &Principal, exam: &Exam) -> bool {
    can_manage_exam(principal, exam) || exam.status == ExamStatus::Active
}

#[cfg(test)]
pub(crate) mod fixtures {
    use time::macros::datetime;

    use crate::db::models::Exam;
    use crate::db::types::ExamStatus;

    pub(crate) fn exam(instructor_id: &str, status: ExamStatus) -> Exam {
        let now = datetime!(2025-01-02 10:00);
        Exam {
            id: "exam-1".to_string(),
            title: "Midterm".to_string(),
            description: None,
            subject: Some("Biology".to_string()),
            instructions: None,
            instructor_id: instructor_id.to_string(),
            time_limit_minutes: Some(60),
            total_points: 0.0,
            total_points_stale: false,
            passing_score: 70.0,
            max_attempts: 1,
            status,
            randomize_questions: false,
            randomize_options: false,
            show_results: true,
            allow_review: true,
            availability_start: None,
            availability_end: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(id: &str, role: UserRole) -> Principal {
        Principal { id: id.to_string(), role }
    }

    #[test]
    fn instructors_manage_only_their_exams() {
        let exam = fixtures::exam("teacher-1", ExamStatus::Draft);
        assert!(can_manage_exam(&principal("teacher-1", UserRole::Instructor), &exam));
        assert!(!can_manage_exam(&principal("teacher-2", UserRole::Instructor), &exam));
        assert!(can_manage_exam(&principal("root", UserRole::Admin), &exam));
        assert!(!can_manage_exam(&principal("teacher-1", UserRole::Student), &exam));
    }

    #[test]
    fn students_see_active_exams_only() {
        let student = principal("student-1", UserRole::Student);
        assert!(!can_view_exam(&student, &fixtures::exam("t", ExamStatus::Draft)));
        assert!(can_view_exam(&student, &fixtures::exam("t", ExamStatus::Active)));
        assert!(!can_view_exam(&student, &fixtures::exam("t", ExamStatus::Closed)));
    }
}
