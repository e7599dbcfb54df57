pub(crate) mod access;
pub(crate) mod attempt_tracker;
pub(crate) mod errors;
pub(crate) mod grading;
pub(crate) mod question_bank;
pub(crate) mod randomization;
pub(crate) mod result_reporter;
