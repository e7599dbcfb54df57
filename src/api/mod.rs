pub(crate) mod attempts;
pub(crate) mod auth;
pub(crate) mod comments;
pub(crate) mod errors;
pub(crate) mod exams;
pub(crate) mod guards;
pub(crate) mod handlers;
pub(crate) mod pagination;
pub(crate) mod questions;
pub(crate) mod router;
pub(crate) mod users;
pub(crate) mod validation;
