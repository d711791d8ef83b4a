//! API request/response types

pub mod error;
pub mod json;

pub use error::{problem_response, ApiError, ProblemDetails, ProblemKind, PROBLEM_JSON};
pub use json::Json;
