//! API middleware components

pub mod admin_auth;
pub mod conditional;
pub mod identity;
pub mod logging;
pub mod metrics;
pub mod problem;
pub mod rate_limit;

pub use admin_auth::RequireAdmin;
pub use conditional::{conditional_request_middleware, X_CACHE};
pub use identity::resolve_identity;
pub use logging::logging_middleware;
pub use metrics::metrics_middleware;
pub use problem::{problem_context_middleware, REQUEST_ID_HEADER};
pub use rate_limit::rate_limit_middleware;
