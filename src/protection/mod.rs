pub mod capture;
pub mod dispatcher;
pub mod pipeline;
pub mod rate_limiter;
pub mod secure_response;
pub mod telemetry;
pub mod user_agent;
