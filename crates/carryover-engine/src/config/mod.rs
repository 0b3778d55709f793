//! Job configuration: YAML model, parsing, and validation.

pub mod parser;
pub mod types;
pub mod validator;

pub use parser::{parse_job, parse_job_str, substitute_env_vars};
pub use types::JobConfig;
pub use validator::validate_job;
