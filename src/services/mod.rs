pub mod executor;
pub mod readiness;
pub mod rollback;
pub mod shell;
pub mod step_runner;
