//! Application-wide error types.

use thiserror::Error;

use crate::tasks::TaskError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    #[error("task error: {0}")]
    Task(#[from] TaskError),

    #[error("llm error: {0}")]
    Llm(String),

    #[error("comms error: {0}")]
    Comms(String),

    #[error("tool error: {0}")]
    Tool(String),

    #[error("watcher error: {0}")]
    Watcher(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn config_error_display() {
        let e = AppError::Config("missing field".into());
        assert!(e.to_string().contains("config error"));
        assert!(e.to_string().contains("missing field"));
    }

    #[test]
    fn logger_error_display() {
        let e = AppError::Logger("already initialized".into());
        assert!(e.to_string().contains("already initialized"));
    }

    #[test]
    fn task_error_converts() {
        let e: AppError = TaskError::NotFound("TASK-0001".into()).into();
        assert!(e.to_string().contains("task error"));
        assert!(e.to_string().contains("TASK-0001"));
    }

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let e: AppError = io_err.into();
        assert!(e.to_string().contains("io error"));
        let _: &dyn Error = &e;
    }
}
