// Conversion Executor Port
// Abstraction over the external conversion pool that runs dispatched jobs

use crate::domain::Job;
use async_trait::async_trait;
use thiserror::Error;

/// Result of a conversion
#[derive(Debug, Clone)]
pub struct ConversionOutcome {
    pub status: ExecutionStatus,
    pub duration_ms: i64,
    /// Output produced by the conversion, if any
    pub output_file: Option<String>,
    /// Size of the output in bytes
    pub output_size: Option<u64>,
}

/// Execution status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
    Success,
    Failed,
    Cancelled,
}

/// Execution errors
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Conversion failed: {0}")]
    Failed(String),

    #[error("Conversion timeout after {0}ms")]
    Timeout(i64),

    #[error("Unsupported input: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    IoError(String),
}

/// Conversion Executor trait
#[async_trait]
pub trait ConversionExecutor: Send + Sync {
    /// Run the conversion for a dispatched job
    ///
    /// # Errors
    /// - ExecutionError::Failed if the conversion could not be completed
    /// - ExecutionError::Timeout if execution exceeded its budget
    async fn convert(&self, job: &Job) -> Result<ConversionOutcome, ExecutionError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::{Arc, Mutex};
    /// Mock executor behavior
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Always succeed
        Success,
        /// Always fail with message
        Fail(String),
        /// Panic with message (for panic isolation testing)
        Panic(String),
    }
    /// Mock Conversion Executor for testing
    pub struct MockConversionExecutor {
        behavior: Arc<Mutex<MockBehavior>>,
        converted: Arc<Mutex<Vec<String>>>,
    }
    impl MockConversionExecutor {
        pub fn new(behavior: MockBehavior) -> Self {
            Self {
                behavior: Arc::new(Mutex::new(behavior)),
                converted: Arc::new(Mutex::new(Vec::new())),
            }
        }
        pub fn new_success() -> Self {
            Self::new(MockBehavior::Success)
        }
        pub fn new_fail(message: impl Into<String>) -> Self {
            Self::new(MockBehavior::Fail(message.into()))
        }
        pub fn new_panic_inducing(message: impl Into<String>) -> Self {
            Self::new(MockBehavior::Panic(message.into()))
        }
        /// Job ids in the order they were converted
        pub fn converted(&self) -> Vec<String> {
            self.converted.lock().unwrap().clone()
        }
    }
    #[async_trait]
    impl ConversionExecutor for MockConversionExecutor {
        async fn convert(&self, job: &Job) -> Result<ConversionOutcome, ExecutionError> {
            self.converted.lock().unwrap().push(job.id.clone());

            let behavior = self.behavior.lock().unwrap().clone();

            match behavior {
                MockBehavior::Success => Ok(ConversionOutcome {
                    status: ExecutionStatus::Success,
                    duration_ms: 100,
                    output_file: Some(format!("/out/{}.pdf", job.id)),
                    output_size: Some(2048),
                }),
                MockBehavior::Fail(msg) => Err(ExecutionError::Failed(msg)),
                MockBehavior::Panic(msg) => {
                    panic!("{}", msg); // Actually panic for panic isolation testing
                }
            }
        }
    }
}
