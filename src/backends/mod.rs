//! Remote orchestration backends
//!
//! Each backend is a thin client over an AWS JSON-protocol service. The
//! traits below are the seams the runner and the notifier depend on.

pub mod client;
pub mod credentials;
pub mod sagemaker;
pub mod sigv4;
pub mod ssm;
pub mod stepfunctions;

use crate::error::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;

/// Pipeline execution status as reported by SageMaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ExecutionStatus {
    Executing,
    Stopping,
    Stopped,
    Failed,
    Succeeded,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Stopped | ExecutionStatus::Failed | ExecutionStatus::Succeeded
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Executing => write!(f, "Executing"),
            ExecutionStatus::Stopping => write!(f, "Stopping"),
            ExecutionStatus::Stopped => write!(f, "Stopped"),
            ExecutionStatus::Failed => write!(f, "Failed"),
            ExecutionStatus::Succeeded => write!(f, "Succeeded"),
        }
    }
}

/// Snapshot of one pipeline execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineExecution {
    pub arn: String,
    pub status: ExecutionStatus,
    pub failure_reason: Option<String>,
}

/// Status of one step within a pipeline execution
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StepExecution {
    pub step_name: String,
    pub step_status: String,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

/// SageMaker Pipelines operations used by the runner
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PipelineBackend: Send + Sync {
    /// Create the pipeline, or update its definition if it already exists.
    /// Returns the pipeline ARN.
    async fn upsert_pipeline(&self, name: &str, definition: &str, role_arn: &str)
        -> Result<String>;

    /// Start an execution with default parameters; returns the execution ARN
    async fn start_pipeline_execution(&self, name: &str) -> Result<String>;

    async fn describe_pipeline_execution(&self, execution_arn: &str) -> Result<PipelineExecution>;

    /// Steps in the order the service reports them
    async fn list_pipeline_execution_steps(&self, execution_arn: &str)
        -> Result<Vec<StepExecution>>;
}

/// Step Functions operations used by the runner
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WorkflowBackend: Send + Sync {
    /// Create the state machine; an existing machine with the same name is
    /// reused. Returns the state machine ARN.
    async fn create_state_machine(
        &self,
        name: &str,
        definition: &str,
        role_arn: &str,
    ) -> Result<String>;

    /// Start an execution with a JSON input; returns the execution ARN
    async fn start_execution(&self, state_machine_arn: &str, input: &str) -> Result<String>;
}

/// Key-value parameter store written by the notifier
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ParameterStore: Send + Sync {
    /// Write a String parameter; returns the new parameter version
    async fn put_parameter(&self, name: &str, value: &str, overwrite: bool) -> Result<i64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(ExecutionStatus::Succeeded.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::Stopped.is_terminal());
        assert!(!ExecutionStatus::Executing.is_terminal());
        assert!(!ExecutionStatus::Stopping.is_terminal());
    }

    #[test]
    fn test_status_deserialize() {
        let status: ExecutionStatus = serde_json::from_str(r#""Succeeded""#).unwrap();
        assert_eq!(status, ExecutionStatus::Succeeded);
        assert_eq!(status.to_string(), "Succeeded");
    }
}
