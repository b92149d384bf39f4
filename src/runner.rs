//! Submission and tracking of built graphs on their backends

use crate::backends::{
    ExecutionStatus, PipelineBackend, PipelineExecution, StepExecution, WorkflowBackend,
};
use crate::config::Settings;
use crate::error::{SagePipeError, Result};
use crate::pipeline::Pipeline;
use crate::workflow::{ExecutionInputs, Workflow};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument};

/// Polling policy for pipeline executions
#[derive(Debug, Clone, Copy)]
pub struct WaiterConfig {
    pub delay: Duration,
    pub max_attempts: u32,
}

impl WaiterConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            delay: Duration::from_secs(settings.poll_delay_secs),
            max_attempts: settings.max_attempts,
        }
    }
}

/// Started pipeline execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineStart {
    pub pipeline_arn: String,
    pub execution_arn: String,
}

/// Finished pipeline execution with per-step outcomes
#[derive(Debug, Clone)]
pub struct PipelineRunReport {
    pub pipeline_arn: String,
    pub execution: PipelineExecution,
    pub steps: Vec<StepExecution>,
}

impl PipelineRunReport {
    pub fn succeeded(&self) -> bool {
        self.execution.status == ExecutionStatus::Succeeded
    }
}

/// Submitted workflow execution
#[derive(Debug, Clone)]
pub struct WorkflowSubmission {
    pub state_machine_arn: String,
    pub execution_arn: String,
    pub inputs: ExecutionInputs,
}

/// Upsert the pipeline definition and start one execution
#[instrument(skip_all, fields(pipeline = pipeline.name()))]
pub async fn start_pipeline(
    backend: &dyn PipelineBackend,
    pipeline: &Pipeline,
    role_arn: &str,
) -> Result<PipelineStart> {
    let definition = pipeline.definition_string()?;
    let pipeline_arn = backend
        .upsert_pipeline(pipeline.name(), &definition, role_arn)
        .await?;
    info!("Pipeline '{}' registered as {}", pipeline.name(), pipeline_arn);

    let execution_arn = backend.start_pipeline_execution(pipeline.name()).await?;
    info!("Started pipeline execution {}", execution_arn);

    Ok(PipelineStart {
        pipeline_arn,
        execution_arn,
    })
}

/// Poll until the execution reaches a terminal status
#[instrument(skip(backend, waiter))]
pub async fn wait_for_execution(
    backend: &dyn PipelineBackend,
    execution_arn: &str,
    waiter: &WaiterConfig,
) -> Result<PipelineExecution> {
    // The execution is already running; check it at least once
    let max_attempts = waiter.max_attempts.max(1);
    for attempt in 1..=max_attempts {
        let execution = backend.describe_pipeline_execution(execution_arn).await?;
        debug!(
            "Execution {} is {} (check {}/{})",
            execution_arn, execution.status, attempt, max_attempts
        );
        if execution.status.is_terminal() {
            return Ok(execution);
        }
        if attempt < max_attempts {
            sleep(waiter.delay).await;
        }
    }

    Err(SagePipeError::WaiterExhausted {
        arn: execution_arn.to_string(),
        attempts: max_attempts,
    })
}

/// Upsert, start, wait for completion and collect step outcomes
#[instrument(skip_all, fields(pipeline = pipeline.name()))]
pub async fn run_pipeline(
    backend: &dyn PipelineBackend,
    pipeline: &Pipeline,
    role_arn: &str,
    waiter: &WaiterConfig,
) -> Result<PipelineRunReport> {
    let started = start_pipeline(backend, pipeline, role_arn).await?;
    let execution = wait_for_execution(backend, &started.execution_arn, waiter).await?;
    let steps = backend
        .list_pipeline_execution_steps(&started.execution_arn)
        .await?;

    if execution.status == ExecutionStatus::Succeeded {
        info!(
            "Pipeline execution {} succeeded ({} steps)",
            execution.arn,
            steps.len()
        );
    } else {
        error!(
            "Pipeline execution {} finished as {}: {}",
            execution.arn,
            execution.status,
            execution.failure_reason.as_deref().unwrap_or("no reason given")
        );
    }

    Ok(PipelineRunReport {
        pipeline_arn: started.pipeline_arn,
        execution,
        steps,
    })
}

/// Create (or reuse) the state machine for `workflow`
#[instrument(skip_all, fields(workflow = workflow.name()))]
pub async fn create_state_machine(
    backend: &dyn WorkflowBackend,
    workflow: &Workflow,
) -> Result<String> {
    let definition = workflow.definition_string()?;
    let arn = backend
        .create_state_machine(workflow.name(), &definition, workflow.role_arn())
        .await?;
    info!("Workflow '{}' available as {}", workflow.name(), arn);
    Ok(arn)
}

/// Validate `inputs` and start one execution of an existing state machine
#[instrument(skip(backend, workflow, inputs))]
pub async fn execute_workflow(
    backend: &dyn WorkflowBackend,
    workflow: &Workflow,
    state_machine_arn: &str,
    inputs: &ExecutionInputs,
) -> Result<String> {
    workflow.execution_input().validate(inputs)?;
    let execution_arn = backend
        .start_execution(state_machine_arn, &inputs.to_json_string()?)
        .await?;
    info!("Started workflow execution {}", execution_arn);
    Ok(execution_arn)
}

/// Validate inputs, create the state machine and start an execution.
///
/// Inputs are validated before anything is created.
#[instrument(skip_all, fields(workflow = workflow.name()))]
pub async fn submit_workflow(
    backend: &dyn WorkflowBackend,
    workflow: &Workflow,
    inputs: ExecutionInputs,
) -> Result<WorkflowSubmission> {
    workflow.execution_input().validate(&inputs)?;
    let state_machine_arn = create_state_machine(backend, workflow).await?;
    let execution_arn = execute_workflow(backend, workflow, &state_machine_arn, &inputs).await?;

    Ok(WorkflowSubmission {
        state_machine_arn,
        execution_arn,
        inputs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{MockPipelineBackend, MockWorkflowBackend};
    use crate::pipeline::create_pipeline;
    use crate::workflow::{create_workflow, MODEL_NAME};
    use mockall::predicate::eq;
    use mockall::Sequence;
    use std::collections::HashMap;
    use std::path::Path;

    const EXECUTION_ARN: &str =
        "arn:aws:sagemaker:ap-southeast-1:123456789012:pipeline/p/execution/abc";

    fn settings() -> Settings {
        let env: HashMap<String, String> = [
            ("SAGEMAKER_ROLE", "arn:aws:iam::123456789012:role/SageMakerRole"),
            ("WORKFLOW_ROLE", "arn:aws:iam::123456789012:role/StepFunctionsRole"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Settings::load_with_env(Some(Path::new("/nonexistent/config.json")), env).unwrap()
    }

    fn waiter(max_attempts: u32) -> WaiterConfig {
        WaiterConfig {
            delay: Duration::ZERO,
            max_attempts,
        }
    }

    fn execution(status: ExecutionStatus) -> PipelineExecution {
        PipelineExecution {
            arn: EXECUTION_ARN.to_string(),
            status,
            failure_reason: None,
        }
    }

    #[tokio::test]
    async fn test_run_pipeline_polls_until_terminal() {
        let settings = settings();
        let pipeline = create_pipeline(&settings).unwrap();
        let definition = pipeline.definition_string().unwrap();

        let mut backend = MockPipelineBackend::new();
        let mut seq = Sequence::new();
        backend
            .expect_upsert_pipeline()
            .withf(move |name, def, _| name == "AbalonePipelineTestPrintName" && def == definition)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok("arn:pipeline".to_string()));
        backend
            .expect_start_pipeline_execution()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(EXECUTION_ARN.to_string()));
        backend
            .expect_describe_pipeline_execution()
            .with(eq(EXECUTION_ARN))
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_| Ok(execution(ExecutionStatus::Executing)));
        backend
            .expect_describe_pipeline_execution()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(execution(ExecutionStatus::Succeeded)));
        backend
            .expect_list_pipeline_execution_steps()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Ok(vec![StepExecution {
                    step_name: "AbaloneProcess".to_string(),
                    step_status: "Succeeded".to_string(),
                    failure_reason: None,
                }])
            });

        let report = run_pipeline(
            &backend,
            &pipeline,
            settings.sagemaker_role().unwrap(),
            &waiter(5),
        )
        .await
        .unwrap();

        assert!(report.succeeded());
        assert_eq!(report.pipeline_arn, "arn:pipeline");
        assert_eq!(report.steps.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_execution_is_reported() {
        let settings = settings();
        let pipeline = create_pipeline(&settings).unwrap();

        let mut backend = MockPipelineBackend::new();
        backend
            .expect_upsert_pipeline()
            .returning(|_, _, _| Ok("arn:pipeline".to_string()));
        backend
            .expect_start_pipeline_execution()
            .returning(|_| Ok(EXECUTION_ARN.to_string()));
        backend.expect_describe_pipeline_execution().returning(|_| {
            Ok(PipelineExecution {
                arn: EXECUTION_ARN.to_string(),
                status: ExecutionStatus::Failed,
                failure_reason: Some("Step AbaloneTrain failed".to_string()),
            })
        });
        backend
            .expect_list_pipeline_execution_steps()
            .returning(|_| Ok(vec![]));

        let report = run_pipeline(&backend, &pipeline, "role", &waiter(5))
            .await
            .unwrap();
        assert!(!report.succeeded());
        assert_eq!(report.execution.status, ExecutionStatus::Failed);
    }

    #[tokio::test]
    async fn test_waiter_exhausted() {
        let mut backend = MockPipelineBackend::new();
        backend
            .expect_describe_pipeline_execution()
            .times(3)
            .returning(|_| Ok(execution(ExecutionStatus::Executing)));

        let result = wait_for_execution(&backend, EXECUTION_ARN, &waiter(3)).await;
        assert!(matches!(
            result,
            Err(SagePipeError::WaiterExhausted { attempts: 3, .. })
        ));
    }

    #[tokio::test]
    async fn test_zero_attempts_still_checks_once() {
        let mut backend = MockPipelineBackend::new();
        backend
            .expect_describe_pipeline_execution()
            .times(1)
            .returning(|_| Ok(execution(ExecutionStatus::Succeeded)));

        let execution = wait_for_execution(&backend, EXECUTION_ARN, &waiter(0))
            .await
            .unwrap();
        assert_eq!(execution.status, ExecutionStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_upsert_failure_stops_run() {
        let settings = settings();
        let pipeline = create_pipeline(&settings).unwrap();

        let mut backend = MockPipelineBackend::new();
        backend.expect_upsert_pipeline().returning(|_, _, _| {
            Err(SagePipeError::Backend {
                service: "SageMaker",
                code: "AccessDeniedException".to_string(),
                message: "not authorized".to_string(),
            })
        });
        backend.expect_start_pipeline_execution().never();

        let result = start_pipeline(&backend, &pipeline, "role").await;
        assert_eq!(
            result.unwrap_err().backend_code(),
            Some("AccessDeniedException")
        );
    }

    #[tokio::test]
    async fn test_submit_workflow() {
        let settings = settings();
        let workflow = create_workflow(&settings).unwrap();
        let inputs = ExecutionInputs::generate(&settings);
        let model_name = inputs.get(MODEL_NAME).unwrap().to_string();

        let mut backend = MockWorkflowBackend::new();
        backend
            .expect_create_state_machine()
            .withf(|name, _, role| {
                name == "StepFunctionWorkFlow"
                    && role == "arn:aws:iam::123456789012:role/StepFunctionsRole"
            })
            .times(1)
            .returning(|_, _, _| Ok("arn:states:machine".to_string()));
        backend
            .expect_start_execution()
            .withf(move |arn, input| arn == "arn:states:machine" && input.contains(&model_name))
            .times(1)
            .returning(|_, _| Ok("arn:states:execution".to_string()));

        let submission = submit_workflow(&backend, &workflow, inputs).await.unwrap();
        assert_eq!(submission.state_machine_arn, "arn:states:machine");
        assert_eq!(submission.execution_arn, "arn:states:execution");
    }

    #[tokio::test]
    async fn test_invalid_inputs_create_nothing() {
        let settings = settings();
        let workflow = create_workflow(&settings).unwrap();

        let mut backend = MockWorkflowBackend::new();
        backend.expect_create_state_machine().never();
        backend.expect_start_execution().never();

        let result = submit_workflow(&backend, &workflow, ExecutionInputs::default()).await;
        assert!(matches!(
            result,
            Err(SagePipeError::MissingExecutionInput(_))
        ));
    }
}
