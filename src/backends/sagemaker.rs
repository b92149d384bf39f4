//! SageMaker Pipelines backend

use crate::backends::client::{AwsJsonClient, ServiceSpec};
use crate::backends::sigv4::Credentials;
use crate::backends::{ExecutionStatus, PipelineBackend, PipelineExecution, StepExecution};
use crate::config::Settings;
use crate::error::{SagePipeError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

pub const SERVICE: ServiceSpec = ServiceSpec {
    name: "SageMaker",
    signing_name: "sagemaker",
    target_prefix: "SageMaker",
    json_version: "1.1",
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PipelineArnResponse {
    pipeline_arn: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StartExecutionResponse {
    pipeline_execution_arn: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeExecutionResponse {
    pipeline_execution_arn: String,
    pipeline_execution_status: ExecutionStatus,
    #[serde(default)]
    failure_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListStepsResponse {
    #[serde(default)]
    pipeline_execution_steps: Vec<StepExecution>,
    #[serde(default)]
    next_token: Option<String>,
}

/// SageMaker API client
#[derive(Debug, Clone)]
pub struct SageMakerClient {
    client: AwsJsonClient,
}

impl SageMakerClient {
    pub fn new(settings: &Settings, credentials: Credentials) -> Result<Self> {
        Ok(Self {
            client: AwsJsonClient::new(
                SERVICE,
                &settings.region,
                settings.endpoint_url.as_deref(),
                credentials,
            )?,
        })
    }
}

/// CreatePipeline reports an existing pipeline as a validation error
fn is_already_exists(err: &SagePipeError) -> bool {
    match err {
        SagePipeError::Backend { code, message, .. } => {
            code == "ResourceInUse"
                || (code == "ValidationException" && message.contains("already exists"))
        }
        _ => false,
    }
}

#[async_trait]
impl PipelineBackend for SageMakerClient {
    async fn upsert_pipeline(
        &self,
        name: &str,
        definition: &str,
        role_arn: &str,
    ) -> Result<String> {
        let created: Result<PipelineArnResponse> = self
            .client
            .call(
                "CreatePipeline",
                &json!({
                    "PipelineName": name,
                    "PipelineDefinition": definition,
                    "RoleArn": role_arn,
                    "ClientRequestToken": Uuid::new_v4().to_string(),
                }),
            )
            .await;

        match created {
            Ok(response) => {
                info!("Created pipeline '{}'", name);
                Ok(response.pipeline_arn)
            }
            Err(err) if is_already_exists(&err) => {
                debug!("Pipeline '{}' exists, updating definition", name);
                let updated: PipelineArnResponse = self
                    .client
                    .call(
                        "UpdatePipeline",
                        &json!({
                            "PipelineName": name,
                            "PipelineDefinition": definition,
                            "RoleArn": role_arn,
                        }),
                    )
                    .await?;
                info!("Updated pipeline '{}'", name);
                Ok(updated.pipeline_arn)
            }
            Err(err) => Err(err),
        }
    }

    async fn start_pipeline_execution(&self, name: &str) -> Result<String> {
        let response: StartExecutionResponse = self
            .client
            .call(
                "StartPipelineExecution",
                &json!({
                    "PipelineName": name,
                    "ClientRequestToken": Uuid::new_v4().to_string(),
                }),
            )
            .await?;
        Ok(response.pipeline_execution_arn)
    }

    async fn describe_pipeline_execution(&self, execution_arn: &str) -> Result<PipelineExecution> {
        let response: DescribeExecutionResponse = self
            .client
            .call(
                "DescribePipelineExecution",
                &json!({ "PipelineExecutionArn": execution_arn }),
            )
            .await?;
        Ok(PipelineExecution {
            arn: response.pipeline_execution_arn,
            status: response.pipeline_execution_status,
            failure_reason: response.failure_reason,
        })
    }

    async fn list_pipeline_execution_steps(
        &self,
        execution_arn: &str,
    ) -> Result<Vec<StepExecution>> {
        let mut steps = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let mut body = json!({ "PipelineExecutionArn": execution_arn });
            if let Some(token) = &next_token {
                body["NextToken"] = json!(token);
            }

            let page: ListStepsResponse = self
                .client
                .call("ListPipelineExecutionSteps", &body)
                .await?;
            steps.extend(page.pipeline_execution_steps);

            match page.next_token {
                Some(token) if !token.is_empty() => next_token = Some(token),
                _ => break,
            }
        }

        Ok(steps)
    }
}
