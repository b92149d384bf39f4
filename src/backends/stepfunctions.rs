//! Step Functions backend

use crate::backends::client::{AwsJsonClient, ServiceSpec};
use crate::backends::sigv4::Credentials;
use crate::backends::WorkflowBackend;
use crate::config::Settings;
use crate::error::{SagePipeError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

pub const SERVICE: ServiceSpec = ServiceSpec {
    name: "StepFunctions",
    signing_name: "states",
    target_prefix: "AWSStepFunctions",
    json_version: "1.0",
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateStateMachineResponse {
    state_machine_arn: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartExecutionResponse {
    execution_arn: String,
}

/// Step Functions API client
#[derive(Debug, Clone)]
pub struct StepFunctionsClient {
    client: AwsJsonClient,
}

impl StepFunctionsClient {
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

/// ARN quoted in a `StateMachineAlreadyExists` message, e.g.
/// `State Machine Already Exists: 'arn:aws:states:...:stateMachine:name'`
pub fn existing_state_machine_arn(err: &SagePipeError) -> Option<String> {
    let SagePipeError::Backend { code, message, .. } = err else {
        return None;
    };
    if code != "StateMachineAlreadyExists" {
        return None;
    }
    let start = message.find('\'')? + 1;
    let len = message[start..].find('\'')?;
    Some(message[start..start + len].to_string()).filter(|arn| arn.starts_with("arn:"))
}

#[async_trait]
impl WorkflowBackend for StepFunctionsClient {
    async fn create_state_machine(
        &self,
        name: &str,
        definition: &str,
        role_arn: &str,
    ) -> Result<String> {
        let created: Result<CreateStateMachineResponse> = self
            .client
            .call(
                "CreateStateMachine",
                &json!({
                    "name": name,
                    "definition": definition,
                    "roleArn": role_arn,
                    "type": "STANDARD",
                }),
            )
            .await;

        match created {
            Ok(response) => {
                info!("Created state machine '{}'", name);
                Ok(response.state_machine_arn)
            }
            Err(err) => match existing_state_machine_arn(&err) {
                Some(arn) => {
                    warn!("State machine '{}' already exists, reusing {}", name, arn);
                    Ok(arn)
                }
                None => Err(err),
            },
        }
    }

    async fn start_execution(&self, state_machine_arn: &str, input: &str) -> Result<String> {
        let response: StartExecutionResponse = self
            .client
            .call(
                "StartExecution",
                &json!({
                    "stateMachineArn": state_machine_arn,
                    "input": input,
                }),
            )
            .await?;
        Ok(response.execution_arn)
    }
}
