//! Integration tests for the AWS backends against a mock HTTP server

use sagepipe::backends::sagemaker::SageMakerClient;
use sagepipe::backends::sigv4::Credentials;
use sagepipe::backends::ssm::SsmClient;
use sagepipe::backends::stepfunctions::StepFunctionsClient;
use sagepipe::backends::{ExecutionStatus, ParameterStore, PipelineBackend, WorkflowBackend};
use sagepipe::config::Settings;
use sagepipe::pipeline::create_pipeline;
use sagepipe::runner::{self, WaiterConfig};
use sagepipe::workflow::{create_workflow, ExecutionInputs};
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use wiremock::matchers::{body_json, body_partial_json, header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn settings(endpoint: &str) -> Settings {
    let env: HashMap<String, String> = [
        ("SAGEMAKER_ROLE", "arn:aws:iam::123456789012:role/SageMakerRole"),
        ("WORKFLOW_ROLE", "arn:aws:iam::123456789012:role/StepFunctionsRole"),
        ("AWS_REGION", "us-east-1"),
        ("SAGEPIPE_ENDPOINT_URL", endpoint),
        ("SAGEPIPE_POLL_DELAY_SECS", "0"),
        ("SAGEPIPE_MAX_ATTEMPTS", "5"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    Settings::load_with_env(Some(Path::new("/nonexistent/config.json")), env).unwrap()
}

fn credentials() -> Credentials {
    Credentials::new("AKIDEXAMPLE", "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY")
}

fn target(name: &str) -> wiremock::matchers::HeaderExactMatcher {
    header("x-amz-target", name)
}

#[tokio::test]
async fn test_upsert_falls_back_to_update() {
    let mock_server = MockServer::start().await;
    let settings = settings(&mock_server.uri());

    Mock::given(method("POST"))
        .and(path("/"))
        .and(target("SageMaker.CreatePipeline"))
        .and(header("content-type", "application/x-amz-json-1.1"))
        .and(header_exists("authorization"))
        .and(header_exists("x-amz-date"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "__type": "ValidationException",
            "Message": "Pipeline names must be unique within an AWS account and region. Pipeline with name (p) already exists."
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(target("SageMaker.UpdatePipeline"))
        .and(body_partial_json(json!({ "PipelineName": "p" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "PipelineArn": "arn:aws:sagemaker:us-east-1:123456789012:pipeline/p"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = SageMakerClient::new(&settings, credentials()).unwrap();
    let arn = client
        .upsert_pipeline("p", "{}", "arn:aws:iam::123456789012:role/SageMakerRole")
        .await
        .unwrap();
    assert_eq!(arn, "arn:aws:sagemaker:us-east-1:123456789012:pipeline/p");
}

#[tokio::test]
async fn test_backend_error_surfaces_code() {
    let mock_server = MockServer::start().await;
    let settings = settings(&mock_server.uri());

    Mock::given(method("POST"))
        .and(target("SageMaker.StartPipelineExecution"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "__type": "com.amazonaws.sagemaker#ResourceNotFound",
            "Message": "Pipeline p does not exist"
        })))
        .mount(&mock_server)
        .await;

    let client = SageMakerClient::new(&settings, credentials()).unwrap();
    let err = client.start_pipeline_execution("p").await.unwrap_err();
    assert_eq!(err.backend_code(), Some("ResourceNotFound"));
}

#[tokio::test]
async fn test_list_steps_follows_pagination() {
    let mock_server = MockServer::start().await;
    let settings = settings(&mock_server.uri());

    Mock::given(method("POST"))
        .and(target("SageMaker.ListPipelineExecutionSteps"))
        .and(body_json(json!({ "PipelineExecutionArn": "arn:exec" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "PipelineExecutionSteps": [
                { "StepName": "LambdaRecordModelNameToParameterStore", "StepStatus": "Succeeded" },
                { "StepName": "AbaloneCreateModel", "StepStatus": "Succeeded" }
            ],
            "NextToken": "page-2"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(target("SageMaker.ListPipelineExecutionSteps"))
        .and(body_partial_json(json!({ "NextToken": "page-2" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "PipelineExecutionSteps": [
                { "StepName": "AbaloneTrain", "StepStatus": "Succeeded" },
                { "StepName": "AbaloneProcess", "StepStatus": "Succeeded" }
            ]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = SageMakerClient::new(&settings, credentials()).unwrap();
    let steps = client.list_pipeline_execution_steps("arn:exec").await.unwrap();
    let names: Vec<&str> = steps.iter().map(|s| s.step_name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "LambdaRecordModelNameToParameterStore",
            "AbaloneCreateModel",
            "AbaloneTrain",
            "AbaloneProcess"
        ]
    );
}

#[tokio::test]
async fn test_run_pipeline_end_to_end() {
    let mock_server = MockServer::start().await;
    let settings = settings(&mock_server.uri());
    let pipeline = create_pipeline(&settings).unwrap();

    Mock::given(method("POST"))
        .and(target("SageMaker.CreatePipeline"))
        .and(body_partial_json(json!({
            "PipelineName": "AbalonePipelineTestPrintName",
            "PipelineDefinition": pipeline.definition_string().unwrap(),
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "PipelineArn": "arn:pipeline"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(target("SageMaker.StartPipelineExecution"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "PipelineExecutionArn": "arn:exec"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(target("SageMaker.DescribePipelineExecution"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "PipelineExecutionArn": "arn:exec",
            "PipelineExecutionStatus": "Succeeded"
        })))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(target("SageMaker.ListPipelineExecutionSteps"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "PipelineExecutionSteps": [
                { "StepName": "AbaloneProcess", "StepStatus": "Succeeded" }
            ]
        })))
        .mount(&mock_server)
        .await;

    let backend = SageMakerClient::new(&settings, credentials()).unwrap();
    let report = runner::run_pipeline(
        &backend,
        &pipeline,
        settings.sagemaker_role().unwrap(),
        &WaiterConfig::from_settings(&settings),
    )
    .await
    .unwrap();

    assert!(report.succeeded());
    assert_eq!(report.execution.status, ExecutionStatus::Succeeded);
    assert_eq!(report.steps.len(), 1);
}

#[tokio::test]
async fn test_existing_state_machine_is_reused() {
    let mock_server = MockServer::start().await;
    let settings = settings(&mock_server.uri());
    let workflow = create_workflow(&settings).unwrap();
    let existing = "arn:aws:states:us-east-1:123456789012:stateMachine:StepFunctionWorkFlow";

    Mock::given(method("POST"))
        .and(target("AWSStepFunctions.CreateStateMachine"))
        .and(header("content-type", "application/x-amz-json-1.0"))
        .and(body_partial_json(json!({
            "name": "StepFunctionWorkFlow",
            "roleArn": "arn:aws:iam::123456789012:role/StepFunctionsRole"
        })))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "__type": "StateMachineAlreadyExists",
            "message": format!("State Machine Already Exists: '{}'", existing)
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(target("AWSStepFunctions.StartExecution"))
        .and(body_partial_json(json!({ "stateMachineArn": existing })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "executionArn": "arn:aws:states:us-east-1:123456789012:execution:StepFunctionWorkFlow:1",
            "startDate": 1700000000.0
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let backend = StepFunctionsClient::new(&settings, credentials()).unwrap();
    let submission =
        runner::submit_workflow(&backend, &workflow, ExecutionInputs::generate(&settings))
            .await
            .unwrap();

    assert_eq!(submission.state_machine_arn, existing);
    assert!(submission.execution_arn.ends_with(":1"));
}

#[tokio::test]
async fn test_start_execution_sends_inputs() {
    let mock_server = MockServer::start().await;
    let settings = settings(&mock_server.uri());

    let mut inputs = ExecutionInputs::default();
    inputs.insert("ModelName", "ModelName-1");

    Mock::given(method("POST"))
        .and(target("AWSStepFunctions.StartExecution"))
        .and(body_json(json!({
            "stateMachineArn": "arn:machine",
            "input": r#"{"ModelName":"ModelName-1"}"#
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "executionArn": "arn:execution"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let backend = StepFunctionsClient::new(&settings, credentials()).unwrap();
    let arn = backend
        .start_execution("arn:machine", &inputs.to_json_string().unwrap())
        .await
        .unwrap();
    assert_eq!(arn, "arn:execution");
}

#[tokio::test]
async fn test_put_parameter() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(target("AmazonSSM.PutParameter"))
        .and(body_json(json!({
            "Name": "HelloModelNameSps",
            "Value": "ModelName-1",
            "Type": "String",
            "Overwrite": true
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Version": 4,
            "Tier": "Standard"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let store = SsmClient::new("us-east-1", Some(mock_server.uri().as_str()), credentials()).unwrap();
    let version = store
        .put_parameter("HelloModelNameSps", "ModelName-1", true)
        .await
        .unwrap();
    assert_eq!(version, 4);
}

#[tokio::test]
async fn test_session_token_is_sent() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(target("AmazonSSM.PutParameter"))
        .and(header("x-amz-security-token", "session-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "Version": 1 })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut credentials = credentials();
    credentials.session_token = Some("session-token".to_string());
    let store = SsmClient::new("us-east-1", Some(mock_server.uri().as_str()), credentials).unwrap();
    store.put_parameter("p", "v", true).await.unwrap();
}
