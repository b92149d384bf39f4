//! Step Functions workflow builder (linear state machine chain)
//!
//! The same four logical steps as [`crate::pipeline`], wired differently:
//! job names and the model name are bound to fields of an execution input
//! supplied at submission time, and states are linked by an explicit chain.
//! A state can only read the output of the state right before it.

use crate::config::Settings;
use crate::dag::DagEngine;
use crate::encoding::{self, Encoding, StatesEncoding};
use crate::error::{SagePipeError, Result};
use crate::models::*;
use crate::parser::validate_step_name;
use crate::pipeline::{sklearn_image, xgboost_hyperparameters, xgboost_image};
use serde::Serialize;
use serde_json::{json, Map, Value as Json};
use std::collections::BTreeMap;
use tracing::{debug, info};
use uuid::Uuid;

pub const PREPROCESSING_JOB_NAME: &str = "PreprocessingJobName";
pub const TRAINING_JOB_NAME: &str = "TrainingJobName";
pub const LAMBDA_FUNCTION_NAME: &str = "LambdaFunctionName";
pub const MODEL_NAME: &str = "ModelName";

pub const PROCESS_STATE: &str = "PreprocessingData";
pub const TRAIN_STATE: &str = "TrainingModel";
pub const MODEL_STATE: &str = "SaveModel";
pub const LAMBDA_STATE: &str = "LambdaStep";

const PROCESSING_ROOT: &str = "/opt/ml/processing";

/// Execution input field type
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum FieldType {
    String,
}

/// Typed schema of the runtime parameters supplied with every execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionInputSchema {
    fields: Vec<(String, FieldType)>,
}

impl ExecutionInputSchema {
    pub fn new<'a>(fields: impl IntoIterator<Item = (&'a str, FieldType)>) -> Self {
        Self {
            fields: fields
                .into_iter()
                .map(|(name, field_type)| (name.to_string(), field_type))
                .collect(),
        }
    }

    /// Schema of the ML workflow: four required strings
    pub fn ml_workflow() -> Self {
        Self::new([
            (PREPROCESSING_JOB_NAME, FieldType::String),
            (TRAINING_JOB_NAME, FieldType::String),
            (LAMBDA_FUNCTION_NAME, FieldType::String),
            (MODEL_NAME, FieldType::String),
        ])
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|(field, _)| field == name)
    }

    /// Deferred value bound to a schema field
    pub fn field(&self, name: &str) -> Result<Value> {
        if !self.contains(name) {
            return Err(SagePipeError::UnknownExecutionInput(name.to_string()));
        }
        Ok(Value::Deferred(Reference::ExecutionInput(name.to_string())))
    }

    /// Check that every field is present with the right type
    pub fn validate(&self, inputs: &ExecutionInputs) -> Result<()> {
        for (name, field_type) in &self.fields {
            let value = inputs
                .0
                .get(name)
                .ok_or_else(|| SagePipeError::MissingExecutionInput(name.clone()))?;
            match field_type {
                FieldType::String if value.is_string() => {}
                FieldType::String => {
                    return Err(SagePipeError::InvalidExecutionInput {
                        field: name.clone(),
                        expected: "string".to_string(),
                    })
                }
            }
        }
        Ok(())
    }
}

/// Concrete execution input values
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutionInputs(Map<String, Json>);

impl ExecutionInputs {
    /// Fresh inputs with unique job and model names
    pub fn generate(settings: &Settings) -> Self {
        let mut inputs = Self::default();
        inputs.insert(
            PREPROCESSING_JOB_NAME,
            format!("{}{}", PREPROCESSING_JOB_NAME, Uuid::new_v4()),
        );
        inputs.insert(
            TRAINING_JOB_NAME,
            format!("{}{}", TRAINING_JOB_NAME, Uuid::new_v4()),
        );
        inputs.insert(LAMBDA_FUNCTION_NAME, settings.lambda_function_name.clone());
        inputs.insert(MODEL_NAME, format!("{}{}", MODEL_NAME, Uuid::new_v4()));
        inputs
    }

    pub fn from_json(content: &str) -> Result<Self> {
        match serde_json::from_str(content)? {
            Json::Object(map) => Ok(Self(map)),
            _ => Err(SagePipeError::Validation(
                "Execution input must be a JSON object".to_string(),
            )),
        }
    }

    pub fn insert(&mut self, field: &str, value: impl Into<String>) {
        self.0.insert(field.to_string(), Json::String(value.into()));
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Json::as_str)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.0)?)
    }
}

/// Linear state machine over validated steps
#[derive(Debug, Clone)]
pub struct Workflow {
    name: String,
    role_arn: String,
    states: Vec<Step>,
    execution_input: ExecutionInputSchema,
}

impl Workflow {
    pub fn new(
        name: impl Into<String>,
        role_arn: impl Into<String>,
        states: Vec<Step>,
        execution_input: ExecutionInputSchema,
    ) -> Result<Self> {
        let workflow = Self {
            name: name.into(),
            role_arn: role_arn.into(),
            states,
            execution_input,
        };
        workflow.validate()?;
        Ok(workflow)
    }

    fn validate(&self) -> Result<()> {
        if self.states.is_empty() {
            return Err(SagePipeError::Validation(format!(
                "Workflow '{}' has no states",
                self.name
            )));
        }
        if self.states.len() > MAX_STEP_COUNT {
            return Err(SagePipeError::StepCountExceeded {
                count: self.states.len(),
                limit: MAX_STEP_COUNT,
            });
        }
        for state in &self.states {
            validate_step_name(&state.name)?;
        }

        DagEngine::build_chain(&self.states)?;

        for (position, state) in self.states.iter().enumerate() {
            for reference in state.references() {
                match reference {
                    Reference::Step { step, .. } => {
                        let predecessor = position
                            .checked_sub(1)
                            .map(|index| self.states[index].name.as_str());
                        if predecessor != Some(step.as_str()) {
                            return Err(SagePipeError::NonAdjacentReference {
                                state: state.name.clone(),
                                reference: step.clone(),
                            });
                        }
                    }
                    Reference::ExecutionInput(field) => {
                        if !self.execution_input.contains(field) {
                            return Err(SagePipeError::UnknownExecutionInput(field.clone()));
                        }
                    }
                    Reference::Parameter(_) => {
                        return Err(SagePipeError::UnsupportedReference {
                            encoding: "state machine definition",
                            reference: reference.to_string(),
                        })
                    }
                    Reference::Execution(_) => {}
                }
            }
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Role assumed by the state machine
    pub fn role_arn(&self) -> &str {
        &self.role_arn
    }

    pub fn states(&self) -> &[Step] {
        &self.states
    }

    pub fn execution_input(&self) -> &ExecutionInputSchema {
        &self.execution_input
    }

    /// Amazon States Language definition
    pub fn definition(&self) -> Result<Json> {
        let start_at = self.states.first().ok_or_else(|| {
            SagePipeError::Validation(format!("Workflow '{}' has no states", self.name))
        })?;

        let mut states = Map::new();
        for (position, state) in self.states.iter().enumerate() {
            let next = self.states.get(position + 1).map(|s| s.name.as_str());
            states.insert(state.name.clone(), encode_state(state, next)?);
        }

        Ok(json!({
            "StartAt": start_at.name,
            "States": states,
        }))
    }

    pub fn definition_string(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.definition()?)?)
    }
}

fn encode_state(step: &Step, next: Option<&str>) -> Result<Json> {
    let (resource, parameters) = match &step.spec {
        StepSpec::Processing(spec) => (
            "arn:aws:states:::sagemaker:createProcessingJob.sync",
            encoding::processing_arguments::<StatesEncoding>(spec)?,
        ),
        StepSpec::Training(spec) => (
            "arn:aws:states:::sagemaker:createTrainingJob.sync",
            encoding::training_arguments::<StatesEncoding>(spec)?,
        ),
        StepSpec::CreateModel(spec) => (
            "arn:aws:states:::sagemaker:createModel",
            encoding::model_arguments::<StatesEncoding>(spec)?,
        ),
        StepSpec::Lambda(spec) => {
            let mut parameters = Map::new();
            StatesEncoding::insert(&mut parameters, "FunctionName", &spec.function)?;
            parameters.insert(
                "Payload".to_string(),
                Json::Object(encoding::lambda_payload::<StatesEncoding>(spec)?),
            );
            ("arn:aws:states:::lambda:invoke", parameters)
        }
    };

    let mut state = Map::new();
    state.insert("Type".to_string(), "Task".into());
    state.insert("Resource".to_string(), resource.into());
    state.insert("Parameters".to_string(), Json::Object(parameters));
    match next {
        Some(next) => state.insert("Next".to_string(), next.into()),
        None => state.insert("End".to_string(), true.into()),
    };

    debug!("Encoded {} state '{}'", step.kind(), step.name);
    Ok(Json::Object(state))
}

/// Preprocessing state; the job name comes from the execution input
pub fn create_process_step(settings: &Settings, schema: &ExecutionInputSchema) -> Result<Step> {
    let bucket = settings.bucket()?;
    let output_path = format!("s3://{}/abalone/processing-output/", bucket);

    let outputs = ["train", "validation", "test"]
        .iter()
        .map(|split| ProcessingOutput {
            name: format!("{}-data-output", split),
            source: format!("{}/{}", PROCESSING_ROOT, split),
            destination: output_path.clone(),
        })
        .collect();

    Ok(Step::new(
        PROCESS_STATE,
        StepSpec::Processing(ProcessingSpec {
            job_name: Some(schema.field(PREPROCESSING_JOB_NAME)?),
            role_arn: settings.sagemaker_role()?.to_string(),
            image_uri: sklearn_image(settings)?,
            instance_type: settings.processing_instance_type.clone(),
            instance_count: Value::literal(1),
            volume_size_gb: 30,
            entrypoint: vec![
                "python3".to_string(),
                format!("{}/code/preprocessing.py", PROCESSING_ROOT),
            ],
            inputs: vec![
                ProcessingInput {
                    name: "train-data-input".to_string(),
                    source: Value::literal(format!("s3://{}/abalone/abalone-dataset.csv", bucket)),
                    destination: format!("{}/input", PROCESSING_ROOT),
                },
                ProcessingInput {
                    name: "train-code-input".to_string(),
                    source: Value::literal(format!("s3://{}/abalone/preprocessing.py", bucket)),
                    destination: format!("{}/code", PROCESSING_ROOT),
                },
            ],
            outputs,
        }),
    ))
}

/// Training state reading the shared processing output prefix
pub fn create_training_step(settings: &Settings, schema: &ExecutionInputSchema) -> Result<Step> {
    let bucket = settings.bucket()?;
    let processing_output = format!("s3://{}/abalone/processing-output", bucket);

    Ok(Step::new(
        TRAIN_STATE,
        StepSpec::Training(TrainingSpec {
            job_name: Some(schema.field(TRAINING_JOB_NAME)?),
            role_arn: settings.sagemaker_role()?.to_string(),
            image_uri: xgboost_image(settings)?,
            instance_type: settings.training_instance_type.clone(),
            instance_count: Value::literal(1),
            volume_size_gb: 30,
            output_path: format!("s3://{}/AbaloneTrain", bucket),
            max_runtime_secs: 86_400,
            hyperparameters: xgboost_hyperparameters(),
            channels: vec![
                TrainingChannel {
                    name: "train".to_string(),
                    s3_uri: Value::literal(processing_output.clone()),
                    content_type: "text/csv".to_string(),
                },
                TrainingChannel {
                    name: "validation".to_string(),
                    s3_uri: Value::literal(processing_output),
                    content_type: "text/csv".to_string(),
                },
            ],
        }),
    ))
}

/// Model state: name from the execution input, artifact from the training state's output
pub fn create_model_step(
    settings: &Settings,
    schema: &ExecutionInputSchema,
    training_step: &Step,
) -> Result<Step> {
    Ok(Step::new(
        MODEL_STATE,
        StepSpec::CreateModel(ModelSpec {
            model_name: Some(schema.field(MODEL_NAME)?),
            role_arn: settings.sagemaker_role()?.to_string(),
            image_uri: xgboost_image(settings)?,
            model_data: training_step.property(PropertyPath::model_artifacts()),
            environment: BTreeMap::new(),
        }),
    ))
}

/// Lambda state recording the model name
pub fn create_lambda_step(schema: &ExecutionInputSchema, model_name: Value) -> Result<Step> {
    Ok(Step::new(
        LAMBDA_STATE,
        StepSpec::Lambda(LambdaSpec {
            function: schema.field(LAMBDA_FUNCTION_NAME)?,
            payload: vec![("model_name".to_string(), model_name)],
            output_parameters: vec![],
        }),
    ))
}

/// ARN the state machine for `settings.workflow_name` gets once created
pub fn state_machine_arn(settings: &Settings) -> Result<String> {
    Ok(format!(
        "arn:aws:states:{}:{}:stateMachine:{}",
        settings.region,
        settings.account_id()?,
        settings.workflow_name
    ))
}

/// Build the ML workflow state machine
pub fn create_workflow(settings: &Settings) -> Result<Workflow> {
    let schema = ExecutionInputSchema::ml_workflow();

    let processing_step = create_process_step(settings, &schema)?;
    let training_step = create_training_step(settings, &schema)?;
    let model_step = create_model_step(settings, &schema, &training_step)?;
    let lambda_step = create_lambda_step(&schema, schema.field(MODEL_NAME)?)?;

    let workflow = Workflow::new(
        settings.workflow_name.clone(),
        settings.workflow_role()?,
        vec![processing_step, training_step, model_step, lambda_step],
        schema,
    )?;
    info!(
        "Built workflow '{}' with {} states",
        workflow.name(),
        workflow.states().len()
    );
    Ok(workflow)
}
