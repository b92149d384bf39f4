//! SageMaker pipeline builder (declarative definition document)
//!
//! Builds the four-step abalone pipeline:
//!
//! ```text
//! AbaloneProcess -> AbaloneTrain -> AbaloneCreateModel -> LambdaRecordModelNameToParameterStore
//! ```
//!
//! Edges are not declared explicitly. Each step consumes deferred references
//! to the properties of an earlier step, and the backend derives execution
//! order from them.

use crate::config::Settings;
use crate::dag::DagEngine;
use crate::encoding::{self, Encoding, PipelineEncoding};
use crate::error::{SagePipeError, Result};
use crate::images::{self, Framework, ImageSpec};
use crate::models::*;
use crate::parser::validate_step_name;
use serde_json::{json, Map, Value as Json};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

pub const DEFINITION_VERSION: &str = "2020-12-01";

pub const PROCESS_STEP: &str = "AbaloneProcess";
pub const TRAIN_STEP: &str = "AbaloneTrain";
pub const CREATE_MODEL_STEP: &str = "AbaloneCreateModel";
pub const NOTIFY_STEP: &str = "LambdaRecordModelNameToParameterStore";

const XGBOOST_VERSION: &str = "1.0-1";
const SKLEARN_VERSION: &str = "0.23-1";
const PROCESSING_ROOT: &str = "/opt/ml/processing";

/// Validated pipeline: named parameters plus ordered steps
#[derive(Debug, Clone)]
pub struct Pipeline {
    name: String,
    parameters: Vec<Parameter>,
    steps: Vec<Step>,
}

impl Pipeline {
    /// Assemble a pipeline, rejecting invalid names and dangling references
    pub fn new(name: impl Into<String>, parameters: Vec<Parameter>, steps: Vec<Step>) -> Result<Self> {
        let pipeline = Self {
            name: name.into(),
            parameters,
            steps,
        };
        pipeline.validate()?;
        Ok(pipeline)
    }

    fn validate(&self) -> Result<()> {
        if self.steps.len() > MAX_STEP_COUNT {
            return Err(SagePipeError::StepCountExceeded {
                count: self.steps.len(),
                limit: MAX_STEP_COUNT,
            });
        }

        for step in &self.steps {
            validate_step_name(&step.name)?;
        }

        let declared: HashSet<&str> = self.parameters.iter().map(|p| p.name.as_str()).collect();
        if declared.len() != self.parameters.len() {
            return Err(SagePipeError::Validation(format!(
                "Pipeline '{}' declares a parameter twice",
                self.name
            )));
        }
        for step in &self.steps {
            for reference in step.references() {
                match reference {
                    Reference::Parameter(parameter) if !declared.contains(parameter.as_str()) => {
                        return Err(SagePipeError::UnknownParameter {
                            step: step.name.clone(),
                            parameter: parameter.clone(),
                        });
                    }
                    Reference::ExecutionInput(_) => {
                        return Err(SagePipeError::UnsupportedReference {
                            encoding: PipelineEncoding::NAME,
                            reference: reference.to_string(),
                        });
                    }
                    _ => {}
                }
            }
        }

        DagEngine::build(&self.steps)?;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Step names in an order that respects every data dependency
    pub fn execution_order(&self) -> Result<Vec<String>> {
        DagEngine::build(&self.steps)?.topological_sort()
    }

    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|step| step.name == name)
    }

    /// Pipeline definition document
    pub fn definition(&self) -> Result<Json> {
        let parameters: Vec<Json> = self
            .parameters
            .iter()
            .map(|parameter| {
                json!({
                    "Name": parameter.name,
                    "Type": parameter.parameter_type,
                    "DefaultValue": parameter.default_value,
                })
            })
            .collect();

        let steps = self
            .steps
            .iter()
            .map(encode_step)
            .collect::<Result<Vec<_>>>()?;

        Ok(json!({
            "Version": DEFINITION_VERSION,
            "Metadata": {},
            "Parameters": parameters,
            "PipelineExperimentConfig": {
                "ExperimentName": PipelineEncoding::encode(
                    &Value::Deferred(Reference::Execution(ExecutionProperty::PipelineName)),
                )?,
                "TrialName": PipelineEncoding::encode(
                    &Value::Deferred(Reference::Execution(ExecutionProperty::PipelineExecutionId)),
                )?,
            },
            "Steps": steps,
        }))
    }

    /// Compact definition string, as submitted to the backend
    pub fn definition_string(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.definition()?)?)
    }

    /// Write the definition to `path` as UTF-8 JSON indented by four spaces
    pub fn export<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let definition = self.definition()?;
        let mut buffer = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
        serde::Serialize::serialize(&definition, &mut serializer)?;
        fs::write(path.as_ref(), buffer)?;
        info!(
            "Exported pipeline '{}' definition to {}",
            self.name,
            path.as_ref().display()
        );
        Ok(())
    }
}

fn encode_step(step: &Step) -> Result<Json> {
    let mut encoded = Map::new();
    encoded.insert("Name".to_string(), step.name.clone().into());

    match &step.spec {
        StepSpec::Processing(spec) => {
            encoded.insert("Type".to_string(), "Processing".into());
            encoded.insert(
                "Arguments".to_string(),
                Json::Object(encoding::processing_arguments::<PipelineEncoding>(spec)?),
            );
        }
        StepSpec::Training(spec) => {
            encoded.insert("Type".to_string(), "Training".into());
            encoded.insert(
                "Arguments".to_string(),
                Json::Object(encoding::training_arguments::<PipelineEncoding>(spec)?),
            );
        }
        StepSpec::CreateModel(spec) => {
            encoded.insert("Type".to_string(), "Model".into());
            encoded.insert(
                "Arguments".to_string(),
                Json::Object(encoding::model_arguments::<PipelineEncoding>(spec)?),
            );
        }
        StepSpec::Lambda(spec) => {
            encoded.insert("Type".to_string(), "Lambda".into());
            encoded.insert(
                "Arguments".to_string(),
                Json::Object(encoding::lambda_payload::<PipelineEncoding>(spec)?),
            );
            encoded.insert(
                "FunctionArn".to_string(),
                PipelineEncoding::encode(&spec.function)?,
            );
            let outputs: Vec<Json> = spec
                .output_parameters
                .iter()
                .map(|name| json!({ "OutputName": name, "OutputType": "String" }))
                .collect();
            encoded.insert("OutputParameters".to_string(), Json::Array(outputs));
        }
    }

    debug!("Encoded {} step '{}'", step.kind(), step.name);
    Ok(Json::Object(encoded))
}

/// The five substitutable pipeline parameters
#[derive(Debug, Clone)]
pub struct PipelineParameters {
    pub processing_instance_count: Parameter,
    pub training_instance_count: Parameter,
    pub model_approval_status: Parameter,
    pub input_data: Parameter,
    pub batch_data: Parameter,
}

impl PipelineParameters {
    pub fn new(bucket: &str) -> Self {
        Self {
            processing_instance_count: Parameter::integer("ProcessingInstanceCount", 1),
            training_instance_count: Parameter::integer("TrainingInstanceCount", 1),
            model_approval_status: Parameter::string(
                "ModelApprovalStatus",
                "PendingManualApproval",
            ),
            input_data: Parameter::string("InputData", input_data_uri(bucket)),
            batch_data: Parameter::string(
                "BatchData",
                format!("s3://{}/abalone/abalone-dataset-batch", bucket),
            ),
        }
    }

    pub fn to_vec(&self) -> Vec<Parameter> {
        vec![
            self.processing_instance_count.clone(),
            self.training_instance_count.clone(),
            self.model_approval_status.clone(),
            self.input_data.clone(),
            self.batch_data.clone(),
        ]
    }
}

fn input_data_uri(bucket: &str) -> String {
    format!("s3://{}/abalone/abalone-dataset.csv", bucket)
}

pub(crate) fn xgboost_image(settings: &Settings) -> Result<String> {
    images::retrieve(&ImageSpec {
        framework: Framework::Xgboost,
        region: &settings.region,
        version: XGBOOST_VERSION,
        py_version: "py3",
        instance_type: &settings.training_instance_type,
    })
}

pub(crate) fn sklearn_image(settings: &Settings) -> Result<String> {
    images::retrieve(&ImageSpec {
        framework: Framework::SkLearn,
        region: &settings.region,
        version: SKLEARN_VERSION,
        py_version: "py3",
        instance_type: &settings.processing_instance_type,
    })
}

/// XGBoost regression hyperparameters for the abalone model
pub(crate) fn xgboost_hyperparameters() -> BTreeMap<String, String> {
    [
        ("objective", "reg:linear"),
        ("num_round", "50"),
        ("max_depth", "5"),
        ("eta", "0.2"),
        ("gamma", "4"),
        ("min_child_weight", "6"),
        ("subsample", "0.7"),
        ("silent", "0"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// Preprocessing step: raw CSV in, train/validation/test splits out
pub fn create_process_step(settings: &Settings, parameters: &PipelineParameters) -> Result<Step> {
    let bucket = settings.bucket()?;
    let output_prefix = format!("s3://{}/{}/{}", bucket, settings.pipeline_name, PROCESS_STEP);

    let outputs = ["train", "validation", "test"]
        .iter()
        .map(|name| ProcessingOutput {
            name: name.to_string(),
            source: format!("{}/{}", PROCESSING_ROOT, name),
            destination: format!("{}/output/{}", output_prefix, name),
        })
        .collect();

    Ok(Step::new(
        PROCESS_STEP,
        StepSpec::Processing(ProcessingSpec {
            job_name: None,
            role_arn: settings.sagemaker_role()?.to_string(),
            image_uri: sklearn_image(settings)?,
            instance_type: settings.processing_instance_type.clone(),
            instance_count: parameters.processing_instance_count.value(),
            volume_size_gb: 30,
            entrypoint: vec![
                "python3".to_string(),
                format!("{}/input/code/preprocessing.py", PROCESSING_ROOT),
            ],
            inputs: vec![
                ProcessingInput {
                    name: "input-1".to_string(),
                    source: Value::literal(input_data_uri(&bucket)),
                    destination: format!("{}/input", PROCESSING_ROOT),
                },
                ProcessingInput {
                    name: "code".to_string(),
                    source: Value::literal(format!("s3://{}/abalone/preprocessing.py", bucket)),
                    destination: format!("{}/input/code", PROCESSING_ROOT),
                },
            ],
            outputs,
        }),
    ))
}

/// Training step fed by the preprocessing step's deferred outputs
pub fn create_training_step(
    settings: &Settings,
    parameters: &PipelineParameters,
    s3_train_data: Value,
    s3_validation_data: Value,
) -> Result<Step> {
    let bucket = settings.bucket()?;

    Ok(Step::new(
        TRAIN_STEP,
        StepSpec::Training(TrainingSpec {
            job_name: None,
            role_arn: settings.sagemaker_role()?.to_string(),
            image_uri: xgboost_image(settings)?,
            instance_type: settings.training_instance_type.clone(),
            instance_count: parameters.training_instance_count.value(),
            volume_size_gb: 30,
            output_path: format!("s3://{}/AbaloneTrain", bucket),
            max_runtime_secs: 86_400,
            hyperparameters: xgboost_hyperparameters(),
            channels: vec![
                TrainingChannel {
                    name: "train".to_string(),
                    s3_uri: s3_train_data,
                    content_type: "text/csv".to_string(),
                },
                TrainingChannel {
                    name: "validation".to_string(),
                    s3_uri: s3_validation_data,
                    content_type: "text/csv".to_string(),
                },
            ],
        }),
    ))
}

/// Model creation from the training step's deferred artifact
pub fn create_model_step(settings: &Settings, step_train: &Step) -> Result<Step> {
    Ok(Step::new(
        CREATE_MODEL_STEP,
        StepSpec::CreateModel(ModelSpec {
            model_name: None,
            role_arn: settings.sagemaker_role()?.to_string(),
            image_uri: xgboost_image(settings)?,
            model_data: step_train.property(PropertyPath::model_artifacts()),
            environment: BTreeMap::new(),
        }),
    ))
}

/// Lambda step recording the created model's name
pub fn create_lambda_step(settings: &Settings, model_name: Value) -> Result<Step> {
    Ok(Step::new(
        NOTIFY_STEP,
        StepSpec::Lambda(LambdaSpec {
            function: Value::literal(settings.lambda_function_arn()?),
            payload: vec![("model_name".to_string(), model_name)],
            output_parameters: vec![],
        }),
    ))
}

/// Build the full abalone pipeline
pub fn create_pipeline(settings: &Settings) -> Result<Pipeline> {
    let parameters = PipelineParameters::new(&settings.bucket()?);

    let processing_step = create_process_step(settings, &parameters)?;
    let training_step = create_training_step(
        settings,
        &parameters,
        processing_step.property(PropertyPath::processing_output("train")),
        processing_step.property(PropertyPath::processing_output("validation")),
    )?;
    let model_step = create_model_step(settings, &training_step)?;
    let lambda_step = create_lambda_step(settings, model_step.property(PropertyPath::model_name()))?;

    let pipeline = Pipeline::new(
        settings.pipeline_name.clone(),
        parameters.to_vec(),
        vec![processing_step, training_step, model_step, lambda_step],
    )?;
    info!(
        "Built pipeline '{}' with {} steps",
        pipeline.name(),
        pipeline.steps().len()
    );
    Ok(pipeline)
}
