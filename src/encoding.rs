//! Request argument bodies shared by both definition formats
//!
//! A SageMaker pipeline step and a Step Functions task state carry the same
//! CreateProcessingJob / CreateTrainingJob / CreateModel request shapes. They
//! differ only in how a deferred value is written:
//!
//! - pipeline definitions: `"Key": {"Get": "Steps.Train.ModelArtifacts.S3ModelArtifacts"}`
//! - state machines: `"Key.$": "$['ModelArtifacts']['S3ModelArtifacts']"`

use crate::error::{SagePipeError, Result};
use crate::models::{
    ExecutionProperty, LambdaSpec, ModelSpec, ProcessingSpec, Reference, TrainingSpec, Value,
};
use serde_json::{json, Map, Value as Json};

/// How deferred values are written into a definition document
pub trait Encoding {
    /// Human-readable encoding name for error messages
    const NAME: &'static str;

    /// Insert `value` under `key`
    fn insert(map: &mut Map<String, Json>, key: &str, value: &Value) -> Result<()>;
}

/// SageMaker pipeline definition encoding (`{"Get": ...}`)
pub struct PipelineEncoding;

impl PipelineEncoding {
    /// Expression a pipeline definition uses for `reference`
    pub fn expression(reference: &Reference) -> Result<String> {
        match reference {
            Reference::Step { .. } | Reference::Parameter(_) => Ok(reference.to_string()),
            Reference::Execution(ExecutionProperty::PipelineName) => {
                Ok("Execution.PipelineName".to_string())
            }
            Reference::Execution(ExecutionProperty::PipelineExecutionId) => {
                Ok("Execution.PipelineExecutionId".to_string())
            }
            Reference::ExecutionInput(_) => Err(SagePipeError::UnsupportedReference {
                encoding: Self::NAME,
                reference: reference.to_string(),
            }),
        }
    }

    pub fn encode(value: &Value) -> Result<Json> {
        match value {
            Value::Literal(literal) => Ok(literal.clone()),
            Value::Deferred(reference) => Ok(json!({ "Get": Self::expression(reference)? })),
        }
    }
}

impl Encoding for PipelineEncoding {
    const NAME: &'static str = "pipeline definition";

    fn insert(map: &mut Map<String, Json>, key: &str, value: &Value) -> Result<()> {
        map.insert(key.to_string(), Self::encode(value)?);
        Ok(())
    }
}

/// Amazon States Language encoding (`"Key.$": "<JSONPath>"`)
pub struct StatesEncoding;

impl StatesEncoding {
    /// JSONPath a state uses for `reference`.
    ///
    /// Step outputs resolve against the state input, which is the output of
    /// the preceding state; callers enforce that adjacency.
    pub fn path(reference: &Reference) -> Result<String> {
        match reference {
            Reference::Step { output, .. } => Ok(output.json_path()),
            Reference::ExecutionInput(field) => Ok(format!("$$.Execution.Input['{}']", field)),
            Reference::Execution(ExecutionProperty::PipelineName) => {
                Ok("$$.Execution.Name".to_string())
            }
            Reference::Execution(ExecutionProperty::PipelineExecutionId) => {
                Ok("$$.Execution.Id".to_string())
            }
            Reference::Parameter(_) => Err(SagePipeError::UnsupportedReference {
                encoding: Self::NAME,
                reference: reference.to_string(),
            }),
        }
    }
}

impl Encoding for StatesEncoding {
    const NAME: &'static str = "state machine definition";

    fn insert(map: &mut Map<String, Json>, key: &str, value: &Value) -> Result<()> {
        match value {
            Value::Literal(literal) => {
                map.insert(key.to_string(), literal.clone());
            }
            Value::Deferred(reference) => {
                map.insert(format!("{}.$", key), Json::String(Self::path(reference)?));
            }
        }
        Ok(())
    }
}

fn object(value: Json) -> Map<String, Json> {
    match value {
        Json::Object(map) => map,
        _ => Map::new(),
    }
}

/// CreateProcessingJob request body
pub fn processing_arguments<E: Encoding>(spec: &ProcessingSpec) -> Result<Map<String, Json>> {
    let mut cluster = object(json!({ "InstanceType": spec.instance_type }));
    E::insert(&mut cluster, "InstanceCount", &spec.instance_count)?;
    cluster.insert("VolumeSizeInGB".to_string(), spec.volume_size_gb.into());

    let mut inputs = Vec::with_capacity(spec.inputs.len());
    for input in &spec.inputs {
        let mut s3_input = Map::new();
        E::insert(&mut s3_input, "S3Uri", &input.source)?;
        s3_input.insert("LocalPath".to_string(), input.destination.clone().into());
        s3_input.insert("S3DataType".to_string(), "S3Prefix".into());
        s3_input.insert("S3InputMode".to_string(), "File".into());
        s3_input.insert(
            "S3DataDistributionType".to_string(),
            "FullyReplicated".into(),
        );
        inputs.push(json!({
            "InputName": input.name,
            "AppManaged": false,
            "S3Input": s3_input,
        }));
    }

    let outputs: Vec<Json> = spec
        .outputs
        .iter()
        .map(|output| {
            json!({
                "OutputName": output.name,
                "AppManaged": false,
                "S3Output": {
                    "S3Uri": output.destination,
                    "LocalPath": output.source,
                    "S3UploadMode": "EndOfJob",
                },
            })
        })
        .collect();

    let mut args = Map::new();
    if let Some(job_name) = &spec.job_name {
        E::insert(&mut args, "ProcessingJobName", job_name)?;
    }
    args.insert(
        "ProcessingResources".to_string(),
        json!({ "ClusterConfig": cluster }),
    );
    args.insert(
        "AppSpecification".to_string(),
        json!({
            "ImageUri": spec.image_uri,
            "ContainerEntrypoint": spec.entrypoint,
        }),
    );
    args.insert("RoleArn".to_string(), spec.role_arn.clone().into());
    args.insert("ProcessingInputs".to_string(), Json::Array(inputs));
    args.insert(
        "ProcessingOutputConfig".to_string(),
        json!({ "Outputs": outputs }),
    );
    Ok(args)
}

/// CreateTrainingJob request body
pub fn training_arguments<E: Encoding>(spec: &TrainingSpec) -> Result<Map<String, Json>> {
    let mut resources = object(json!({ "VolumeSizeInGB": spec.volume_size_gb }));
    E::insert(&mut resources, "InstanceCount", &spec.instance_count)?;
    resources.insert("InstanceType".to_string(), spec.instance_type.clone().into());

    let mut channels = Vec::with_capacity(spec.channels.len());
    for channel in &spec.channels {
        let mut source = object(json!({ "S3DataType": "S3Prefix" }));
        E::insert(&mut source, "S3Uri", &channel.s3_uri)?;
        source.insert(
            "S3DataDistributionType".to_string(),
            "FullyReplicated".into(),
        );
        channels.push(json!({
            "DataSource": { "S3DataSource": source },
            "ContentType": channel.content_type,
            "ChannelName": channel.name,
        }));
    }

    let mut args = Map::new();
    if let Some(job_name) = &spec.job_name {
        E::insert(&mut args, "TrainingJobName", job_name)?;
    }
    args.insert(
        "AlgorithmSpecification".to_string(),
        json!({
            "TrainingImage": spec.image_uri,
            "TrainingInputMode": "File",
        }),
    );
    args.insert(
        "OutputDataConfig".to_string(),
        json!({ "S3OutputPath": spec.output_path }),
    );
    args.insert(
        "StoppingCondition".to_string(),
        json!({ "MaxRuntimeInSeconds": spec.max_runtime_secs }),
    );
    args.insert("ResourceConfig".to_string(), Json::Object(resources));
    args.insert("RoleArn".to_string(), spec.role_arn.clone().into());
    args.insert("InputDataConfig".to_string(), Json::Array(channels));
    args.insert(
        "HyperParameters".to_string(),
        serde_json::to_value(&spec.hyperparameters)?,
    );
    Ok(args)
}

/// CreateModel request body
pub fn model_arguments<E: Encoding>(spec: &ModelSpec) -> Result<Map<String, Json>> {
    let mut container = object(json!({
        "Image": spec.image_uri,
        "Environment": spec.environment,
    }));
    E::insert(&mut container, "ModelDataUrl", &spec.model_data)?;

    let mut args = Map::new();
    if let Some(model_name) = &spec.model_name {
        E::insert(&mut args, "ModelName", model_name)?;
    }
    args.insert("ExecutionRoleArn".to_string(), spec.role_arn.clone().into());
    args.insert("PrimaryContainer".to_string(), Json::Object(container));
    Ok(args)
}

/// Lambda invocation payload
pub fn lambda_payload<E: Encoding>(spec: &LambdaSpec) -> Result<Map<String, Json>> {
    let mut payload = Map::new();
    for (key, value) in &spec.payload {
        E::insert(&mut payload, key, value)?;
    }
    Ok(payload)
}
