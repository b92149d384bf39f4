//! Core data model: steps, deferred references, and pipeline parameters

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// Backend limits
pub const MAX_DEFINITION_SIZE: usize = 1_048_576; // 1 MB
pub const MAX_STEP_COUNT: usize = 50;
pub const MAX_STEP_NAME_LEN: usize = 64;

/// One segment of a step property path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Attribute access (`.Name`)
    Attr(String),
    /// Keyed access (`['name']`)
    Key(String),
}

/// Path into a step's runtime properties, e.g.
/// `ProcessingOutputConfig.Outputs['train'].S3Output.S3Uri`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyPath(Vec<Segment>);

impl PropertyPath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attr(mut self, name: impl Into<String>) -> Self {
        self.0.push(Segment::Attr(name.into()));
        self
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.0.push(Segment::Key(key.into()));
        self
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    /// S3 location of a named processing output
    pub fn processing_output(name: &str) -> Self {
        Self::new()
            .attr("ProcessingOutputConfig")
            .attr("Outputs")
            .key(name)
            .attr("S3Output")
            .attr("S3Uri")
    }

    /// S3 location of the trained model artifact
    pub fn model_artifacts() -> Self {
        Self::new().attr("ModelArtifacts").attr("S3ModelArtifacts")
    }

    /// Name of the created model
    pub fn model_name() -> Self {
        Self::new().attr("ModelName")
    }

    /// Named output parameter of a lambda step
    pub fn lambda_output(name: &str) -> Self {
        Self::new().attr("OutputParameters").key(name)
    }

    /// Dotted form used by pipeline definitions
    pub fn dotted(&self) -> String {
        let mut out = String::new();
        for segment in &self.0 {
            match segment {
                Segment::Attr(name) => {
                    if !out.is_empty() {
                        out.push('.');
                    }
                    out.push_str(name);
                }
                Segment::Key(key) => {
                    out.push_str("['");
                    out.push_str(key);
                    out.push_str("']");
                }
            }
        }
        out
    }

    /// JSONPath form rooted at the state input (`$['A']['B']`)
    pub fn json_path(&self) -> String {
        let mut out = String::from("$");
        for segment in &self.0 {
            let (Segment::Attr(name) | Segment::Key(name)) = segment;
            out.push_str("['");
            out.push_str(name);
            out.push_str("']");
        }
        out
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dotted())
    }
}

/// Properties of the running execution itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionProperty {
    PipelineName,
    PipelineExecutionId,
}

/// Symbolic pointer to a value only known once the backend runs the graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// Output of another step
    Step { step: String, output: PropertyPath },
    /// Pipeline parameter
    Parameter(String),
    /// Field of the execution input supplied at submission
    ExecutionInput(String),
    /// Property of the execution
    Execution(ExecutionProperty),
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Step { step, output } => write!(f, "Steps.{}.{}", step, output),
            Reference::Parameter(name) => write!(f, "Parameters.{}", name),
            Reference::ExecutionInput(field) => write!(f, "ExecutionInput.{}", field),
            Reference::Execution(property) => write!(f, "Execution.{:?}", property),
        }
    }
}

/// Step input value: either known now, or resolved by the backend at runtime
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Literal(serde_json::Value),
    Deferred(Reference),
}

impl Value {
    pub fn literal(value: impl Into<serde_json::Value>) -> Self {
        Value::Literal(value.into())
    }

    pub fn step_output(step: impl Into<String>, output: PropertyPath) -> Self {
        Value::Deferred(Reference::Step {
            step: step.into(),
            output,
        })
    }

    pub fn reference(&self) -> Option<&Reference> {
        match self {
            Value::Deferred(reference) => Some(reference),
            Value::Literal(_) => None,
        }
    }
}

/// Pipeline parameter type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ParameterType {
    Integer,
    String,
    Float,
    Boolean,
}

/// Named pipeline parameter with a default, substitutable at submission
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub parameter_type: ParameterType,
    pub default_value: serde_json::Value,
}

impl Parameter {
    pub fn integer(name: impl Into<String>, default_value: i64) -> Self {
        Self {
            name: name.into(),
            parameter_type: ParameterType::Integer,
            default_value: default_value.into(),
        }
    }

    pub fn string(name: impl Into<String>, default_value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameter_type: ParameterType::String,
            default_value: serde_json::Value::String(default_value.into()),
        }
    }

    /// Deferred value bound to this parameter
    pub fn value(&self) -> Value {
        Value::Deferred(Reference::Parameter(self.name.clone()))
    }
}

/// Processing job input channel
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingInput {
    pub name: String,
    pub source: Value,
    pub destination: String,
}

/// Processing job output channel
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingOutput {
    pub name: String,
    pub source: String,
    pub destination: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingSpec {
    pub job_name: Option<Value>,
    pub role_arn: String,
    pub image_uri: String,
    pub instance_type: String,
    pub instance_count: Value,
    pub volume_size_gb: u32,
    pub entrypoint: Vec<String>,
    pub inputs: Vec<ProcessingInput>,
    pub outputs: Vec<ProcessingOutput>,
}

/// Training data channel
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingChannel {
    pub name: String,
    pub s3_uri: Value,
    pub content_type: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSpec {
    pub job_name: Option<Value>,
    pub role_arn: String,
    pub image_uri: String,
    pub instance_type: String,
    pub instance_count: Value,
    pub volume_size_gb: u32,
    pub output_path: String,
    pub max_runtime_secs: u64,
    pub hyperparameters: BTreeMap<String, String>,
    pub channels: Vec<TrainingChannel>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelSpec {
    pub model_name: Option<Value>,
    pub role_arn: String,
    pub image_uri: String,
    pub model_data: Value,
    pub environment: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LambdaSpec {
    pub function: Value,
    pub payload: Vec<(String, Value)>,
    pub output_parameters: Vec<String>,
}

/// Step kind variants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Processing,
    Training,
    CreateModel,
    Lambda,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepKind::Processing => write!(f, "process"),
            StepKind::Training => write!(f, "train"),
            StepKind::CreateModel => write!(f, "create-model"),
            StepKind::Lambda => write!(f, "notify"),
        }
    }
}

/// Kind-specific step configuration
#[derive(Debug, Clone, PartialEq)]
pub enum StepSpec {
    Processing(ProcessingSpec),
    Training(TrainingSpec),
    CreateModel(ModelSpec),
    Lambda(LambdaSpec),
}

/// Named unit of work in a pipeline or workflow graph
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub name: String,
    pub spec: StepSpec,
}

impl Step {
    pub fn new(name: impl Into<String>, spec: StepSpec) -> Self {
        Self {
            name: name.into(),
            spec,
        }
    }

    pub fn kind(&self) -> StepKind {
        match self.spec {
            StepSpec::Processing(_) => StepKind::Processing,
            StepSpec::Training(_) => StepKind::Training,
            StepSpec::CreateModel(_) => StepKind::CreateModel,
            StepSpec::Lambda(_) => StepKind::Lambda,
        }
    }

    /// Deferred value for one of this step's runtime properties.
    ///
    /// Nothing is checked here; graph construction rejects paths the step
    /// does not declare.
    pub fn property(&self, output: PropertyPath) -> Value {
        Value::step_output(self.name.clone(), output)
    }

    /// Labelled input values of the step
    pub fn inputs(&self) -> Vec<(String, &Value)> {
        let mut inputs = Vec::new();
        match &self.spec {
            StepSpec::Processing(spec) => {
                if let Some(job_name) = &spec.job_name {
                    inputs.push(("ProcessingJobName".to_string(), job_name));
                }
                inputs.push(("InstanceCount".to_string(), &spec.instance_count));
                for input in &spec.inputs {
                    inputs.push((format!("ProcessingInputs['{}']", input.name), &input.source));
                }
            }
            StepSpec::Training(spec) => {
                if let Some(job_name) = &spec.job_name {
                    inputs.push(("TrainingJobName".to_string(), job_name));
                }
                inputs.push(("InstanceCount".to_string(), &spec.instance_count));
                for channel in &spec.channels {
                    inputs.push((format!("InputDataConfig['{}']", channel.name), &channel.s3_uri));
                }
            }
            StepSpec::CreateModel(spec) => {
                if let Some(model_name) = &spec.model_name {
                    inputs.push(("ModelName".to_string(), model_name));
                }
                inputs.push(("ModelDataUrl".to_string(), &spec.model_data));
            }
            StepSpec::Lambda(spec) => {
                inputs.push(("FunctionName".to_string(), &spec.function));
                for (key, value) in &spec.payload {
                    inputs.push((format!("Payload['{}']", key), value));
                }
            }
        }
        inputs
    }

    /// Deferred references among the step's inputs
    pub fn references(&self) -> Vec<&Reference> {
        self.inputs()
            .into_iter()
            .filter_map(|(_, value)| value.reference())
            .collect()
    }

    /// Runtime properties this step produces
    pub fn declared_outputs(&self) -> Vec<PropertyPath> {
        match &self.spec {
            StepSpec::Processing(spec) => spec
                .outputs
                .iter()
                .map(|output| PropertyPath::processing_output(&output.name))
                .collect(),
            StepSpec::Training(_) => vec![PropertyPath::model_artifacts()],
            StepSpec::CreateModel(_) => vec![PropertyPath::model_name()],
            StepSpec::Lambda(spec) => spec
                .output_parameters
                .iter()
                .map(|name| PropertyPath::lambda_output(name))
                .collect(),
        }
    }
}
