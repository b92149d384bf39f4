//! Error types for sagepipe

use thiserror::Error;

/// sagepipe error types
#[derive(Error, Debug)]
pub enum SagePipeError {
    /// JSON encoding/decoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration loading errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Required configuration value missing or unusable
    #[error("Missing configuration: {0}")]
    MissingConfig(String),

    /// Definition document size exceeded limit
    #[error("Definition document exceeds 1MB limit (size: {0} bytes)")]
    DefinitionSizeExceeded(usize),

    /// Step count exceeded limit
    #[error("Step count {count} exceeds limit of {limit}")]
    StepCountExceeded { count: usize, limit: usize },

    /// Step name validation error
    #[error("Step name '{name}' exceeds {max} characters")]
    StepNameTooLong { name: String, max: usize },

    /// Invalid step name format
    #[error("Invalid step name '{name}': only alphanumeric, underscore, and dash allowed")]
    InvalidStepName { name: String },

    /// Two steps share a name
    #[error("Duplicate step name '{0}'")]
    DuplicateStep(String),

    /// DAG errors
    #[error("Cycle detected in step graph: {0}")]
    CycleDetected(String),

    /// Reference to a step that is not part of the graph
    #[error("Step '{step}' references unknown step '{reference}'")]
    UnknownStep { step: String, reference: String },

    /// Reference to a step that does not precede the referencing step
    #[error("Step '{step}' references '{reference}', which does not precede it")]
    ForwardReference { step: String, reference: String },

    /// Reference to an output the producing step does not declare
    #[error("Step '{step}' references output '{output}' not declared by step '{producer}'")]
    UndeclaredOutput {
        step: String,
        producer: String,
        output: String,
    },

    /// Reference to a pipeline parameter that was not declared
    #[error("Step '{step}' references undeclared parameter '{parameter}'")]
    UnknownParameter { step: String, parameter: String },

    /// Reference to a field missing from the execution input schema
    #[error("Execution input schema has no field '{0}'")]
    UnknownExecutionInput(String),

    /// Required execution input not supplied
    #[error("Execution input '{0}' is required")]
    MissingExecutionInput(String),

    /// Execution input supplied with the wrong type
    #[error("Execution input '{field}' must be a {expected}")]
    InvalidExecutionInput { field: String, expected: String },

    /// State references the output of a state other than its predecessor
    #[error("State '{state}' can only read the output of its predecessor, not '{reference}'")]
    NonAdjacentReference { state: String, reference: String },

    /// Reference kind has no representation in the target encoding
    #[error("{encoding} cannot encode reference {reference}")]
    UnsupportedReference {
        encoding: &'static str,
        reference: String,
    },

    /// Framework image not available for region
    #[error("No {framework} image registered for region '{region}'")]
    UnsupportedImage { framework: String, region: String },

    /// Event field lookup failure
    #[error("Event is missing string field '{0}'")]
    MissingField(String),

    /// AWS credentials not available
    #[error("Credentials error: {0}")]
    Credentials(String),

    /// Error response returned by a backend service
    #[error("{service} {code}: {message}")]
    Backend {
        service: &'static str,
        code: String,
        message: String,
    },

    /// Execution did not reach a terminal state
    #[error("Execution '{arn}' not finished after {attempts} status checks")]
    WaiterExhausted { arn: String, attempts: u32 },

    /// HTTP transport errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),
}

impl SagePipeError {
    /// Backend error code, if this error came from a service response
    pub fn backend_code(&self) -> Option<&str> {
        match self {
            SagePipeError::Backend { code, .. } => Some(code.as_str()),
            _ => None,
        }
    }
}

/// Result type alias using SagePipeError
pub type Result<T> = std::result::Result<T, SagePipeError>;
