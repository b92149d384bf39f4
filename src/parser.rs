//! Parser for exported definition documents
//!
//! Reads a pipeline definition or a state machine definition back from disk
//! and summarizes its steps. Pipeline steps are listed in document order;
//! state machine states follow the `Next` chain from `StartAt`.

use crate::error::{SagePipeError, Result};
use crate::models::{ParameterType, MAX_DEFINITION_SIZE, MAX_STEP_COUNT, MAX_STEP_NAME_LEN};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

/// Which backend a document targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionFormat {
    /// SageMaker pipeline definition
    Pipeline,
    /// Step Functions state machine (Amazon States Language)
    StateMachine,
}

/// One step (or state) of a parsed document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepSummary {
    pub name: String,
    pub step_type: String,
}

/// Parsed and validated definition document
#[derive(Debug, Clone)]
pub struct DefinitionSummary {
    pub format: DefinitionFormat,
    pub parameters: Vec<String>,
    /// Document order for pipelines, chain order for state machines
    pub steps: Vec<StepSummary>,
}

impl DefinitionSummary {
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|step| step.name.as_str()).collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PipelineDocument {
    #[allow(dead_code)]
    version: String,
    #[serde(default)]
    parameters: Vec<ParameterDocument>,
    steps: Vec<StepDocument>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ParameterDocument {
    name: String,
    #[serde(rename = "Type")]
    #[allow(dead_code)]
    parameter_type: ParameterType,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StepDocument {
    name: String,
    #[serde(rename = "Type")]
    step_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StateMachineDocument {
    start_at: String,
    states: HashMap<String, StateDocument>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StateDocument {
    #[serde(rename = "Type")]
    state_type: String,
    next: Option<String>,
    #[serde(default)]
    end: bool,
    resource: Option<String>,
}

/// Parse a definition document from a file.
///
/// # Errors
///
/// * `SagePipeError::Io` - If file cannot be read
/// * `SagePipeError::DefinitionSizeExceeded` - If file exceeds 1MB
/// * `SagePipeError::Json` - If the document is malformed
/// * `SagePipeError::InvalidStepName` / `DuplicateStep` - If step names are invalid
pub fn parse_definition_file<P: AsRef<Path>>(path: P) -> Result<DefinitionSummary> {
    let content = fs::read_to_string(path)?;
    parse_definition_json(&content)
}

/// Parse a definition document from a JSON string.
///
/// The format is detected from the top-level keys: `StartAt` marks a state
/// machine, `Steps` a pipeline definition.
///
/// # Example
///
/// ```
/// use sagepipe::parser::{parse_definition_json, DefinitionFormat};
///
/// let json = r#"{
///     "StartAt": "First",
///     "States": {
///         "First": {"Type": "Pass", "Next": "Second"},
///         "Second": {"Type": "Pass", "End": true}
///     }
/// }"#;
///
/// let summary = parse_definition_json(json)?;
/// assert_eq!(summary.format, DefinitionFormat::StateMachine);
/// assert_eq!(summary.step_names(), vec!["First", "Second"]);
/// # Ok::<(), sagepipe::error::SagePipeError>(())
/// ```
pub fn parse_definition_json(content: &str) -> Result<DefinitionSummary> {
    if content.len() > MAX_DEFINITION_SIZE {
        return Err(SagePipeError::DefinitionSizeExceeded(content.len()));
    }

    let document: serde_json::Value = serde_json::from_str(content)?;
    let summary = if document.get("StartAt").is_some() {
        let machine: StateMachineDocument = serde_json::from_value(document)?;
        summarize_state_machine(machine)?
    } else if document.get("Steps").is_some() {
        let pipeline: PipelineDocument = serde_json::from_value(document)?;
        DefinitionSummary {
            format: DefinitionFormat::Pipeline,
            parameters: pipeline.parameters.into_iter().map(|p| p.name).collect(),
            steps: pipeline
                .steps
                .into_iter()
                .map(|step| StepSummary {
                    name: step.name,
                    step_type: step.step_type,
                })
                .collect(),
        }
    } else {
        return Err(SagePipeError::Validation(
            "Document is neither a pipeline definition nor a state machine".to_string(),
        ));
    };

    if summary.steps.len() > MAX_STEP_COUNT {
        return Err(SagePipeError::StepCountExceeded {
            count: summary.steps.len(),
            limit: MAX_STEP_COUNT,
        });
    }

    let mut seen_names = HashSet::with_capacity(summary.steps.len());
    for step in &summary.steps {
        validate_step_name(&step.name)?;
        if !seen_names.insert(&step.name) {
            return Err(SagePipeError::DuplicateStep(step.name.clone()));
        }
    }

    Ok(summary)
}

/// Walk the `Next` chain from `StartAt`
fn summarize_state_machine(machine: StateMachineDocument) -> Result<DefinitionSummary> {
    let mut steps = Vec::with_capacity(machine.states.len());
    let mut visited = HashSet::new();
    let mut current = Some(machine.start_at);

    while let Some(name) = current {
        if !visited.insert(name.clone()) {
            return Err(SagePipeError::CycleDetected(name));
        }
        let state = machine.states.get(&name).ok_or_else(|| {
            SagePipeError::Validation(format!("State '{}' is not defined", name))
        })?;

        let step_type = match &state.resource {
            Some(resource) => format!("{} ({})", state.state_type, resource),
            None => state.state_type.clone(),
        };
        steps.push(StepSummary {
            name: name.clone(),
            step_type,
        });

        current = match (&state.next, state.end) {
            (Some(next), false) => Some(next.clone()),
            (None, true) => None,
            _ => {
                return Err(SagePipeError::Validation(format!(
                    "State '{}' must have exactly one of Next or End",
                    name
                )))
            }
        };
    }

    if steps.len() != machine.states.len() {
        return Err(SagePipeError::Validation(format!(
            "{} state(s) unreachable from StartAt",
            machine.states.len() - steps.len()
        )));
    }

    Ok(DefinitionSummary {
        format: DefinitionFormat::StateMachine,
        parameters: Vec::new(),
        steps,
    })
}

/// Validate step name format and length
pub fn validate_step_name(name: &str) -> Result<()> {
    // Check empty name
    if name.is_empty() {
        return Err(SagePipeError::InvalidStepName {
            name: name.to_string(),
        });
    }

    // Check length
    if name.len() > MAX_STEP_NAME_LEN {
        return Err(SagePipeError::StepNameTooLong {
            name: name.to_string(),
            max: MAX_STEP_NAME_LEN,
        });
    }

    // Check format: alphanumeric + underscore + dash only
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(SagePipeError::InvalidStepName {
            name: name.to_string(),
        });
    }

    Ok(())
}
