//! Notification function: records the latest model name
//!
//! Invoked as the final step of either pipeline variant with
//! `{"model_name": "<name>"}` and writes that name to the parameter store.

pub mod runtime;

use crate::backends::ParameterStore;
use crate::error::{SagePipeError, Result};
use serde::Serialize;
use serde_json::Value as Json;
use tracing::info;

pub const MODEL_NAME_FIELD: &str = "model_name";

/// Lambda proxy-style response
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifierResponse {
    pub status_code: u16,
    pub body: String,
}

impl NotifierResponse {
    fn ok(message: &str) -> Result<Self> {
        Ok(Self {
            status_code: 200,
            body: serde_json::to_string(message)?,
        })
    }
}

/// Handle one invocation.
///
/// The event is checked before anything is written; overwrites are
/// last-write-wins.
pub async fn handle(
    event: &Json,
    store: &dyn ParameterStore,
    parameter_name: &str,
) -> Result<NotifierResponse> {
    let model_name = event
        .get(MODEL_NAME_FIELD)
        .and_then(Json::as_str)
        .ok_or_else(|| SagePipeError::MissingField(MODEL_NAME_FIELD.to_string()))?;

    let version = store.put_parameter(parameter_name, model_name, true).await?;
    info!(
        "Recorded model '{}' in parameter '{}' (version {})",
        model_name, parameter_name, version
    );

    NotifierResponse::ok("Hello from Lambda!")
}
