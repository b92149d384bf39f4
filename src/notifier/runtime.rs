//! Lambda custom runtime loop for the notifier
//!
//! Talks to the Runtime API at `http://$AWS_LAMBDA_RUNTIME_API/2018-06-01`:
//! fetch the next invocation, run [`handle`], post the response or the error.

use crate::backends::ParameterStore;
use crate::error::{SagePipeError, Result};
use crate::notifier::handle;
use reqwest::{Client, Url};
use serde::Serialize;
use serde_json::Value as Json;
use tracing::{error, info};

const API_VERSION: &str = "2018-06-01";
const REQUEST_ID_HEADER: &str = "Lambda-Runtime-Aws-Request-Id";
const ERROR_TYPE_HEADER: &str = "Lambda-Runtime-Function-Error-Type";

/// One pending invocation
#[derive(Debug, Clone)]
pub struct Invocation {
    pub request_id: String,
    pub event: Json,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InvocationError {
    error_message: String,
    error_type: String,
}

/// Error type label reported to the runtime
pub fn error_type(err: &SagePipeError) -> &'static str {
    match err {
        SagePipeError::MissingField(_) => "MissingField",
        SagePipeError::Backend { .. } => "BackendError",
        SagePipeError::Json(_) => "InvalidEvent",
        SagePipeError::Http(_) => "HttpError",
        SagePipeError::Credentials(_) => "CredentialsError",
        _ => "SagePipeError",
    }
}

/// Runtime API client
#[derive(Debug, Clone)]
pub struct RuntimeClient {
    http: Client,
    base: Url,
}

impl RuntimeClient {
    /// `api` is the `host:port` from `AWS_LAMBDA_RUNTIME_API`
    pub fn new(api: &str) -> Result<Self> {
        let base = Url::parse(&format!("http://{}/{}/runtime/", api, API_VERSION))?;
        // Long-polls on /next, so no request timeout
        let http = Client::builder().build()?;
        Ok(Self { http, base })
    }

    pub fn from_env() -> Result<Self> {
        let api = std::env::var("AWS_LAMBDA_RUNTIME_API").map_err(|_| {
            SagePipeError::MissingConfig("AWS_LAMBDA_RUNTIME_API is not set".to_string())
        })?;
        Self::new(&api)
    }

    /// Block until the next invocation is available
    pub async fn next_invocation(&self) -> Result<Invocation> {
        let response = self
            .http
            .get(self.base.join("invocation/next")?)
            .send()
            .await?
            .error_for_status()?;

        let request_id = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                SagePipeError::Validation(format!("Invocation without {} header", REQUEST_ID_HEADER))
            })?;
        let event = response.json().await?;

        Ok(Invocation { request_id, event })
    }

    pub async fn send_response<T: Serialize + ?Sized>(&self, request_id: &str, body: &T) -> Result<()> {
        self.http
            .post(self.base.join(&format!("invocation/{}/response", request_id))?)
            .json(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn send_error(&self, request_id: &str, err: &SagePipeError) -> Result<()> {
        let kind = error_type(err);
        self.http
            .post(self.base.join(&format!("invocation/{}/error", request_id))?)
            .header(ERROR_TYPE_HEADER, kind)
            .json(&InvocationError {
                error_message: err.to_string(),
                error_type: kind.to_string(),
            })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Process exactly one invocation.
///
/// Handler errors are reported to the runtime and do not fail the loop;
/// only Runtime API failures are returned.
pub async fn serve_one(
    runtime: &RuntimeClient,
    store: &dyn ParameterStore,
    parameter_name: &str,
) -> Result<()> {
    let invocation = runtime.next_invocation().await?;
    info!("Invocation {}", invocation.request_id);

    match handle(&invocation.event, store, parameter_name).await {
        Ok(response) => runtime.send_response(&invocation.request_id, &response).await,
        Err(err) => {
            error!("Invocation {} failed: {}", invocation.request_id, err);
            runtime.send_error(&invocation.request_id, &err).await
        }
    }
}

/// Serve invocations until the Runtime API fails
pub async fn serve(
    runtime: &RuntimeClient,
    store: &dyn ParameterStore,
    parameter_name: &str,
) -> Result<()> {
    loop {
        serve_one(runtime, store, parameter_name).await?;
    }
}
