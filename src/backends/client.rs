//! Signed AWS JSON-protocol client shared by all backends

use crate::backends::sigv4::{amz_date, Credentials, SigningRequest};
use crate::error::{SagePipeError, Result};
use chrono::Utc;
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value as Json;
use std::collections::BTreeMap;
use tracing::{debug, error};

/// Wire-level description of one service
#[derive(Debug, Clone, Copy)]
pub struct ServiceSpec {
    /// Name used in errors and logs
    pub name: &'static str,
    /// Endpoint prefix and SigV4 signing name
    pub signing_name: &'static str,
    /// `X-Amz-Target` prefix
    pub target_prefix: &'static str,
    /// `application/x-amz-json-{version}`
    pub json_version: &'static str,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "__type")]
    error_type: Option<String>,
    #[serde(alias = "Message")]
    message: Option<String>,
}

/// Client for one service in one region
#[derive(Debug, Clone)]
pub struct AwsJsonClient {
    http: Client,
    endpoint: Url,
    region: String,
    service: ServiceSpec,
    credentials: Credentials,
}

impl AwsJsonClient {
    /// Create a client. `endpoint_url` overrides the regional endpoint.
    pub fn new(
        service: ServiceSpec,
        region: &str,
        endpoint_url: Option<&str>,
        credentials: Credentials,
    ) -> Result<Self> {
        let endpoint = match endpoint_url {
            Some(url) => Url::parse(url)?,
            None => Url::parse(&format!(
                "https://{}.{}.amazonaws.com/",
                service.signing_name, region
            ))?,
        };

        let http = Client::builder()
            .user_agent(format!("sagepipe/{}", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            endpoint,
            region: region.to_string(),
            service,
            credentials,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn host(&self) -> Result<String> {
        let host = self
            .endpoint
            .host_str()
            .ok_or_else(|| SagePipeError::Validation(format!("Endpoint '{}' has no host", self.endpoint)))?;
        Ok(match self.endpoint.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        })
    }

    /// Invoke `operation` with a JSON body and decode the JSON response
    pub async fn call<T: DeserializeOwned>(&self, operation: &str, body: &Json) -> Result<T> {
        let payload = serde_json::to_vec(body)?;
        let now = Utc::now();

        let mut headers = BTreeMap::new();
        headers.insert(
            "content-type".to_string(),
            format!("application/x-amz-json-{}", self.service.json_version),
        );
        headers.insert("host".to_string(), self.host()?);
        headers.insert("x-amz-date".to_string(), amz_date(&now));
        headers.insert(
            "x-amz-target".to_string(),
            format!("{}.{}", self.service.target_prefix, operation),
        );
        if let Some(token) = &self.credentials.session_token {
            headers.insert("x-amz-security-token".to_string(), token.clone());
        }

        let authorization = SigningRequest {
            credentials: &self.credentials,
            region: &self.region,
            service: self.service.signing_name,
            time: now,
            headers: &headers,
            payload: &payload,
        }
        .authorization()?;

        debug!("{} {} -> {}", self.service.name, operation, self.endpoint);

        let mut request = self.http.post(self.endpoint.clone());
        for (name, value) in headers.iter().filter(|(name, _)| name.as_str() != "host") {
            request = request.header(name.as_str(), value.as_str());
        }
        let response = request
            .header("authorization", authorization)
            .body(payload)
            .send()
            .await?;

        let status = response.status();
        let bytes = response.bytes().await?;

        if !status.is_success() {
            let err = parse_error(self.service.name, status.as_u16(), &bytes);
            error!("{} {} failed: {}", self.service.name, operation, err);
            return Err(err);
        }

        if bytes.is_empty() {
            return Ok(serde_json::from_str("{}")?);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Map an error response to `SagePipeError::Backend`.
///
/// `__type` may be namespaced (`com.amazonaws.sagemaker#ValidationException`)
/// or carry a suffix after `:`; only the bare code is kept.
pub fn parse_error(service: &'static str, status: u16, body: &[u8]) -> SagePipeError {
    let parsed: Option<ErrorBody> = serde_json::from_slice(body).ok();
    let (error_type, message) = match parsed {
        Some(body) => (body.error_type, body.message),
        None => (None, None),
    };

    let code = error_type
        .as_deref()
        .and_then(|t| t.rsplit('#').next())
        .and_then(|t| t.split(':').next())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP{}", status));

    SagePipeError::Backend {
        service,
        code,
        message: message.unwrap_or_else(|| String::from_utf8_lossy(body).into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPEC: ServiceSpec = ServiceSpec {
        name: "SSM",
        signing_name: "ssm",
        target_prefix: "AmazonSSM",
        json_version: "1.1",
    };

    #[test]
    fn test_default_endpoint() {
        let client = AwsJsonClient::new(SPEC, "eu-west-1", None, Credentials::new("a", "b")).unwrap();
        assert_eq!(client.endpoint().as_str(), "https://ssm.eu-west-1.amazonaws.com/");
        assert_eq!(client.host().unwrap(), "ssm.eu-west-1.amazonaws.com");
    }

    #[test]
    fn test_endpoint_override_keeps_port() {
        let client = AwsJsonClient::new(
            SPEC,
            "eu-west-1",
            Some("http://127.0.0.1:4566"),
            Credentials::new("a", "b"),
        )
        .unwrap();
        assert_eq!(client.host().unwrap(), "127.0.0.1:4566");
    }

    #[test]
    fn test_parse_namespaced_error() {
        let err = parse_error(
            "SageMaker",
            400,
            br#"{"__type": "com.amazonaws.sagemaker#ValidationException", "Message": "Pipeline already exists"}"#,
        );
        assert_eq!(err.backend_code(), Some("ValidationException"));
        assert!(err.to_string().contains("Pipeline already exists"));
    }

    #[test]
    fn test_parse_plain_error() {
        let err = parse_error(
            "StepFunctions",
            400,
            br#"{"__type": "StateMachineAlreadyExists", "message": "State Machine Already Exists: 'arn'"}"#,
        );
        assert_eq!(err.backend_code(), Some("StateMachineAlreadyExists"));
    }

    #[test]
    fn test_parse_unstructured_error() {
        let err = parse_error("SSM", 503, b"Service Unavailable");
        assert_eq!(err.backend_code(), Some("HTTP503"));
        assert!(err.to_string().contains("Service Unavailable"));
    }
}
