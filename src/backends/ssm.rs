//! Systems Manager Parameter Store backend

use crate::backends::client::{AwsJsonClient, ServiceSpec};
use crate::backends::sigv4::Credentials;
use crate::backends::ParameterStore;
use crate::error::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

pub const SERVICE: ServiceSpec = ServiceSpec {
    name: "SSM",
    signing_name: "ssm",
    target_prefix: "AmazonSSM",
    json_version: "1.1",
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PutParameterResponse {
    version: i64,
}

/// SSM API client
#[derive(Debug, Clone)]
pub struct SsmClient {
    client: AwsJsonClient,
}

impl SsmClient {
    pub fn new(region: &str, endpoint_url: Option<&str>, credentials: Credentials) -> Result<Self> {
        Ok(Self {
            client: AwsJsonClient::new(SERVICE, region, endpoint_url, credentials)?,
        })
    }
}

#[async_trait]
impl ParameterStore for SsmClient {
    async fn put_parameter(&self, name: &str, value: &str, overwrite: bool) -> Result<i64> {
        let response: PutParameterResponse = self
            .client
            .call(
                "PutParameter",
                &json!({
                    "Name": name,
                    "Value": value,
                    "Type": "String",
                    "Overwrite": overwrite,
                }),
            )
            .await?;
        debug!("Parameter '{}' now at version {}", name, response.version);
        Ok(response.version)
    }
}
