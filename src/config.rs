//! Layered settings: built-in defaults, optional config file, environment
//!
//! Precedence (lowest to highest):
//! 1. defaults below
//! 2. config file (`config.json` by default; format picked from the extension)
//! 3. `SAGEPIPE_*` environment variables (e.g. `SAGEPIPE_BUCKET`)
//! 4. `SAGEMAKER_ROLE`, `WORKFLOW_ROLE`, `AWS_REGION`
//!
//! A region left unset by all of these falls back to the host's AWS profile
//! once credentials are resolved (see [`crate::backends::credentials`]), and
//! to [`DEFAULT_REGION`] for purely local commands.

use crate::error::{SagePipeError, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

pub const DEFAULT_CONFIG_FILE: &str = "config.json";
pub const DEFAULT_REGION: &str = "ap-southeast-1";
pub const DEFAULT_PARAMETER_NAME: &str = "HelloModelNameSps";

/// Settings shared by both pipeline variants and the notifier
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub region: String,
    #[serde(skip)]
    region_configured: bool,
    #[serde(default)]
    pub sagemaker_role: String,
    pub workflow_role: Option<String>,
    pub bucket: Option<String>,
    pub pipeline_name: String,
    pub workflow_name: String,
    pub lambda_function_name: String,
    pub lambda_function_arn: Option<String>,
    pub processing_instance_type: String,
    pub training_instance_type: String,
    pub endpoint_url: Option<String>,
    pub poll_delay_secs: u64,
    pub max_attempts: u32,
    pub parameter_name: String,
}

impl Settings {
    /// Load settings from `path` (missing file is fine) and the process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, std::env::vars().collect())
    }

    /// Load settings from `path` and an explicit environment map
    pub fn load_with_env(path: Option<&Path>, env: HashMap<String, String>) -> Result<Self> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));

        let mut settings: Settings = Config::builder()
            .set_default("pipeline_name", "AbalonePipelineTestPrintName")?
            .set_default("workflow_name", "StepFunctionWorkFlow")?
            .set_default("lambda_function_name", "LambdaRecordModelName")?
            .set_default("processing_instance_type", "ml.m5.xlarge")?
            .set_default("training_instance_type", "ml.m5.xlarge")?
            .set_default("poll_delay_secs", 30_i64)?
            .set_default("max_attempts", 60_i64)?
            .set_default("parameter_name", DEFAULT_PARAMETER_NAME)?
            .add_source(File::from(path).required(false))
            .add_source(
                Environment::with_prefix("SAGEPIPE")
                    .try_parsing(true)
                    .source(Some(env.clone())),
            )
            .set_override_option("sagemaker_role", env.get("SAGEMAKER_ROLE").cloned())?
            .set_override_option("workflow_role", env.get("WORKFLOW_ROLE").cloned())?
            .set_override_option("region", env.get("AWS_REGION").cloned())?
            .build()?
            .try_deserialize()?;

        if settings.max_attempts == 0 {
            return Err(SagePipeError::Validation(
                "max_attempts must be at least 1".to_string(),
            ));
        }

        settings.region_configured = !settings.region.is_empty();
        if !settings.region_configured {
            settings.region = DEFAULT_REGION.to_string();
        }

        Ok(settings)
    }

    /// Whether `region` came from configuration rather than the built-in default
    pub fn region_configured(&self) -> bool {
        self.region_configured
    }

    /// Adopt `region` unless one was configured explicitly
    pub fn apply_host_region(&mut self, region: &str) {
        if !self.region_configured && !region.is_empty() {
            self.region = region.to_string();
            self.region_configured = true;
        }
    }

    /// Role assumed by SageMaker jobs
    pub fn sagemaker_role(&self) -> Result<&str> {
        if self.sagemaker_role.is_empty() {
            return Err(SagePipeError::MissingConfig(
                "sagemaker_role (SAGEMAKER_ROLE)".to_string(),
            ));
        }
        Ok(&self.sagemaker_role)
    }

    /// Role assumed by the Step Functions state machine
    pub fn workflow_role(&self) -> Result<&str> {
        self.workflow_role
            .as_deref()
            .filter(|role| !role.is_empty())
            .ok_or_else(|| SagePipeError::MissingConfig("workflow_role (WORKFLOW_ROLE)".to_string()))
    }

    /// Account id taken from the SageMaker role ARN
    pub fn account_id(&self) -> Result<&str> {
        let role = self.sagemaker_role()?;
        role.split(':')
            .nth(4)
            .filter(|account| account.len() == 12 && account.chars().all(|c| c.is_ascii_digit()))
            .ok_or_else(|| {
                SagePipeError::MissingConfig(format!(
                    "cannot derive account id from role '{}'; set bucket and lambda_function_arn",
                    role
                ))
            })
    }

    /// Bucket holding data and artifacts; defaults to the SageMaker default bucket
    pub fn bucket(&self) -> Result<String> {
        match &self.bucket {
            Some(bucket) if !bucket.is_empty() => Ok(bucket.clone()),
            _ => Ok(format!("sagemaker-{}-{}", self.region, self.account_id()?)),
        }
    }

    /// ARN of the notifier function invoked by the pipeline's lambda step
    pub fn lambda_function_arn(&self) -> Result<String> {
        match &self.lambda_function_arn {
            Some(arn) if !arn.is_empty() => Ok(arn.clone()),
            _ => Ok(format!(
                "arn:aws:lambda:{}:{}:function:{}",
                self.region,
                self.account_id()?,
                self.lambda_function_name
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const ROLE: &str = "arn:aws:iam::123456789012:role/SageMakerRole";

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::load_with_env(
            Some(Path::new("/nonexistent/config.json")),
            env(&[("SAGEMAKER_ROLE", ROLE)]),
        )
        .unwrap();

        assert_eq!(settings.region, "ap-southeast-1");
        assert!(!settings.region_configured());
        assert_eq!(settings.pipeline_name, "AbalonePipelineTestPrintName");
        assert_eq!(settings.workflow_name, "StepFunctionWorkFlow");
        assert_eq!(settings.poll_delay_secs, 30);
        assert_eq!(settings.max_attempts, 60);
        assert_eq!(settings.parameter_name, "HelloModelNameSps");
        assert_eq!(settings.sagemaker_role().unwrap(), ROLE);
    }

    #[test]
    fn test_derived_values() {
        let settings = Settings::load_with_env(
            Some(Path::new("/nonexistent/config.json")),
            env(&[("SAGEMAKER_ROLE", ROLE)]),
        )
        .unwrap();

        assert_eq!(settings.account_id().unwrap(), "123456789012");
        assert_eq!(
            settings.bucket().unwrap(),
            "sagemaker-ap-southeast-1-123456789012"
        );
        assert_eq!(
            settings.lambda_function_arn().unwrap(),
            "arn:aws:lambda:ap-southeast-1:123456789012:function:LambdaRecordModelName"
        );
    }

    #[test]
    fn test_file_then_env_precedence() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{
                "sagemaker_role": "{}",
                "workflow_role": "arn:aws:iam::123456789012:role/FromFile",
                "bucket": "file-bucket",
                "region": "us-east-1"
            }}"#,
            ROLE
        )
        .unwrap();

        let settings = Settings::load_with_env(
            Some(file.path()),
            env(&[
                ("SAGEPIPE_BUCKET", "env-bucket"),
                ("WORKFLOW_ROLE", "arn:aws:iam::123456789012:role/FromEnv"),
            ]),
        )
        .unwrap();

        assert_eq!(settings.region, "us-east-1");
        assert!(settings.region_configured());
        assert_eq!(settings.bucket().unwrap(), "env-bucket");
        assert_eq!(
            settings.workflow_role().unwrap(),
            "arn:aws:iam::123456789012:role/FromEnv"
        );
    }

    #[test]
    fn test_missing_roles() {
        let settings =
            Settings::load_with_env(Some(Path::new("/nonexistent/config.json")), HashMap::new())
                .unwrap();

        assert!(matches!(
            settings.sagemaker_role(),
            Err(SagePipeError::MissingConfig(_))
        ));
        assert!(matches!(
            settings.workflow_role(),
            Err(SagePipeError::MissingConfig(_))
        ));
        assert!(settings.bucket().is_err());
    }

    #[test]
    fn test_account_id_requires_arn() {
        let settings = Settings::load_with_env(
            Some(Path::new("/nonexistent/config.json")),
            env(&[("SAGEMAKER_ROLE", "SageMakerRole")]),
        )
        .unwrap();

        assert!(matches!(
            settings.account_id(),
            Err(SagePipeError::MissingConfig(_))
        ));
    }

    #[test]
    fn test_zero_max_attempts_rejected() {
        let result = Settings::load_with_env(
            Some(Path::new("/nonexistent/config.json")),
            env(&[("SAGEMAKER_ROLE", ROLE), ("SAGEPIPE_MAX_ATTEMPTS", "0")]),
        );
        assert!(matches!(result, Err(SagePipeError::Validation(_))));
    }

    #[test]
    fn test_host_region_only_fills_default() {
        let mut settings = Settings::load_with_env(
            Some(Path::new("/nonexistent/config.json")),
            env(&[("SAGEMAKER_ROLE", ROLE)]),
        )
        .unwrap();
        settings.apply_host_region("eu-west-2");
        assert_eq!(settings.region, "eu-west-2");
        assert_eq!(
            settings.bucket().unwrap(),
            "sagemaker-eu-west-2-123456789012"
        );

        let mut settings = Settings::load_with_env(
            Some(Path::new("/nonexistent/config.json")),
            env(&[("SAGEMAKER_ROLE", ROLE), ("AWS_REGION", "us-east-1")]),
        )
        .unwrap();
        settings.apply_host_region("eu-west-2");
        assert_eq!(settings.region, "us-east-1");
    }
}
