//! Framework container image lookup
//!
//! Resolves the ECR URI of the first-party SageMaker framework images used by
//! the built-in pipelines. Only the frameworks and versions the pipelines
//! reference are registered.

use crate::error::{SagePipeError, Result};

/// Supported framework images
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framework {
    Xgboost,
    SkLearn,
}

impl Framework {
    fn repository(&self) -> &'static str {
        match self {
            Framework::Xgboost => "sagemaker-xgboost",
            Framework::SkLearn => "sagemaker-scikit-learn",
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Framework::Xgboost => "xgboost",
            Framework::SkLearn => "sklearn",
        }
    }
}

// Both repositories are published from the same account in each region
const REGISTRY_ACCOUNTS: &[(&str, &str)] = &[
    ("ap-northeast-1", "354813040037"),
    ("ap-southeast-1", "121021644041"),
    ("ap-southeast-2", "783357654285"),
    ("eu-central-1", "492215442770"),
    ("eu-west-1", "141502667606"),
    ("us-east-1", "683313688378"),
    ("us-east-2", "257758044811"),
    ("us-west-2", "246618743249"),
];

/// Container image request
#[derive(Debug, Clone)]
pub struct ImageSpec<'a> {
    pub framework: Framework,
    pub region: &'a str,
    pub version: &'a str,
    pub py_version: &'a str,
    pub instance_type: &'a str,
}

/// Whether an instance type carries a GPU
fn is_gpu_instance(instance_type: &str) -> bool {
    let family = instance_type
        .strip_prefix("ml.")
        .unwrap_or(instance_type)
        .split('.')
        .next()
        .unwrap_or_default();
    family.starts_with('p') || family.starts_with('g')
}

/// Resolve the image URI for a framework, e.g.
/// `121021644041.dkr.ecr.ap-southeast-1.amazonaws.com/sagemaker-xgboost:1.0-1-cpu-py3`
pub fn retrieve(spec: &ImageSpec<'_>) -> Result<String> {
    let account = REGISTRY_ACCOUNTS
        .iter()
        .find(|(region, _)| *region == spec.region)
        .map(|(_, account)| *account)
        .ok_or_else(|| SagePipeError::UnsupportedImage {
            framework: spec.framework.name().to_string(),
            region: spec.region.to_string(),
        })?;

    let processor = if is_gpu_instance(spec.instance_type) {
        if spec.framework == Framework::SkLearn {
            return Err(SagePipeError::Validation(format!(
                "sklearn images do not support GPU instance type '{}'",
                spec.instance_type
            )));
        }
        "gpu"
    } else {
        "cpu"
    };

    Ok(format!(
        "{}.dkr.ecr.{}.amazonaws.com/{}:{}-{}-{}",
        account,
        spec.region,
        spec.framework.repository(),
        spec.version,
        processor,
        spec.py_version
    ))
}
