//! Host credentials and region from the AWS default provider chain
//!
//! Sources, in chain order: environment variables, shared `credentials` and
//! `config` files (honouring `AWS_PROFILE`, SSO and assume-role profiles),
//! web identity, then ECS and EC2 instance metadata.

use crate::backends::sigv4::Credentials;
use crate::config::Settings;
use crate::error::{SagePipeError, Result};
use aws_config::BehaviorVersion;
use aws_credential_types::provider::ProvideCredentials;
use tracing::{debug, info};

/// Resolve credentials for the backends.
///
/// When `settings` has no explicit region, the profile's region (if any) is
/// adopted so endpoints, image URIs and the default bucket follow it.
pub async fn resolve(settings: &mut Settings) -> Result<Credentials> {
    let sdk_config = aws_config::defaults(BehaviorVersion::latest()).load().await;

    if let Some(region) = sdk_config.region() {
        if !settings.region_configured() {
            info!("Using region '{}' from the AWS profile", region);
        }
        settings.apply_host_region(region.as_ref());
    }

    let provider = sdk_config.credentials_provider().ok_or_else(|| {
        SagePipeError::Credentials("no AWS credentials provider available".to_string())
    })?;
    let resolved = provider
        .provide_credentials()
        .await
        .map_err(|e| SagePipeError::Credentials(e.to_string()))?;

    debug!("Resolved AWS credentials for key {}", resolved.access_key_id());
    Ok(Credentials::from(resolved))
}
