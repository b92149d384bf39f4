//! Lambda custom runtime entry point for the notifier

use sagepipe::backends::credentials;
use sagepipe::backends::ssm::SsmClient;
use sagepipe::config::Settings;
use sagepipe::logging::{init_logging, LogConfig};
use sagepipe::notifier::runtime::{serve, RuntimeClient};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging(&LogConfig::lambda())?;

    // Lambda provides AWS_REGION and the execution role's credentials
    let mut settings = Settings::load(None)?;
    let credentials = credentials::resolve(&mut settings).await?;
    let store = SsmClient::new(
        &settings.region,
        settings.endpoint_url.as_deref(),
        credentials,
    )?;
    let runtime = RuntimeClient::from_env()?;

    info!(
        "Notifier runtime started, writing parameter '{}'",
        settings.parameter_name
    );
    serve(&runtime, &store, &settings.parameter_name).await?;

    Ok(())
}
