use std::sync::Arc;

use widgetsync_mock::run;
use widgetsync_mock::settings::Settings;

#[tokio::main]
async fn main() {
    let settings = Arc::new(Settings::new().expect("Failed to load settings."));

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            let level = settings.client.logger.level.as_str();

            format!("widgetsync_mock={level},widgetsync_client={level}").into()
        }))
        .init();

    if let Err(e) = run(&settings).await {
        tracing::error!("Mock dashboard stopped: {e}");
    }
}
