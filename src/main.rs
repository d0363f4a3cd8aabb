/// Dropkeep - ephemeral password-gated file drop
use dropkeep::{
    config::{LogFormat, ServerConfig},
    context::AppContext,
    error::DropResult,
    janitor::Janitor,
    server,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> DropResult<()> {
    // Load configuration first so the log format can be chosen
    let config = ServerConfig::from_env()?;

    init_tracing(config.logging.format);

    let ctx = AppContext::new(config).await?;

    let janitor = Janitor::new(ctx.clone()).start();

    let result = server::serve(ctx).await;

    janitor.shutdown().await;
    tracing::info!("Dropkeep stopped");

    result
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "dropkeep=info,tower_http=info".into());

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }
}
