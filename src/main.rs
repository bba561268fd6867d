use anyhow::Context;
use clap::{Parser, ValueEnum};
use cloudflare::framework::{Environment, HttpApiClientConfig};
use cloudflarext::{custom_environment, AuthlessClient};
use kube::Client as K8sClient;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tunnel_controller::{config::Settings, TunnelController};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Runs cloudflared for every CloudflareTunnel in the cluster.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    /// Cloudflare api base url, defaults to the public v4 api
    #[arg(long, env = "CLOUDFLARE_API_URL")]
    cloudflare_api_url: Option<url::Url>,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    match format {
        LogFormat::Text => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let environment = match cli.cloudflare_api_url {
        Some(url) => custom_environment(url).context("Invalid Cloudflare api url")?,
        None => Environment::Production,
    };

    let kubernetes_client = K8sClient::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let cloudflare_client = AuthlessClient::try_new(HttpApiClientConfig::default(), environment)
        .context("Failed to create Cloudflare client")?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Shutdown requested");
                    shutdown.cancel();
                }
                Err(err) => warn!(error = %err, "Failed to listen for shutdown signal"),
            }
        }
    });

    let tunnel_controller = TunnelController::try_new(
        kubernetes_client,
        Arc::new(cloudflare_client),
        cli.settings,
        shutdown,
    )?;

    tunnel_controller.await
}
