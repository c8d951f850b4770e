use clap::Parser;
use nim_proxy::config::config_search_paths;
use nim_proxy::{build_router, AppState, ProxyConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "nim-proxy",
    about = "OpenAI-compatible chat completions proxy for NVIDIA NIM",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Upstream base URL (overrides config)
    #[arg(long)]
    base_url: Option<String>,

    /// Merge reasoning_content into content inside <think> tags
    #[arg(long)]
    show_reasoning: bool,

    /// Request model-side thinking from the upstream
    #[arg(long)]
    thinking_mode: bool,

    /// Always answer with a single buffered response
    #[arg(long)]
    force_non_streaming: bool,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nim_proxy=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.show_config_paths {
        println!("Config search paths:");
        for (i, path) in config_search_paths().iter().enumerate() {
            println!("  {}. {}", i + 1, path.display());
        }
        return Ok(());
    }

    let mut config = ProxyConfig::find_and_load(cli.config.as_deref())?;

    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(base_url) = cli.base_url {
        config.upstream.base_url = base_url;
    }
    config.features.show_reasoning |= cli.show_reasoning;
    config.features.thinking_mode |= cli.thinking_mode;
    config.features.force_non_streaming |= cli.force_non_streaming;

    // Requests fail with server_misconfigured until the key is set; health
    // still answers.
    if let Err(e) = config.resolve_api_key() {
        warn!("{}", e);
    }

    info!("nim-proxy v{}", env!("CARGO_PKG_VERSION"));
    info!("  Upstream:   {}", config.upstream.base_url);
    info!("  Port:       {}", config.port);
    info!("  Reasoning:  {}", if config.features.show_reasoning { "shown" } else { "hidden" });
    info!("  Thinking:   {}", if config.features.thinking_mode { "enabled" } else { "disabled" });
    info!("  Streaming:  {}", if config.features.force_non_streaming { "forced off" } else { "caller choice" });
    info!("  Models:     {} extra mapped", config.models.len());

    // Per-request timeouts are applied in the proxy; a client-wide timeout
    // would cut long streams.
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .build()?;

    let port = config.port;
    let state = Arc::new(AppState::new(config, client));

    let app = build_router(state);
    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("  OPENAI_BASE_URL=http://localhost:{}/v1", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
