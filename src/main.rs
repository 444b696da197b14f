use clap::Parser;
use henkan::{create_app, memory, startup, Config};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// How long in-flight requests may keep draining after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "henkan.toml")]
    config: PathBuf,

    #[arg(short, long)]
    port: Option<u16>,

    #[arg(long)]
    host: Option<String>,

    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = if args.config.exists() {
        let config_content = std::fs::read_to_string(&args.config)?;
        toml::from_str::<Config>(&config_content)?
    } else {
        info!("Config file not found at {:?}, using defaults", args.config);
        Config::default()
    };

    apply_overrides(&mut config, &args);

    let log_level = std::env::var("HENKAN_LOG").unwrap_or(args.log_level);
    let level = match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    report_memory_budget();

    let debug_env = std::env::var("DEBUG").unwrap_or_default();
    if debug_env == "henkan" || debug_env == "*" {
        match toml::to_string(&config) {
            Ok(dump) => tracing::debug!("Effective configuration:\n{dump}"),
            Err(err) => tracing::debug!("Cannot serialize configuration: {err}"),
        }
    }

    if let Err(err) = startup::perform_startup_checks(&config) {
        error!("Cannot start the server: {err}");
        std::process::exit(1);
    }

    info!("Starting henkan {}", henkan::VERSION);
    info!(
        host = %config.server.host,
        port = config.server.port,
        path_prefix = %config.server.path_prefix,
        url_source = config.sources.enable_url_source,
        mount = %config.sources.mount,
        "Configuration loaded"
    );

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let app = match create_app(config).await {
        Ok(app) => app,
        Err(err) => {
            error!("Cannot start the server: {err}");
            std::process::exit(1);
        }
    };

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on {addr}");

    // The drain phase is bounded: once the shutdown signal fires, in-flight
    // requests get 5 seconds before the server is cut off.
    let (drain_tx, drain_rx) = tokio::sync::oneshot::channel::<()>();
    let mut server = std::pin::pin!(
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown_signal().await;
                let _ = drain_tx.send(());
            })
            .into_future()
    );

    tokio::select! {
        result = &mut server => result?,
        _ = drain_rx => {
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await {
                Ok(result) => result?,
                Err(_) => error!("Graceful shutdown timed out, aborting open connections"),
            }
        }
    }

    info!("Server shutdown completed");
    Ok(())
}

fn apply_overrides(config: &mut Config, args: &Args) {
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(ref host) = args.host {
        config.server.host = host.clone();
    }
    if let Ok(port) = std::env::var("PORT") {
        if let Ok(port) = port.parse::<u16>() {
            if port > 0 {
                config.server.port = port;
            }
        }
    }
    if let Ok(key) = std::env::var("URL_SIGNATURE_KEY") {
        if !key.is_empty() {
            config.security.url_signature_key = key;
        }
    }
}

/// Log the allocator budget derived from `UNIKERNEL_MEMORY`. An unset
/// variable is fine; a malformed one is a fatal configuration error.
fn report_memory_budget() {
    if std::env::var("UNIKERNEL_MEMORY").unwrap_or_default().is_empty() {
        return;
    }
    match memory::unikernel_memory() {
        Ok(limit) => {
            info!(
                memory_limit_bytes = limit,
                budget_bytes = memory::allocator_budget(limit),
                "Memory budget configured"
            );
        }
        Err(err) => {
            error!("Cannot start the server: {err}");
            std::process::exit(1);
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received shutdown signal, draining in-flight requests");
}
