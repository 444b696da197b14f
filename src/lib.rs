use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub mod engine;
pub mod errors;
pub mod handlers;
pub mod health;
pub mod memory;
pub mod metrics;
pub mod middleware;
pub mod operations;
pub mod options;
pub mod origins;
pub mod params;
pub mod placeholder;
pub mod signature;
pub mod sources;
pub mod startup;
pub mod throttle;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub placeholder: PlaceholderConfig,
    #[serde(default)]
    pub disabled_endpoints: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Advertised in `Alt-Svc` only; a fronting QUIC listener owns it.
    pub quic_port: u16,
    pub path_prefix: String,
    pub read_timeout_secs: u64,
    pub write_timeout_secs: u64,
    pub cors: bool,
    /// Throttle rate per second; 0 disables throttling.
    pub concurrency: u32,
    pub burst: u32,
    /// -1 disables cache headers entirely.
    pub http_cache_ttl: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8088,
            quic_port: 8443,
            path_prefix: "/".to_string(),
            read_timeout_secs: 60,
            write_timeout_secs: 60,
            cors: false,
            concurrency: 0,
            burst: 100,
            http_cache_ttl: -1,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub url_signature_key: String,
    #[serde(default)]
    pub enable_url_signature: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SourcesConfig {
    #[serde(default)]
    pub mount: String,
    #[serde(default)]
    pub enable_url_source: bool,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    #[serde(default)]
    pub max_allowed_size: usize,
    #[serde(default)]
    pub insecure: bool,
    #[serde(default)]
    pub authorization: String,
    #[serde(default)]
    pub auth_forwarding: bool,
    #[serde(default)]
    pub forward_headers: Vec<String>,
    #[serde(default)]
    pub source_response_headers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    pub max_allowed_pixels: f64,
    pub return_size: bool,
    pub font_path: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_allowed_pixels: 18.0,
            return_size: false,
            font_path: PathBuf::from("static/DejaVuSans.ttf"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PlaceholderConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub path: String,
    /// 0 reuses the original error's status.
    #[serde(default)]
    pub status: u16,
}

impl Config {
    /// True when the path (with the configured prefix stripped) is one of
    /// the public endpoints that skip cache headers and source guards.
    pub fn is_public_path(&self, path: &str) -> bool {
        let stripped = self.strip_prefix(path);
        matches!(stripped, "/" | "" | "/health" | "/form")
    }

    pub fn strip_prefix<'a>(&self, path: &'a str) -> &'a str {
        let prefix = self.server.path_prefix.trim_end_matches('/');
        if prefix.is_empty() {
            path
        } else {
            path.strip_prefix(prefix).unwrap_or(path)
        }
    }
}

use axum::extract::{Request, State};
use axum::middleware::from_fn_with_state;
use axum::routing::{get, MethodRouter};
use axum::Router;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::engine::Engine;
use crate::metrics::Metrics;
use crate::operations::Operation;
use crate::origins::{parse_origins, Origin};
use crate::sources::{ImageSource, SourceConfig};
use crate::startup::StartupError;
use crate::throttle::Throttle;

/// Process-wide state shared by every handler and middleware. Everything in
/// here is either immutable after startup or internally synchronized.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub engine: Engine,
    pub sources: Arc<Vec<Box<dyn ImageSource>>>,
    pub allowed_origins: Arc<Vec<Origin>>,
    pub placeholder_image: Arc<Vec<u8>>,
    pub throttle: Arc<Throttle>,
    pub metrics: Arc<Metrics>,
    pub client: reqwest::Client,
    pub started_at: Instant,
}

impl AppState {
    pub fn from_config(config: Config) -> Result<Self, StartupError> {
        let allowed_origins = parse_origins(&config.sources.allowed_origins);

        let source_config = SourceConfig {
            mount: config.sources.mount.clone(),
            enable_url_source: config.sources.enable_url_source,
            authorization: config.sources.authorization.clone(),
            auth_forwarding: config.sources.auth_forwarding,
            forward_headers: config.sources.forward_headers.clone(),
            allowed_origins: allowed_origins.clone(),
            max_allowed_size: config.sources.max_allowed_size,
            insecure: config.sources.insecure,
        };
        let sources = sources::load_sources(&source_config)
            .map_err(|err| StartupError::SourceSetup(err.message))?;

        let placeholder_image = startup::load_placeholder(&config.placeholder)?;

        let client = reqwest::Client::builder()
            .user_agent(format!("henkan/{VERSION}"))
            .build()
            .map_err(|err| StartupError::SourceSetup(err.to_string()))?;

        Ok(Self {
            engine: Engine::new(config.engine.font_path.clone()),
            throttle: Arc::new(Throttle::new(
                config.server.concurrency,
                config.server.burst,
            )),
            metrics: Arc::new(Metrics::new()?),
            sources: Arc::new(sources),
            allowed_origins: Arc::new(allowed_origins),
            placeholder_image: Arc::new(placeholder_image),
            client,
            started_at: Instant::now(),
            config: Arc::new(config),
        })
    }
}

pub async fn create_app(config: Config) -> Result<Router, StartupError> {
    let state = AppState::from_config(config)?;
    Ok(router(state))
}

pub fn router(state: AppState) -> Router {
    let public = common_chain(
        Router::new()
            .route("/", get(handlers::index))
            .route("/health", get(handlers::health))
            .route("/form", get(handlers::form)),
        &state,
    );

    // The URL-signature check wraps the image chain entirely, then the GET
    // source guard, then the shared chain.
    let images = common_chain(image_routes(), &state)
        .layer(from_fn_with_state(
            state.clone(),
            middleware::validate_image_source,
        ))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::validate_url_signature,
        ));

    let mut app = Router::new()
        .route("/metrics", get(handlers::metrics))
        .merge(public)
        .merge(images);

    let prefix = state.config.server.path_prefix.trim_end_matches('/');
    if !prefix.is_empty() {
        app = Router::new().nest(prefix, app);
    }

    // One deadline bounds the whole exchange: reading the body and writing
    // the reply.
    let request_deadline = state
        .config
        .server
        .read_timeout_secs
        .saturating_add(state.config.server.write_timeout_secs)
        .max(1);

    app.fallback(handlers::not_found)
        .layer(TimeoutLayer::new(Duration::from_secs(request_deadline)))
    .layer(
        TraceLayer::new_for_http().on_response(
            |response: &axum::http::Response<_>,
             latency: std::time::Duration,
             _span: &tracing::Span| {
                tracing::info!(
                    target: "access_log",
                    status = %response.status(),
                    latency_ms = %latency.as_millis(),
                    "response"
                );
            },
        ),
    )
    .with_state(state)
}

/// The shared middleware chain, outermost first: method guard, default
/// headers, cache headers, API key, CORS, throttle, disabled-endpoint
/// filter, metrics. `Router::layer` wraps everything added before it, so
/// the calls below run in reverse of the chain order.
fn common_chain(router: Router<AppState>, state: &AppState) -> Router<AppState> {
    let mut router = router
        .layer(from_fn_with_state(state.clone(), middleware::track_metrics))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::filter_endpoints,
        ))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::throttle_requests,
        ));

    if state.config.server.cors {
        router = router.layer(middleware::cors_layer());
    }

    router
        .layer(from_fn_with_state(
            state.clone(),
            middleware::authorize_client,
        ))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::set_cache_headers,
        ))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::set_default_headers,
        ))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::validate_request,
        ))
}

fn image_routes() -> Router<AppState> {
    let mut router = Router::new();
    for op in Operation::all() {
        router = router.route(&format!("/{}", op.endpoint()), image_endpoint(*op));
    }
    router
}

fn image_endpoint(op: Operation) -> MethodRouter<AppState> {
    let handler = move |State(state): State<AppState>, req: Request| async move {
        handlers::image_controller(state, op, req).await
    };
    get(handler).post(handler)
}
