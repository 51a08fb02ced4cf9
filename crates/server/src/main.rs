//! Speech Relay Server Entry Point

use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use speech_relay_config::{load_settings, Settings};
use speech_relay_core::{StreamingTtsProvider, TtsProvider};
use speech_relay_server::{create_router, init_metrics, AppState, RelayMetrics, SessionHub};
use speech_relay_translate::create_translator;
use speech_relay_tts::{HttpTtsProvider, HttpTtsProviderConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Priority: env vars > config/{env}.toml > config/default.toml > defaults
    let env = std::env::var("SPEECH_RELAY_ENV").ok();
    let settings = match load_settings(env.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            // Tracing not yet initialized, use eprintln for early logging
            eprintln!("Warning: Failed to load config: {}. Using defaults.", e);
            Settings::default()
        }
    };

    init_tracing(&settings);

    tracing::info!("Starting Speech Relay v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        environment = ?settings.environment,
        policy = ?settings.segmentation.policy,
        "Configuration loaded"
    );

    let prometheus = init_metrics();
    tracing::info!("Initialized Prometheus metrics at /metrics");

    let settings = Arc::new(settings);
    let translator = create_translator(&settings.translator);
    let (tts_primary, tts_secondary) = build_tts_providers(&settings);
    let streaming_tts: Option<Arc<dyn StreamingTtsProvider>> = None;

    let metrics = Arc::new(RelayMetrics::new());
    let hub = SessionHub::new(
        settings.clone(),
        translator,
        tts_primary,
        tts_secondary,
        streaming_tts,
        metrics.clone(),
    );

    let reaper_shutdown = hub.start_reaper();
    let rollup_shutdown = speech_relay_server::metrics::start_rollup_task(metrics);

    let state = AppState::new(settings.clone(), hub, prometheus);
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port).parse()?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = reaper_shutdown.send(true);
    let _ = rollup_shutdown.send(true);
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Primary is the low-latency provider; the secondary is the stable
/// fallback the dispatcher retries on.
fn build_tts_providers(settings: &Settings) -> (Arc<dyn TtsProvider>, Option<Arc<dyn TtsProvider>>) {
    let primary_endpoint = if settings.tts.primary_endpoint.is_empty() {
        tracing::warn!("No primary TTS endpoint configured, using http://localhost:5200");
        "http://localhost:5200".to_string()
    } else {
        settings.tts.primary_endpoint.clone()
    };

    let primary: Arc<dyn TtsProvider> = Arc::new(HttpTtsProvider::new(HttpTtsProviderConfig {
        endpoint: primary_endpoint,
        name: "primary".to_string(),
    }));

    let secondary: Option<Arc<dyn TtsProvider>> = if settings.tts.secondary_endpoint.is_empty() {
        None
    } else {
        Some(Arc::new(HttpTtsProvider::new(HttpTtsProviderConfig {
            endpoint: settings.tts.secondary_endpoint.clone(),
            name: "secondary".to_string(),
        })))
    };

    (primary, secondary)
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}

fn init_tracing(settings: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &settings.observability.log_level;
        format!("speech_relay={},tower_http=info", level).into()
    });

    let subscriber = tracing_subscriber::registry().with(env_filter);
    let fmt_layer = if settings.observability.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };
    subscriber.with(fmt_layer).init();
}
