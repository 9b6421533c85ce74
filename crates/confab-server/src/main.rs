//! Confab server binary — the main entry point for the AI voice-talk
//! backend.
//!
//! Starts an axum HTTP server with structured logging, the configured
//! provider adapters, and graceful shutdown on SIGTERM/SIGINT. TLS
//! termination and static UI serving are left to the deployment in front
//! of this process.

use confab_server::{app, background, config, talk::TalkServer, AppState, RuntimeSettings};
use confab_voice::{
    AsrBackend, OpenAiAsr, OpenAiChat, OpenAiTts, TencentAsr, TencentTts, TtsBackend,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("CONFAB_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration — the server cannot start without valid config");

    // Initialize tracing
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    assert!(
        !config.providers.chat_endpoint().api_key.is_empty(),
        "providers.api_key is required — set it in config.toml or CONFAB_API_KEY"
    );

    let keep_files = config.behavior.keep_files;

    // Select the speech providers: Tencent when configured, the
    // OpenAI-compatible pair otherwise. Chat is always OpenAI-compatible.
    let (asr, tts): (Arc<dyn AsrBackend>, Arc<dyn TtsBackend>) =
        if config.providers.tencent.is_configured() {
            tracing::info!("using Tencent ASR and TTS");
            (
                Arc::new(
                    TencentAsr::new(config.providers.tencent.clone(), keep_files)
                        .expect("failed to build Tencent ASR client"),
                ),
                Arc::new(
                    TencentTts::new(config.providers.tencent.clone())
                        .expect("failed to build Tencent TTS client"),
                ),
            )
        } else {
            tracing::info!("using OpenAI-compatible ASR and TTS");
            (
                Arc::new(
                    OpenAiAsr::new(
                        config.providers.asr_endpoint(),
                        &config.models.asr_model,
                        keep_files,
                    )
                    .expect("failed to build ASR client"),
                ),
                Arc::new(
                    OpenAiTts::new(
                        config.providers.tts_endpoint(),
                        &config.models.tts_model,
                        &config.models.tts_voice,
                    )
                    .expect("failed to build TTS client"),
                ),
            )
        };

    let chat = Arc::new(
        OpenAiChat::new(config.providers.chat_endpoint()).expect("failed to build chat client"),
    );

    let robots = config.robots();
    for (index, robot) in robots.iter().enumerate() {
        tracing::info!(index, "robot: {robot}");
    }

    let talk = Arc::new(TalkServer::new());
    let state = AppState {
        talk: talk.clone(),
        robots,
        asr,
        chat,
        tts,
        settings: RuntimeSettings {
            work_dir: PathBuf::from(&config.behavior.work_dir),
            keep_files,
            stage_timeout: config.stage_timeout(),
            max_tokens: config.behavior.max_tokens,
            temperature: config.behavior.temperature,
            ..RuntimeSettings::default()
        },
    };

    tokio::spawn(background::stats_task(talk));

    let app = app(state);
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(
        %addr,
        https_port = ?config.server.https_port,
        work_dir = %config.behavior.work_dir,
        development = config.behavior.development,
        "starting confab server"
    );

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address — is another process using this port?");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    tracing::info!("confab server shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
