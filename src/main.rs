//! # VisionVoice Backend - Main Application Entry Point
//!
//! HTTP backend for reading recognised text aloud: it sends the text to a hosted
//! speech model, decodes the returned PCM, plays it through an output sink and
//! serves it back as a WAV download.
//!
//! ## Application Architecture:
//! - **config**: Application configuration (TOML files + environment variables)
//! - **audio**: Base64 codec, PCM transcoder, WAV writer, sinks and sessions
//! - **synthesis**: The remote speech model behind the `SpeechSynthesizer` trait
//! - **extraction**: The remote vision model behind the `TextExtractor` trait
//! - **playback**: The controller task that owns all playback state
//! - **state**: Shared application state and metrics
//! - **health**: Health and metrics endpoints
//! - **middleware**: Request logging and metrics collection
//! - **handlers**: HTTP request handlers for the API
//! - **error**: HTTP error responses

mod audio;
mod config;
mod error;
mod extraction;
mod handlers;
mod health;
mod middleware;
mod playback;
mod state;
mod synthesis;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Result;
use audio::sink::SinkResource;
use config::AppConfig;
use extraction::GeminiExtractor;
use playback::PlaybackController;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use synthesis::GeminiSynthesizer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set once SIGINT or SIGTERM arrives.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting vision-voice-backend v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);
    if config.synthesis.api_key.is_empty() {
        warn!("No API key configured (set GEMINI_API_KEY); speech requests will fail");
    }

    let format = config.audio_format()?;
    let output = config.output_preference()?;
    info!(
        model = %config.synthesis.model,
        extraction_model = %config.extraction.model,
        output = output.as_str(),
        sample_rate = format.sample_rate,
        channels = format.channel_count,
        "Audio pipeline configured"
    );

    let controller = PlaybackController::spawn(
        Arc::new(GeminiSynthesizer::from_config(&config.synthesis)),
        SinkResource::from_preference(output, format),
        format,
        config.truncation_policy()?,
    );

    let extractor = Arc::new(GeminiExtractor::from_config(&config.synthesis, &config.extraction));
    let app_state = AppState::new(config.clone(), controller.clone(), extractor);
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .expose_headers(vec![actix_web::http::header::CONTENT_DISPOSITION])
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(Logger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config))
                    .route("/voices", web::get().to(handlers::list_voices))
                    .route("/document", web::get().to(handlers::get_document))
                    .route("/document", web::put().to(handlers::put_document))
                    .route("/document", web::delete().to(handlers::clear_document))
                    .route("/document/download", web::get().to(handlers::download_document))
                    .route("/document/extract", web::post().to(handlers::extract_document))
                    .route("/speech/play", web::post().to(handlers::play))
                    .route("/speech/toggle", web::post().to(handlers::toggle))
                    .route("/speech/stop", web::post().to(handlers::stop))
                    .route("/speech/status", web::get().to(handlers::status))
                    .route("/speech/download", web::get().to(handlers::download)),
            )
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    // Stops any playback and releases the output device
    if let Err(e) = controller.shutdown().await {
        warn!("Playback controller already stopped: {}", e);
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// `RUST_LOG` wins; otherwise debug for this crate and info for actix.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vision_voice_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

fn setup_signal_handlers() {
    tokio::spawn(async {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let (mut sigterm, mut sigint) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                (Err(e), _) | (_, Err(e)) => {
                    error!("Failed to install signal handlers: {}", e);
                    return;
                }
            };

            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM"),
                _ = sigint.recv() => info!("Received SIGINT"),
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
                return;
            }
            info!("Received Ctrl+C");
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
