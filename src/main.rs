//! # Suara Relay Backend - Main Application Entry Point
//!
//! A real-time audio-relay server: embedded devices stream MAC-prefixed
//! microphone audio over a persistent WebSocket, the relay feeds it to a
//! streaming speech-recognition engine, translates finalized utterances and
//! pushes the translated text back to the originating device while
//! archiving a record to a remote note service.
//!
//! ## Application Architecture:
//! - **config**: layered configuration (TOML file + environment variables)
//! - **state**: shared state, metrics and the collaborator graph
//! - **audio**: frame demultiplexing, audio sink, session registry
//! - **speech**: recognition-engine seam, Azure client, per-session bridge
//! - **pipeline / translate / notes**: the result pipeline and its
//!   collaborators
//! - **websocket**: the per-connection handler
//! - **health / handlers / middleware**: the HTTP observability surface

mod audio;
mod config;
mod error;
mod handlers;
mod health;
mod middleware;
mod notes;
mod pipeline;
mod speech;
mod state;
mod translate;
mod websocket;

use actix_web::{web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Global shutdown flag flipped by the signal handler task.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    // Credentials usually arrive through a .env file in development.
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting suara-relay-backend v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Listening on {}:{} (speech language {}, translating {} -> {})",
        config.server.host,
        config.server.port,
        config.speech.language,
        config.translation.source,
        config.translation.target
    );

    let app_state = AppState::new(config.clone())?;
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(middleware::Telemetry)
            // The device firmware connects to the root path; /ws/audio is
            // the same endpoint under a conventional name.
            .route("/", web::get().to(websocket::device_websocket))
            .route("/ws/audio", web::get().to(websocket::device_websocket))
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/sessions", web::get().to(health::active_sessions))
                    .route("/config", web::get().to(handlers::get_config)),
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

    info!("Server stopped gracefully");
    Ok(())
}

fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "suara_relay_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Flip the shutdown flag on SIGTERM or SIGINT so in-flight sessions get a
/// graceful stop instead of a hard exit.
fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
