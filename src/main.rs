// Main entry point - Dependency injection and server setup
mod domain;
mod application;
mod infrastructure;
mod presentation;

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::application::alert_state::{run_alert_worker, AlertDispatcher, AlertStateMachine};
use crate::application::comparator::Comparator;
use crate::application::history::HistoryStore;
use crate::application::reference_model::ReferenceModel;
use crate::application::stream_orchestrator::StreamOrchestrator;
use crate::infrastructure::config::{load_settings, Settings};
use crate::infrastructure::json_source::{load_reference, JsonProfileSource};
use crate::infrastructure::notifiers::build_notifier;
use crate::infrastructure::subscriber_hub::SubscriberHub;
use crate::presentation::app_state::AppState;
use crate::presentation::handlers::routes;

fn init_logging(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// A missing or unusable reference is not fatal: comparisons report it instead.
fn load_reference_model(settings: &Settings) -> Option<Arc<ReferenceModel>> {
    let series = match load_reference(&settings.data.reference_path) {
        Ok(series) => series,
        Err(e) => {
            tracing::warn!(error = ?e, "Reference series unavailable");
            return None;
        }
    };

    match ReferenceModel::new(series, &settings.novelty) {
        Ok(model) => Some(Arc::new(model)),
        Err(e) => {
            tracing::warn!(error = %e, "Reference model could not be built");
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let settings = load_settings().context("loading settings")?;
    init_logging(&settings);

    let cancel = CancellationToken::new();

    // Core components (application layer)
    let reference = load_reference_model(&settings);
    let comparator = Arc::new(Comparator::new(reference, &settings));
    let history = HistoryStore::new(settings.stream.history_capacity);
    let hub = SubscriberHub::new(settings.stream.subscriber_buffer, settings.stream.replay_window);

    // Alert delivery runs on its own worker
    let dispatcher = if settings.notification.enabled {
        let (dispatcher, rx) = AlertDispatcher::channel(settings.notification.queue_capacity);
        let notifier = build_notifier(&settings.notification)?;
        tokio::spawn(run_alert_worker(
            rx,
            notifier,
            settings.notification.send_timeout(),
            cancel.child_token(),
        ));
        dispatcher
    } else {
        tracing::info!("Notifications disabled");
        AlertDispatcher::disabled()
    };

    let orchestrator = StreamOrchestrator::new(
        Arc::new(JsonProfileSource::new(&settings.data.profiles_dir)),
        comparator.clone(),
        history.clone(),
        AlertStateMachine::new(dispatcher.clone()),
        Arc::new(hub.clone()),
        settings.stream.cursor_mode,
        settings.stream.interval(),
    );
    let stream_task = tokio::spawn(orchestrator.run(cancel.child_token()));

    // Create application state
    let state = Arc::new(AppState {
        comparator,
        history,
        hub,
        alerts: dispatcher,
    });

    // Build router (presentation layer)
    let router = routes(state).layer(TraceLayer::new_for_http());

    // Start server
    let addr: SocketAddr = settings
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", settings.server.bind))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Starting fermentation-monitor service");

    let shutdown = cancel.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutting down");
            shutdown.cancel();
        })
        .await?;

    cancel.cancel();
    if let Err(e) = stream_task.await {
        tracing::error!(error = %e, "Stream task ended abnormally");
    }

    Ok(())
}
