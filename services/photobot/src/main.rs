use anyhow::{Context, Result};
use chrono::Utc;
use photobot::config::Config;
use photobot::{
    build_image_store, start_api_server, AppState, BatchNotifier, BotHandler, ChatTransport,
    DatamuseClient, GoogleTranslateClient, GoogleVisionClient, HandlerSettings, Locale,
    PhotoIngestor, PollerSettings, QueryMatcherBuilder, SearchService, SearchSettings,
    SessionStore, SynonymProvider, TelegramClient, Translator, UpdatePoller,
};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    init_tracing(&config.service.log_level, &config.service.log_format);

    config.validate().context("Invalid configuration")?;

    let instance_id = Uuid::new_v4();
    info!(
        service = %config.service.name,
        instance_id = %instance_id,
        "Starting photobot"
    );

    init_metrics(config.service.metrics_port)?;

    let store = build_image_store(&config.storage)
        .await
        .context("Failed to initialize image store")?;

    let telegram = Arc::new(
        TelegramClient::new(&config.telegram).context("Failed to initialize Telegram client")?,
    );
    let transport: Arc<dyn ChatTransport> = telegram.clone();

    let detector = Arc::new(
        GoogleVisionClient::new(&config.vision).context("Failed to initialize vision client")?,
    );

    let translator: Option<Arc<dyn Translator>> = if config.translation.enabled {
        Some(Arc::new(
            GoogleTranslateClient::new(&config.translation)
                .context("Failed to initialize translation client")?,
        ))
    } else {
        info!("Translation disabled, queries are matched as typed");
        None
    };

    let synonyms: Option<Arc<dyn SynonymProvider>> = if config.synonyms.enabled {
        Some(Arc::new(
            DatamuseClient::new(&config.synonyms)
                .context("Failed to initialize synonym client")?,
        ))
    } else {
        None
    };

    let sessions = Arc::new(SessionStore::new(config.session_idle_ttl()));

    let ingestor = Arc::new(PhotoIngestor::new(
        detector,
        translator.clone(),
        store.clone(),
        config.translation.target_language.clone(),
        config.session.max_labels,
    ));

    let matcher = QueryMatcherBuilder::new()
        .similarity_threshold(config.search.similarity_threshold)
        .build();

    let search = Arc::new(SearchService::new(
        store.clone(),
        translator,
        synonyms,
        matcher,
        sessions.clone(),
        SearchSettings {
            literal_marker: config.search.literal_marker.clone(),
            target_language: config.translation.target_language.clone(),
            load_concurrency: config.search.load_concurrency,
        },
    ));

    let batch = Arc::new(BatchNotifier::new(
        sessions.clone(),
        transport.clone(),
        config.batch_window(),
    ));

    let handler = Arc::new(BotHandler::new(
        transport,
        ingestor,
        search,
        batch,
        HandlerSettings {
            default_locale: Locale::from_config(&config.session.default_language),
            literal_marker: config.search.literal_marker.clone(),
            max_results_sent: config.search.max_results_sent,
        },
    ));

    let poller = UpdatePoller::new(
        telegram,
        handler,
        PollerSettings {
            poll_timeout: config.poll_timeout(),
            retry_delay: config.retry_delay(),
            max_in_flight: config.telegram.max_concurrent_updates,
        },
    );

    let shutdown = CancellationToken::new();

    let poller_shutdown = shutdown.clone();
    let poller_handle = tokio::spawn(async move {
        if let Err(e) = poller.run(poller_shutdown).await {
            error!(error = %e, "Update poller error");
        }
    });

    let sweeper_handle = tokio::spawn(sweep_sessions(
        sessions.clone(),
        config.session_sweep_interval(),
        shutdown.clone(),
    ));

    let api_handle = if config.api.enabled {
        let api_state = AppState {
            store,
            sessions,
            instance_id,
            started_at: Utc::now(),
        };
        let api_config = config.api.clone();
        let api_shutdown = shutdown.clone();

        Some(tokio::spawn(async move {
            if let Err(e) = start_api_server(api_state, &api_config, api_shutdown).await {
                error!(error = %e, "API server error");
            }
        }))
    } else {
        None
    };

    info!("Photobot started successfully");

    shutdown_signal().await;

    info!("Shutting down photobot");
    shutdown.cancel();

    if let Err(e) = poller_handle.await {
        warn!(error = %e, "Update poller task failed");
    }
    if let Err(e) = sweeper_handle.await {
        warn!(error = %e, "Session sweeper task failed");
    }
    if let Some(handle) = api_handle {
        if let Err(e) = handle.await {
            warn!(error = %e, "API server task failed");
        }
    }

    info!("Photobot stopped");

    Ok(())
}

/// Periodically drop idle sessions
async fn sweep_sessions(
    sessions: Arc<SessionStore>,
    every: std::time::Duration,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                let evicted = sessions.evict_idle();
                if evicted > 0 {
                    info!(evicted, remaining = sessions.len(), "Evicted idle sessions");
                }
                metrics::gauge!("photobot.sessions.active").set(sessions.len() as f64);
            }
        }
    }
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str, log_format: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    if log_format == "pretty" {
        registry.with(fmt::layer().pretty()).init();
    } else {
        registry.with(fmt::layer().json()).init();
    }
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
