//! PhotoPipe - product image enrichment pipeline.
//!
//! Webhooks from the 3JMS inventory system announce new product photos;
//! the processor drives each one through background removal, background
//! generation, compositing, derivative generation, and the Shopify push.

use anyhow::{Context, Result};
use photopipe_backend::{
    api::{self, AppState},
    config::Config,
    processor::{Processor, ProcessorConfig},
    providers::{
        local::{
            LocalAiCompositor, LocalBackgroundGenerator, LocalCompositor, LocalSegmenter,
            LocalStorefront,
        },
        FsObjectStore, ObjectStore, ProviderSet,
    },
    store::{migrations, settings, AiCompositorChoice, Db, Stores},
};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,photopipe_backend=debug")),
        )
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;
    info!(
        env = ?config.app_env,
        db = %config.db_path,
        port = config.port,
        "Starting PhotoPipe backend"
    );

    let db = Db::open(&config.db_path).context("Failed to open database")?;
    let migration_set = if Path::new(&config.migrations_dir).is_dir() {
        migrations::load_dir(Path::new(&config.migrations_dir))
            .context("Failed to read migrations directory")?
    } else {
        migrations::embedded()
    };
    let applied = db
        .migrate(&migration_set)
        .context("Schema migration failed")?;
    if applied > 0 {
        info!(applied, "Schema migrations applied");
    }

    let stores = Arc::new(Stores::new(&db));
    seed_settings(&stores, &config)?;

    let fs_objects = Arc::new(FsObjectStore::new(
        &config.storage_root,
        &config.public_base_url,
        &config.presign_secret,
    ));
    let objects: Arc<dyn ObjectStore> = fs_objects.clone();
    let providers = ProviderSet {
        objects: objects.clone(),
        segmenter: Arc::new(LocalSegmenter::new(objects.clone())),
        backgrounds: Arc::new(LocalBackgroundGenerator::new(objects.clone())),
        ai_compositor: Arc::new(LocalAiCompositor::new(objects.clone())),
        compositor: Arc::new(LocalCompositor::new(objects.clone())),
        storefront: Arc::new(LocalStorefront::new()),
    };

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .user_agent("PhotoPipe/0.1")
        .build()
        .context("Failed to build HTTP client")?;

    let processor = Processor::new(
        stores.clone(),
        providers.clone(),
        http.clone(),
        ProcessorConfig {
            poll_interval_ms: config.poll_interval_ms,
            concurrency: config.concurrency,
            max_retries: config.max_retries,
            lease_ttl_ms: config.lease_ttl_ms,
            ..Default::default()
        },
    );
    let processor_task = tokio::spawn(processor.clone().run());

    let state = AppState {
        config: Arc::new(config.clone()),
        stores,
        providers,
        processor: processor.clone(),
        http,
        fs_objects: Some(fs_objects),
    };
    let app = api::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("API server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(processor.clone()))
    .await
    .context("Server error")?;

    // The server is down; give in-flight jobs their grace period, then
    // leave the rest to lease expiry on the next start.
    processor.initiate_shutdown();
    let drained = processor
        .wait_idle(Duration::from_secs(config.shutdown_grace_secs))
        .await;
    if !drained {
        warn!("Exiting with jobs in flight; their leases will expire");
    }
    processor_task.abort();
    info!("Shutdown complete");
    Ok(())
}

/// Apply env-driven defaults to unset settings without overriding values
/// an operator changed at runtime.
fn seed_settings(stores: &Stores, config: &Config) -> Result<()> {
    if stores
        .settings
        .get_raw(settings::KEY_AI_COMPOSITOR)?
        .is_none()
    {
        if let Some(choice) = AiCompositorChoice::parse(&config.ai_compositor) {
            stores.settings.set_ai_compositor(choice)?;
        } else {
            warn!(value = %config.ai_compositor, "Unrecognized AI_COMPOSITOR, keeping default");
        }
    }
    Ok(())
}

async fn shutdown_signal(processor: Arc<Processor>) {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                let _ = ctrl_c.await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
    info!("Shutdown signal received, draining");
    processor.initiate_shutdown();
}
