//! Job processing worker binary.

use anyhow::Context;
use futures_util::StreamExt;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vguard_models::{JobId, MediaRef, PROGRESS_EVENT_NAME};
use vguard_worker::{Engine, WorkerConfig};

const DEMO_OWNER: &str = "demo-user";
const DEMO_GROUP: &str = "demo-org";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing()?;

    info!("Starting vguard-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    if config.metrics_enabled {
        vguard_worker::metrics::init_metrics(config.metrics_port)
            .context("Failed to install Prometheus exporter")?;
        info!(port = config.metrics_port, "Metrics exporter listening");
    }

    let engine = Engine::builder(config.clone()).build();
    engine.start().await.context("Startup recovery failed")?;

    if config.demo_jobs > 0 {
        run_demo(&engine, config.demo_jobs).await;
    }

    tokio::signal::ctrl_c().await.ok();
    info!("Received shutdown signal");

    let interrupted = engine.shutdown().await;
    info!(interrupted, "Worker shutdown complete");
    Ok(())
}

/// Colored output for dev, JSON for production.
fn init_tracing() -> anyhow::Result<()> {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("vguard=info".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
    Ok(())
}

/// Submit simulated uploads and log every progress event they produce.
async fn run_demo(engine: &Engine, count: usize) {
    let events = engine.subscribe(DEMO_OWNER, DEMO_GROUP).into_stream();
    tokio::spawn(async move {
        let mut events = Box::pin(events);
        while let Some(event) = events.next().await {
            info!(
                event = PROGRESS_EVENT_NAME,
                job_id = %event.job_id,
                progress = event.progress,
                state = %event.state,
                detail = event.message.as_deref().unwrap_or_default(),
                "Progress event"
            );
        }
    });

    for i in 1..=count {
        let name = format!("demo-{i}.mp4");
        let media = MediaRef::new(format!("uploads/{name}"), name, "video/mp4", 1_048_576);
        if let Err(e) = engine.submit(JobId::new(), DEMO_OWNER, DEMO_GROUP, media).await {
            error!("Failed to submit demo job: {}", e);
        }
    }
}
