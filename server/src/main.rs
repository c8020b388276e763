use chrono::Utc;
use hyper_util::rt::TokioIo;
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use retroweb_server::generator::template::TemplateStyleGenerator;
use retroweb_server::style_cache::sqlite::SqliteStyleStore;
use retroweb_server::{EngineConfig, StyleEngine, StyleGenerator, StyleStore, server};
use std::io;
use std::sync::Arc;
use tower::Service;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,retroweb_server=debug".into()),
        )
        .init();

    let config = EngineConfig::from_env();

    // Ensure storage directory exists before creating database
    std::fs::create_dir_all(&config.storage_dir)?;

    let store: Arc<dyn StyleStore> = Arc::new(SqliteStyleStore::new(config.db_path())?);
    let generator: Arc<dyn StyleGenerator> = Arc::new(TemplateStyleGenerator::new());
    let engine = Arc::new(StyleEngine::new(store, generator, config.clone()));

    // Settle anything a previous run left mid-generation
    engine.recover_interrupted().await?;

    spawn_maintenance(engine.clone());

    // Create and run the server
    let app = server::create_app(engine);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(
        "RetroWeb style engine listening on http://{} (HTTP/1.1 + HTTP/2)",
        config.bind_addr
    );
    info!("Storage directory: {}", config.storage_dir.display());

    // Use hyper's auto-negotiating server to support both HTTP/1.1 and HTTP/2
    let conn_builder = ConnBuilder::new(hyper_util::rt::TokioExecutor::new());

    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("Failed to accept connection: {}", e);
                continue;
            }
        };
        debug!("New connection from: {}", addr);
        let io = TokioIo::new(stream);
        let app_clone = app.clone();
        let conn_builder = conn_builder.clone();

        tokio::spawn(async move {
            if let Err(err) = conn_builder
                .serve_connection(
                    io,
                    hyper::service::service_fn(move |req| app_clone.clone().call(req)),
                )
                .await
            {
                // Check if the error is an io::Error indicating a normal close
                let is_normal_close = err
                    .source()
                    .and_then(|e| e.downcast_ref::<io::Error>())
                    .map(|io_err| {
                        matches!(
                            io_err.kind(),
                            io::ErrorKind::ConnectionReset
                                | io::ErrorKind::BrokenPipe
                                | io::ErrorKind::UnexpectedEof
                        )
                    })
                    .unwrap_or(false);

                if is_normal_close {
                    debug!("Connection from {} closed normally", addr);
                } else {
                    error!("Error serving connection from {}: {}", addr, err);
                }
            } else {
                debug!("Connection from {} completed successfully", addr);
            }
        });
    }
}

/// Periodic retention and size-ceiling sweep
fn spawn_maintenance(engine: Arc<StyleEngine>) {
    let period = engine.config().eviction_interval;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            if let Err(e) = engine.run_maintenance(Utc::now()).await {
                error!("❌ Cache maintenance failed: {}", e);
            }
        }
    });
}
