use clap::Parser;
use dotenv::dotenv;
use resource_adjust::db::schema::ensure_schema;
use resource_adjust::notifications::senders::webhook::WebhookSender;
use resource_adjust::server::command_dispatcher::HttpCommandChannel;
use resource_adjust::server::config::ServerConfig;
use resource_adjust::server::core_services::CoreServices;
use resource_adjust::web::create_axum_router;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::sync::Arc;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<String>,
}

/// The returned guard flushes the file writer when dropped; keep it alive
/// for the lifetime of the process.
fn init_logging(log_dir: &str) -> WorkerGuard {
    // JSON file, rotated daily
    let file_appender = rolling::daily(log_dir, "adjust-server.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .json();

    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sea_orm=warn,sqlx::query=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
    guard
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal.");
    }
    info!("Shutdown signal received.");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();
    dotenv().ok();

    // Logging needs the configured directory, so configuration errors go to stderr.
    let server_config = match ServerConfig::load(args.config.as_deref()) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("Failed to load server configuration: {e}");
            return Err(e.into());
        }
    };
    let _log_guard = init_logging(&server_config.log_dir);
    info!(version = env!("CARGO_PKG_VERSION"), "Starting resource adjustment server.");

    let mut opt = ConnectOptions::new(server_config.database_url.to_owned());
    opt.max_connections(10);
    let db_pool: DatabaseConnection = Database::connect(opt).await.map_err(|e| {
        error!(error = %e, "Failed to create database connection.");
        e
    })?;
    ensure_schema(&db_pool).await?;
    let db_pool = Arc::new(db_pool);

    let channel = Arc::new(HttpCommandChannel::new(
        server_config.command_endpoint.clone(),
        server_config.dispatch_timeout(),
    )?);
    let sender = Arc::new(WebhookSender::new(server_config.notify_timeout()));
    let core = CoreServices::build(&server_config, db_pool, channel, sender)?;

    let app = create_axum_router(core.app_state(server_config.clone()));
    let listener = tokio::net::TcpListener::bind(&server_config.listen_addr).await?;
    info!(
        addr = %server_config.listen_addr,
        prometheus = %server_config.prometheus_url,
        "HTTP server listening."
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_log_is_flushed_when_guard_drops() {
        let dir = tempfile::tempdir().unwrap();
        let guard = init_logging(dir.path().to_str().unwrap());
        info!(marker = "flush-check", "Logging initialised.");
        drop(guard);

        let contents: String = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| std::fs::read_to_string(entry.unwrap().path()).unwrap())
            .collect();
        assert!(contents.contains("flush-check"));
    }
}
