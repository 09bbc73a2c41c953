use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use notifier::app::{self, AppState};
use notifier::bus::{BusTransport, MemoryTransport, NotificationBus, PgTransport};
use notifier::cli;
use notifier::config::{self, Config};
use notifier::jobs;
use notifier::models::notification::NotificationKind;
use notifier::notification::{format_notification, DispatchOutcome, Dispatcher};
use notifier::realtime::{ConnectionRegistry, RealtimeServer};
use notifier::store::memory::MemoryStore;
use notifier::store::postgres::PgStore;
use notifier::store::NotificationStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    // OTLP export only when a collector is configured; stdout logging always.
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "notifier"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .context("failed to install OpenTelemetry tracer")?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "notifier=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry_layer)
        .init();

    let cfg = config::load()?;

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        Some(cli::Commands::Send {
            user,
            kind,
            content,
        }) => handle_send(&cfg, &user, &kind, &content).await,
        Some(cli::Commands::Unread { user }) => handle_unread(&cfg, &user).await,
        Some(cli::Commands::ReadAll { user }) => handle_read_all(&cfg, &user).await,
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        tracing::error!("notifier exited with error: {:#}", e);
    }
    opentelemetry::global::shutdown_tracer_provider();
    result
}

/// Store + bus transport for the configured backend.
async fn connect_backends(
    cfg: &Config,
) -> anyhow::Result<(Arc<dyn NotificationStore>, Arc<dyn BusTransport>)> {
    match &cfg.database_url {
        Some(url) => {
            tracing::info!("Connecting to database...");
            let db = PgStore::connect(url)
                .await
                .context("failed to connect to DATABASE_URL")?;
            tracing::info!("Running migrations...");
            db.migrate().await?;
            let transport = PgTransport::new(url.clone(), db.pool().clone());
            Ok((Arc::new(db), Arc::new(transport)))
        }
        None => {
            tracing::warn!(
                "DATABASE_URL not set: using in-memory store and bus (single process, nothing survives restart)"
            );
            Ok((Arc::new(MemoryStore::new()), Arc::new(MemoryTransport::new())))
        }
    }
}

async fn run_server(cfg: Config, port: u16) -> anyhow::Result<()> {
    cfg.require_api_auth()?;
    let (store, transport) = connect_backends(&cfg).await?;

    let registry = Arc::new(ConnectionRegistry::new());
    let realtime = Arc::new(RealtimeServer::new(registry, cfg.handshake_timeout));

    let bus = Arc::new(NotificationBus::new(
        transport,
        cfg.bus_channel.clone(),
        cfg.bus_reconnect_delay,
    ));
    bus.start(realtime.clone());
    tracing::info!(channel = %cfg.bus_channel, instance = %bus.instance_id(), "Bus listener started");

    let state = Arc::new(
        AppState::new(store.clone(), realtime, Some(bus.clone()))
            .with_admin_key(cfg.admin_key.clone())
            .with_cors_origin(cfg.cors_origin.clone()),
    );
    let app = app::router(state);

    let cleanup = jobs::cleanup::spawn(store, chrono::Duration::days(cfg.retention_days));
    tracing::info!(
        retention_days = cfg.retention_days,
        "Background cleanup job started (read notification expiry every 1h)"
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("notifier listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down bus listener...");
    cleanup.abort();
    bus.stop().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn handle_send(cfg: &Config, user: &str, kind: &str, content: &str) -> anyhow::Result<()> {
    if cfg.database_url.is_none() {
        anyhow::bail!("send needs DATABASE_URL: an in-memory store is invisible to running servers");
    }
    let content: serde_json::Value =
        serde_json::from_str(content).context("--content must be a JSON object")?;
    if !content.is_object() {
        anyhow::bail!("--content must be a JSON object");
    }

    let (store, transport) = connect_backends(cfg).await?;
    // no local sockets: the bus carries the notification to the servers
    let realtime = Arc::new(RealtimeServer::new(
        Arc::new(ConnectionRegistry::new()),
        cfg.handshake_timeout,
    ));
    let bus = Arc::new(NotificationBus::new(
        transport,
        cfg.bus_channel.clone(),
        cfg.bus_reconnect_delay,
    ));
    let dispatcher = Dispatcher::new(store, realtime, Some(bus));

    let outcome = DispatchOutcome::from(
        dispatcher
            .create_and_send(user, NotificationKind::from(kind), content)
            .await,
    );
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    if !outcome.is_success() {
        anyhow::bail!("notification was not stored");
    }
    Ok(())
}

async fn handle_unread(cfg: &Config, user: &str) -> anyhow::Result<()> {
    let (store, _) = connect_backends(cfg).await?;
    let rows = store.list_unread(user).await?;
    if rows.is_empty() {
        println!("No unread notifications.");
        return Ok(());
    }
    println!("{:<38} {:<14} {:<22}", "ID", "TYPE", "CREATED");
    for row in &rows {
        let formatted = format_notification(row);
        println!(
            "{:<38} {:<14} {:<22}",
            row.id,
            formatted.body.type_name(),
            formatted.timestamp
        );
    }
    Ok(())
}

async fn handle_read_all(cfg: &Config, user: &str) -> anyhow::Result<()> {
    let (store, _) = connect_backends(cfg).await?;
    let updated = store.mark_all_read(user).await?;
    println!("Marked {} notification(s) as read for {}.", updated, user);
    Ok(())
}
