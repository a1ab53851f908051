//! # courier
//!
//! Courier binary: run an echo server, or dial one and exchange a single
//! message.

#![deny(unsafe_code)]

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use courier_client::{AsyncCallback, Client, ClientConfig, ClientHandlers};
use courier_core::logging::{LogFormat, init_subscriber};
use courier_server::{ServerConfig, ServerHandlers, ServerPool, ShutdownCoordinator, header_identity};
use courier_settings::CourierSettings;
use tokio::sync::oneshot;
use tracing::{info, warn};

/// Correlated WebSocket messaging.
#[derive(Parser, Debug)]
#[command(name = "courier", about = "Correlated WebSocket messaging")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Accept connections and echo every frame back to its sender.
    Serve {
        /// Host to bind (overrides settings).
        #[arg(long)]
        host: Option<String>,

        /// Port to bind, 0 for auto-assign (overrides settings).
        #[arg(long)]
        port: Option<u16>,

        /// Upgrade route (overrides settings).
        #[arg(long)]
        path: Option<String>,
    },

    /// Dial `url`, send one message, and print the reply.
    Send {
        /// Server URL, e.g. `ws://127.0.0.1:8080/ws`.
        url: String,

        /// Payload to send.
        payload: String,

        /// Send a correlated message and wait for its callback.
        #[arg(long = "async")]
        asynchronous: bool,

        /// Reply timeout in milliseconds (defaults to settings).
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Request header as `key=value`. Repeatable.
        #[arg(long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,
    },
}

fn parse_header(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_owned(), value.to_owned())),
        _ => Err(format!("expected key=value, got {raw:?}")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings = courier_settings::load_settings().context("Failed to load settings")?;
    settings.validate().context("Invalid settings")?;
    let format = settings.logging.format.parse().unwrap_or(LogFormat::Compact);
    init_subscriber(&settings.logging.level, format);

    match args.command {
        Command::Serve { host, port, path } => serve(&settings, host, port, path).await,
        Command::Send {
            url,
            payload,
            asynchronous,
            timeout_ms,
            headers,
        } => {
            let timeout = timeout_ms.map(Duration::from_millis);
            send(&settings, url, payload, asynchronous, timeout, headers).await
        }
    }
}

fn server_config(
    settings: &CourierSettings,
    host: Option<String>,
    port: Option<u16>,
    path: Option<String>,
) -> ServerConfig {
    let mut config = ServerConfig::from(&settings.server);
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }
    if let Some(path) = path {
        config.path = path;
    }
    config
}

fn echo_handlers() -> ServerHandlers {
    ServerHandlers::new()
        .on_receive_success(|server, message| async move {
            // Echo the wire form so correlated requests get correlated replies.
            if let Err(err) = server
                .sync_message(message.wire().clone(), &ServerHandlers::new())
                .await
            {
                warn!(addr = %server.addr(), error = %err, "echo failed");
            }
        })
        .on_connection_fail(|err| warn!(error = %err, "connection refused"))
        .on_receive_fail(|server, err| warn!(addr = %server.addr(), error = %err, "read failed"))
        .on_close(|server| info!(addr = %server.addr(), "connection closed"))
}

async fn serve(
    settings: &CourierSettings,
    host: Option<String>,
    port: Option<u16>,
    path: Option<String>,
) -> Result<()> {
    let config = server_config(settings, host, port, path);
    if !config.path.starts_with('/') {
        bail!("path must start with '/': {}", config.path);
    }

    let pool = ServerPool::new(config.clone(), echo_handlers());
    let app = pool.router(&config.path, header_identity(config.identity_header.clone()));

    let listener = tokio::net::TcpListener::bind(config.bind_addr())
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr()))?;
    let local = listener.local_addr().context("Failed to read bound address")?;
    info!(addr = %local, path = %config.path, "courier echo server ready");

    let coordinator = ShutdownCoordinator::new(pool);
    let on_signal = coordinator.clone();
    let _ = tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => on_signal.shutdown(),
            Err(err) => warn!(error = %err, "failed to listen for ctrl+c"),
        }
    });

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = coordinator.drain().await;
    })
    .await
    .context("Server error")?;

    info!("server stopped");
    Ok(())
}

async fn send(
    settings: &CourierSettings,
    url: String,
    payload: String,
    asynchronous: bool,
    timeout: Option<Duration>,
    headers: Vec<(String, String)>,
) -> Result<()> {
    let config = ClientConfig::from(&settings.client);
    let wait = timeout.unwrap_or(config.sync_timeout);
    let handlers = ClientHandlers::new()
        .on_send_fail(|_, _, err| warn!(error = %err, "send failed"))
        .on_receive_fail(|_, _, err| warn!(error = %err, "read failed"));

    let client = Client::new("cli", "courier", url, handlers, config)?;
    let _ = client.set_headers(headers);
    client.boot().await.context("Failed to connect")?;

    let reply = if asynchronous {
        let (tx, rx) = oneshot::channel();
        let callback: AsyncCallback = Box::new(move |_, _, payload| {
            let _ = tx.send(payload);
        });
        let message_id = client.async_message(payload, Some(callback), wait).await?;
        info!(message_id = %message_id, "message sent");
        match tokio::time::timeout(wait, rx).await {
            Ok(Ok(reply)) => reply,
            _ => bail!("no reply to {message_id} within {wait:?}"),
        }
    } else {
        client
            .sync_message(payload, Some(wait))
            .await
            .context("No reply")?
    };

    println!("{}", String::from_utf8_lossy(&reply));
    client.close().await.context("Failed to close connection")?;
    Ok(())
}
