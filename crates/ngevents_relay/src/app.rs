//! Main application logic and lifecycle management.
//!
//! `serve` exposes the configured services to every WebSocket client, each
//! connection getting its own proxy. `connect` mirrors the services of a
//! server and logs the subscribed events.

use crate::bridge::run_bridge;
use crate::cli::{CliArgs, Mode};
use crate::config::{AppConfig, SubscriptionSettings};
use crate::logging::display_banner;
use crate::services::ServiceHost;
use crate::signals::wait_for_shutdown;
use ngevents::{ChannelTransport, Listener, Proxy};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, connect_async};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// The relay application.
pub struct Application {
    config: AppConfig,
    mode: Mode,
}

impl Application {
    /// Loads configuration, applies CLI overrides and validates the result.
    pub async fn new(args: CliArgs) -> Result<Self, Box<dyn std::error::Error>> {
        info!("🔧 Loading configuration from: {}", args.config_path.display());
        let mut config = AppConfig::load_from_file(&args.config_path).await?;

        if let Some(bind_address) = args.bind_address {
            config.server.bind_address = bind_address;
        }
        if let Some(url) = args.url {
            config.client.url = url;
        }
        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }
        if args.json_logs {
            config.logging.json_format = true;
        }

        if let Err(e) = config.validate() {
            return Err(format!("Configuration validation failed: {e}").into());
        }
        info!("✅ Configuration loaded and validated successfully");

        display_banner();
        Ok(Self {
            config,
            mode: args.mode,
        })
    }

    /// Runs until a shutdown signal, or until the server connection closes in
    /// `connect` mode.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        match self.mode {
            Mode::Serve => self.serve().await,
            Mode::Connect => self.connect().await,
        }
    }

    async fn serve(self) -> Result<(), Box<dyn std::error::Error>> {
        let host = Rc::new(ServiceHost::new(&self.config.services));
        let timers = host.start(&self.config.server);

        let listener = TcpListener::bind(&self.config.server.bind_address).await?;
        info!("🌐 Listening on ws://{}", self.config.server.bind_address);
        for service in host.services() {
            info!(
                "  📦 {} ({:?}) listen={} emit={} ack={}",
                service.name,
                service.source,
                service.capabilities.listen,
                service.capabilities.emit,
                service.capabilities.ack
            );
        }
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        let shutdown = wait_for_shutdown();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        tokio::task::spawn_local(handle_connection(stream, addr, host.clone()));
                    }
                    Err(e) => warn!("Failed to accept connection: {}", e),
                },
                result = &mut shutdown => {
                    result?;
                    break;
                }
            }
        }

        for timer in timers {
            timer.abort();
        }
        info!("✅ Relay server shutdown complete");
        Ok(())
    }

    async fn connect(self) -> Result<(), Box<dyn std::error::Error>> {
        let client = &self.config.client;
        info!("🔗 Connecting to {}", client.url);
        let (ws_stream, _) = connect_async(client.url.as_str()).await?;
        info!("✅ Connected to {}", client.url);

        let (transport, outbound) = ChannelTransport::new();
        let proxy = Proxy::new(Rc::new(transport));

        for subscription in &client.subscriptions {
            let remote = proxy
                .remote_service(&subscription.service)
                .unwrap_or_else(|| proxy.add_remote_service(&subscription.service));
            remote.on(&subscription.event, logging_listener(subscription))?;
            info!(
                "📥 Subscribed to {}.{}{}",
                subscription.service,
                subscription.event,
                if subscription.ack { " (ack)" } else { "" }
            );
        }

        if let Some(greeting) = &client.greeting {
            let remote = proxy
                .remote_service(&greeting.service)
                .unwrap_or_else(|| proxy.add_remote_service(&greeting.service));
            let event = greeting.event.clone();
            remote.emit_with_ack(&greeting.event, vec![json!(greeting.message)], move |outcome| {
                info!(event = %event, ?outcome, "📨 Greeting acknowledged");
            })?;
        }

        let bridge = run_bridge(ws_stream, proxy, outbound, client.url.clone());
        tokio::select! {
            summary = bridge => {
                info!(
                    "🔌 Connection closed ({} messages received, {} sent)",
                    summary.received, summary.sent
                );
            }
            result = wait_for_shutdown() => result?,
        }
        Ok(())
    }
}

/// Serves one WebSocket client until it disconnects.
async fn handle_connection(stream: TcpStream, addr: SocketAddr, host: Rc<ServiceHost>) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws_stream) => ws_stream,
        Err(e) => {
            error!("WebSocket handshake failed for {}: {}", addr, e);
            return;
        }
    };

    let connection_id = Uuid::new_v4();
    let (transport, outbound) = ChannelTransport::new();
    let proxy = Proxy::new(Rc::new(transport));
    host.expose(&proxy);
    info!(%connection_id, %addr, "🤝 Client connected");

    let summary = run_bridge(ws_stream, proxy, outbound, connection_id.to_string()).await;
    info!(
        %connection_id,
        received = summary.received,
        sent = summary.sent,
        "👋 Client disconnected"
    );
}

/// Logs every received event; acknowledged subscriptions hold each event
/// for `hold_ms` before finishing.
fn logging_listener(subscription: &SubscriptionSettings) -> Listener {
    let label = format!("{}.{}", subscription.service, subscription.event);
    if !subscription.ack {
        return Listener::new(move |args: &[Value]| {
            info!(event = %label, ?args, "📬 Event received");
        });
    }

    let hold = Duration::from_millis(subscription.hold_ms);
    Listener::with_done(move |args, done| {
        info!(event = %label, ?args, "📬 Event received, acknowledging in {:?}", hold);
        let label = label.clone();
        tokio::task::spawn_local(async move {
            tokio::time::sleep(hold).await;
            debug!(event = %label, "acknowledged");
            done.done();
        });
    })
}
