//! Demo emitters exposed by `serve` mode.

use crate::config::{ServerSettings, ServiceSettings, ServiceSource};
use ngevents::{Emitter, Listener, Proxy, ServiceCapabilities};
use serde_json::{json, Value};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// One emitter shared by every connection.
#[derive(Debug, Clone)]
pub struct HostedService {
    pub name: String,
    pub source: ServiceSource,
    pub emitter: Emitter,
    pub capabilities: ServiceCapabilities,
}

/// The services of a relay server.
#[derive(Debug, Clone, Default)]
pub struct ServiceHost {
    services: Vec<HostedService>,
}

impl ServiceHost {
    /// Creates one emitter per configured service.
    ///
    /// Services clients may emit on log the `hello` events they receive.
    pub fn new(settings: &[ServiceSettings]) -> Self {
        let services = settings
            .iter()
            .map(|service| {
                let emitter = Emitter::new();
                if service.capabilities.emit {
                    let name = service.name.clone();
                    // registration on a fresh emitter with a valid name cannot fail
                    let _ = emitter.on(
                        "hello",
                        Listener::new(move |args: &[Value]| {
                            info!(service = %name, greeting = ?args.first(), "👋 Greeting received");
                        }),
                    );
                }
                HostedService {
                    name: service.name.clone(),
                    source: service.source,
                    emitter,
                    capabilities: service.capabilities,
                }
            })
            .collect();
        Self { services }
    }

    pub fn services(&self) -> &[HostedService] {
        &self.services
    }

    pub fn get(&self, name: &str) -> Option<&HostedService> {
        self.services.iter().find(|service| service.name == name)
    }

    /// Registers every service on a connection's proxy.
    pub fn expose(&self, proxy: &Proxy) {
        for service in &self.services {
            proxy.add_local_service(&service.name, &service.emitter, service.capabilities);
        }
    }

    /// Starts the periodic emitters on the current `LocalSet`.
    pub fn start(&self, settings: &ServerSettings) -> Vec<JoinHandle<()>> {
        self.services
            .iter()
            .map(|service| {
                let emitter = service.emitter.clone();
                let name = service.name.clone();
                match service.source {
                    ServiceSource::Heartbeat => {
                        let period = Duration::from_millis(settings.heartbeat_interval_ms);
                        tokio::task::spawn_local(heartbeat(name, emitter, period))
                    }
                    ServiceSource::Clock => {
                        let period = Duration::from_millis(settings.clock_interval_ms);
                        tokio::task::spawn_local(clock(name, emitter, period))
                    }
                }
            })
            .collect()
    }
}

async fn heartbeat(name: String, emitter: Emitter, period: Duration) {
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    let mut count: u64 = 0;
    loop {
        interval.tick().await;
        count += 1;
        if let Err(error) = emitter.emit("beat", vec![json!(count)]) {
            debug!(service = %name, %error, "beat failed");
        }
    }
}

async fn clock(name: String, emitter: Emitter, period: Duration) {
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        interval.tick().await;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_millis() as u64);
        if let Err(error) = emitter.emit("time", vec![json!(now)]) {
            debug!(service = %name, %error, "time failed");
        }
    }
}
