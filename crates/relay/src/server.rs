//! Wires the relay edge node together and runs both listeners

use crate::cloudflare::CloudflareDnsSink;
use crate::config::{DnsProvider, RelayServerConfig};
use crate::credentials::Argon2Verifier;
use crate::dispatch::{InternalHandlers, PlainDispatcher, SecureDispatcher};
use crate::dns::{DnsSync, SystemResolver};
use crate::error::{RelayError, Result};
use crate::handlers::{
    ApiState, TlsHttpHandler, create_api_router, create_web_router, load_tls_acceptor,
};
use crate::handshake::RelayHandshake;
use crate::listener::{ListenerSettings, serve_plain, serve_secure};
use crate::registry::RelayRegistry;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{error, info};

pub struct RelayServer {
    secure_bind: SocketAddr,
    plain_bind: SocketAddr,
    settings: ListenerSettings,
    registry: RelayRegistry,
    secure: SecureDispatcher,
    plain: PlainDispatcher,
}

impl RelayServer {
    /// Build every component from `config`. Fails on unreadable TLS material
    /// or incomplete DNS settings.
    pub fn new(config: &RelayServerConfig) -> Result<Self> {
        let hostnames = Arc::new(config.hostnames());
        let registry = RelayRegistry::new();

        let mut handshake = RelayHandshake::new(
            hostnames.clone(),
            registry.clone(),
            Arc::new(config.user_directory()),
            Arc::new(Argon2Verifier),
        )
        .with_timeout(config.handshake_timeout());
        if let Some(dns_sync) = build_dns_sync(config, hostnames.api_hostname())? {
            handshake = handshake.with_dns_sync(dns_sync);
        }

        let acceptor = load_tls_acceptor(&config.tls.cert_path, &config.tls.key_path)?;
        let api_router = create_api_router(ApiState {
            registry: registry.clone(),
            handshake,
            started_at: Instant::now(),
        });
        let handlers = InternalHandlers {
            api: Arc::new(TlsHttpHandler::new("api", acceptor.clone(), api_router)),
            web: Arc::new(TlsHttpHandler::new("web", acceptor, create_web_router())),
        };

        info!(
            base_host = hostnames.base_host(),
            api = hostnames.api_hostname(),
            web = hostnames.web_hostname(),
            users = config.users.len(),
            "Relay server configured"
        );

        Ok(Self {
            secure_bind: config.listeners.secure_bind,
            plain_bind: config.listeners.plain_bind,
            settings: config.listener_settings(),
            secure: SecureDispatcher::new(hostnames.clone(), registry.clone(), handlers.clone()),
            plain: PlainDispatcher::new(hostnames, registry.clone(), handlers),
            registry,
        })
    }

    pub fn registry(&self) -> &RelayRegistry {
        &self.registry
    }

    /// Serve until Ctrl-C or until either listener fails
    pub async fn run(self) -> Result<()> {
        let secure_listener = TcpListener::bind(self.secure_bind).await?;
        let plain_listener = TcpListener::bind(self.plain_bind).await?;

        let mut secure_handle = tokio::spawn(serve_secure(
            secure_listener,
            self.settings.clone(),
            self.secure,
        ));
        let mut plain_handle =
            tokio::spawn(serve_plain(plain_listener, self.settings, self.plain));

        info!("Relay server started successfully");

        let outcome = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                Ok(())
            }
            result = &mut secure_handle => listener_exit("secure", result),
            result = &mut plain_handle => listener_exit("plain", result),
        };

        secure_handle.abort();
        plain_handle.abort();
        for relay in self.registry.list() {
            relay.close();
        }

        info!("Relay server shutdown complete");
        outcome
    }
}

fn listener_exit(
    kind: &str,
    result: std::result::Result<Result<()>, tokio::task::JoinError>,
) -> Result<()> {
    match result {
        Ok(Ok(())) => {
            error!("{kind} listener stopped unexpectedly");
            Err(RelayError::Config(format!("{kind} listener stopped")))
        }
        Ok(Err(e)) => {
            error!("{kind} listener error: {e}");
            Err(e)
        }
        Err(e) => {
            error!("{kind} listener task error: {e}");
            Err(RelayError::Config(format!("{kind} listener task failed: {e}")))
        }
    }
}

fn build_dns_sync(config: &RelayServerConfig, api_hostname: &str) -> Result<Option<DnsSync>> {
    if !config.dns.enabled {
        return Ok(None);
    }

    match config.dns.provider {
        DnsProvider::None => Ok(None),
        DnsProvider::Cloudflare => {
            let cloudflare = &config.dns.cloudflare;
            let (Some(zone_id), Some(api_token)) = (&cloudflare.zone_id, &cloudflare.api_token)
            else {
                return Err(RelayError::Config(
                    "Cloudflare DNS needs zone_id and api_token".to_string(),
                ));
            };
            let sink = CloudflareDnsSink::new(zone_id.clone(), api_token.clone())?;
            info!(zone_id = %zone_id, "Publishing relay DNS records through Cloudflare");
            Ok(Some(DnsSync::new(
                Arc::new(SystemResolver::new()),
                Arc::new(sink),
                api_hostname,
            )))
        }
    }
}
