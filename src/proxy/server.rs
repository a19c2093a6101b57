//! Main proxy server

use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use tokio::net::TcpListener;
use tokio_rustls::TlsConnector;

use super::conn::{self, PairSettings};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::filter::FilterRuleSet;

/// How often the open-connection count is reported.
const REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Process-wide counters shared by the accept loop and every pair.
///
/// The open-connection count is read periodically for reporting only, so
/// relaxed ordering is all it needs.
pub(crate) struct ProxyState {
    next_id: AtomicU64,
    open_connections: AtomicI64,
}

impl ProxyState {
    fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            open_connections: AtomicI64::new(0),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn connection_opened(&self) {
        self.open_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connection_closed(&self) {
        self.open_connections.fetch_sub(1, Ordering::Relaxed);
    }

    fn open_count(&self) -> i64 {
        self.open_connections.load(Ordering::Relaxed)
    }
}

/// The main proxy server
pub struct ProxyServer {
    config: Config,
    rules: Arc<FilterRuleSet>,
    state: Arc<ProxyState>,
    listener: Option<TcpListener>,
    remote_tls_config: Option<Arc<ClientConfig>>,
}

impl ProxyServer {
    /// Create a new proxy server from configuration.
    ///
    /// Compiles the filter rule set once; an invalid omit pattern is fatal
    /// here, before the listener ever opens.
    pub fn new(config: Config) -> Result<Self> {
        let rules = Arc::new(FilterRuleSet::compile(&config.filter.omit)?);

        tracing::info!(
            omit_rules = rules.omit_count(),
            remote = %config.proxy.remote_address,
            tls = config.proxy.remote_tls,
            "Filter rules compiled"
        );

        Ok(Self {
            config,
            rules,
            state: Arc::new(ProxyState::new()),
            listener: None,
            remote_tls_config: None,
        })
    }

    /// Inject a custom TLS config for the remote connection (for testing
    /// with self-signed certificates).
    pub fn with_remote_tls_config(mut self, config: Arc<ClientConfig>) -> Self {
        self.remote_tls_config = Some(config);
        self
    }

    /// Run the proxy server with graceful shutdown
    pub async fn run_until_shutdown(
        mut self,
        shutdown: tokio::sync::oneshot::Receiver<()>,
    ) -> Result<()> {
        let local_addr = self.bind().await?;
        tracing::info!(address = %local_addr, "Proxy listening");
        self.serve(shutdown).await
    }

    /// Bind the server to its configured address and return the local
    /// address. Useful when binding to port 0 to discover the assigned port.
    /// Call `serve()` afterwards to start accepting connections.
    pub async fn bind(&mut self) -> Result<SocketAddr> {
        let listen_address = &self.config.proxy.listen_address;

        let addr: SocketAddr = listen_address.parse().map_err(|e| {
            Error::config(format!("Invalid listen address '{}': {}", listen_address, e))
        })?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::proxy(format!("Failed to bind to {}: {}", addr, e)))?;

        let local_addr = listener
            .local_addr()
            .map_err(|e| Error::proxy(format!("Failed to get local address: {}", e)))?;

        self.listener = Some(listener);
        Ok(local_addr)
    }

    /// Serve connections using a previously bound listener, with graceful
    /// shutdown. Must call `bind()` first.
    pub async fn serve(mut self, mut shutdown: tokio::sync::oneshot::Receiver<()>) -> Result<()> {
        let listener = self
            .listener
            .take()
            .expect("must call bind() before serve()");

        let settings = Arc::new(self.make_pair_settings()?);

        let reporter = tokio::spawn(report_connections(self.state.clone()));

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Shutdown signal received");
                    reporter.abort();
                    return Ok(());
                }
                result = listener.accept() => {
                    let (stream, client_addr) = match result {
                        Ok(conn) => conn,
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to accept connection");
                            continue;
                        }
                    };

                    let id = self.state.next_id();
                    self.state.connection_opened();
                    tracing::debug!(conn = id, client = %client_addr, "Accepted connection");

                    tokio::spawn(conn::handle(
                        stream,
                        id,
                        settings.clone(),
                        self.state.clone(),
                    ));
                }
            }
        }
    }

    fn make_pair_settings(&self) -> Result<PairSettings> {
        let tls = if self.config.proxy.remote_tls {
            let client_config = match &self.remote_tls_config {
                Some(config) => config.clone(),
                None => {
                    let mut roots = rustls::RootCertStore::empty();
                    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
                    Arc::new(
                        ClientConfig::builder()
                            .with_root_certificates(roots)
                            .with_no_client_auth(),
                    )
                }
            };

            let host = self.config.remote_host().to_string();
            let name = ServerName::try_from(host.clone())
                .map_err(|e| Error::tls(format!("Invalid server name '{}': {}", host, e)))?;

            Some((TlsConnector::from(client_config), name))
        } else {
            None
        };

        Ok(PairSettings {
            remote: self.config.proxy.remote_address.clone(),
            tls,
            rules: self.rules.clone(),
            idle_timeout: self.config.idle_timeout(),
            hex_dump: self.config.logging.hex_dump,
        })
    }

    /// Get the configured listen address
    pub fn listen_address(&self) -> &str {
        &self.config.proxy.listen_address
    }

    /// Currently open proxied connections.
    pub fn open_connections(&self) -> i64 {
        self.state.open_count()
    }
}

/// Periodically log how many pairs are open.
async fn report_connections(state: Arc<ProxyState>) {
    let mut interval = tokio::time::interval(REPORT_INTERVAL);
    interval.tick().await; // the first tick fires immediately
    loop {
        interval.tick().await;
        tracing::info!(open = state.open_count(), "Open connections");
    }
}
