//! Per-connection orchestration: dial the remote, wire up the two copy
//! directions and the idle watchdog, wait for the pair to finish.

use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_rustls::TlsConnector;

use super::pipe;
use super::server::ProxyState;
use super::watchdog::IdleWatchdog;
use crate::error::Result;
use crate::filter::FilterRuleSet;

/// Pulse channel capacity. Generous enough that the filtering direction
/// never has to wait for the watchdog to drain it.
const PULSE_CAPACITY: usize = 64;

/// Settings shared by every proxied pair.
pub(crate) struct PairSettings {
    pub remote: String,
    pub tls: Option<(TlsConnector, ServerName<'static>)>,
    pub rules: Arc<FilterRuleSet>,
    pub idle_timeout: Duration,
    pub hex_dump: bool,
}

/// Handle one accepted client connection to completion.
///
/// Dials the configured remote exactly once; a dial failure closes the
/// inbound socket and ends the pair without affecting any other connection.
pub(crate) async fn handle(
    client: TcpStream,
    conn: u64,
    settings: Arc<PairSettings>,
    state: Arc<ProxyState>,
) {
    tracing::info!(conn, remote = %settings.remote, "new connection");

    match dial(&settings).await {
        Ok(Remote::Plain(server)) => run_pair(client, server, conn, &settings).await,
        Ok(Remote::Tls(server)) => run_pair(client, *server, conn, &settings).await,
        Err(e) => {
            tracing::info!(conn, remote = %settings.remote, error = %e, "could not connect");
        }
    }

    state.connection_closed();
    tracing::info!(conn, remote = %settings.remote, "connection closed");
}

enum Remote {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

/// Single connection attempt to the remote, optionally TLS-wrapped.
async fn dial(settings: &PairSettings) -> Result<Remote> {
    let tcp = TcpStream::connect(&settings.remote)
        .await
        .map_err(|e| crate::error::Error::dial(format!("{}: {}", settings.remote, e)))?;

    match &settings.tls {
        None => Ok(Remote::Plain(tcp)),
        Some((connector, name)) => {
            let stream = connector
                .connect(name.clone(), tcp)
                .await
                .map_err(|e| crate::error::Error::tls(format!("{}: {}", settings.remote, e)))?;
            Ok(Remote::Tls(Box::new(stream)))
        }
    }
}

/// Run both copy directions and the watchdog, waiting for both directions.
///
/// The client→server direction is a plain copy; the server→client direction
/// runs through the filter. The watchdog owns the pulse receiver; the
/// orchestrator keeps one pulse sender alive until both directions have
/// finished, so the watchdog stays armed while either direction is still
/// running — if the server closes first, the silent client side is still
/// torn down by the idle timeout. A watchdog timeout aborts both direction
/// tasks, dropping their socket halves and thereby closing both sockets,
/// which is idempotent against whatever state the directions are in.
async fn run_pair<S>(client: TcpStream, server: S, conn: u64, settings: &PairSettings)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (client_read, client_write) = tokio::io::split(client);
    let (server_read, server_write) = tokio::io::split(server);
    let (pulse_tx, pulse_rx) = mpsc::channel(PULSE_CAPACITY);

    let hex_dump = settings.hex_dump;
    let upstream = tokio::spawn(pipe::copy_plain(client_read, server_write, conn, hex_dump));
    let downstream = tokio::spawn(pipe::copy_filtered(
        server_read,
        client_write,
        settings.rules.clone(),
        pulse_tx.clone(),
        conn,
        hex_dump,
    ));

    let watchdog = IdleWatchdog::new(settings.idle_timeout, pulse_rx, conn);
    let watchdog = tokio::spawn(watchdog.run(upstream.abort_handle(), downstream.abort_handle()));

    match upstream.await {
        Ok(Ok((read, _))) => tracing::debug!(conn, from_client = read, "upstream finished"),
        Ok(Err(e)) => tracing::info!(conn, error = %e, "upstream failed"),
        Err(e) if e.is_cancelled() => tracing::debug!(conn, "upstream cancelled by watchdog"),
        Err(e) => tracing::error!(conn, error = %e, "upstream task panicked"),
    }
    match downstream.await {
        Ok(Ok((read, written))) => {
            tracing::debug!(conn, from_server = read, to_client = written, "downstream finished");
        }
        Ok(Err(e)) => tracing::info!(conn, error = %e, "downstream failed"),
        Err(e) if e.is_cancelled() => tracing::debug!(conn, "downstream cancelled by watchdog"),
        Err(e) => tracing::error!(conn, error = %e, "downstream task panicked"),
    }

    // Only now that both directions are gone may the watchdog stand down.
    drop(pulse_tx);
    let _ = watchdog.await;
}
