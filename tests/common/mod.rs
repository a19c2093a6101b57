//! Test infrastructure for e2e proxy tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use imapveil::{Config, ProxyServer};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

// ---------------------------------------------------------------------------
// MockImapServer
// ---------------------------------------------------------------------------

/// A scripted stand-in for the real IMAP server.
///
/// Every accepted connection gets `greeting` immediately. If `reply` is set,
/// it is written once the first complete client line arrives. All bytes
/// received from the proxy are recorded for inspection.
pub struct MockImapServer {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<u8>>>,
    accept_task: tokio::task::JoinHandle<()>,
}

impl MockImapServer {
    pub async fn start(greeting: &[u8], reply: Option<&[u8]>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));

        let greeting = greeting.to_vec();
        let reply = reply.map(|r| r.to_vec());
        let record = received.clone();

        let accept_task = tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => return,
                };
                tokio::spawn(serve_scripted(
                    stream,
                    greeting.clone(),
                    reply.clone(),
                    record.clone(),
                ));
            }
        });

        Self {
            addr,
            received,
            accept_task,
        }
    }

    /// Like `start`, but the server hangs up right after the greeting, the
    /// way a real server drops a client it rejects.
    pub async fn start_close_after_greeting(greeting: &[u8]) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));

        let greeting = greeting.to_vec();
        let accept_task = tokio::spawn(async move {
            loop {
                let (mut stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => return,
                };
                let greeting = greeting.clone();
                tokio::spawn(async move {
                    let _ = stream.write_all(&greeting).await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        Self {
            addr,
            received,
            accept_task,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// All bytes received from the proxy so far.
    pub fn received(&self) -> Vec<u8> {
        self.received.lock().unwrap().clone()
    }

    pub fn shutdown(&self) {
        self.accept_task.abort();
    }
}

async fn serve_scripted(
    mut stream: TcpStream,
    greeting: Vec<u8>,
    reply: Option<Vec<u8>>,
    record: Arc<Mutex<Vec<u8>>>,
) {
    if stream.write_all(&greeting).await.is_err() {
        return;
    }

    let mut reply = reply;
    let mut line_buf = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        record.lock().unwrap().extend_from_slice(&buf[..n]);
        line_buf.extend_from_slice(&buf[..n]);

        // Send the scripted reply once the first full command line arrives.
        if line_buf.windows(2).any(|w| w == b"\r\n") {
            if let Some(r) = reply.take() {
                if stream.write_all(&r).await.is_err() {
                    return;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// TestProxy
// ---------------------------------------------------------------------------

/// A running proxy bound to an ephemeral port.
pub struct TestProxy {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl TestProxy {
    pub async fn start(remote: SocketAddr, omit: &[&str], idle_timeout_secs: u64) -> Self {
        Self::start_with(remote, omit, idle_timeout_secs, None).await
    }

    /// Start a proxy that wraps the remote connection in TLS using the given
    /// client config (tests trust a self-signed cert this way).
    pub async fn start_tls(
        remote: SocketAddr,
        omit: &[&str],
        idle_timeout_secs: u64,
        tls: Arc<rustls::ClientConfig>,
    ) -> Self {
        Self::start_with(remote, omit, idle_timeout_secs, Some(tls)).await
    }

    async fn start_with(
        remote: SocketAddr,
        omit: &[&str],
        idle_timeout_secs: u64,
        tls: Option<Arc<rustls::ClientConfig>>,
    ) -> Self {
        let mut cfg = Config::parse("").unwrap();
        cfg.proxy.listen_address = "127.0.0.1:0".to_string();
        cfg.proxy.remote_address = remote.to_string();
        cfg.proxy.remote_tls = tls.is_some();
        cfg.proxy.idle_timeout_secs = idle_timeout_secs;
        cfg.filter.omit = omit.iter().map(|s| s.to_string()).collect();

        let mut server = ProxyServer::new(cfg).unwrap();
        if let Some(tls) = tls {
            server = server.with_remote_tls_config(tls);
        }

        let addr = server.bind().await.unwrap();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        tokio::spawn(async move {
            let _ = server.serve(shutdown_rx).await;
        });

        Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

// ---------------------------------------------------------------------------
// Client helpers
// ---------------------------------------------------------------------------

/// Read from `stream` until `total` bytes have arrived or EOF.
pub async fn read_exact_or_eof(stream: &mut TcpStream, total: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(total);
    let mut buf = [0u8; 4096];
    while out.len() < total {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => out.extend_from_slice(&buf[..n]),
        }
    }
    out
}

/// Read everything until the peer closes the connection.
pub async fn read_to_eof(stream: &mut TcpStream) -> Vec<u8> {
    let mut out = Vec::new();
    let _ = stream.read_to_end(&mut out).await;
    out
}
