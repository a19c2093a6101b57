//! End-to-end test with a TLS-wrapped remote server.

mod common;

use std::sync::Arc;

use common::{read_exact_or_eof, TestProxy};
use imapveil::test_report;
use rustls::pki_types::PrivateKeyDer;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

const GREETING: &[u8] = b"* OK [CAPABILITY IMAP4rev1 COMPRESS=DEFLATE IDLE] secure ready\r\n";
const GREETING_FILTERED: &[u8] = b"* OK [CAPABILITY IMAP4rev1 IDLE] secure ready\r\n";

/// A minimal TLS IMAP server that greets and then swallows input.
async fn start_tls_server() -> (std::net::SocketAddr, Arc<rustls::ClientConfig>) {
    let certified =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string(), "127.0.0.1".to_string()])
            .unwrap();
    let cert_der = certified.cert.der().clone();
    let key_der = PrivateKeyDer::Pkcs8(certified.key_pair.serialize_der().into());

    let server_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert_der.clone()], key_der)
        .unwrap();
    let acceptor = TlsAcceptor::from(Arc::new(server_config));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => return,
            };
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                let mut tls = match acceptor.accept(stream).await {
                    Ok(tls) => tls,
                    Err(_) => return,
                };
                if tls.write_all(GREETING).await.is_err() {
                    return;
                }
                let mut buf = [0u8; 4096];
                loop {
                    match tokio::io::AsyncReadExt::read(&mut tls, &mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(_) => {}
                    }
                }
            });
        }
    });

    // Client side trusts exactly this certificate.
    let mut roots = rustls::RootCertStore::empty();
    roots.add(cert_der).unwrap();
    let client_config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();

    (addr, Arc::new(client_config))
}

#[tokio::test]
async fn test_filtering_through_tls_remote() {
    let t = test_report!("Responses from a TLS remote are filtered like plain ones");

    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let (server_addr, client_config) = start_tls_server().await;
    let proxy = TestProxy::start_tls(server_addr, &["archive"], 30, client_config).await;

    let mut client = TcpStream::connect(proxy.addr()).await.unwrap();
    let got = read_exact_or_eof(&mut client, GREETING_FILTERED.len()).await;

    t.assert_eq(
        "greeting seen by client",
        &String::from_utf8_lossy(&got).into_owned().as_str(),
        &std::str::from_utf8(GREETING_FILTERED).unwrap(),
    );

    proxy.shutdown();
}
