//! The proxy server: accept loop, per-connection orchestration, the
//! filtering copy engine and the idle watchdog.

mod conn;
mod pipe;
mod server;
mod watchdog;

pub use server::ProxyServer;
