//! Imapveil - a transparent filtering IMAP proxy
//!
//! This crate sits between an IMAP client and its server and rewrites the
//! server's responses in flight, without either endpoint noticing:
//!
//! - **Mailbox hiding**: LIST/LSUB response lines whose mailbox name matches
//!   a configured pattern are deleted, so entire hierarchies (archive
//!   folders, say) never reach the client.
//! - **Compression suppression**: the COMPRESS=DEFLATE token is stripped
//!   from CAPABILITY announcements, because a compressed stream could not be
//!   filtered at all.
//!
//! Rewrites happen only at response-line boundaries on the server→client
//! path; the client→server path is forwarded untouched. No IMAP parsing is
//! done beyond matching those two line shapes.
//!
//! # Example
//!
//! ```no_run
//! use imapveil::{Config, ProxyServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_file("config.toml")?;
//!     let server = ProxyServer::new(config)?;
//!     let (_tx, rx) = tokio::sync::oneshot::channel();
//!     server.run_until_shutdown(rx).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod filter;
pub mod proxy;
#[doc(hidden)]
pub mod test_support;

pub use config::Config;
pub use error::{Error, Result};
pub use filter::FilterRuleSet;
pub use proxy::ProxyServer;
