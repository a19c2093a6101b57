//! Imapveil CLI - a transparent filtering IMAP proxy

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use imapveil::{Config, FilterRuleSet, ProxyServer};

#[derive(Parser)]
#[command(name = "imapveil")]
#[command(about = "A filtering IMAP proxy that hides mailboxes and disables wire compression")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the proxy
    Run {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Listen address (overrides config)
        #[arg(short, long)]
        listen: Option<String>,

        /// Remote IMAP server as host:port (overrides config)
        #[arg(short, long)]
        remote: Option<String>,

        /// Use TLS for the remote connection (overrides config)
        #[arg(long)]
        tls: bool,

        /// Idle timeout in seconds (overrides config)
        #[arg(long)]
        timeout: Option<u64>,

        /// Mailbox pattern to omit from LIST/LSUB (may be repeated)
        #[arg(short, long)]
        omit: Vec<String>,

        /// Hex-dump every read and write (requires debug log level)
        #[arg(long)]
        hex_dump: bool,

        /// Log level (error, warn, info, debug, trace)
        #[arg(long, default_value = "info")]
        log_level: String,
    },

    /// Validate a configuration file
    ValidateConfig {
        /// Path to configuration file
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            listen,
            remote,
            tls,
            timeout,
            omit,
            hex_dump,
            log_level,
        } => {
            // Initialize logging
            let filter =
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level));

            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();

            // Load config
            let mut cfg = if let Some(config_path) = config {
                tracing::info!(path = %config_path.display(), "Loading configuration");
                Config::from_file(&config_path)?
            } else {
                Config::parse("")?
            };

            // Apply CLI overrides
            if let Some(addr) = listen {
                cfg.proxy.listen_address = addr;
            }
            if let Some(addr) = remote {
                cfg.proxy.remote_address = addr;
            }
            if tls {
                cfg.proxy.remote_tls = true;
            }
            if let Some(secs) = timeout {
                cfg.proxy.idle_timeout_secs = secs;
            }
            if !omit.is_empty() {
                cfg.filter.omit = omit;
            }
            if hex_dump {
                cfg.logging.hex_dump = true;
            }

            let server = ProxyServer::new(cfg)?;

            // Handle Ctrl+C
            let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                tracing::info!("Shutting down...");
                let _ = shutdown_tx.send(());
            });

            server.run_until_shutdown(shutdown_rx).await?;
        }

        Commands::ValidateConfig { config } => {
            println!("Validating configuration: {}", config.display());

            let cfg = Config::from_file(&config)?;

            println!("Configuration is valid!");
            println!();
            println!("  Listen address: {}", cfg.proxy.listen_address);
            println!("  Remote address: {}", cfg.proxy.remote_address);
            println!("  Remote TLS: {}", cfg.proxy.remote_tls);
            println!("  Idle timeout: {}s", cfg.proxy.idle_timeout_secs);
            println!("  Log level: {}", cfg.logging.level);
            println!("  Hex dump: {}", cfg.logging.hex_dump);
            println!("  Omit patterns: {}", cfg.filter.omit.len());

            if !cfg.filter.omit.is_empty() {
                println!();
                println!("Omit patterns:");
                for (i, pattern) in cfg.filter.omit.iter().enumerate() {
                    println!("  {}. {}", i + 1, pattern);
                }
            }

            let rules = FilterRuleSet::compile(&cfg.filter.omit)?;
            println!();
            println!(
                "All {} omit rules compiled successfully.",
                rules.omit_count()
            );
        }
    }

    Ok(())
}
