//! Binary entrypoint for the Wildcat CLI.
//!
//! Commands:
//! - `start` - run the BBS server event loop
//! - `init` - create a starter `config.toml` and initialize the database
//! - `status` - print station and database summary
//!
//! See the library crate docs for module-level details: `wildcat::`.
use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{info, warn};

use wildcat::bbs::BbsServer;
use wildcat::config::Config;
use wildcat::db::Store;

#[derive(Parser)]
#[command(name = "wildcat")]
#[command(about = "A distributed bulletin board and mail system for Meshtastic mesh networks")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the BBS server
    Start,
    /// Initialize a new configuration file and database
    Init,
    /// Show station status and record counts
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Config::load(&cli.config).await.ok(),
    };
    init_logging(&pre_config, cli.verbose);

    match cli.command {
        Commands::Start => {
            let config = match pre_config {
                Some(config) => config,
                None => Config::load(&cli.config).await?,
            };
            info!("Starting Wildcat v{}", env!("CARGO_PKG_VERSION"));
            if config.mesh.node_id.is_empty() {
                warn!("mesh.node_id is not set; short-name resolution and urgent permissions may misbehave");
            }
            if config.mesh.bbs_nodes.is_empty() {
                info!("No peer BBS nodes configured; running standalone.");
            } else {
                info!("Replicating to {} peer node(s)", config.mesh.bbs_nodes.len());
            }
            let mut server = BbsServer::new(config)?;
            // The radio transport is provided by the embedding environment via
            // BbsServer::attach_transport; without one the server idles.
            info!("BBS server starting...");
            server.run().await?;
        }
        Commands::Init => {
            info!("Initializing new BBS configuration");
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);

            let config = Config::load(&cli.config).await?;
            let _store = Store::open(&config.storage.db_path)?;
            info!("Database initialized at {}", config.storage.db_path);
        }
        Commands::Status => {
            let config = match pre_config {
                Some(config) => config,
                None => Config::load(&cli.config).await?,
            };
            let server = BbsServer::new(config)?;
            server.show_status()?;
        }
    }

    Ok(())
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // Base level from CLI verbosity overrides config
    let base_level = match verbosity {
        0 => match config.as_ref().map(|c| c.logging.level.as_str()) {
            Some("debug") => log::LevelFilter::Debug,
            Some("trace") => log::LevelFilter::Trace,
            Some("warn") => log::LevelFilter::Warn,
            Some("error") => log::LevelFilter::Error,
            _ => log::LevelFilter::Info,
        },
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let log_file = config.as_ref().and_then(|c| c.logging.file.clone());
    if let Some(file) = log_file {
        if let Ok(f) = std::fs::OpenOptions::new().create(true).append(true).open(&file) {
            let mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
            // When stdout is a terminal, echo log lines there too; under a
            // service manager only the file sink is written.
            let is_tty = atty::is(atty::Stream::Stdout);
            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());
                if let Ok(mut guard) = mutex.lock() {
                    let _ = writeln!(guard, "{}", line);
                }
                if is_tty {
                    writeln!(fmt, "{}", line)
                } else {
                    Ok(())
                }
            });
        }
    } else {
        builder.format(|fmt, record| {
            writeln!(
                fmt,
                "{} [{}] {}",
                chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                record.level(),
                record.args()
            )
        });
    }
    let _ = builder.try_init();
}
