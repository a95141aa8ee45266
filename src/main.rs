mod cli;
mod config;

use std::io;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{debug, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use config::Overrides;
use gopher_client_core::GopherClient;

/// Command-line Gopher client.
///
/// URLs look like gopher://host[:port]/[type][selector][?query]; use
/// gophers:// for TLS.
///
/// Output is auto-JSON when stdout is piped. Force with --json.
#[derive(Parser, Debug)]
#[command(name = "gopher-client", version)]
struct Args {
    /// Config file (default: ~/.gopher-client.toml)
    #[arg(long, global = true, env = "GOPHER_CLIENT_CONFIG")]
    config: Option<PathBuf>,

    /// Force JSON output (auto-enabled when stdout is piped)
    #[arg(long, global = true)]
    json: bool,

    /// Bypass the response cache
    #[arg(long, global = true)]
    no_cache: bool,

    /// Timeout in seconds for each network phase
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Use TLS even for gopher:// URLs
    #[arg(long, global = true)]
    ssl: bool,

    /// Only connect over IPv4
    #[arg(long, global = true, conflicts_with = "ipv6")]
    ipv4: bool,

    /// Only connect over IPv6
    #[arg(long, global = true)]
    ipv6: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch a menu or document (default: the configured server)
    Fetch {
        url: Option<String>,
    },

    /// Query a search server
    Search {
        /// Search server URL (e.g., gopher://gopher.floodgap.com/7/v2/vs)
        url: String,

        /// Search query
        query: String,
    },

    /// Download a resource to a file
    Save {
        url: String,

        /// Destination file
        path: PathBuf,
    },

    /// Report whether a string is a gopher URL (exit 1 if not)
    Check {
        url: String,
    },

    /// Inspect or clear the response cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
    /// Delete every cached response
    Clear,
    /// Show entry count and size
    Stats,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let json = cli::use_json(args.json);

    if let Err(e) = run(args, json).await {
        cli::handle_error(e, json);
    }
}

async fn run(args: Args, json: bool) -> Result<()> {
    let loaded = config::load(args.config.as_deref())?;
    let mut config = loaded.config;

    // Tracing to stderr, never stdout
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let subscriber = FmtSubscriber::builder()
        .with_writer(io::stderr)
        .with_ansi(false)
        .with_env_filter(filter)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    for (path, error) in &loaded.skipped {
        warn!(path = %path.display(), error = %error, "Failed to parse config, skipping");
    }
    if let Some(path) = &loaded.path {
        debug!(path = %path.display(), "Loaded config");
    }

    if let Command::Check { url } = &args.command {
        if !cli::check(url, json) {
            std::process::exit(1);
        }
        return Ok(());
    }

    let use_ipv6 = match (args.ipv4, args.ipv6) {
        (true, _) => Some(false),
        (_, true) => Some(true),
        _ => None,
    };
    config::apply(
        &mut config,
        &Overrides {
            no_cache: args.no_cache,
            timeout: args.timeout,
            ssl: args.ssl,
            use_ipv6,
        },
    );

    if matches!(args.command, Command::Cache { .. }) && !config.cache.enabled {
        anyhow::bail!("Cache is disabled");
    }

    let client = GopherClient::from_config(&config)?;

    match args.command {
        Command::Fetch { url } => {
            let url = url.unwrap_or_else(|| config.gopher.default_server.clone());
            cli::fetch(&client, &url, json).await
        }
        Command::Search { url, query } => cli::search(&client, &url, &query, json).await,
        Command::Save { url, path } => cli::save(&client, &url, &path, json).await,
        Command::Cache { action } => match action {
            CacheAction::Clear => cli::cache_clear(&client, json),
            CacheAction::Stats => cli::cache_stats(&client, json),
        },
        Command::Check { .. } => Ok(()),
    }
}
