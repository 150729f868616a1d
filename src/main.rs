//! Command-line entrypoint: exposes the indexing pipeline as a set of subcommands.
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use error_chain::ChainedError;
use tracing_subscriber::EnvFilter;

use nix_cache_index::database::IndexStore;
use nix_cache_index::errors::*;
use nix_cache_index::fetch::Fetcher;
use nix_cache_index::indexer::{self, RunOptions};
use nix_cache_index::{channel, database};

#[derive(Debug, Parser)]
#[clap(author, version, about = "Indexes file listings from a Nix binary cache")]
struct Args {
    /// Override the cache directory (channels + index database). Defaults to the
    /// OS per-user cache directory.
    #[clap(long, env = "NIX_CACHE_INDEX_CACHE_DIR", global = true)]
    cache_dir: Option<PathBuf>,

    /// Increase log verbosity; repeat for more (-v, -vv).
    #[clap(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Writes the channel snapshot produced by the external package-manager tool to disk.
    ///
    /// This subcommand only ingests a JSON document that has already been produced; it does not
    /// itself invoke the package manager.
    FetchChannel {
        /// The channel name, e.g. `nixos-24.05`.
        channel: String,
        /// Path to a JSON document already produced by the external tool, or `-` for stdin.
        from: PathBuf,
    },
    /// Generates a fresh index for a channel, returning its run id.
    GenerateIndex {
        channel: String,
        /// Binary cache base URL to fetch listings from.
        #[clap(long, env = "NIX_CACHE_INDEX_CACHE_URL", default_value = "https://cache.nixos.org")]
        cache_url: String,
        /// Maximum in-flight HTTP fetches.
        #[clap(long, default_value_t = nix_cache_index::pipeline::DEFAULT_FETCH_CONCURRENCY)]
        fetch_concurrency: usize,
        /// Per-request HTTP timeout, in seconds.
        #[clap(long, default_value_t = 30)]
        request_timeout_secs: u64,
    },
    /// Looks a file up by full path or basename within one index.
    QueryIndex {
        /// The run id returned by `generate-index`.
        id: uuid::Uuid,
        /// A full path (e.g. `/include/stdio.h`) or a basename (e.g. `stdio.h`).
        param: String,
    },
    /// Lists channels that have a snapshot on disk.
    ListChannels,
    /// Lists the indexing runs recorded for a channel, most recent first.
    ListIndices { channel: String },
}

fn init_logging(verbose: u8) {
    let default_filter = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn run(args: Args) -> Result<()> {
    let cache_dir = args.cache_dir.as_deref();

    match args.command {
        Command::FetchChannel { channel, from } => {
            let data = if from.as_os_str() == "-" {
                use std::io::Read;
                let mut buf = Vec::new();
                std::io::stdin().read_to_end(&mut buf)?;
                buf
            } else {
                std::fs::read(&from)?
            };

            // Validate it parses before committing it to the channel directory.
            serde_json::from_slice::<serde_json::Value>(&data)
                .map_err(|_| ErrorKind::MalformedSnapshot(channel.clone()))?;

            let dir = channel::channels_dir(cache_dir)?;
            std::fs::write(dir.join(format!("{}.json", channel)), &data)?;
            println!("wrote channel snapshot for '{}'", channel);
            Ok(())
        }

        Command::GenerateIndex {
            channel,
            cache_url,
            fetch_concurrency,
            request_timeout_secs,
        } => {
            let fetcher = Arc::new(
                Fetcher::new(cache_url)
                    .with_request_timeout(std::time::Duration::from_secs(request_timeout_secs)),
            );
            let db_path = database::default_db_path(cache_dir)?;
            let mut store = IndexStore::open(db_path)?;

            let options = RunOptions {
                fetch_concurrency,
                ..RunOptions::default()
            };

            let summary = indexer::generate_index(&channel, cache_dir, fetcher, &mut store, options)
                .await?;

            println!(
                "index {} : {} packages, {} files in {:.1}s",
                summary.id,
                summary.package_count,
                summary.file_count,
                summary.elapsed.as_secs_f64()
            );
            Ok(())
        }

        Command::QueryIndex { id, param } => {
            let db_path = database::default_db_path(cache_dir)?;
            let store = IndexStore::open(db_path)?;
            let results = store.query(id, &param)?;

            if results.is_empty() {
                println!("no matches");
            }
            for r in results {
                println!(
                    "{}.{} ({}) -> {}",
                    r.pkg_name, r.output_name, r.version, r.full_path
                );
            }
            Ok(())
        }

        Command::ListChannels => {
            for c in channel::list_channels(cache_dir)? {
                println!("{}", c);
            }
            Ok(())
        }

        Command::ListIndices { channel } => {
            let db_path = database::default_db_path(cache_dir)?;
            let store = IndexStore::open(db_path)?;
            for info in store.list_indices(&channel)? {
                println!("{} {} {} files", info.id, info.date.to_rfc3339(), info.file_count);
            }
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    if let Err(e) = run(args).await {
        eprintln!("error: {}", e.display_chain());
        process::exit(1);
    }
}
