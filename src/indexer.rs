//! Orchestration of a single indexing run.
//!
//! Binds the channel loader, the fetch/decode pipeline and the index store together: validate
//! the channel, mint a run identity, stream listings through the pipeline, and commit each one.
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::StreamExt;
use tracing::{info, warn};
use uuid::Uuid;

use crate::channel::{self, ChannelSnapshot};
use crate::database::IndexStore;
use crate::errors::{ErrorKind, Result};
use crate::fetch::ListingSource;
use crate::pipeline::{self, CancelToken, DEFAULT_FETCH_CONCURRENCY, DEFAULT_OUTPUT_NAME};

/// Summary of a completed (or cancelled) indexing run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub id: Uuid,
    pub elapsed: Duration,
    pub package_count: u64,
    pub file_count: u64,
}

/// Tunables for one run of [`generate_index`]. `decode_workers` defaults to the number of
/// available CPUs, since decoding is CPU-bound.
pub struct RunOptions {
    pub fetch_concurrency: usize,
    pub decode_workers: usize,
    pub output_name: String,
    pub cancel: CancelToken,
}

impl Default for RunOptions {
    fn default() -> RunOptions {
        RunOptions {
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
            decode_workers: num_cpus::get(),
            output_name: DEFAULT_OUTPUT_NAME.to_string(),
            cancel: CancelToken::new(),
        }
    }
}

/// Runs one full indexing pass over `channel` and commits every listing it yields to `store`.
///
/// Validates the channel against the enumerated channel set before doing any work. On a storage
/// error the run aborts immediately; listings already committed remain in the store under the
/// run's `index_uuid`, which is then a partial index (see `list_indices`).
pub async fn generate_index(
    channel: &str,
    cache_dir: Option<&Path>,
    fetcher: Arc<dyn ListingSource>,
    store: &mut IndexStore,
    options: RunOptions,
) -> Result<RunSummary> {
    let known = channel::list_channels(cache_dir)?;
    if !known.iter().any(|c| c == channel) {
        return Err(ErrorKind::UnknownChannel(channel.to_string()).into());
    }

    let snapshot: ChannelSnapshot = channel::load(channel, cache_dir)?;
    let budget = snapshot.count_outputs_named(&options.output_name);
    let outputs = pipeline::eligible_outputs(&snapshot, &options.output_name, budget);

    let index_uuid = Uuid::new_v4();
    let index_date = Utc::now();
    let started = Instant::now();

    info!(
        channel,
        %index_uuid,
        eligible = outputs.len(),
        "starting index generation"
    );

    let mut stream = Box::pin(pipeline::run(
        fetcher,
        outputs,
        options.output_name.clone(),
        options.fetch_concurrency,
        options.decode_workers,
        options.cancel.clone(),
    ));

    let mut package_count = 0u64;
    let mut file_count = 0u64;

    while let Some(listing) = stream.next().await {
        if options.cancel.is_cancelled() {
            warn!(%index_uuid, "run cancelled, discarding remaining listings");
            break;
        }

        let file_total = listing.files.len() as u64;
        store.insert_package(
            index_date,
            channel,
            index_uuid,
            &listing.pkg_name,
            &listing.output_name,
            &listing.output_hash,
            &listing.version,
            &listing.files,
        )?;

        package_count += 1;
        file_count += file_total;
    }

    let elapsed = started.elapsed();
    info!(
        %index_uuid,
        package_count,
        file_count,
        elapsed_ms = elapsed.as_millis() as u64,
        "index generation finished"
    );

    Ok(RunSummary {
        id: index_uuid,
        elapsed,
        package_count,
        file_count,
    })
}
