//! The fetch-and-decode pipeline.
//!
//! Turns a channel snapshot into a stream of `Listing`s: for every eligible output, fetch its
//! `.ls` document from the binary cache, then decode it into a flat file list. Both stages are
//! bounded-concurrency fan-outs; a per-output failure at either stage is logged and the output
//! is dropped, it never fails the whole stream.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future;
use futures::stream::{self, Stream, StreamExt};
use tracing::warn;

use crate::channel::{ChannelSnapshot, DevOutput};
use crate::fetch::ListingSource;
use crate::listing::decode_listing;

/// A cooperative cancellation flag shared between a controller and the pipeline it drives.
///
/// Cancelling closes the fetch-input gate: outputs not yet dispatched are dropped without
/// making a request. Fetches already in flight are allowed to finish, but their payloads are
/// discarded rather than handed to the decode stage.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Default number of in-flight HTTP requests, chosen to keep the binary cache unsaturated
/// without leaving the pipeline starved (see the concurrency guidance in the design doc).
pub const DEFAULT_FETCH_CONCURRENCY: usize = 64;

/// The output name selected for indexing by default: `dev` outputs carry headers and
/// pkg-config files, which is what answers the dominant "which package provides this header?"
/// query.
pub const DEFAULT_OUTPUT_NAME: &str = "dev";

/// A fully decoded listing, ready to be written to the index store.
#[derive(Debug, Clone)]
pub struct Listing {
    pub pkg_name: String,
    pub output_name: String,
    pub output_hash: String,
    pub version: String,
    pub files: Vec<String>,
}

struct RawListing {
    pkg_name: String,
    output_name: String,
    output_hash: String,
    version: String,
    data: Vec<u8>,
}

/// Selects the outputs eligible for indexing, stopping once `budget` have been chosen.
///
/// When `budget` is at least the number of eligible outputs in the snapshot, every eligible
/// output is returned.
pub fn eligible_outputs(
    snapshot: &ChannelSnapshot,
    output_name: &str,
    budget: usize,
) -> Vec<DevOutput> {
    snapshot.outputs_named(output_name).take(budget).collect()
}

/// Builds the fetch-then-decode stream for the given set of outputs.
///
/// `fetch_concurrency` bounds in-flight HTTP requests; `decode_workers` bounds concurrently
/// running JSON decodes (decoding is CPU-bound and runs on a blocking thread so it cannot stall
/// the async runtime). Neither stage ever propagates a per-output error outward: failures are
/// logged via `tracing` and the output is simply absent from the resulting stream.
pub fn run(
    fetcher: Arc<dyn ListingSource>,
    outputs: Vec<DevOutput>,
    output_name: String,
    fetch_concurrency: usize,
    decode_workers: usize,
    cancel: CancelToken,
) -> impl Stream<Item = Listing> {
    let fetch_stage = stream::iter(outputs.into_iter().map(move |out| {
        let fetcher = Arc::clone(&fetcher);
        let output_name = output_name.clone();
        let cancel = cancel.clone();
        async move {
            if cancel.is_cancelled() {
                return None;
            }
            let hash = out.store_path.hash().into_owned();
            match fetcher.fetch_listing(&out.store_path).await {
                Ok(data) => {
                    if cancel.is_cancelled() {
                        return None;
                    }
                    Some(RawListing {
                        pkg_name: out.pkg_name,
                        output_name,
                        output_hash: hash,
                        version: out.version,
                        data,
                    })
                }
                Err(e) => {
                    warn!(pkg = %out.pkg_name, hash = %hash, error = %e, "fetch failed, dropping output");
                    None
                }
            }
        }
    }))
    .buffer_unordered(fetch_concurrency)
    .filter_map(future::ready);

    fetch_stage
        .map(|raw: RawListing| async move {
            let RawListing {
                pkg_name,
                output_name,
                output_hash,
                version,
                data,
            } = raw;
            let pkg_for_log = pkg_name.clone();
            let hash_for_log = output_hash.clone();

            match tokio::task::spawn_blocking(move || decode_listing(&data)).await {
                Ok(Ok(files)) => Some(Listing {
                    pkg_name,
                    output_name,
                    output_hash,
                    version,
                    files,
                }),
                Ok(Err(e)) => {
                    warn!(pkg = %pkg_for_log, hash = %hash_for_log, error = %e, "decode failed, dropping output");
                    None
                }
                Err(join_err) => {
                    warn!(pkg = %pkg_for_log, hash = %hash_for_log, error = %join_err, "decode task panicked, dropping output");
                    None
                }
            }
        })
        .buffer_unordered(decode_workers)
        .filter_map(future::ready)
}
