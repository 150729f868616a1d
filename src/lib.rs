#![cfg_attr(
    feature = "cargo-clippy",
    warn(
        clippy::manual_filter_map,
        clippy::map_unwrap_or,
        clippy::module_name_repetitions,
        clippy::print_stdout,
        clippy::unwrap_used,
    )
)]

pub mod channel;
pub mod database;
pub mod errors;
pub mod fetch;
pub mod indexer;
pub mod listing;
pub mod pipeline;
pub mod store_path;

/// The base URL of the binary cache that file listings are fetched from.
///
/// Hardcoded as a default, but overridable per `Fetcher::new` by any caller (the CLI exposes
/// this as a flag).
pub const CACHE_URL: &str = "https://cache.nixos.org";
