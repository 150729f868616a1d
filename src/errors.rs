//! The crate-wide error type.
//!
//! Every fallible operation in this crate returns into this module's `Result` alias. Error
//! kinds carry enough context (which store path, which url, which channel) to produce a useful
//! message without the caller having to reconstruct it.
use std::path::PathBuf;

error_chain::error_chain! {
    errors {
        MalformedStorePath(path: String) {
            description("malformed store path")
            display("'{}' is not a valid store path, expected '$(store_dir)/$(hash)-$(name)'", path)
        }
        MalformedListing(reason: String) {
            description("malformed file listing")
            display("failed to parse file listing: {}", reason)
        }
        DecompressionError(encoding: String) {
            description("decompression error")
            display("failed to decompress a response body encoded as '{}'", encoding)
        }
        ChannelNotFound(channel: String, path: PathBuf) {
            description("channel not found")
            display("no channel snapshot for '{}' at '{}' (did you run fetch-channel?)", channel, path.to_string_lossy())
        }
        UnknownChannel(channel: String) {
            description("unknown channel")
            display("'{}' is not a known channel (see list-channels)", channel)
        }
        MalformedSnapshot(channel: String) {
            description("malformed channel snapshot")
            display("failed to parse the channel snapshot for '{}'", channel)
        }
        FetchFailed(url: String) {
            description("listing fetch failed")
            display("fetching '{}' failed", url)
        }
        Http(url: String, status: u16) {
            description("http error")
            display("request to '{}' failed with status {}", url, status)
        }
        StorageError(detail: String) {
            description("index storage error")
            display("index store operation failed: {}", detail)
        }
        CacheDir {
            description("cache directory error")
            display("failed to resolve or create the cache directory")
        }
        Cancelled {
            description("operation cancelled")
            display("the operation was cancelled")
        }
    }

    foreign_links {
        Io(std::io::Error);
        Json(serde_json::Error);
        Sqlite(rusqlite::Error);
        Hyper(hyper::Error);
    }
}
