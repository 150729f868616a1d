//! Loading channel snapshots produced by the external package-manager tool.
//!
//! A channel snapshot is a JSON dump of every derivation available in one nixpkgs channel,
//! produced out-of-band (see `fetch_channel` in this module) and read back here as a read-only
//! mapping from derivation key to `Derivation`.
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::errors::{ErrorKind, Result, ResultExt};
use crate::store_path::StorePath;

const APP_NAME: &str = "nix-cache-index";

/// One derivation entry in a channel snapshot.
#[derive(Debug, Clone, Deserialize)]
pub struct Derivation {
    /// The stable package name, e.g. `glibc`.
    pub pname: String,
    /// The package version, e.g. `2.38`.
    pub version: String,
    /// The platform triple this derivation was built for. Advisory only.
    #[serde(default)]
    pub system: String,
    /// The outputs of this derivation, keyed by output name (`out`, `dev`, `lib`, ...).
    ///
    /// Order is not meaningful; this is a mapping, not a sequence.
    pub outputs: HashMap<String, StorePath>,
}

/// A full channel snapshot: every derivation known to be available, keyed by an opaque
/// derivation identifier that is unique within the snapshot.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct ChannelSnapshot(HashMap<String, Derivation>);

/// One selected output, ready to be scheduled for fetching.
#[derive(Debug, Clone)]
pub struct DevOutput {
    pub pkg_name: String,
    pub version: String,
    pub store_path: StorePath,
}

impl ChannelSnapshot {
    /// The total number of derivations in the snapshot (not the number of outputs).
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns every output named `output_name` across all derivations.
    ///
    /// Per the current indexing policy this is called with `"dev"`: `dev` outputs carry the
    /// headers and pkg-config files that answer "which package provides `<header>.h`?", the
    /// dominant query. Derivations with no matching output contribute nothing.
    pub fn outputs_named<'a>(&'a self, output_name: &'a str) -> impl Iterator<Item = DevOutput> + 'a {
        self.0.values().filter_map(move |d| {
            d.outputs.get(output_name).map(|sp| DevOutput {
                pkg_name: d.pname.clone(),
                version: d.version.clone(),
                store_path: sp.clone(),
            })
        })
    }

    /// Counts the outputs that `outputs_named` would yield, without allocating them.
    pub fn count_outputs_named(&self, output_name: &str) -> usize {
        self.0
            .values()
            .filter(|d| d.outputs.contains_key(output_name))
            .count()
    }
}

/// Resolves the directory that holds channel snapshot files, creating it if missing.
///
/// Defaults to `<os per-user cache dir>/nix-cache-index/channels`; `cache_dir` overrides the
/// `nix-cache-index` portion of that path when given.
pub fn channels_dir(cache_dir: Option<&Path>) -> Result<PathBuf> {
    let dir = match cache_dir {
        Some(base) => base.join("channels"),
        None => {
            let xdg = xdg::BaseDirectories::with_prefix(APP_NAME).chain_err(|| ErrorKind::CacheDir)?;
            xdg.create_cache_directory("channels")
                .chain_err(|| ErrorKind::CacheDir)?
        }
    };

    fs::create_dir_all(&dir).chain_err(|| ErrorKind::CacheDir)?;
    Ok(dir)
}

/// Loads the snapshot for `channel` from `<cache_dir>/channels/<channel>.json`.
///
/// Fails with `ChannelNotFound` if the file does not exist, `MalformedSnapshot` if it cannot be
/// parsed as the expected JSON shape.
pub fn load(channel: &str, cache_dir: Option<&Path>) -> Result<ChannelSnapshot> {
    let dir = channels_dir(cache_dir)?;
    let path = dir.join(format!("{}.json", channel));

    let data = fs::read(&path)
        .map_err(|_| ErrorKind::ChannelNotFound(channel.to_string(), path.clone()))?;

    serde_json::from_slice(&data).map_err(|_| ErrorKind::MalformedSnapshot(channel.to_string()).into())
}

/// Enumerates the channels that have a snapshot on disk, stripping the `.json` suffix.
pub fn list_channels(cache_dir: Option<&Path>) -> Result<Vec<String>> {
    let dir = channels_dir(cache_dir)?;

    let mut result = Vec::new();
    for entry in fs::read_dir(&dir).chain_err(|| ErrorKind::CacheDir)? {
        let entry = entry.chain_err(|| ErrorKind::CacheDir)?;
        let file_type = entry.file_type().chain_err(|| ErrorKind::CacheDir)?;
        if !file_type.is_file() {
            continue;
        }

        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(channel) = name.strip_suffix(".json") {
            result.push(channel.to_string());
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_snapshot(dir: &Path, channel: &str, contents: &str) {
        fs::create_dir_all(dir.join("channels")).unwrap();
        fs::write(dir.join("channels").join(format!("{}.json", channel)), contents).unwrap();
    }

    #[test]
    fn loads_a_valid_snapshot() {
        let tmp = tempdir();
        write_snapshot(
            tmp.path(),
            "nixos-24.05",
            r#"{
                "glibc.x86_64-linux": {
                    "pname": "glibc",
                    "version": "2.38",
                    "system": "x86_64-linux",
                    "outputs": {
                        "out": "/nix/store/aaaa-glibc-2.38",
                        "dev": "/nix/store/bbbb-glibc-2.38-dev"
                    }
                }
            }"#,
        );

        let snapshot = load("nixos-24.05", Some(tmp.path())).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.count_outputs_named("dev"), 1);

        let outputs: Vec<_> = snapshot.outputs_named("dev").collect();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].pkg_name, "glibc");
        assert_eq!(outputs[0].store_path.hash(), "bbbb");
    }

    #[test]
    fn missing_channel_is_not_found() {
        let tmp = tempdir();
        let err = load("does-not-exist", Some(tmp.path())).unwrap_err();
        assert!(matches!(err.0, ErrorKind::ChannelNotFound(_, _)));
    }

    #[test]
    fn malformed_json_is_reported() {
        let tmp = tempdir();
        write_snapshot(tmp.path(), "broken", "not json");
        let err = load("broken", Some(tmp.path())).unwrap_err();
        assert!(matches!(err.0, ErrorKind::MalformedSnapshot(_)));
    }

    #[test]
    fn list_channels_strips_json_suffix() {
        let tmp = tempdir();
        write_snapshot(tmp.path(), "nixos-24.05", "{}");
        write_snapshot(tmp.path(), "nixos-unstable", "{}");

        let mut channels = list_channels(Some(tmp.path())).unwrap();
        channels.sort();
        assert_eq!(channels, vec!["nixos-24.05".to_string(), "nixos-unstable".to_string()]);
    }

    #[test]
    fn list_channels_creates_missing_directory() {
        let tmp = tempdir();
        let channels = list_channels(Some(tmp.path())).unwrap();
        assert!(channels.is_empty());
        assert!(tmp.path().join("channels").is_dir());
    }

    /// A minimal temp-directory helper so tests don't need an external crate for it.
    struct TempDir(PathBuf);

    impl TempDir {
        fn path(&self) -> &Path {
            &self.0
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.0);
        }
    }

    fn tempdir() -> TempDir {
        let mut dir = std::env::temp_dir();
        let unique = uuid::Uuid::new_v4();
        dir.push(format!("nix-cache-index-test-{}", unique));
        fs::create_dir_all(&dir).unwrap();
        TempDir(dir)
    }
}
