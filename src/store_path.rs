//! The store path codec.
//!
//! A store path is the content-addressed location of one output of a Nix derivation, of the
//! form `/nix/store/<hash>-<name>`. This module only deals with the string representation: it
//! does not touch the filesystem or the binary cache.
use std::borrow::Cow;
use std::fmt;

use serde::{de, Deserialize, Deserializer, Serialize};

use crate::errors::{ErrorKind, Result};

const STORE_DIR: &str = "/nix/store/";

/// A parsed Nix store path, e.g. `/nix/store/0i2jd68mp5g6h2sa5k9hqb1vic6l2xap-glibc-2.38-dev`.
///
/// To avoid confusion with file paths inside a package, a store path is sometimes also called a
/// *package* in this crate, since it is the unit that `nix-build` produces.
#[derive(Debug, Clone, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct StorePath(String);

/// Deserializes through `parse` so a malformed value inside a channel snapshot is rejected at
/// the JSON boundary instead of producing a `StorePath` whose `hash()`/`name()` would panic.
impl<'de> Deserialize<'de> for StorePath {
    fn deserialize<D>(deserializer: D) -> std::result::Result<StorePath, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        StorePath::parse(&raw).map_err(de::Error::custom)
    }
}

impl StorePath {
    /// Parses a store path from its string representation.
    ///
    /// Fails with `MalformedStorePath` if the `/nix/store/` prefix is missing or if there is no
    /// hyphen after the hash component.
    ///
    /// # Example
    ///
    /// ```
    /// use nix_cache_index::store_path::StorePath;
    ///
    /// let sp = StorePath::parse("/nix/store/0i2jd68mp5g6h2sa5k9hqb1vic6l2xap-glibc-2.38-dev").unwrap();
    /// assert_eq!(sp.hash(), "0i2jd68mp5g6h2sa5k9hqb1vic6l2xap");
    /// assert_eq!(sp.name(), "glibc-2.38-dev");
    /// ```
    pub fn parse(path: &str) -> Result<StorePath> {
        let rest = path
            .strip_prefix(STORE_DIR)
            .ok_or_else(|| ErrorKind::MalformedStorePath(path.to_string()))?;

        if !rest.contains('-') {
            return Err(ErrorKind::MalformedStorePath(path.to_string()).into());
        }

        Ok(StorePath(path.to_string()))
    }

    /// The hash component of the store path, e.g. `0i2jd68mp5g6h2sa5k9hqb1vic6l2xap`.
    ///
    /// This is the part of the file name up to (but not including) the first hyphen.
    pub fn hash(&self) -> Cow<str> {
        let rest = &self.0[STORE_DIR.len()..];
        Cow::Borrowed(rest.split('-').next().unwrap_or(""))
    }

    /// The name component of the store path, e.g. `glibc-2.38-dev`.
    ///
    /// This is the file name with the hash and the following hyphen stripped.
    pub fn name(&self) -> Cow<str> {
        let rest = &self.0[STORE_DIR.len()..];
        let mut parts = rest.split('-');
        parts.next();
        Cow::Owned(parts.collect::<Vec<_>>().join("-"))
    }

    /// Returns the full store path as a string, e.g. `/nix/store/0i2j...-glibc-2.38-dev`.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}
