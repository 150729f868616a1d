//! Decoding of `.ls` file listings served by the binary cache.
//!
//! A listing is a JSON document describing the directory tree of one store path. This module
//! handles both halves of turning the raw HTTP response body into a flat list of file paths:
//! picking the right decompressor based on `Content-Encoding`, and walking the resulting JSON
//! tree breadth-first.
use std::collections::VecDeque;
use std::io::Read;

use serde_json::Value;

use crate::errors::{ErrorKind, Result};

/// The compression schemes the binary cache may use for `.ls` responses.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ContentEncoding {
    /// Listings served compressed with Brotli (the current format).
    Brotli,
    /// Listings served compressed with XZ (the legacy format).
    Xz,
    /// No compression at all.
    Identity,
}

impl ContentEncoding {
    /// Determines the encoding from the value of an HTTP `Content-Encoding` header.
    ///
    /// The match is exact and case-insensitive; among `br` and `xz` the first one present wins.
    /// Absence of the header, or any other value, is treated as `Identity` (the nix-index
    /// source is forward-compatible with caches that don't compress at all).
    pub fn from_header(header: Option<&str>) -> ContentEncoding {
        match header.map(|v| v.trim().to_ascii_lowercase()) {
            Some(ref v) if v == "br" => ContentEncoding::Brotli,
            Some(ref v) if v == "xz" => ContentEncoding::Xz,
            _ => ContentEncoding::Identity,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ContentEncoding::Brotli => "br",
            ContentEncoding::Xz => "xz",
            ContentEncoding::Identity => "identity",
        }
    }
}

/// Decompresses a response body according to the given encoding.
pub fn decompress(body: &[u8], encoding: ContentEncoding) -> Result<Vec<u8>> {
    match encoding {
        ContentEncoding::Brotli => {
            let mut out = Vec::new();
            brotli_decompressor::Decompressor::new(body, 4096)
                .read_to_end(&mut out)
                .map_err(|_| ErrorKind::DecompressionError(encoding.label().to_string()))?;
            Ok(out)
        }
        ContentEncoding::Xz => {
            let mut out = Vec::new();
            xz2::read::XzDecoder::new(body)
                .read_to_end(&mut out)
                .map_err(|_| ErrorKind::DecompressionError(encoding.label().to_string()))?;
            Ok(out)
        }
        ContentEncoding::Identity => Ok(body.to_vec()),
    }
}

/// Decodes a decompressed `.ls` document into the flat list of file paths it contains.
///
/// Traversal is breadth-first starting from the synthetic `root` node. Directory entries are
/// descended into regardless of whether their name contains a `.` — only `/` ever separates
/// path segments in the output. Symlinks and executables are emitted the same way as regular
/// files; their target or executable bit is not indexed. Nodes with an unrecognized `type` are
/// skipped silently, to stay forward-compatible with cache additions.
pub fn decode_listing(document: &[u8]) -> Result<Vec<String>> {
    let doc: Value = serde_json::from_slice(document)
        .map_err(|e| ErrorKind::MalformedListing(e.to_string()))?;

    let root = doc
        .get("root")
        .ok_or_else(|| ErrorKind::MalformedListing("missing 'root' key".to_string()))?;

    let mut files = Vec::new();
    let mut queue: VecDeque<(Vec<String>, &Value)> = VecDeque::new();
    queue.push_back((Vec::new(), root));

    while let Some((segments, node)) = queue.pop_front() {
        let typ = node
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| ErrorKind::MalformedListing("node missing 'type'".to_string()))?;

        match typ {
            "directory" => {
                let entries = node.get("entries").and_then(Value::as_object).ok_or_else(|| {
                    ErrorKind::MalformedListing("directory node missing 'entries'".to_string())
                })?;
                for (name, child) in entries {
                    let mut child_segments = segments.clone();
                    child_segments.push(name.clone());
                    queue.push_back((child_segments, child));
                }
            }
            "regular" | "symlink" | "executable" => {
                files.push(format!("/{}", segments.join("/")));
            }
            _ => {
                // forward-compatible: ignore node types we don't know about
            }
        }
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::io::Write;

    #[test]
    fn traverses_nested_directories() {
        let doc = br#"{"root":{"type":"directory","entries":{"bin":{"type":"directory","entries":{"foo":{"type":"regular"}}},"a.b":{"type":"regular"}}}}"#;
        let files: HashSet<_> = decode_listing(doc).unwrap().into_iter().collect();
        let expected: HashSet<_> = ["/bin/foo", "/a.b"].into_iter().map(String::from).collect();
        assert_eq!(files, expected);
    }

    #[test]
    fn empty_directory_contributes_nothing() {
        let doc = br#"{"root":{"type":"directory","entries":{}}}"#;
        assert_eq!(decode_listing(doc).unwrap(), Vec::<String>::new());
    }

    #[test]
    fn dot_is_not_a_path_separator() {
        let doc = br#"{"root":{"type":"directory","entries":{"share":{"type":"directory","entries":{"a.b.c":{"type":"regular"}}}}}}"#;
        let files = decode_listing(doc).unwrap();
        assert_eq!(files, vec!["/share/a.b.c".to_string()]);
    }

    #[test]
    fn unknown_node_type_is_skipped() {
        let doc = br#"{"root":{"type":"directory","entries":{"weird":{"type":"from-the-future"},"ok":{"type":"regular"}}}}"#;
        assert_eq!(decode_listing(doc).unwrap(), vec!["/ok".to_string()]);
    }

    #[test]
    fn root_as_regular_file_yields_slash() {
        let doc = br#"{"root":{"type":"regular"}}"#;
        assert_eq!(decode_listing(doc).unwrap(), vec!["/".to_string()]);
    }

    #[test]
    fn missing_root_is_malformed() {
        let doc = br#"{"notroot":{}}"#;
        assert!(decode_listing(doc).is_err());
    }

    #[test]
    fn directory_without_entries_is_malformed() {
        let doc = br#"{"root":{"type":"directory"}}"#;
        assert!(decode_listing(doc).is_err());
    }

    #[test]
    fn decoder_is_idempotent() {
        let doc = br#"{"root":{"type":"directory","entries":{"bin":{"type":"regular"},"lib":{"type":"regular"}}}}"#;
        let first: HashSet<_> = decode_listing(doc).unwrap().into_iter().collect();
        let second: HashSet<_> = decode_listing(doc).unwrap().into_iter().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn content_encoding_from_header() {
        assert_eq!(ContentEncoding::from_header(Some("br")), ContentEncoding::Brotli);
        assert_eq!(ContentEncoding::from_header(Some("XZ")), ContentEncoding::Xz);
        assert_eq!(ContentEncoding::from_header(Some("gzip")), ContentEncoding::Identity);
        assert_eq!(ContentEncoding::from_header(None), ContentEncoding::Identity);
    }

    #[test]
    fn identity_round_trips_bytes() {
        let body = b"just some bytes";
        assert_eq!(decompress(body, ContentEncoding::Identity).unwrap(), body);
    }

    /// `{"root":{"type":"regular"}}`, compressed with a real Brotli encoder at quality 11.
    const BROTLI_FIXTURE: &[u8] = &[
        0x0f, 0x0d, 0x80, 0x7b, 0x22, 0x72, 0x6f, 0x6f, 0x74, 0x22, 0x3a, 0x7b, 0x22, 0x74, 0x79,
        0x70, 0x65, 0x22, 0x3a, 0x22, 0x72, 0x65, 0x67, 0x75, 0x6c, 0x61, 0x72, 0x22, 0x7d, 0x7d,
        0x03,
    ];

    #[test]
    fn brotli_round_trips_a_real_listing() {
        let out = decompress(BROTLI_FIXTURE, ContentEncoding::Brotli).unwrap();
        assert_eq!(out, br#"{"root":{"type":"regular"}}"#);
        assert_eq!(decode_listing(&out).unwrap(), vec!["/".to_string()]);
    }

    #[test]
    fn xz_round_trips_a_real_listing() {
        let mut encoder = xz2::write::XzEncoder::new(Vec::new(), 6);
        encoder
            .write_all(br#"{"root":{"type":"directory","entries":{"bin":{"type":"regular"}}}}"#)
            .unwrap();
        let compressed = encoder.finish().unwrap();

        let out = decompress(&compressed, ContentEncoding::Xz).unwrap();
        assert_eq!(decode_listing(&out).unwrap(), vec!["/bin".to_string()]);
    }

    #[test]
    fn mismatched_encoding_is_rejected_instead_of_garbled() {
        let err = decompress(BROTLI_FIXTURE, ContentEncoding::Xz).unwrap_err();
        match err.0 {
            ErrorKind::DecompressionError(encoding) => assert_eq!(encoding, "xz"),
            other => panic!("expected DecompressionError, got {:?}", other),
        }
    }
}
