//! Decoding of `.torrent` descriptor files.
//!
//! Only the fields the control layer consumes are surfaced; piece hashes and
//! other swarm-level data stay inside the engine.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::error::{EngineError, EngineResult};
use crate::types::TrackerEntry;

/// Decoded torrent descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentMetadata {
    /// Canonical display name from the info dictionary.
    pub name: String,
    /// Sum of all payload file lengths in bytes.
    pub total_size: u64,
    /// Payload files; single-file torrents carry one entry named after the torrent.
    pub files: Vec<MetainfoFile>,
    /// Announce targets, tier-ordered and deduplicated.
    pub trackers: Vec<TrackerEntry>,
    /// Piece size in bytes.
    pub piece_length: u64,
    /// Hex-encoded SHA-1 of the bencoded info dictionary.
    pub info_hash_hex: String,
}

/// One payload file within a torrent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetainfoFile {
    /// Path relative to the save directory.
    pub path: PathBuf,
    /// File length in bytes.
    pub length: u64,
}

// Field order mirrors bencode key order so re-encoding the info dictionary
// for hashing produces canonical bytes.
#[derive(Debug, Serialize, Deserialize)]
struct RawTorrent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    announce: Option<String>,
    #[serde(
        rename = "announce-list",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    announce_list: Option<Vec<Vec<String>>>,
    info: RawInfo,
}

#[derive(Debug, Serialize, Deserialize)]
struct RawInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    files: Option<Vec<RawFile>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    length: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    md5sum: Option<String>,
    name: String,
    #[serde(rename = "piece length")]
    piece_length: i64,
    #[serde(with = "serde_bytes")]
    pieces: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    private: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RawFile {
    length: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    md5sum: Option<String>,
    path: Vec<String>,
}

/// Decode a descriptor from raw bytes.
///
/// # Errors
///
/// Returns [`EngineError::Metainfo`] when the bytes are not valid bencode or
/// describe an inconsistent torrent (missing name, no payload, negative
/// lengths).
pub fn decode(bytes: &[u8]) -> EngineResult<TorrentMetadata> {
    let mut raw: RawTorrent =
        serde_bencode::from_bytes(bytes).map_err(|err| reject(err.to_string()))?;

    if raw.info.name.is_empty() {
        return Err(reject("info dictionary has an empty name"));
    }
    let piece_length = positive(raw.info.piece_length, "piece length")?;

    let files = match (&raw.info.files, raw.info.length) {
        (Some(entries), _) if !entries.is_empty() => {
            let mut files = Vec::with_capacity(entries.len());
            for entry in entries {
                if entry.path.is_empty() {
                    return Err(reject("file entry has an empty path"));
                }
                files.push(MetainfoFile {
                    path: entry.path.iter().collect(),
                    length: positive(entry.length, "file length")?,
                });
            }
            files
        }
        (_, Some(length)) => vec![MetainfoFile {
            path: PathBuf::from(&raw.info.name),
            length: positive(length, "length")?,
        }],
        _ => return Err(reject("info dictionary describes no payload files")),
    };
    let total_size = files.iter().map(|file| file.length).sum();

    let mut trackers = Vec::new();
    if let Some(url) = raw.announce.take() {
        trackers.push(TrackerEntry { url, tier: 0 });
    }
    if let Some(tiers) = &raw.announce_list {
        for (tier, urls) in tiers.iter().enumerate() {
            let tier = u32::try_from(tier).unwrap_or(u32::MAX);
            for url in urls {
                if !trackers.iter().any(|entry| entry.url == *url) {
                    trackers.push(TrackerEntry {
                        url: url.clone(),
                        tier,
                    });
                }
            }
        }
    }

    let info_bytes = serde_bencode::to_bytes(&raw.info).map_err(|err| reject(err.to_string()))?;
    let info_hash_hex = hex::encode(Sha1::digest(&info_bytes));

    Ok(TorrentMetadata {
        name: raw.info.name,
        total_size,
        files,
        trackers,
        piece_length,
        info_hash_hex,
    })
}

/// Read and decode a descriptor file.
///
/// # Errors
///
/// Returns [`EngineError::Io`] when the file cannot be read and
/// [`EngineError::Metainfo`] when its contents do not decode.
pub fn load(path: &Path) -> EngineResult<TorrentMetadata> {
    let bytes = std::fs::read(path).map_err(|source| EngineError::Io {
        operation: "read descriptor",
        path: path.to_path_buf(),
        source,
    })?;
    decode(&bytes)
}

fn positive(value: i64, field: &str) -> EngineResult<u64> {
    u64::try_from(value).map_err(|_| reject(format!("{field} is negative")))
}

fn reject(detail: impl Into<String>) -> EngineError {
    EngineError::Metainfo {
        detail: detail.into(),
    }
}
