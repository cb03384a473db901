//! Builders for synthetic torrent descriptors.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_bytes::ByteBuf;

const PIECE_LENGTH: u64 = 16_384;

// Field order mirrors bencode key order.
#[derive(Serialize)]
struct RawDescriptor<'a> {
    announce: &'a str,
    info: RawInfo<'a>,
}

#[derive(Serialize)]
struct RawInfo<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    files: Option<Vec<RawFile>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    length: Option<u64>,
    name: &'a str,
    #[serde(rename = "piece length")]
    piece_length: u64,
    pieces: ByteBuf,
}

#[derive(Serialize)]
struct RawFile {
    length: u64,
    path: Vec<String>,
}

/// Write a minimal valid descriptor into `dir` and return its path.
///
/// A single entry in `lengths` produces a single-file torrent whose
/// payload file is named after the torrent; several entries produce a
/// multi-file torrent with numbered parts.
///
/// # Panics
///
/// Panics when the descriptor cannot be encoded or written; fixture
/// failures are test bugs.
#[must_use]
pub fn write_descriptor(dir: &Path, name: &str, lengths: &[u64]) -> PathBuf {
    let total: u64 = lengths.iter().sum();
    let piece_count =
        usize::try_from(total.div_ceil(PIECE_LENGTH).max(1)).expect("piece count fits usize");
    let (files, length) = match lengths {
        [single] => (None, Some(*single)),
        parts => (
            Some(
                parts
                    .iter()
                    .enumerate()
                    .map(|(index, length)| RawFile {
                        length: *length,
                        path: vec![format!("part-{index:02}.bin")],
                    })
                    .collect(),
            ),
            None,
        ),
    };
    let descriptor = RawDescriptor {
        announce: "http://tracker.example/announce",
        info: RawInfo {
            files,
            length,
            name,
            piece_length: PIECE_LENGTH,
            pieces: ByteBuf::from(vec![0xAB; 20 * piece_count]),
        },
    };

    let bytes = serde_bencode::to_bytes(&descriptor).expect("bencode descriptor fixture");
    let path = dir.join(format!("{name}.torrent"));
    fs::write(&path, bytes).expect("write descriptor fixture");
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use capstan_engine::metainfo;

    #[test]
    fn single_file_descriptors_decode_with_the_torrent_name() {
        let dir = tempfile::tempdir().expect("tempdir");

        let path = write_descriptor(dir.path(), "alpha", &[4_096]);
        let metadata = metainfo::load(&path).expect("decode");

        assert_eq!(metadata.name, "alpha");
        assert_eq!(metadata.total_size, 4_096);
        assert_eq!(metadata.files.len(), 1);
        assert_eq!(metadata.files[0].path, PathBuf::from("alpha"));
        assert_eq!(metadata.trackers.len(), 1);
    }

    #[test]
    fn multi_file_descriptors_list_numbered_parts() {
        let dir = tempfile::tempdir().expect("tempdir");

        let path = write_descriptor(dir.path(), "bundle", &[1_000, 2_000, 3_000]);
        let metadata = metainfo::load(&path).expect("decode");

        assert_eq!(metadata.total_size, 6_000);
        assert_eq!(metadata.files.len(), 3);
        assert_eq!(metadata.files[0].path, PathBuf::from("part-00.bin"));
        assert_eq!(metadata.files[2].path, PathBuf::from("part-02.bin"));
    }
}
