//! Compressed rolling output history
//!
//! Output is accumulated into a small plain tail; once the tail reaches the
//! chunk size it is sealed into a gzip-compressed chunk. Total raw bytes are
//! capped; the oldest chunks are evicted first. Snapshots decompress best
//! effort, skipping chunks that fail to inflate.

use std::collections::VecDeque;
use std::io::{Read, Write};

use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;

/// Raw bytes per sealed chunk.
const CHUNK_RAW_SIZE: usize = 16 * 1024;

struct CompressedChunk {
    data: Vec<u8>,
    raw_len: usize,
}

struct Inner {
    chunks: VecDeque<CompressedChunk>,
    tail: Vec<u8>,
    /// Raw bytes held in sealed chunks
    sealed_len: usize,
}

/// Rolling, compressed output history with a raw-byte cap.
pub struct History {
    inner: Mutex<Inner>,
    cap: usize,
    chunk_size: usize,
}

impl History {
    pub fn new(cap: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                chunks: VecDeque::new(),
                tail: Vec::new(),
                sealed_len: 0,
            }),
            cap,
            chunk_size: CHUNK_RAW_SIZE.min(cap.max(1)),
        }
    }

    /// Append output bytes, sealing and evicting as needed.
    pub fn push(&self, bytes: &[u8]) {
        let mut inner = self.inner.lock();
        inner.tail.extend_from_slice(bytes);

        while inner.tail.len() >= self.chunk_size {
            let rest = inner.tail.split_off(self.chunk_size);
            let raw = std::mem::replace(&mut inner.tail, rest);
            if let Some(chunk) = compress_chunk(&raw) {
                inner.sealed_len += chunk.raw_len;
                inner.chunks.push_back(chunk);
            }
        }

        // Evict oldest sealed chunks once the raw total exceeds the cap
        while inner.sealed_len + inner.tail.len() > self.cap {
            match inner.chunks.pop_front() {
                Some(chunk) => inner.sealed_len -= chunk.raw_len,
                None => {
                    // Tail alone exceeds the cap; drop its oldest bytes
                    let excess = inner.tail.len().saturating_sub(self.cap);
                    inner.tail.drain(..excess);
                    break;
                }
            }
        }
    }

    /// Best-effort decompressed replay of the retained history.
    pub fn snapshot(&self) -> Bytes {
        let inner = self.inner.lock();
        let mut out = Vec::with_capacity(inner.sealed_len + inner.tail.len());

        for chunk in &inner.chunks {
            let mut decoder = GzDecoder::new(chunk.data.as_slice());
            let mut raw = Vec::with_capacity(chunk.raw_len);
            if decoder.read_to_end(&mut raw).is_ok() {
                out.extend_from_slice(&raw);
            }
        }

        out.extend_from_slice(&inner.tail);
        Bytes::from(out)
    }

    /// Raw bytes currently retained.
    pub fn raw_len(&self) -> usize {
        let inner = self.inner.lock();
        inner.sealed_len + inner.tail.len()
    }

    /// Compressed bytes currently stored (tail counted uncompressed).
    pub fn stored_len(&self) -> usize {
        let inner = self.inner.lock();
        inner.chunks.iter().map(|c| c.data.len()).sum::<usize>() + inner.tail.len()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.chunks.clear();
        inner.tail.clear();
        inner.sealed_len = 0;
    }
}

fn compress_chunk(raw: &[u8]) -> Option<CompressedChunk> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(raw).ok()?;
    let data = encoder.finish().ok()?;
    Some(CompressedChunk {
        data,
        raw_len: raw.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_snapshot() {
        let history = History::new(1024 * 1024);
        history.push(b"$ ls\n");
        history.push(b"src  Cargo.toml\n");

        let snapshot = history.snapshot();
        assert_eq!(&snapshot[..], b"$ ls\nsrc  Cargo.toml\n");
    }

    #[test]
    fn test_seals_chunks_and_replays_in_order() {
        let history = History::new(1024 * 1024);
        // Two full chunks plus a partial tail
        let a = vec![b'a'; CHUNK_RAW_SIZE];
        let b = vec![b'b'; CHUNK_RAW_SIZE];
        history.push(&a);
        history.push(&b);
        history.push(b"tail");

        let snapshot = history.snapshot();
        assert_eq!(snapshot.len(), 2 * CHUNK_RAW_SIZE + 4);
        assert!(snapshot[..CHUNK_RAW_SIZE].iter().all(|&c| c == b'a'));
        assert!(snapshot[CHUNK_RAW_SIZE..2 * CHUNK_RAW_SIZE]
            .iter()
            .all(|&c| c == b'b'));
        assert_eq!(&snapshot[2 * CHUNK_RAW_SIZE..], b"tail");
    }

    #[test]
    fn test_cap_evicts_oldest() {
        // Cap of two chunks
        let history = History::new(2 * CHUNK_RAW_SIZE);
        history.push(&vec![b'a'; CHUNK_RAW_SIZE]);
        history.push(&vec![b'b'; CHUNK_RAW_SIZE]);
        history.push(&vec![b'c'; CHUNK_RAW_SIZE]);

        assert!(history.raw_len() <= 2 * CHUNK_RAW_SIZE);
        let snapshot = history.snapshot();
        // Oldest ('a') evicted; newest retained
        assert!(!snapshot.contains(&b'a'));
        assert!(snapshot.contains(&b'c'));
    }

    #[test]
    fn test_compression_shrinks_repetitive_output() {
        let history = History::new(1024 * 1024);
        history.push(&vec![b'x'; 4 * CHUNK_RAW_SIZE]);
        assert!(history.stored_len() < history.raw_len() / 2);
    }

    #[test]
    fn test_clear() {
        let history = History::new(1024);
        history.push(b"data");
        history.clear();
        assert_eq!(history.raw_len(), 0);
        assert!(history.snapshot().is_empty());
    }
}
