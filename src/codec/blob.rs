// src/codec/blob.rs

//! Out-of-line blob storage
//!
//! Byte values too large to inline are split by FastCDC so that equal
//! subranges of two blobs share chunks. The chunk size parameters are
//! part of the storage format; changing them re-addresses every blob.

use super::value::BlobRef;
use crate::store::ChunkStore;
use crate::Result;
use fastcdc::v2020::FastCDC;

pub const BLOB_MIN_CHUNK: u32 = 16 * 1024;
pub const BLOB_AVG_CHUNK: u32 = 64 * 1024;
pub const BLOB_MAX_CHUNK: u32 = 256 * 1024;

/// Split `data` into content-defined chunks, store each, and return the
/// blob reference.
pub fn chunk_blob(store: &dyn ChunkStore, data: &[u8]) -> Result<BlobRef> {
    let mut chunks = Vec::new();
    if !data.is_empty() {
        for entry in FastCDC::new(data, BLOB_MIN_CHUNK, BLOB_AVG_CHUNK, BLOB_MAX_CHUNK) {
            let body = &data[entry.offset..entry.offset + entry.length];
            chunks.push(store.put(body)?);
        }
    }
    Ok(BlobRef {
        chunks,
        len: data.len() as u64,
    })
}

/// Reassemble a blob from its chunks
pub fn read_blob(store: &dyn ChunkStore, blob: &BlobRef) -> Result<Vec<u8>> {
    let mut data = Vec::with_capacity(blob.len as usize);
    for addr in &blob.chunks {
        data.extend_from_slice(&store.get_required(addr)?);
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryChunkStore;

    fn pseudo_random_data(seed: u64, len: usize) -> Vec<u8> {
        let mut x = seed;
        (0..len)
            .map(|_| {
                x = x.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
                (x >> 32) as u8
            })
            .collect()
    }

    #[test]
    fn test_blob_roundtrip() {
        let store = MemoryChunkStore::new();
        let data = pseudo_random_data(7, 300_000);
        let blob = chunk_blob(&store, &data).unwrap();
        assert!(blob.chunks.len() > 1);
        assert_eq!(blob.len, data.len() as u64);
        assert_eq!(read_blob(&store, &blob).unwrap(), data);
    }

    #[test]
    fn test_empty_blob() {
        let store = MemoryChunkStore::new();
        let blob = chunk_blob(&store, &[]).unwrap();
        assert!(blob.chunks.is_empty());
        assert_eq!(read_blob(&store, &blob).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_shared_chunks_after_small_edit() {
        let store = MemoryChunkStore::new();
        let data1 = pseudo_random_data(42, 500_000);
        let mut data2 = data1.clone();
        data2[250_000] ^= 0xff;

        let blob1 = chunk_blob(&store, &data1).unwrap();
        let blob2 = chunk_blob(&store, &data2).unwrap();

        let set1: std::collections::HashSet<_> = blob1.chunks.iter().collect();
        let shared = blob2.chunks.iter().filter(|a| set1.contains(a)).count();
        assert!(
            shared >= blob2.chunks.len().saturating_sub(3),
            "a one-byte edit should perturb only a couple of chunks: {} shared of {}",
            shared,
            blob2.chunks.len()
        );
    }
}
