// src/store/table_file.rs

//! Append-once chunk archives
//!
//! A table file packs many chunks into one file:
//!
//! ```text
//! [header: magic, version, chunk count]
//! [payload: zstd-compressed chunk bodies, back to back]
//! [index: (addr, offset, compressed len, raw len) per chunk, sorted by addr]
//! [footer: index offset, index crc32, magic]
//! ```
//!
//! Files are written in one shot and never modified, so a partial write
//! can only produce a file with a bad or missing footer; such files are
//! ignored on open. The index CRC (`crc32fast`) catches truncation and
//! bit rot, and every chunk read is re-hashed against its address.

use crate::hash::{Addr, ADDR_LEN};
use crate::{Error, Result};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

const MAGIC: &[u8; 8] = b"DOLTTBL1";
const VERSION: u32 = 1;
const HEADER_LEN: u64 = 8 + 4 + 4;
const INDEX_ENTRY_LEN: usize = ADDR_LEN + 8 + 4 + 4;
const FOOTER_LEN: u64 = 8 + 4 + 8;
const ZSTD_LEVEL: i32 = 3;

/// Builds a table file from chunks held in memory
pub struct TableFileWriter {
    entries: Vec<(Addr, Vec<u8>, u32)>,
}

impl TableFileWriter {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn chunk_count(&self) -> u32 {
        self.entries.len() as u32
    }

    /// Add a chunk body. The caller guarantees addr == Addr::of(raw).
    pub fn add(&mut self, addr: Addr, raw: &[u8]) -> Result<()> {
        let compressed = zstd::bulk::compress(raw, ZSTD_LEVEL)
            .map_err(|e| Error::Encode(format!("zstd compress: {}", e)))?;
        self.entries.push((addr, compressed, raw.len() as u32));
        Ok(())
    }

    /// Write the finished file into `dir`, named by the hash of its own
    /// bytes, and return the file name.
    pub fn finish(mut self, dir: &Path) -> Result<String> {
        self.entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut buf = Vec::new();
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&VERSION.to_le_bytes());
        buf.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());

        let mut offsets = Vec::with_capacity(self.entries.len());
        for (_, compressed, _) in &self.entries {
            offsets.push(buf.len() as u64);
            buf.extend_from_slice(compressed);
        }

        let index_offset = buf.len() as u64;
        let mut index = Vec::with_capacity(self.entries.len() * INDEX_ENTRY_LEN);
        for ((addr, compressed, raw_len), offset) in self.entries.iter().zip(&offsets) {
            index.extend_from_slice(addr.as_bytes());
            index.extend_from_slice(&offset.to_le_bytes());
            index.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
            index.extend_from_slice(&raw_len.to_le_bytes());
        }
        let index_crc = crc32fast::hash(&index);
        buf.extend_from_slice(&index);

        buf.extend_from_slice(&index_offset.to_le_bytes());
        buf.extend_from_slice(&index_crc.to_le_bytes());
        buf.extend_from_slice(MAGIC);

        let name = format!("{}.table", Addr::of(&buf).to_hex());
        let path = dir.join(&name);
        if path.exists() {
            // Identical contents already present
            return Ok(name);
        }

        let tmp = dir.join(format!("{}.tmp", name));
        let mut file = File::create(&tmp)?;
        file.write_all(&buf)?;
        file.sync_all()?;
        fs::rename(&tmp, &path)?;

        debug!(name, chunks = self.entries.len(), "wrote table file");
        Ok(name)
    }
}

impl Default for TableFileWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct IndexEntry {
    offset: u64,
    compressed_len: u32,
    raw_len: u32,
}

/// Read-only view of a finished table file
#[derive(Debug)]
pub struct TableFileReader {
    path: PathBuf,
    index: HashMap<Addr, IndexEntry>,
}

impl TableFileReader {
    /// Open and validate a table file. Returns a decode error for files
    /// with a torn footer or corrupt index (callers skip those).
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let len = file.metadata()?.len();
        if len < HEADER_LEN + FOOTER_LEN {
            return Err(Error::Decode(format!(
                "table file too short: {}",
                path.display()
            )));
        }

        let mut header = [0u8; HEADER_LEN as usize];
        file.read_exact(&mut header)?;
        if &header[..8] != MAGIC {
            return Err(Error::Decode(format!(
                "bad table file magic: {}",
                path.display()
            )));
        }
        let chunk_count = u32::from_le_bytes(header[12..16].try_into().unwrap_or_default());

        file.seek(SeekFrom::End(-(FOOTER_LEN as i64)))?;
        let mut footer = [0u8; FOOTER_LEN as usize];
        file.read_exact(&mut footer)?;
        if &footer[12..20] != MAGIC {
            return Err(Error::Decode(format!(
                "torn table file footer: {}",
                path.display()
            )));
        }
        let index_offset = u64::from_le_bytes(footer[0..8].try_into().unwrap_or_default());
        let index_crc = u32::from_le_bytes(footer[8..12].try_into().unwrap_or_default());

        let index_len = chunk_count as usize * INDEX_ENTRY_LEN;
        if index_offset + index_len as u64 + FOOTER_LEN != len {
            return Err(Error::Decode(format!(
                "table file index out of place: {}",
                path.display()
            )));
        }

        file.seek(SeekFrom::Start(index_offset))?;
        let mut index_bytes = vec![0u8; index_len];
        file.read_exact(&mut index_bytes)?;
        if crc32fast::hash(&index_bytes) != index_crc {
            return Err(Error::Integrity(format!(
                "table file index checksum mismatch: {}",
                path.display()
            )));
        }

        let mut index = HashMap::with_capacity(chunk_count as usize);
        for entry in index_bytes.chunks_exact(INDEX_ENTRY_LEN) {
            let addr = Addr::from_slice(&entry[..ADDR_LEN])
                .map_err(|e| Error::Decode(e.to_string()))?;
            let offset = u64::from_le_bytes(entry[20..28].try_into().unwrap_or_default());
            let compressed_len = u32::from_le_bytes(entry[28..32].try_into().unwrap_or_default());
            let raw_len = u32::from_le_bytes(entry[32..36].try_into().unwrap_or_default());
            index.insert(
                addr,
                IndexEntry {
                    offset,
                    compressed_len,
                    raw_len,
                },
            );
        }

        Ok(Self {
            path: path.to_path_buf(),
            index,
        })
    }

    pub fn has(&self, addr: &Addr) -> bool {
        self.index.contains_key(addr)
    }

    pub fn chunk_count(&self) -> u32 {
        self.index.len() as u32
    }

    /// Read and verify one chunk
    pub fn get(&self, addr: &Addr) -> Result<Option<Vec<u8>>> {
        let Some(entry) = self.index.get(addr) else {
            return Ok(None);
        };

        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(entry.offset))?;
        let mut compressed = vec![0u8; entry.compressed_len as usize];
        file.read_exact(&mut compressed)?;

        let raw = zstd::bulk::decompress(&compressed, entry.raw_len as usize)
            .map_err(|e| Error::Integrity(format!("zstd decompress {}: {}", addr, e)))?;

        if Addr::of(&raw) != *addr {
            return Err(Error::Integrity(format!(
                "chunk {} does not hash to its address in {}",
                addr,
                self.path.display()
            )));
        }
        Ok(Some(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_chunks(dir: &Path, bodies: &[&[u8]]) -> (String, Vec<Addr>) {
        let mut writer = TableFileWriter::new();
        let mut addrs = Vec::new();
        for body in bodies {
            let addr = Addr::of(body);
            writer.add(addr, body).unwrap();
            addrs.push(addr);
        }
        (writer.finish(dir).unwrap(), addrs)
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = TempDir::new().unwrap();
        let (name, addrs) = write_chunks(dir.path(), &[b"alpha", b"beta", b"gamma"]);

        let reader = TableFileReader::open(&dir.path().join(&name)).unwrap();
        assert_eq!(reader.chunk_count(), 3);
        assert_eq!(reader.get(&addrs[0]).unwrap().unwrap(), b"alpha");
        assert_eq!(reader.get(&addrs[2]).unwrap().unwrap(), b"gamma");
        assert!(reader.get(&Addr::of(b"absent")).unwrap().is_none());
    }

    #[test]
    fn test_deterministic_file_name() {
        let dir1 = TempDir::new().unwrap();
        let dir2 = TempDir::new().unwrap();
        let (n1, _) = write_chunks(dir1.path(), &[b"x", b"y"]);
        let (n2, _) = write_chunks(dir2.path(), &[b"x", b"y"]);
        assert_eq!(n1, n2);
    }

    #[test]
    fn test_truncated_file_rejected() {
        let dir = TempDir::new().unwrap();
        let (name, _) = write_chunks(dir.path(), &[b"will be torn"]);
        let path = dir.path().join(&name);

        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 4]).unwrap();

        assert!(TableFileReader::open(&path).is_err());
    }

    #[test]
    fn test_corrupt_index_rejected() {
        let dir = TempDir::new().unwrap();
        let (name, _) = write_chunks(dir.path(), &[b"payload one", b"payload two"]);
        let path = dir.path().join(&name);

        let mut bytes = fs::read(&path).unwrap();
        // Flip a byte inside the index region
        let idx = bytes.len() - FOOTER_LEN as usize - 4;
        bytes[idx] ^= 0xff;
        fs::write(&path, &bytes).unwrap();

        let err = TableFileReader::open(&path).unwrap_err();
        assert!(matches!(err, Error::Integrity(_)));
    }
}
