use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;

use log::debug;

/// Stable per-page byte storage backed by a single file.
///
/// Blocks are `block_size` bytes at fixed disk offsets. Offsets come from a
/// monotone bump allocator; a deallocated block is marked reusable but the
/// file is never shrunk. Writes are flushed before `store` returns, so a
/// page that was written back can always be faulted in again with the same
/// contents. All callers serialize on one mutex; I/O happens inside the
/// critical section.
pub struct BackingStore {
    inner: Mutex<BackingState>,
    block_size: usize,
}

struct BackingState {
    file: File,
    next_free: u64,
    allocated: BTreeMap<u64, bool>,
}

impl BackingStore {
    /// Opens (or creates) the backing file. The file is opened once and kept
    /// for the lifetime of the store.
    pub fn open(path: &Path, block_size: usize) -> io::Result<Self> {
        assert!(block_size > 0, "block_size must be > 0");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        debug!("backing store open at {}", path.display());
        Ok(Self {
            inner: Mutex::new(BackingState {
                file,
                next_free: 0,
                allocated: BTreeMap::new(),
            }),
            block_size,
        })
    }

    /// Reserves a block and returns its disk offset. Offsets advance by
    /// `block_size` and stay valid until `deallocate_block`.
    pub fn allocate_block(&self) -> u64 {
        let mut state = self.inner.lock().unwrap();
        let offset = state.next_free;
        state.next_free += self.block_size as u64;
        state.allocated.insert(offset, true);
        offset
    }

    /// Marks a block reusable. The underlying file keeps its length.
    pub fn deallocate_block(&self, offset: u64) {
        let mut state = self.inner.lock().unwrap();
        state.allocated.remove(&offset);
    }

    /// Writes one block at its disk offset and flushes it to disk.
    pub fn store(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        assert_eq!(data.len(), self.block_size, "store expects one full block");
        let mut state = self.inner.lock().unwrap();
        state.file.seek(SeekFrom::Start(offset))?;
        state.file.write_all(data)?;
        state.file.flush()
    }

    /// Reads one block at its disk offset. A block that was allocated but
    /// never stored reads as zeroes.
    pub fn load(&self, offset: u64, out: &mut [u8]) -> io::Result<()> {
        assert_eq!(out.len(), self.block_size, "load expects one full block");
        let mut state = self.inner.lock().unwrap();
        let end = state.file.seek(SeekFrom::End(0))?;
        if offset >= end {
            out.fill(0);
            return Ok(());
        }
        state.file.seek(SeekFrom::Start(offset))?;
        let mut read = 0;
        while read < out.len() {
            match state.file.read(&mut out[read..])? {
                0 => break,
                n => read += n,
            }
        }
        out[read..].fill(0);
        Ok(())
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_file(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("backing-{}-{}", std::process::id(), name));
        let _ = std::fs::remove_file(&path);
        path
    }

    #[test]
    fn offsets_bump_by_block_size() {
        let path = temp_file("bump");
        let store = BackingStore::open(&path, 16).unwrap();
        assert_eq!(store.allocate_block(), 0);
        assert_eq!(store.allocate_block(), 16);
        assert_eq!(store.allocate_block(), 32);
        // Deallocation does not rewind the bump pointer.
        store.deallocate_block(16);
        assert_eq!(store.allocate_block(), 48);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn store_then_load_round_trips() {
        let path = temp_file("roundtrip");
        let store = BackingStore::open(&path, 16).unwrap();
        let a = store.allocate_block();
        let b = store.allocate_block();
        store.store(a, &[0xAA; 16]).unwrap();
        store.store(b, &[0x55; 16]).unwrap();

        let mut buf = [0u8; 16];
        store.load(a, &mut buf).unwrap();
        assert_eq!(buf, [0xAA; 16]);
        store.load(b, &mut buf).unwrap();
        assert_eq!(buf, [0x55; 16]);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn unwritten_blocks_read_as_zero() {
        let path = temp_file("zero");
        let store = BackingStore::open(&path, 16).unwrap();
        let offset = store.allocate_block();
        let mut buf = [0xFFu8; 16];
        store.load(offset, &mut buf).unwrap();
        assert_eq!(buf, [0u8; 16]);
        std::fs::remove_file(&path).unwrap();
    }
}
