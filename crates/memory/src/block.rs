use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Local;
use log::{debug, warn};
use types::{FitPolicy, ProcessId};

/// One contiguous region of the Phase 1 address space.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryBlock {
    pub start: usize,
    pub size: usize,
    pub free: bool,
    /// Owning process while allocated.
    pub owner: Option<(ProcessId, String)>,
}

impl MemoryBlock {
    fn free_block(start: usize, size: usize) -> Self {
        Self {
            start,
            size,
            free: true,
            owner: None,
        }
    }

    pub fn end(&self) -> usize {
        self.start + self.size
    }
}

/// Contiguous allocator over a single `[0, total_memory)` address space.
///
/// Blocks always form a non-overlapping cover of the address space, and no
/// two adjacent free blocks survive a deallocation (coalescing runs to a
/// fixed point). Every process receives the same fixed allocation size, as
/// configured by `mem-per-proc`.
pub struct BlockAllocator {
    blocks: Mutex<Vec<MemoryBlock>>,
    total_memory: usize,
    mem_per_proc: usize,
    frame_size: usize,
    policy: FitPolicy,
    snapshot_dir: PathBuf,
}

impl BlockAllocator {
    pub fn new(
        total_memory: usize,
        mem_per_proc: usize,
        frame_size: usize,
        policy: FitPolicy,
        snapshot_dir: &Path,
    ) -> Self {
        Self {
            blocks: Mutex::new(vec![MemoryBlock::free_block(0, total_memory)]),
            total_memory,
            mem_per_proc,
            frame_size,
            policy,
            snapshot_dir: snapshot_dir.to_path_buf(),
        }
    }

    /// Finds a hole for the fixed per-process size and claims it. Returns
    /// false when no free block fits; the caller keeps the process out of
    /// the ready queue and retries later.
    pub fn allocate(&self, pid: ProcessId, name: &str) -> bool {
        let size = self.mem_per_proc;
        if size > self.total_memory {
            return false;
        }
        let mut blocks = self.blocks.lock().unwrap();
        if blocks.is_empty() {
            blocks.push(MemoryBlock::free_block(0, self.total_memory));
        }

        let candidates = blocks
            .iter()
            .enumerate()
            .filter(|(_, b)| b.free && b.size >= size);
        let chosen = match self.policy {
            FitPolicy::First => candidates.map(|(i, _)| i).next(),
            FitPolicy::Best => candidates.min_by_key(|(_, b)| b.size).map(|(i, _)| i),
            FitPolicy::Worst => candidates.max_by_key(|(_, b)| b.size).map(|(i, _)| i),
        };
        let Some(index) = chosen else {
            debug!("no free block fits {} bytes for {}", size, name);
            return false;
        };

        let remainder = blocks[index].size - size;
        blocks[index].size = size;
        blocks[index].free = false;
        blocks[index].owner = Some((pid, name.to_string()));
        if remainder > 0 {
            let rest = MemoryBlock::free_block(blocks[index].start + size, remainder);
            blocks.insert(index + 1, rest);
        }
        debug!(
            "allocated [{}, {}) to {} (pid {})",
            blocks[index].start,
            blocks[index].end(),
            name,
            pid
        );
        true
    }

    /// Frees every block owned by the process, then merges adjacent free
    /// pairs until none remain.
    pub fn deallocate(&self, pid: ProcessId) {
        let mut blocks = self.blocks.lock().unwrap();
        let mut freed = 0;
        for block in blocks.iter_mut() {
            if block.owner.as_ref().map(|(id, _)| *id) == Some(pid) {
                block.free = true;
                block.owner = None;
                freed += 1;
            }
        }
        if freed == 0 {
            return;
        }
        let mut i = 0;
        while i + 1 < blocks.len() {
            if blocks[i].free && blocks[i + 1].free {
                blocks[i].size += blocks[i + 1].size;
                blocks.remove(i + 1);
            } else {
                i += 1;
            }
        }
    }

    /// True when some free block can hold `size` bytes.
    pub fn has_fit(&self, size: usize) -> bool {
        if size == 0 || size > self.total_memory {
            return false;
        }
        let blocks = self.blocks.lock().unwrap();
        blocks.iter().any(|b| b.free && b.size >= size)
    }

    /// Free memory unusable for a process allocation: the sum of free blocks
    /// smaller than `mem-per-proc`, or all free memory if the total free is
    /// itself below that size.
    pub fn external_fragmentation(&self) -> usize {
        let blocks = self.blocks.lock().unwrap();
        let total_free: usize = blocks.iter().filter(|b| b.free).map(|b| b.size).sum();
        if total_free < self.mem_per_proc {
            return total_free;
        }
        blocks
            .iter()
            .filter(|b| b.free && b.size < self.mem_per_proc)
            .map(|b| b.size)
            .sum()
    }

    /// Lowest start and highest end across the process's blocks.
    pub fn process_memory_map(&self, pid: ProcessId) -> Option<(usize, usize)> {
        let blocks = self.blocks.lock().unwrap();
        let mut span: Option<(usize, usize)> = None;
        for block in blocks.iter() {
            if block.owner.as_ref().map(|(id, _)| *id) == Some(pid) {
                let (start, end) = span.get_or_insert((block.start, block.end()));
                *start = (*start).min(block.start);
                *end = (*end).max(block.end());
            }
        }
        span
    }

    /// Number of distinct processes currently holding memory.
    pub fn resident_processes(&self) -> usize {
        let blocks = self.blocks.lock().unwrap();
        blocks
            .iter()
            .filter_map(|b| b.owner.as_ref().map(|(id, _)| *id))
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Snapshot of the block list, for inspection and tests.
    pub fn blocks(&self) -> Vec<MemoryBlock> {
        self.blocks.lock().unwrap().clone()
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn total_memory(&self) -> usize {
        self.total_memory
    }

    /// Writes `memory_stamp_<NN>.txt` for the given quantum cycle: timestamp,
    /// resident process count, external fragmentation, and the top-down
    /// block listing between the `----end----`/`----start----` sentinels.
    pub fn snapshot(&self, quantum: u64) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.snapshot_dir)?;
        let path = self
            .snapshot_dir
            .join(format!("memory_stamp_{:02}.txt", quantum));
        let mut file = fs::File::create(&path)?;

        let stamp = Local::now().format("(%m/%d/%Y %I:%M:%S%p)");
        writeln!(file, "Timestamp: {}", stamp)?;
        writeln!(
            file,
            "Number of processes in memory: {}",
            self.resident_processes()
        )?;
        writeln!(
            file,
            "Total external fragmentation in KB: {}",
            self.external_fragmentation() / 1024
        )?;
        writeln!(file)?;
        file.write_all(self.ascii_layout().as_bytes())?;
        Ok(path)
    }

    /// Top-down rendering of the block list: high addresses first, one
    /// record (end address, owner name, start address) per allocated block.
    pub fn ascii_layout(&self) -> String {
        let mut blocks = self.blocks.lock().unwrap().clone();
        blocks.sort_by(|a, b| b.start.cmp(&a.start));

        let mut out = String::new();
        out.push_str(&format!("----end---- = {}\n\n", self.total_memory));
        for block in &blocks {
            if block.free {
                continue;
            }
            let name = block
                .owner
                .as_ref()
                .map(|(_, name)| name.as_str())
                .unwrap_or("unnamed");
            out.push_str(&format!("{}\n{}\n{}\n\n", block.end(), name, block.start));
        }
        out.push_str("----start---- = 0\n");
        out
    }
}

impl Drop for BlockAllocator {
    fn drop(&mut self) {
        let blocks = self.blocks.lock().unwrap();
        let covered: usize = blocks.iter().map(|b| b.size).sum();
        if covered != self.total_memory {
            warn!(
                "block list covers {} of {} bytes at drop",
                covered, self.total_memory
            );
        }
    }
}
