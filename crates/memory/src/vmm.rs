use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use log::debug;
use types::{MemoryError, ProcessId, SYMBOL_TABLE_BYTES};

use crate::backing::BackingStore;
use crate::frame::FrameAllocator;

/// One page of a process's virtual address space.
///
/// `frame` is meaningful only while `present`. `disk_offset` is assigned at
/// allocation and stable for the life of the process. The access stamp and
/// referenced flag are atomics so concurrent translators can update them
/// while holding the table lock shared.
pub struct PageTableEntry {
    pub present: bool,
    pub dirty: bool,
    pub referenced: AtomicBool,
    pub frame: usize,
    pub disk_offset: u64,
    pub last_access: AtomicU64,
}

impl PageTableEntry {
    fn new(disk_offset: u64) -> Self {
        Self {
            present: false,
            dirty: false,
            referenced: AtomicBool::new(false),
            frame: 0,
            disk_offset,
            last_access: AtomicU64::new(0),
        }
    }
}

/// Counters exposed by [`VmManager::stats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VmStats {
    pub page_faults: u64,
    pub pages_in: u64,
    pub pages_out: u64,
    pub frames_used: usize,
    pub frames_free: usize,
    pub bytes_total: usize,
    pub bytes_used: usize,
    pub bytes_free: usize,
}

struct VmState {
    /// Physical memory, `frame * page_size` addressing.
    phys: Vec<u8>,
    tables: BTreeMap<ProcessId, Vec<PageTableEntry>>,
    sizes: BTreeMap<ProcessId, usize>,
}

/// Demand-paged virtual memory over a fixed physical buffer.
///
/// Each process owns a page table of `ceil(size / page_size)` entries and a
/// flat virtual address space starting at 0; offsets `[0, 64)` are the
/// symbol-table region by convention (the interpreter decides whether an
/// address means a variable slot; the bytes here are ordinary memory).
///
/// Locking: page tables, sizes and physical bytes share one reader-writer
/// lock — translations run concurrently, writes and fault-ins are exclusive.
/// A separate fault mutex serializes fault handling so two threads never
/// fault the same page twice; it is always taken before the state lock.
pub struct VmManager {
    state: RwLock<VmState>,
    fault_lock: Mutex<()>,
    frames: FrameAllocator,
    backing: BackingStore,
    page_size: usize,
    access_counter: AtomicU64,
    page_faults: AtomicU64,
    pages_in: AtomicU64,
    pages_out: AtomicU64,
}

impl VmManager {
    pub fn new(
        total_memory: usize,
        page_size: usize,
        backing_path: &Path,
    ) -> Result<Self, MemoryError> {
        let backing = BackingStore::open(backing_path, page_size)?;
        Ok(Self {
            state: RwLock::new(VmState {
                phys: vec![0u8; total_memory],
                tables: BTreeMap::new(),
                sizes: BTreeMap::new(),
            }),
            fault_lock: Mutex::new(()),
            frames: FrameAllocator::new(total_memory, page_size),
            backing,
            page_size,
            access_counter: AtomicU64::new(0),
            page_faults: AtomicU64::new(0),
            pages_in: AtomicU64::new(0),
            pages_out: AtomicU64::new(0),
        })
    }

    /// Sets up the page table for a process: all entries start not-present
    /// with a backing-store block each (pure demand paging; nothing is
    /// resident until first touch).
    pub fn allocate(&self, pid: ProcessId, size: usize) -> Result<(), MemoryError> {
        if size < SYMBOL_TABLE_BYTES {
            return Err(MemoryError::UndersizedAllocation {
                requested: size,
                minimum: SYMBOL_TABLE_BYTES,
            });
        }
        let mut state = self.state.write().unwrap();
        if state.tables.contains_key(&pid) {
            return Err(MemoryError::AlreadyAllocated(pid));
        }
        let pages = size.div_ceil(self.page_size);
        let table = (0..pages)
            .map(|_| PageTableEntry::new(self.backing.allocate_block()))
            .collect();
        state.tables.insert(pid, table);
        state.sizes.insert(pid, size);
        debug!("allocated {} bytes ({} pages) for process {}", size, pages, pid);
        Ok(())
    }

    /// Releases every frame the process holds, returns its backing blocks,
    /// and drops the page table. Unknown processes are ignored.
    pub fn deallocate(&self, pid: ProcessId) {
        let _fault = self.fault_lock.lock().unwrap();
        let mut state = self.state.write().unwrap();
        let Some(table) = state.tables.remove(&pid) else {
            return;
        };
        for entry in &table {
            if entry.present {
                self.frames.deallocate(entry.frame);
            }
            self.backing.deallocate_block(entry.disk_offset);
        }
        state.sizes.remove(&pid);
        debug!("deallocated memory for process {}", pid);
    }

    /// Reads a little-endian u16 at `va`, faulting pages in as needed. The
    /// two bytes may straddle a page boundary; each page is resolved on its
    /// own.
    pub fn read(&self, pid: ProcessId, va: u32) -> Result<u16, MemoryError> {
        self.check_bounds(pid, va)?;
        let lo = self.read_byte(pid, va)?;
        let hi = self.read_byte(pid, va + 1)?;
        Ok(u16::from_le_bytes([lo, hi]))
    }

    /// Writes a little-endian u16 at `va`, marking the touched pages dirty.
    /// Bounds are checked before the first byte lands, so a rejected write
    /// has no partial effect.
    pub fn write(&self, pid: ProcessId, va: u32, value: u16) -> Result<(), MemoryError> {
        self.check_bounds(pid, va)?;
        let [lo, hi] = value.to_le_bytes();
        self.write_byte(pid, va, lo)?;
        self.write_byte(pid, va + 1, hi)
    }

    pub fn stats(&self) -> VmStats {
        let frames_free = self.frames.free_count();
        let frames_used = self.frames.total_frames() - frames_free;
        let bytes_total = self.frames.total_frames() * self.page_size;
        let bytes_used = frames_used * self.page_size;
        VmStats {
            page_faults: self.page_faults.load(Ordering::Relaxed),
            pages_in: self.pages_in.load(Ordering::Relaxed),
            pages_out: self.pages_out.load(Ordering::Relaxed),
            frames_used,
            frames_free,
            bytes_total,
            bytes_used,
            bytes_free: bytes_total - bytes_used,
        }
    }

    /// Processes that currently hold a page table.
    pub fn resident_processes(&self) -> Vec<ProcessId> {
        self.state.read().unwrap().tables.keys().copied().collect()
    }

    /// The process's virtual size, or 0 when it has no allocation.
    pub fn process_memory_size(&self, pid: ProcessId) -> usize {
        self.state
            .read()
            .unwrap()
            .sizes
            .get(&pid)
            .copied()
            .unwrap_or(0)
    }

    /// One line per page-table entry, for inspection.
    pub fn page_table_lines(&self, pid: ProcessId) -> Vec<String> {
        let state = self.state.read().unwrap();
        let Some(table) = state.tables.get(&pid) else {
            return Vec::new();
        };
        table
            .iter()
            .enumerate()
            .map(|(page, entry)| {
                if entry.present {
                    format!(
                        "page {:3} -> frame {:3} dirty={} disk={:#x}",
                        page, entry.frame, entry.dirty as u8, entry.disk_offset
                    )
                } else {
                    format!("page {:3} -> swapped out, disk={:#x}", page, entry.disk_offset)
                }
            })
            .collect()
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// A u16 access needs `va` and `va + 1` inside the virtual size.
    fn check_bounds(&self, pid: ProcessId, va: u32) -> Result<(), MemoryError> {
        let state = self.state.read().unwrap();
        let size = *state
            .sizes
            .get(&pid)
            .ok_or(MemoryError::NoMapping(pid))?;
        if (va as usize) + 1 >= size {
            return Err(MemoryError::OutOfRange { pid, addr: va });
        }
        Ok(())
    }

    /// Stamps an entry with a fresh access tick and sets its referenced bit.
    fn touch(&self, entry: &PageTableEntry) {
        let tick = self.access_counter.fetch_add(1, Ordering::Relaxed) + 1;
        entry.last_access.store(tick, Ordering::Relaxed);
        entry.referenced.store(true, Ordering::Relaxed);
    }

    fn read_byte(&self, pid: ProcessId, va: u32) -> Result<u8, MemoryError> {
        let page = va as usize / self.page_size;
        let offset = va as usize % self.page_size;
        loop {
            {
                let state = self.state.read().unwrap();
                let table = state.tables.get(&pid).ok_or(MemoryError::NoMapping(pid))?;
                let entry = &table[page];
                if entry.present {
                    self.touch(entry);
                    return Ok(state.phys[entry.frame * self.page_size + offset]);
                }
            }
            self.fault_in(pid, page)?;
        }
    }

    fn write_byte(&self, pid: ProcessId, va: u32, value: u8) -> Result<(), MemoryError> {
        let page = va as usize / self.page_size;
        let offset = va as usize % self.page_size;
        loop {
            {
                let mut state = self.state.write().unwrap();
                let VmState { phys, tables, .. } = &mut *state;
                let table = tables.get_mut(&pid).ok_or(MemoryError::NoMapping(pid))?;
                let entry = &mut table[page];
                if entry.present {
                    entry.dirty = true;
                    self.touch(entry);
                    phys[entry.frame * self.page_size + offset] = value;
                    return Ok(());
                }
            }
            self.fault_in(pid, page)?;
        }
    }

    /// Brings one page into a frame. The fault mutex makes fault handling
    /// mutually exclusive; presence is rechecked under the state lock since
    /// another thread may have faulted the same page in first.
    fn fault_in(&self, pid: ProcessId, page: usize) -> Result<(), MemoryError> {
        let _fault = self.fault_lock.lock().unwrap();
        let mut state = self.state.write().unwrap();

        let disk_offset = {
            let table = state.tables.get(&pid).ok_or(MemoryError::NoMapping(pid))?;
            let entry = &table[page];
            if entry.present {
                return Ok(());
            }
            entry.disk_offset
        };

        self.page_faults.fetch_add(1, Ordering::Relaxed);
        let frame = match self.frames.allocate() {
            Some(frame) => frame,
            None => {
                self.evict_victim(&mut state)?;
                self.frames
                    .allocate()
                    .expect("eviction freed a frame")
            }
        };

        let base = frame * self.page_size;
        {
            let VmState { phys, .. } = &mut *state;
            self.backing
                .load(disk_offset, &mut phys[base..base + self.page_size])?;
        }

        let table = state.tables.get_mut(&pid).expect("table checked above");
        let entry = &mut table[page];
        entry.present = true;
        entry.frame = frame;
        entry.dirty = false;
        self.touch(entry);
        self.pages_in.fetch_add(1, Ordering::Relaxed);
        debug!(
            "page fault: process {} page {} -> frame {}",
            pid, page, frame
        );
        Ok(())
    }

    /// Global approximate LRU: evicts the present entry with the smallest
    /// access tick across every process, tie-broken by (process id, page
    /// number) ascending. Dirty victims are written back first.
    fn evict_victim(&self, state: &mut VmState) -> Result<(), MemoryError> {
        let mut victim: Option<(u64, ProcessId, usize)> = None;
        for (&pid, table) in &state.tables {
            for (page, entry) in table.iter().enumerate() {
                if !entry.present {
                    continue;
                }
                let tick = entry.last_access.load(Ordering::Relaxed);
                // BTreeMap order makes strict < the (pid, page) tie-break.
                if victim.map_or(true, |(best, _, _)| tick < best) {
                    victim = Some((tick, pid, page));
                }
            }
        }
        let (_, pid, page) = victim.expect("no resident page while all frames busy");

        let (frame, dirty, disk_offset) = {
            let entry = &state.tables[&pid][page];
            (entry.frame, entry.dirty, entry.disk_offset)
        };
        if dirty {
            let base = frame * self.page_size;
            self.backing
                .store(disk_offset, &state.phys[base..base + self.page_size])?;
            self.pages_out.fetch_add(1, Ordering::Relaxed);
        }

        let table = state.tables.get_mut(&pid).expect("victim table exists");
        let entry = &mut table[page];
        entry.present = false;
        entry.dirty = false;
        entry.referenced.store(false, Ordering::Relaxed);
        self.frames.deallocate(frame);
        debug!("evicted process {} page {} (dirty={})", pid, page, dirty);
        Ok(())
    }
}
