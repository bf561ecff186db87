//! The emulator facade: builds the memory subsystem, registry, scheduler
//! and factory from one validated configuration and exposes the command
//! surface the console layers on top.

use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use log::{debug, warn};
use memory::{BlockAllocator, VmManager, VmStats};
use process::{BlockSpan, Process, ProcessHandle};
use sched::{ProcessFactory, ReadyQueue, Registry, Scheduler, SchedulerHooks, SubmitFn, UtilizationReport};
use thiserror::Error;
use types::{Config, ConfigError, MemoryError, ProcessId, SYMBOL_TABLE_BYTES};

/// Manually created processes draw ids from a separate range so they never
/// collide with factory ids.
const MANUAL_ID_BASE: ProcessId = 1000;

#[derive(Debug, Error)]
pub enum EmuError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error("process {0} already exists")]
    DuplicateName(String),

    #[error("process memory size {0} outside 64..=65536")]
    InvalidSize(usize),
}

/// The emulator half of the scheduler boundary: core bookkeeping, memory
/// release on retirement, quantum accounting, and Phase 1 admission with
/// its waiting list.
struct Platform {
    registry: Arc<Registry>,
    queue: Arc<ReadyQueue>,
    blocks: Option<Arc<BlockAllocator>>,
    vm: Option<Arc<VmManager>>,
    /// Phase 1 processes withheld from the ready queue until memory frees
    /// up, in arrival order.
    pending: Mutex<VecDeque<ProcessHandle>>,
}

impl Platform {
    /// Admits a process: memory first, ready queue second. A process that
    /// cannot get memory waits; one with no instructions is never queued.
    fn admit(&self, handle: ProcessHandle) {
        self.retry_pending();
        if !handle.lock().unwrap().is_live() {
            return;
        }
        if self.try_allocate(&handle) {
            self.queue.push(handle);
        } else if self.blocks.is_some() {
            debug!("withholding process from ready queue until memory frees");
            self.pending.lock().unwrap().push_back(handle);
        }
    }

    fn try_allocate(&self, handle: &ProcessHandle) -> bool {
        if let Some(blocks) = &self.blocks {
            let (pid, name) = {
                let process = handle.lock().unwrap();
                (process.id(), process.name().to_string())
            };
            if !blocks.allocate(pid, &name) {
                return false;
            }
            let span = blocks
                .process_memory_map(pid)
                .map(|(start, end)| BlockSpan { start, end });
            handle.lock().unwrap().set_block_span(span);
            return true;
        }
        if let Some(vm) = &self.vm {
            let (pid, size) = {
                let process = handle.lock().unwrap();
                (process.id(), process.virtual_size())
            };
            return match vm.allocate(pid, size) {
                Ok(()) => true,
                Err(err) => {
                    warn!("virtual allocation for process {} failed: {}", pid, err);
                    false
                }
            };
        }
        true
    }

    /// Re-tries withheld processes in arrival order. Allocations are all
    /// the same size in Phase 1, so the first failure ends the pass.
    fn retry_pending(&self) {
        let mut pending = self.pending.lock().unwrap();
        while let Some(handle) = pending.front().cloned() {
            if !self.try_allocate(&handle) {
                break;
            }
            pending.pop_front();
            self.queue.push(handle);
        }
    }
}

impl SchedulerHooks for Platform {
    fn assign_core(&self, pid: ProcessId, core: usize) {
        self.registry.assign_core(pid, core);
    }

    fn clear_core(&self, pid: ProcessId) {
        self.registry.clear_core(pid);
    }

    fn release_memory(&self, pid: ProcessId) {
        if let Some(blocks) = &self.blocks {
            blocks.deallocate(pid);
            if let Some(handle) = self.registry.get(pid) {
                handle.lock().unwrap().set_block_span(None);
            }
            self.retry_pending();
        }
        if let Some(vm) = &self.vm {
            vm.deallocate(pid);
        }
    }

    fn increment_quantum(&self) {
        let quantum = self.registry.increment_quantum();
        if let Some(blocks) = &self.blocks {
            if let Err(err) = blocks.snapshot(quantum) {
                warn!("memory snapshot for quantum {} failed: {}", quantum, err);
            }
        }
    }
}

/// One configured emulator instance. `initialize` on the console maps to
/// [`Emulator::new`]; a configuration change builds a fresh instance.
pub struct Emulator {
    config: Config,
    registry: Arc<Registry>,
    queue: Arc<ReadyQueue>,
    platform: Arc<Platform>,
    scheduler: Scheduler,
    factory: Option<ProcessFactory>,
    next_manual_id: AtomicU32,
}

impl Emulator {
    pub fn new(config: Config) -> Result<Self, EmuError> {
        config.validate()?;
        let registry = Arc::new(Registry::new(config.num_cpu));
        let queue = Arc::new(ReadyQueue::new());

        let (blocks, vm) = if config.enable_virtual_memory {
            let vm = VmManager::new(
                config.max_overall_mem,
                config.mem_per_frame,
                &config.backing_store_path,
            )?;
            (None, Some(Arc::new(vm)))
        } else {
            let blocks = BlockAllocator::new(
                config.max_overall_mem,
                config.mem_per_proc,
                config.mem_per_frame,
                config.hole_fit_policy,
                &config.snapshot_dir,
            );
            (Some(Arc::new(blocks)), None)
        };

        let platform = Arc::new(Platform {
            registry: Arc::clone(&registry),
            queue: Arc::clone(&queue),
            blocks,
            vm: vm.clone(),
            pending: Mutex::new(VecDeque::new()),
        });
        let hooks: Arc<dyn SchedulerHooks> = platform.clone() as Arc<dyn SchedulerHooks>;
        let scheduler = Scheduler::new(&config, Arc::clone(&queue), vm, hooks);

        Ok(Self {
            config,
            registry,
            queue,
            platform,
            scheduler,
            factory: None,
            next_manual_id: AtomicU32::new(0),
        })
    }

    /// `scheduler-start`: workers plus the process factory.
    pub fn start(&mut self) {
        self.start_scheduler();
        if self.factory.is_none() {
            let platform = Arc::clone(&self.platform);
            let registry = Arc::clone(&self.registry);
            let submit: Arc<SubmitFn> = Arc::new(move |process: Process| {
                let handle = process.into_handle();
                registry.insert(Arc::clone(&handle));
                platform.admit(handle);
            });
            self.factory = Some(ProcessFactory::start(&self.config, submit));
        }
    }

    /// Workers only; processes arrive through [`Emulator::create_process`].
    pub fn start_scheduler(&mut self) {
        self.scheduler.start();
    }

    /// Hard stop: the factory stops and workers exit once the queue is
    /// empty.
    pub fn stop(&mut self) {
        self.stop_factory();
        self.scheduler.stop();
    }

    /// `scheduler-stop`: stop the factory, let workers drain everything
    /// that is queued or running, then stop them.
    pub fn stop_gracefully(&mut self) {
        self.stop_factory();
        while self.scheduler.is_running()
            && !self.scheduler.has_fatal()
            && !(self.queue.is_empty() && self.registry.used_cores() == 0)
        {
            thread::sleep(Duration::from_millis(5));
        }
        self.scheduler.stop();
    }

    fn stop_factory(&mut self) {
        if let Some(mut factory) = self.factory.take() {
            factory.stop();
        }
    }

    /// `screen -s <name> [size]` / `screen -c <name> <size> "<instr>;…"`:
    /// a manually created process with explicit instructions.
    pub fn create_process(
        &self,
        name: &str,
        memory_size: Option<usize>,
        instructions: Vec<String>,
    ) -> Result<ProcessHandle, EmuError> {
        if self.registry.find_by_name(name).is_some() {
            return Err(EmuError::DuplicateName(name.to_string()));
        }
        let id = MANUAL_ID_BASE + self.next_manual_id.fetch_add(1, Ordering::Relaxed);
        let mut process = Process::new(id, name, instructions);
        if self.config.enable_virtual_memory {
            let size = memory_size.unwrap_or(self.config.min_mem_per_proc);
            if !(SYMBOL_TABLE_BYTES..=65536).contains(&size) {
                return Err(EmuError::InvalidSize(size));
            }
            process.set_virtual_size(size);
        }
        let handle = process.into_handle();
        self.registry.insert(Arc::clone(&handle));
        self.platform.admit(Arc::clone(&handle));
        Ok(handle)
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_generating(&self) -> bool {
        self.factory.as_ref().map_or(false, |f| f.is_running())
    }

    /// Phase 2 paging counters (`vmstat`), when virtual memory is enabled.
    pub fn vm_stats(&self) -> Option<VmStats> {
        self.platform.vm.as_ref().map(|vm| vm.stats())
    }

    /// Phase 1 top-down memory layout, when contiguous allocation is
    /// enabled.
    pub fn memory_layout(&self) -> Option<String> {
        self.platform.blocks.as_ref().map(|b| b.ascii_layout())
    }

    /// `report-util`: builds the utilization report and writes
    /// `csopesy-log.txt` (or the given path).
    pub fn report_utilization(&self, path: &Path) -> io::Result<UtilizationReport> {
        let report = UtilizationReport::build(&self.registry);
        report.write_to(path)?;
        Ok(report)
    }

    pub fn default_report_path(&self) -> PathBuf {
        PathBuf::from("csopesy-log.txt")
    }

    /// The fatal error that stopped the scheduler, if one occurred. The
    /// process exits non-zero when this is set.
    pub fn take_fatal(&self) -> Option<MemoryError> {
        self.scheduler.take_fatal()
    }
}

impl Drop for Emulator {
    fn drop(&mut self) {
        self.stop_factory();
    }
}
