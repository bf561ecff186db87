use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use interp::{Interpreter, StepOutcome};
use log::{debug, error, info};
use memory::VmManager;
use process::ProcessHandle;
use types::{Config, MemoryError, ProcessId, SchedulerAlgo};

use crate::queue::ReadyQueue;

/// The narrow interface a worker needs from the rest of the system. The
/// worker holds this instead of the registry, which keeps the scheduler
/// from depending on the process-management layer that drives it.
pub trait SchedulerHooks: Send + Sync {
    fn assign_core(&self, pid: ProcessId, core: usize);
    fn clear_core(&self, pid: ProcessId);
    /// Called exactly once when a process retires.
    fn release_memory(&self, pid: ProcessId);
    /// Called after every round-robin slice.
    fn increment_quantum(&self);
}

/// Worker pool: one OS thread per configured core, all pulling from the
/// shared ready queue. FCFS runs a process to completion; round-robin runs
/// at most `quantum_cycles` instructions, then requeues.
pub struct Scheduler {
    queue: Arc<ReadyQueue>,
    memory: Option<Arc<VmManager>>,
    hooks: Arc<dyn SchedulerHooks>,
    workers: Vec<JoinHandle<()>>,
    fatal: Arc<Mutex<Option<MemoryError>>>,
    algo: SchedulerAlgo,
    quantum: u32,
    num_cores: usize,
    tick: Duration,
    delay_per_exec: u64,
}

impl Scheduler {
    pub fn new(
        config: &Config,
        queue: Arc<ReadyQueue>,
        memory: Option<Arc<VmManager>>,
        hooks: Arc<dyn SchedulerHooks>,
    ) -> Self {
        Self {
            queue,
            memory,
            hooks,
            workers: Vec::new(),
            fatal: Arc::new(Mutex::new(None)),
            algo: config.scheduler,
            quantum: config.quantum_cycles,
            num_cores: config.num_cpu,
            tick: config.tick,
            delay_per_exec: config.delay_per_exec,
        }
    }

    /// Spawns the worker threads. Idempotent while running.
    pub fn start(&mut self) {
        if !self.workers.is_empty() {
            return;
        }
        info!(
            "scheduler starting: {:?}, {} cores, quantum {}",
            self.algo, self.num_cores, self.quantum
        );
        let interpreter = Arc::new(Interpreter::new(self.tick));
        let pacing = self.tick * self.delay_per_exec as u32;
        for core in 0..self.num_cores {
            let ctx = WorkerContext {
                core,
                queue: Arc::clone(&self.queue),
                memory: self.memory.clone(),
                hooks: Arc::clone(&self.hooks),
                interpreter: Arc::clone(&interpreter),
                fatal: Arc::clone(&self.fatal),
                algo: self.algo,
                quantum: self.quantum,
                pacing,
            };
            self.workers.push(thread::spawn(move || ctx.run()));
        }
    }

    pub fn is_running(&self) -> bool {
        !self.workers.is_empty()
    }

    /// Signals shutdown and joins every worker. Queued processes drain
    /// before the workers exit.
    pub fn stop(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        self.queue.shutdown();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        info!("scheduler stopped");
    }

    pub fn has_fatal(&self) -> bool {
        self.fatal.lock().unwrap().is_some()
    }

    /// The first fatal error a worker hit, if any. The emulator exits
    /// non-zero when this is set.
    pub fn take_fatal(&self) -> Option<MemoryError> {
        self.fatal.lock().unwrap().take()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

struct WorkerContext {
    core: usize,
    queue: Arc<ReadyQueue>,
    memory: Option<Arc<VmManager>>,
    hooks: Arc<dyn SchedulerHooks>,
    interpreter: Arc<Interpreter>,
    fatal: Arc<Mutex<Option<MemoryError>>>,
    algo: SchedulerAlgo,
    quantum: u32,
    pacing: Duration,
}

impl WorkerContext {
    fn run(self) {
        debug!("core {} online", self.core);
        while let Some(handle) = self.queue.pop_blocking() {
            let pid = handle.lock().unwrap().id();
            self.hooks.assign_core(pid, self.core);
            let slice = match self.algo {
                SchedulerAlgo::Fcfs => self.run_to_completion(&handle),
                SchedulerAlgo::RoundRobin => self.run_slice(&handle),
            };
            self.hooks.clear_core(pid);
            match slice {
                Ok(true) => self.hooks.release_memory(pid),
                Ok(false) => self.queue.push(handle),
                Err(err) => {
                    error!("core {}: fatal memory failure: {}", self.core, err);
                    let mut fatal = self.fatal.lock().unwrap();
                    if fatal.is_none() {
                        *fatal = Some(err);
                    }
                    drop(fatal);
                    self.queue.shutdown();
                    break;
                }
            }
        }
        debug!("core {} offline", self.core);
    }

    /// FCFS: the worker does not yield until the cursor reaches the end.
    fn run_to_completion(&self, handle: &ProcessHandle) -> Result<bool, MemoryError> {
        loop {
            {
                let mut process = handle.lock().unwrap();
                match self
                    .interpreter
                    .step(&mut process, self.memory.as_deref())?
                {
                    StepOutcome::Completed => return Ok(true),
                    _ => {
                        if !process.is_live() {
                            return Ok(true);
                        }
                    }
                }
            }
            self.pace();
        }
    }

    /// Round-robin: at most `quantum` instructions, then one quantum-counter
    /// bump regardless of how the slice ended.
    fn run_slice(&self, handle: &ProcessHandle) -> Result<bool, MemoryError> {
        let mut finished = false;
        for executed in 0..self.quantum {
            {
                let mut process = handle.lock().unwrap();
                match self
                    .interpreter
                    .step(&mut process, self.memory.as_deref())
                {
                    Ok(StepOutcome::Completed) => {
                        finished = true;
                    }
                    Ok(_) => {
                        finished = !process.is_live();
                    }
                    Err(err) => {
                        // The slice still counts before the error surfaces.
                        self.hooks.increment_quantum();
                        return Err(err);
                    }
                }
            }
            if finished {
                break;
            }
            if executed + 1 < self.quantum {
                self.pace();
            }
        }
        self.hooks.increment_quantum();
        Ok(finished)
    }

    fn pace(&self) {
        if !self.pacing.is_zero() {
            thread::sleep(self.pacing);
        }
    }
}
