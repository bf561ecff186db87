use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use process::ProcessHandle;
use types::ProcessId;

/// Canonical list of every process the emulator has seen, in creation
/// order, with name lookup, the core-assignment map for currently running
/// processes, and the round-robin quantum counter.
pub struct Registry {
    inner: Mutex<RegistryState>,
    quantum: AtomicU64,
    num_cores: usize,
}

struct RegistryState {
    processes: Vec<ProcessHandle>,
    by_id: HashMap<ProcessId, ProcessHandle>,
    by_name: HashMap<String, ProcessHandle>,
    cores: HashMap<ProcessId, usize>,
}

impl Registry {
    pub fn new(num_cores: usize) -> Self {
        Self {
            inner: Mutex::new(RegistryState {
                processes: Vec::new(),
                by_id: HashMap::new(),
                by_name: HashMap::new(),
                cores: HashMap::new(),
            }),
            quantum: AtomicU64::new(0),
            num_cores,
        }
    }

    pub fn insert(&self, handle: ProcessHandle) {
        let (id, name) = {
            let process = handle.lock().unwrap();
            (process.id(), process.name().to_string())
        };
        let mut state = self.inner.lock().unwrap();
        state.processes.push(handle.clone());
        state.by_id.insert(id, handle.clone());
        state.by_name.insert(name, handle);
    }

    pub fn get(&self, id: ProcessId) -> Option<ProcessHandle> {
        self.inner.lock().unwrap().by_id.get(&id).cloned()
    }

    pub fn find_by_name(&self, name: &str) -> Option<ProcessHandle> {
        self.inner.lock().unwrap().by_name.get(name).cloned()
    }

    /// Every process in creation order.
    pub fn all(&self) -> Vec<ProcessHandle> {
        self.inner.lock().unwrap().processes.clone()
    }

    pub fn running(&self) -> Vec<ProcessHandle> {
        self.inner
            .lock()
            .unwrap()
            .processes
            .iter()
            .filter(|h| h.lock().unwrap().is_live())
            .cloned()
            .collect()
    }

    pub fn finished(&self) -> Vec<ProcessHandle> {
        self.inner
            .lock()
            .unwrap()
            .processes
            .iter()
            .filter(|h| !h.lock().unwrap().is_live())
            .cloned()
            .collect()
    }

    pub fn process_count(&self) -> usize {
        self.inner.lock().unwrap().processes.len()
    }

    /// Marks a process as interpreted by `core` and mirrors the assignment
    /// into the record.
    pub fn assign_core(&self, id: ProcessId, core: usize) {
        let handle = {
            let mut state = self.inner.lock().unwrap();
            state.cores.insert(id, core);
            state.by_id.get(&id).cloned()
        };
        if let Some(handle) = handle {
            handle.lock().unwrap().set_assigned_core(core as i32);
        }
    }

    pub fn clear_core(&self, id: ProcessId) {
        let handle = {
            let mut state = self.inner.lock().unwrap();
            state.cores.remove(&id);
            state.by_id.get(&id).cloned()
        };
        if let Some(handle) = handle {
            handle.lock().unwrap().set_assigned_core(-1);
        }
    }

    pub fn core_of(&self, id: ProcessId) -> Option<usize> {
        self.inner.lock().unwrap().cores.get(&id).copied()
    }

    pub fn used_cores(&self) -> usize {
        self.inner.lock().unwrap().cores.len()
    }

    pub fn num_cores(&self) -> usize {
        self.num_cores
    }

    /// Used cores over configured cores, in percent.
    pub fn utilization(&self) -> f64 {
        if self.num_cores == 0 {
            return 0.0;
        }
        self.used_cores() as f64 / self.num_cores as f64 * 100.0
    }

    /// Bumps the quantum counter by one completed round-robin slice and
    /// returns the new count.
    pub fn increment_quantum(&self) -> u64 {
        self.quantum.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn quantum_count(&self) -> u64 {
        self.quantum.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use process::Process;

    fn handle(id: u32, name: &str, live: bool) -> ProcessHandle {
        let instructions = if live {
            vec!["PRINT(\"x\")".to_string()]
        } else {
            Vec::new()
        };
        Process::new(id, name, instructions).into_handle()
    }

    #[test]
    fn lookup_by_id_and_name() {
        let registry = Registry::new(4);
        registry.insert(handle(1, "p01", true));
        registry.insert(handle(2, "p02", true));

        assert_eq!(registry.get(2).unwrap().lock().unwrap().name(), "p02");
        assert_eq!(registry.find_by_name("p01").unwrap().lock().unwrap().id(), 1);
        assert!(registry.find_by_name("p99").is_none());
        assert_eq!(registry.process_count(), 2);
    }

    #[test]
    fn running_and_finished_views_split_on_liveness() {
        let registry = Registry::new(4);
        registry.insert(handle(1, "p01", true));
        registry.insert(handle(2, "p02", false));

        let running: Vec<u32> = registry
            .running()
            .iter()
            .map(|h| h.lock().unwrap().id())
            .collect();
        let finished: Vec<u32> = registry
            .finished()
            .iter()
            .map(|h| h.lock().unwrap().id())
            .collect();
        assert_eq!(running, [1]);
        assert_eq!(finished, [2]);
    }

    #[test]
    fn core_assignment_mirrors_into_the_record() {
        let registry = Registry::new(2);
        let h = handle(1, "p01", true);
        registry.insert(h.clone());

        registry.assign_core(1, 1);
        assert_eq!(registry.core_of(1), Some(1));
        assert_eq!(h.lock().unwrap().assigned_core(), 1);
        assert_eq!(registry.used_cores(), 1);
        assert_eq!(registry.utilization(), 50.0);

        registry.clear_core(1);
        assert_eq!(registry.core_of(1), None);
        assert_eq!(h.lock().unwrap().assigned_core(), -1);
        assert_eq!(registry.utilization(), 0.0);
    }

    #[test]
    fn quantum_counter_is_monotone() {
        let registry = Registry::new(1);
        assert_eq!(registry.quantum_count(), 0);
        assert_eq!(registry.increment_quantum(), 1);
        assert_eq!(registry.increment_quantum(), 2);
        assert_eq!(registry.quantum_count(), 2);
    }
}
