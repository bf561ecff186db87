use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Default tick length. `SLEEP(n)` blocks for `n` ticks, the process factory
/// emits every `batch_process_freq` ticks, and `delay_per_exec` is charged in
/// ticks after each instruction.
pub const DEFAULT_TICK: Duration = Duration::from_millis(100);

/// Size in bytes of the per-process symbol table region at virtual offset 0.
/// 32 variables, two bytes each.
pub const SYMBOL_TABLE_BYTES: usize = 64;

/// Maximum number of variables a process may declare.
pub const MAX_VARIABLES: usize = 32;

/// Scheduling policy for the worker pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerAlgo {
    /// First-come-first-served: a worker runs a process to completion.
    Fcfs,
    /// Round-robin: a worker runs at most `quantum_cycles` instructions
    /// before requeueing the process.
    RoundRobin,
}

impl SchedulerAlgo {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fcfs" => Some(Self::Fcfs),
            "rr" => Some(Self::RoundRobin),
            _ => None,
        }
    }
}

/// Hole selection policy for the contiguous allocator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FitPolicy {
    /// First free block large enough.
    First,
    /// Smallest free block large enough.
    Best,
    /// Largest free block.
    Worst,
}

impl FitPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "F" => Some(Self::First),
            "B" => Some(Self::Best),
            "W" => Some(Self::Worst),
            _ => None,
        }
    }
}

/// Page replacement policy selector. Reserved in the configuration surface;
/// the virtual memory manager implements LRU regardless.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplacementAlgo {
    Lru,
    Fifo,
}

impl ReplacementAlgo {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "LRU" => Some(Self::Lru),
            "FIFO" => Some(Self::Fifo),
            _ => None,
        }
    }
}

/// The one shared configuration object. All subsystems are (re)built from a
/// validated copy of this; see [`Config::validate`] for the accepted ranges.
#[derive(Clone, Debug)]
pub struct Config {
    /// Number of worker cores, 1..=128.
    pub num_cpu: usize,
    /// Scheduling policy.
    pub scheduler: SchedulerAlgo,
    /// Instructions per round-robin slice. Ignored for FCFS.
    pub quantum_cycles: u32,
    /// Factory emission period in ticks, >= 1.
    pub batch_process_freq: u64,
    /// Bounds for generated instruction counts, 1 <= min <= max.
    pub min_ins: usize,
    pub max_ins: usize,
    /// Pacing delay after each executed instruction, in ticks.
    pub delay_per_exec: u64,
    /// Total physical memory in bytes.
    pub max_overall_mem: usize,
    /// Frame/page size in bytes.
    pub mem_per_frame: usize,
    /// Phase 1 fixed per-process allocation size.
    pub mem_per_proc: usize,
    /// Phase 1 hole selection policy.
    pub hole_fit_policy: FitPolicy,
    /// Selects Phase 2 (demand paging) over Phase 1 (contiguous blocks).
    pub enable_virtual_memory: bool,
    /// Phase 2 per-process virtual sizes, 64 <= min <= max <= 65536.
    pub min_mem_per_proc: usize,
    pub max_mem_per_proc: usize,
    /// Reserved; the implementation is LRU.
    pub page_replacement_alg: ReplacementAlgo,
    /// Tick length. Tests compress this; the console default is 100 ms.
    pub tick: Duration,
    /// Backing-store file for evicted pages.
    pub backing_store_path: PathBuf,
    /// Directory receiving `memory_stamp_<NN>.txt` snapshots.
    pub snapshot_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_cpu: 4,
            scheduler: SchedulerAlgo::RoundRobin,
            quantum_cycles: 5,
            batch_process_freq: 1,
            min_ins: 100,
            max_ins: 200,
            delay_per_exec: 0,
            max_overall_mem: 16384,
            mem_per_frame: 16,
            mem_per_proc: 4096,
            hole_fit_policy: FitPolicy::First,
            enable_virtual_memory: false,
            min_mem_per_proc: 64,
            max_mem_per_proc: 4096,
            page_replacement_alg: ReplacementAlgo::Lru,
            tick: DEFAULT_TICK,
            backing_store_path: PathBuf::from("csopesy-backing-store.txt"),
            snapshot_dir: PathBuf::from("memory_stamps"),
        }
    }
}

impl Config {
    /// Checks every parameter against its accepted range. An invalid
    /// configuration blocks initialization; nothing is partially applied.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_cpu < 1 || self.num_cpu > 128 {
            return Err(ConfigError::new("num-cpu", "must be in 1..=128"));
        }
        if self.batch_process_freq < 1 {
            return Err(ConfigError::new("batch-process-freq", "must be >= 1"));
        }
        if self.min_ins < 1 {
            return Err(ConfigError::new("min-ins", "must be >= 1"));
        }
        if self.max_ins < self.min_ins {
            return Err(ConfigError::new("max-ins", "must be >= min-ins"));
        }
        if self.max_overall_mem < 1 {
            return Err(ConfigError::new("max-overall-mem", "must be >= 1"));
        }
        if self.mem_per_frame < 1 {
            return Err(ConfigError::new("mem-per-frame", "must be >= 1"));
        }
        if self.mem_per_proc < 1 || self.mem_per_proc > self.max_overall_mem {
            return Err(ConfigError::new(
                "mem-per-proc",
                "must be >= 1 and <= max-overall-mem",
            ));
        }
        if self.min_mem_per_proc < SYMBOL_TABLE_BYTES || self.min_mem_per_proc > 65536 {
            return Err(ConfigError::new("min-mem-per-proc", "must be in 64..=65536"));
        }
        if self.max_mem_per_proc < self.min_mem_per_proc || self.max_mem_per_proc > 65536 {
            return Err(ConfigError::new(
                "max-mem-per-proc",
                "must be >= min-mem-per-proc and <= 65536",
            ));
        }
        if self.tick.is_zero() {
            return Err(ConfigError::new("tick", "must be non-zero"));
        }
        Ok(())
    }

    /// `n` ticks as wall-clock time.
    pub fn ticks(&self, n: u64) -> Duration {
        self.tick * n as u32
    }

    /// Number of physical frames: `max_overall_mem / mem_per_frame`.
    pub fn total_frames(&self) -> usize {
        self.max_overall_mem / self.mem_per_frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_cores() {
        let mut cfg = Config::default();
        cfg.num_cpu = 0;
        assert!(cfg.validate().is_err());
        cfg.num_cpu = 129;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_inverted_instruction_bounds() {
        let mut cfg = Config::default();
        cfg.min_ins = 10;
        cfg.max_ins = 5;
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.key, "max-ins");
    }

    #[test]
    fn rejects_per_process_memory_larger_than_total() {
        let mut cfg = Config::default();
        cfg.mem_per_proc = cfg.max_overall_mem + 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_virtual_sizes_below_symbol_region() {
        let mut cfg = Config::default();
        cfg.min_mem_per_proc = 32;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parses_policy_strings() {
        assert_eq!(SchedulerAlgo::parse("fcfs"), Some(SchedulerAlgo::Fcfs));
        assert_eq!(SchedulerAlgo::parse("rr"), Some(SchedulerAlgo::RoundRobin));
        assert_eq!(SchedulerAlgo::parse("RR"), None);
        assert_eq!(FitPolicy::parse("F"), Some(FitPolicy::First));
        assert_eq!(FitPolicy::parse("B"), Some(FitPolicy::Best));
        assert_eq!(FitPolicy::parse("W"), Some(FitPolicy::Worst));
        assert_eq!(FitPolicy::parse("X"), None);
        assert_eq!(ReplacementAlgo::parse("LRU"), Some(ReplacementAlgo::Lru));
        assert_eq!(ReplacementAlgo::parse("FIFO"), Some(ReplacementAlgo::Fifo));
    }
}
