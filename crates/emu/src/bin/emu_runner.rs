use std::path::Path;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use emu::Emulator;
use types::{Config, SchedulerAlgo};

/// Drives a short scheduler run against the default configuration: start
/// the factory and workers, let them churn for a few seconds, stop
/// gracefully, and print the utilization report and memory state.
fn main() -> Result<()> {
    env_logger::init();

    let config = Config {
        num_cpu: 2,
        scheduler: SchedulerAlgo::RoundRobin,
        quantum_cycles: 4,
        batch_process_freq: 2,
        min_ins: 8,
        max_ins: 20,
        tick: Duration::from_millis(20),
        enable_virtual_memory: true,
        min_mem_per_proc: 64,
        max_mem_per_proc: 512,
        max_overall_mem: 1024,
        mem_per_frame: 32,
        mem_per_proc: 512,
        ..Config::default()
    };

    let mut emulator = Emulator::new(config)?;
    emulator.start();
    thread::sleep(Duration::from_secs(3));
    emulator.stop_gracefully();

    let report = emulator.report_utilization(Path::new("csopesy-log.txt"))?;
    print!("{}", report.render());

    if let Some(stats) = emulator.vm_stats() {
        println!(
            "page faults: {}  pages in: {}  pages out: {}  frames: {}/{} used",
            stats.page_faults,
            stats.pages_in,
            stats.pages_out,
            stats.frames_used,
            stats.frames_used + stats.frames_free,
        );
    }
    if let Some(layout) = emulator.memory_layout() {
        print!("{}", layout);
    }

    if let Some(fatal) = emulator.take_fatal() {
        return Err(fatal.into());
    }
    Ok(())
}
