use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info};
use process::Process;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use types::Config;

use crate::generator::InstructionGenerator;

/// A process freshly synthesized by the factory, ready for admission.
pub type SubmitFn = dyn Fn(Process) + Send + Sync;

/// Emits a synthetic process every `batch-process-freq` ticks on a
/// dedicated thread, the first one immediately on start. Each process gets
/// a monotone id, a `p<NN>` name, and a random instruction stream sized
/// uniformly in `[min-ins, max-ins]`. In Phase 2 the factory also draws the
/// process's virtual size so the generated addresses fit it.
pub struct ProcessFactory {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ProcessFactory {
    pub fn start(config: &Config, submit: Arc<SubmitFn>) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let thread_flag = Arc::clone(&running);
        let config = config.clone();

        let handle = thread::spawn(move || {
            info!("process factory started");
            let mut generator = InstructionGenerator::new();
            let mut rng = StdRng::from_entropy();
            let mut counter: u32 = 0;
            let period = config.ticks(config.batch_process_freq);
            let poll = (config.tick / 4).max(Duration::from_millis(1));

            emit(&config, &mut generator, &mut rng, &mut counter, &submit);
            let mut last_emission = Instant::now();

            while thread_flag.load(Ordering::Relaxed) {
                if last_emission.elapsed() >= period {
                    emit(&config, &mut generator, &mut rng, &mut counter, &submit);
                    last_emission = Instant::now();
                }
                thread::sleep(poll);
            }
            info!("process factory stopped after {} processes", counter);
        });

        Self {
            running,
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Signals the generator loop and joins it.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ProcessFactory {
    fn drop(&mut self) {
        self.stop();
    }
}

fn emit(
    config: &Config,
    generator: &mut InstructionGenerator,
    rng: &mut StdRng,
    counter: &mut u32,
    submit: &Arc<SubmitFn>,
) {
    *counter += 1;
    let id = *counter;
    let name = format!("p{:02}", id);

    let memory_span = config.enable_virtual_memory.then(|| {
        rng.gen_range(config.min_mem_per_proc..=config.max_mem_per_proc)
    });
    let count = rng.gen_range(config.min_ins..=config.max_ins);
    let instructions = generator.generate(&name, count, memory_span);

    let mut process = Process::new(id, name, instructions);
    if let Some(size) = memory_span {
        process.set_virtual_size(size);
    }
    debug!(
        "factory emitted {} ({} instructions)",
        process.name(),
        process.total_instructions()
    );
    submit(process);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn fast_config() -> Config {
        Config {
            tick: Duration::from_millis(2),
            batch_process_freq: 1,
            min_ins: 3,
            max_ins: 6,
            ..Config::default()
        }
    }

    #[test]
    fn emits_immediately_and_then_periodically() {
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let submit: Arc<SubmitFn> =
            Arc::new(move |p: Process| sink.lock().unwrap().push(p.name().to_string()));

        let mut factory = ProcessFactory::start(&fast_config(), submit);
        thread::sleep(Duration::from_millis(40));
        factory.stop();

        let names = seen.lock().unwrap();
        assert!(names.len() >= 2, "expected several emissions, got {:?}", names);
        assert_eq!(names[0], "p01");
        assert_eq!(names[1], "p02");
    }

    #[test]
    fn generated_processes_have_bounded_streams() {
        let seen: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let submit: Arc<SubmitFn> =
            Arc::new(move |p: Process| sink.lock().unwrap().push(p.total_instructions()));

        let mut factory = ProcessFactory::start(&fast_config(), submit);
        thread::sleep(Duration::from_millis(30));
        factory.stop();

        for &count in seen.lock().unwrap().iter() {
            assert!((3..=6).contains(&count));
        }
    }

    #[test]
    fn phase_two_processes_carry_a_virtual_size() {
        let mut config = fast_config();
        config.enable_virtual_memory = true;
        config.min_mem_per_proc = 64;
        config.max_mem_per_proc = 256;

        let seen: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let submit: Arc<SubmitFn> =
            Arc::new(move |p: Process| sink.lock().unwrap().push(p.virtual_size()));

        let mut factory = ProcessFactory::start(&config, submit);
        thread::sleep(Duration::from_millis(20));
        factory.stop();

        let sizes = seen.lock().unwrap();
        assert!(!sizes.is_empty());
        for &size in sizes.iter() {
            assert!((64..=256).contains(&size));
        }
    }

    #[test]
    fn stop_joins_cleanly_and_is_idempotent() {
        let submit: Arc<SubmitFn> = Arc::new(|_p: Process| {});
        let mut factory = ProcessFactory::start(&fast_config(), submit);
        assert!(factory.is_running());
        factory.stop();
        assert!(!factory.is_running());
        factory.stop();
    }
}
