use std::path::PathBuf;
use std::time::Duration;

use emu::{EmuError, Emulator};
use types::{Config, FitPolicy, SchedulerAlgo};

fn temp_path(name: &str) -> PathBuf {
    let _ = env_logger::builder().is_test(true).try_init();
    std::env::temp_dir().join(format!("emu-{}-{}", std::process::id(), name))
}

fn phase1_config(name: &str) -> Config {
    Config {
        num_cpu: 1,
        scheduler: SchedulerAlgo::Fcfs,
        tick: Duration::from_millis(1),
        max_overall_mem: 100,
        mem_per_proc: 40,
        mem_per_frame: 10,
        hole_fit_policy: FitPolicy::First,
        enable_virtual_memory: false,
        snapshot_dir: temp_path(&format!("stamps-{}", name)),
        ..Config::default()
    }
}

fn phase2_config(name: &str) -> Config {
    Config {
        num_cpu: 2,
        scheduler: SchedulerAlgo::RoundRobin,
        quantum_cycles: 3,
        tick: Duration::from_millis(1),
        max_overall_mem: 64,
        mem_per_frame: 16,
        mem_per_proc: 64,
        enable_virtual_memory: true,
        min_mem_per_proc: 64,
        max_mem_per_proc: 128,
        backing_store_path: temp_path(&format!("backing-{}", name)),
        ..Config::default()
    }
}

fn wait_until(mut done: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if done() {
            return;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    panic!("timed out waiting for condition");
}

#[test]
fn invalid_configuration_blocks_initialization() {
    let mut config = phase1_config("badcfg");
    config.num_cpu = 0;
    assert!(matches!(Emulator::new(config), Err(EmuError::Config(_))));
}

#[test]
fn withheld_processes_enter_once_memory_frees() {
    // 100 bytes, 40 per process: two fit, the third waits.
    let mut emulator = Emulator::new(phase1_config("withheld")).unwrap();
    let instrs = |tag: &str| vec![format!("PRINT(\"{}\")", tag); 3];

    let a = emulator.create_process("A", None, instrs("a")).unwrap();
    let b = emulator.create_process("B", None, instrs("b")).unwrap();
    let c = emulator.create_process("C", None, instrs("c")).unwrap();

    assert!(a.lock().unwrap().block_span().is_some());
    assert!(b.lock().unwrap().block_span().is_some());
    // C is registered but holds no memory and is not queued yet.
    assert!(c.lock().unwrap().block_span().is_none());

    emulator.start_scheduler();
    wait_until(|| !c.lock().unwrap().is_live());
    emulator.stop();

    for handle in [&a, &b, &c] {
        let process = handle.lock().unwrap();
        assert!(!process.is_live());
        assert_eq!(process.execution_log().len(), 3);
        assert!(process.block_span().is_none(), "memory released at retirement");
    }
    assert!(emulator.take_fatal().is_none());
}

#[test]
fn round_robin_phase1_writes_quantum_snapshots() {
    let mut config = phase1_config("snapshots");
    config.scheduler = SchedulerAlgo::RoundRobin;
    config.quantum_cycles = 2;
    let snapshot_dir = config.snapshot_dir.clone();
    let _ = std::fs::remove_dir_all(&snapshot_dir);

    let mut emulator = Emulator::new(config).unwrap();
    let p = emulator
        .create_process(
            "A",
            None,
            vec![
                "DECLARE(x, 1)".to_string(),
                "ADD(x, x, 1)".to_string(),
                "ADD(x, x, 1)".to_string(),
            ],
        )
        .unwrap();

    emulator.start_scheduler();
    wait_until(|| !p.lock().unwrap().is_live());
    emulator.stop_gracefully();

    // Two slices for three instructions, one snapshot per slice.
    assert_eq!(emulator.registry().quantum_count(), 2);
    assert!(snapshot_dir.join("memory_stamp_01.txt").exists());
    assert!(snapshot_dir.join("memory_stamp_02.txt").exists());
    assert_eq!(p.lock().unwrap().symbols().get("x"), Some(3));
    let _ = std::fs::remove_dir_all(&snapshot_dir);
}

#[test]
fn phase2_memory_instructions_flow_through_the_vmm() {
    let mut emulator = Emulator::new(phase2_config("memflow")).unwrap();
    let p = emulator
        .create_process(
            "writer",
            Some(64),
            vec![
                "WRITE(0x20, 4660)".to_string(),
                "READ(v, 0x20)".to_string(),
                r#"PRINT("v = " + v)"#.to_string(),
            ],
        )
        .unwrap();

    emulator.start_scheduler();
    wait_until(|| !p.lock().unwrap().is_live());
    emulator.stop_gracefully();

    let process = p.lock().unwrap();
    assert_eq!(process.symbols().get("v"), Some(4660));
    assert_eq!(process.output(), &["v = 4660"]);

    let stats = emulator.vm_stats().unwrap();
    assert!(stats.page_faults >= 1);
    // Retirement released every frame.
    assert_eq!(stats.frames_used, 0);
}

#[test]
fn factory_driven_run_retires_processes_and_stays_consistent() {
    let mut config = phase2_config("factory");
    config.min_ins = 3;
    config.max_ins = 8;
    config.batch_process_freq = 1;

    let mut emulator = Emulator::new(config).unwrap();
    emulator.start();
    assert!(emulator.is_generating());
    wait_until(|| emulator.registry().finished().len() >= 3);
    emulator.stop_gracefully();
    assert!(!emulator.is_generating());

    let registry = emulator.registry();
    assert!(registry.process_count() >= 3);
    for handle in registry.finished() {
        let process = handle.lock().unwrap();
        assert_eq!(process.cursor(), process.total_instructions());
        assert_eq!(process.assigned_core(), -1);
    }
    // Names follow the p<NN> convention in creation order.
    let first = registry.all()[0].lock().unwrap().name().to_string();
    assert_eq!(first, "p01");
    assert!(emulator.take_fatal().is_none());
}

#[test]
fn duplicate_names_and_bad_sizes_are_rejected() {
    let emulator = Emulator::new(phase2_config("rejects")).unwrap();
    emulator
        .create_process("A", Some(64), vec!["PRINT(\"a\")".to_string()])
        .unwrap();
    assert!(matches!(
        emulator.create_process("A", Some(64), vec![]),
        Err(EmuError::DuplicateName(_))
    ));
    assert!(matches!(
        emulator.create_process("B", Some(32), vec![]),
        Err(EmuError::InvalidSize(32))
    ));
    assert!(matches!(
        emulator.create_process("C", Some(70000), vec![]),
        Err(EmuError::InvalidSize(70000))
    ));
}

#[test]
fn empty_processes_are_never_scheduled() {
    let mut emulator = Emulator::new(phase2_config("empty")).unwrap();
    let p = emulator.create_process("idle", Some(64), vec![]).unwrap();
    assert!(!p.lock().unwrap().is_live());

    emulator.start_scheduler();
    std::thread::sleep(Duration::from_millis(20));
    emulator.stop();

    let process = p.lock().unwrap();
    assert_eq!(process.cursor(), 0);
    assert!(process.execution_log().is_empty());
    // It never held memory either.
    assert_eq!(emulator.vm_stats().unwrap().frames_used, 0);
    assert_eq!(emulator.registry().finished().len(), 1);
}

#[test]
fn utilization_report_lands_on_disk() {
    let emulator = Emulator::new(phase2_config("report")).unwrap();
    emulator
        .create_process("A", Some(64), vec!["PRINT(\"a\")".to_string()])
        .unwrap();

    let path = temp_path("csopesy-log.txt");
    let report = emulator.report_utilization(&path).unwrap();
    assert_eq!(report.cores_available, 2);

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.starts_with("CPU Utilization Report\n"));
    assert!(text.contains("Running processes:"));
    std::fs::remove_file(&path).unwrap();
}
