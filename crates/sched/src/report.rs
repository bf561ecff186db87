use std::fs;
use std::io;
use std::path::Path;

use chrono::Local;
use log::info;

use crate::registry::Registry;

/// Snapshot of scheduler utilization plus per-process status lines, the
/// payload of `report-util` and the `csopesy-log.txt` file.
pub struct UtilizationReport {
    pub timestamp: String,
    pub cpu_utilization: f64,
    pub cores_used: usize,
    pub cores_available: usize,
    pub running: Vec<String>,
    pub finished: Vec<String>,
}

impl UtilizationReport {
    pub fn build(registry: &Registry) -> Self {
        let mut running = Vec::new();
        for handle in registry.running() {
            let process = handle.lock().unwrap();
            // The record mirrors the core map; reading it here avoids
            // taking the registry lock while holding the process lock.
            let core = usize::try_from(process.assigned_core()).ok();
            running.push(status_line(
                process.name(),
                process.created(),
                core,
                process.cursor(),
                process.total_instructions(),
                false,
            ));
        }
        let mut finished = Vec::new();
        for handle in registry.finished() {
            let process = handle.lock().unwrap();
            finished.push(status_line(
                process.name(),
                process.created(),
                None,
                process.cursor(),
                process.total_instructions(),
                true,
            ));
        }
        Self {
            timestamp: Local::now().format("%m/%d/%Y, %I:%M:%S %p").to_string(),
            cpu_utilization: registry.utilization(),
            cores_used: registry.used_cores(),
            cores_available: registry.num_cores(),
            running,
            finished,
        }
    }

    /// The console rendering between dashed rules.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("-----------------------------------------\n");
        out.push_str(&format!("CPU utilization: {:.2}%\n", self.cpu_utilization));
        out.push_str(&format!("Cores used: {}\n", self.cores_used));
        out.push_str(&format!("Cores available: {}\n\n", self.cores_available));

        out.push_str("Running processes:\n");
        if self.running.is_empty() {
            out.push_str("No running processes.\n");
        } else {
            for line in &self.running {
                out.push_str(line);
                out.push('\n');
            }
        }
        out.push('\n');

        out.push_str("Finished processes:\n");
        if self.finished.is_empty() {
            out.push_str("No finished processes.\n");
        } else {
            for line in &self.finished {
                out.push_str(line);
                out.push('\n');
            }
        }
        out.push_str("-----------------------------------------\n");
        out
    }

    /// Writes the report file (`csopesy-log.txt`).
    pub fn write_to(&self, path: &Path) -> io::Result<()> {
        let mut text = String::new();
        text.push_str("CPU Utilization Report\n");
        text.push_str(&format!("Timestamp: {}\n", self.timestamp));
        text.push_str(&self.render());
        fs::write(path, text)?;
        info!("report saved to {}", path.display());
        Ok(())
    }
}

fn status_line(
    name: &str,
    created: &str,
    core: Option<usize>,
    cursor: usize,
    total: usize,
    finished: bool,
) -> String {
    if finished {
        format!("{:<12} ({})     Finished    {:>5} / {}", name, created, total, total)
    } else {
        let core = match core {
            Some(core) => format!("{:>2}", core),
            None => "--".to_string(),
        };
        format!(
            "{:<12} ({})     Core: {}    {:>5} / {}",
            name, created, core, cursor, total
        )
    }
}
