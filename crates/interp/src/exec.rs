use std::thread;
use std::time::Duration;

use log::warn;
use memory::VmManager;
use process::Process;
use thiserror::Error;
use types::MemoryError;

use crate::parser::{parse, Instruction, Operand, ParseError, PrintArg};

/// Why an instruction did not complete. Parse and in-range memory failures
/// are swallowed at the instruction boundary; a fatal memory failure
/// propagates out of the worker.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error("no virtual memory attached (READ/WRITE need Phase 2)")]
    MemoryUnavailable,
}

impl ExecError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ExecError::Memory(err) if err.is_fatal())
    }
}

/// Result of one interpreter step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// The instruction ran and was appended to the execution log.
    Executed,
    /// The instruction was rejected or faulted; it had no effect and the
    /// cursor moved on.
    Failed,
    /// The cursor is already past the last instruction.
    Completed,
}

/// Executes instructions against a process record and, in Phase 2, the
/// virtual memory manager. Stateless apart from the tick length; one
/// interpreter serves every worker.
pub struct Interpreter {
    tick: Duration,
}

impl Interpreter {
    pub fn new(tick: Duration) -> Self {
        Self { tick }
    }

    /// Runs the instruction at the cursor. Successful instructions land in
    /// the execution log before the cursor advances; failed ones advance the
    /// cursor without a log entry. Only fatal memory errors surface as
    /// `Err`.
    pub fn step(
        &self,
        process: &mut Process,
        memory: Option<&VmManager>,
    ) -> Result<StepOutcome, MemoryError> {
        let Some(text) = process.current_instruction().map(str::to_string) else {
            return Ok(StepOutcome::Completed);
        };
        match self.run(&text, 0, process, memory) {
            Ok(()) => {
                process.log_execution(&text);
                process.advance_instruction();
                Ok(StepOutcome::Executed)
            }
            Err(ExecError::Memory(err)) if err.is_fatal() => Err(err),
            Err(err) => {
                warn!("process {}: {} -- {}", process.id(), text, err);
                process.push_output(format!("error: {} -- {}", text, err));
                process.advance_instruction();
                Ok(StepOutcome::Failed)
            }
        }
    }

    fn run(
        &self,
        text: &str,
        depth: usize,
        process: &mut Process,
        memory: Option<&VmManager>,
    ) -> Result<(), ExecError> {
        match parse(text, depth)? {
            Instruction::Print(arg) => {
                let line = match arg {
                    PrintArg::Literal(text) => text,
                    PrintArg::Concat(text, var) => {
                        let value = process.symbols_mut().ensure(&var);
                        format!("{}{}", text, value)
                    }
                };
                process.push_output(line);
            }
            Instruction::Declare { name, value } => {
                process.symbols_mut().set(&name, value);
            }
            Instruction::Add { target, lhs, rhs } => {
                let sum = resolve(process, &lhs) as u32 + resolve(process, &rhs) as u32;
                process
                    .symbols_mut()
                    .set(&target, sum.min(u16::MAX as u32) as u16);
            }
            Instruction::Subtract { target, lhs, rhs } => {
                let diff = resolve(process, &lhs).saturating_sub(resolve(process, &rhs));
                process.symbols_mut().set(&target, diff);
            }
            Instruction::Sleep { ticks } => {
                thread::sleep(self.tick * ticks);
            }
            Instruction::For { body, count } => {
                self.run_for(&body, count, depth, process, memory)?;
            }
            Instruction::Read { name, addr } => {
                let vm = memory.ok_or(ExecError::MemoryUnavailable)?;
                let value = vm.read(process.id(), addr)?;
                process.symbols_mut().set(&name, value);
            }
            Instruction::Write { addr, value } => {
                let vm = memory.ok_or(ExecError::MemoryUnavailable)?;
                let value = resolve(process, &value);
                vm.write(process.id(), addr, value)?;
            }
        }
        Ok(())
    }

    /// Runs a FOR body `count` times. A body instruction that fails is
    /// skipped like any failed instruction; a FOR nested past the depth cap
    /// aborts this loop but leaves the enclosing instruction intact.
    fn run_for(
        &self,
        body: &[String],
        count: u32,
        depth: usize,
        process: &mut Process,
        memory: Option<&VmManager>,
    ) -> Result<(), ExecError> {
        'iterations: for _ in 0..count {
            for item in body {
                match self.run(item, depth + 1, process, memory) {
                    Ok(()) => {}
                    Err(ExecError::Parse(ParseError::NestingTooDeep)) => {
                        warn!(
                            "process {}: {} -- aborting loop, FOR nested too deep",
                            process.id(),
                            item
                        );
                        process.push_output(format!("error: {} -- loop aborted", item));
                        break 'iterations;
                    }
                    Err(err) if err.is_fatal() => return Err(err),
                    Err(err) => {
                        warn!("process {}: {} -- {}", process.id(), item, err);
                        process.push_output(format!("error: {} -- {}", item, err));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Argument resolution: decimal literals already saturated at parse time;
/// variable references auto-declare to 0 when absent (subject to the
/// 32-entry cap).
fn resolve(process: &mut Process, operand: &Operand) -> u16 {
    match operand {
        Operand::Literal(value) => *value,
        Operand::Var(name) => process.symbols_mut().ensure(name),
    }
}
