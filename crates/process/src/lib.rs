//! Process records: identity, instruction stream, execution cursor, symbol
//! table, and the per-process logs the console surfaces.

use std::sync::{Arc, Mutex};

use chrono::Local;
use types::ProcessId;

pub mod symbol;
pub use symbol::SymbolTable;

/// A process is shared by the registry, the ready queue (at most one slot)
/// and the worker currently interpreting it. During a slice exactly one
/// worker holds it, so the mutex is uncontended on the hot path.
pub type ProcessHandle = Arc<Mutex<Process>>;

/// Phase 1 contiguous allocation record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockSpan {
    pub start: usize,
    pub end: usize,
}

/// One synthetic user process.
///
/// Invariants: `cursor <= instructions.len()`; `live` exactly while the
/// cursor has not reached the end; the symbol table never exceeds 32
/// entries; `core >= 0` only while a worker is interpreting the process.
pub struct Process {
    id: ProcessId,
    name: String,
    created: String,
    instructions: Vec<String>,
    cursor: usize,
    live: bool,
    core: i32,
    symbols: SymbolTable,
    /// Instruction strings actually executed, in execution order.
    execution_log: Vec<String>,
    /// PRINT renderings and instruction-failure notes, in order.
    output: Vec<String>,
    /// Phase 1 block span while memory is held.
    block_span: Option<BlockSpan>,
    /// Phase 2 virtual size in bytes; the base virtual address is always 0.
    virtual_size: usize,
}

impl Process {
    pub fn new(id: ProcessId, name: impl Into<String>, instructions: Vec<String>) -> Self {
        let live = !instructions.is_empty();
        Self {
            id,
            name: name.into(),
            created: Local::now().format("%m/%d/%Y, %I:%M:%S %p").to_string(),
            instructions,
            cursor: 0,
            live,
            core: -1,
            symbols: SymbolTable::new(),
            execution_log: Vec::new(),
            output: Vec::new(),
            block_span: None,
            virtual_size: 0,
        }
    }

    /// Wraps a process for sharing between registry, queue and worker.
    pub fn into_handle(self) -> ProcessHandle {
        Arc::new(Mutex::new(self))
    }

    pub fn id(&self) -> ProcessId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn created(&self) -> &str {
        &self.created
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    /// 0-based index of the next instruction to execute.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn total_instructions(&self) -> usize {
        self.instructions.len()
    }

    /// The instruction at the cursor, or `None` at the end of the stream.
    pub fn current_instruction(&self) -> Option<&str> {
        self.instructions.get(self.cursor).map(|s| s.as_str())
    }

    /// Moves the cursor past the current instruction. When it passes the
    /// end, the process stops being live.
    pub fn advance_instruction(&mut self) {
        if self.cursor < self.instructions.len() {
            self.cursor += 1;
        }
        if self.cursor >= self.instructions.len() {
            self.live = false;
        }
    }

    /// Records an instruction as executed. Called before the cursor
    /// advances; a FOR records its original text once, not its expansion.
    pub fn log_execution(&mut self, instruction: &str) {
        self.execution_log.push(instruction.to_string());
    }

    pub fn execution_log(&self) -> &[String] {
        &self.execution_log
    }

    /// Appends one line to the per-process output (PRINT results and
    /// instruction-failure notes).
    pub fn push_output(&mut self, line: String) {
        self.output.push(line);
    }

    pub fn output(&self) -> &[String] {
        &self.output
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn symbols_mut(&mut self) -> &mut SymbolTable {
        &mut self.symbols
    }

    pub fn assigned_core(&self) -> i32 {
        self.core
    }

    pub fn set_assigned_core(&mut self, core: i32) {
        self.core = core;
    }

    pub fn block_span(&self) -> Option<BlockSpan> {
        self.block_span
    }

    pub fn set_block_span(&mut self, span: Option<BlockSpan>) {
        self.block_span = span;
    }

    pub fn virtual_size(&self) -> usize {
        self.virtual_size
    }

    pub fn set_virtual_size(&mut self, size: usize) {
        self.virtual_size = size;
    }

    pub fn has_memory(&self) -> bool {
        self.block_span.is_some() || self.virtual_size > 0
    }
}
