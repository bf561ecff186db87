use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Synthesizes random instruction streams for factory processes.
///
/// The top-level draw is uniform over the full instruction set; inside a
/// FOR body only non-FOR, non-SLEEP instructions are selectable. READ and
/// WRITE appear only when a memory span is given (Phase 2), with addresses
/// kept inside that span. Variable names restart at `var0` per process.
pub struct InstructionGenerator {
    rng: StdRng,
    var_counter: u32,
}

impl InstructionGenerator {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
            var_counter: 0,
        }
    }

    /// Deterministic stream for tests.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            var_counter: 0,
        }
    }

    /// Generates `count` instructions for a process. `memory_span` is the
    /// process's virtual size in Phase 2, `None` in Phase 1.
    pub fn generate(
        &mut self,
        process_name: &str,
        count: usize,
        memory_span: Option<usize>,
    ) -> Vec<String> {
        self.var_counter = 0;
        (0..count)
            .map(|_| self.top_level(process_name, memory_span))
            .collect()
    }

    fn top_level(&mut self, name: &str, memory_span: Option<usize>) -> String {
        let choices = if memory_span.is_some() { 8 } else { 6 };
        match self.rng.gen_range(0..choices) {
            0 => self.print(name),
            1 => self.declare(),
            2 => self.arith("ADD"),
            3 => self.arith("SUBTRACT"),
            4 => self.sleep(),
            5 => self.for_loop(name, memory_span),
            6 => self.read(memory_span.unwrap()),
            _ => self.write(memory_span.unwrap()),
        }
    }

    fn nested(&mut self, name: &str, memory_span: Option<usize>) -> String {
        let choices = if memory_span.is_some() { 6 } else { 4 };
        match self.rng.gen_range(0..choices) {
            0 => self.print(name),
            1 => self.declare(),
            2 => self.arith("ADD"),
            3 => self.arith("SUBTRACT"),
            4 => self.read(memory_span.unwrap()),
            _ => self.write(memory_span.unwrap()),
        }
    }

    fn print(&mut self, name: &str) -> String {
        format!("PRINT(\"Hello world from {}!\")", name)
    }

    fn declare(&mut self) -> String {
        let var = self.next_var();
        let value: u16 = self.rng.gen();
        format!("DECLARE({}, {})", var, value)
    }

    fn arith(&mut self, op: &str) -> String {
        let target = self.next_var();
        let lhs = self.next_var();
        let rhs = if self.rng.gen_bool(0.5) {
            self.next_var()
        } else {
            self.rng.gen::<u16>().to_string()
        };
        format!("{}({}, {}, {})", op, target, lhs, rhs)
    }

    fn sleep(&mut self) -> String {
        format!("SLEEP({})", self.rng.gen_range(1..=10))
    }

    fn for_loop(&mut self, name: &str, memory_span: Option<usize>) -> String {
        let count = self.rng.gen_range(1..=5);
        let body_len = self.rng.gen_range(1..=3);
        let body: Vec<String> = (0..body_len)
            .map(|_| self.nested(name, memory_span))
            .collect();
        format!("FOR({}, {})", body.join(";"), count)
    }

    fn read(&mut self, span: usize) -> String {
        let var = self.next_var();
        format!("READ({}, {:#x})", var, self.address(span))
    }

    fn write(&mut self, span: usize) -> String {
        let value: u16 = self.rng.gen();
        format!("WRITE({:#x}, {})", self.address(span), value)
    }

    /// A 2-byte-aligned address whose u16 access stays inside the span.
    fn address(&mut self, span: usize) -> u32 {
        let slots = (span / 2).max(1);
        (self.rng.gen_range(0..slots) * 2) as u32
    }

    fn next_var(&mut self) -> String {
        let var = format!("var{}", self.var_counter);
        self.var_counter += 1;
        var
    }
}

impl Default for InstructionGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use interp::parser::{parse, Instruction};

    #[test]
    fn every_generated_instruction_parses() {
        let mut gen = InstructionGenerator::with_seed(7);
        for round in 0..20 {
            let span = if round % 2 == 0 { Some(256) } else { None };
            for text in gen.generate("p01", 50, span) {
                assert!(parse(&text, 0).is_ok(), "unparseable: {}", text);
            }
        }
    }

    #[test]
    fn phase_one_streams_never_touch_memory() {
        let mut gen = InstructionGenerator::with_seed(11);
        for text in gen.generate("p01", 300, None) {
            assert!(!text.starts_with("READ("), "phase 1 generated {}", text);
            assert!(!text.starts_with("WRITE("), "phase 1 generated {}", text);
            if let Ok(Instruction::For { body, .. }) = parse(&text, 0) {
                for inner in body {
                    assert!(!inner.contains("READ(") && !inner.contains("WRITE("));
                }
            }
        }
    }

    #[test]
    fn for_bodies_exclude_for_and_sleep() {
        let mut gen = InstructionGenerator::with_seed(13);
        let mut saw_for = false;
        for text in gen.generate("p01", 400, Some(128)) {
            if let Ok(Instruction::For { body, count }) = parse(&text, 0) {
                saw_for = true;
                assert!((1..=5).contains(&count));
                assert!((1..=3).contains(&body.len()));
                for inner in body {
                    assert!(!inner.starts_with("FOR("), "nested FOR generated");
                    assert!(!inner.starts_with("SLEEP("), "SLEEP inside FOR");
                }
            }
        }
        assert!(saw_for, "expected at least one FOR in 400 draws");
    }

    #[test]
    fn generated_addresses_fit_the_span() {
        let mut gen = InstructionGenerator::with_seed(17);
        for text in gen.generate("p01", 400, Some(128)) {
            match parse(&text, 0) {
                Ok(Instruction::Read { addr, .. }) | Ok(Instruction::Write { addr, .. }) => {
                    assert!(addr + 1 < 128, "address {:#x} outside span", addr);
                    assert_eq!(addr % 2, 0);
                }
                _ => {}
            }
        }
    }

    #[test]
    fn variable_names_restart_per_process() {
        let mut gen = InstructionGenerator::with_seed(19);
        let first = gen.generate("p01", 30, None).join("\n");
        let second = gen.generate("p02", 30, None).join("\n");
        assert!(first.contains("var0"));
        assert!(second.contains("var0"));
    }
}
