use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Deepest FOR nesting the interpreter will enter.
pub const MAX_FOR_DEPTH: usize = 3;

/// A rejected instruction. Parse failures are recoverable: the instruction
/// has no effect and execution continues at the next one.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed instruction: {0}")]
    Malformed(String),

    #[error("unknown instruction: {0}")]
    UnknownKeyword(String),

    #[error("value out of range: {0}")]
    ValueOutOfRange(String),

    #[error("FOR nested deeper than {MAX_FOR_DEPTH} levels")]
    NestingTooDeep,
}

/// An argument that is either a literal or a variable reference. Literals
/// saturate to the u16 range at resolution time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operand {
    Literal(u16),
    Var(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PrintArg {
    /// `PRINT("text")`
    Literal(String),
    /// `PRINT("text" + var)` — literal followed by the variable's decimal value.
    Concat(String, String),
}

/// One parsed instruction. FOR bodies stay as raw text and are re-parsed per
/// iteration with an increased depth, which is where the nesting cap bites.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Instruction {
    Print(PrintArg),
    Declare { name: String, value: u16 },
    Add { target: String, lhs: Operand, rhs: Operand },
    Subtract { target: String, lhs: Operand, rhs: Operand },
    Sleep { ticks: u32 },
    For { body: Vec<String>, count: u32 },
    Read { name: String, addr: u32 },
    Write { addr: u32, value: Operand },
}

static PRINT_LITERAL: Lazy<Regex> = Lazy::new(|| Regex::new(r#"^"([^"]*)"$"#).unwrap());
static PRINT_CONCAT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^"([^"]*)"\s*\+\s*([A-Za-z_][A-Za-z0-9_]*)$"#).unwrap());
static DECLARE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^DECLARE\(\s*([A-Za-z_][A-Za-z0-9_]*)\s*,\s*(\d+)\s*\)$").unwrap()
});
static ARITH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(ADD|SUBTRACT)\(\s*([A-Za-z_][A-Za-z0-9_]*)\s*,\s*([A-Za-z0-9_]+)\s*,\s*([A-Za-z0-9_]+)\s*\)$",
    )
    .unwrap()
});
static SLEEP: Lazy<Regex> = Lazy::new(|| Regex::new(r"^SLEEP\(\s*(\d+)\s*\)$").unwrap());
static READ: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^READ\(\s*([A-Za-z_][A-Za-z0-9_]*)\s*,\s*(0x[0-9A-Fa-f]+|\d+)\s*\)$").unwrap()
});
static WRITE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^WRITE\(\s*(0x[0-9A-Fa-f]+|\d+)\s*,\s*([A-Za-z0-9_]+)\s*\)$").unwrap()
});

/// Parses one instruction at the given FOR depth (0 at the top level).
/// Keywords are case-sensitive.
pub fn parse(text: &str, depth: usize) -> Result<Instruction, ParseError> {
    let text = text.trim();
    if let Some(rest) = text.strip_prefix("PRINT(") {
        let inner = rest
            .strip_suffix(')')
            .ok_or_else(|| ParseError::Malformed(text.to_string()))?
            .trim();
        if let Some(caps) = PRINT_LITERAL.captures(inner) {
            return Ok(Instruction::Print(PrintArg::Literal(caps[1].to_string())));
        }
        if let Some(caps) = PRINT_CONCAT.captures(inner) {
            return Ok(Instruction::Print(PrintArg::Concat(
                caps[1].to_string(),
                caps[2].to_string(),
            )));
        }
        return Err(ParseError::Malformed(text.to_string()));
    }
    if text.starts_with("DECLARE(") {
        let caps = DECLARE
            .captures(text)
            .ok_or_else(|| ParseError::Malformed(text.to_string()))?;
        let value: u32 = caps[2]
            .parse()
            .map_err(|_| ParseError::ValueOutOfRange(caps[2].to_string()))?;
        if value > u16::MAX as u32 {
            return Err(ParseError::ValueOutOfRange(caps[2].to_string()));
        }
        return Ok(Instruction::Declare {
            name: caps[1].to_string(),
            value: value as u16,
        });
    }
    if text.starts_with("ADD(") || text.starts_with("SUBTRACT(") {
        let caps = ARITH
            .captures(text)
            .ok_or_else(|| ParseError::Malformed(text.to_string()))?;
        let target = caps[2].to_string();
        let lhs = parse_operand(&caps[3])?;
        let rhs = parse_operand(&caps[4])?;
        return Ok(match &caps[1] {
            "ADD" => Instruction::Add { target, lhs, rhs },
            _ => Instruction::Subtract { target, lhs, rhs },
        });
    }
    if text.starts_with("SLEEP(") {
        let caps = SLEEP
            .captures(text)
            .ok_or_else(|| ParseError::Malformed(text.to_string()))?;
        let ticks = caps[1]
            .parse()
            .map_err(|_| ParseError::ValueOutOfRange(caps[1].to_string()))?;
        return Ok(Instruction::Sleep { ticks });
    }
    if text.starts_with("FOR(") {
        if depth >= MAX_FOR_DEPTH {
            return Err(ParseError::NestingTooDeep);
        }
        return parse_for(text);
    }
    if text.starts_with("READ(") {
        let caps = READ
            .captures(text)
            .ok_or_else(|| ParseError::Malformed(text.to_string()))?;
        return Ok(Instruction::Read {
            name: caps[1].to_string(),
            addr: parse_address(&caps[2])?,
        });
    }
    if text.starts_with("WRITE(") {
        let caps = WRITE
            .captures(text)
            .ok_or_else(|| ParseError::Malformed(text.to_string()))?;
        return Ok(Instruction::Write {
            addr: parse_address(&caps[1])?,
            value: parse_operand(&caps[2])?,
        });
    }
    Err(ParseError::UnknownKeyword(text.to_string()))
}

/// `FOR(<inst>;<inst>;…, <count>)` — the body/count split happens at the
/// last comma outside any nested parentheses or quotes.
fn parse_for(text: &str) -> Result<Instruction, ParseError> {
    let inner = text
        .strip_prefix("FOR(")
        .and_then(|rest| rest.strip_suffix(')'))
        .ok_or_else(|| ParseError::Malformed(text.to_string()))?;
    let split = top_level_positions(inner, ',')
        .into_iter()
        .last()
        .ok_or_else(|| ParseError::Malformed(text.to_string()))?;
    let (body_text, count_text) = inner.split_at(split);
    let count_text = count_text[1..].trim();
    let count: u32 = count_text
        .parse()
        .map_err(|_| ParseError::Malformed(text.to_string()))?;

    let body: Vec<String> = split_top_level(body_text, ';')
        .into_iter()
        .map(|part| part.trim().to_string())
        .filter(|part| !part.is_empty())
        .collect();
    if body.is_empty() {
        return Err(ParseError::Malformed(text.to_string()));
    }
    Ok(Instruction::For { body, count })
}

fn parse_operand(text: &str) -> Result<Operand, ParseError> {
    if text.chars().all(|c| c.is_ascii_digit()) {
        let value: u64 = text
            .parse()
            .map_err(|_| ParseError::ValueOutOfRange(text.to_string()))?;
        return Ok(Operand::Literal(value.min(u16::MAX as u64) as u16));
    }
    if text
        .chars()
        .next()
        .map_or(false, |c| c.is_ascii_alphabetic() || c == '_')
    {
        return Ok(Operand::Var(text.to_string()));
    }
    Err(ParseError::Malformed(text.to_string()))
}

fn parse_address(text: &str) -> Result<u32, ParseError> {
    let parsed = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else {
        text.parse()
    };
    parsed.map_err(|_| ParseError::ValueOutOfRange(text.to_string()))
}

/// Positions of `sep` outside parentheses and double quotes.
fn top_level_positions(text: &str, sep: char) -> Vec<usize> {
    let mut positions = Vec::new();
    let mut paren_depth = 0usize;
    let mut in_quotes = false;
    for (i, c) in text.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            '(' if !in_quotes => paren_depth += 1,
            ')' if !in_quotes => paren_depth = paren_depth.saturating_sub(1),
            c if c == sep && !in_quotes && paren_depth == 0 => positions.push(i),
            _ => {}
        }
    }
    positions
}

/// Splits on `sep` occurrences outside parentheses and quotes, so nested
/// FOR bodies survive intact.
fn split_top_level(text: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    for pos in top_level_positions(text, sep) {
        parts.push(&text[start..pos]);
        start = pos + 1;
    }
    parts.push(&text[start..]);
    parts
}
