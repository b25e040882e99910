// optimize.rs — Textual peephole passes over the formatted program
//
// Two passes, in order:
//   1. accumulator-clear enforcement at the input/main boundary: main code
//      assumes it starts from a zero accumulator;
//   2. accumulator forwarding: `wrax R, 0.0` immediately followed (blank
//      and comment lines aside) by `rdax R, 1.0` or `ldax R` becomes a single
//      `wrax R, 1.0`, the originals kept as `; [fwd]` comments.
//
// Preconditions: `text` was produced by `emit::assemble`.
// Postconditions: the program computes the same values; instruction count
//                 never grows by more than one.
// Failure modes: none.
// Side effects: none.

use crate::diag::codes;
use crate::diag::Diagnostic;
use crate::emit;
use crate::ir::{parse_number, Section};

/// Prefix marking a line disabled by the forwarding pass.
pub const FORWARD_MARK: &str = "; [fwd]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearAction {
    /// No main code, or the input section already ends in a clearing write.
    None,
    /// The final input write had its coefficient rewritten to zero.
    Rewritten,
    /// A `clr` was inserted at the top of the main section.
    Inserted,
}

#[derive(Debug)]
pub struct OptimizeResult {
    pub text: String,
    pub clear: ClearAction,
    pub forwarded: usize,
    pub diagnostics: Vec<Diagnostic>,
}

pub fn optimize(text: &str) -> OptimizeResult {
    let mut lines: Vec<String> = text.lines().map(str::to_string).collect();
    let clear = enforce_clear(&mut lines);
    let forwarded = forward_accumulator(&mut lines);
    log::debug!("optimize: clear {:?}, {} forwarded pair(s)", clear, forwarded);

    let mut diagnostics = Vec::new();
    if forwarded > 0 {
        diagnostics.push(Diagnostic::warning(
            codes::W0500,
            format!("accumulator forwarding collapsed {forwarded} write/read pair(s)"),
        ));
    }
    let mut text = lines.join("\n");
    text.push('\n');
    OptimizeResult {
        text,
        clear,
        forwarded,
        diagnostics,
    }
}

// ── Line model ──────────────────────────────────────────────────────────────

/// A real instruction: mnemonic plus comma-separated operands.
#[derive(Debug, PartialEq)]
struct Instr<'a> {
    op: String,
    operands: Vec<&'a str>,
}

impl Instr<'_> {
    fn coefficient(&self, i: usize) -> Option<f64> {
        self.operands.get(i).and_then(|s| parse_number(s))
    }

    fn register(&self) -> Option<&str> {
        self.operands.first().copied()
    }
}

/// Code part of a line, without any trailing `; comment`.
fn code_of(line: &str) -> &str {
    match line.find(';') {
        Some(pos) => line[..pos].trim(),
        None => line.trim(),
    }
}

fn is_label(line: &str) -> bool {
    code_of(line).ends_with(':')
}

/// Parse a line as an executable instruction. Comments, blanks, labels and
/// `equ`/`mem` declarations yield `None`.
fn instruction(line: &str) -> Option<Instr<'_>> {
    let code = code_of(line);
    if code.is_empty() || code.ends_with(':') {
        return None;
    }
    let (op, rest) = match code.find(char::is_whitespace) {
        Some(pos) => (&code[..pos], code[pos..].trim()),
        None => (code, ""),
    };
    let op = op.to_ascii_lowercase();
    if op == "equ" || op == "mem" {
        return None;
    }
    let operands = if rest.is_empty() {
        Vec::new()
    } else {
        rest.split(',').map(str::trim).collect()
    };
    Some(Instr { op, operands })
}

fn format_instr(op: &str, operands: &[&str]) -> String {
    format!("{:<5} {}", op, operands.join(", "))
}

/// Index of the first line of `section`'s body (after its closing rule).
fn section_body(lines: &[String], section: Section) -> Option<usize> {
    let title = emit::heading(section);
    let rule = emit::section_rule();
    lines
        .iter()
        .enumerate()
        .position(|(i, l)| *l == title && i > 0 && lines[i - 1] == rule)
        .map(|i| i + 2)
}

// ── Pass 1: accumulator clear ───────────────────────────────────────────────

pub fn enforce_clear(lines: &mut Vec<String>) -> ClearAction {
    let Some(main_body) = section_body(lines, Section::Main) else {
        return ClearAction::None;
    };
    // The main rule/title/rule triple starts three lines before its body.
    let main_start = main_body - 3;
    let main_end = section_body(lines, Section::Output).map_or(lines.len(), |b| b - 3);
    if !(main_body..main_end).any(|i| instruction(&lines[i]).is_some()) {
        return ClearAction::None;
    }

    if let Some(input_body) = section_body(lines, Section::Input) {
        let last = (input_body..main_start)
            .rev()
            .find(|&i| instruction(&lines[i]).is_some());
        if let Some(i) = last {
            let rewritten = instruction(&lines[i]).and_then(|ins| {
                let clears = matches!(ins.op.as_str(), "wrax" | "wra") && ins.operands.len() == 2;
                if !clears {
                    return None;
                }
                match ins.coefficient(1) {
                    Some(c) if c == 0.0 => Some(None),
                    _ => Some(Some(format_instr(&ins.op, &[ins.operands[0], "0.0"]))),
                }
            });
            match rewritten {
                Some(None) => return ClearAction::None,
                Some(Some(text)) => {
                    lines[i] = text;
                    return ClearAction::Rewritten;
                }
                None => {}
            }
        }
    }
    lines.insert(main_body, "clr".to_string());
    ClearAction::Inserted
}

// ── Pass 2: accumulator forwarding ──────────────────────────────────────────

pub fn forward_accumulator(lines: &mut Vec<String>) -> usize {
    let mut collapsed = 0;
    let mut i = 0;
    while i < lines.len() {
        let Some(write) = instruction(&lines[i]) else {
            i += 1;
            continue;
        };
        let is_clearing_write =
            write.op == "wrax" && write.operands.len() == 2 && write.coefficient(1) == Some(0.0);
        if !is_clearing_write {
            i += 1;
            continue;
        }
        let Some(reg) = write.register().map(str::to_string) else {
            i += 1;
            continue;
        };

        // Next executable line; a label ends the window.
        let mut j = i + 1;
        while j < lines.len() && instruction(&lines[j]).is_none() && !is_label(&lines[j]) {
            j += 1;
        }
        let reads_back = lines.get(j).and_then(|l| instruction(l)).is_some_and(|read| {
            let unit_read = match read.op.as_str() {
                "rdax" => read.operands.len() == 2 && read.coefficient(1) == Some(1.0),
                "ldax" => read.operands.len() == 1,
                _ => false,
            };
            unit_read && read.register() == Some(reg.as_str())
        });
        if !reads_back {
            i += 1;
            continue;
        }

        let original_write = lines[i].trim_end().to_string();
        let original_read = lines[j].trim_end().to_string();
        lines[j] = format!("{FORWARD_MARK} {original_read}");
        lines[i] = format!("{FORWARD_MARK} {original_write}");
        lines.insert(i + 1, format_instr("wrax", &[&reg, "1.0"]));
        log::trace!("forwarded accumulator through {reg}");
        collapsed += 1;
        i = j + 2;
    }
    collapsed
}

// ── Tests ───────────────────────────────────────────────────────────────────
