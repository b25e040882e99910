// encoder.rs — Instruction encoder oracle
//
// The compiler never trusts its own instruction count: the formatted text is
// handed to an `Encoder`, which returns machine words plus any problems it
// found. Only words differing from the no-op encoding count as real
// instructions. `OpcodeEncoder` is the built-in implementation; a host may
// plug in a bit-exact assembler through the same trait.
//
// Preconditions: none; any text is accepted.
// Postconditions: `words` holds one word per instruction line, padded with
//                 `NOP_WORD` up to the instruction limit.
// Failure modes: reported as `EncodeProblem`s, never as panics.
// Side effects: none.

use std::collections::HashMap;

use crate::config::TargetConfig;
use crate::ir::parse_number;

/// `skp 0, 0`.
pub const NOP_WORD: u32 = 0x0000_0011;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeProblem {
    /// 1-based line in the encoded text.
    pub line: usize,
    pub message: String,
    pub fatal: bool,
}

#[derive(Debug, Clone, Default)]
pub struct EncodeOutput {
    pub words: Vec<u32>,
    pub problems: Vec<EncodeProblem>,
}

impl EncodeOutput {
    pub fn real_instruction_count(&self) -> usize {
        self.words.iter().filter(|&&w| w != NOP_WORD).count()
    }

    pub fn has_fatal(&self) -> bool {
        self.problems.iter().any(|p| p.fatal)
    }
}

pub trait Encoder {
    fn encode(&self, text: &str, target: &TargetConfig) -> EncodeOutput;
}

// ── Fixed registers ─────────────────────────────────────────────────────────

fn fixed_register(name: &str) -> Option<u32> {
    let addr = match name {
        "sin0_rate" => 0x00,
        "sin0_range" => 0x01,
        "sin1_rate" => 0x02,
        "sin1_range" => 0x03,
        "rmp0_rate" => 0x04,
        "rmp0_range" => 0x05,
        "rmp1_rate" => 0x06,
        "rmp1_range" => 0x07,
        "pot0" => 0x10,
        "pot1" => 0x11,
        "pot2" => 0x12,
        "adcl" => 0x14,
        "adcr" => 0x15,
        "dacl" => 0x16,
        "dacr" => 0x17,
        "addr_ptr" => 0x18,
        _ => {
            let n: u32 = name.strip_prefix("reg")?.parse().ok()?;
            return (n < 32).then_some(0x20 + n);
        }
    };
    Some(addr)
}

fn skip_flag(name: &str) -> Option<u32> {
    match name {
        "run" => Some(0x10),
        "zrc" => Some(0x08),
        "zro" => Some(0x04),
        "gez" => Some(0x02),
        "neg" => Some(0x01),
        _ => None,
    }
}

fn cho_flag(name: &str) -> Option<u32> {
    match name {
        "sin" => Some(0x00),
        "cos" => Some(0x01),
        "reg" => Some(0x02),
        "compc" => Some(0x04),
        "compa" => Some(0x08),
        "rptr2" => Some(0x10),
        "na" => Some(0x20),
        _ => None,
    }
}

fn lfo_select(name: &str) -> Option<u32> {
    match name {
        "sin0" => Some(0),
        "sin1" => Some(1),
        "rmp0" => Some(2),
        "rmp1" => Some(3),
        _ => None,
    }
}

// ── Fixed-point fields ──────────────────────────────────────────────────────

/// Two's-complement fixed-point field of `bits` width with `frac` fraction
/// bits. Out-of-range values are clamped and reported.
fn fixed(value: f64, bits: u32, frac: u32) -> (u32, bool) {
    let scale = f64::from(1u32 << frac);
    let max = f64::from((1u32 << (bits - 1)) - 1);
    let min = -f64::from(1u32 << (bits - 1));
    let raw = (value * scale).round();
    let clamped = raw.clamp(min, max);
    let mask = (1u32 << bits) - 1;
    ((clamped as i64 as u32) & mask, clamped != raw)
}

// ── Built-in encoder ────────────────────────────────────────────────────────

/// Opcode-level encoder: resolves `equ`/`mem` symbols and labels, checks
/// mnemonics and operand counts, and packs opcode and operand fields.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpcodeEncoder;

impl Encoder for OpcodeEncoder {
    fn encode(&self, text: &str, target: &TargetConfig) -> EncodeOutput {
        let mut asm = Assembly::new(target);
        asm.collect_symbols(text);
        asm.encode_lines(text);
        log::debug!(
            "encode: {} word(s), {} symbol(s), {} problem(s)",
            asm.out.words.len(),
            asm.equs.len() + asm.mems.len() + asm.labels.len(),
            asm.out.problems.len()
        );
        let limit = target.instructions as usize;
        if asm.out.words.len() < limit {
            asm.out.words.resize(limit, NOP_WORD);
        }
        asm.out
    }
}

struct Memory {
    start: u32,
    size: u32,
}

struct Assembly<'t> {
    target: &'t TargetConfig,
    /// `equ` values, lower-cased names.
    equs: HashMap<String, f64>,
    mems: HashMap<String, Memory>,
    labels: HashMap<String, usize>,
    next_mem: u32,
    out: EncodeOutput,
}

/// Split a line into lower-cased mnemonic and operands, comments removed.
fn split(line: &str) -> Option<(String, Vec<String>)> {
    let code = match line.find(';') {
        Some(pos) => &line[..pos],
        None => line,
    }
    .trim();
    if code.is_empty() {
        return None;
    }
    let (op, rest) = match code.find(char::is_whitespace) {
        Some(pos) => (&code[..pos], code[pos..].trim()),
        None => (code, ""),
    };
    let operands = if rest.is_empty() {
        Vec::new()
    } else {
        rest.split(',').map(|s| s.trim().to_ascii_lowercase()).collect()
    };
    Some((op.to_ascii_lowercase(), operands))
}

impl<'t> Assembly<'t> {
    fn new(target: &'t TargetConfig) -> Self {
        Assembly {
            target,
            equs: HashMap::new(),
            mems: HashMap::new(),
            labels: HashMap::new(),
            next_mem: 0,
            out: EncodeOutput::default(),
        }
    }

    fn problem(&mut self, line: usize, message: impl Into<String>, fatal: bool) {
        self.out.problems.push(EncodeProblem {
            line,
            message: message.into(),
            fatal,
        });
    }

    // ── Pass 1: symbols and labels ──────────────────────────────────────

    fn collect_symbols(&mut self, text: &str) {
        let mut index = 0usize;
        for (n, line) in text.lines().enumerate() {
            let line_no = n + 1;
            let Some((op, _)) = split(line) else {
                continue;
            };
            if let Some(label) = op.strip_suffix(':') {
                self.labels.insert(label.to_string(), index);
                continue;
            }
            match op.as_str() {
                "equ" => self.define_equ(line_no, line),
                "mem" => self.define_mem(line_no, line),
                _ => index += 1,
            }
        }
    }

    /// `equ NAME VALUE` operands are whitespace-separated, not comma-separated.
    fn declaration(line: &str) -> Vec<String> {
        let code = match line.find(';') {
            Some(pos) => &line[..pos],
            None => line,
        };
        code.split_whitespace()
            .skip(1)
            .map(|s| s.trim_matches(',').to_ascii_lowercase())
            .collect()
    }

    fn define_equ(&mut self, line_no: usize, line: &str) {
        let parts = Self::declaration(line);
        if parts.len() != 2 {
            self.problem(line_no, "equ expects a name and a value", true);
            return;
        }
        match self.value(&parts[1]) {
            Ok(v) => {
                self.equs.insert(parts[0].clone(), v);
            }
            Err(message) => self.problem(line_no, message, true),
        }
    }

    fn define_mem(&mut self, line_no: usize, line: &str) {
        let parts = Self::declaration(line);
        let size = parts.get(1).and_then(|s| parse_number(s));
        let (Some(name), Some(size)) = (parts.first(), size) else {
            self.problem(line_no, "mem expects a name and a size", true);
            return;
        };
        if size < 1.0 || size.fract() != 0.0 || size > f64::from(u32::MAX) {
            self.problem(line_no, format!("mem {name}: size must be a positive integer"), true);
            return;
        }
        let size = size as u32;
        let end = self.next_mem.checked_add(size);
        if end.map_or(true, |end| end > self.target.memory) {
            self.problem(
                line_no,
                format!(
                    "mem {name}: {size} words exceeds delay memory ({} of {} used)",
                    self.next_mem, self.target.memory
                ),
                true,
            );
            return;
        }
        self.mems.insert(
            name.clone(),
            Memory {
                start: self.next_mem,
                size,
            },
        );
        self.next_mem += size;
    }

    // ── Operand values ──────────────────────────────────────────────────

    /// A numeric operand: literal, register name, `equ` symbol, or a memory
    /// address (`sym`, `sym#` end, `sym^` middle) with optional `+N`/`-N`.
    fn value(&self, text: &str) -> Result<f64, String> {
        if let Some(v) = parse_number(text) {
            return Ok(v);
        }
        if let Some(pos) = text.rfind(['+', '-']).filter(|&p| p > 0) {
            let base = self.value(text[..pos].trim())?;
            let offset = parse_number(&text[pos + 1..])
                .ok_or_else(|| format!("bad offset in '{text}'"))?;
            return Ok(if text.as_bytes()[pos] == b'+' {
                base + offset
            } else {
                base - offset
            });
        }
        if let Some(addr) = fixed_register(text) {
            return Ok(f64::from(addr));
        }
        if let Some(v) = self.equs.get(text) {
            return Ok(*v);
        }
        let (name, at) = if let Some(name) = text.strip_suffix('#') {
            (name, "end")
        } else if let Some(name) = text.strip_suffix('^') {
            (name, "middle")
        } else {
            (text, "start")
        };
        let m = self
            .mems
            .get(name)
            .ok_or_else(|| format!("unknown symbol '{text}'"))?;
        Ok(f64::from(match at {
            "end" => m.start + m.size - 1,
            "middle" => m.start + m.size / 2,
            _ => m.start,
        }))
    }

    fn register(&self, text: &str) -> Result<u32, String> {
        let v = self.value(text)?;
        if v.fract() != 0.0 || !(0.0..64.0).contains(&v) {
            return Err(format!("'{text}' is not a register"));
        }
        Ok(v as u32)
    }

    fn address(&self, text: &str) -> Result<u32, String> {
        let v = self.value(text)?;
        if v.fract() != 0.0 || v < 0.0 || v >= f64::from(self.target.memory) {
            return Err(format!("address '{text}' outside delay memory"));
        }
        Ok(v as u32)
    }

    fn flags(&self, text: &str, table: fn(&str) -> Option<u32>) -> Result<u32, String> {
        if let Some(v) = parse_number(text) {
            return Ok(v as u32);
        }
        text.split('|')
            .map(|f| table(f.trim()).ok_or_else(|| format!("unknown flag '{f}'")))
            .try_fold(0, |acc, f| f.map(|f| acc | f))
    }

    // ── Pass 2: encoding ────────────────────────────────────────────────

    fn encode_lines(&mut self, text: &str) {
        for (n, line) in text.lines().enumerate() {
            let line_no = n + 1;
            let Some((op, operands)) = split(line) else {
                continue;
            };
            if op.ends_with(':') || op == "equ" || op == "mem" {
                continue;
            }
            let index = self.out.words.len();
            let (word, clamped) = match self.encode_one(&op, &operands, index) {
                Ok(w) => w,
                Err(message) => {
                    self.problem(line_no, format!("{op}: {message}"), true);
                    (NOP_WORD, false)
                }
            };
            if clamped {
                self.problem(line_no, format!("{op}: operand out of range, clamped"), false);
            }
            self.out.words.push(word);
        }
    }

    fn arity(operands: &[String], expected: usize) -> Result<(), String> {
        if operands.len() != expected {
            return Err(format!(
                "expected {expected} operand(s), found {}",
                operands.len()
            ));
        }
        Ok(())
    }

    fn encode_one(&self, op: &str, operands: &[String], index: usize) -> Result<(u32, bool), String> {
        let coef = |text: &String, bits: u32, frac: u32| -> Result<(u32, bool), String> {
            let v = self.value(text)?;
            Ok(fixed(v, bits, frac))
        };
        match op {
            "rdax" | "wrax" | "maxx" | "rdfx" | "wrhx" | "wrlx" => {
                Self::arity(operands, 2)?;
                let opcode = match op {
                    "rdax" => 0x04,
                    "rdfx" => 0x05,
                    "wrax" => 0x06,
                    "wrhx" => 0x07,
                    "wrlx" => 0x08,
                    _ => 0x09,
                };
                let reg = self.register(&operands[0])?;
                let (c, clamped) = coef(&operands[1], 16, 14)?;
                Ok((c << 16 | reg << 5 | opcode, clamped))
            }
            "ldax" => {
                Self::arity(operands, 1)?;
                Ok((self.register(&operands[0])? << 5 | 0x05, false))
            }
            "mulx" => {
                Self::arity(operands, 1)?;
                Ok((self.register(&operands[0])? << 5 | 0x0A, false))
            }
            "rda" | "rmpa" | "wra" | "wrap" => {
                let (opcode, n) = match op {
                    "rda" => (0x00, 2),
                    "rmpa" => (0x01, 1),
                    "wra" => (0x02, 2),
                    _ => (0x03, 2),
                };
                Self::arity(operands, n)?;
                let addr = if n == 2 {
                    self.address(&operands[0])?
                } else {
                    0
                };
                let (c, clamped) = coef(&operands[n - 1], 11, 9)?;
                Ok((c << 21 | addr << 5 | opcode, clamped))
            }
            "sof" | "log" | "exp" => {
                Self::arity(operands, 2)?;
                let opcode = match op {
                    "log" => 0x0B,
                    "exp" => 0x0C,
                    _ => 0x0D,
                };
                let (c, c_clamped) = coef(&operands[0], 16, 14)?;
                let (d, d_clamped) = coef(&operands[1], 11, 10)?;
                Ok((c << 16 | d << 5 | opcode, c_clamped || d_clamped))
            }
            "and" | "or" | "xor" => {
                Self::arity(operands, 1)?;
                let opcode = match op {
                    "and" => 0x0E,
                    "or" => 0x0F,
                    _ => 0x10,
                };
                let mask = self.value(&operands[0])? as i64 as u32 & 0x00FF_FFFF;
                Ok((mask << 8 | opcode, false))
            }
            "clr" => {
                Self::arity(operands, 0)?;
                Ok((0x0E, false))
            }
            "not" => {
                Self::arity(operands, 0)?;
                Ok((0x00FF_FFFF << 8 | 0x10, false))
            }
            "absa" => {
                Self::arity(operands, 0)?;
                Ok((0x09, false))
            }
            "nop" => {
                Self::arity(operands, 0)?;
                Ok((NOP_WORD, false))
            }
            "skp" => {
                Self::arity(operands, 2)?;
                let flags = self.flags(&operands[0], skip_flag)?;
                let count = match self.labels.get(&operands[1]) {
                    Some(&target) if target > index => (target - index - 1) as u32,
                    Some(_) => return Err(format!("label '{}' is not ahead", operands[1])),
                    None => self.value(&operands[1])? as u32,
                };
                if count > 63 {
                    return Err(format!("skip distance {count} exceeds 63"));
                }
                Ok(((flags & 0x1F) << 27 | count << 21 | 0x11, false))
            }
            "wlds" => {
                Self::arity(operands, 3)?;
                let lfo = lfo_select(&operands[0])
                    .filter(|&l| l < 2)
                    .ok_or_else(|| format!("'{}' is not a sine LFO", operands[0]))?;
                let freq = self.value(&operands[1])?;
                let amp = self.value(&operands[2])?;
                let clamped = !(0.0..=511.0).contains(&freq) || !(0.0..=32767.0).contains(&amp);
                let freq = freq.clamp(0.0, 511.0) as u32;
                let amp = amp.clamp(0.0, 32767.0) as u32;
                Ok((lfo << 29 | freq << 20 | amp << 5 | 0x12, clamped))
            }
            "wldr" => {
                Self::arity(operands, 3)?;
                let lfo = match lfo_select(&operands[0]) {
                    Some(l @ 2..=3) => l - 2,
                    _ => return Err(format!("'{}' is not a ramp LFO", operands[0])),
                };
                let freq = self.value(&operands[1])? as i64 as u32 & 0xFFFF;
                let amp = match self.value(&operands[2])? as u32 {
                    4096 => 0,
                    2048 => 1,
                    1024 => 2,
                    512 => 3,
                    other => return Err(format!("ramp amplitude {other} not one of 512/1024/2048/4096")),
                };
                Ok((1 << 30 | lfo << 29 | freq << 13 | amp << 5 | 0x12, false))
            }
            "jam" => {
                Self::arity(operands, 1)?;
                let lfo = match lfo_select(&operands[0]) {
                    Some(l @ 2..=3) => l - 2,
                    _ => return Err(format!("'{}' is not a ramp LFO", operands[0])),
                };
                Ok((lfo << 6 | 0x13, false))
            }
            "cho" => self.encode_cho(operands),
            _ => Err("unknown mnemonic".to_string()),
        }
    }

    fn encode_cho(&self, operands: &[String]) -> Result<(u32, bool), String> {
        let mode = operands.first().map(String::as_str).unwrap_or_default();
        let lfo_of = |i: usize| -> Result<u32, String> {
            let name = operands.get(i).map(String::as_str).unwrap_or_default();
            lfo_select(name).ok_or_else(|| format!("'{name}' is not an LFO"))
        };
        match mode {
            "rda" => {
                Self::arity(operands, 4)?;
                let lfo = lfo_of(1)?;
                let flags = self.flags(&operands[2], cho_flag)?;
                let addr = self.address(&operands[3])?;
                Ok((flags << 24 | lfo << 21 | addr << 5 | 0x14, false))
            }
            "sof" => {
                Self::arity(operands, 4)?;
                let lfo = lfo_of(1)?;
                let flags = self.flags(&operands[2], cho_flag)?;
                let (d, clamped) = fixed(self.value(&operands[3])?, 16, 15);
                Ok((0b10 << 30 | flags << 24 | lfo << 21 | d << 5 | 0x14, clamped))
            }
            "rdal" => {
                if operands.len() != 2 && operands.len() != 3 {
                    return Err("cho rdal expects an LFO and optional flags".to_string());
                }
                let lfo = lfo_of(1)?;
                let flags = match operands.get(2) {
                    Some(f) => self.flags(f, cho_flag)?,
                    None => 0,
                };
                Ok((0b11 << 30 | flags << 24 | lfo << 21 | 0x14, false))
            }
            _ => Err(format!("unknown cho mode '{mode}'")),
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(text: &str) -> EncodeOutput {
        OpcodeEncoder.encode(text, &TargetConfig::default())
    }

    #[test]
    fn pads_to_instruction_limit() {
        let out = encode("rdax  ADCL, 1.0\nwrax  DACL, 0.0\n");
        assert_eq!(out.words.len(), 128);
        assert_eq!(out.real_instruction_count(), 2);
        assert!(out.problems.is_empty(), "{:?}", out.problems);
    }

    #[test]
    fn comments_labels_and_declarations_are_not_instructions() {
        let text = "\
; banner
equ a_out REG0
mem d_line 100
skp   run, init_done
wlds  SIN0, 40, 32767
init_done:
rdax  a_out, 1.0       ; trailing
rda   d_line#, 0.5
wra   d_line, 0.0
";
        let out = encode(text);
        assert!(out.problems.is_empty(), "{:?}", out.problems);
        assert_eq!(out.real_instruction_count(), 5);
    }

    #[test]
    fn register_and_coefficient_fields() {
        let out = encode("rdax  ADCL, 1.0\n");
        let w = out.words[0];
        assert_eq!(w & 0x1F, 0x04);
        assert_eq!((w >> 5) & 0x3F, 0x14);
        assert_eq!(w >> 16, 0x4000);
    }

    #[test]
    fn skip_counts_to_label() {
        let out = encode("skp   run, done\nclr\nclr\ndone:\nclr\n");
        assert!(out.problems.is_empty());
        assert_eq!((out.words[0] >> 21) & 0x3F, 2);
        assert_eq!(out.words[0] >> 27, 0x10);
    }

    #[test]
    fn explicit_nop_is_not_real() {
        let out = encode("nop\nclr\n");
        assert_eq!(out.real_instruction_count(), 1);
    }

    #[test]
    fn unknown_mnemonic_is_fatal() {
        let out = encode("rdax  ADCL, 1.0\nfrob  x\n");
        assert!(out.has_fatal());
        assert_eq!(out.problems[0].line, 2);
        assert!(out.problems[0].message.contains("frob"));
    }

    #[test]
    fn operand_count_and_symbols_checked() {
        assert!(encode("rdax  ADCL\n").has_fatal());
        assert!(encode("rdax  nowhere, 1.0\n").has_fatal());
        assert!(encode("cho   rda, SIN0, SIN|REG|COMPC, 5\n").problems.is_empty());
    }

    #[test]
    fn oversized_coefficient_is_clamped_not_fatal() {
        let out = encode("rdax  ADCL, 3.0\n");
        assert!(!out.has_fatal());
        assert_eq!(out.problems.len(), 1);
    }

    #[test]
    fn memory_offsets_resolve() {
        let out = encode("mem a 10\nmem b 20\nwra   b+3, 0.0\n");
        assert!(out.problems.is_empty(), "{:?}", out.problems);
        assert_eq!((out.words[0] >> 5) & 0xFFFF, 13);
    }

    #[test]
    fn memory_overflow_is_fatal() {
        assert!(encode("mem a 40000\n").has_fatal());
        let out = encode("mem a 10\nmem b 4294967295\nmem c 1e12\n");
        let fatal: Vec<usize> = out.problems.iter().filter(|p| p.fatal).map(|p| p.line).collect();
        assert_eq!(fatal, vec![2, 3]);
    }

    #[test]
    fn long_programs_are_not_truncated() {
        let text = "clr\n".repeat(130);
        let out = encode(&text);
        assert_eq!(out.words.len(), 130);
        assert_eq!(out.real_instruction_count(), 130);
    }
}
