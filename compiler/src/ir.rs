// ir.rs — Section-tagged instruction IR
//
// Block generators append `IrNode`s (or raw text) to five ordered section
// lists. The only transformation applied at this granularity is
// accumulator-tracking load elision; everything else happens on text.
//
// Preconditions: operand strings are already substituted (no placeholders).
// Postconditions: `elide_redundant_loads` only removes `ldax` nodes whose
//                 register is provably resident in the accumulator, or that
//                 directly follow a clearing write of the same register (the
//                 write then keeps the value with coefficient 1.0).
// Failure modes: none.
// Side effects: none.

use std::fmt;

// ── Sections ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Section {
    Header,
    Init,
    Input,
    Main,
    Output,
}

impl Section {
    /// The four code sections, in execution order.
    pub const CODE: [Section; 4] = [Section::Init, Section::Input, Section::Main, Section::Output];

    pub fn parse(name: &str) -> Option<Section> {
        match name {
            "header" => Some(Section::Header),
            "init" => Some(Section::Init),
            "input" => Some(Section::Input),
            "main" => Some(Section::Main),
            "output" => Some(Section::Output),
            _ => None,
        }
    }

    /// Heading used between section rules in the formatted program.
    pub fn title(self) -> &'static str {
        match self {
            Section::Header => "Declarations",
            Section::Init => "Initialization",
            Section::Input => "Input Section",
            Section::Main => "Main Program",
            Section::Output => "Output Section",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Section::Header => "header",
            Section::Init => "init",
            Section::Input => "input",
            Section::Main => "main",
            Section::Output => "output",
        };
        f.write_str(name)
    }
}

// ── Nodes ───────────────────────────────────────────────────────────────────

/// One instruction (or, with an empty `op`, one comment line).
#[derive(Debug, Clone, PartialEq)]
pub struct IrNode {
    pub op: String,
    pub operands: Vec<String>,
    pub section: Section,
    pub comment: Option<String>,
}

impl IrNode {
    pub fn new(section: Section, op: impl Into<String>, operands: Vec<String>) -> Self {
        IrNode {
            op: op.into(),
            operands,
            section,
            comment: None,
        }
    }

    /// A comment-only line.
    pub fn comment(section: Section, text: impl Into<String>) -> Self {
        IrNode {
            op: String::new(),
            operands: Vec::new(),
            section,
            comment: Some(text.into()),
        }
    }

    pub fn with_comment(mut self, text: impl Into<String>) -> Self {
        self.comment = Some(text.into());
        self
    }

    pub fn is_instruction(&self) -> bool {
        !self.op.is_empty()
    }

    fn operand(&self, i: usize) -> Option<&str> {
        self.operands.get(i).map(String::as_str)
    }

    fn coefficient(&self, i: usize) -> Option<f64> {
        self.operand(i).and_then(parse_number)
    }
}

impl fmt::Display for IrNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_instruction() {
            return match &self.comment {
                Some(text) => write!(f, "; {text}"),
                None => Ok(()),
            };
        }
        let code = if self.operands.is_empty() {
            self.op.clone()
        } else {
            format!("{:<5} {}", self.op, self.operands.join(", "))
        };
        match &self.comment {
            Some(text) => write!(f, "{code:<32}; {text}"),
            None => f.write_str(&code),
        }
    }
}

/// An entry in a section list.
#[derive(Debug, Clone, PartialEq)]
pub enum Line {
    Node(IrNode),
    /// Pre-formatted text emitted verbatim (labels, hand-written snippets).
    Raw(String),
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Line::Node(node) => node.fmt(f),
            Line::Raw(text) => f.write_str(text),
        }
    }
}

/// Header list plus the four append-only code sections.
#[derive(Debug, Clone, Default)]
pub struct SectionLists {
    header: Vec<Line>,
    init: Vec<Line>,
    input: Vec<Line>,
    main: Vec<Line>,
    output: Vec<Line>,
}

impl SectionLists {
    pub fn push(&mut self, section: Section, line: Line) {
        self.get_mut(section).push(line);
    }

    pub fn get(&self, section: Section) -> &[Line] {
        match section {
            Section::Header => &self.header,
            Section::Init => &self.init,
            Section::Input => &self.input,
            Section::Main => &self.main,
            Section::Output => &self.output,
        }
    }

    fn get_mut(&mut self, section: Section) -> &mut Vec<Line> {
        match section {
            Section::Header => &mut self.header,
            Section::Init => &mut self.init,
            Section::Input => &mut self.input,
            Section::Main => &mut self.main,
            Section::Output => &mut self.output,
        }
    }

    /// Number of instruction nodes across the code sections.
    pub fn instruction_count(&self) -> usize {
        Section::CODE
            .iter()
            .flat_map(|&s| self.get(s))
            .filter(|l| matches!(l, Line::Node(n) if n.is_instruction()))
            .count()
    }
}

// ── Numbers ─────────────────────────────────────────────────────────────────

/// Largest coefficient representable in an S1.14 field.
pub const MAX_COEFFICIENT: f64 = 1.999_938_964_843_75;

/// Parse an operand as a number, accepting `1`, `1.0`, `-0.5`, `1e-3`.
pub fn parse_number(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Format a coefficient: integral values keep one decimal, others up to six.
pub fn format_number(value: f64) -> String {
    if value == 0.0 {
        return "0.0".to_string();
    }
    if value.fract() == 0.0 && value.abs() < 1e15 {
        return format!("{value:.1}");
    }
    let s = format!("{value:.6}");
    let s = s.trim_end_matches('0');
    if s.ends_with('.') {
        format!("{s}0")
    } else {
        s.to_string()
    }
}

// ── Accumulator tracking ────────────────────────────────────────────────────

/// What is known about the accumulator at a point in the program.
#[derive(Debug, Clone, PartialEq)]
enum Acc {
    Unknown,
    Zero,
    /// The accumulator equals every listed register.
    Holds(Vec<String>),
}

impl Acc {
    fn holds(&self, reg: &str) -> bool {
        matches!(self, Acc::Holds(regs) if regs.iter().any(|r| r == reg))
    }
}

/// Remove `ldax R` nodes whose register is already resident in the
/// accumulator, and fold `wrax R, 0.0` + `ldax R` into `wrax R, 1.0`.
/// Tracking restarts at every section: unknown at the start of init and
/// input, zero at the start of main (the optimizer guarantees a cleared
/// accumulator there), and carried into output from main, or from input
/// when main holds no instructions. Returns the number of nodes removed.
pub fn elide_redundant_loads(sections: &mut SectionLists) -> usize {
    let mut removed = elide_in(&mut sections.init, Acc::Unknown);
    let (input_removed, after_input) = elide_in_tracked(&mut sections.input, Acc::Unknown);
    removed += input_removed;
    let main_has_code = sections
        .main
        .iter()
        .any(|l| matches!(l, Line::Node(n) if n.is_instruction()));
    let (main_removed, after_main) = elide_in_tracked(&mut sections.main, Acc::Zero);
    removed += main_removed;
    let into_output = if main_has_code { after_main } else { after_input };
    removed += elide_in(&mut sections.output, into_output);
    removed
}

fn elide_in(lines: &mut Vec<Line>, start: Acc) -> usize {
    elide_in_tracked(lines, start).0
}

fn elide_in_tracked(lines: &mut Vec<Line>, start: Acc) -> (usize, Acc) {
    let mut acc = start;
    let mut removed = 0;
    // Last instruction, when it was `wrax R, 0.0`: (index, R).
    let mut cleared: Option<(usize, String)> = None;
    let mut i = 0;
    while i < lines.len() {
        let node = match &lines[i] {
            Line::Node(node) if node.is_instruction() => node,
            Line::Node(_) => {
                i += 1;
                continue;
            }
            Line::Raw(_) => {
                acc = Acc::Unknown;
                cleared = None;
                i += 1;
                continue;
            }
        };

        if node.op == "ldax" {
            let reg = node.operand(0).unwrap_or_default().to_string();
            if let Some((w, _)) = cleared.take().filter(|(_, r)| *r == reg) {
                if let Some(Line::Node(write)) = lines.get_mut(w) {
                    if let Some(coef) = write.operands.get_mut(1) {
                        *coef = "1.0".to_string();
                    }
                }
                lines.remove(i);
                removed += 1;
                acc = Acc::Holds(vec![reg]);
                continue;
            }
        }

        let (keep, next) = step(&acc, node);
        cleared = match (node.op.as_str(), node.operand(0)) {
            ("wrax", Some(reg)) if node.coefficient(1) == Some(0.0) => Some((i, reg.to_string())),
            _ => None,
        };
        acc = next;
        if keep {
            i += 1;
        } else {
            lines.remove(i);
            removed += 1;
        }
    }
    (removed, acc)
}

/// Transfer function: returns (keep node?, state after node).
fn step(acc: &Acc, node: &IrNode) -> (bool, Acc) {
    let reg = node.operand(0).unwrap_or_default().to_string();
    match node.op.as_str() {
        "clr" => (true, Acc::Zero),
        "and" if node.coefficient(0) == Some(0.0) => (true, Acc::Zero),
        "ldax" => {
            if acc.holds(&reg) {
                (false, acc.clone())
            } else {
                (true, Acc::Holds(vec![reg]))
            }
        }
        "rdax" if *acc == Acc::Zero && node.coefficient(1) == Some(1.0) => {
            (true, Acc::Holds(vec![reg]))
        }
        "wrax" => match node.coefficient(1) {
            Some(c) if c == 0.0 => (true, Acc::Zero),
            Some(c) if c == 1.0 => {
                let next = match acc {
                    Acc::Zero => Acc::Zero,
                    Acc::Holds(regs) => {
                        let mut regs = regs.clone();
                        if !regs.contains(&reg) {
                            regs.push(reg);
                        }
                        Acc::Holds(regs)
                    }
                    Acc::Unknown => Acc::Holds(vec![reg]),
                };
                (true, next)
            }
            _ => (true, Acc::Unknown),
        },
        "wra" => match node.coefficient(1) {
            Some(c) if c == 0.0 => (true, Acc::Zero),
            Some(c) if c == 1.0 => (true, acc.clone()),
            _ => (true, Acc::Unknown),
        },
        _ => (true, Acc::Unknown),
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
