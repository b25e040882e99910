// template/mod.rs — Declarative block templates
//
// A template is parsed once, when its block type is registered, into a list
// of statements: section switches, conditionals, local bindings, resource
// declarations, macro calls and code lines with `${table.key}` holes. Each
// block instance then interprets the statements in one pass with an explicit
// condition stack, substituting holes from the instance's tables and routing
// the resulting IR nodes into the active section.
//
// Preconditions: none.
// Postconditions: a parsed `Template` has balanced `@if`/`@else`/`@endif`.
// Failure modes: malformed source → `TemplateError::Syntax`/`Unterminated`
//                at parse time; failed lookups or evaluation →
//                `TemplateError::Eval` at generation time.
// Side effects: generation appends to the block context only.

pub mod expr;
pub mod lexer;
pub mod macros;

use std::collections::HashMap;

use thiserror::Error;

use crate::alloc::BlockContext;
use crate::ir::{format_number, IrNode, Section};
use crate::registry::{BlockDescriptor, BlockKind, GenerateError};

use self::expr::{Expr, Scope};
use self::macros::{Macro, MacroError};

// ── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TemplateError {
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },
    #[error("line {line}: {message}")]
    Eval { line: usize, message: String },
    #[error("line {0}: @if without matching @endif")]
    Unterminated(usize),
}

fn syntax(line: usize, message: impl Into<String>) -> TemplateError {
    TemplateError::Syntax {
        line,
        message: message.into(),
    }
}

// ── Parsed form ─────────────────────────────────────────────────────────────

/// Lookup table a placeholder draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Param,
    Display,
    Input,
    Output,
    Reg,
    Mem,
    Local,
}

impl Table {
    fn parse(name: &str) -> Option<Table> {
        match name {
            "param" => Some(Table::Param),
            "display" => Some(Table::Display),
            "input" => Some(Table::Input),
            "output" => Some(Table::Output),
            "reg" => Some(Table::Reg),
            "mem" => Some(Table::Mem),
            "local" => Some(Table::Local),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Lit(String),
    Hole(Table, String),
}

/// Text with placeholders, split at parse time.
#[derive(Debug, Clone, PartialEq)]
struct Text(Vec<Segment>);

impl Text {
    fn parse(line: usize, src: &str) -> Result<Text, TemplateError> {
        let mut segments = Vec::new();
        let mut rest = src;
        while let Some(start) = rest.find("${") {
            if start > 0 {
                segments.push(Segment::Lit(rest[..start].to_string()));
            }
            let after = &rest[start + 2..];
            let end = after
                .find('}')
                .ok_or_else(|| syntax(line, "unterminated placeholder"))?;
            let inner = &after[..end];
            let (table, key) = inner
                .split_once('.')
                .ok_or_else(|| syntax(line, format!("placeholder '{inner}' needs table.key")))?;
            let table = Table::parse(table.trim())
                .ok_or_else(|| syntax(line, format!("unknown placeholder table '{table}'")))?;
            segments.push(Segment::Hole(table, key.trim().to_string()));
            rest = &after[end + 1..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Lit(rest.to_string()));
        }
        Ok(Text(segments))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Stmt {
    Section(Section),
    If(Expr),
    Else,
    EndIf,
    Let(String, Expr),
    Reg(String),
    Tmp(String),
    Mem(String, Expr),
    Macro(Macro, Vec<Text>),
    Comment(String),
    Code { text: Text, comment: Option<String> },
}

/// A parsed template.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    stmts: Vec<(usize, Stmt)>,
    registers: Vec<String>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Template, TemplateError> {
        let mut stmts = Vec::new();
        let mut registers = Vec::new();
        // Open @if lines, with whether @else was already seen.
        let mut open: Vec<(usize, bool)> = Vec::new();

        for (i, raw) in source.lines().enumerate() {
            let line = i + 1;
            let text = match raw.find("//") {
                Some(pos) => &raw[..pos],
                None => raw,
            }
            .trim();
            if text.is_empty() {
                continue;
            }
            let stmt = if let Some(comment) = text.strip_prefix(';') {
                Stmt::Comment(comment.trim().to_string())
            } else if let Some(directive) = text.strip_prefix('@') {
                parse_directive(line, directive)?
            } else {
                let (code, comment) = match text.split_once(';') {
                    Some((code, comment)) => (code.trim(), Some(comment.trim().to_string())),
                    None => (text, None),
                };
                Stmt::Code {
                    text: Text::parse(line, code)?,
                    comment,
                }
            };
            match &stmt {
                Stmt::If(_) => open.push((line, false)),
                Stmt::Else => match open.last_mut() {
                    Some((_, seen @ false)) => *seen = true,
                    Some(_) => return Err(syntax(line, "duplicate @else")),
                    None => return Err(syntax(line, "@else without @if")),
                },
                Stmt::EndIf => {
                    if open.pop().is_none() {
                        return Err(syntax(line, "@endif without @if"));
                    }
                }
                Stmt::Reg(name) if !registers.contains(name) => registers.push(name.clone()),
                _ => {}
            }
            stmts.push((line, stmt));
        }
        if let Some(&(line, _)) = open.first() {
            return Err(TemplateError::Unterminated(line));
        }
        Ok(Template { stmts, registers })
    }

    /// Persistent registers declared with `@reg`.
    pub fn registers(&self) -> &[String] {
        &self.registers
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn parse_directive(line: usize, directive: &str) -> Result<Stmt, TemplateError> {
    let (name, rest) = match directive.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (directive, ""),
    };
    let expr = |src: &str| expr::parse(src).map_err(|e| syntax(line, e));
    let ident = |src: &str| {
        if is_identifier(src) {
            Ok(src.to_string())
        } else {
            Err(syntax(line, format!("@{name} needs a name, got '{src}'")))
        }
    };
    let stmt = match name {
        "section" => match Section::parse(rest) {
            Some(section) if section != Section::Header => Stmt::Section(section),
            _ => return Err(syntax(line, format!("unknown section '{rest}'"))),
        },
        "if" => Stmt::If(expr(rest)?),
        "else" => Stmt::Else,
        "endif" => Stmt::EndIf,
        "let" => {
            let (var, value) = rest
                .split_once('=')
                .ok_or_else(|| syntax(line, "@let needs NAME = expression"))?;
            Stmt::Let(ident(var.trim())?, expr(value)?)
        }
        "reg" => Stmt::Reg(ident(rest)?),
        "tmp" => Stmt::Tmp(ident(rest)?),
        "mem" => {
            let (var, size) = rest
                .split_once(char::is_whitespace)
                .ok_or_else(|| syntax(line, "@mem needs NAME SIZE"))?;
            Stmt::Mem(ident(var)?, expr(size)?)
        }
        other => {
            let m = Macro::parse(other)
                .ok_or_else(|| syntax(line, format!("unknown directive '@{other}'")))?;
            let args = rest
                .split_whitespace()
                .map(|arg| Text::parse(line, arg))
                .collect::<Result<Vec<_>, _>>()?;
            let (min, max) = m.arity();
            if args.len() < min || args.len() > max {
                return Err(syntax(
                    line,
                    format!("@{other} takes {min}..={max} arguments, got {}", args.len()),
                ));
            }
            Stmt::Macro(m, args)
        }
    };
    Ok(stmt)
}

// ── Interpretation ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Local {
    Num(f64),
    Sym(String),
}

struct Frame {
    parent_active: bool,
    cond: bool,
    in_else: bool,
}

impl Frame {
    fn active(&self) -> bool {
        self.parent_active && (self.cond != self.in_else)
    }
}

/// Mutable state of one instance's interpretation.
struct Run<'t> {
    section: Section,
    stack: Vec<Frame>,
    locals: HashMap<String, Local>,
    mems: HashMap<String, String>,
    template: &'t Template,
}

/// Read-only view the expression evaluator sees.
struct InstanceScope<'s, 'a> {
    ctx: &'s BlockContext<'a>,
    locals: &'s HashMap<String, Local>,
}

impl Scope for InstanceScope<'_, '_> {
    fn lookup(&self, table: &str, key: &str) -> Result<f64, String> {
        match table {
            "param" => self.ctx.param(key).map_err(|e| e.to_string()),
            "display" => self.ctx.display_param(key).map_err(|e| e.to_string()),
            "local" => match self.locals.get(key) {
                Some(Local::Num(v)) => Ok(*v),
                Some(Local::Sym(s)) => Err(format!("local '{key}' is the symbol {s}")),
                None => Err(format!("unknown local '{key}'")),
            },
            _ => Err(format!("'{table}.{key}' is not a number")),
        }
    }

    fn predicate(&self, name: &str, port: &str) -> Result<bool, String> {
        let d = self.ctx.descriptor();
        if d.input(port).is_none() && d.output(port).is_none() {
            return Err(format!("unknown port '{port}'"));
        }
        Ok(match name {
            "connected" => self.ctx.is_connected(port),
            "forwarded" => self.ctx.is_forwarded(port),
            _ => self.ctx.preserve_accumulator(port),
        })
    }

    fn sample_rate(&self) -> f64 {
        self.ctx.sample_rate()
    }
}

fn eval_err(line: usize, message: impl Into<String>) -> GenerateError {
    GenerateError::Template(TemplateError::Eval {
        line,
        message: message.into(),
    })
}

impl<'t> Run<'t> {
    fn new(template: &'t Template) -> Self {
        Run {
            section: Section::Main,
            stack: Vec::new(),
            locals: HashMap::new(),
            mems: HashMap::new(),
            template,
        }
    }

    fn active(&self) -> bool {
        self.stack.last().map_or(true, Frame::active)
    }

    fn eval(&self, ctx: &BlockContext<'_>, line: usize, e: &Expr) -> Result<f64, GenerateError> {
        let scope = InstanceScope {
            ctx,
            locals: &self.locals,
        };
        e.eval(&scope).map_err(|m| eval_err(line, m))
    }

    fn condition(&self, ctx: &BlockContext<'_>, line: usize, e: &Expr) -> Result<bool, GenerateError> {
        let scope = InstanceScope {
            ctx,
            locals: &self.locals,
        };
        e.eval_bool(&scope).map_err(|m| eval_err(line, m))
    }

    fn substitute(
        &self,
        ctx: &mut BlockContext<'_>,
        line: usize,
        text: &Text,
    ) -> Result<String, GenerateError> {
        let mut out = String::new();
        for segment in &text.0 {
            match segment {
                Segment::Lit(s) => out.push_str(s),
                Segment::Hole(table, key) => {
                    let value = match table {
                        Table::Param => format_number(ctx.param(key)?),
                        Table::Display => format_number(ctx.display_param(key)?),
                        Table::Input => ctx
                            .input(key)?
                            .ok_or_else(|| eval_err(line, format!("input '{key}' is not connected")))?,
                        Table::Output => ctx.output(key)?,
                        Table::Reg => {
                            if !self.template.registers.iter().any(|r| r == key) {
                                return Err(eval_err(line, format!("register '{key}' not declared")));
                            }
                            ctx.state_register(key)?
                        }
                        Table::Mem => self
                            .mems
                            .get(key)
                            .cloned()
                            .ok_or_else(|| eval_err(line, format!("memory '{key}' not declared")))?,
                        Table::Local => match self.locals.get(key) {
                            Some(Local::Num(v)) => format_number(*v),
                            Some(Local::Sym(s)) => s.clone(),
                            None => return Err(eval_err(line, format!("unknown local '{key}'"))),
                        },
                    };
                    out.push_str(&value);
                }
            }
        }
        Ok(out)
    }

    fn step(
        &mut self,
        ctx: &mut BlockContext<'_>,
        line: usize,
        stmt: &Stmt,
    ) -> Result<(), GenerateError> {
        // Structure is tracked even in inactive regions.
        match stmt {
            Stmt::If(cond) => {
                let parent_active = self.active();
                let cond = parent_active && self.condition(ctx, line, cond)?;
                self.stack.push(Frame {
                    parent_active,
                    cond,
                    in_else: false,
                });
                return Ok(());
            }
            Stmt::Else => {
                if let Some(frame) = self.stack.last_mut() {
                    frame.in_else = true;
                }
                return Ok(());
            }
            Stmt::EndIf => {
                self.stack.pop();
                return Ok(());
            }
            _ => {}
        }
        if !self.active() {
            return Ok(());
        }
        match stmt {
            Stmt::Section(section) => self.section = *section,
            Stmt::Let(name, e) => {
                let value = self.eval(ctx, line, e)?;
                self.locals.insert(name.clone(), Local::Num(value));
            }
            Stmt::Reg(name) => {
                ctx.state_register(name)?;
            }
            Stmt::Tmp(name) => {
                let reg = ctx.scratch()?;
                self.locals.insert(name.clone(), Local::Sym(reg));
            }
            Stmt::Mem(name, size) => {
                let size = self.eval(ctx, line, size)?.ceil().max(0.0) as u32;
                let block = ctx.memory(name, size)?;
                self.mems.insert(name.clone(), block.symbol);
            }
            Stmt::Macro(m, args) => {
                let args = args
                    .iter()
                    .map(|a| self.substitute(ctx, line, a))
                    .collect::<Result<Vec<_>, _>>()?;
                let bound = m.expand(&args, self.section, ctx).map_err(|e| match e {
                    MacroError::Alloc(a) => GenerateError::Alloc(a),
                    MacroError::Argument(m) => eval_err(line, m),
                })?;
                if let Some(lfo) = bound {
                    self.locals.insert("lfo".to_string(), Local::Sym(lfo));
                }
            }
            Stmt::Comment(text) => ctx.comment(self.section, text.clone()),
            Stmt::Code { text, comment } => {
                let code = self.substitute(ctx, line, text)?;
                if code.ends_with(':') {
                    ctx.raw(self.section, code);
                    return Ok(());
                }
                let (op, operands) = match code.split_once(char::is_whitespace) {
                    Some((op, rest)) => (
                        op,
                        rest.split(',')
                            .map(|s| s.trim().to_string())
                            .filter(|s| !s.is_empty())
                            .collect(),
                    ),
                    None => (code.as_str(), Vec::new()),
                };
                let mut node = IrNode::new(self.section, op, operands);
                if let Some(comment) = comment {
                    node = node.with_comment(comment.clone());
                }
                ctx.emit_node(node);
            }
            Stmt::If(_) | Stmt::Else | Stmt::EndIf => {}
        }
        Ok(())
    }
}

impl Template {
    /// Interpret the template for one block instance.
    pub fn instantiate(&self, ctx: &mut BlockContext<'_>) -> Result<(), GenerateError> {
        let mut run = Run::new(self);
        for (line, stmt) in &self.stmts {
            run.step(ctx, *line, stmt)?;
        }
        Ok(())
    }
}

// ── Block kind ──────────────────────────────────────────────────────────────

/// A block type whose generator is a template.
#[derive(Debug)]
pub struct TemplateBlock {
    descriptor: BlockDescriptor,
    template: Template,
}

impl TemplateBlock {
    /// Parse `source` and attach it to `descriptor`. Registers declared with
    /// `@reg` are added to the descriptor so they are allocated up front.
    pub fn new(descriptor: BlockDescriptor, source: &str) -> Result<Self, TemplateError> {
        let template = Template::parse(source)?;
        let descriptor = template
            .registers()
            .iter()
            .fold(descriptor, |d, r| d.with_register(r));
        Ok(TemplateBlock {
            descriptor,
            template,
        })
    }
}

impl BlockKind for TemplateBlock {
    fn descriptor(&self) -> &BlockDescriptor {
        &self.descriptor
    }

    fn generate(&self, ctx: &mut BlockContext<'_>) -> Result<(), GenerateError> {
        let missing = self
            .descriptor
            .inputs
            .iter()
            .find(|p| p.required && !ctx.is_connected(&p.id));
        if let Some(port) = missing {
            let text = format!(
                "{} ({}): input '{}' unconnected, bypassed",
                ctx.id(),
                self.descriptor.name,
                port.id
            );
            ctx.comment(Section::Main, text);
            return Ok(());
        }
        self.template.instantiate(ctx)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::CodegenContext;
    use crate::config::TargetConfig;
    use crate::graph::{Block, Graph, GraphIndex};
    use crate::registry::{BlockCategory, ParamSpec, PortSpec};
    use crate::units::Conversion;

    fn descriptor() -> BlockDescriptor {
        BlockDescriptor::new("t", "Test", BlockCategory::Effect)
            .with_input(PortSpec::audio("in", "In").required())
            .with_input(PortSpec::control("mod", "Mod"))
            .with_output(PortSpec::audio("out", "Out"))
            .with_param(ParamSpec::new("gain", "Gain", 0.0, -12.0, 12.0).convert(Conversion::Decibels))
            .with_param(ParamSpec::new("mode", "Mode", 0.0, 0.0, 2.0))
    }

    /// Run `source` for block `b` wired `src.out -> b.in`.
    fn run(source: &str, block: Block) -> Result<Vec<String>, GenerateError> {
        let mut g = Graph::new("t");
        g.add_block(Block::new("src", "t"))
            .add_block(block.clone())
            .connect("src", "out", "b", "in");
        let mut ctx = CodegenContext::new(TargetConfig::default());
        ctx.analyze_connections(&g, &GraphIndex::build(&g));
        let kind = TemplateBlock::new(descriptor(), source).map_err(GenerateError::Template)?;
        {
            let mut bctx = BlockContext::new(&mut ctx, &block, kind.descriptor());
            kind.generate(&mut bctx)?;
        }
        let mut lines = Vec::new();
        for s in Section::CODE {
            for l in ctx.sections().get(s) {
                lines.push(format!("{s}: {l}"));
            }
        }
        Ok(lines)
    }

    #[test]
    fn placeholders_and_sections() {
        let src = "\
            @section main\n\
            rdax ${input.in}, ${param.gain} ; scaled\n\
            wrax ${output.out}, 0.0\n";
        let lines = run(src, Block::new("b", "t").with_param("gain", 0.0)).unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("main: rdax  src_out, 1.0"));
        assert!(lines[0].ends_with("; scaled"));
        assert_eq!(lines[1], "main: wrax  b_out, 0.0");
    }

    #[test]
    fn nested_conditionals_with_else() {
        let src = "\
            @if display.mode == 0\n\
              clr\n\
            @else\n\
              @if display.mode == 1\n\
                ; one\n\
              @else\n\
                ; two\n\
              @endif\n\
            @endif\n\
            @if connected(mod)\n\
              mulx ${input.mod}\n\
            @endif\n";
        let lines = run(src, Block::new("b", "t").with_param("mode", 2.0)).unwrap();
        assert_eq!(lines, vec!["main: ; two"]);
        let lines = run(src, Block::new("b", "t")).unwrap();
        assert_eq!(lines, vec!["main: clr"]);
    }

    #[test]
    fn template_comments_are_stripped() {
        let src = "// header comment\nclr // trailing\n";
        assert_eq!(run(src, Block::new("b", "t")).unwrap(), vec!["main: clr"]);
    }

    #[test]
    fn let_tmp_mem_and_registers() {
        let src = "\
            @reg state\n\
            @tmp t\n\
            @let half = param.gain / 2\n\
            @mem line 100.5\n\
            @section init\n\
            clr\n\
            @section main\n\
            rda ${mem.line}#, ${local.half}\n\
            wrax ${local.t}, 0.0\n\
            wrax ${reg.state}, 0.0\n";
        let lines = run(src, Block::new("b", "t")).unwrap();
        assert_eq!(
            lines,
            vec![
                "init: clr",
                "main: rda   b_line#, 0.5",
                "main: wrax  REG31, 0.0",
                "main: wrax  b_reg_state, 0.0",
            ]
        );
    }

    #[test]
    fn macros_expand_with_substituted_arguments() {
        let src = "@gain ${input.in} 3.0 ${output.out}\n";
        let lines = run(src, Block::new("b", "t")).unwrap();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[2], "main: wrax  b_out, 0.0");
    }

    #[test]
    fn lfo_macro_binds_local() {
        let src = "@lfo 20 1000\ncho rdal, ${local.lfo}\n";
        let lines = run(src, Block::new("b", "t")).unwrap();
        assert_eq!(lines, vec!["init: wlds  SIN0, 20, 1000", "main: cho   rdal, SIN0"]);
    }

    #[test]
    fn unconnected_required_input_bypasses() {
        let mut ctx = CodegenContext::new(TargetConfig::default());
        let block = Block::new("lonely", "t");
        let kind = TemplateBlock::new(descriptor(), "clr\n").unwrap();
        {
            let mut bctx = BlockContext::new(&mut ctx, &block, kind.descriptor());
            kind.generate(&mut bctx).unwrap();
        }
        let main = ctx.sections().get(Section::Main);
        assert_eq!(main.len(), 1);
        assert!(main[0].to_string().contains("bypassed"));
        assert_eq!(ctx.sections().instruction_count(), 0);
    }

    #[test]
    fn structural_errors_at_parse_time() {
        assert_eq!(
            Template::parse("@if 1\nclr\n").unwrap_err(),
            TemplateError::Unterminated(1)
        );
        assert!(Template::parse("@else\n").is_err());
        assert!(Template::parse("@endif\n").is_err());
        assert!(Template::parse("@if 1\n@else\n@else\n@endif\n").is_err());
        assert!(Template::parse("@section nowhere\n").is_err());
        assert!(Template::parse("@bogus\n").is_err());
        assert!(Template::parse("rdax ${nope.x}, 1.0\n").is_err());
        assert!(Template::parse("rdax ${input.x, 1.0\n").is_err());
        assert!(Template::parse("@onepole a b\n").is_err());
    }

    #[test]
    fn fractional_condition_selects_the_if_branch() {
        let lines = run("@if 0.25\nclr\n@else\nldax ${input.in}\n@endif\n", Block::new("b", "t")).unwrap();
        assert_eq!(lines, vec!["main: clr".to_string()]);
        let err = run("@if 1 / 0\nclr\n@endif\n", Block::new("b", "t")).unwrap_err();
        assert!(matches!(err, GenerateError::Template(TemplateError::Eval { line: 1, .. })));
    }

    #[test]
    fn evaluation_errors_name_the_line() {
        let err = run("clr\nrdax ${reg.undeclared}, 1.0\n", Block::new("b", "t")).unwrap_err();
        match err {
            GenerateError::Template(TemplateError::Eval { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected error {other:?}"),
        }
        assert!(run("rdax ${input.mod}, 1.0\n", Block::new("b", "t")).is_err());
        assert!(matches!(
            run("rdax ${param.nope}, 1.0\n", Block::new("b", "t")),
            Err(GenerateError::UnknownParameter(_))
        ));
    }

    #[test]
    fn reg_declarations_extend_descriptor() {
        let kind = TemplateBlock::new(descriptor(), "@reg a\n@reg b\n@reg a\n").unwrap();
        assert_eq!(kind.descriptor().registers, vec!["a", "b"]);
    }
}
