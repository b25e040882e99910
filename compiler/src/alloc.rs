// alloc.rs — Code generation context: register, scratch, delay memory,
// constant and LFO allocation plus accumulator-forwarding facts
//
// One `CodegenContext` lives for exactly one compilation. Stable register
// aliases grow upward from REG0; scratch registers grow downward from the
// top of the file and are released after every block. A stable index is
// never handed out at or above the lowest scratch index ever used, so the
// two pools cannot alias.
//
// Preconditions: `analyze_connections` runs before any block generation.
// Postconditions: every alias/symbol handed out is declared by
//                 `header_declarations`.
// Failure modes: exhausted registers, memory or LFOs → `AllocError`.
// Side effects: none.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::config::TargetConfig;
use crate::graph::{Block, Endpoint, Graph, GraphIndex};
use crate::ir::{format_number, IrNode, Line, Section, SectionLists};
use crate::registry::{BlockDescriptor, GenerateError};
use crate::units;

// ── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AllocError {
    #[error(
        "register file exhausted: {stable} stable and {scratch} scratch registers \
         needed, {capacity} available"
    )]
    RegistersExhausted {
        stable: u32,
        scratch: u32,
        capacity: u32,
    },
    #[error(
        "delay memory exhausted: '{name}' needs {requested} words, \
         {used} of {capacity} already allocated"
    )]
    MemoryExhausted {
        name: String,
        requested: u32,
        used: u32,
        capacity: u32,
    },
    #[error("delay memory '{0}' allocated twice")]
    DuplicateMemory(String),
    #[error("delay memory '{0}' has zero size")]
    EmptyMemory(String),
    #[error("all {capacity} LFOs are in use")]
    LfosExhausted { capacity: u32 },
}

// ── Allocation records ──────────────────────────────────────────────────────

/// A named delay-memory range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryBlock {
    pub symbol: String,
    pub offset: u32,
    pub size: u32,
}

#[derive(Debug, Clone)]
struct RegisterSlot {
    alias: String,
    index: u32,
}

// ── Context ─────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct CodegenContext {
    target: TargetConfig,
    registers: HashMap<Endpoint, usize>,
    slots: Vec<RegisterSlot>,
    aliases: HashSet<String>,
    scratch_in_use: u32,
    /// Lowest scratch index ever handed out (`target.registers` if none).
    scratch_floor: u32,
    memory: Vec<MemoryBlock>,
    memory_used: u32,
    constants: Vec<(f64, String)>,
    lfos: Vec<(String, String)>,
    /// Output endpoint → out-degree is exactly one.
    forwarding: HashMap<Endpoint, bool>,
    /// Input endpoint → driving output endpoint.
    drivers: HashMap<Endpoint, Endpoint>,
    sections: SectionLists,
    parameter_mappings: Vec<String>,
}

impl CodegenContext {
    pub fn new(target: TargetConfig) -> Self {
        let scratch_floor = target.registers;
        CodegenContext {
            target,
            registers: HashMap::new(),
            slots: Vec::new(),
            aliases: HashSet::new(),
            scratch_in_use: 0,
            scratch_floor,
            memory: Vec::new(),
            memory_used: 0,
            constants: Vec::new(),
            lfos: Vec::new(),
            forwarding: HashMap::new(),
            drivers: HashMap::new(),
            sections: SectionLists::default(),
            parameter_mappings: Vec::new(),
        }
    }

    pub fn target(&self) -> &TargetConfig {
        &self.target
    }

    /// Compute drivers and accumulator-forwarding facts from the full
    /// connection list. Runs once, before any generation.
    pub fn analyze_connections(&mut self, graph: &Graph, index: &GraphIndex) {
        for endpoint in index.connected_outputs(graph) {
            let single = index.out_degree(endpoint) == 1;
            self.forwarding.insert(endpoint.clone(), single);
        }
        for conn in &graph.connections {
            if let Some(first) = index.driver(graph, &conn.to) {
                self.drivers.insert(conn.to.clone(), first.from.clone());
            }
        }
    }

    // ── Registers ───────────────────────────────────────────────────────

    /// Stable alias for `(block, port)`. Idempotent.
    pub fn allocate(&mut self, block: &str, port: &str) -> Result<String, AllocError> {
        let key = Endpoint::new(block, port);
        if let Some(&slot) = self.registers.get(&key) {
            return Ok(self.slots[slot].alias.clone());
        }
        let index = self.slots.len() as u32;
        if index >= self.scratch_floor {
            return Err(self.registers_exhausted(index + 1));
        }
        let alias = self.unique_alias(&format!("{}_{}", sanitize(block), sanitize(port)));
        log::trace!("allocate {}.{} -> {} (REG{})", block, port, alias, index);
        self.slots.push(RegisterSlot {
            alias: alias.clone(),
            index,
        });
        self.registers.insert(key, self.slots.len() - 1);
        Ok(alias)
    }

    /// Alias previously allocated for `(block, port)`, if any.
    pub fn alias_of(&self, endpoint: &Endpoint) -> Option<&str> {
        self.registers
            .get(endpoint)
            .map(|&slot| self.slots[slot].alias.as_str())
    }

    /// Borrow a scratch register for the current block.
    pub fn scratch(&mut self) -> Result<String, AllocError> {
        let capacity = self.target.registers;
        let stable = self.slots.len() as u32;
        let taken = self.scratch_in_use + 1;
        if stable + taken > capacity {
            return Err(AllocError::RegistersExhausted {
                stable,
                scratch: taken,
                capacity,
            });
        }
        let index = capacity - taken;
        self.scratch_in_use = taken;
        self.scratch_floor = self.scratch_floor.min(index);
        Ok(format!("REG{index}"))
    }

    /// Release every scratch register. Called after each block.
    pub fn reset_scratch(&mut self) {
        self.scratch_in_use = 0;
    }

    /// Stable registers allocated so far.
    pub fn stable_count(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Distinct physical registers touched: stable plus peak scratch.
    pub fn registers_used(&self) -> u32 {
        self.stable_count() + (self.target.registers - self.scratch_floor)
    }

    fn registers_exhausted(&self, stable: u32) -> AllocError {
        AllocError::RegistersExhausted {
            stable,
            scratch: self.target.registers - self.scratch_floor,
            capacity: self.target.registers,
        }
    }

    fn unique_alias(&mut self, base: &str) -> String {
        let mut alias = base.to_string();
        let mut n = 1;
        while !self.aliases.insert(alias.clone()) {
            alias = format!("{base}_{n}");
            n += 1;
        }
        alias
    }

    // ── Delay memory ────────────────────────────────────────────────────

    /// Carve `size` words for `name`, sequentially from offset 0.
    pub fn allocate_memory(&mut self, name: &str, size: u32) -> Result<MemoryBlock, AllocError> {
        if size == 0 {
            return Err(AllocError::EmptyMemory(name.to_string()));
        }
        if self.memory.iter().any(|m| m.symbol == name) {
            return Err(AllocError::DuplicateMemory(name.to_string()));
        }
        let capacity = self.target.memory;
        if self.memory_used.saturating_add(size) > capacity {
            return Err(AllocError::MemoryExhausted {
                name: name.to_string(),
                requested: size,
                used: self.memory_used,
                capacity,
            });
        }
        let block = MemoryBlock {
            symbol: name.to_string(),
            offset: self.memory_used,
            size,
        };
        log::trace!("memory {} @ {} ({} words)", name, block.offset, size);
        self.memory_used += size;
        self.memory.push(block.clone());
        Ok(block)
    }

    pub fn memory_used(&self) -> u32 {
        self.memory_used
    }

    pub fn memory_blocks(&self) -> &[MemoryBlock] {
        &self.memory
    }

    // ── Constants ───────────────────────────────────────────────────────

    /// Symbol for a numeric literal, shared by all values equal within
    /// `units::TOLERANCE`.
    pub fn constant(&mut self, value: f64) -> String {
        if let Some((_, symbol)) = self
            .constants
            .iter()
            .find(|(v, _)| units::approx_eq(*v, value))
        {
            return symbol.clone();
        }
        let symbol = format!("k{}", self.constants.len());
        self.constants.push((value, symbol.clone()));
        symbol
    }

    // ── LFOs ────────────────────────────────────────────────────────────

    /// Sine LFO owned by `owner`. Idempotent per owner.
    pub fn allocate_lfo(&mut self, owner: &str) -> Result<String, AllocError> {
        if let Some((_, name)) = self.lfos.iter().find(|(o, _)| o == owner) {
            return Ok(name.clone());
        }
        let n = self.lfos.len() as u32;
        if n >= self.target.lfos {
            return Err(AllocError::LfosExhausted {
                capacity: self.target.lfos,
            });
        }
        let name = format!("SIN{n}");
        self.lfos.push((owner.to_string(), name.clone()));
        Ok(name)
    }

    // ── Forwarding hints ────────────────────────────────────────────────

    /// Producer side: the output feeds exactly one input.
    pub fn should_preserve_accumulator(&self, output: &Endpoint) -> bool {
        self.forwarding.get(output).copied().unwrap_or(false)
    }

    /// Consumer side: the input's driver feeds only this input.
    pub fn is_forwarded(&self, input: &Endpoint) -> bool {
        self.drivers
            .get(input)
            .is_some_and(|from| self.should_preserve_accumulator(from))
    }

    pub fn driver(&self, input: &Endpoint) -> Option<&Endpoint> {
        self.drivers.get(input)
    }

    // ── Sections ────────────────────────────────────────────────────────

    pub fn emit(&mut self, node: IrNode) {
        self.sections.push(node.section, Line::Node(node));
    }

    pub fn raw(&mut self, section: Section, text: impl Into<String>) {
        self.sections.push(section, Line::Raw(text.into()));
    }

    pub fn sections(&self) -> &SectionLists {
        &self.sections
    }

    pub fn sections_mut(&mut self) -> &mut SectionLists {
        &mut self.sections
    }

    pub fn add_parameter_mapping(&mut self, text: impl Into<String>) {
        self.parameter_mappings.push(text.into());
    }

    pub fn parameter_mappings(&self) -> &[String] {
        &self.parameter_mappings
    }

    /// `equ`/`mem` lines for every alias, constant and memory range, followed
    /// by any header text blocks appended.
    pub fn header_declarations(&self) -> Vec<String> {
        let mut out = Vec::new();
        for slot in &self.slots {
            out.push(format!("equ {} REG{}", slot.alias, slot.index));
        }
        for (value, symbol) in &self.constants {
            out.push(format!("equ {} {}", symbol, format_number(*value)));
        }
        for m in &self.memory {
            out.push(format!("mem {} {}", m.symbol, m.size));
        }
        out.extend(self.sections.get(Section::Header).iter().map(|l| l.to_string()));
        out
    }
}

/// Reduce an identifier to `[A-Za-z0-9_]`, never starting with a digit.
pub fn sanitize(name: &str) -> String {
    let mut s: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if s.is_empty() || s.starts_with(|c: char| c.is_ascii_digit()) {
        s.insert(0, 'b');
    }
    s
}

// ── Per-block scope ─────────────────────────────────────────────────────────

/// The context one block's generation call sees: the shared allocator bound
/// to the block instance and its descriptor.
pub struct BlockContext<'a> {
    ctx: &'a mut CodegenContext,
    block: &'a Block,
    descriptor: &'a BlockDescriptor,
}

impl<'a> BlockContext<'a> {
    pub fn new(
        ctx: &'a mut CodegenContext,
        block: &'a Block,
        descriptor: &'a BlockDescriptor,
    ) -> Self {
        BlockContext {
            ctx,
            block,
            descriptor,
        }
    }

    pub fn block(&self) -> &Block {
        self.block
    }

    pub fn id(&self) -> &str {
        &self.block.id
    }

    pub fn descriptor(&self) -> &BlockDescriptor {
        self.descriptor
    }

    pub fn sample_rate(&self) -> f64 {
        self.ctx.target.sample_rate
    }

    fn endpoint(&self, port: &str) -> Endpoint {
        Endpoint::new(self.block.id.as_str(), port)
    }

    /// Alias of the output driving `port`, or `None` if unconnected.
    pub fn input(&mut self, port: &str) -> Result<Option<String>, GenerateError> {
        if self.descriptor.input(port).is_none() {
            return Err(GenerateError::UnknownPort(port.to_string()));
        }
        let from = match self.ctx.driver(&self.endpoint(port)) {
            Some(from) => from.clone(),
            None => return Ok(None),
        };
        Ok(Some(self.ctx.allocate(&from.block, &from.port)?))
    }

    /// Stable alias for one of this block's outputs.
    pub fn output(&mut self, port: &str) -> Result<String, GenerateError> {
        if self.descriptor.output(port).is_none() {
            return Err(GenerateError::UnknownPort(port.to_string()));
        }
        Ok(self.ctx.allocate(&self.block.id, port)?)
    }

    /// True if the port (input or output) takes part in any connection.
    pub fn is_connected(&self, port: &str) -> bool {
        let ep = self.endpoint(port);
        self.ctx.drivers.contains_key(&ep) || self.ctx.forwarding.contains_key(&ep)
    }

    pub fn preserve_accumulator(&self, output: &str) -> bool {
        self.ctx.should_preserve_accumulator(&self.endpoint(output))
    }

    pub fn is_forwarded(&self, input: &str) -> bool {
        self.ctx.is_forwarded(&self.endpoint(input))
    }

    /// Persistent per-instance register (`@reg` in templates).
    pub fn state_register(&mut self, name: &str) -> Result<String, AllocError> {
        self.ctx.allocate(&self.block.id, &state_port(name))
    }

    pub fn scratch(&mut self) -> Result<String, AllocError> {
        self.ctx.scratch()
    }

    /// Delay memory namespaced to this instance (`<block>_<name>`).
    pub fn memory(&mut self, name: &str, size: u32) -> Result<MemoryBlock, AllocError> {
        let symbol = format!("{}_{}", sanitize(&self.block.id), sanitize(name));
        self.ctx.allocate_memory(&symbol, size)
    }

    pub fn constant(&mut self, value: f64) -> String {
        self.ctx.constant(value)
    }

    pub fn lfo(&mut self) -> Result<String, AllocError> {
        self.ctx.allocate_lfo(&self.block.id)
    }

    /// Parameter in display units: stored value or default, clamped.
    pub fn display_param(&self, name: &str) -> Result<f64, GenerateError> {
        let spec = self
            .descriptor
            .param(name)
            .ok_or_else(|| GenerateError::UnknownParameter(name.to_string()))?;
        let raw = self.block.parameters.get(name).copied().unwrap_or(spec.default);
        Ok(spec.clamp(raw))
    }

    /// Parameter in code units.
    pub fn param(&self, name: &str) -> Result<f64, GenerateError> {
        let display = self.display_param(name)?;
        let spec = self
            .descriptor
            .param(name)
            .ok_or_else(|| GenerateError::UnknownParameter(name.to_string()))?;
        Ok(spec.to_code(display, self.sample_rate()))
    }

    pub fn emit(&mut self, section: Section, op: &str, operands: &[&str]) {
        let operands = operands.iter().map(|s| s.to_string()).collect();
        self.ctx.emit(IrNode::new(section, op, operands));
    }

    pub fn emit_node(&mut self, node: IrNode) {
        self.ctx.emit(node);
    }

    pub fn comment(&mut self, section: Section, text: impl Into<String>) {
        self.ctx.emit(IrNode::comment(section, text));
    }

    pub fn raw(&mut self, section: Section, text: impl Into<String>) {
        self.ctx.raw(section, text);
    }

    pub fn add_parameter_mapping(&mut self, text: impl Into<String>) {
        self.ctx.add_parameter_mapping(text);
    }
}

/// Allocator key for a persistent block register.
pub fn state_port(name: &str) -> String {
    format!("reg_{name}")
}

// ── Tests ───────────────────────────────────────────────────────────────────
