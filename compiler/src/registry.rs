// registry.rs — Block type registry
//
// Maps a block type tag to an implementation of the shared `BlockKind`
// contract: declared ports, declared parameters, and a code generation
// operation that drives the allocator through a `BlockContext`.
//
// Preconditions: none.
// Postconditions: every registered tag is unique.
// Failure modes: duplicate tags and malformed templates → `RegistryError`.
// Side effects: none.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::alloc::{AllocError, BlockContext};
use crate::template::TemplateError;
use crate::units::Conversion;

// ── Data types ──────────────────────────────────────────────────────────────

/// Signal carried by a port. Connected ports must agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Audio,
    Control,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalKind::Audio => f.write_str("audio"),
            SignalKind::Control => f.write_str("control"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Input,
    Output,
}

/// Coarse role of a block type. `Source` and `Sink` drive the
/// missing-input/missing-output warnings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockCategory {
    Source,
    Sink,
    Effect,
    Control,
    Utility,
}

/// A declared port.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortSpec {
    pub id: String,
    pub name: String,
    pub kind: SignalKind,
    pub required: bool,
}

impl PortSpec {
    pub fn audio(id: &str, name: &str) -> Self {
        PortSpec {
            id: id.to_string(),
            name: name.to_string(),
            kind: SignalKind::Audio,
            required: false,
        }
    }

    pub fn control(id: &str, name: &str) -> Self {
        PortSpec {
            kind: SignalKind::Control,
            ..PortSpec::audio(id, name)
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// A declared parameter. `default`, `min` and `max` are in display units.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamSpec {
    pub id: String,
    pub name: String,
    pub default: f64,
    pub min: f64,
    pub max: f64,
    pub conversion: Option<Conversion>,
}

impl ParamSpec {
    pub fn new(id: &str, name: &str, default: f64, min: f64, max: f64) -> Self {
        ParamSpec {
            id: id.to_string(),
            name: name.to_string(),
            default,
            min,
            max,
            conversion: None,
        }
    }

    pub fn convert(mut self, conversion: Conversion) -> Self {
        self.conversion = Some(conversion);
        self
    }

    pub fn clamp(&self, display: f64) -> f64 {
        display.clamp(self.min, self.max)
    }

    /// Display value → code value.
    pub fn to_code(&self, display: f64, sample_rate: f64) -> f64 {
        match self.conversion {
            Some(c) => c.to_code(display, sample_rate),
            None => display,
        }
    }
}

/// Everything the compiler knows about a block type without generating code.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockDescriptor {
    pub type_tag: String,
    pub name: String,
    pub category: BlockCategory,
    pub inputs: Vec<PortSpec>,
    pub outputs: Vec<PortSpec>,
    pub params: Vec<ParamSpec>,
    /// Persistent per-instance registers, allocated before generation.
    pub registers: Vec<String>,
}

impl BlockDescriptor {
    pub fn new(type_tag: &str, name: &str, category: BlockCategory) -> Self {
        BlockDescriptor {
            type_tag: type_tag.to_string(),
            name: name.to_string(),
            category,
            inputs: Vec::new(),
            outputs: Vec::new(),
            params: Vec::new(),
            registers: Vec::new(),
        }
    }

    pub fn with_input(mut self, port: PortSpec) -> Self {
        self.inputs.push(port);
        self
    }

    pub fn with_output(mut self, port: PortSpec) -> Self {
        self.outputs.push(port);
        self
    }

    pub fn with_param(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }

    pub fn with_register(mut self, name: &str) -> Self {
        if !self.registers.iter().any(|r| r == name) {
            self.registers.push(name.to_string());
        }
        self
    }

    pub fn input(&self, id: &str) -> Option<&PortSpec> {
        self.inputs.iter().find(|p| p.id == id)
    }

    pub fn output(&self, id: &str) -> Option<&PortSpec> {
        self.outputs.iter().find(|p| p.id == id)
    }

    pub fn port(&self, id: &str, direction: Direction) -> Option<&PortSpec> {
        match direction {
            Direction::Input => self.input(id),
            Direction::Output => self.output(id),
        }
    }

    pub fn param(&self, id: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.id == id)
    }
}

// ── Contract ────────────────────────────────────────────────────────────────

/// Failure inside one block's generation call.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error(transparent)]
    Alloc(#[from] AllocError),
    #[error("template: {0}")]
    Template(#[from] TemplateError),
    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),
    #[error("unknown port '{0}'")]
    UnknownPort(String),
}

/// One block type. Implementations are either hand-written generators or
/// `TemplateBlock`s interpreting a declarative pattern.
pub trait BlockKind: Send + Sync {
    fn descriptor(&self) -> &BlockDescriptor;

    /// Append this instance's code to the section lists.
    fn generate(&self, ctx: &mut BlockContext<'_>) -> Result<(), GenerateError>;

    fn type_tag(&self) -> &str {
        &self.descriptor().type_tag
    }
}

/// Errors that can occur while populating the registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("duplicate block type '{0}'")]
    DuplicateType(String),
    #[error("block type '{type_tag}': {source}")]
    Template {
        type_tag: String,
        source: TemplateError,
    },
}

// ── Registry ────────────────────────────────────────────────────────────────

/// Block type registry, keyed by type tag.
pub struct BlockRegistry {
    kinds: BTreeMap<String, Box<dyn BlockKind>>,
}

impl Default for BlockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockRegistry {
    pub fn new() -> Self {
        BlockRegistry {
            kinds: BTreeMap::new(),
        }
    }

    /// A registry holding the built-in block library.
    pub fn with_builtins() -> Result<Self, RegistryError> {
        let mut registry = BlockRegistry::new();
        crate::blocks::register_builtins(&mut registry)?;
        Ok(registry)
    }

    pub fn register(&mut self, kind: Box<dyn BlockKind>) -> Result<(), RegistryError> {
        let tag = kind.type_tag().to_string();
        if self.kinds.contains_key(&tag) {
            return Err(RegistryError::DuplicateType(tag));
        }
        log::trace!("registered block type '{}'", tag);
        self.kinds.insert(tag, kind);
        Ok(())
    }

    pub fn lookup(&self, type_tag: &str) -> Option<&dyn BlockKind> {
        self.kinds.get(type_tag).map(|k| k.as_ref())
    }

    pub fn descriptor(&self, type_tag: &str) -> Option<&BlockDescriptor> {
        self.lookup(type_tag).map(|k| k.descriptor())
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &BlockDescriptor> {
        self.kinds.values().map(|k| k.descriptor())
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Compact JSON of every descriptor in tag order; stable across runs.
    pub fn canonical_json(&self) -> String {
        let descriptors: Vec<&BlockDescriptor> = self.descriptors().collect();
        serde_json::to_string(&descriptors).unwrap_or_default()
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
