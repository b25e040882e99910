// pipeline.rs — Compilation state and pass orchestration
//
// Runs the passes in strict order: validate → schedule → allocate →
// generate → elide → assemble → optimize → encode, stopping after the
// terminal pass an --emit target needs.
//
// Preconditions: the graph is an immutable snapshot; the registry is populated.
// Postconditions: `CompileOutput` always carries the best-effort text and
//                 statistics, even when `success` is false.
// Failure modes: structural and scheduling errors stop the run immediately;
//                generation, resource and assembly errors surface after the
//                full generation pass alongside the partial program.
// Side effects: calls `on_pass_complete` after each pass.

use std::time::Instant;

use serde::Serialize;

use crate::alloc::{state_port, AllocError, BlockContext, CodegenContext};
use crate::config::CompileOptions;
use crate::diag::codes;
use crate::diag::{has_errors, DiagCode, Diagnostic};
use crate::emit;
use crate::encoder::{EncodeOutput, Encoder};
use crate::graph::{Endpoint, Graph, GraphIndex};
use crate::ir::elide_redundant_loads;
use crate::optimize::optimize;
use crate::pass::{descriptor, required_passes, PassId};
use crate::registry::{BlockRegistry, GenerateError};
use crate::schedule::{schedule, Schedule};
use crate::validate::validate;

// ── Results ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub instructions_used: usize,
    pub registers_used: u32,
    pub memory_used: u32,
    pub blocks_processed: usize,
}

#[derive(Debug)]
pub struct CompileOutput {
    pub success: bool,
    pub assembly: String,
    pub statistics: Statistics,
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
    /// Present once scheduling ran.
    pub schedule: Option<Schedule>,
}

impl CompileOutput {
    pub fn error_messages(&self) -> Vec<String> {
        self.errors.iter().map(|d| d.message.clone()).collect()
    }

    pub fn has_warning(&self, code: DiagCode) -> bool {
        self.warnings.iter().any(|d| d.code == Some(code))
    }

    pub fn has_error(&self, code: DiagCode) -> bool {
        self.errors.iter().any(|d| d.code == Some(code))
    }
}

// ── Provenance ─────────────────────────────────────────────────────────────

/// Provenance metadata for reproducible builds.
///
/// `graph_hash`: SHA-256 of the raw graph JSON.
/// `registry_fingerprint`: SHA-256 of `BlockRegistry::canonical_json()`.
/// `compiler_version`: crate version from `Cargo.toml`.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub graph_hash: [u8; 32],
    pub registry_fingerprint: [u8; 32],
    pub compiler_version: &'static str,
}

impl Provenance {
    pub fn graph_hash_hex(&self) -> String {
        bytes_to_hex(&self.graph_hash)
    }

    pub fn registry_fingerprint_hex(&self) -> String {
        bytes_to_hex(&self.registry_fingerprint)
    }

    /// Serialize provenance as a JSON string for `--emit build-info`.
    pub fn to_json(&self) -> String {
        let value = serde_json::json!({
            "graph_hash": self.graph_hash_hex(),
            "registry_fingerprint": self.registry_fingerprint_hex(),
            "compiler_version": self.compiler_version,
        });
        let mut text = serde_json::to_string_pretty(&value).unwrap_or_default();
        text.push('\n');
        text
    }
}

fn bytes_to_hex(bytes: &[u8; 32]) -> String {
    let mut s = String::with_capacity(64);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
    }
    s
}

fn sha256(text: &str) -> [u8; 32] {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&hasher.finalize());
    hash
}

pub fn compute_provenance(graph_json: &str, registry: &BlockRegistry) -> Provenance {
    Provenance {
        graph_hash: sha256(graph_json),
        registry_fingerprint: sha256(&registry.canonical_json()),
        compiler_version: env!("CARGO_PKG_VERSION"),
    }
}

// ── Compilation state ──────────────────────────────────────────────────────

struct CompilationState<'a> {
    graph: &'a Graph,
    registry: &'a BlockRegistry,
    options: &'a CompileOptions,
    index: GraphIndex,
    schedule: Option<Schedule>,
    ctx: CodegenContext,
    text: String,
    encoded: Option<EncodeOutput>,
    blocks_processed: usize,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> CompilationState<'a> {
    fn new(graph: &'a Graph, registry: &'a BlockRegistry, options: &'a CompileOptions) -> Self {
        CompilationState {
            graph,
            registry,
            options,
            index: GraphIndex::build(graph),
            schedule: None,
            ctx: CodegenContext::new(options.target.clone()),
            text: String::new(),
            encoded: None,
            blocks_processed: 0,
            diagnostics: Vec::new(),
        }
    }

    fn order(&self) -> &[String] {
        match &self.schedule {
            Some(s) => &s.order,
            None => &[],
        }
    }

    // ── Passes ─────────────────────────────────────────────────────────

    fn run_pass(&mut self, pass: PassId, encoder: &dyn Encoder) -> Vec<Diagnostic> {
        match pass {
            PassId::Validate => validate(self.graph, self.registry).diagnostics,
            PassId::Schedule => {
                let result = schedule(self.graph, &self.index);
                self.schedule = Some(result.schedule);
                result.diagnostics
            }
            PassId::Allocate => self.allocate(),
            PassId::Generate => self.generate(),
            PassId::Elide => {
                if !self.options.optimize {
                    return Vec::new();
                }
                let removed = elide_redundant_loads(self.ctx.sections_mut());
                log::debug!("elide: {removed} redundant load(s) removed");
                if removed == 0 {
                    return Vec::new();
                }
                vec![Diagnostic::warning(
                    codes::W0500,
                    format!("load elision removed {removed} redundant load(s)"),
                )]
            }
            PassId::Assemble => {
                self.text = emit::assemble(
                    &self.graph.metadata,
                    &self.ctx,
                    self.options.parameter_comments,
                );
                Vec::new()
            }
            PassId::Optimize => {
                if !self.options.optimize {
                    return Vec::new();
                }
                let result = optimize(&self.text);
                self.text = result.text;
                result.diagnostics
            }
            PassId::Encode => self.encode(encoder),
        }
    }

    /// Pre-allocate a stable alias for every connected output and every
    /// declared state register, in schedule order.
    fn allocate(&mut self) -> Vec<Diagnostic> {
        let graph = self.graph;
        let registry = self.registry;
        self.ctx.analyze_connections(graph, &self.index);
        let mut diags = Vec::new();
        let order: Vec<String> = self.order().to_vec();
        for id in &order {
            let Some(block) = graph.block(id) else {
                continue;
            };
            let Some(desc) = registry.descriptor(&block.type_tag) else {
                continue;
            };
            let connected = desc
                .outputs
                .iter()
                .filter(|p| self.index.out_degree(&Endpoint::new(id.as_str(), p.id.as_str())) > 0)
                .map(|p| p.id.clone());
            let state = desc.registers.iter().map(|r| state_port(r));
            for port in connected.chain(state).collect::<Vec<_>>() {
                match self.ctx.allocate(id, &port) {
                    Ok(alias) => log::trace!("allocate: {id}.{port} -> {alias}"),
                    Err(e) => {
                        diags.push(alloc_diagnostic(&e).with_block(id.as_str()));
                        return diags;
                    }
                }
            }
        }
        diags
    }

    fn generate(&mut self) -> Vec<Diagnostic> {
        let graph = self.graph;
        let registry = self.registry;
        let mut diags = Vec::new();
        let order: Vec<String> = self.order().to_vec();
        for id in &order {
            let Some(block) = graph.block(id) else {
                continue;
            };
            let Some(kind) = registry.lookup(&block.type_tag) else {
                continue;
            };
            let mut bctx = BlockContext::new(&mut self.ctx, block, kind.descriptor());
            let result = kind.generate(&mut bctx);
            self.ctx.reset_scratch();
            self.blocks_processed += 1;
            match result {
                Ok(()) => log::trace!("generate: {id} ({})", block.type_tag),
                Err(e) => diags.push(generate_diagnostic(&e, id)),
            }
        }
        diags
    }

    fn encode(&mut self, encoder: &dyn Encoder) -> Vec<Diagnostic> {
        let target = &self.options.target;
        let out = encoder.encode(&self.text, target);
        let mut diags = Vec::new();
        for p in &out.problems {
            let message = format!("line {}: {}", p.line, p.message);
            diags.push(if p.fatal {
                Diagnostic::error(codes::E0500, message)
                    .with_hint("the generated program is malformed; this is a compiler bug")
            } else {
                Diagnostic::warning(codes::W0501, message)
            });
        }

        let used = out.real_instruction_count();
        let limit = target.instructions as usize;
        let ratio = self.options.near_capacity_ratio;
        if used > limit {
            diags.push(Diagnostic::error(
                codes::E0400,
                format!("program needs {used} instructions but the target holds {limit}"),
            ));
        } else if used as f64 > ratio * limit as f64 {
            diags.push(Diagnostic::warning(
                codes::W0400,
                format!("program uses {used} of {limit} instructions"),
            ));
        }
        let memory = self.ctx.memory_used();
        if f64::from(memory) > ratio * f64::from(target.memory) {
            diags.push(Diagnostic::warning(
                codes::W0401,
                format!("delay memory uses {memory} of {} words", target.memory),
            ));
        }
        self.encoded = Some(out);
        diags
    }

    fn statistics(&self) -> Statistics {
        Statistics {
            instructions_used: match &self.encoded {
                Some(out) => out.real_instruction_count(),
                None => self.ctx.sections().instruction_count(),
            },
            registers_used: self.ctx.registers_used(),
            memory_used: self.ctx.memory_used(),
            blocks_processed: self.blocks_processed,
        }
    }

    fn finish(self) -> CompileOutput {
        let statistics = self.statistics();
        let (errors, warnings): (Vec<_>, Vec<_>) =
            self.diagnostics.into_iter().partition(Diagnostic::is_error);
        CompileOutput {
            success: errors.is_empty(),
            assembly: self.text,
            statistics,
            errors,
            warnings,
            schedule: self.schedule,
        }
    }
}

// ── Diagnostic mapping ─────────────────────────────────────────────────────

fn alloc_diagnostic(e: &AllocError) -> Diagnostic {
    let code = match e {
        AllocError::RegistersExhausted { .. } => codes::E0401,
        AllocError::MemoryExhausted { .. } => codes::E0402,
        AllocError::LfosExhausted { .. } => codes::E0403,
        AllocError::DuplicateMemory(_) | AllocError::EmptyMemory(_) => codes::E0300,
    };
    Diagnostic::error(code, e.to_string())
}

fn generate_diagnostic(e: &GenerateError, block: &str) -> Diagnostic {
    let diag = match e {
        GenerateError::Alloc(inner) => alloc_diagnostic(inner),
        GenerateError::Template(_) => Diagnostic::error(codes::E0301, e.to_string()),
        GenerateError::UnknownParameter(_) | GenerateError::UnknownPort(_) => {
            Diagnostic::error(codes::E0300, e.to_string())
        }
    };
    Diagnostic {
        message: format!("block '{block}': {}", diag.message),
        ..diag
    }
    .with_block(block)
}

// ── Runner ─────────────────────────────────────────────────────────────────

/// Run the passes needed for `terminal`. Validation and scheduling errors
/// stop the run; later errors are collected and the run continues.
pub fn run_pipeline(
    graph: &Graph,
    registry: &BlockRegistry,
    options: &CompileOptions,
    encoder: &dyn Encoder,
    terminal: PassId,
    mut on_pass_complete: impl FnMut(PassId, &[Diagnostic]),
) -> CompileOutput {
    let mut state = CompilationState::new(graph, registry, options);
    for pass in required_passes(terminal) {
        let t = Instant::now();
        let diags = state.run_pass(pass, encoder);
        log::debug!(
            "{} complete, {:.1}ms",
            descriptor(pass).name,
            t.elapsed().as_secs_f64() * 1000.0
        );
        on_pass_complete(pass, &diags);
        let fatal = has_errors(&diags) && matches!(pass, PassId::Validate | PassId::Schedule);
        state.diagnostics.extend(diags);
        if fatal {
            break;
        }
    }
    state.finish()
}

/// Full compilation with the default pass set.
pub fn compile(
    graph: &Graph,
    registry: &BlockRegistry,
    options: &CompileOptions,
    encoder: &dyn Encoder,
) -> CompileOutput {
    run_pipeline(graph, registry, options, encoder, PassId::Encode, |_, _| {})
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TargetConfig;
    use crate::encoder::OpcodeEncoder;
    use crate::graph::Block;

    fn build(g: &Graph) -> CompileOutput {
        let registry = BlockRegistry::with_builtins().unwrap();
        compile(g, &registry, &CompileOptions::default(), &OpcodeEncoder)
    }

    fn passthrough() -> Graph {
        let mut g = Graph::new("Pass");
        g.add_block(Block::new("in", "input"))
            .add_block(Block::new("out", "output"))
            .connect("in", "left", "out", "left");
        g
    }

    #[test]
    fn passthrough_compiles() {
        let out = build(&passthrough());
        assert!(out.success, "{:?}", out.errors);
        assert_eq!(out.statistics.blocks_processed, 2);
        assert_eq!(out.statistics.registers_used, 1);
        assert!(out.assembly.contains("; Input Section"));
        assert!(out.assembly.contains("wrax  DACR, 0.0"));
    }

    #[test]
    fn structural_errors_stop_before_generation() {
        let mut g = passthrough();
        g.add_block(Block::new("x", "nonexistent"));
        let mut passes = Vec::new();
        let registry = BlockRegistry::with_builtins().unwrap();
        let out = run_pipeline(
            &g,
            &registry,
            &CompileOptions::default(),
            &OpcodeEncoder,
            PassId::Encode,
            |p, _| passes.push(p),
        );
        assert!(!out.success);
        assert_eq!(passes, vec![PassId::Validate]);
        assert!(out.has_error(codes::E0100));
        assert_eq!(out.statistics.blocks_processed, 0);
    }

    #[test]
    fn schedule_terminal_skips_codegen() {
        let registry = BlockRegistry::with_builtins().unwrap();
        let out = run_pipeline(
            &passthrough(),
            &registry,
            &CompileOptions::default(),
            &OpcodeEncoder,
            PassId::Schedule,
            |_, _| {},
        );
        assert!(out.assembly.is_empty());
        assert_eq!(out.schedule.unwrap().order, vec!["in", "out"]);
    }

    #[test]
    fn register_exhaustion_is_resource_error() {
        let mut g = Graph::new("t");
        g.add_block(Block::new("in", "input"));
        for i in 0..40 {
            let id = format!("g{i}");
            g.add_block(Block::new(id.as_str(), "gain"))
                .connect("in", "left", &id, "in");
        }
        let out = build(&g);
        assert!(!out.success);
        assert!(out.has_error(codes::E0401));
    }

    #[test]
    fn memory_exhaustion_names_block() {
        let mut g = Graph::new("t");
        g.add_block(Block::new("in", "input"));
        for id in ["a", "b"] {
            g.add_block(Block::new(id, "delay").with_param("time", 900.0))
                .connect("in", "left", id, "in");
        }
        let out = build(&g);
        let err = out.errors.iter().find(|d| d.code == Some(codes::E0402)).unwrap();
        assert_eq!(err.block.as_deref(), Some("b"));
        assert!(err.message.starts_with("block 'b':"));
    }

    #[test]
    fn disabled_optimizer_keeps_pairs() {
        let mut g = passthrough();
        g.add_block(Block::new("amp", "gain"));
        g.connections.clear();
        g.connect("in", "left", "amp", "in")
            .connect("amp", "out", "out", "left");
        let registry = BlockRegistry::with_builtins().unwrap();
        let options = CompileOptions {
            optimize: false,
            ..CompileOptions::default()
        };
        let out = compile(&g, &registry, &options, &OpcodeEncoder);
        assert!(out.success);
        assert!(!out.assembly.contains("[fwd]"));
        assert!(out.warnings.iter().all(|w| w.code != Some(codes::W0500)));
    }

    #[test]
    fn near_capacity_warns() {
        let registry = BlockRegistry::with_builtins().unwrap();
        let options = CompileOptions::with_target(TargetConfig {
            instructions: 4,
            ..TargetConfig::default()
        });
        // rdax ADCL / forwarded wrax in_left / wrax DACL / wrax DACR
        let out = compile(&passthrough(), &registry, &options, &OpcodeEncoder);
        assert!(out.success, "{:?}", out.errors);
        assert_eq!(out.statistics.instructions_used, 4);
        assert!(out.has_warning(codes::W0400));
    }

    #[test]
    fn provenance_is_stable() {
        let registry = BlockRegistry::with_builtins().unwrap();
        let a = compute_provenance("{}", &registry);
        let b = compute_provenance("{}", &registry);
        assert_eq!(a.graph_hash_hex(), b.graph_hash_hex());
        assert_eq!(a.registry_fingerprint_hex().len(), 64);
        assert_ne!(
            a.graph_hash_hex(),
            compute_provenance("{ }", &registry).graph_hash_hex()
        );
        assert!(a.to_json().contains("\"compiler_version\""));
    }
}
