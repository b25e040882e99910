// validate.rs — Structural validation of effect graphs
//
// Checks everything that can be decided without scheduling or generating
// code: block types exist, connections reference real blocks and ports in
// the right direction, connected ports agree on signal kind, no block feeds
// itself, and no input has more than one driver. Also emits the advisory
// warnings (unconnected required inputs, missing source/sink, parameters
// outside their declared range).
//
// Preconditions: none; any graph value is accepted.
// Postconditions: returns `ValidationResult`; the graph is never modified.
//                 An empty graph produces warnings only.
// Failure modes: structural problems produce `E01xx` error diagnostics.
// Side effects: none.

use std::collections::{HashMap, HashSet};

use crate::diag::codes;
use crate::diag::{DiagCode, Diagnostic};
use crate::graph::{Block, Connection, Endpoint, Graph};
use crate::registry::{BlockCategory, BlockDescriptor, BlockRegistry, Direction, PortSpec};

// ── Public types ────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationResult {
    pub fn is_ok(&self) -> bool {
        !crate::diag::has_errors(&self.diagnostics)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.is_error())
    }
}

pub fn validate(graph: &Graph, registry: &BlockRegistry) -> ValidationResult {
    let mut ctx = ValidateCtx::new(graph, registry);
    ctx.check_blocks();
    ctx.check_connections();
    ctx.check_drivers();
    ctx.check_required_inputs();
    ctx.check_parameters();
    ctx.check_endpoints();
    log::debug!(
        "validate: {} block(s), {} connection(s), {} diagnostic(s)",
        graph.blocks.len(),
        graph.connections.len(),
        ctx.diagnostics.len()
    );
    ValidationResult {
        diagnostics: ctx.diagnostics,
    }
}

// ── Internal context ────────────────────────────────────────────────────────

struct ValidateCtx<'a> {
    graph: &'a Graph,
    registry: &'a BlockRegistry,
    /// First block declared under each id.
    blocks: HashMap<&'a str, &'a Block>,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> ValidateCtx<'a> {
    fn new(graph: &'a Graph, registry: &'a BlockRegistry) -> Self {
        let mut blocks = HashMap::new();
        for block in &graph.blocks {
            blocks.entry(block.id.as_str()).or_insert(block);
        }
        ValidateCtx {
            graph,
            registry,
            blocks,
            diagnostics: Vec::new(),
        }
    }

    fn error(&mut self, code: DiagCode, message: String) -> &mut Diagnostic {
        self.diagnostics.push(Diagnostic::error(code, message));
        let last = self.diagnostics.len() - 1;
        &mut self.diagnostics[last]
    }

    fn warning(&mut self, code: DiagCode, message: String) -> &mut Diagnostic {
        self.diagnostics.push(Diagnostic::warning(code, message));
        let last = self.diagnostics.len() - 1;
        &mut self.diagnostics[last]
    }

    fn descriptor_of(&self, block_id: &str) -> Option<&'a BlockDescriptor> {
        let registry = self.registry;
        self.blocks
            .get(block_id)
            .and_then(|b| registry.descriptor(&b.type_tag))
    }

    // ── Blocks ──────────────────────────────────────────────────────────

    fn check_blocks(&mut self) {
        let graph = self.graph;
        let mut seen = HashSet::new();
        for block in &graph.blocks {
            if !seen.insert(block.id.as_str()) {
                let d = self.error(codes::E0107, format!("duplicate block id '{}'", block.id));
                d.block = Some(block.id.clone());
            }
            if self.registry.lookup(&block.type_tag).is_none() {
                let d = self.error(
                    codes::E0100,
                    format!("block '{}' has unknown type '{}'", block.id, block.type_tag),
                );
                d.block = Some(block.id.clone());
            }
        }
    }

    // ── Connections ─────────────────────────────────────────────────────

    fn check_connections(&mut self) {
        let graph = self.graph;
        for conn in &graph.connections {
            if conn.from.block == conn.to.block {
                let d = self.error(
                    codes::E0104,
                    format!(
                        "connection {} connects block '{}' to itself",
                        conn.id, conn.from.block
                    ),
                );
                d.block = Some(conn.from.block.clone());
                d.connection = Some(conn.id.clone());
                d.hint = Some("route feedback through another block".to_string());
                continue;
            }
            let from = self.resolve_port(conn, &conn.from.block, &conn.from.port, Direction::Output);
            let to = self.resolve_port(conn, &conn.to.block, &conn.to.port, Direction::Input);
            if let (Some(from), Some(to)) = (from, to) {
                if from.kind != to.kind {
                    let d = self.error(
                        codes::E0105,
                        format!(
                            "connection {}: {} ({}) cannot drive {} ({})",
                            conn.id, conn.from, from.kind, conn.to, to.kind
                        ),
                    );
                    d.connection = Some(conn.id.clone());
                }
            }
        }
    }

    /// Look up one endpoint's port, reporting missing blocks, missing ports
    /// and ports used against their direction. Blocks of unknown type were
    /// already reported and resolve to `None` silently.
    fn resolve_port(
        &mut self,
        conn: &Connection,
        block_id: &str,
        port_id: &str,
        direction: Direction,
    ) -> Option<&'a PortSpec> {
        if !self.blocks.contains_key(block_id) {
            let d = self.error(
                codes::E0101,
                format!("connection {} references missing block '{}'", conn.id, block_id),
            );
            d.connection = Some(conn.id.clone());
            return None;
        }
        let descriptor = self.descriptor_of(block_id)?;
        if let Some(port) = descriptor.port(port_id, direction) {
            return Some(port);
        }
        let opposite = match direction {
            Direction::Input => Direction::Output,
            Direction::Output => Direction::Input,
        };
        let d = if descriptor.port(port_id, opposite).is_some() {
            let role = match direction {
                Direction::Input => "an output, not an input",
                Direction::Output => "an input, not an output",
            };
            self.error(
                codes::E0103,
                format!("connection {}: port '{block_id}.{port_id}' is {role}", conn.id),
            )
        } else {
            self.error(
                codes::E0102,
                format!(
                    "connection {}: block '{}' ({}) has no port '{}'",
                    conn.id, block_id, descriptor.type_tag, port_id
                ),
            )
        };
        d.block = Some(block_id.to_string());
        d.connection = Some(conn.id.clone());
        None
    }

    /// Every input endpoint may have at most one driver; all offending
    /// sources are listed.
    fn check_drivers(&mut self) {
        let graph = self.graph;
        let mut drivers: Vec<(&Endpoint, Vec<&Connection>)> = Vec::new();
        for conn in &graph.connections {
            match drivers.iter_mut().find(|(to, _)| **to == conn.to) {
                Some((_, list)) => list.push(conn),
                None => drivers.push((&conn.to, vec![conn])),
            }
        }
        for (to, list) in drivers {
            if list.len() < 2 {
                continue;
            }
            let sources: Vec<String> = list
                .iter()
                .map(|c| format!("{} ({})", c.from, c.id))
                .collect();
            let d = self.error(
                codes::E0106,
                format!(
                    "input {} has {} drivers: {}",
                    to,
                    list.len(),
                    sources.join(", ")
                ),
            );
            d.block = Some(to.block.clone());
            d.hint = Some("insert a mixer to combine signals".to_string());
        }
    }

    // ── Advisory checks ─────────────────────────────────────────────────

    fn check_required_inputs(&mut self) {
        let (graph, registry) = (self.graph, self.registry);
        let connected: HashSet<(&str, &str)> = graph
            .connections
            .iter()
            .map(|c| (c.to.block.as_str(), c.to.port.as_str()))
            .collect();
        for block in &graph.blocks {
            let Some(descriptor) = registry.descriptor(&block.type_tag) else {
                continue;
            };
            for port in descriptor.inputs.iter().filter(|p| p.required) {
                if !connected.contains(&(block.id.as_str(), port.id.as_str())) {
                    let d = self.warning(
                        codes::W0100,
                        format!(
                            "block '{}' ({}): required input '{}' is not connected",
                            block.id, descriptor.name, port.id
                        ),
                    );
                    d.block = Some(block.id.clone());
                }
            }
        }
    }

    fn check_parameters(&mut self) {
        let (graph, registry) = (self.graph, self.registry);
        for block in &graph.blocks {
            let Some(descriptor) = registry.descriptor(&block.type_tag) else {
                continue;
            };
            for (name, &value) in &block.parameters {
                let d = match descriptor.param(name) {
                    None => self.warning(
                        codes::W0105,
                        format!("block '{}' has unknown parameter '{}'", block.id, name),
                    ),
                    Some(p) if value < p.min || value > p.max || !value.is_finite() => self.warning(
                        codes::W0104,
                        format!(
                            "block '{}': parameter '{}' = {} is outside {}..{}, clamped",
                            block.id, name, value, p.min, p.max
                        ),
                    ),
                    Some(_) => continue,
                };
                d.block = Some(block.id.clone());
            }
        }
    }

    fn check_endpoints(&mut self) {
        if self.graph.is_empty() {
            self.warning(codes::W0103, "graph is empty".to_string());
        }
        let has = |category: BlockCategory| {
            self.graph.blocks.iter().any(|b| {
                self.registry
                    .descriptor(&b.type_tag)
                    .is_some_and(|d| d.category == category)
            })
        };
        let (has_sink, has_source) = (has(BlockCategory::Sink), has(BlockCategory::Source));
        if !has_sink {
            self.warning(codes::W0101, "graph has no output block; nothing reaches the DACs".to_string());
        }
        if !has_source {
            self.warning(codes::W0102, "graph has no input block; the ADCs are never read".to_string());
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
