// graph.rs — Block graph model for effect programs
//
// Immutable value types describing a visual dataflow graph: blocks with
// parameters, output→input connections, and presentation-only metadata.
// `GraphIndex` adds an arena+index view (block positions, per-block
// incoming/outgoing connection lists, per-output fan-out) that the
// validator, scheduler and allocator share.
//
// Preconditions: none; the graph is caller-supplied and may be invalid.
// Postconditions: `GraphIndex::build` never fails; connections naming
//                 unknown blocks are simply left out of the adjacency lists.
// Failure modes: `Graph::load` / `Graph::from_json` return `LoadError`.
// Side effects: `Graph::load` reads one file.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ── Public types ────────────────────────────────────────────────────────────

/// Canvas coordinates. Preserved for round-tripping, never used by codegen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// One block instance on the canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub id: String,
    /// Registry key selecting the block implementation.
    #[serde(rename = "type")]
    pub type_tag: String,
    #[serde(default)]
    pub position: Position,
    /// Parameter values in display units (dB, Hz, ms, ...).
    #[serde(default)]
    pub parameters: BTreeMap<String, f64>,
}

impl Block {
    pub fn new(id: impl Into<String>, type_tag: impl Into<String>) -> Self {
        Block {
            id: id.into(),
            type_tag: type_tag.into(),
            position: Position::default(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: f64) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }
}

/// A (block, port) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Endpoint {
    pub block: String,
    pub port: String,
}

impl Endpoint {
    pub fn new(block: impl Into<String>, port: impl Into<String>) -> Self {
        Endpoint {
            block: block.into(),
            port: port.into(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.block, self.port)
    }
}

/// A directed output→input wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub id: String,
    pub from: Endpoint,
    pub to: Endpoint,
}

/// Presentation metadata; only `name`, `author` and `description` reach the
/// generated banner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanvasState {
    #[serde(default = "default_zoom")]
    pub zoom: f64,
    #[serde(default)]
    pub pan: Position,
}

impl Default for CanvasState {
    fn default() -> Self {
        CanvasState {
            zoom: default_zoom(),
            pan: Position::default(),
        }
    }
}

fn default_zoom() -> f64 {
    1.0
}

fn default_version() -> String {
    "1.0".to_string()
}

/// The complete graph snapshot handed to the compiler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub canvas: CanvasState,
    #[serde(default)]
    pub blocks: Vec<Block>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

/// Errors from reading a graph or target description.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{}: invalid JSON: {source}", path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

// ── Construction ────────────────────────────────────────────────────────────

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Graph {
            version: default_version(),
            metadata: Metadata {
                name: name.into(),
                ..Metadata::default()
            },
            canvas: CanvasState::default(),
            blocks: Vec::new(),
            connections: Vec::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let text = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| LoadError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> String {
        // Graph contains only strings, maps and finite floats.
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    pub fn add_block(&mut self, block: Block) -> &mut Self {
        self.blocks.push(block);
        self
    }

    /// Append a connection with a generated id (`c<N>`).
    pub fn connect(
        &mut self,
        from_block: &str,
        from_port: &str,
        to_block: &str,
        to_port: &str,
    ) -> &mut Self {
        let id = format!("c{}", self.connections.len());
        self.connections.push(Connection {
            id,
            from: Endpoint::new(from_block, from_port),
            to: Endpoint::new(to_block, to_port),
        });
        self
    }

    pub fn block(&self, id: &str) -> Option<&Block> {
        self.blocks.iter().find(|b| b.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

// ── Index ───────────────────────────────────────────────────────────────────

/// Arena+index view over a `Graph`: blocks are addressed by their position
/// in `graph.blocks`, connections by their position in `graph.connections`.
#[derive(Debug, Clone, Default)]
pub struct GraphIndex {
    block_pos: HashMap<String, usize>,
    /// Per block: indices of connections leaving it, in declaration order.
    outgoing: Vec<Vec<usize>>,
    /// Per block: indices of connections entering it, in declaration order.
    incoming: Vec<Vec<usize>>,
    fan_out: HashMap<Endpoint, usize>,
    driver: HashMap<Endpoint, usize>,
}

impl GraphIndex {
    pub fn build(graph: &Graph) -> Self {
        let mut index = GraphIndex {
            outgoing: vec![Vec::new(); graph.blocks.len()],
            incoming: vec![Vec::new(); graph.blocks.len()],
            ..GraphIndex::default()
        };
        for (i, block) in graph.blocks.iter().enumerate() {
            // First declaration wins for duplicate ids; the validator reports them.
            index.block_pos.entry(block.id.clone()).or_insert(i);
        }
        for (ci, conn) in graph.connections.iter().enumerate() {
            let src = index.block_pos.get(&conn.from.block).copied();
            let dst = index.block_pos.get(&conn.to.block).copied();
            if let (Some(src), Some(dst)) = (src, dst) {
                index.outgoing[src].push(ci);
                index.incoming[dst].push(ci);
                *index.fan_out.entry(conn.from.clone()).or_insert(0) += 1;
                index.driver.entry(conn.to.clone()).or_insert(ci);
            }
        }
        index
    }

    pub fn position(&self, block_id: &str) -> Option<usize> {
        self.block_pos.get(block_id).copied()
    }

    pub fn outgoing(&self, block_pos: usize) -> &[usize] {
        self.outgoing.get(block_pos).map_or(&[], Vec::as_slice)
    }

    pub fn incoming(&self, block_pos: usize) -> &[usize] {
        self.incoming.get(block_pos).map_or(&[], Vec::as_slice)
    }

    /// Count of connections sourced from an output endpoint.
    pub fn out_degree(&self, endpoint: &Endpoint) -> usize {
        self.fan_out.get(endpoint).copied().unwrap_or(0)
    }

    /// The connection driving an input endpoint (the first one, if several).
    pub fn driver<'g>(&self, graph: &'g Graph, input: &Endpoint) -> Option<&'g Connection> {
        self.driver
            .get(input)
            .and_then(|&ci| graph.connections.get(ci))
    }

    /// All output endpoints that have at least one consumer, in first-use order.
    pub fn connected_outputs<'g>(&self, graph: &'g Graph) -> Vec<&'g Endpoint> {
        let mut seen = std::collections::HashSet::new();
        graph
            .connections
            .iter()
            .filter(|c| self.fan_out.contains_key(&c.from))
            .filter(|c| seen.insert(&c.from))
            .map(|c| &c.from)
            .collect()
    }
}

// ── Display ─────────────────────────────────────────────────────────────────

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Graph '{}' ({} blocks, {} connections)",
            self.metadata.name,
            self.blocks.len(),
            self.connections.len()
        )?;
        for block in &self.blocks {
            writeln!(f, "  block '{}': {}", block.id, block.type_tag)?;
        }
        for conn in &self.connections {
            writeln!(f, "  {}: {} -> {}", conn.id, conn.from, conn.to)?;
        }
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
