// dot.rs — Graphviz DOT output for effect graphs
//
// Renders blocks as nodes colored by category and connections as edges
// labelled with their ports. Connections the scheduler reclassified as
// previous-tick are drawn dashed and excluded from rank constraints.
//
// Preconditions: none; unknown block types render uncolored.
// Postconditions: returns a valid DOT string; output order follows
//                 block and connection declaration order.
// Failure modes: none (pure string formatting).
// Side effects: none.

use std::fmt::Write;

use crate::graph::Graph;
use crate::registry::{BlockCategory, BlockRegistry, SignalKind};
use crate::schedule::Schedule;

/// Emit the graph as a Graphviz DOT string.
pub fn emit_dot(graph: &Graph, registry: &BlockRegistry, schedule: Option<&Schedule>) -> String {
    let mut buf = String::new();
    let _ = writeln!(buf, "digraph fx {{");
    let _ = writeln!(buf, "    rankdir=LR;");
    let _ = writeln!(buf, "    node [fontname=\"Helvetica\", fontsize=10];");
    let _ = writeln!(buf, "    edge [fontname=\"Helvetica\", fontsize=9];");
    if !graph.metadata.name.is_empty() {
        let _ = writeln!(buf, "    label=\"{}\";", escape(&graph.metadata.name));
    }
    let _ = writeln!(buf);

    for block in &graph.blocks {
        let descriptor = registry.descriptor(&block.type_tag);
        let (shape, color) = match descriptor.map(|d| d.category) {
            Some(BlockCategory::Source) => ("invhouse", "lightgreen"),
            Some(BlockCategory::Sink) => ("house", "lightsalmon"),
            Some(BlockCategory::Control) => ("ellipse", "lightyellow"),
            Some(BlockCategory::Effect) => ("box", "lightblue"),
            Some(BlockCategory::Utility) => ("box", "gray90"),
            None => ("box", "white"),
        };
        let _ = writeln!(
            buf,
            "    {} [shape={shape}, style=filled, fillcolor={color}, label=\"{}\\n{}\"];",
            node_id(&block.id),
            escape(&block.id),
            escape(&block.type_tag),
        );
    }

    if !graph.connections.is_empty() {
        let _ = writeln!(buf);
    }
    for c in &graph.connections {
        let mut attrs = vec![format!(
            "label=\"{} → {}\"",
            escape(&c.from.port),
            escape(&c.to.port)
        )];
        let is_control = graph
            .block(&c.from.block)
            .and_then(|b| registry.descriptor(&b.type_tag))
            .and_then(|d| d.output(&c.from.port))
            .is_some_and(|p| p.kind == SignalKind::Control);
        if is_control {
            attrs.push("color=darkgoldenrod".to_string());
        }
        if schedule.is_some_and(|s| s.is_feedback(&c.id)) {
            attrs.push("style=dashed, color=red, constraint=false".to_string());
        }
        let _ = writeln!(
            buf,
            "    {} -> {} [{}];",
            node_id(&c.from.block),
            node_id(&c.to.block),
            attrs.join(", ")
        );
    }

    let _ = writeln!(buf, "}}");
    buf
}

// ── Helpers ─────────────────────────────────────────────────────────────────

/// Block ids are arbitrary strings; quote them as DOT ids.
fn node_id(id: &str) -> String {
    format!("\"b_{}\"", escape(id))
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Block, GraphIndex};
    use crate::schedule::schedule;

    fn registry() -> BlockRegistry {
        BlockRegistry::with_builtins().unwrap()
    }

    #[test]
    fn nodes_and_edges_render() {
        let mut g = Graph::new("Demo");
        g.add_block(Block::new("in", "input"))
            .add_block(Block::new("out", "output"))
            .connect("in", "left", "out", "left");
        let dot = emit_dot(&g, &registry(), None);
        assert!(dot.starts_with("digraph fx {"));
        assert!(dot.contains("label=\"Demo\";"));
        assert!(dot.contains("\"b_in\" [shape=invhouse"));
        assert!(dot.contains("\"b_in\" -> \"b_out\" [label=\"left → left\"];"));
        assert!(dot.trim_end().ends_with('}'));
    }

    #[test]
    fn feedback_edges_are_dashed() {
        let mut g = Graph::new("t");
        g.add_block(Block::new("a", "gain"))
            .add_block(Block::new("b", "gain"))
            .connect("a", "out", "b", "in")
            .connect("b", "out", "a", "in");
        let s = schedule(&g, &GraphIndex::build(&g)).schedule;
        let dot = emit_dot(&g, &registry(), Some(&s));
        let back: Vec<&str> = dot.lines().filter(|l| l.contains("style=dashed")).collect();
        assert_eq!(back.len(), 1);
        assert!(back[0].contains("\"b_b\" -> \"b_a\""));
    }

    #[test]
    fn control_edges_are_colored() {
        let mut g = Graph::new("t");
        g.add_block(Block::new("knob", "pot"))
            .add_block(Block::new("vol", "volume"))
            .connect("knob", "value", "vol", "level");
        assert!(emit_dot(&g, &registry(), None).contains("color=darkgoldenrod"));
    }

    #[test]
    fn quotes_are_escaped() {
        let mut g = Graph::new("say \"hi\"");
        g.add_block(Block::new("a\"b", "mystery"));
        let dot = emit_dot(&g, &registry(), None);
        assert!(dot.contains("label=\"say \\\"hi\\\"\";"));
        assert!(dot.contains("\"b_a\\\"b\" [shape=box, style=filled, fillcolor=white"));
    }
}
