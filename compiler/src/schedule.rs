// schedule.rs — Per-tick execution order for effect graphs
//
// The chip runs the whole program once per sample and registers persist
// across samples, so every connection is either same-tick (the consumer
// needs this sample's value and must run after the producer) or
// previous-tick (the consumer reads whatever the producer left behind last
// sample). Feedback loops are expressed with previous-tick connections.
//
// A depth-first walk in block declaration order marks every connection that
// closes a cycle as previous-tick; Kahn's algorithm then orders the
// remaining same-tick edges, always releasing the earliest-declared ready
// block first. If blocks are still stuck, the earliest one has its
// remaining incoming edges reclassified and the sort continues. A hard
// iteration cap turns any residual failure into an error rather than a hang.
//
// Preconditions: `graph` passed validation; `index` was built from it.
// Postconditions: `order` lists every block exactly once; every same-tick
//                 connection has its producer before its consumer.
// Failure modes: iteration cap exceeded → `E0200` with the partial order.
// Side effects: none.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap};
use std::fmt;

use crate::diag::codes;
use crate::diag::Diagnostic;
use crate::graph::{Endpoint, Graph, GraphIndex};

// ── Public types ────────────────────────────────────────────────────────────

/// A connection read one tick late.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackEdge {
    pub connection: String,
    pub from: Endpoint,
    pub to: Endpoint,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schedule {
    /// Block ids in execution order.
    pub order: Vec<String>,
    /// Connections reclassified as previous-tick, in declaration order.
    pub feedback: Vec<FeedbackEdge>,
}

impl Schedule {
    pub fn is_feedback(&self, connection_id: &str) -> bool {
        self.feedback.iter().any(|f| f.connection == connection_id)
    }
}

#[derive(Debug)]
pub struct ScheduleResult {
    pub schedule: Schedule,
    pub diagnostics: Vec<Diagnostic>,
}

pub fn schedule(graph: &Graph, index: &GraphIndex) -> ScheduleResult {
    let edges = adjacency(graph, index);
    let incoming = incoming_sources(graph, index);
    let mut feedback = back_edges(&edges);
    for &ci in &feedback {
        let c = &graph.connections[ci];
        log::debug!("feedback connection {}: {} -> {} (previous tick)", c.id, c.from, c.to);
    }
    let (order, diagnostic) = linearize(&edges, &incoming, &mut feedback);

    let schedule = Schedule {
        order: order.iter().map(|&u| graph.blocks[u].id.clone()).collect(),
        feedback: feedback
            .iter()
            .map(|&ci| {
                let c = &graph.connections[ci];
                FeedbackEdge {
                    connection: c.id.clone(),
                    from: c.from.clone(),
                    to: c.to.clone(),
                }
            })
            .collect(),
    };
    ScheduleResult {
        schedule,
        diagnostics: diagnostic.into_iter().collect(),
    }
}

// ── Graph views ─────────────────────────────────────────────────────────────

/// Per block: `(connection index, target block)` in declaration order.
/// Self-loops are dropped; the validator rejects them.
type Adjacency = Vec<Vec<(usize, usize)>>;

fn adjacency(graph: &Graph, index: &GraphIndex) -> Adjacency {
    (0..graph.blocks.len())
        .map(|u| {
            index
                .outgoing(u)
                .iter()
                .filter_map(|&ci| {
                    let v = index.position(&graph.connections[ci].to.block)?;
                    (v != u).then_some((ci, v))
                })
                .collect()
        })
        .collect()
}

/// Per block: `(connection index, source block)` in declaration order.
fn incoming_sources(graph: &Graph, index: &GraphIndex) -> Adjacency {
    (0..graph.blocks.len())
        .map(|v| {
            index
                .incoming(v)
                .iter()
                .filter_map(|&ci| {
                    let u = index.position(&graph.connections[ci].from.block)?;
                    (u != v).then_some((ci, u))
                })
                .collect()
        })
        .collect()
}

// ── Back-edge identification ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    New,
    Active,
    Done,
}

/// Connections that close a cycle in a depth-first walk rooted at each
/// unvisited block in declaration order.
fn back_edges(edges: &Adjacency) -> BTreeSet<usize> {
    let n = edges.len();
    let mut state = vec![Visit::New; n];
    let mut back = BTreeSet::new();
    for root in 0..n {
        if state[root] != Visit::New {
            continue;
        }
        state[root] = Visit::Active;
        // (block, next outgoing edge to follow)
        let mut stack = vec![(root, 0usize)];
        while let Some(top) = stack.last_mut() {
            let (u, cursor) = *top;
            let Some(&(ci, v)) = edges[u].get(cursor) else {
                state[u] = Visit::Done;
                stack.pop();
                continue;
            };
            top.1 += 1;
            match state[v] {
                Visit::New => {
                    state[v] = Visit::Active;
                    stack.push((v, 0));
                }
                Visit::Active => {
                    back.insert(ci);
                }
                Visit::Done => {}
            }
        }
    }
    back
}

// ── Ordering ────────────────────────────────────────────────────────────────

/// Kahn's algorithm over non-feedback edges with an insertion-order ready
/// set. Stuck blocks are released by reclassifying their pending incoming
/// edges into `feedback`.
fn linearize(
    edges: &Adjacency,
    incoming: &Adjacency,
    feedback: &mut BTreeSet<usize>,
) -> (Vec<usize>, Option<Diagnostic>) {
    let n = edges.len();
    let mut indegree = vec![0usize; n];
    for out in edges {
        for &(ci, v) in out {
            if !feedback.contains(&ci) {
                indegree[v] += 1;
            }
        }
    }
    let mut ready: BinaryHeap<Reverse<usize>> = (0..n)
        .filter(|&u| indegree[u] == 0)
        .map(Reverse)
        .collect();
    let mut scheduled = vec![false; n];
    let mut order = Vec::with_capacity(n);
    let cap = 2 * n + 1;
    let mut iterations = 0;

    while order.len() < n {
        iterations += 1;
        if iterations > cap {
            let diag = Diagnostic::error(
                codes::E0200,
                format!(
                    "cannot order blocks: {} of {} scheduled after {} iterations",
                    order.len(),
                    n,
                    cap
                ),
            );
            return (order, Some(diag));
        }
        let u = match ready.pop() {
            Some(Reverse(u)) => u,
            None => {
                let Some(stuck) = (0..n).find(|&u| !scheduled[u]) else {
                    break;
                };
                for &(ci, src) in &incoming[stuck] {
                    if !scheduled[src] && feedback.insert(ci) {
                        log::warn!("relaxed connection #{ci} into block #{stuck} to break a cycle");
                    }
                }
                indegree[stuck] = 0;
                stuck
            }
        };
        if scheduled[u] {
            continue;
        }
        scheduled[u] = true;
        order.push(u);
        for &(ci, v) in &edges[u] {
            if feedback.contains(&ci) || scheduled[v] {
                continue;
            }
            indegree[v] = indegree[v].saturating_sub(1);
            if indegree[v] == 0 {
                ready.push(Reverse(v));
            }
        }
    }
    (order, None)
}

// ── Display ─────────────────────────────────────────────────────────────────

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, id) in self.order.iter().enumerate() {
            writeln!(f, "{:>3}. {}", i + 1, id)?;
        }
        for fb in &self.feedback {
            writeln!(
                f,
                "feedback {}: {} -> {} (previous tick)",
                fb.connection, fb.from, fb.to
            )?;
        }
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Block;

    fn run(g: &Graph) -> ScheduleResult {
        schedule(g, &GraphIndex::build(g))
    }

    fn order(g: &Graph) -> Vec<String> {
        let r = run(g);
        assert!(r.diagnostics.is_empty(), "{:?}", r.diagnostics);
        r.schedule.order
    }

    #[test]
    fn linear_chain_follows_dependencies() {
        let mut g = Graph::new("t");
        g.add_block(Block::new("out", "output"))
            .add_block(Block::new("amp", "gain"))
            .add_block(Block::new("in", "input"))
            .connect("in", "left", "amp", "in")
            .connect("amp", "out", "out", "left");
        assert_eq!(order(&g), vec!["in", "amp", "out"]);
    }

    #[test]
    fn independent_blocks_keep_declaration_order() {
        let mut g = Graph::new("t");
        g.add_block(Block::new("c", "gain"))
            .add_block(Block::new("a", "gain"))
            .add_block(Block::new("b", "gain"));
        assert_eq!(order(&g), vec!["c", "a", "b"]);
    }

    #[test]
    fn diamond_breaks_ties_by_declaration() {
        let mut g = Graph::new("t");
        g.add_block(Block::new("src", "input"))
            .add_block(Block::new("right", "gain"))
            .add_block(Block::new("left", "gain"))
            .add_block(Block::new("mix", "mixer"))
            .connect("src", "left", "left", "in")
            .connect("src", "left", "right", "in")
            .connect("left", "out", "mix", "in1")
            .connect("right", "out", "mix", "in2");
        assert_eq!(order(&g), vec!["src", "right", "left", "mix"]);
    }

    #[test]
    fn two_block_feedback_cycle_is_relaxed() {
        let mut g = Graph::new("t");
        g.add_block(Block::new("in", "input"))
            .add_block(Block::new("mix", "mixer"))
            .add_block(Block::new("echo", "delay"))
            .add_block(Block::new("out", "output"))
            .connect("in", "left", "mix", "in1")
            .connect("mix", "out", "echo", "in")
            .connect("echo", "out", "mix", "in2")
            .connect("mix", "out", "out", "left");
        let r = run(&g);
        assert!(r.diagnostics.is_empty());
        assert_eq!(r.schedule.order, vec!["in", "mix", "echo", "out"]);
        assert_eq!(r.schedule.feedback.len(), 1);
        assert_eq!(r.schedule.feedback[0].connection, "c2");
        assert!(r.schedule.is_feedback("c2"));
    }

    #[test]
    fn three_block_ring_has_one_feedback_edge() {
        let mut g = Graph::new("t");
        g.add_block(Block::new("a", "gain"))
            .add_block(Block::new("b", "gain"))
            .add_block(Block::new("c", "gain"))
            .connect("a", "out", "b", "in")
            .connect("b", "out", "c", "in")
            .connect("c", "out", "a", "in");
        let r = run(&g);
        assert_eq!(r.schedule.order, vec!["a", "b", "c"]);
        assert_eq!(r.schedule.feedback.len(), 1);
        assert_eq!(r.schedule.feedback[0].connection, "c2");
    }

    #[test]
    fn stuck_blocks_are_released_in_declaration_order() {
        // 0 -> 1 -> 0 with no back edge pre-marked.
        let edges: Adjacency = vec![vec![(0, 1)], vec![(1, 0)]];
        let incoming: Adjacency = vec![vec![(1, 1)], vec![(0, 0)]];
        let mut feedback = BTreeSet::new();
        let (order, diag) = linearize(&edges, &incoming, &mut feedback);
        assert!(diag.is_none());
        assert_eq!(order, vec![0, 1]);
        assert_eq!(feedback.into_iter().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn display_lists_order_and_feedback() {
        let mut g = Graph::new("t");
        g.add_block(Block::new("a", "gain"))
            .add_block(Block::new("b", "gain"))
            .connect("a", "out", "b", "in")
            .connect("b", "out", "a", "in");
        let text = run(&g).schedule.to_string();
        assert!(text.contains("  1. a"));
        assert!(text.contains("feedback c1: b.out -> a.in (previous tick)"));
    }
}
