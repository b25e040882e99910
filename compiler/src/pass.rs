// pass.rs — Pass descriptors: metadata, dependency resolution, artifact IDs
//
// Declares the compiler's passes (graph loading is outside the runner),
// their dependency edges, and the artifacts they produce. The pipeline uses
// `required_passes` to stop as soon as the artifact an --emit target needs
// is available.

use std::collections::HashSet;

// ── Pass and Artifact identifiers ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    Validate,
    Schedule,
    Allocate,
    Generate,
    Elide,
    Assemble,
    Optimize,
    Encode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactId {
    Validation, // ValidationResult
    Order,      // Schedule
    Aliases,    // CodegenContext (stable registers)
    Sections,   // SectionLists
    Text,       // assembly text
    Words,      // EncodeOutput
}

// ── Pass descriptor ────────────────────────────────────────────────────────

pub struct PassDescriptor {
    pub name: &'static str,
    pub inputs: &'static [PassId],
    pub outputs: &'static [ArtifactId],
    /// Pre/post conditions (documentation only).
    pub invariants: &'static str,
}

pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::Validate => PassDescriptor {
            name: "validate",
            inputs: &[],
            outputs: &[ArtifactId::Validation],
            invariants: "every block type known, every connection well-formed",
        },
        PassId::Schedule => PassDescriptor {
            name: "schedule",
            inputs: &[PassId::Validate],
            outputs: &[ArtifactId::Order],
            invariants: "same-tick producers precede consumers",
        },
        PassId::Allocate => PassDescriptor {
            name: "allocate",
            inputs: &[PassId::Schedule],
            outputs: &[ArtifactId::Aliases],
            invariants: "every connected output has a stable alias",
        },
        PassId::Generate => PassDescriptor {
            name: "generate",
            inputs: &[PassId::Allocate],
            outputs: &[ArtifactId::Sections],
            invariants: "blocks generated in schedule order, scratch reset between blocks",
        },
        PassId::Elide => PassDescriptor {
            name: "elide",
            inputs: &[PassId::Generate],
            outputs: &[ArtifactId::Sections],
            invariants: "only loads of resident or just-written registers removed",
        },
        PassId::Assemble => PassDescriptor {
            name: "assemble",
            inputs: &[PassId::Elide],
            outputs: &[ArtifactId::Text],
            invariants: "banner, declarations, non-empty sections",
        },
        PassId::Optimize => PassDescriptor {
            name: "optimize",
            inputs: &[PassId::Assemble],
            outputs: &[ArtifactId::Text],
            invariants: "accumulator clear at main entry",
        },
        PassId::Encode => PassDescriptor {
            name: "encode",
            inputs: &[PassId::Optimize],
            outputs: &[ArtifactId::Words],
            invariants: "real instruction count within the ceiling",
        },
    }
}

// ── Dependency resolution ──────────────────────────────────────────────────

pub const ALL_PASSES: [PassId; 8] = [
    PassId::Validate,
    PassId::Schedule,
    PassId::Allocate,
    PassId::Generate,
    PassId::Elide,
    PassId::Assemble,
    PassId::Optimize,
    PassId::Encode,
];

/// Compute the minimal ordered set of passes needed to produce `terminal`.
/// Returns passes in topological (execution) order.
pub fn required_passes(terminal: PassId) -> Vec<PassId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(terminal, &mut visited, &mut order);
    order
}

fn visit(id: PassId, visited: &mut HashSet<PassId>, order: &mut Vec<PassId>) {
    if !visited.insert(id) {
        return;
    }
    for &dep in descriptor(id).inputs {
        visit(dep, visited, order);
    }
    order.push(id);
}

// ── Tests ──────────────────────────────────────────────────────────────────
