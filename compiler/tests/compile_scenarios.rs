// End-to-end compilation scenarios.
//
// Each test builds a graph in memory, runs the full pipeline with the
// built-in block library and encoder, and checks the observable result:
// success flag, diagnostics, statistics and assembly text.

use fxc::alloc::CodegenContext;
use fxc::config::{CompileOptions, TargetConfig};
use fxc::diag::codes;
use fxc::encoder::{EncodeOutput, Encoder, OpcodeEncoder, NOP_WORD};
use fxc::graph::{Block, Endpoint, Graph, GraphIndex};
use fxc::pipeline::{compile, CompileOutput};
use fxc::registry::BlockRegistry;

// ── Helpers ─────────────────────────────────────────────────────────────────

fn build(g: &Graph) -> CompileOutput {
    let registry = BlockRegistry::with_builtins().expect("builtins register");
    compile(g, &registry, &CompileOptions::default(), &OpcodeEncoder)
}

/// Reports a fixed number of real instructions regardless of the text.
struct FixedCountEncoder(usize);

impl Encoder for FixedCountEncoder {
    fn encode(&self, _text: &str, _target: &TargetConfig) -> EncodeOutput {
        EncodeOutput {
            words: vec![0x0000_0004; self.0],
            problems: Vec::new(),
        }
    }
}

/// Flags every program as malformed.
struct RejectingEncoder;

impl Encoder for RejectingEncoder {
    fn encode(&self, _text: &str, target: &TargetConfig) -> EncodeOutput {
        EncodeOutput {
            words: vec![NOP_WORD; target.instructions as usize],
            problems: vec![fxc::encoder::EncodeProblem {
                line: 7,
                message: "bad operand".to_string(),
                fatal: true,
            }],
        }
    }
}

fn feedback_echo() -> Graph {
    let mut g = Graph::new("Echo");
    g.add_block(Block::new("in", "input"))
        .add_block(Block::new("mix", "mixer"))
        .add_block(Block::new("echo", "delay").with_param("time", 250.0))
        .add_block(Block::new("out", "output"))
        .connect("in", "left", "mix", "in1")
        .connect("mix", "out", "echo", "in")
        .connect("echo", "out", "mix", "in2")
        .connect("mix", "out", "out", "left");
    g
}

// ── Empty and unconnected graphs ────────────────────────────────────────────

#[test]
fn empty_graph_is_banner_plus_warnings() {
    let out = build(&Graph::new("Test"));
    assert!(out.success, "{:?}", out.errors);
    assert!(out.assembly.contains("; Test\n"));
    assert_eq!(out.statistics.instructions_used, 0);
    assert!(out.has_warning(codes::W0101));
    assert!(out.has_warning(codes::W0102));
    let messages: Vec<&str> = out.warnings.iter().map(|w| w.message.as_str()).collect();
    assert!(messages.iter().any(|m| m.contains("no output")));
    assert!(messages.iter().any(|m| m.contains("no input")));
    assert!(!out.assembly.contains("; Main Program"));
}

#[test]
fn unconnected_blocks_compile_to_nothing() {
    let mut g = Graph::new("Loose");
    for (id, tag) in [("in", "input"), ("fx", "chorus"), ("vol", "volume"), ("out", "output")] {
        g.add_block(Block::new(id, tag));
    }
    let out = build(&g);
    assert!(out.success, "{:?}", out.errors);
    assert_eq!(out.statistics.instructions_used, 0);
    assert_eq!(out.statistics.blocks_processed, 4);
    assert!(out.has_warning(codes::W0100));
    assert!(out.assembly.contains("fx (Chorus): input 'in' unconnected, bypassed"));
}

// ── Structural errors ───────────────────────────────────────────────────────

#[test]
fn self_loop_names_the_block() {
    let mut g = Graph::new("Loop");
    g.add_block(Block::new("amp", "gain"))
        .connect("amp", "out", "amp", "in");
    let out = build(&g);
    assert!(!out.success);
    let err = out
        .errors
        .iter()
        .find(|d| d.code == Some(codes::E0104))
        .expect("self-loop error");
    assert_eq!(err.block.as_deref(), Some("amp"));
    assert!(err.message.contains("amp"));
    assert!(out.schedule.is_none());
}

#[test]
fn kind_mismatch_rejected_in_any_declaration_order() {
    for pot_first in [true, false] {
        let mut g = Graph::new("Mismatch");
        let pot = Block::new("knob", "pot");
        let amp = Block::new("amp", "gain");
        if pot_first {
            g.add_block(pot).add_block(amp);
        } else {
            g.add_block(amp).add_block(pot);
        }
        g.connect("knob", "value", "amp", "in");
        let out = build(&g);
        assert!(!out.success);
        assert!(out.has_error(codes::E0105), "pot_first={pot_first}");
    }
}

#[test]
fn multiple_drivers_list_every_source() {
    let mut g = Graph::new("Drivers");
    g.add_block(Block::new("in", "input"))
        .add_block(Block::new("out", "output"))
        .connect("in", "left", "out", "left")
        .connect("in", "right", "out", "left");
    let out = build(&g);
    let err = out
        .errors
        .iter()
        .find(|d| d.code == Some(codes::E0106))
        .expect("multi-driver error");
    assert!(err.message.contains("in.left"));
    assert!(err.message.contains("in.right"));
}

// ── Forwarding ──────────────────────────────────────────────────────────────

#[test]
fn single_fanout_collapses_write_read_pair() {
    let mut g = Graph::new("Knob");
    g.add_block(Block::new("knob", "pot"))
        .add_block(Block::new("smooth", "smoother"))
        .connect("knob", "value", "smooth", "in");

    let mut ctx = CodegenContext::new(TargetConfig::default());
    ctx.analyze_connections(&g, &GraphIndex::build(&g));
    assert!(ctx.should_preserve_accumulator(&Endpoint::new("knob", "value")));
    assert!(ctx.is_forwarded(&Endpoint::new("smooth", "in")));

    let out = build(&g);
    assert!(out.success, "{:?}", out.errors);
    assert!(out.assembly.contains("; [fwd] wrax  knob_value, 0.0"));
    assert!(out.assembly.contains("; [fwd] ldax  knob_value"));
    assert!(out.assembly.contains("\nwrax  knob_value, 1.0\n"));
    assert!(out.has_warning(codes::W0500));
}

#[test]
fn second_consumer_disables_forwarding_fact() {
    let mut g = Graph::new("Fan");
    g.add_block(Block::new("knob", "pot"))
        .add_block(Block::new("a", "smoother"))
        .add_block(Block::new("b", "smoother"))
        .connect("knob", "value", "a", "in");
    let mut ctx = CodegenContext::new(TargetConfig::default());
    ctx.analyze_connections(&g, &GraphIndex::build(&g));
    assert!(ctx.should_preserve_accumulator(&Endpoint::new("knob", "value")));

    g.connect("knob", "value", "b", "in");
    let mut ctx = CodegenContext::new(TargetConfig::default());
    ctx.analyze_connections(&g, &GraphIndex::build(&g));
    assert!(!ctx.should_preserve_accumulator(&Endpoint::new("knob", "value")));
    assert!(!ctx.is_forwarded(&Endpoint::new("a", "in")));
}

// ── Load elision ────────────────────────────────────────────────────────────

#[test]
fn reload_after_clearing_write_is_folded() {
    let mut g = Graph::new("Chain");
    g.add_block(Block::new("in", "input"))
        .add_block(Block::new("amp", "gain"))
        .add_block(Block::new("lp", "lowpass"))
        .add_block(Block::new("out", "output"))
        .connect("in", "left", "amp", "in")
        .connect("amp", "out", "lp", "in")
        .connect("lp", "out", "out", "left");

    let out = build(&g);
    assert!(out.success, "{:?}", out.errors);
    assert!(out
        .warnings
        .iter()
        .any(|w| w.message == "load elision removed 1 redundant load(s)"));
    assert!(out.assembly.contains("; [fwd] ldax  in_left\n"));
    assert!(out.assembly.contains("\nwrax  amp_out, 1.0\n"));
    assert!(!out.assembly.contains("ldax  amp_out"));

    let registry = BlockRegistry::with_builtins().expect("builtins register");
    let options = CompileOptions {
        optimize: false,
        ..CompileOptions::default()
    };
    let plain = compile(&g, &registry, &options, &OpcodeEncoder);
    assert!(plain.assembly.contains("wrax  amp_out, 0.0\nldax  amp_out\n"));
    assert!(plain.statistics.instructions_used > out.statistics.instructions_used);
}

#[test]
fn every_block_output_folds_into_a_following_gain() {
    for (tag, port) in [
        ("gain", "in"),
        ("lowpass", "in"),
        ("svf", "in"),
        ("delay", "in"),
        ("tremolo", "in"),
        ("chorus", "in"),
        ("volume", "in"),
        ("mixer", "in1"),
    ] {
        let mut g = Graph::new(tag);
        g.add_block(Block::new("in", "input"))
            .add_block(Block::new("fx", tag))
            .add_block(Block::new("amp", "gain"))
            .add_block(Block::new("out", "output"))
            .connect("in", "left", "fx", port)
            .connect("fx", "out", "amp", "in")
            .connect("amp", "out", "out", "left");
        let out = build(&g);
        assert!(out.success, "{tag}: {:?}", out.errors);
        assert!(
            out.warnings
                .iter()
                .any(|w| w.message.starts_with("load elision removed")),
            "{tag}"
        );
        assert!(out.assembly.contains("\nwrax  fx_out, 1.0\n"), "{tag}");
        assert!(!out.assembly.contains("ldax  fx_out"), "{tag}");
    }
}

// ── Feedback ────────────────────────────────────────────────────────────────

#[test]
fn feedback_cycle_compiles() {
    let out = build(&feedback_echo());
    assert!(out.success, "{:?}", out.errors);
    assert!(!out.has_error(codes::E0200));
    let schedule = out.schedule.as_ref().expect("schedule");
    assert_eq!(schedule.order, vec!["in", "mix", "echo", "out"]);
    assert_eq!(schedule.feedback.len(), 1);
    assert_eq!(schedule.feedback[0].from, Endpoint::new("echo", "out"));

    // The mixer runs first and reads the echo's pre-allocated alias.
    assert!(out.assembly.contains("equ echo_out REG"));
    let read = out.assembly.find("rdax  echo_out, 1.0").expect("feedback read");
    let write = out.assembly.find("wrax  echo_out, 0.0").expect("echo write");
    assert!(read < write);
    assert!(out.statistics.memory_used > 8000);
}

// ── Resource ceilings ───────────────────────────────────────────────────────

#[test]
fn instruction_overflow_reports_both_counts() {
    let registry = BlockRegistry::with_builtins().expect("builtins register");
    let out = compile(
        &feedback_echo(),
        &registry,
        &CompileOptions::default(),
        &FixedCountEncoder(130),
    );
    assert!(!out.success);
    assert_eq!(out.statistics.instructions_used, 130);
    let messages = out.error_messages();
    assert!(messages.iter().any(|m| m.contains("130") && m.contains("128")));
    // Partial text is still returned.
    assert!(out.assembly.contains("; Main Program"));
}

#[test]
fn near_capacity_is_a_warning() {
    let registry = BlockRegistry::with_builtins().expect("builtins register");
    let out = compile(
        &feedback_echo(),
        &registry,
        &CompileOptions::default(),
        &FixedCountEncoder(125),
    );
    assert!(out.success);
    assert!(out.has_warning(codes::W0400));
}

#[test]
fn assembler_problems_are_fatal() {
    let registry = BlockRegistry::with_builtins().expect("builtins register");
    let out = compile(
        &feedback_echo(),
        &registry,
        &CompileOptions::default(),
        &RejectingEncoder,
    );
    assert!(!out.success);
    assert!(out.has_error(codes::E0500));
    assert!(out.error_messages()[0].contains("line 7"));
}

#[test]
fn smaller_target_limits_apply() {
    let registry = BlockRegistry::with_builtins().expect("builtins register");
    let options = CompileOptions::with_target(TargetConfig {
        memory: 4096,
        ..TargetConfig::default()
    });
    let out = compile(&feedback_echo(), &registry, &options, &OpcodeEncoder);
    assert!(!out.success);
    assert!(out.has_error(codes::E0402));
}

// ── Full programs ───────────────────────────────────────────────────────────

#[test]
fn every_effect_compiles_inline() {
    for tag in ["gain", "lowpass", "svf", "delay", "tremolo", "chorus", "volume"] {
        let mut g = Graph::new(tag);
        g.add_block(Block::new("in", "input"))
            .add_block(Block::new("fx", tag))
            .add_block(Block::new("out", "output"))
            .connect("in", "left", "fx", "in")
            .connect("fx", "out", "out", "left");
        let out = build(&g);
        assert!(out.success, "{tag}: {:?}", out.errors);
        assert!(out.statistics.instructions_used > 0, "{tag}");
        assert!(out.statistics.instructions_used <= 128, "{tag}");
    }
}

#[test]
fn statistics_serialize_camel_case() {
    let out = build(&feedback_echo());
    let json = serde_json::to_value(&out.statistics).expect("serializes");
    for key in ["instructionsUsed", "registersUsed", "memoryUsed", "blocksProcessed"] {
        assert!(json.get(key).is_some(), "missing {key}");
    }
    assert_eq!(json["blocksProcessed"], 4);
}
