// blocks/mod.rs — Built-in block library
//
// Hand-written generators for converter, potentiometer and mixing blocks,
// template-based generators for everything else.
//
// Preconditions: none.
// Postconditions: every built-in template parses.
// Failure modes: a malformed built-in template → `RegistryError::Template`.
// Side effects: registers block kinds.

mod io;
mod library;
mod mix;

use crate::registry::{BlockRegistry, RegistryError};
use crate::template::TemplateBlock;

pub fn register_builtins(registry: &mut BlockRegistry) -> Result<(), RegistryError> {
    registry.register(Box::new(io::Input::new()))?;
    registry.register(Box::new(io::Output::new()))?;
    registry.register(Box::new(io::Pot::new()))?;
    registry.register(Box::new(mix::Mixer::new()))?;
    registry.register(Box::new(mix::Volume::new()))?;

    for (descriptor, source) in library::templates() {
        let type_tag = descriptor.type_tag.clone();
        let kind = TemplateBlock::new(descriptor, source)
            .map_err(|source| RegistryError::Template { type_tag, source })?;
        registry.register(Box::new(kind))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::{BlockContext, CodegenContext};
    use crate::config::TargetConfig;
    use crate::graph::{Block, Graph, GraphIndex};
    use crate::ir::Section;

    /// Generate every block of `g` in declaration order and return the
    /// rendered code sections.
    fn generate(g: &Graph) -> (CodegenContext, Vec<String>) {
        let registry = BlockRegistry::with_builtins().unwrap();
        let mut ctx = CodegenContext::new(TargetConfig::default());
        ctx.analyze_connections(g, &GraphIndex::build(g));
        for block in &g.blocks {
            let kind = registry.lookup(&block.type_tag).unwrap();
            let mut bctx = BlockContext::new(&mut ctx, block, kind.descriptor());
            kind.generate(&mut bctx).unwrap();
            ctx.reset_scratch();
        }
        let mut lines = Vec::new();
        for s in Section::CODE {
            lines.extend(ctx.sections().get(s).iter().map(|l| format!("{s}: {l}")));
        }
        (ctx, lines)
    }

    #[test]
    fn every_builtin_is_registered() {
        let reg = BlockRegistry::with_builtins().unwrap();
        for tag in [
            "input",
            "output",
            "pot",
            "mixer",
            "volume",
            "gain",
            "lowpass",
            "svf",
            "delay",
            "tremolo",
            "chorus",
            "smoother",
            "control_range",
        ] {
            assert!(reg.lookup(tag).is_some(), "missing {tag}");
        }
        assert_eq!(reg.len(), 13);
    }

    #[test]
    fn template_registers_reach_descriptors() {
        let reg = BlockRegistry::with_builtins().unwrap();
        assert_eq!(reg.descriptor("svf").unwrap().registers, vec!["lp", "bp"]);
        assert_eq!(reg.descriptor("lowpass").unwrap().registers, vec!["state"]);
    }

    #[test]
    fn passthrough_mono_feeds_both_dacs() {
        let mut g = Graph::new("t");
        g.add_block(Block::new("in", "input"))
            .add_block(Block::new("out", "output"))
            .connect("in", "left", "out", "left");
        let (_, lines) = generate(&g);
        assert_eq!(
            lines,
            vec![
                "input: rdax  ADCL, 1.0",
                "input: wrax  in_left, 0.0",
                "output: rdax  in_left, 1.0",
                "output: wrax  DACL, 1.0",
                "output: wrax  DACR, 0.0",
            ]
        );
    }

    #[test]
    fn every_template_block_generates() {
        for tag in ["gain", "lowpass", "svf", "delay", "tremolo", "chorus"] {
            let mut g = Graph::new("t");
            g.add_block(Block::new("in", "input"))
                .add_block(Block::new("fx", tag))
                .add_block(Block::new("out", "output"))
                .connect("in", "left", "fx", "in")
                .connect("fx", "out", "out", "left");
            let (ctx, lines) = generate(&g);
            assert!(
                lines.iter().any(|l| l.contains("fx_out")),
                "{tag}: {lines:?}"
            );
            assert!(ctx.sections().instruction_count() > 4, "{tag}");
        }
    }

    #[test]
    fn control_chain_generates() {
        let mut g = Graph::new("t");
        g.add_block(Block::new("knob", "pot").with_param("pot", 1.0))
            .add_block(Block::new("smooth", "smoother"))
            .add_block(Block::new("range", "control_range").with_param("min", 0.25))
            .connect("knob", "value", "smooth", "in")
            .connect("smooth", "out", "range", "in");
        let (ctx, lines) = generate(&g);
        assert_eq!(ctx.parameter_mappings(), &["POT1 -> knob".to_string()]);
        assert!(lines.contains(&"input: rdax  POT1, 1.0".to_string()));
        assert!(lines.contains(&"main: sof   0.75, 0.25".to_string()));
    }

    #[test]
    fn volume_prefers_control_input() {
        let mut g = Graph::new("t");
        g.add_block(Block::new("in", "input"))
            .add_block(Block::new("knob", "pot"))
            .add_block(Block::new("vol", "volume"))
            .connect("in", "left", "vol", "in")
            .connect("knob", "value", "vol", "level");
        let (_, lines) = generate(&g);
        assert!(lines.contains(&"main: mulx  knob_value".to_string()));

        let mut g = Graph::new("t");
        g.add_block(Block::new("in", "input"))
            .add_block(Block::new("vol", "volume").with_param("level", 0.5))
            .connect("in", "left", "vol", "in");
        let (_, lines) = generate(&g);
        assert!(lines.contains(&"main: rdax  in_left, 0.5".to_string()));
    }

    #[test]
    fn mixer_sums_connected_inputs() {
        let mut g = Graph::new("t");
        g.add_block(Block::new("in", "input"))
            .add_block(Block::new("mix", "mixer").with_param("gain2", -6.0))
            .connect("in", "left", "mix", "in1")
            .connect("in", "right", "mix", "in2");
        let (_, lines) = generate(&g);
        assert!(lines.contains(&"main: rdax  in_left, 1.0".to_string()));
        assert!(lines.iter().any(|l| l.starts_with("main: rdax  in_right, 0.501")));
        assert!(lines.contains(&"main: wrax  mix_out, 0.0".to_string()));
    }

    #[test]
    fn two_lfo_blocks_fit() {
        let mut g = Graph::new("t");
        g.add_block(Block::new("in", "input"));
        for id in ["a", "b"] {
            g.add_block(Block::new(id, "tremolo")).connect("in", "left", id, "in");
        }
        let (ctx, _) = generate(&g);
        assert_eq!(ctx.sections().get(Section::Init).len(), 2);
    }
}
