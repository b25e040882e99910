// io.rs — Hand-written converter and control-source blocks
//
// `input` reads the ADCs, `output` writes the DACs, `pot` exposes one of
// the hardware potentiometers as a control signal. All three touch fixed
// I/O registers, so they are written directly against the block context
// rather than as templates.

use crate::alloc::BlockContext;
use crate::ir::Section;
use crate::registry::{
    BlockCategory, BlockDescriptor, BlockKind, GenerateError, ParamSpec, PortSpec,
};

// ── input ───────────────────────────────────────────────────────────────────

pub struct Input {
    descriptor: BlockDescriptor,
}

impl Input {
    pub fn new() -> Self {
        Input {
            descriptor: BlockDescriptor::new("input", "Stereo Input", BlockCategory::Source)
                .with_output(PortSpec::audio("left", "Left"))
                .with_output(PortSpec::audio("right", "Right")),
        }
    }
}

impl BlockKind for Input {
    fn descriptor(&self) -> &BlockDescriptor {
        &self.descriptor
    }

    fn generate(&self, ctx: &mut BlockContext<'_>) -> Result<(), GenerateError> {
        for (port, adc) in [("left", "ADCL"), ("right", "ADCR")] {
            if !ctx.is_connected(port) {
                continue;
            }
            let alias = ctx.output(port)?;
            ctx.emit(Section::Input, "rdax", &[adc, "1.0"]);
            ctx.emit(Section::Input, "wrax", &[&alias, "0.0"]);
        }
        Ok(())
    }
}

// ── output ──────────────────────────────────────────────────────────────────

pub struct Output {
    descriptor: BlockDescriptor,
}

impl Output {
    pub fn new() -> Self {
        Output {
            descriptor: BlockDescriptor::new("output", "Stereo Output", BlockCategory::Sink)
                .with_input(PortSpec::audio("left", "Left").required())
                .with_input(PortSpec::audio("right", "Right")),
        }
    }
}

impl BlockKind for Output {
    fn descriptor(&self) -> &BlockDescriptor {
        &self.descriptor
    }

    /// A single connected side feeds both converters.
    fn generate(&self, ctx: &mut BlockContext<'_>) -> Result<(), GenerateError> {
        let left = ctx.input("left")?;
        let right = ctx.input("right")?;
        let (left, right) = match (left, right) {
            (None, None) => {
                let text = format!("{}: no signal connected, outputs silent", ctx.id());
                ctx.comment(Section::Output, text);
                return Ok(());
            }
            (Some(l), None) => (l.clone(), l),
            (None, Some(r)) => (r.clone(), r),
            (Some(l), Some(r)) => (l, r),
        };
        if left == right {
            ctx.emit(Section::Output, "rdax", &[&left, "1.0"]);
            ctx.emit(Section::Output, "wrax", &["DACL", "1.0"]);
            ctx.emit(Section::Output, "wrax", &["DACR", "0.0"]);
        } else {
            ctx.emit(Section::Output, "rdax", &[&left, "1.0"]);
            ctx.emit(Section::Output, "wrax", &["DACL", "0.0"]);
            ctx.emit(Section::Output, "rdax", &[&right, "1.0"]);
            ctx.emit(Section::Output, "wrax", &["DACR", "0.0"]);
        }
        Ok(())
    }
}

// ── pot ─────────────────────────────────────────────────────────────────────

pub struct Pot {
    descriptor: BlockDescriptor,
}

/// Hardware potentiometers.
const POTS: u32 = 3;

impl Pot {
    pub fn new() -> Self {
        Pot {
            descriptor: BlockDescriptor::new("pot", "Potentiometer", BlockCategory::Control)
                .with_output(PortSpec::control("value", "Value"))
                .with_param(ParamSpec::new("pot", "Pot", 0.0, 0.0, f64::from(POTS - 1))),
        }
    }
}

impl BlockKind for Pot {
    fn descriptor(&self) -> &BlockDescriptor {
        &self.descriptor
    }

    fn generate(&self, ctx: &mut BlockContext<'_>) -> Result<(), GenerateError> {
        let n = ctx.display_param("pot")?.round() as u32;
        let pot = format!("POT{n}");
        let mapping = format!("{pot} -> {}", ctx.id());
        ctx.add_parameter_mapping(mapping);
        if !ctx.is_connected("value") {
            return Ok(());
        }
        let alias = ctx.output("value")?;
        ctx.emit(Section::Input, "rdax", &[&pot, "1.0"]);
        ctx.emit(Section::Input, "wrax", &[&alias, "0.0"]);
        Ok(())
    }
}
